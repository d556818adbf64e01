use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::GatewayError;
use crate::models::PositionSide;

/// External source of truth for open positions
#[async_trait]
pub trait PositionGateway: Send + Sync {
    /// Whether a position of `side` is currently open for `asset`
    async fn is_open(&self, asset: &str, side: PositionSide) -> Result<bool, GatewayError>;

    /// Open a new position. Callers are responsible for not repeating it.
    async fn open(&self, asset: &str, side: PositionSide, size: f64) -> Result<(), GatewayError>;

    /// Add exposure to whichever side is open; returns that side when reported
    async fn add_extra(&self, asset: &str, size: f64) -> Result<Option<PositionSide>, GatewayError>;
}

#[derive(Debug, Deserialize)]
struct PositionCountResponse {
    #[serde(default)]
    count: u64,
}

#[derive(Debug, Serialize)]
struct ManageRequest<'a> {
    #[serde(rename = "Action")]
    action: &'a str,
    #[serde(rename = "positionSize")]
    position_size: f64,
}

#[derive(Debug, Deserialize)]
struct ExtraResponse {
    #[serde(default)]
    side: Option<String>,
}

/// HTTP client for the position-management service
///
/// Endpoints:
/// - `GET /positioncount?coinName=..&positionSide=..&status=open&tableName=..`
/// - `POST /manage/{coin}?tableName=..` with `{"Action": "Long"|"Short"|"Extra", "positionSize": n}`
#[derive(Clone)]
pub struct PositionApiClient {
    client: Client,
    base_url: String,
    table_name: String,
}

impl PositionApiClient {
    pub fn new(
        base_url: impl Into<String>,
        table_name: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            table_name: table_name.into(),
        })
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    async fn manage(&self, asset: &str, action: &str, size: f64) -> Result<Response, GatewayError> {
        let url = format!("{}/manage/{}", self.base_url, asset);
        let response = self
            .client
            .post(&url)
            .query(&[("tableName", self.table_name.as_str())])
            .json(&ManageRequest {
                action,
                position_size: size,
            })
            .send()
            .await?;

        check_status(response).await
    }
}

fn side_name(side: PositionSide) -> Result<&'static str, GatewayError> {
    side.api_name()
        .ok_or_else(|| GatewayError::InvalidRequest(format!("side '{}' has no position", side)))
}

async fn check_status(response: Response) -> Result<Response, GatewayError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    Err(GatewayError::Status {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl PositionGateway for PositionApiClient {
    async fn is_open(&self, asset: &str, side: PositionSide) -> Result<bool, GatewayError> {
        let side = side_name(side)?;
        let url = format!("{}/positioncount", self.base_url);

        let response = self
            .client
            .get(&url)
            .query(&[
                ("coinName", asset),
                ("positionSide", side),
                ("status", "open"),
                ("tableName", self.table_name.as_str()),
            ])
            .send()
            .await?;

        let body: PositionCountResponse = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| GatewayError::Malformed(format!("position count: {}", e)))?;

        tracing::debug!(asset, side, count = body.count, "checked open positions");
        Ok(body.count > 0)
    }

    async fn open(&self, asset: &str, side: PositionSide, size: f64) -> Result<(), GatewayError> {
        let action = side_name(side)?;
        self.manage(asset, action, size).await?;
        Ok(())
    }

    async fn add_extra(&self, asset: &str, size: f64) -> Result<Option<PositionSide>, GatewayError> {
        let response = self.manage(asset, "Extra", size).await?;

        // The service reports the side it topped up; anything else is not fatal
        let body = response.text().await.unwrap_or_default();
        let side = serde_json::from_str::<ExtraResponse>(&body)
            .ok()
            .and_then(|r| r.side)
            .and_then(|s| PositionSide::from_api_name(&s));

        Ok(side)
    }
}

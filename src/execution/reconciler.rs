use std::collections::HashSet;
use std::fmt;

use crate::api::PositionGateway;
use crate::buckets::BucketSignal;
use crate::error::GatewayError;
use crate::models::{BucketDirection, PositionSide};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionAction {
    OpenLong,
    OpenShort,
    AddExtra,
    NoOp,
}

impl fmt::Display for PositionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::OpenLong => "open_long",
            Self::OpenShort => "open_short",
            Self::AddExtra => "add_extra",
            Self::NoOp => "none",
        };
        f.write_str(name)
    }
}

/// Open/closed status reported by the gateway for both sides of one asset
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ObservedPosition {
    pub long_open: bool,
    pub short_open: bool,
}

impl ObservedPosition {
    pub fn side(&self) -> PositionSide {
        if self.long_open {
            PositionSide::Long
        } else if self.short_open {
            PositionSide::Short
        } else {
            PositionSide::Flat
        }
    }
}

/// Ask the gateway about both sides.
///
/// Long takes priority, so a confirmed long stands even if the short check
/// fails. Any other failed check makes the whole read unknown.
pub async fn observe_position<G: PositionGateway + ?Sized>(
    gateway: &G,
    asset: &str,
) -> Result<ObservedPosition, GatewayError> {
    let long_open = gateway.is_open(asset, PositionSide::Long).await?;
    let short_open = match gateway.is_open(asset, PositionSide::Short).await {
        Ok(open) => open,
        Err(e) if long_open => {
            tracing::warn!(asset, "Short position check failed, long confirmed open: {}", e);
            false
        }
        Err(e) => return Err(e),
    };
    Ok(ObservedPosition {
        long_open,
        short_open,
    })
}

/// Per-asset belief about the open position plus the buckets already acted on
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssetState {
    pub position_side: PositionSide,
    consumed_bucket_ids: HashSet<u64>,
}

impl AssetState {
    pub fn is_consumed(&self, bucket_id: u64) -> bool {
        self.consumed_bucket_ids.contains(&bucket_id)
    }

    pub fn consumed_count(&self) -> usize {
        self.consumed_bucket_ids.len()
    }

    fn consume(&mut self, bucket_id: u64) {
        self.consumed_bucket_ids.insert(bucket_id);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileDecision {
    pub action: PositionAction,
    pub bucket_id: Option<u64>,
    /// Record the bucket as consumed once the action succeeds (immediately for `NoOp`)
    pub consumes_bucket: bool,
    pub reason: String,
}

impl ReconcileDecision {
    fn new(
        action: PositionAction,
        bucket_id: Option<u64>,
        consumes_bucket: bool,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            action,
            bucket_id,
            consumes_bucket,
            reason: reason.into(),
        }
    }
}

#[derive(Debug)]
pub enum ReconcileOutcome {
    /// No sealed bucket to act on
    NoSignal,
    /// Signal present but nothing needed doing
    Unchanged(ReconcileDecision),
    /// Gateway confirmed the action
    Executed(ReconcileDecision),
    /// Gateway call failed; the bucket stays eligible for the next cycle
    Failed {
        decision: ReconcileDecision,
        error: GatewayError,
    },
}

impl ReconcileOutcome {
    pub fn action(&self) -> PositionAction {
        match self {
            Self::NoSignal => PositionAction::NoOp,
            Self::Unchanged(decision) | Self::Executed(decision) => decision.action,
            Self::Failed { decision, .. } => decision.action,
        }
    }
}

/// Maps the latest sealed bucket and the observed position to at most one
/// gateway action per bucket.
///
/// The gateway is authoritative: every cycle starts by resyncing the local
/// belief from it. A failed check keeps the last good belief, and a bucket is
/// only marked consumed after the gateway confirms the action.
#[derive(Debug, Clone)]
pub struct PositionReconciler {
    asset: String,
    position_size: f64,
    state: AssetState,
}

impl PositionReconciler {
    pub fn new(asset: impl Into<String>, position_size: f64) -> Self {
        Self {
            asset: asset.into(),
            position_size,
            state: AssetState::default(),
        }
    }

    pub fn asset(&self) -> &str {
        &self.asset
    }

    pub fn state(&self) -> &AssetState {
        &self.state
    }

    /// Overwrite the local belief with what the gateway reported
    pub fn resync(&mut self, observed: ObservedPosition) {
        let side = observed.side();
        if side != self.state.position_side {
            tracing::info!(
                asset = %self.asset,
                from = %self.state.position_side,
                to = %side,
                "Position state resynced from gateway"
            );
        }
        self.state.position_side = side;
    }

    /// Query the gateway and resync; on failure keep the current belief
    pub async fn refresh<G: PositionGateway + ?Sized>(&mut self, gateway: &G) -> Option<ObservedPosition> {
        match observe_position(gateway, &self.asset).await {
            Ok(observed) => {
                self.resync(observed);
                Some(observed)
            }
            Err(e) => {
                tracing::warn!(
                    asset = %self.asset,
                    side = %self.state.position_side,
                    "Position check failed, keeping last known state: {}",
                    e
                );
                None
            }
        }
    }

    /// Pure decision for the current belief; does not touch state
    pub fn decide(&self, signal: Option<&BucketSignal>) -> ReconcileDecision {
        use PositionAction::*;

        let Some(signal) = signal else {
            return ReconcileDecision::new(NoOp, None, false, "No sealed bucket");
        };
        let id = Some(signal.bucket_id);

        if self.state.is_consumed(signal.bucket_id) {
            return ReconcileDecision::new(NoOp, id, false, "Bucket already acted on");
        }

        match (signal.direction, self.state.position_side) {
            (BucketDirection::Bullish, PositionSide::Short) => {
                ReconcileDecision::new(AddExtra, id, true, "Bullish bucket against open short, adding extra")
            }
            (BucketDirection::Bullish, PositionSide::Long) => {
                ReconcileDecision::new(NoOp, id, true, "Bullish bucket while already long")
            }
            (BucketDirection::Bullish, PositionSide::Flat) => {
                ReconcileDecision::new(OpenLong, id, true, "Bullish bucket with no open position")
            }
            (BucketDirection::Bearish, PositionSide::Long) => {
                ReconcileDecision::new(AddExtra, id, true, "Bearish bucket against open long, adding extra")
            }
            (BucketDirection::Bearish, PositionSide::Short) => {
                ReconcileDecision::new(NoOp, id, true, "Bearish bucket while already short")
            }
            (BucketDirection::Bearish, PositionSide::Flat) => {
                ReconcileDecision::new(OpenShort, id, true, "Bearish bucket with no open position")
            }
        }
    }

    /// Carry out a decision and commit state only on confirmed success
    pub async fn execute<G: PositionGateway + ?Sized>(
        &mut self,
        decision: ReconcileDecision,
        gateway: &G,
    ) -> ReconcileOutcome {
        let Some(bucket_id) = decision.bucket_id else {
            return ReconcileOutcome::NoSignal;
        };

        let result = match decision.action {
            PositionAction::NoOp => {
                if decision.consumes_bucket {
                    self.state.consume(bucket_id);
                }
                tracing::info!(asset = %self.asset, bucket_id, "No action: {}", decision.reason);
                return ReconcileOutcome::Unchanged(decision);
            }
            PositionAction::OpenLong => self.open(gateway, PositionSide::Long).await,
            PositionAction::OpenShort => self.open(gateway, PositionSide::Short).await,
            PositionAction::AddExtra => self.add_extra(gateway).await,
        };

        match result {
            Ok(()) => {
                if decision.consumes_bucket {
                    self.state.consume(bucket_id);
                }
                tracing::info!(
                    asset = %self.asset,
                    bucket_id,
                    action = %decision.action,
                    side = %self.state.position_side,
                    size = self.position_size,
                    "✓ {}",
                    decision.reason
                );
                ReconcileOutcome::Executed(decision)
            }
            Err(error) => {
                tracing::warn!(
                    asset = %self.asset,
                    bucket_id,
                    action = %decision.action,
                    "✗ Gateway call failed, bucket left for retry: {}",
                    error
                );
                ReconcileOutcome::Failed { decision, error }
            }
        }
    }

    /// Decide and execute for an already-resynced belief
    pub async fn reconcile_signal<G: PositionGateway + ?Sized>(
        &mut self,
        signal: Option<&BucketSignal>,
        gateway: &G,
    ) -> ReconcileOutcome {
        let decision = self.decide(signal);
        self.execute(decision, gateway).await
    }

    /// Full cycle: resync from the gateway, then decide and execute
    pub async fn reconcile<G: PositionGateway + ?Sized>(
        &mut self,
        signal: Option<&BucketSignal>,
        gateway: &G,
    ) -> ReconcileOutcome {
        self.refresh(gateway).await;
        self.reconcile_signal(signal, gateway).await
    }

    async fn open<G: PositionGateway + ?Sized>(
        &mut self,
        gateway: &G,
        side: PositionSide,
    ) -> Result<(), GatewayError> {
        gateway.open(&self.asset, side, self.position_size).await?;
        self.state.position_side = side;
        Ok(())
    }

    async fn add_extra<G: PositionGateway + ?Sized>(&mut self, gateway: &G) -> Result<(), GatewayError> {
        if let Some(reported) = gateway.add_extra(&self.asset, self.position_size).await? {
            if reported != self.state.position_side {
                tracing::warn!(
                    asset = %self.asset,
                    believed = %self.state.position_side,
                    reported = %reported,
                    "Gateway topped up a different side than expected"
                );
                self.state.position_side = reported;
            }
        }
        Ok(())
    }
}

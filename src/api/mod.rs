pub mod binance;
pub mod position_api;

pub use binance::{closed_candles, fetch_all_candles, market_symbol, BinanceClient, CandleSource};
pub use position_api::{PositionApiClient, PositionGateway};

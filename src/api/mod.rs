pub mod cache;
pub mod market;

pub use cache::CandleCache;
pub use market::{MarketClient, MarketError};

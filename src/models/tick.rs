use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TickKind {
    Trade,
    Depth,
}

/// A single unified market-data event.
///
/// Depth messages carry best bid/ask and a derived mid price in
/// `trade_price`, so downstream consumers never need to branch on kind
/// to read a price.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tick {
    pub symbol: String,
    pub kind: TickKind,
    pub trade_price: f64,
    pub best_bid: Option<f64>,
    pub best_ask: Option<f64>,
    pub spread: Option<f64>,
    pub ts: DateTime<Utc>,
}

impl Tick {
    pub fn trade(symbol: impl Into<String>, price: f64) -> Self {
        Self {
            symbol: symbol.into(),
            kind: TickKind::Trade,
            trade_price: price,
            best_bid: None,
            best_ask: None,
            spread: None,
            ts: Utc::now(),
        }
    }

    pub fn depth(symbol: impl Into<String>, best_bid: f64, best_ask: f64) -> Self {
        Self {
            symbol: symbol.into(),
            kind: TickKind::Depth,
            trade_price: (best_bid + best_ask) / 2.0,
            best_bid: Some(best_bid),
            best_ask: Some(best_ask),
            spread: Some(best_ask - best_bid),
            ts: Utc::now(),
        }
    }
}

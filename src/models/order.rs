use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrdType {
    Market,
    Limit,
}

impl OrdType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrdType::Market => "market",
            OrdType::Limit => "limit",
        }
    }
}

/// A confirmed execution, produced only after the exchange reports `done`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderFill {
    pub symbol: String,
    pub side: OrderSide,
    pub price: f64,
    pub volume: f64,
    pub ts: DateTime<Utc>,
    pub order_id: String,
}

/// Trader-local record of an exchange-accepted order that has not yet
/// terminated in done/cancel/fail.
#[derive(Debug, Clone)]
pub struct PendingOrder {
    pub symbol: String,
    pub side: OrderSide,
    pub intended_volume: f64,
    pub intended_price: f64,
    pub sent_at: tokio::time::Instant,
    pub last_poll: Option<tokio::time::Instant>,
    pub cancel_requested: bool,
}

/// What an in-flight API response should be applied to, keyed by request id.
#[derive(Debug, Clone)]
pub enum PendingRequest {
    BalanceKrw,
    BalanceCoin {
        symbol: String,
    },
    BuyOrder {
        symbol: String,
        price: f64,
        volume: f64,
        reason: String,
    },
    SellOrder {
        symbol: String,
        price: f64,
        volume: f64,
        reason: String,
    },
    OrderStatus {
        order_id: String,
    },
    CancelOrder {
        order_id: String,
    },
}

/// Typed request consumed by the API worker.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub request_id: Uuid,
    pub kind: ApiRequestKind,
}

#[derive(Debug, Clone)]
pub enum ApiRequestKind {
    GetBalance {
        ticker: String,
    },
    PlaceOrder {
        market: String,
        side: OrderSide,
        ord_type: OrdType,
        /// KRW amount for a market buy, coin units for a market sell.
        volume: f64,
    },
    GetOrder {
        order_id: String,
    },
    CancelOrder {
        order_id: String,
    },
}

/// Typed response emitted by the API worker. Errors still carry the
/// request id so the trader can retire the correlation.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub request_id: Uuid,
    pub payload: Result<ApiPayload, String>,
}

#[derive(Debug, Clone)]
pub enum ApiPayload {
    Balance(f64),
    OrderAck { order_id: String },
    OrderStatus(OrderStatusInfo),
    Cancelled { order_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderState {
    Wait,
    Done,
    Cancel,
    Fail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderTrade {
    pub price: f64,
    pub volume: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderStatusInfo {
    pub order_id: String,
    pub state: OrderState,
    pub volume: f64,
    pub remaining_volume: f64,
    pub trades: Vec<OrderTrade>,
}

impl OrderStatusInfo {
    pub fn executed_volume(&self) -> f64 {
        (self.volume - self.remaining_volume).max(0.0)
    }

    /// Volume-weighted average fill price over the reported trades.
    pub fn avg_fill_price(&self) -> Option<f64> {
        let total: f64 = self.trades.iter().map(|t| t.volume).sum();
        if total <= 0.0 {
            return None;
        }
        let notional: f64 = self.trades.iter().map(|t| t.price * t.volume).sum();
        Some(notional / total)
    }
}

/// One append-only trade-log row, written after every fill.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub ts_iso_utc: String,
    pub side: String,
    pub symbol: String,
    pub price: f64,
    pub volume: f64,
}

impl TradeRecord {
    pub fn from_fill(fill: &OrderFill) -> Self {
        Self {
            ts_iso_utc: fill.ts.to_rfc3339(),
            side: match fill.side {
                OrderSide::Buy => "BUY".into(),
                OrderSide::Sell => "SELL".into(),
            },
            symbol: fill.symbol.clone(),
            price: fill.price,
            volume: fill.volume,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn avg_fill_price_is_volume_weighted() {
        let status = OrderStatusInfo {
            order_id: "x".into(),
            state: OrderState::Done,
            volume: 3.0,
            remaining_volume: 0.0,
            trades: vec![
                OrderTrade { price: 100.0, volume: 1.0 },
                OrderTrade { price: 130.0, volume: 2.0 },
            ],
        };
        let avg = status.avg_fill_price().unwrap();
        assert!((avg - 120.0).abs() < 1e-9);
    }

    #[test]
    fn avg_fill_price_none_without_trades() {
        let status = OrderStatusInfo {
            order_id: "x".into(),
            state: OrderState::Done,
            volume: 1.0,
            remaining_volume: 0.0,
            trades: vec![],
        };
        assert!(status.avg_fill_price().is_none());
    }

    #[test]
    fn order_state_decodes_from_exchange_json() {
        let s: OrderState = serde_json::from_str("\"done\"").unwrap();
        assert_eq!(s, OrderState::Done);
        let s: OrderState = serde_json::from_str("\"cancel\"").unwrap();
        assert_eq!(s, OrderState::Cancel);
    }
}

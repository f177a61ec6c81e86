use crate::models::order::{OrderFill, OrderSide};
use crate::models::position::{Position, PositionKind};
use serde_json::json;

/// Position bookkeeping and performance counters shared by every strategy
/// variant.
///
/// Invariants: a flat position has zero entry price and volume; unrealized
/// pnl is recomputed from the latest trade price on every tick while long.
#[derive(Debug, Clone)]
pub struct StrategyCore {
    pub symbol: String,
    pub position: Position,
    pub initialized: bool,
    pub tick_count: u64,
    pub total_trades: u64,
    pub winning_trades: u64,
    pub total_pnl: f64,
}

impl StrategyCore {
    pub fn new(symbol: impl Into<String>) -> Self {
        let symbol = symbol.into();
        Self {
            position: Position::flat(symbol.clone()),
            symbol,
            initialized: false,
            tick_count: 0,
            total_trades: 0,
            winning_trades: 0,
            total_pnl: 0.0,
        }
    }

    /// Per-tick housekeeping: counts the tick and refreshes unrealized pnl.
    pub fn pre_tick(&mut self, current_price: f64) {
        self.tick_count += 1;
        self.update_unrealized(current_price);
    }

    pub fn update_unrealized(&mut self, current_price: f64) {
        if self.position.is_long() {
            self.position.unrealized_pnl =
                (current_price - self.position.entry_price) * self.position.volume;
        }
    }

    /// Percentage gain over the entry price. None while flat or when the
    /// entry price is unusable (suppresses all exit logic).
    pub fn gain_pct(&self, current_price: f64) -> Option<f64> {
        if self.position.entry_price <= 0.0 {
            return None;
        }
        Some((current_price - self.position.entry_price) / self.position.entry_price * 100.0)
    }

    pub fn apply_fill(&mut self, fill: &OrderFill) -> f64 {
        self.total_trades += 1;
        match fill.side {
            OrderSide::Buy => {
                self.apply_buy_fill(fill);
                0.0
            }
            OrderSide::Sell => self.apply_sell_fill(fill),
        }
    }

    fn apply_buy_fill(&mut self, fill: &OrderFill) {
        self.position.kind = PositionKind::Long;
        self.position.entry_price = fill.price;
        self.position.volume = fill.volume;
        self.position.entry_ts = Some(fill.ts);
        self.position.unrealized_pnl = 0.0;
    }

    /// Realizes pnl for the sold volume. A fill covering the held volume
    /// resets the position to flat; a smaller fill (partial close) keeps
    /// the position long with the remainder.
    fn apply_sell_fill(&mut self, fill: &OrderFill) -> f64 {
        if !self.position.is_long() {
            return 0.0;
        }

        let pnl = (fill.price - self.position.entry_price) * fill.volume;
        self.position.realized_pnl += pnl;
        self.total_pnl += pnl;
        if pnl > 0.0 {
            self.winning_trades += 1;
        }

        if fill.volume + 1e-12 >= self.position.volume {
            self.position.close();
        } else {
            self.position.volume -= fill.volume;
            self.update_unrealized(fill.price);
        }
        pnl
    }

    pub fn position_info(&self) -> serde_json::Value {
        json!({
            "symbol": self.position.symbol,
            "position": format!("{:?}", self.position.kind).to_lowercase(),
            "entry_price": self.position.entry_price,
            "volume": self.position.volume,
            "unrealized_pnl": self.position.unrealized_pnl,
            "realized_pnl": self.position.realized_pnl,
        })
    }

    pub fn performance(&self) -> serde_json::Value {
        let win_rate = if self.total_trades > 0 {
            self.winning_trades as f64 / self.total_trades as f64 * 100.0
        } else {
            0.0
        };
        json!({
            "total_trades": self.total_trades,
            "winning_trades": self.winning_trades,
            "win_rate": (win_rate * 100.0).round() / 100.0,
            "total_pnl": (self.total_pnl * 100.0).round() / 100.0,
            "tick_count": self.tick_count,
        })
    }

    pub fn reset(&mut self) {
        self.position = Position::flat(self.symbol.clone());
        self.initialized = false;
        self.tick_count = 0;
        self.total_trades = 0;
        self.winning_trades = 0;
        self.total_pnl = 0.0;
    }
}

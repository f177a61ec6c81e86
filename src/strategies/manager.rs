use crate::config::{Config, StrategyKind};
use crate::models::order::{OrderFill, OrderSide};
use crate::models::signal::{Signal, SignalAction};
use crate::models::tick::Tick;
use crate::strategies::advanced_scalping::AdvancedScalpingStrategy;
use crate::strategies::ma_cross::MaCrossStrategy;
use crate::strategies::rsi::RsiStrategy;
use crate::strategies::scalping::ScalpingStrategy;
use crate::strategies::Strategy;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Owns one strategy instance per active symbol and enforces the
/// portfolio-wide limits before any buy leaves the building.
pub struct StrategyManager {
    kind: StrategyKind,
    config: Arc<Config>,
    strategies: HashMap<String, Box<dyn Strategy>>,
    pub active_positions: usize,
    pub total_position_value: f64,
}

impl StrategyManager {
    pub fn new(kind: StrategyKind, symbols: &[String], config: Arc<Config>) -> Self {
        let mut manager = Self {
            kind,
            config,
            strategies: HashMap::new(),
            active_positions: 0,
            total_position_value: 0.0,
        };
        for symbol in symbols {
            manager.add_strategy(symbol);
        }
        manager
    }

    fn add_strategy(&mut self, symbol: &str) {
        let params = self.config.strategy_params(symbol);
        let strategy: Box<dyn Strategy> = match self.kind {
            StrategyKind::Scalping => Box::new(ScalpingStrategy::new(symbol, &params)),
            StrategyKind::MaCross => Box::new(MaCrossStrategy::new(symbol, &params)),
            StrategyKind::Rsi => Box::new(RsiStrategy::new(symbol, &params)),
            StrategyKind::AdvancedScalping => {
                Box::new(AdvancedScalpingStrategy::new(symbol, &params))
            }
        };
        info!("Strategy created: {symbol} ({:?})", self.kind);
        self.strategies.insert(symbol.to_string(), strategy);
    }

    /// Initialise every strategy, optionally with historical closes.
    pub fn prepare_all(&mut self, historical: Option<&HashMap<String, Vec<f64>>>) {
        for (symbol, strategy) in &mut self.strategies {
            let closes = historical.and_then(|h| h.get(symbol)).map(|v| v.as_slice());
            strategy.prepare(closes);
        }
        info!("{} strategies prepared", self.strategies.len());
    }

    /// Dispatch a tick; buy signals pass through the portfolio gate.
    pub fn process_tick(&mut self, symbol: &str, tick: &Tick) -> Option<Signal> {
        let strategy = match self.strategies.get_mut(symbol) {
            Some(s) => s,
            None => {
                warn!("Tick for unknown symbol: {symbol}");
                return None;
            }
        };

        let signal = strategy.on_tick(tick);

        if signal.action == SignalAction::Buy && !self.can_open_position(symbol) {
            info!("Buy rejected by portfolio limits: {symbol}");
            return Some(Signal::hold("portfolio limit"));
        }

        Some(signal)
    }

    pub fn process_order_fill(&mut self, symbol: &str, fill: &OrderFill) {
        let strategy = match self.strategies.get_mut(symbol) {
            Some(s) => s,
            None => {
                warn!("Fill for unknown symbol: {symbol}");
                return;
            }
        };

        let was_long = strategy.core().position.is_long();
        strategy.on_order_fill(fill);
        let is_long = strategy.core().position.is_long();

        match fill.side {
            OrderSide::Buy => {
                if !was_long && is_long {
                    self.active_positions += 1;
                }
                self.total_position_value += fill.price * fill.volume;
            }
            OrderSide::Sell => {
                self.total_position_value =
                    (self.total_position_value - fill.price * fill.volume).max(0.0);
                if was_long && !is_long {
                    self.active_positions = self.active_positions.saturating_sub(1);
                }
            }
        }

        info!(
            "Fill processed: {symbol} {} @ {}",
            fill.side.as_str(),
            fill.price
        );
    }

    fn can_open_position(&self, symbol: &str) -> bool {
        if self.active_positions >= self.config.risk.max_concurrent_positions {
            return false;
        }
        let max_krw = self.config.max_position_krw(symbol);
        if max_krw <= 0.0 {
            return false;
        }
        if self.total_position_value + max_krw > self.config.risk.max_total_position_krw {
            return false;
        }
        true
    }

    /// Rebuild the strategy map against a new symbol set. Strategies for
    /// removed symbols are dropped only once flat; an open position is
    /// retained (the trader's auto-sell closes it) and pruned on a later
    /// update.
    pub fn update_symbols(&mut self, new_symbols: &[String]) {
        let current: Vec<String> = self.strategies.keys().cloned().collect();

        for symbol in &current {
            if new_symbols.contains(symbol) {
                continue;
            }
            let flat = self
                .strategies
                .get(symbol)
                .map(|s| !s.core().position.is_long())
                .unwrap_or(true);
            if flat {
                self.strategies.remove(symbol);
                info!("Strategy removed: {symbol}");
            } else {
                warn!("Strategy retained with open position: {symbol}");
            }
        }

        for symbol in new_symbols {
            if !self.strategies.contains_key(symbol) {
                self.add_strategy(symbol);
                if let Some(strategy) = self.strategies.get_mut(symbol) {
                    strategy.prepare(None);
                }
            }
        }
    }

    pub fn symbols(&self) -> Vec<String> {
        self.strategies.keys().cloned().collect()
    }

    pub fn has_strategy(&self, symbol: &str) -> bool {
        self.strategies.contains_key(symbol)
    }

    /// Sum of realized pnl across every strategy (daily-loss input).
    pub fn total_realized_pnl(&self) -> f64 {
        self.strategies.values().map(|s| s.core().total_pnl).sum()
    }

    pub fn portfolio_status(&self) -> serde_json::Value {
        let mut positions = serde_json::Map::new();
        let mut total_unrealized = 0.0;
        for (symbol, strategy) in &self.strategies {
            total_unrealized += strategy.core().position.unrealized_pnl;
            positions.insert(symbol.clone(), strategy.core().position_info());
        }
        json!({
            "active_positions": self.active_positions,
            "total_position_value": (self.total_position_value * 100.0).round() / 100.0,
            "total_unrealized_pnl": (total_unrealized * 100.0).round() / 100.0,
            "total_realized_pnl": (self.total_realized_pnl() * 100.0).round() / 100.0,
            "positions": positions,
            "limits": {
                "max_concurrent_positions": self.config.risk.max_concurrent_positions,
                "max_total_position_krw": self.config.risk.max_total_position_krw,
            },
        })
    }

    pub fn strategy_performance(&self) -> serde_json::Value {
        let total_trades: u64 = self.strategies.values().map(|s| s.core().total_trades).sum();
        let winning: u64 = self
            .strategies
            .values()
            .map(|s| s.core().winning_trades)
            .sum();
        let win_rate = if total_trades > 0 {
            winning as f64 / total_trades as f64 * 100.0
        } else {
            0.0
        };
        let per_symbol: serde_json::Map<String, serde_json::Value> = self
            .strategies
            .iter()
            .map(|(symbol, s)| (symbol.clone(), s.core().performance()))
            .collect();
        json!({
            "strategy": format!("{:?}", self.kind),
            "total_trades": total_trades,
            "winning_trades": winning,
            "win_rate": (win_rate * 100.0).round() / 100.0,
            "total_pnl": (self.total_realized_pnl() * 100.0).round() / 100.0,
            "symbol_performance": per_symbol,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn manager(symbols: &[&str]) -> StrategyManager {
        let config = Arc::new(Config::default());
        let symbols: Vec<String> = symbols.iter().map(|s| s.to_string()).collect();
        let mut m = StrategyManager::new(StrategyKind::Scalping, &symbols, config);
        m.prepare_all(None);
        m
    }

    fn fill(symbol: &str, side: OrderSide, price: f64, volume: f64) -> OrderFill {
        OrderFill {
            symbol: symbol.into(),
            side,
            price,
            volume,
            ts: Utc::now(),
            order_id: "uuid".into(),
        }
    }

    fn drive_to_buy(m: &mut StrategyManager, symbol: &str) -> Signal {
        // Descending prices make every tick past warmup the window minimum,
        // so the final tick always evaluates as an entry.
        let mut last = Signal::none();
        for price in [105.0, 104.0, 103.0, 102.0, 101.0, 100.0, 99.0] {
            if let Some(sig) = m.process_tick(symbol, &Tick::trade(symbol, price)) {
                last = sig;
            }
        }
        last
    }

    #[test]
    fn concurrent_position_cap_blocks_third_buy() {
        let mut m = manager(&["KRW-BTC", "KRW-ETH", "KRW-XRP"]);

        // Two open longs (cap is 2 in the default config).
        m.process_order_fill("KRW-BTC", &fill("KRW-BTC", OrderSide::Buy, 100.0, 1.0));
        m.process_order_fill("KRW-ETH", &fill("KRW-ETH", OrderSide::Buy, 100.0, 1.0));
        assert_eq!(m.active_positions, 2);

        let sig = drive_to_buy(&mut m, "KRW-XRP");
        assert_eq!(sig.action, SignalAction::None);
        assert_eq!(sig.reason.as_deref(), Some("portfolio limit"));
    }

    #[test]
    fn total_value_cap_blocks_oversized_portfolio() {
        let mut m = manager(&["KRW-BTC", "KRW-ETH"]);
        // 400k notional held; adding ETH's 150k cap would breach 500k.
        m.process_order_fill("KRW-BTC", &fill("KRW-BTC", OrderSide::Buy, 400_000.0, 1.0));
        m.active_positions = 0; // isolate the value check

        let sig = drive_to_buy(&mut m, "KRW-ETH");
        assert_eq!(sig.action, SignalAction::None);
        assert_eq!(sig.reason.as_deref(), Some("portfolio limit"));
    }

    #[test]
    fn buy_then_sell_round_trip_restores_counters() {
        let mut m = manager(&["KRW-BTC"]);
        m.process_order_fill("KRW-BTC", &fill("KRW-BTC", OrderSide::Buy, 100.0, 2.0));
        assert_eq!(m.active_positions, 1);
        assert!((m.total_position_value - 200.0).abs() < 1e-9);

        m.process_order_fill("KRW-BTC", &fill("KRW-BTC", OrderSide::Sell, 110.0, 2.0));
        assert_eq!(m.active_positions, 0);
        assert!(m.total_position_value.abs() < 1e-9);
        assert!((m.total_realized_pnl() - 20.0).abs() < 1e-9);
    }

    #[test]
    fn removed_symbol_with_open_position_is_retained() {
        let mut m = manager(&["KRW-BTC", "KRW-ETH"]);
        m.process_order_fill("KRW-BTC", &fill("KRW-BTC", OrderSide::Buy, 100.0, 1.0));

        m.update_symbols(&["KRW-ETH".to_string()]);
        assert!(m.has_strategy("KRW-BTC"), "open position must be retained");

        // The auto-sell fill closes it; the next update prunes it.
        m.process_order_fill("KRW-BTC", &fill("KRW-BTC", OrderSide::Sell, 101.0, 1.0));
        m.update_symbols(&["KRW-ETH".to_string()]);
        assert!(!m.has_strategy("KRW-BTC"));
    }

    #[test]
    fn update_symbols_adds_prepared_strategies() {
        let mut m = manager(&["KRW-BTC"]);
        m.update_symbols(&["KRW-BTC".to_string(), "KRW-SOL".to_string()]);
        assert!(m.has_strategy("KRW-SOL"));

        // The fresh strategy is usable immediately.
        let sig = m.process_tick("KRW-SOL", &Tick::trade("KRW-SOL", 100.0));
        assert!(sig.is_some());
    }

    #[test]
    fn unknown_symbol_tick_returns_none() {
        let mut m = manager(&["KRW-BTC"]);
        assert!(m.process_tick("KRW-DOGE", &Tick::trade("KRW-DOGE", 1.0)).is_none());
    }
}

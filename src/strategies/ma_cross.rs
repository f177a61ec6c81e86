use crate::config::StrategyParams;
use crate::models::order::OrderFill;
use crate::models::signal::Signal;
use crate::models::tick::{Tick, TickKind};
use crate::strategies::core::StrategyCore;
use crate::strategies::Strategy;
use serde_json::json;
use std::collections::VecDeque;

/// Moving-average crossover: enters on a golden cross, exits on
/// take-profit, stop-loss, or a death cross.
pub struct MaCrossStrategy {
    core: StrategyCore,
    fast_period: usize,
    slow_period: usize,
    take_profit_pct: f64,
    stop_loss_pct: f64,
    prices: VecDeque<f64>,
    fast_ma: f64,
    slow_ma: f64,
    prev_fast_ma: f64,
    prev_slow_ma: f64,
}

impl MaCrossStrategy {
    pub fn new(symbol: impl Into<String>, params: &StrategyParams) -> Self {
        let capacity = params.fast_period.max(params.slow_period);
        Self {
            core: StrategyCore::new(symbol),
            fast_period: params.fast_period,
            slow_period: params.slow_period,
            take_profit_pct: params.take_profit_pct,
            stop_loss_pct: params.stop_loss_pct,
            prices: VecDeque::with_capacity(capacity),
            fast_ma: 0.0,
            slow_ma: 0.0,
            prev_fast_ma: 0.0,
            prev_slow_ma: 0.0,
        }
    }

    fn push_price(&mut self, price: f64) {
        let capacity = self.fast_period.max(self.slow_period);
        if self.prices.len() >= capacity {
            self.prices.pop_front();
        }
        self.prices.push_back(price);
    }

    fn recompute_mas(&mut self) {
        if self.prices.len() >= self.fast_period {
            self.fast_ma = self
                .prices
                .iter()
                .rev()
                .take(self.fast_period)
                .sum::<f64>()
                / self.fast_period as f64;
        }
        if self.prices.len() >= self.slow_period {
            self.slow_ma = self
                .prices
                .iter()
                .rev()
                .take(self.slow_period)
                .sum::<f64>()
                / self.slow_period as f64;
        }
    }

    fn is_golden_cross(&self) -> bool {
        if self.prev_fast_ma == 0.0 || self.prev_slow_ma == 0.0 {
            return false;
        }
        self.prev_fast_ma <= self.prev_slow_ma && self.fast_ma > self.slow_ma
    }

    fn is_death_cross(&self) -> bool {
        if self.prev_fast_ma == 0.0 || self.prev_slow_ma == 0.0 {
            return false;
        }
        self.prev_fast_ma >= self.prev_slow_ma && self.fast_ma < self.slow_ma
    }

    fn exit_reason(&self, current_price: f64) -> Option<String> {
        let gain_pct = self.core.gain_pct(current_price)?;
        if gain_pct >= self.take_profit_pct {
            return Some(format!("take profit hit ({gain_pct:.2}%)"));
        }
        if gain_pct <= -self.stop_loss_pct {
            return Some(format!("stop loss hit ({gain_pct:.2}%)"));
        }
        if self.is_death_cross() {
            return Some(format!(
                "death cross exit (fast: {:.2}, slow: {:.2})",
                self.fast_ma, self.slow_ma
            ));
        }
        None
    }
}

impl Strategy for MaCrossStrategy {
    fn prepare(&mut self, historical: Option<&[f64]>) {
        self.prices.clear();
        if let Some(closes) = historical {
            for price in closes.iter().rev().take(self.slow_period).rev() {
                self.push_price(*price);
            }
            self.recompute_mas();
        }
        self.core.initialized = true;
    }

    fn on_tick(&mut self, tick: &Tick) -> Signal {
        if !self.core.initialized || tick.kind == TickKind::Depth {
            return Signal::none();
        }

        let price = tick.trade_price;
        self.core.pre_tick(price);

        self.prev_fast_ma = self.fast_ma;
        self.prev_slow_ma = self.slow_ma;
        self.push_price(price);
        self.recompute_mas();

        if self.prices.len() < self.slow_period {
            return Signal::none();
        }

        if !self.core.position.is_long() {
            if self.is_golden_cross() {
                return Signal::buy(
                    price,
                    format!(
                        "golden cross (fast: {:.2}, slow: {:.2})",
                        self.fast_ma, self.slow_ma
                    ),
                );
            }
        } else if let Some(reason) = self.exit_reason(price) {
            return Signal::sell(price, None, reason);
        }

        Signal::none()
    }

    fn on_order_fill(&mut self, fill: &OrderFill) {
        self.core.apply_fill(fill);
    }

    fn core(&self) -> &StrategyCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut StrategyCore {
        &mut self.core
    }

    fn info(&self) -> serde_json::Value {
        json!({
            "strategy_name": "MaCrossStrategy",
            "fast_period": self.fast_period,
            "slow_period": self.slow_period,
            "take_profit_pct": self.take_profit_pct,
            "stop_loss_pct": self.stop_loss_pct,
            "fast_ma": (self.fast_ma * 100.0).round() / 100.0,
            "slow_ma": (self.slow_ma * 100.0).round() / 100.0,
            "price_buffer_size": self.prices.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::order::OrderSide;
    use crate::models::signal::SignalAction;
    use chrono::Utc;

    fn strategy(fast: usize, slow: usize) -> MaCrossStrategy {
        let params = StrategyParams {
            fast_period: fast,
            slow_period: slow,
            take_profit_pct: 1.0,
            stop_loss_pct: 2.0,
            ..StrategyParams::default()
        };
        let mut s = MaCrossStrategy::new("KRW-BTC", &params);
        s.prepare(None);
        s
    }

    #[test]
    fn golden_cross_fires_once_prices_turn_up() {
        let mut s = strategy(3, 5);
        let prices = [10.0, 10.0, 10.0, 10.0, 10.0, 10.0, 10.0, 11.0, 12.0, 13.0];
        let mut buy_index = None;
        for (i, price) in prices.iter().enumerate() {
            let sig = s.on_tick(&Tick::trade("KRW-BTC", *price));
            if sig.action == SignalAction::Buy {
                buy_index = Some(i);
                break;
            }
        }
        // Flat through index 6, first fast>slow cross lands on the 11.0 tick.
        assert_eq!(buy_index, Some(7));
    }

    #[test]
    fn no_signal_on_flat_series() {
        let mut s = strategy(3, 5);
        for _ in 0..20 {
            let sig = s.on_tick(&Tick::trade("KRW-BTC", 10.0));
            assert_eq!(sig.action, SignalAction::None);
        }
    }

    #[test]
    fn death_cross_exits_a_long() {
        let mut s = strategy(2, 3);
        // Build an uptrend and take the entry.
        for price in [10.0, 10.0, 10.0, 11.0, 12.0] {
            s.on_tick(&Tick::trade("KRW-BTC", price));
        }
        s.on_order_fill(&OrderFill {
            symbol: "KRW-BTC".into(),
            side: OrderSide::Buy,
            price: 12.0,
            volume: 1.0,
            ts: Utc::now(),
            order_id: "uuid".into(),
        });

        // A mild turn down crosses fast under slow well before the 2%
        // stop loss is touched.
        let mut last = Signal::none();
        for price in [12.0, 11.9, 11.8, 11.7, 11.6] {
            last = s.on_tick(&Tick::trade("KRW-BTC", price));
            if last.action == SignalAction::Sell {
                break;
            }
        }
        assert_eq!(last.action, SignalAction::Sell);
        assert!(last.reason.unwrap().contains("death cross"));
    }

    #[test]
    fn take_profit_exits_before_any_cross() {
        let mut s = strategy(3, 5);
        for price in [10.0, 10.0, 10.0, 10.0, 10.0] {
            s.on_tick(&Tick::trade("KRW-BTC", price));
        }
        s.on_order_fill(&OrderFill {
            symbol: "KRW-BTC".into(),
            side: OrderSide::Buy,
            price: 10.0,
            volume: 1.0,
            ts: Utc::now(),
            order_id: "uuid".into(),
        });
        let sig = s.on_tick(&Tick::trade("KRW-BTC", 10.2));
        assert_eq!(sig.action, SignalAction::Sell);
        assert!(sig.reason.unwrap().contains("take profit"));
    }
}

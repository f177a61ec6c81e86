use crate::config::StrategyParams;
use crate::models::order::OrderFill;
use crate::models::signal::Signal;
use crate::models::tick::{Tick, TickKind};
use crate::strategies::core::StrategyCore;
use crate::strategies::Strategy;
use serde_json::json;
use std::collections::VecDeque;

/// RSI mean-reversion: enters when the RSI turns up out of the oversold
/// band, exits on take-profit, stop-loss, or overbought.
pub struct RsiStrategy {
    core: StrategyCore,
    rsi_period: usize,
    oversold_level: f64,
    overbought_level: f64,
    take_profit_pct: f64,
    stop_loss_pct: f64,
    prices: VecDeque<f64>,
    gains: VecDeque<f64>,
    losses: VecDeque<f64>,
    current_rsi: f64,
    prev_rsi: f64,
    avg_gain: f64,
    avg_loss: f64,
}

impl RsiStrategy {
    pub fn new(symbol: impl Into<String>, params: &StrategyParams) -> Self {
        Self {
            core: StrategyCore::new(symbol),
            rsi_period: params.rsi_period,
            oversold_level: params.oversold_level,
            overbought_level: params.overbought_level,
            take_profit_pct: params.take_profit_pct,
            stop_loss_pct: params.stop_loss_pct,
            prices: VecDeque::with_capacity(params.rsi_period + 1),
            gains: VecDeque::with_capacity(params.rsi_period),
            losses: VecDeque::with_capacity(params.rsi_period),
            current_rsi: 50.0,
            prev_rsi: 50.0,
            avg_gain: 0.0,
            avg_loss: 0.0,
        }
    }

    fn add_price(&mut self, price: f64) {
        if let Some(last) = self.prices.back() {
            let delta = price - last;
            if self.gains.len() >= self.rsi_period {
                self.gains.pop_front();
                self.losses.pop_front();
            }
            if delta > 0.0 {
                self.gains.push_back(delta);
                self.losses.push_back(0.0);
            } else {
                self.gains.push_back(0.0);
                self.losses.push_back(-delta);
            }
        }
        if self.prices.len() > self.rsi_period {
            self.prices.pop_front();
        }
        self.prices.push_back(price);
    }

    fn recompute_rsi(&mut self) {
        if self.gains.len() < self.rsi_period {
            return;
        }

        if self.avg_gain == 0.0 && self.avg_loss == 0.0 {
            // Seed with simple averages, then switch to Wilder smoothing.
            self.avg_gain = self.gains.iter().sum::<f64>() / self.rsi_period as f64;
            self.avg_loss = self.losses.iter().sum::<f64>() / self.rsi_period as f64;
        } else {
            let latest_gain = *self.gains.back().unwrap_or(&0.0);
            let latest_loss = *self.losses.back().unwrap_or(&0.0);
            let n = self.rsi_period as f64;
            self.avg_gain = (self.avg_gain * (n - 1.0) + latest_gain) / n;
            self.avg_loss = (self.avg_loss * (n - 1.0) + latest_loss) / n;
        }

        if self.avg_loss == 0.0 {
            self.current_rsi = 100.0;
        } else {
            let rs = self.avg_gain / self.avg_loss;
            self.current_rsi = 100.0 - 100.0 / (1.0 + rs);
        }
    }

    fn is_oversold_reversal(&self) -> bool {
        self.prev_rsi <= self.oversold_level
            && self.current_rsi > self.prev_rsi
            && self.current_rsi > self.oversold_level
    }

    fn exit_reason(&self, current_price: f64) -> Option<String> {
        let gain_pct = self.core.gain_pct(current_price)?;
        if gain_pct >= self.take_profit_pct {
            return Some(format!("take profit hit ({gain_pct:.2}%)"));
        }
        if gain_pct <= -self.stop_loss_pct {
            return Some(format!("stop loss hit ({gain_pct:.2}%)"));
        }
        if self.current_rsi >= self.overbought_level {
            return Some(format!("overbought exit (RSI: {:.2})", self.current_rsi));
        }
        None
    }
}

impl Strategy for RsiStrategy {
    fn prepare(&mut self, historical: Option<&[f64]>) {
        self.prices.clear();
        self.gains.clear();
        self.losses.clear();
        self.avg_gain = 0.0;
        self.avg_loss = 0.0;
        if let Some(closes) = historical {
            for price in closes.iter().rev().take(self.rsi_period + 10).rev() {
                self.add_price(*price);
                self.recompute_rsi();
            }
        }
        self.core.initialized = true;
    }

    fn on_tick(&mut self, tick: &Tick) -> Signal {
        if !self.core.initialized || tick.kind == TickKind::Depth {
            return Signal::none();
        }

        let price = tick.trade_price;
        self.core.pre_tick(price);

        self.prev_rsi = self.current_rsi;
        self.add_price(price);
        self.recompute_rsi();

        if self.gains.len() < self.rsi_period {
            return Signal::none();
        }

        if !self.core.position.is_long() {
            if self.is_oversold_reversal() {
                return Signal::buy(
                    price,
                    format!("oversold reversal (RSI: {:.2})", self.current_rsi),
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
            "strategy_name": "RsiStrategy",
            "rsi_period": self.rsi_period,
            "oversold_level": self.oversold_level,
            "overbought_level": self.overbought_level,
            "take_profit_pct": self.take_profit_pct,
            "stop_loss_pct": self.stop_loss_pct,
            "current_rsi": (self.current_rsi * 100.0).round() / 100.0,
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

    fn strategy() -> RsiStrategy {
        let params = StrategyParams {
            rsi_period: 3,
            oversold_level: 30.0,
            overbought_level: 70.0,
            take_profit_pct: 5.0,
            stop_loss_pct: 10.0,
            ..StrategyParams::default()
        };
        let mut s = RsiStrategy::new("KRW-BTC", &params);
        s.prepare(None);
        s
    }

    #[test]
    fn oversold_reversal_triggers_entry() {
        let mut s = strategy();
        // Steady decline pins the RSI near zero...
        for price in [100.0, 99.0, 98.0, 97.0, 96.0, 95.0] {
            let sig = s.on_tick(&Tick::trade("KRW-BTC", price));
            assert_eq!(sig.action, SignalAction::None);
        }
        assert!(s.current_rsi < 30.0);
        // ...until a bounce lifts it back over the oversold line.
        let mut entered = false;
        for price in [96.5, 98.0, 99.5] {
            let sig = s.on_tick(&Tick::trade("KRW-BTC", price));
            if sig.action == SignalAction::Buy {
                assert!(sig.reason.unwrap().contains("oversold reversal"));
                entered = true;
                break;
            }
        }
        assert!(entered, "bounce out of oversold should enter");
    }

    #[test]
    fn overbought_exits_a_long() {
        let mut s = strategy();
        for price in [100.0, 100.5, 100.2, 100.7, 100.3] {
            s.on_tick(&Tick::trade("KRW-BTC", price));
        }
        s.on_order_fill(&OrderFill {
            symbol: "KRW-BTC".into(),
            side: OrderSide::Buy,
            price: 100.3,
            volume: 1.0,
            ts: Utc::now(),
            order_id: "uuid".into(),
        });

        // A strong run-up drives the RSI over 70 well before +5% profit.
        let mut exited = false;
        for price in [101.0, 101.5, 102.0, 102.5, 103.0] {
            let sig = s.on_tick(&Tick::trade("KRW-BTC", price));
            if sig.action == SignalAction::Sell {
                assert!(sig.reason.unwrap().contains("overbought"));
                exited = true;
                break;
            }
        }
        assert!(exited, "overbought RSI should exit");
    }

    #[test]
    fn stop_loss_overrides_rsi_state() {
        let mut s = strategy();
        for price in [100.0, 100.5, 100.2, 100.7] {
            s.on_tick(&Tick::trade("KRW-BTC", price));
        }
        s.on_order_fill(&OrderFill {
            symbol: "KRW-BTC".into(),
            side: OrderSide::Buy,
            price: 100.0,
            volume: 1.0,
            ts: Utc::now(),
            order_id: "uuid".into(),
        });
        let sig = s.on_tick(&Tick::trade("KRW-BTC", 89.0));
        assert_eq!(sig.action, SignalAction::Sell);
        assert!(sig.reason.unwrap().contains("stop loss"));
    }

    #[test]
    fn no_entry_without_reversal() {
        let mut s = strategy();
        // Monotonic decline keeps prev and current RSI both oversold and
        // falling; the reversal condition never holds.
        for price in (0..15).map(|i| 100.0 - i as f64) {
            let sig = s.on_tick(&Tick::trade("KRW-BTC", price));
            assert_eq!(sig.action, SignalAction::None);
        }
    }
}

use crate::config::StrategyParams;
use crate::models::order::{OrderFill, OrderSide};
use crate::models::signal::Signal;
use crate::models::tick::{Tick, TickKind};
use crate::strategies::core::StrategyCore;
use crate::strategies::trailing::TrailingExit;
use crate::strategies::Strategy;
use serde_json::json;
use std::collections::VecDeque;

/// Price-reversal scalper with a composed trailing-stop / partial-close
/// exit stack.
///
/// While long, exits are evaluated in order: trailing stop, partial close,
/// then the base take-profit / stop-loss. When either optional exit is
/// enabled the base thresholds are widened (take profit x1.5) and
/// tightened (stop loss x0.8) so the staged exits get room to work.
pub struct AdvancedScalpingStrategy {
    core: StrategyCore,
    window: usize,
    take_profit_pct: f64,
    stop_loss_pct: f64,
    prices: VecDeque<f64>,
    trailing: TrailingExit,
    best_bid: Option<f64>,
    best_ask: Option<f64>,
}

impl AdvancedScalpingStrategy {
    pub fn new(symbol: impl Into<String>, params: &StrategyParams) -> Self {
        Self {
            core: StrategyCore::new(symbol),
            window: params.window,
            take_profit_pct: params.take_profit_pct,
            stop_loss_pct: params.stop_loss_pct,
            prices: VecDeque::with_capacity(params.window),
            trailing: TrailingExit::from_params(params),
            best_bid: None,
            best_ask: None,
        }
    }

    fn push_price(&mut self, price: f64) {
        if self.prices.len() >= self.window {
            self.prices.pop_front();
        }
        self.prices.push_back(price);
    }

    fn should_enter_long(&self, current_price: f64) -> bool {
        if self.prices.len() < self.window {
            return false;
        }
        let min = self.prices.iter().copied().fold(f64::INFINITY, f64::min);
        current_price <= min
    }

    fn base_exit_reason(&self, current_price: f64) -> Option<String> {
        let gain_pct = self.core.gain_pct(current_price)?;

        let mut take_profit = self.take_profit_pct;
        let mut stop_loss = self.stop_loss_pct;
        if self.trailing.any_enabled() {
            take_profit *= 1.5;
            stop_loss *= 0.8;
        }

        if gain_pct >= take_profit {
            Some(format!("take profit hit ({gain_pct:.2}%)"))
        } else if gain_pct <= -stop_loss {
            Some(format!("stop loss hit ({gain_pct:.2}%)"))
        } else {
            None
        }
    }
}

impl Strategy for AdvancedScalpingStrategy {
    fn prepare(&mut self, historical: Option<&[f64]>) {
        self.prices.clear();
        if let Some(closes) = historical {
            for price in closes.iter().rev().take(self.window).rev() {
                self.prices.push_back(*price);
            }
        }
        self.core.initialized = true;
    }

    fn on_tick(&mut self, tick: &Tick) -> Signal {
        if !self.core.initialized {
            return Signal::none();
        }

        if tick.kind == TickKind::Depth {
            self.best_bid = tick.best_bid;
            self.best_ask = tick.best_ask;
            return Signal::none();
        }

        let price = tick.trade_price;
        self.core.pre_tick(price);
        self.push_price(price);

        if !self.core.position.is_long() {
            if self.should_enter_long(price) {
                return Signal::buy(price, "price reversal entry");
            }
            return Signal::none();
        }

        let entry_price = self.core.position.entry_price;

        if let Some(signal) = self.trailing.update_trailing(entry_price, price) {
            return signal;
        }
        if let Some(signal) = self.trailing.check_partial_close(entry_price, price) {
            return signal;
        }
        if let Some(reason) = self.base_exit_reason(price) {
            return Signal::sell(price, Some(self.trailing.remaining_volume()), reason);
        }

        Signal::none()
    }

    fn on_order_fill(&mut self, fill: &OrderFill) {
        self.core.apply_fill(fill);
        match fill.side {
            OrderSide::Buy => self.trailing.arm(fill.price, fill.volume),
            OrderSide::Sell => {
                if !self.core.position.is_long() {
                    self.trailing.disarm();
                }
            }
        }
    }

    fn core(&self) -> &StrategyCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut StrategyCore {
        &mut self.core
    }

    fn info(&self) -> serde_json::Value {
        let mut info = json!({
            "strategy_name": "AdvancedScalpingStrategy",
            "window": self.window,
            "take_profit_pct": self.take_profit_pct,
            "stop_loss_pct": self.stop_loss_pct,
            "price_buffer_size": self.prices.len(),
        });
        let trail = self.trailing.info();
        if let (Some(obj), Some(trail)) = (info.as_object_mut(), trail.as_object()) {
            for (k, v) in trail {
                obj.insert(k.clone(), v.clone());
            }
        }
        info
    }
}

use crate::config::StrategyParams;
use crate::models::order::OrderFill;
use crate::models::signal::Signal;
use crate::models::tick::{Tick, TickKind};
use crate::strategies::core::StrategyCore;
use crate::strategies::Strategy;
use serde_json::json;
use std::collections::VecDeque;

/// Price-reversal scalper: enters long when the current price touches the
/// minimum of the trailing window, exits on take-profit or stop-loss.
/// Trading is suppressed while the orderbook spread exceeds the allowance.
pub struct ScalpingStrategy {
    core: StrategyCore,
    window: usize,
    take_profit_pct: f64,
    stop_loss_pct: f64,
    max_spread: f64,
    prices: VecDeque<f64>,
    best_bid: Option<f64>,
    best_ask: Option<f64>,
}

impl ScalpingStrategy {
    pub fn new(symbol: impl Into<String>, params: &StrategyParams) -> Self {
        Self {
            core: StrategyCore::new(symbol),
            window: params.window,
            take_profit_pct: params.take_profit_pct,
            stop_loss_pct: params.stop_loss_pct,
            max_spread: params.max_allowed_spread,
            prices: VecDeque::with_capacity(params.window),
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

    fn exit_reason(&self, current_price: f64) -> Option<String> {
        let gain_pct = self.core.gain_pct(current_price)?;
        if gain_pct >= self.take_profit_pct {
            Some(format!("take profit hit ({gain_pct:.2}%)"))
        } else if gain_pct <= -self.stop_loss_pct {
            Some(format!("stop loss hit ({gain_pct:.2}%)"))
        } else {
            None
        }
    }

    fn spread_too_wide(&self) -> bool {
        match (self.best_bid, self.best_ask) {
            (Some(bid), Some(ask)) => ask - bid > self.max_spread,
            _ => false,
        }
    }
}

impl Strategy for ScalpingStrategy {
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

        // Depth messages only refresh the spread filter.
        if tick.kind == TickKind::Depth {
            self.best_bid = tick.best_bid;
            self.best_ask = tick.best_ask;
            return Signal::none();
        }

        if self.spread_too_wide() {
            return Signal::none();
        }

        let price = tick.trade_price;
        self.core.pre_tick(price);
        self.push_price(price);

        if !self.core.position.is_long() {
            if self.should_enter_long(price) {
                return Signal::buy(price, "price reversal entry");
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
            "strategy_name": "ScalpingStrategy",
            "window": self.window,
            "take_profit_pct": self.take_profit_pct,
            "stop_loss_pct": self.stop_loss_pct,
            "max_allowed_spread": self.max_spread,
            "price_buffer_size": self.prices.len(),
        })
    }
}

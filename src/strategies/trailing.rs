use crate::config::StrategyParams;
use crate::models::position::PartialSlice;
use crate::models::signal::Signal;
use chrono::Utc;
use serde_json::json;

/// Trailing-stop and staged partial-close exits, composed into strategies
/// that opt in.
///
/// Armed on entry, disarmed when the position flattens. While armed the
/// trailing stop only ever ratchets upward, and partial-close levels fire
/// strictly left to right.
#[derive(Debug, Clone)]
pub struct TrailingExit {
    pub trailing_enabled: bool,
    pub trailing_stop_pct: f64,
    pub activation_pct: f64,
    pub partial_enabled: bool,
    pub levels: Vec<f64>,
    pub ratios: Vec<f64>,

    highest_price: f64,
    stop_price: f64,
    active: bool,
    slices: Vec<PartialSlice>,
    next_level_idx: usize,
    remaining_volume: f64,
}

impl TrailingExit {
    pub fn from_params(params: &StrategyParams) -> Self {
        Self {
            trailing_enabled: params.trailing_stop_enabled,
            trailing_stop_pct: params.trailing_stop_pct,
            activation_pct: params.trailing_activation_pct,
            partial_enabled: params.partial_close_enabled,
            levels: params.partial_close_levels.clone(),
            ratios: params.partial_close_ratios.clone(),
            highest_price: 0.0,
            stop_price: 0.0,
            active: false,
            slices: Vec::new(),
            next_level_idx: 0,
            remaining_volume: 0.0,
        }
    }

    pub fn any_enabled(&self) -> bool {
        self.trailing_enabled || self.partial_enabled
    }

    pub fn remaining_volume(&self) -> f64 {
        self.remaining_volume
    }

    pub fn trailing_active(&self) -> bool {
        self.active
    }

    pub fn stop_price(&self) -> f64 {
        self.stop_price
    }

    /// Begin tracking a freshly opened position.
    pub fn arm(&mut self, entry_price: f64, volume: f64) {
        self.highest_price = entry_price;
        self.stop_price = 0.0;
        self.active = false;
        self.slices.clear();
        self.next_level_idx = 0;

        if self.partial_enabled {
            for ratio in &self.ratios {
                self.slices.push(PartialSlice::open(volume * ratio, entry_price));
            }
        }
        self.remaining_volume = volume;
    }

    pub fn disarm(&mut self) {
        self.highest_price = 0.0;
        self.stop_price = 0.0;
        self.active = false;
        self.slices.clear();
        self.next_level_idx = 0;
        self.remaining_volume = 0.0;
    }

    /// Ratchet the stop under the observed high and fire when the price
    /// falls through it.
    pub fn update_trailing(&mut self, entry_price: f64, current_price: f64) -> Option<Signal> {
        if !self.trailing_enabled || entry_price <= 0.0 {
            return None;
        }

        if current_price > self.highest_price {
            self.highest_price = current_price;
        }

        let gain_pct = (current_price - entry_price) / entry_price * 100.0;
        if !self.active && gain_pct >= self.activation_pct {
            self.active = true;
            self.stop_price = self.highest_price * (1.0 - self.trailing_stop_pct / 100.0);
        }

        if self.active {
            let new_stop = self.highest_price * (1.0 - self.trailing_stop_pct / 100.0);
            if new_stop > self.stop_price {
                self.stop_price = new_stop;
            }

            if current_price <= self.stop_price {
                return Some(Signal::sell(
                    current_price,
                    Some(self.remaining_volume),
                    format!(
                        "trailing stop hit (high: {:.2}, stop: {:.2})",
                        self.highest_price, self.stop_price
                    ),
                ));
            }
        }

        None
    }

    /// Close the next slice when its profit level is reached. At most one
    /// slice fires per tick; levels are consumed in order.
    pub fn check_partial_close(&mut self, entry_price: f64, current_price: f64) -> Option<Signal> {
        if !self.partial_enabled || entry_price <= 0.0 {
            return None;
        }
        if self.next_level_idx >= self.levels.len() {
            return None;
        }

        let gain_pct = (current_price - entry_price) / entry_price * 100.0;
        if gain_pct < self.levels[self.next_level_idx] {
            return None;
        }

        let slice = self.slices.get_mut(self.next_level_idx)?;
        if slice.closed {
            return None;
        }
        slice.closed = true;
        slice.close_price = current_price;
        slice.close_ts = Some(Utc::now());

        self.remaining_volume -= slice.volume;
        let volume = slice.volume;
        self.next_level_idx += 1;

        Some(Signal::sell(
            current_price,
            Some(volume),
            format!(
                "partial close {}/{} ({:.2}%)",
                self.next_level_idx,
                self.levels.len(),
                gain_pct
            ),
        ))
    }

    pub fn info(&self) -> serde_json::Value {
        let closed = self.slices.iter().filter(|s| s.closed).count();
        json!({
            "trailing_stop_enabled": self.trailing_enabled,
            "trailing_active": self.active,
            "highest_price": self.highest_price,
            "trailing_stop_price": self.stop_price,
            "partial_close_enabled": self.partial_enabled,
            "total_slices": self.slices.len(),
            "closed_slices": closed,
            "remaining_volume": self.remaining_volume,
            "next_level": self.levels.get(self.next_level_idx),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::signal::SignalAction;

    fn trailing_only() -> TrailingExit {
        TrailingExit::from_params(&StrategyParams {
            trailing_stop_enabled: true,
            trailing_stop_pct: 1.0,
            trailing_activation_pct: 0.5,
            partial_close_enabled: false,
            ..StrategyParams::default()
        })
    }

    fn partial_only() -> TrailingExit {
        TrailingExit::from_params(&StrategyParams {
            trailing_stop_enabled: false,
            partial_close_enabled: true,
            partial_close_levels: vec![0.5, 1.0, 1.5],
            partial_close_ratios: vec![0.3, 0.3, 0.4],
            ..StrategyParams::default()
        })
    }

    #[test]
    fn trailing_activates_ratchets_and_fires() {
        let mut t = trailing_only();
        t.arm(100.0, 1.0);

        // Below activation: nothing.
        assert!(t.update_trailing(100.0, 100.4).is_none());
        assert!(!t.trailing_active());

        // Activation at +0.6%: stop = 100.6 * 0.99.
        assert!(t.update_trailing(100.0, 100.6).is_none());
        assert!(t.trailing_active());
        assert!((t.stop_price() - 99.594).abs() < 1e-9);

        // New high ratchets the stop.
        assert!(t.update_trailing(100.0, 101.0).is_none());
        assert!((t.stop_price() - 99.99).abs() < 1e-9);

        // Fall through the stop sells the remaining volume.
        let sig = t.update_trailing(100.0, 99.5).expect("stop should fire");
        assert_eq!(sig.action, SignalAction::Sell);
        assert_eq!(sig.volume, Some(1.0));
        assert!(sig.reason.unwrap().contains("trailing"));
    }

    #[test]
    fn trailing_stop_is_monotone() {
        let mut t = trailing_only();
        t.arm(100.0, 1.0);
        t.update_trailing(100.0, 101.0);
        let stop_at_high = t.stop_price();
        // Price drifts down but stays above the stop; it must not loosen.
        t.update_trailing(100.0, 100.5);
        assert_eq!(t.stop_price(), stop_at_high);
    }

    #[test]
    fn partial_close_fires_in_level_order() {
        let mut t = partial_only();
        t.arm(200.0, 10.0);

        let s1 = t.check_partial_close(200.0, 201.0).expect("level 1");
        assert!((s1.volume.unwrap() - 3.0).abs() < 1e-9);
        assert!((t.remaining_volume() - 7.0).abs() < 1e-9);

        let s2 = t.check_partial_close(200.0, 202.0).expect("level 2");
        assert!((s2.volume.unwrap() - 3.0).abs() < 1e-9);

        let s3 = t.check_partial_close(200.0, 203.0).expect("level 3");
        assert!((s3.volume.unwrap() - 4.0).abs() < 1e-9);
        assert!(t.remaining_volume().abs() < 1e-9);

        // All levels consumed.
        assert!(t.check_partial_close(200.0, 210.0).is_none());
    }

    #[test]
    fn partial_volume_conservation_holds_each_step() {
        let mut t = partial_only();
        t.arm(200.0, 10.0);
        let mut closed = 0.0;
        for price in [201.0, 202.0, 203.0] {
            if let Some(sig) = t.check_partial_close(200.0, price) {
                closed += sig.volume.unwrap();
            }
            assert!((closed + t.remaining_volume() - 10.0).abs() < 1e-9);
        }
    }

    #[test]
    fn level_below_target_does_not_fire() {
        let mut t = partial_only();
        t.arm(200.0, 10.0);
        assert!(t.check_partial_close(200.0, 200.5).is_none());
        assert!((t.remaining_volume() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn zero_entry_price_suppresses_exits() {
        let mut t = trailing_only();
        t.arm(0.0, 1.0);
        assert!(t.update_trailing(0.0, 100.0).is_none());
        let mut p = partial_only();
        p.arm(0.0, 1.0);
        assert!(p.check_partial_close(0.0, 100.0).is_none());
    }

    #[test]
    fn disarm_clears_tracking() {
        let mut t = partial_only();
        t.arm(200.0, 10.0);
        t.check_partial_close(200.0, 201.0);
        t.disarm();
        assert_eq!(t.remaining_volume(), 0.0);
        assert!(t.check_partial_close(200.0, 210.0).is_none());
    }
}

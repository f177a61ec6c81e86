use crate::config::RiskConfig;
use chrono::{NaiveDate, Utc};

/// Exchange minimum order notional in KRW.
pub const MIN_ORDER_KRW: f64 = 5_000.0;

/// Per-symbol pre-flight gate consulted before every buy submission.
///
/// The trader recomputes the inputs fresh on each evaluation: cash balance,
/// coin-to-total-asset ratio, realized daily pnl across all strategies, and
/// the open position count.
pub struct RiskManager {
    max_position_krw: f64,
    config: RiskConfig,
    last_reset_date: Option<NaiveDate>,
}

impl RiskManager {
    pub fn new(max_position_krw: f64, config: RiskConfig) -> Self {
        Self {
            max_position_krw,
            config,
            last_reset_date: None,
        }
    }

    pub fn allow_order(
        &mut self,
        krw_balance: f64,
        coin_ratio: f64,
        realized_daily_pnl: f64,
        active_positions: usize,
    ) -> bool {
        // Day-rollover hook for future internal counters.
        let today = Utc::now().date_naive();
        if self.last_reset_date != Some(today) {
            self.last_reset_date = Some(today);
        }

        if realized_daily_pnl <= -self.config.daily_loss_limit_krw {
            return false;
        }
        if coin_ratio >= self.config.max_coin_ratio {
            return false;
        }
        if active_positions >= self.config.max_concurrent_positions {
            return false;
        }
        if krw_balance < MIN_ORDER_KRW {
            return false;
        }
        // Below a tenth of the symbol cap the order is too small to bother.
        if krw_balance < self.max_position_krw * 0.1 {
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RiskConfig {
        RiskConfig {
            max_position_krw: Default::default(),
            default_max_position_krw: 100_000.0,
            max_total_position_krw: 500_000.0,
            max_concurrent_positions: 2,
            daily_loss_limit_krw: 50_000.0,
            max_coin_ratio: 0.7,
        }
    }

    #[test]
    fn healthy_inputs_pass() {
        let mut rm = RiskManager::new(100_000.0, config());
        assert!(rm.allow_order(200_000.0, 0.1, 0.0, 0));
    }

    #[test]
    fn daily_loss_limit_blocks() {
        let mut rm = RiskManager::new(100_000.0, config());
        assert!(!rm.allow_order(200_000.0, 0.1, -50_000.0, 0));
        assert!(rm.allow_order(200_000.0, 0.1, -49_999.0, 0));
    }

    #[test]
    fn coin_ratio_ceiling_blocks() {
        let mut rm = RiskManager::new(100_000.0, config());
        assert!(!rm.allow_order(200_000.0, 0.7, 0.0, 0));
        assert!(rm.allow_order(200_000.0, 0.69, 0.0, 0));
    }

    #[test]
    fn position_count_cap_blocks() {
        let mut rm = RiskManager::new(100_000.0, config());
        assert!(!rm.allow_order(200_000.0, 0.1, 0.0, 2));
        assert!(rm.allow_order(200_000.0, 0.1, 0.0, 1));
    }

    #[test]
    fn exchange_minimum_blocks() {
        let mut rm = RiskManager::new(10_000.0, config());
        assert!(!rm.allow_order(4_999.0, 0.1, 0.0, 0));
    }

    #[test]
    fn dust_balance_relative_to_cap_blocks() {
        let mut rm = RiskManager::new(100_000.0, config());
        // 8k is above the exchange floor but under 10% of the 100k cap.
        assert!(!rm.allow_order(8_000.0, 0.1, 0.0, 0));
        assert!(rm.allow_order(10_000.0, 0.1, 0.0, 0));
    }
}

pub mod advanced_scalping;
pub mod core;
pub mod ma_cross;
pub mod manager;
pub mod rsi;
pub mod scalping;
pub mod trailing;

use crate::models::order::OrderFill;
use crate::models::signal::Signal;
use crate::models::tick::Tick;
use crate::strategies::core::StrategyCore;

/// A per-symbol trading strategy.
///
/// Implementations keep their own indicator buffers and share position
/// bookkeeping through [`StrategyCore`]. `on_tick` must be cheap; it runs
/// on every unified market event for the symbol.
pub trait Strategy: Send + Sync {
    /// Initialise indicators, optionally from historical closes.
    fn prepare(&mut self, historical: Option<&[f64]>);

    /// Evaluate one tick and return the resulting signal.
    fn on_tick(&mut self, tick: &Tick) -> Signal;

    /// Apply a confirmed execution to the position state.
    fn on_order_fill(&mut self, fill: &OrderFill);

    fn core(&self) -> &StrategyCore;

    fn core_mut(&mut self) -> &mut StrategyCore;

    /// Parameter/state snapshot for status reports.
    fn info(&self) -> serde_json::Value;
}

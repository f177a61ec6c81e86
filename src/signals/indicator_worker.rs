use crate::config::SignalConfig;
use crate::models::tick::Tick;
use crate::signals::indicators::{ema, rsi};
use dashmap::DashMap;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Consumes the unified tick stream and maintains the shared buyable set.
///
/// Per symbol it keeps a bounded price buffer and evaluates one buy-signal
/// function (EMA fast over slow, RSI oversold). Updates to the shared map
/// are edge-triggered: a key is inserted on the transition into buyable and
/// removed on the transition out, so the map stays quiet between changes.
pub struct IndicatorWorker {
    config: SignalConfig,
    buyable: Arc<DashMap<String, ()>>,
    buffers: HashMap<String, VecDeque<f64>>,
    prev_buyable: HashMap<String, bool>,
}

impl IndicatorWorker {
    /// Buffer length per symbol; oldest prices are dropped beyond this.
    pub const MAX_TICKS: usize = 1000;

    pub fn new(config: SignalConfig, buyable: Arc<DashMap<String, ()>>) -> Self {
        Self {
            config,
            buyable,
            buffers: HashMap::new(),
            prev_buyable: HashMap::new(),
        }
    }

    pub fn start(
        mut self,
        mut tick_rx: broadcast::Receiver<Tick>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        tokio::spawn(async move {
            info!(
                "IndicatorWorker started (ema_fast={}, ema_slow={}, rsi_period={}, rsi_oversold={})",
                self.config.ema_fast,
                self.config.ema_slow,
                self.config.rsi_period,
                self.config.rsi_oversold
            );
            loop {
                tokio::select! {
                    tick = tick_rx.recv() => {
                        match tick {
                            Ok(tick) => self.on_tick(&tick),
                            Err(broadcast::error::RecvError::Lagged(n)) => {
                                warn!("Indicator tick stream lagged by {n} messages");
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                    _ = shutdown.recv() => break,
                }
            }
            info!("IndicatorWorker stopped");
        });
    }

    pub fn on_tick(&mut self, tick: &Tick) {
        if tick.symbol.is_empty() {
            return;
        }

        let buffer = self
            .buffers
            .entry(tick.symbol.clone())
            .or_insert_with(|| VecDeque::with_capacity(Self::MAX_TICKS));
        if buffer.len() >= Self::MAX_TICKS {
            buffer.pop_front();
        }
        buffer.push_back(tick.trade_price);

        let warmup = self.config.ema_slow.max(self.config.rsi_period) + 5;
        if buffer.len() < warmup {
            return;
        }

        let prices: Vec<f64> = buffer.iter().copied().collect();
        let buyable = match self.is_buy_signal(&prices) {
            Some(b) => b,
            None => {
                warn!("Buy signal evaluation failed for {}", tick.symbol);
                return;
            }
        };

        let prev = self.prev_buyable.get(&tick.symbol).copied();
        if prev != Some(buyable) {
            if buyable {
                self.buyable.insert(tick.symbol.clone(), ());
            } else {
                self.buyable.remove(&tick.symbol);
            }
            self.prev_buyable.insert(tick.symbol.clone(), buyable);
            debug!("{} buyable={buyable}", tick.symbol);
        }
    }

    fn is_buy_signal(&self, prices: &[f64]) -> Option<bool> {
        let fast = ema(prices, self.config.ema_fast)?;
        let slow = ema(prices, self.config.ema_slow)?;
        let rsi_val = rsi(prices, self.config.rsi_period)?;
        Some(fast > slow && rsi_val < self.config.rsi_oversold)
    }
}

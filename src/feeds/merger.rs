use crate::models::tick::Tick;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Duration;
use tracing::{debug, info, warn};

/// Registration of a freshly created per-symbol channel.
pub struct MergerControl {
    pub symbol: String,
    pub rx: broadcast::Receiver<Tick>,
}

/// Fan-in: drains every per-symbol channel without blocking and republishes
/// onto the unified stream.
///
/// The unified channel is a broadcast ring, so under overflow the newest
/// ticks displace the oldest for lagging consumers and live prices win.
/// Per-symbol channels are pruned once their ingress sender is dropped.
pub struct TickMerger;

impl TickMerger {
    pub fn start(
        unified_tx: broadcast::Sender<Tick>,
        mut control_rx: mpsc::Receiver<MergerControl>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        tokio::spawn(async move {
            info!("TickMerger started");
            let mut channels: Vec<(String, broadcast::Receiver<Tick>)> = Vec::new();

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.recv() => break,
                    Some(control) = control_rx.recv() => {
                        debug!("Merger channel registered: {}", control.symbol);
                        channels.push((control.symbol, control.rx));
                        continue;
                    }
                    _ = tokio::time::sleep(Duration::from_millis(1)) => {}
                }

                channels.retain_mut(|(symbol, rx)| loop {
                    match rx.try_recv() {
                        Ok(tick) => {
                            let _ = unified_tx.send(tick);
                        }
                        Err(broadcast::error::TryRecvError::Empty) => return true,
                        Err(broadcast::error::TryRecvError::Lagged(n)) => {
                            warn!("Per-symbol channel {symbol} lagged by {n}");
                        }
                        Err(broadcast::error::TryRecvError::Closed) => {
                            debug!("Merger channel closed: {symbol}");
                            return false;
                        }
                    }
                });
            }
            info!("TickMerger stopped");
        });
    }
}

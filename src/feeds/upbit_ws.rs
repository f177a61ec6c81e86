use crate::config::WebsocketConfig;
use crate::feeds::merger::MergerControl;
use crate::models::tick::Tick;
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{Duration, Instant};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Streaming market-data ingress.
///
/// Maintains one reconnecting WebSocket per channel type (trade, depth),
/// decodes messages, tags them with their symbol, and routes them into
/// per-symbol channels. A symbol-set change tears the connections down and
/// resubscribes; ticks already routed are preserved downstream.
pub struct UpbitIngress {
    ws_url: String,
    config: WebsocketConfig,
    router: Arc<DashMap<String, broadcast::Sender<Tick>>>,
    merger_tx: mpsc::Sender<MergerControl>,
}

/// Per-symbol channel depth before the ring starts displacing old ticks.
const SYMBOL_CHANNEL_CAPACITY: usize = 2000;

#[derive(Debug, Deserialize)]
struct WsMessage {
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(alias = "market")]
    code: Option<String>,
    trade_price: Option<f64>,
    orderbook_units: Option<Vec<OrderbookUnit>>,
}

#[derive(Debug, Deserialize)]
struct OrderbookUnit {
    bid_price: Option<f64>,
    ask_price: Option<f64>,
}

/// Decode one raw frame into a unified tick. Messages without a symbol or
/// a usable price are dropped.
fn decode_message(text: &str) -> Option<Tick> {
    let msg: WsMessage = serde_json::from_str(text).ok()?;
    let symbol = msg.code.filter(|c| !c.is_empty())?;

    match msg.kind.as_deref() {
        Some("orderbook") => {
            let unit = msg.orderbook_units.as_ref()?.first()?;
            let (bid, ask) = (unit.bid_price?, unit.ask_price?);
            Some(Tick::depth(symbol, bid, ask))
        }
        Some("trade") | Some("ticker") => Some(Tick::trade(symbol, msg.trade_price?)),
        _ => None,
    }
}

fn subscribe_frame(channel: &str, symbols: &[String]) -> String {
    serde_json::json!([
        { "ticket": Uuid::new_v4().to_string() },
        { "type": channel, "codes": symbols, "isOnlyRealtime": true },
        { "format": "DEFAULT" }
    ])
    .to_string()
}

impl UpbitIngress {
    pub fn new(
        ws_url: String,
        config: WebsocketConfig,
        merger_tx: mpsc::Sender<MergerControl>,
    ) -> Self {
        Self {
            ws_url,
            config,
            router: Arc::new(DashMap::new()),
            merger_tx,
        }
    }

    /// Spawns the router-maintenance task and one connection task per
    /// configured channel type.
    pub fn start(&self, symbol_rx: watch::Receiver<Vec<String>>, shutdown_tx: &broadcast::Sender<()>) {
        self.spawn_router_task(symbol_rx.clone(), shutdown_tx.subscribe());
        for channel in self.config.channels.clone() {
            self.spawn_channel_task(channel, symbol_rx.clone(), shutdown_tx.subscribe());
        }
    }

    /// Keeps the per-symbol channel map in sync with the active set:
    /// creates channels for added symbols (registering them with the
    /// merger) and drops senders for removed ones so the merger prunes.
    fn spawn_router_task(
        &self,
        mut symbol_rx: watch::Receiver<Vec<String>>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let router = self.router.clone();
        let merger_tx = self.merger_tx.clone();

        tokio::spawn(async move {
            let initial = symbol_rx.borrow_and_update().clone();
            Self::sync_router(&router, &merger_tx, &initial).await;

            loop {
                tokio::select! {
                    changed = symbol_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let symbols = symbol_rx.borrow_and_update().clone();
                        Self::sync_router(&router, &merger_tx, &symbols).await;
                    }
                    _ = shutdown.recv() => break,
                }
            }
        });
    }

    async fn sync_router(
        router: &DashMap<String, broadcast::Sender<Tick>>,
        merger_tx: &mpsc::Sender<MergerControl>,
        symbols: &[String],
    ) {
        let wanted: HashSet<&String> = symbols.iter().collect();

        let stale: Vec<String> = router
            .iter()
            .filter(|entry| !wanted.contains(entry.key()))
            .map(|entry| entry.key().clone())
            .collect();
        for symbol in stale {
            router.remove(&symbol);
            debug!("Per-symbol channel dropped: {symbol}");
        }

        for symbol in symbols {
            if router.contains_key(symbol) {
                continue;
            }
            let (tx, rx) = broadcast::channel(SYMBOL_CHANNEL_CAPACITY);
            router.insert(symbol.clone(), tx);
            if merger_tx
                .send(MergerControl { symbol: symbol.clone(), rx })
                .await
                .is_err()
            {
                warn!("Merger control channel closed");
                return;
            }
            debug!("Per-symbol channel created: {symbol}");
        }
    }

    fn spawn_channel_task(
        &self,
        channel: String,
        mut symbol_rx: watch::Receiver<Vec<String>>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let ws_url = self.ws_url.clone();
        let router = self.router.clone();
        let heartbeat = Duration::from_secs(self.config.heartbeat_timeout_secs);
        let backoff_base = self.config.backoff_base_secs;
        let max_backoff = self.config.max_backoff_secs;
        let max_retries = self.config.max_retries;

        tokio::spawn(async move {
            let mut backoff = backoff_base;
            let mut retries: u32 = 0;

            'reconnect: loop {
                let symbols = symbol_rx.borrow_and_update().clone();
                if symbols.is_empty() {
                    tokio::select! {
                        changed = symbol_rx.changed() => {
                            if changed.is_err() { return; }
                            continue 'reconnect;
                        }
                        _ = shutdown.recv() => return,
                    }
                }

                if let Some(limit) = max_retries {
                    if retries > limit {
                        error!("WebSocket [{channel}] exceeded {limit} retries; giving up");
                        return;
                    }
                }

                info!("Connecting WebSocket [{channel}] for {symbols:?}");
                let conn = tokio::select! {
                    conn = connect_async(&ws_url) => conn,
                    _ = shutdown.recv() => return,
                };

                let (mut write, mut read) = match conn {
                    Ok((stream, _)) => stream.split(),
                    Err(e) => {
                        warn!("WebSocket [{channel}] connect failed: {e}; retrying in {backoff:.0}s");
                        retries += 1;
                        tokio::time::sleep(Duration::from_secs_f64(backoff)).await;
                        backoff = (backoff * 2.0).min(max_backoff);
                        continue 'reconnect;
                    }
                };

                if let Err(e) = write
                    .send(Message::Text(subscribe_frame(&channel, &symbols)))
                    .await
                {
                    warn!("WebSocket [{channel}] subscribe failed: {e}");
                    retries += 1;
                    tokio::time::sleep(Duration::from_secs_f64(backoff)).await;
                    backoff = (backoff * 2.0).min(max_backoff);
                    continue 'reconnect;
                }

                info!("WebSocket [{channel}] connected");
                backoff = backoff_base;
                retries = 0;
                let mut last_message = Instant::now();

                loop {
                    let deadline = last_message + heartbeat;
                    tokio::select! {
                        biased;
                        _ = shutdown.recv() => return,
                        changed = symbol_rx.changed() => {
                            if changed.is_err() { return; }
                            let new_symbols = symbol_rx.borrow_and_update().clone();
                            let differs: HashSet<&String> = new_symbols.iter().collect();
                            let current: HashSet<&String> = symbols.iter().collect();
                            if differs != current {
                                info!("WebSocket [{channel}] resubscribing: {new_symbols:?}");
                                continue 'reconnect;
                            }
                        }
                        _ = tokio::time::sleep_until(deadline) => {
                            warn!("WebSocket [{channel}] heartbeat timeout; reconnecting");
                            continue 'reconnect;
                        }
                        msg = read.next() => {
                            last_message = Instant::now();
                            match msg {
                                Some(Ok(Message::Text(text))) => {
                                    Self::route(&router, &text);
                                }
                                Some(Ok(Message::Binary(bytes))) => {
                                    if let Ok(text) = String::from_utf8(bytes) {
                                        Self::route(&router, &text);
                                    }
                                }
                                Some(Ok(Message::Ping(_))) => {
                                    debug!("WebSocket [{channel}] ping");
                                }
                                Some(Ok(_)) => {}
                                Some(Err(e)) => {
                                    warn!("WebSocket [{channel}] error: {e}");
                                    continue 'reconnect;
                                }
                                None => {
                                    warn!("WebSocket [{channel}] stream ended");
                                    continue 'reconnect;
                                }
                            }
                        }
                    }
                }
            }
        });
    }

    /// Decode and deliver into the symbol's channel; messages for symbols
    /// with no channel are dropped silently.
    fn route(router: &DashMap<String, broadcast::Sender<Tick>>, text: &str) {
        if let Some(tick) = decode_message(text) {
            if let Some(sender) = router.get(&tick.symbol) {
                let _ = sender.send(tick);
            }
        }
    }
}

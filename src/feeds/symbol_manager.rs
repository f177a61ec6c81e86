use crate::config::SymbolSelectionConfig;
use dashmap::DashMap;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::time::{Duration, Instant};
use tracing::{info, warn};

/// Periodically reselects the active symbol set: safety-filtered KRW
/// markets, intersected with the indicator worker's buyable set, ranked by
/// 24h traded value, top-N taken.
///
/// Sole writer of the active set; publication is rate-limited by
/// `min_stable_secs` so the pipeline never flaps.
pub struct SymbolManager {
    config: SymbolSelectionConfig,
    rest_url: String,
    http: reqwest::Client,
    buyable: Arc<DashMap<String, ()>>,
    symbol_tx: watch::Sender<Vec<String>>,
    safe_cache: Option<(HashSet<String>, Instant)>,
    last_published: Option<Instant>,
}

/// Market-listing cache lifetime.
const SAFE_CACHE_TTL: Duration = Duration::from_secs(3600);
/// Ticker batch size limit per REST call.
const TICKER_BATCH: usize = 100;

#[derive(Debug, Deserialize)]
struct MarketInfo {
    market: String,
    #[serde(default)]
    market_event: Option<MarketEvent>,
}

#[derive(Debug, Default, Deserialize)]
struct MarketEvent {
    #[serde(default)]
    warning: bool,
    #[serde(default)]
    caution: Option<std::collections::HashMap<String, bool>>,
}

#[derive(Debug, Deserialize)]
struct TickerVolume {
    market: String,
    #[serde(default)]
    acc_trade_price_24h: f64,
}

impl MarketEvent {
    fn small_account_concentration(&self) -> bool {
        self.caution
            .as_ref()
            .and_then(|c| c.get("CONCENTRATION_OF_SMALL_ACCOUNTS"))
            .copied()
            .unwrap_or(false)
    }
}

/// Keep KRW markets that pass the enabled safety filters.
fn filter_safe(
    markets: &[MarketInfo],
    exclude_warning: bool,
    exclude_small_acc: bool,
) -> HashSet<String> {
    let mut safe = HashSet::new();
    for market in markets {
        if !market.market.starts_with("KRW-") {
            continue;
        }
        if let Some(event) = &market.market_event {
            if exclude_warning && event.warning {
                continue;
            }
            if exclude_small_acc && event.small_account_concentration() {
                continue;
            }
        }
        safe.insert(market.market.clone());
    }
    safe
}

/// Sort descending by 24h traded value and keep the top N.
fn rank_by_volume(mut tickers: Vec<TickerVolume>, top_n: usize) -> Vec<String> {
    tickers.sort_by(|a, b| {
        b.acc_trade_price_24h
            .partial_cmp(&a.acc_trade_price_24h)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    tickers.into_iter().take(top_n).map(|t| t.market).collect()
}

impl SymbolManager {
    pub fn new(
        config: SymbolSelectionConfig,
        rest_url: String,
        buyable: Arc<DashMap<String, ()>>,
        symbol_tx: watch::Sender<Vec<String>>,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(5))
            .build()
            .unwrap_or_default();
        Self {
            config,
            rest_url: rest_url.trim_end_matches('/').to_string(),
            http,
            buyable,
            symbol_tx,
            safe_cache: None,
            last_published: None,
        }
    }

    pub fn start(mut self, mut shutdown: broadcast::Receiver<()>) {
        tokio::spawn(async move {
            info!(
                "SymbolManager started (top_n={}, refresh={}s)",
                self.config.top_n, self.config.refresh_interval_secs
            );
            let mut interval =
                tokio::time::interval(Duration::from_secs(self.config.refresh_interval_secs));
            // Skip the immediate first tick so the seed list gets a full cycle.
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = interval.tick() => self.refresh().await,
                    _ = shutdown.recv() => break,
                }
            }
            info!("SymbolManager stopped");
        });
    }

    async fn refresh(&mut self) {
        if let Some(last) = self.last_published {
            if last.elapsed() < Duration::from_secs(self.config.min_stable_secs) {
                return;
            }
        }

        let selected = match self.select_symbols().await {
            Ok(symbols) => symbols,
            Err(e) => {
                // Keep the current set; the next cycle retries.
                warn!("Symbol selection failed: {e}");
                return;
            }
        };
        if selected.is_empty() {
            return;
        }

        let current = self.symbol_tx.borrow().clone();
        let changed = selected.iter().collect::<HashSet<_>>()
            != current.iter().collect::<HashSet<_>>();
        if changed {
            info!("Symbols updated: {current:?} -> {selected:?}");
            let _ = self.symbol_tx.send(selected);
            self.last_published = Some(Instant::now());
        }
    }

    async fn select_symbols(&mut self) -> anyhow::Result<Vec<String>> {
        let safe = self.fetch_safe_tickers().await?;

        let buyable: HashSet<String> =
            self.buyable.iter().map(|e| e.key().clone()).collect();
        let mut candidates: Vec<String> = if buyable.is_empty() {
            safe.iter().cloned().collect()
        } else {
            buyable.intersection(&safe).cloned().collect()
        };
        if candidates.is_empty() {
            warn!("No candidates after the buyable filter; falling back to safe tickers");
            candidates = safe.iter().cloned().collect();
        }

        let mut tickers: Vec<TickerVolume> = Vec::new();
        for chunk in candidates.chunks(TICKER_BATCH) {
            let url = format!("{}/v1/ticker?markets={}", self.rest_url, chunk.join(","));
            match self.http.get(&url).send().await {
                Ok(resp) if resp.status().is_success() => {
                    tickers.extend(resp.json::<Vec<TickerVolume>>().await?);
                }
                Ok(resp) => warn!("Ticker batch rejected: {}", resp.status()),
                Err(e) => warn!("Ticker batch failed: {e}"),
            }
        }
        anyhow::ensure!(!tickers.is_empty(), "no ticker data retrieved");

        Ok(rank_by_volume(tickers, self.config.top_n))
    }

    async fn fetch_safe_tickers(&mut self) -> anyhow::Result<HashSet<String>> {
        if let Some((cached, at)) = &self.safe_cache {
            if at.elapsed() < SAFE_CACHE_TTL {
                return Ok(cached.clone());
            }
        }

        let url = format!("{}/v1/market/all?is_details=true", self.rest_url);
        let resp = self.http.get(&url).send().await?;
        anyhow::ensure!(resp.status().is_success(), "market list: {}", resp.status());
        let markets: Vec<MarketInfo> = resp.json().await?;

        let safe = filter_safe(
            &markets,
            self.config.exclude_warning,
            self.config.exclude_small_acc,
        );
        anyhow::ensure!(!safe.is_empty(), "no safe KRW tickers after filtering");

        self.safe_cache = Some((safe.clone(), Instant::now()));
        Ok(safe)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn markets_json() -> Vec<MarketInfo> {
        serde_json::from_str(
            r#"[
                {"market": "KRW-BTC", "market_event": {"warning": false}},
                {"market": "KRW-ETH"},
                {"market": "KRW-RISKY", "market_event": {"warning": true}},
                {"market": "KRW-DUST", "market_event": {"warning": false,
                    "caution": {"CONCENTRATION_OF_SMALL_ACCOUNTS": true}}},
                {"market": "BTC-ETH"},
                {"market": "USDT-BTC"}
            ]"#,
        )
        .unwrap()
    }

    #[test]
    fn non_krw_markets_are_always_excluded() {
        let safe = filter_safe(&markets_json(), false, false);
        assert!(!safe.contains("BTC-ETH"));
        assert!(!safe.contains("USDT-BTC"));
        assert!(safe.contains("KRW-BTC"));
    }

    #[test]
    fn warning_filter_drops_flagged_markets() {
        let safe = filter_safe(&markets_json(), true, false);
        assert!(!safe.contains("KRW-RISKY"));
        assert!(safe.contains("KRW-DUST"));
    }

    #[test]
    fn small_account_filter_drops_flagged_markets() {
        let safe = filter_safe(&markets_json(), false, true);
        assert!(safe.contains("KRW-RISKY"));
        assert!(!safe.contains("KRW-DUST"));
    }

    #[test]
    fn filters_disabled_keep_everything_krw() {
        let safe = filter_safe(&markets_json(), false, false);
        assert_eq!(safe.len(), 4);
    }

    #[test]
    fn ranking_takes_top_n_by_traded_value() {
        let tickers: Vec<TickerVolume> = serde_json::from_str(
            r#"[
                {"market": "KRW-A", "acc_trade_price_24h": 100.0},
                {"market": "KRW-B", "acc_trade_price_24h": 300.0},
                {"market": "KRW-C", "acc_trade_price_24h": 200.0},
                {"market": "KRW-D"}
            ]"#,
        )
        .unwrap();
        let top = rank_by_volume(tickers, 2);
        assert_eq!(top, vec!["KRW-B".to_string(), "KRW-C".to_string()]);
    }

    #[test]
    fn ranking_with_fewer_candidates_than_n() {
        let tickers: Vec<TickerVolume> = serde_json::from_str(
            r#"[{"market": "KRW-A", "acc_trade_price_24h": 1.0}]"#,
        )
        .unwrap();
        assert_eq!(rank_by_volume(tickers, 3).len(), 1);
    }
}

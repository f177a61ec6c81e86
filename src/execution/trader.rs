use crate::config::Config;
use crate::models::order::{
    ApiPayload, ApiRequest, ApiRequestKind, ApiResponse, OrdType, OrderFill, OrderSide,
    OrderState, OrderStatusInfo, PendingOrder, PendingRequest, TradeRecord,
};
use crate::models::signal::{Command, Signal, SignalAction};
use crate::models::tick::Tick;
use crate::risk::risk_manager::{RiskManager, MIN_ORDER_KRW};
use crate::strategies::manager::StrategyManager;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Central decider: routes unified ticks into strategies, gates buys
/// through per-symbol risk, submits orders, correlates API responses, and
/// walks every accepted order through its poll / timeout-cancel lifecycle.
pub struct Trader {
    config: Arc<Config>,
    strategy_manager: StrategyManager,
    risk_managers: HashMap<String, RiskManager>,
    symbols: Vec<String>,

    krw_balance: f64,
    coin_balances: HashMap<String, f64>,
    last_prices: HashMap<String, f64>,

    pending_requests: HashMap<Uuid, PendingRequest>,
    pending_orders: HashMap<String, PendingOrder>,
    last_order_at: Option<Instant>,
    paused: bool,

    order_tx: mpsc::Sender<ApiRequest>,
    notify_tx: mpsc::Sender<String>,
    db_tx: mpsc::Sender<TradeRecord>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Trader {
    /// Floor between two order submissions, portfolio-wide.
    pub const ORDER_INTERVAL: Duration = Duration::from_millis(150);
    /// Poll cadence for exchange-accepted orders.
    pub const PENDING_CHECK_INTERVAL: Duration = Duration::from_millis(300);
    /// Unfilled orders are cancelled after this long.
    pub const PENDING_TIMEOUT: Duration = Duration::from_secs(10);

    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<Config>,
        initial_symbols: Vec<String>,
        order_tx: mpsc::Sender<ApiRequest>,
        notify_tx: mpsc::Sender<String>,
        db_tx: mpsc::Sender<TradeRecord>,
        shutdown_tx: broadcast::Sender<()>,
    ) -> Self {
        let mut strategy_manager =
            StrategyManager::new(config.strategy.kind, &initial_symbols, config.clone());
        strategy_manager.prepare_all(None);

        let risk_managers = initial_symbols
            .iter()
            .map(|symbol| {
                (
                    symbol.clone(),
                    RiskManager::new(config.max_position_krw(symbol), config.risk.clone()),
                )
            })
            .collect();
        let coin_balances = initial_symbols.iter().map(|s| (s.clone(), 0.0)).collect();
        let last_prices = initial_symbols.iter().map(|s| (s.clone(), 0.0)).collect();

        Self {
            config,
            strategy_manager,
            risk_managers,
            symbols: initial_symbols,
            krw_balance: 0.0,
            coin_balances,
            last_prices,
            pending_requests: HashMap::new(),
            pending_orders: HashMap::new(),
            last_order_at: None,
            paused: false,
            order_tx,
            notify_tx,
            db_tx,
            shutdown_tx,
        }
    }

    pub async fn run(
        mut self,
        mut tick_rx: broadcast::Receiver<Tick>,
        mut command_rx: mpsc::Receiver<Command>,
        mut resp_rx: mpsc::Receiver<ApiResponse>,
        mut symbol_rx: watch::Receiver<Vec<String>>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        info!(
            "Trader started: strategy={:?}, symbols={:?}",
            self.config.strategy.kind, self.symbols
        );
        self.request_startup_balances().await;

        let mut poll_timer = tokio::time::interval(Duration::from_millis(100));
        let mut symbols_live = true;

        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => break,
                Some(command) = command_rx.recv() => {
                    self.handle_command(command).await;
                }
                Some(response) = resp_rx.recv() => {
                    self.handle_response(response).await;
                }
                changed = symbol_rx.changed(), if symbols_live => {
                    match changed {
                        Ok(()) => {
                            let new_symbols = symbol_rx.borrow_and_update().clone();
                            self.rebind_symbols(new_symbols).await;
                        }
                        Err(_) => symbols_live = false,
                    }
                }
                tick = tick_rx.recv() => {
                    match tick {
                        Ok(tick) => self.handle_tick(&tick).await,
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!("Trader tick stream lagged by {n} messages");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
                _ = poll_timer.tick() => {}
            }

            self.poll_pending_orders().await;
        }

        info!("Trader stopped");
    }

    /// Register a correlation and hand the request to the API worker.
    async fn enqueue(&mut self, kind: ApiRequestKind, pending: PendingRequest) {
        let request_id = Uuid::new_v4();
        self.pending_requests.insert(request_id, pending);
        if self
            .order_tx
            .send(ApiRequest { request_id, kind })
            .await
            .is_err()
        {
            warn!("API request channel closed");
            self.pending_requests.remove(&request_id);
        }
    }

    async fn request_startup_balances(&mut self) {
        self.enqueue(
            ApiRequestKind::GetBalance { ticker: "KRW".into() },
            PendingRequest::BalanceKrw,
        )
        .await;
        for symbol in self.symbols.clone() {
            self.enqueue(
                ApiRequestKind::GetBalance { ticker: symbol.clone() },
                PendingRequest::BalanceCoin { symbol },
            )
            .await;
        }
    }

    async fn refresh_balances(&mut self, symbol: &str) {
        self.enqueue(
            ApiRequestKind::GetBalance { ticker: "KRW".into() },
            PendingRequest::BalanceKrw,
        )
        .await;
        self.enqueue(
            ApiRequestKind::GetBalance { ticker: symbol.to_string() },
            PendingRequest::BalanceCoin {
                symbol: symbol.to_string(),
            },
        )
        .await;
    }

    async fn notify(&self, message: String) {
        let _ = self.notify_tx.send(message).await;
    }

    async fn handle_command(&mut self, command: Command) {
        info!("Command received: {command:?}");
        match command {
            Command::Pause => {
                self.paused = true;
                self.notify("[INFO] Trading paused".into()).await;
            }
            Command::Resume => {
                self.paused = false;
                self.notify("[INFO] Trading resumed".into()).await;
            }
            Command::Shutdown => {
                self.notify("[INFO] Shutdown signal received".into()).await;
                let _ = self.shutdown_tx.send(());
            }
            Command::PortfolioStatus => {
                let status = self.strategy_manager.portfolio_status();
                self.notify(format!("[PORTFOLIO] {status}")).await;
            }
            Command::StrategyPerformance => {
                let performance = self.strategy_manager.strategy_performance();
                self.notify(format!("[PERFORMANCE] {performance}")).await;
            }
        }
    }

    async fn handle_response(&mut self, response: ApiResponse) {
        let Some(request) = self.pending_requests.remove(&response.request_id) else {
            debug!("Orphan response ignored: {}", response.request_id);
            return;
        };

        let payload = match response.payload {
            Ok(payload) => payload,
            Err(message) => {
                match request {
                    PendingRequest::BuyOrder { symbol, .. } => {
                        self.notify(format!("[BUY ERROR] {symbol}: {message}")).await;
                    }
                    PendingRequest::SellOrder { symbol, .. } => {
                        self.notify(format!("[SELL ERROR] {symbol}: {message}")).await;
                    }
                    _ => warn!("API request failed: {message}"),
                }
                return;
            }
        };

        match (request, payload) {
            (PendingRequest::BalanceKrw, ApiPayload::Balance(balance)) => {
                self.krw_balance = balance;
                debug!("KRW balance updated: {balance}");
            }
            (PendingRequest::BalanceCoin { symbol }, ApiPayload::Balance(balance)) => {
                debug!("{symbol} balance updated: {balance}");
                self.coin_balances.insert(symbol, balance);
            }
            (
                PendingRequest::BuyOrder { symbol, price, volume, .. },
                ApiPayload::OrderAck { order_id },
            ) => {
                self.pending_orders.insert(
                    order_id.clone(),
                    PendingOrder {
                        symbol: symbol.clone(),
                        side: OrderSide::Buy,
                        intended_volume: volume,
                        intended_price: price,
                        sent_at: Instant::now(),
                        last_poll: None,
                        cancel_requested: false,
                    },
                );
                self.notify(format!(
                    "[BUY REQUEST] {symbol} accepted (ID: {})",
                    short_id(&order_id)
                ))
                .await;
            }
            (
                PendingRequest::SellOrder { symbol, price, volume, .. },
                ApiPayload::OrderAck { order_id },
            ) => {
                self.pending_orders.insert(
                    order_id.clone(),
                    PendingOrder {
                        symbol: symbol.clone(),
                        side: OrderSide::Sell,
                        intended_volume: volume,
                        intended_price: price,
                        sent_at: Instant::now(),
                        last_poll: None,
                        cancel_requested: false,
                    },
                );
                self.notify(format!(
                    "[SELL REQUEST] {symbol} accepted (ID: {})",
                    short_id(&order_id)
                ))
                .await;
            }
            (PendingRequest::OrderStatus { order_id }, ApiPayload::OrderStatus(status)) => {
                self.handle_order_status(&order_id, status).await;
            }
            (PendingRequest::CancelOrder { order_id }, ApiPayload::Cancelled { .. }) => {
                self.pending_orders.remove(&order_id);
                self.notify(format!("[CANCELLED] order cancelled (ID: {})", short_id(&order_id)))
                    .await;
            }
            (request, payload) => {
                warn!("Response payload mismatch: {request:?} vs {payload:?}");
            }
        }
    }

    async fn handle_order_status(&mut self, order_id: &str, status: OrderStatusInfo) {
        let Some(pending) = self.pending_orders.get(order_id) else {
            return; // already settled by an earlier poll
        };

        match status.state {
            OrderState::Wait => {}
            OrderState::Done => {
                let mut executed = status.executed_volume();
                if executed <= 0.0 {
                    executed = pending.intended_volume;
                }
                let avg_price = status.avg_fill_price().unwrap_or(pending.intended_price);

                let fill = OrderFill {
                    symbol: pending.symbol.clone(),
                    side: pending.side,
                    price: avg_price,
                    volume: executed,
                    ts: Utc::now(),
                    order_id: order_id.to_string(),
                };
                let symbol = fill.symbol.clone();

                self.strategy_manager.process_order_fill(&symbol, &fill);
                self.notify(format!(
                    "[FILL] {} {symbol} @ {avg_price:.0} (ID: {})",
                    fill.side.as_str().to_uppercase(),
                    short_id(order_id)
                ))
                .await;
                let _ = self.db_tx.send(TradeRecord::from_fill(&fill)).await;

                self.pending_orders.remove(order_id);
                self.refresh_balances(&symbol).await;
            }
            OrderState::Cancel | OrderState::Fail => {
                self.notify(format!(
                    "[CANCEL] {} order cancelled/failed (ID: {})",
                    pending.symbol,
                    short_id(order_id)
                ))
                .await;
                self.pending_orders.remove(order_id);
            }
        }
    }

    /// Walk the pending-order state machine: poll on cadence, cancel once
    /// on timeout, wait for the terminal response.
    async fn poll_pending_orders(&mut self) {
        if self.pending_orders.is_empty() {
            return;
        }
        let now = Instant::now();
        let mut to_poll = Vec::new();
        let mut to_cancel = Vec::new();

        for (order_id, pending) in self.pending_orders.iter_mut() {
            let poll_due = pending
                .last_poll
                .map_or(true, |t| now.duration_since(t) >= Self::PENDING_CHECK_INTERVAL);
            if poll_due {
                pending.last_poll = Some(now);
                to_poll.push(order_id.clone());
            }

            if !pending.cancel_requested
                && now.duration_since(pending.sent_at) >= Self::PENDING_TIMEOUT
            {
                pending.cancel_requested = true;
                to_cancel.push(order_id.clone());
            }
        }

        for order_id in to_poll {
            self.enqueue(
                ApiRequestKind::GetOrder { order_id: order_id.clone() },
                PendingRequest::OrderStatus { order_id },
            )
            .await;
        }
        for order_id in to_cancel {
            warn!("Pending order timed out, cancelling: {}", short_id(&order_id));
            self.enqueue(
                ApiRequestKind::CancelOrder { order_id: order_id.clone() },
                PendingRequest::CancelOrder { order_id },
            )
            .await;
        }
    }

    async fn handle_tick(&mut self, tick: &Tick) {
        if self.paused {
            return;
        }
        let symbol = tick.symbol.clone();
        if !self.symbols.contains(&symbol) {
            return;
        }

        let current_price = tick.trade_price;
        self.last_prices.insert(symbol.clone(), current_price);

        let Some(signal) = self.strategy_manager.process_tick(&symbol, tick) else {
            return;
        };
        if signal.is_none() {
            return;
        }

        if let Some(last) = self.last_order_at {
            if last.elapsed() < Self::ORDER_INTERVAL {
                return;
            }
        }

        match signal.action {
            SignalAction::Buy => self.submit_buy(&symbol, current_price, &signal).await,
            SignalAction::Sell => self.submit_sell(&symbol, current_price, &signal).await,
            SignalAction::None => {}
        }
    }

    async fn submit_buy(&mut self, symbol: &str, current_price: f64, signal: &Signal) {
        if current_price <= 0.0 {
            return;
        }

        // Portfolio-risk inputs are computed fresh for every evaluation.
        let total_coin_value: f64 = self
            .symbols
            .iter()
            .map(|s| {
                self.coin_balances.get(s).copied().unwrap_or(0.0)
                    * self.last_prices.get(s).copied().unwrap_or(0.0)
            })
            .sum();
        let total_assets = total_coin_value + self.krw_balance;
        let coin_ratio = if total_assets > 0.0 {
            total_coin_value / total_assets
        } else {
            0.0
        };
        let realized_daily_pnl = self.strategy_manager.total_realized_pnl();
        let active_positions = self.strategy_manager.active_positions;

        let Some(risk_manager) = self.risk_managers.get_mut(symbol) else {
            return;
        };
        if !risk_manager.allow_order(
            self.krw_balance,
            coin_ratio,
            realized_daily_pnl,
            active_positions,
        ) {
            debug!("Buy rejected by risk manager: {symbol}");
            return;
        }

        let max_krw = self.config.max_position_krw(symbol);
        let krw_amount = self.krw_balance.min(max_krw);
        if krw_amount < MIN_ORDER_KRW {
            return;
        }

        let reason = signal.reason.clone().unwrap_or_default();
        info!("Buy order: {symbol} @ {current_price} ({reason})");
        self.enqueue(
            ApiRequestKind::PlaceOrder {
                market: symbol.to_string(),
                side: OrderSide::Buy,
                ord_type: OrdType::Market,
                volume: krw_amount,
            },
            PendingRequest::BuyOrder {
                symbol: symbol.to_string(),
                price: current_price,
                // Intended coin volume; reconciled from trades after `done`.
                volume: krw_amount / current_price,
                reason,
            },
        )
        .await;
        self.last_order_at = Some(Instant::now());
    }

    async fn submit_sell(&mut self, symbol: &str, current_price: f64, signal: &Signal) {
        if current_price <= 0.0 {
            return;
        }
        let coin_balance = self.coin_balances.get(symbol).copied().unwrap_or(0.0);
        // Partial closes carry their own volume; otherwise sell the lot.
        let volume = signal.volume.unwrap_or(coin_balance);
        if volume <= 0.0 {
            return;
        }

        let reason = signal.reason.clone().unwrap_or_default();
        info!("Sell order: {symbol} @ {current_price}, volume: {volume} ({reason})");
        self.enqueue(
            ApiRequestKind::PlaceOrder {
                market: symbol.to_string(),
                side: OrderSide::Sell,
                ord_type: OrdType::Market,
                volume,
            },
            PendingRequest::SellOrder {
                symbol: symbol.to_string(),
                price: current_price,
                volume,
                reason,
            },
        )
        .await;
        self.last_order_at = Some(Instant::now());
    }

    /// Apply a new active symbol set: liquidate removed holdings, seed
    /// state for added symbols, and rebind the strategy map.
    async fn rebind_symbols(&mut self, new_symbols: Vec<String>) {
        let current: HashSet<String> = self.symbols.iter().cloned().collect();
        let incoming: HashSet<String> = new_symbols.iter().cloned().collect();

        for symbol in current.difference(&incoming) {
            let volume = self.coin_balances.get(symbol).copied().unwrap_or(0.0);
            if volume > 0.0 {
                let price = self.last_prices.get(symbol).copied().unwrap_or(0.0);
                self.enqueue(
                    ApiRequestKind::PlaceOrder {
                        market: symbol.clone(),
                        side: OrderSide::Sell,
                        ord_type: OrdType::Market,
                        volume,
                    },
                    PendingRequest::SellOrder {
                        symbol: symbol.clone(),
                        price,
                        volume,
                        reason: "symbol_removed".into(),
                    },
                )
                .await;
                self.notify(format!("[AUTO SELL] {symbol} removed; selling full balance"))
                    .await;
            }
            self.risk_managers.remove(symbol);
            self.coin_balances.remove(symbol);
            self.last_prices.remove(symbol);
        }

        for symbol in incoming.difference(&current) {
            self.risk_managers.insert(
                symbol.clone(),
                RiskManager::new(self.config.max_position_krw(symbol), self.config.risk.clone()),
            );
            self.coin_balances.entry(symbol.clone()).or_insert(0.0);
            self.last_prices.entry(symbol.clone()).or_insert(0.0);
            self.enqueue(
                ApiRequestKind::GetBalance { ticker: symbol.clone() },
                PendingRequest::BalanceCoin {
                    symbol: symbol.clone(),
                },
            )
            .await;
        }

        self.strategy_manager.update_symbols(&new_symbols);
        self.symbols = new_symbols;

        let mut sorted = self.symbols.clone();
        sorted.sort();
        self.notify(format!("[SYMBOLS] updated -> {sorted:?}")).await;
    }
}

fn short_id(order_id: &str) -> &str {
    &order_id[..order_id.len().min(8)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::order::OrderTrade;

    struct Harness {
        trader: Trader,
        order_rx: mpsc::Receiver<ApiRequest>,
        notify_rx: mpsc::Receiver<String>,
        db_rx: mpsc::Receiver<TradeRecord>,
    }

    fn harness() -> Harness {
        let config = Arc::new(Config::default());
        let (order_tx, order_rx) = mpsc::channel(64);
        let (notify_tx, notify_rx) = mpsc::channel(64);
        let (db_tx, db_rx) = mpsc::channel(64);
        let (shutdown_tx, _) = broadcast::channel(1);
        let trader = Trader::new(
            config,
            vec!["KRW-BTC".into(), "KRW-ETH".into()],
            order_tx,
            notify_tx,
            db_tx,
            shutdown_tx,
        );
        Harness {
            trader,
            order_rx,
            notify_rx,
            db_rx,
        }
    }

    fn drain_orders(rx: &mut mpsc::Receiver<ApiRequest>) -> Vec<ApiRequest> {
        let mut out = Vec::new();
        while let Ok(req) = rx.try_recv() {
            out.push(req);
        }
        out
    }

    fn drain_notify(rx: &mut mpsc::Receiver<String>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    /// Respond to an outstanding buy submission with an order ack.
    async fn install_buy_order(h: &mut Harness, order_id: &str) {
        let request_id = Uuid::new_v4();
        h.trader.pending_requests.insert(
            request_id,
            PendingRequest::BuyOrder {
                symbol: "KRW-ETH".into(),
                price: 100.0,
                volume: 2.0,
                reason: "test".into(),
            },
        );
        h.trader
            .handle_response(ApiResponse {
                request_id,
                payload: Ok(ApiPayload::OrderAck {
                    order_id: order_id.into(),
                }),
            })
            .await;
    }

    #[tokio::test]
    async fn startup_queries_krw_and_every_coin_balance() {
        let mut h = harness();
        h.trader.request_startup_balances().await;

        let requests = drain_orders(&mut h.order_rx);
        assert_eq!(requests.len(), 3);
        let tickers: Vec<String> = requests
            .iter()
            .map(|r| match &r.kind {
                ApiRequestKind::GetBalance { ticker } => ticker.clone(),
                other => panic!("unexpected request: {other:?}"),
            })
            .collect();
        assert!(tickers.contains(&"KRW".to_string()));
        assert!(tickers.contains(&"KRW-BTC".to_string()));
        assert!(tickers.contains(&"KRW-ETH".to_string()));
        // Every request has a live correlation.
        assert_eq!(h.trader.pending_requests.len(), 3);
    }

    #[tokio::test]
    async fn orphan_responses_are_ignored() {
        let mut h = harness();
        h.trader
            .handle_response(ApiResponse {
                request_id: Uuid::new_v4(),
                payload: Ok(ApiPayload::Balance(123.0)),
            })
            .await;
        assert_eq!(h.trader.krw_balance, 0.0);
        assert!(h.trader.pending_orders.is_empty());
    }

    #[tokio::test]
    async fn balance_responses_update_local_state() {
        let mut h = harness();
        h.trader.request_startup_balances().await;
        let requests = drain_orders(&mut h.order_rx);

        for request in requests {
            h.trader
                .handle_response(ApiResponse {
                    request_id: request.request_id,
                    payload: Ok(ApiPayload::Balance(42.0)),
                })
                .await;
        }
        assert_eq!(h.trader.krw_balance, 42.0);
        assert_eq!(h.trader.coin_balances["KRW-ETH"], 42.0);
        assert!(h.trader.pending_requests.is_empty());
    }

    #[tokio::test]
    async fn tick_drives_a_risk_gated_buy() {
        let mut h = harness();
        h.trader.krw_balance = 100_000.0;

        // Descending prices trip the scalping entry once the window fills.
        for price in [105.0, 104.0, 103.0, 102.0, 101.0, 100.0] {
            h.trader.handle_tick(&Tick::trade("KRW-ETH", price)).await;
        }

        let requests = drain_orders(&mut h.order_rx);
        let buys: Vec<&ApiRequest> = requests
            .iter()
            .filter(|r| matches!(r.kind, ApiRequestKind::PlaceOrder { side: OrderSide::Buy, .. }))
            .collect();
        assert_eq!(buys.len(), 1, "order interval must cap to one submission");
        match &buys[0].kind {
            ApiRequestKind::PlaceOrder { market, volume, .. } => {
                assert_eq!(market, "KRW-ETH");
                // min(krw_balance, per-symbol cap) in KRW.
                assert_eq!(*volume, 100_000.0);
            }
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn unknown_symbol_ticks_are_dropped() {
        let mut h = harness();
        h.trader.krw_balance = 100_000.0;
        for price in [105.0, 104.0, 103.0, 102.0, 101.0, 100.0] {
            h.trader.handle_tick(&Tick::trade("KRW-DOGE", price)).await;
        }
        assert!(drain_orders(&mut h.order_rx).is_empty());
    }

    #[tokio::test]
    async fn pause_suppresses_tick_trading() {
        let mut h = harness();
        h.trader.krw_balance = 100_000.0;
        h.trader.handle_command(Command::Pause).await;
        for price in [105.0, 104.0, 103.0, 102.0, 101.0, 100.0] {
            h.trader.handle_tick(&Tick::trade("KRW-ETH", price)).await;
        }
        assert!(drain_orders(&mut h.order_rx).is_empty());

        // Responses still correlate while paused.
        h.trader.request_startup_balances().await;
        let requests = drain_orders(&mut h.order_rx);
        assert_eq!(requests.len(), 3);
    }

    #[tokio::test]
    async fn accepted_order_is_tracked_and_notified() {
        let mut h = harness();
        install_buy_order(&mut h, "aaaabbbb-cccc").await;

        assert!(h.trader.pending_orders.contains_key("aaaabbbb-cccc"));
        let notes = drain_notify(&mut h.notify_rx);
        assert!(notes.iter().any(|n| n.starts_with("[BUY REQUEST]")));
    }

    #[tokio::test]
    async fn rejection_without_order_id_leaves_no_pending_order() {
        let mut h = harness();
        let request_id = Uuid::new_v4();
        h.trader.pending_requests.insert(
            request_id,
            PendingRequest::BuyOrder {
                symbol: "KRW-ETH".into(),
                price: 100.0,
                volume: 1.0,
                reason: "test".into(),
            },
        );
        h.trader
            .handle_response(ApiResponse {
                request_id,
                payload: Err("insufficient funds".into()),
            })
            .await;

        assert!(h.trader.pending_orders.is_empty());
        let notes = drain_notify(&mut h.notify_rx);
        assert!(notes.iter().any(|n| n.starts_with("[BUY ERROR]")));
    }

    #[tokio::test]
    async fn done_status_dispatches_fill_and_refreshes_balances() {
        let mut h = harness();
        install_buy_order(&mut h, "order-1").await;
        drain_notify(&mut h.notify_rx);

        let request_id = Uuid::new_v4();
        h.trader.pending_requests.insert(
            request_id,
            PendingRequest::OrderStatus {
                order_id: "order-1".into(),
            },
        );
        h.trader
            .handle_response(ApiResponse {
                request_id,
                payload: Ok(ApiPayload::OrderStatus(OrderStatusInfo {
                    order_id: "order-1".into(),
                    state: OrderState::Done,
                    volume: 2.0,
                    remaining_volume: 0.0,
                    trades: vec![
                        OrderTrade { price: 99.0, volume: 1.0 },
                        OrderTrade { price: 101.0, volume: 1.0 },
                    ],
                })),
            })
            .await;

        // Fill went to the strategy at the volume-weighted price.
        assert!(h.trader.pending_orders.is_empty());
        let record = h.db_rx.try_recv().expect("trade log record");
        assert_eq!(record.side, "BUY");
        assert!((record.price - 100.0).abs() < 1e-9);
        assert!((record.volume - 2.0).abs() < 1e-9);

        let notes = drain_notify(&mut h.notify_rx);
        assert!(notes.iter().any(|n| n.starts_with("[FILL]")));

        // Balance refresh: one KRW + one coin query.
        let requests = drain_orders(&mut h.order_rx);
        assert_eq!(requests.len(), 2);
    }

    #[tokio::test]
    async fn timed_out_order_is_cancelled_exactly_once_without_a_fill() {
        let mut h = harness();
        install_buy_order(&mut h, "order-2").await;

        // Age the order past the timeout.
        if let Some(po) = h.trader.pending_orders.get_mut("order-2") {
            po.sent_at = Instant::now() - (Trader::PENDING_TIMEOUT + Duration::from_secs(1));
        }

        h.trader.poll_pending_orders().await;
        let requests = drain_orders(&mut h.order_rx);
        let polls = requests
            .iter()
            .filter(|r| matches!(r.kind, ApiRequestKind::GetOrder { .. }))
            .count();
        let cancels: Vec<&ApiRequest> = requests
            .iter()
            .filter(|r| matches!(r.kind, ApiRequestKind::CancelOrder { .. }))
            .collect();
        assert_eq!(polls, 1);
        assert_eq!(cancels.len(), 1);

        // A second pass must not re-request the cancel.
        h.trader.poll_pending_orders().await;
        let again = drain_orders(&mut h.order_rx);
        assert!(again
            .iter()
            .all(|r| !matches!(r.kind, ApiRequestKind::CancelOrder { .. })));

        // Cancel confirmation retires the order; no fill was dispatched.
        let cancel_id = cancels[0].request_id;
        h.trader
            .handle_response(ApiResponse {
                request_id: cancel_id,
                payload: Ok(ApiPayload::Cancelled {
                    order_id: "order-2".into(),
                }),
            })
            .await;
        assert!(h.trader.pending_orders.is_empty());
        assert!(h.db_rx.try_recv().is_err(), "no fill for a cancelled order");
    }

    #[tokio::test]
    async fn wait_status_keeps_polling() {
        let mut h = harness();
        install_buy_order(&mut h, "order-3").await;

        let request_id = Uuid::new_v4();
        h.trader.pending_requests.insert(
            request_id,
            PendingRequest::OrderStatus {
                order_id: "order-3".into(),
            },
        );
        h.trader
            .handle_response(ApiResponse {
                request_id,
                payload: Ok(ApiPayload::OrderStatus(OrderStatusInfo {
                    order_id: "order-3".into(),
                    state: OrderState::Wait,
                    volume: 2.0,
                    remaining_volume: 2.0,
                    trades: vec![],
                })),
            })
            .await;
        assert!(h.trader.pending_orders.contains_key("order-3"));
    }

    #[tokio::test]
    async fn rebind_sells_removed_holdings_and_seeds_added_symbols() {
        let mut h = harness();
        h.trader.coin_balances.insert("KRW-ETH".into(), 0.5);
        h.trader.last_prices.insert("KRW-ETH".into(), 3_000_000.0);

        h.trader
            .rebind_symbols(vec!["KRW-BTC".into(), "KRW-XRP".into()])
            .await;

        let requests = drain_orders(&mut h.order_rx);
        let sells: Vec<&ApiRequest> = requests
            .iter()
            .filter(|r| {
                matches!(
                    r.kind,
                    ApiRequestKind::PlaceOrder { side: OrderSide::Sell, .. }
                )
            })
            .collect();
        assert_eq!(sells.len(), 1, "exactly one symbol_removed sell");
        match &sells[0].kind {
            ApiRequestKind::PlaceOrder { market, volume, .. } => {
                assert_eq!(market, "KRW-ETH");
                assert!((volume - 0.5).abs() < 1e-9);
            }
            _ => unreachable!(),
        }
        match h.trader.pending_requests.get(&sells[0].request_id) {
            Some(PendingRequest::SellOrder { reason, .. }) => {
                assert_eq!(reason, "symbol_removed");
            }
            other => panic!("unexpected correlation: {other:?}"),
        }

        let balance_queries = requests
            .iter()
            .filter(|r| {
                matches!(&r.kind, ApiRequestKind::GetBalance { ticker } if ticker == "KRW-XRP")
            })
            .count();
        assert_eq!(balance_queries, 1, "exactly one balance query per added symbol");

        assert!(h.trader.risk_managers.contains_key("KRW-XRP"));
        assert!(!h.trader.risk_managers.contains_key("KRW-ETH"));
        assert!(!h.trader.coin_balances.contains_key("KRW-ETH"));

        let notes = drain_notify(&mut h.notify_rx);
        assert!(notes.iter().any(|n| n.starts_with("[AUTO SELL]")));
        assert!(notes.iter().any(|n| n.starts_with("[SYMBOLS]")));
    }

    #[tokio::test]
    async fn rebind_without_holdings_emits_no_sell() {
        let mut h = harness();
        h.trader.rebind_symbols(vec!["KRW-BTC".into()]).await;
        let requests = drain_orders(&mut h.order_rx);
        assert!(requests
            .iter()
            .all(|r| !matches!(r.kind, ApiRequestKind::PlaceOrder { .. })));
    }

    #[tokio::test]
    async fn zero_volume_sell_is_skipped() {
        let mut h = harness();
        let signal = Signal::sell(100.0, None, "exit");
        h.trader.submit_sell("KRW-ETH", 100.0, &signal).await;
        assert!(drain_orders(&mut h.order_rx).is_empty());
    }
}

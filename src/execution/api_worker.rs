use crate::execution::rate_limiter::{RateClass, RateLimiter};
use crate::execution::upbit_client::UpbitClient;
use crate::models::order::{ApiPayload, ApiRequest, ApiRequestKind, ApiResponse};
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};

/// Serializes typed exchange requests under the per-endpoint token
/// buckets and emits typed responses keyed by request id.
///
/// Every error is converted into a response that still carries the
/// request id, so the trader can always retire its correlation.
pub struct ApiWorker {
    client: UpbitClient,
    limiter: RateLimiter,
}

impl ApiWorker {
    pub fn new(client: UpbitClient) -> Self {
        Self {
            client,
            limiter: RateLimiter::new(),
        }
    }

    pub fn start(
        self,
        mut order_rx: mpsc::Receiver<ApiRequest>,
        resp_tx: mpsc::Sender<ApiResponse>,
        notify_tx: mpsc::Sender<String>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        tokio::spawn(async move {
            info!("APIWorker started");
            loop {
                let request = tokio::select! {
                    req = order_rx.recv() => match req {
                        Some(req) => req,
                        None => break,
                    },
                    _ = shutdown.recv() => break,
                };

                let response = self.handle(request).await;
                if let Err(message) = &response.payload {
                    warn!("API error ({}): {message}", response.request_id);
                    let _ = notify_tx.send(format!("[ERROR] API: {message}")).await;
                }
                if resp_tx.send(response).await.is_err() {
                    break;
                }
            }
            info!("APIWorker stopped");
        });
    }

    fn rate_class(kind: &ApiRequestKind) -> RateClass {
        match kind {
            ApiRequestKind::GetBalance { .. } => RateClass::Account,
            ApiRequestKind::PlaceOrder { .. } => RateClass::Order,
            ApiRequestKind::GetOrder { .. } => RateClass::Order,
            ApiRequestKind::CancelOrder { .. } => RateClass::Cancel,
        }
    }

    async fn handle(&self, request: ApiRequest) -> ApiResponse {
        let class = Self::rate_class(&request.kind);
        if !self.limiter.acquire(class, 1.0).await {
            return ApiResponse {
                request_id: request.request_id,
                payload: Err(format!("rate limit timeout ({class:?})")),
            };
        }

        let payload = match request.kind {
            ApiRequestKind::GetBalance { ticker } => self
                .client
                .get_balance(&ticker)
                .await
                .map(ApiPayload::Balance),
            ApiRequestKind::PlaceOrder {
                market,
                side,
                ord_type,
                volume,
            } => self
                .client
                .place_order(&market, side, ord_type, volume)
                .await
                .map(|order_id| ApiPayload::OrderAck { order_id }),
            ApiRequestKind::GetOrder { order_id } => self
                .client
                .get_order(&order_id)
                .await
                .map(ApiPayload::OrderStatus),
            ApiRequestKind::CancelOrder { order_id } => self
                .client
                .cancel_order(&order_id)
                .await
                .map(|order_id| ApiPayload::Cancelled { order_id }),
        };

        ApiResponse {
            request_id: request.request_id,
            payload: payload.map_err(|e| e.to_string()),
        }
    }
}

use crate::config::UpbitConfig;
use crate::models::order::{OrdType, OrderSide, OrderState, OrderStatusInfo, OrderTrade};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::{Digest, Sha256, Sha512};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum UpbitError {
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("exchange rejected request: {0}")]
    Rejected(String),
    #[error("unexpected response: {0}")]
    Malformed(String),
}

/// Typed Upbit REST binding.
///
/// Private endpoints are signed with a JWT (HS256) whose payload carries a
/// SHA-512 hash of the url-encoded request parameters.
pub struct UpbitClient {
    access_key: String,
    secret_key: String,
    base_url: String,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct AccountEntry {
    currency: String,
    balance: String,
}

#[derive(Debug, Deserialize)]
struct OrderAckRaw {
    uuid: Option<String>,
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct OrderRaw {
    uuid: String,
    state: OrderState,
    volume: Option<String>,
    remaining_volume: Option<String>,
    trades: Option<Vec<OrderTradeRaw>>,
}

#[derive(Debug, Deserialize)]
struct OrderTradeRaw {
    price: String,
    volume: String,
}

fn parse_num(value: &Option<String>) -> f64 {
    value
        .as_deref()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0.0)
}

impl UpbitClient {
    pub fn new(config: &UpbitConfig) -> Result<Self, UpbitError> {
        if config.access_key.is_empty() || config.secret_key.is_empty() {
            return Err(UpbitError::Auth(
                "UPBIT_ACCESS_KEY / UPBIT_SECRET_KEY not set".into(),
            ));
        }
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()?;
        Ok(Self {
            access_key: config.access_key.clone(),
            secret_key: config.secret_key.clone(),
            base_url: config.rest_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    /// Url-encoded query string over the given params, in the order given.
    fn query_string(params: &[(&str, String)]) -> String {
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        for (key, value) in params {
            serializer.append_pair(key, value);
        }
        serializer.finish()
    }

    /// JWT for a private call; `query` must match the request parameters.
    fn auth_token(&self, query: Option<&str>) -> Result<String, UpbitError> {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);

        let mut payload = serde_json::json!({
            "access_key": self.access_key,
            "nonce": Uuid::new_v4().to_string(),
        });
        if let Some(query) = query {
            let hash = Sha512::digest(query.as_bytes());
            payload["query_hash"] = serde_json::Value::String(hex::encode(hash));
            payload["query_hash_alg"] = serde_json::Value::String("SHA512".into());
        }
        let payload = URL_SAFE_NO_PAD.encode(payload.to_string().as_bytes());

        let signing_input = format!("{header}.{payload}");
        let mut mac = Hmac::<Sha256>::new_from_slice(self.secret_key.as_bytes())
            .map_err(|e| UpbitError::Auth(e.to_string()))?;
        mac.update(signing_input.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        Ok(format!("{signing_input}.{signature}"))
    }

    /// Balance for a ticker ("KRW" or a market like "KRW-BTC").
    pub async fn get_balance(&self, ticker: &str) -> Result<f64, UpbitError> {
        let currency = ticker.strip_prefix("KRW-").unwrap_or(ticker);
        let token = self.auth_token(None)?;

        let resp = self
            .http
            .get(format!("{}/v1/accounts", self.base_url))
            .bearer_auth(token)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(UpbitError::Rejected(resp.text().await.unwrap_or_default()));
        }

        let accounts: Vec<AccountEntry> = resp.json().await?;
        Ok(accounts
            .iter()
            .find(|a| a.currency == currency)
            .and_then(|a| a.balance.parse().ok())
            .unwrap_or(0.0))
    }

    /// Submit an order. A market buy spends a KRW amount (`ord_type=price`);
    /// a market sell moves coin units (`ord_type=market`).
    pub async fn place_order(
        &self,
        market: &str,
        side: OrderSide,
        ord_type: OrdType,
        volume: f64,
    ) -> Result<String, UpbitError> {
        let params: Vec<(&str, String)> = match (side, ord_type) {
            (OrderSide::Buy, OrdType::Market) => vec![
                ("market", market.to_string()),
                ("side", "bid".to_string()),
                ("ord_type", "price".to_string()),
                ("price", volume.to_string()),
            ],
            (OrderSide::Sell, OrdType::Market) => vec![
                ("market", market.to_string()),
                ("side", "ask".to_string()),
                ("ord_type", "market".to_string()),
                ("volume", volume.to_string()),
            ],
            (_, OrdType::Limit) => {
                return Err(UpbitError::Malformed(
                    "limit orders are not used by the trader".into(),
                ))
            }
        };

        let query = Self::query_string(&params);
        let token = self.auth_token(Some(&query))?;
        let body: serde_json::Map<String, serde_json::Value> = params
            .iter()
            .map(|(k, v)| (k.to_string(), serde_json::Value::String(v.clone())))
            .collect();

        let resp = self
            .http
            .post(format!("{}/v1/orders", self.base_url))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;
        let ack: OrderAckRaw = resp.json().await?;
        match ack.uuid {
            Some(uuid) => Ok(uuid),
            None => Err(UpbitError::Rejected(
                ack.error
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "no uuid in order response".into()),
            )),
        }
    }

    pub async fn get_order(&self, order_id: &str) -> Result<OrderStatusInfo, UpbitError> {
        let params = vec![("uuid", order_id.to_string())];
        let query = Self::query_string(&params);
        let token = self.auth_token(Some(&query))?;

        let resp = self
            .http
            .get(format!("{}/v1/order?{}", self.base_url, query))
            .bearer_auth(token)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(UpbitError::Rejected(resp.text().await.unwrap_or_default()));
        }

        let raw: OrderRaw = resp.json().await?;
        Ok(OrderStatusInfo {
            order_id: raw.uuid,
            state: raw.state,
            volume: parse_num(&raw.volume),
            remaining_volume: parse_num(&raw.remaining_volume),
            trades: raw
                .trades
                .unwrap_or_default()
                .into_iter()
                .map(|t| OrderTrade {
                    price: t.price.parse().unwrap_or(0.0),
                    volume: t.volume.parse().unwrap_or(0.0),
                })
                .collect(),
        })
    }

    /// Minute-candle closes, oldest first. Used to warm strategy
    /// indicators before live ticks take over.
    pub async fn get_minute_closes(
        &self,
        market: &str,
        unit: u32,
        count: u32,
    ) -> Result<Vec<f64>, UpbitError> {
        #[derive(Deserialize)]
        struct CandleRaw {
            trade_price: f64,
        }

        let url = format!(
            "{}/v1/candles/minutes/{unit}?market={market}&count={count}",
            self.base_url
        );
        let resp = self.http.get(&url).send().await?;
        if !resp.status().is_success() {
            return Err(UpbitError::Rejected(resp.text().await.unwrap_or_default()));
        }

        // The exchange returns newest first.
        let mut candles: Vec<CandleRaw> = resp.json().await?;
        candles.reverse();
        Ok(candles.into_iter().map(|c| c.trade_price).collect())
    }

    pub async fn cancel_order(&self, order_id: &str) -> Result<String, UpbitError> {
        let params = vec![("uuid", order_id.to_string())];
        let query = Self::query_string(&params);
        let token = self.auth_token(Some(&query))?;

        let resp = self
            .http
            .delete(format!("{}/v1/order?{}", self.base_url, query))
            .bearer_auth(token)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(UpbitError::Rejected(resp.text().await.unwrap_or_default()));
        }

        let ack: OrderAckRaw = resp.json().await?;
        ack.uuid
            .ok_or_else(|| UpbitError::Malformed("no uuid in cancel response".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> UpbitClient {
        UpbitClient::new(&UpbitConfig {
            access_key: "test-access".into(),
            secret_key: "test-secret".into(),
            rest_url: "https://api.upbit.com".into(),
            ws_url: String::new(),
        })
        .unwrap()
    }

    fn decode_payload(token: &str) -> serde_json::Value {
        let parts: Vec<&str> = token.split('.').collect();
        assert_eq!(parts.len(), 3, "JWT must have three segments");
        let bytes = URL_SAFE_NO_PAD.decode(parts[1]).unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn missing_credentials_are_fatal() {
        let err = UpbitClient::new(&UpbitConfig {
            access_key: String::new(),
            secret_key: String::new(),
            rest_url: "https://api.upbit.com".into(),
            ws_url: String::new(),
        });
        assert!(matches!(err, Err(UpbitError::Auth(_))));
    }

    #[test]
    fn token_without_query_omits_query_hash() {
        let token = client().auth_token(None).unwrap();
        let payload = decode_payload(&token);
        assert_eq!(payload["access_key"], "test-access");
        assert!(payload.get("query_hash").is_none());
        assert!(payload["nonce"].as_str().is_some());
    }

    #[test]
    fn token_with_query_carries_sha512_hash() {
        let query = "market=KRW-BTC&side=bid";
        let token = client().auth_token(Some(query)).unwrap();
        let payload = decode_payload(&token);
        assert_eq!(payload["query_hash_alg"], "SHA512");

        let expected = hex::encode(Sha512::digest(query.as_bytes()));
        assert_eq!(payload["query_hash"], expected.as_str());
    }

    #[test]
    fn query_string_preserves_parameter_order() {
        let query = UpbitClient::query_string(&[
            ("market", "KRW-BTC".to_string()),
            ("side", "ask".to_string()),
            ("volume", "0.5".to_string()),
        ]);
        assert_eq!(query, "market=KRW-BTC&side=ask&volume=0.5");
    }

    #[test]
    fn order_raw_decodes_exchange_shapes() {
        let raw: OrderRaw = serde_json::from_str(
            r#"{
                "uuid": "abc",
                "state": "done",
                "volume": "0.001",
                "remaining_volume": "0",
                "trades": [{"price": "50000000", "volume": "0.001", "market": "KRW-BTC"}]
            }"#,
        )
        .unwrap();
        assert_eq!(raw.state, OrderState::Done);
        assert_eq!(parse_num(&raw.volume), 0.001);
        assert_eq!(raw.trades.unwrap().len(), 1);
    }
}

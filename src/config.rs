use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub upbit: UpbitConfig,
    pub telegram: TelegramConfig,
    pub websocket: WebsocketConfig,
    pub signal: SignalConfig,
    pub symbols: SymbolSelectionConfig,
    pub strategy: StrategyConfig,
    pub risk: RiskConfig,
    pub db_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpbitConfig {
    pub access_key: String,
    pub secret_key: String,
    pub rest_url: String,
    pub ws_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub token: Option<String>,
    pub chat_id: Option<i64>,
}

impl TelegramConfig {
    pub fn is_configured(&self) -> bool {
        self.token.is_some() && self.chat_id.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebsocketConfig {
    /// Channel types to subscribe, one connection each ("trade", "orderbook").
    pub channels: Vec<String>,
    pub heartbeat_timeout_secs: u64,
    /// None = retry forever.
    pub max_retries: Option<u32>,
    pub backoff_base_secs: f64,
    pub max_backoff_secs: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalConfig {
    pub ema_fast: usize,
    pub ema_slow: usize,
    pub rsi_period: usize,
    pub rsi_oversold: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolSelectionConfig {
    /// Seed list traded until the first reselection lands.
    pub seed: Vec<String>,
    pub top_n: usize,
    pub refresh_interval_secs: u64,
    /// Floor between two published symbol sets, to avoid flapping.
    pub min_stable_secs: u64,
    pub exclude_warning: bool,
    pub exclude_small_acc: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Scalping,
    MaCross,
    Rsi,
    AdvancedScalping,
}

impl FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scalping" => Ok(StrategyKind::Scalping),
            "ma_cross" => Ok(StrategyKind::MaCross),
            "rsi" => Ok(StrategyKind::Rsi),
            "advanced_scalping" => Ok(StrategyKind::AdvancedScalping),
            other => Err(format!("unknown strategy: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub kind: StrategyKind,
    pub default_params: StrategyParams,
    /// Per-symbol overrides of the default parameter set.
    pub per_symbol: HashMap<String, StrategyParams>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyParams {
    pub window: usize,
    pub take_profit_pct: f64,
    pub stop_loss_pct: f64,
    /// Max allowed best-ask minus best-bid, in KRW. Wider books are skipped.
    pub max_allowed_spread: f64,
    pub fast_period: usize,
    pub slow_period: usize,
    pub rsi_period: usize,
    pub oversold_level: f64,
    pub overbought_level: f64,
    pub trailing_stop_enabled: bool,
    pub trailing_stop_pct: f64,
    pub trailing_activation_pct: f64,
    pub partial_close_enabled: bool,
    pub partial_close_levels: Vec<f64>,
    pub partial_close_ratios: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    pub max_position_krw: HashMap<String, f64>,
    pub default_max_position_krw: f64,
    pub max_total_position_krw: f64,
    pub max_concurrent_positions: usize,
    pub daily_loss_limit_krw: f64,
    /// Ceiling on coin value over total assets; buys above it are rejected.
    pub max_coin_ratio: f64,
}

impl Default for StrategyParams {
    fn default() -> Self {
        Self {
            window: 5,
            take_profit_pct: 0.5,
            stop_loss_pct: 1.0,
            max_allowed_spread: 1000.0,
            fast_period: 5,
            slow_period: 20,
            rsi_period: 14,
            oversold_level: 30.0,
            overbought_level: 70.0,
            trailing_stop_enabled: false,
            trailing_stop_pct: 1.0,
            trailing_activation_pct: 0.5,
            partial_close_enabled: false,
            partial_close_levels: vec![0.5, 1.0, 1.5],
            partial_close_ratios: vec![0.3, 0.3, 0.4],
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let mut per_symbol = HashMap::new();
        per_symbol.insert(
            "KRW-BTC".to_string(),
            StrategyParams {
                window: 7,
                take_profit_pct: 0.3,
                stop_loss_pct: 0.8,
                fast_period: 5,
                slow_period: 20,
                rsi_period: 14,
                oversold_level: 30.0,
                overbought_level: 70.0,
                trailing_stop_enabled: true,
                trailing_stop_pct: 1.0,
                trailing_activation_pct: 0.5,
                partial_close_enabled: true,
                partial_close_levels: vec![0.5, 1.0, 1.5],
                partial_close_ratios: vec![0.3, 0.3, 0.4],
                ..StrategyParams::default()
            },
        );
        per_symbol.insert(
            "KRW-ETH".to_string(),
            StrategyParams {
                window: 5,
                take_profit_pct: 0.4,
                stop_loss_pct: 1.0,
                fast_period: 3,
                slow_period: 15,
                rsi_period: 12,
                oversold_level: 25.0,
                overbought_level: 75.0,
                trailing_stop_enabled: false,
                trailing_stop_pct: 1.2,
                trailing_activation_pct: 0.6,
                partial_close_enabled: true,
                partial_close_levels: vec![0.4, 0.8, 1.2],
                partial_close_ratios: vec![0.4, 0.3, 0.3],
                ..StrategyParams::default()
            },
        );

        let mut max_position_krw = HashMap::new();
        max_position_krw.insert("KRW-BTC".to_string(), 200_000.0);
        max_position_krw.insert("KRW-ETH".to_string(), 150_000.0);

        Self {
            upbit: UpbitConfig {
                access_key: String::new(),
                secret_key: String::new(),
                rest_url: "https://api.upbit.com".into(),
                ws_url: "wss://api.upbit.com/websocket/v1".into(),
            },
            telegram: TelegramConfig {
                token: None,
                chat_id: None,
            },
            websocket: WebsocketConfig {
                channels: vec!["trade".into(), "orderbook".into()],
                heartbeat_timeout_secs: 30,
                max_retries: None,
                backoff_base_secs: 1.0,
                max_backoff_secs: 32.0,
            },
            signal: SignalConfig {
                ema_fast: 20,
                ema_slow: 50,
                rsi_period: 14,
                rsi_oversold: 30.0,
            },
            symbols: SymbolSelectionConfig {
                seed: vec!["KRW-BTC".into(), "KRW-ETH".into()],
                top_n: 3,
                refresh_interval_secs: 600,
                min_stable_secs: 600,
                exclude_warning: true,
                exclude_small_acc: true,
            },
            strategy: StrategyConfig {
                kind: StrategyKind::Scalping,
                default_params: StrategyParams::default(),
                per_symbol,
            },
            risk: RiskConfig {
                max_position_krw,
                default_max_position_krw: 100_000.0,
                max_total_position_krw: 500_000.0,
                max_concurrent_positions: 2,
                daily_loss_limit_krw: 50_000.0,
                max_coin_ratio: 0.7,
            },
            db_path: "data/autocoin.db".into(),
        }
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

impl Config {
    /// Load configuration from environment variables (.env file) over the
    /// compiled defaults.
    ///
    /// Recognized env vars:
    ///   UPBIT_ACCESS_KEY / UPBIT_SECRET_KEY - exchange credentials
    ///   TELEGRAM_TOKEN / TELEGRAM_CHAT_ID - notification channel
    ///   SYMBOLS - comma-separated seed list (default: KRW-BTC,KRW-ETH)
    ///   STRATEGY - scalping | ma_cross | rsi | advanced_scalping
    ///   TOP_N_SYMBOLS, MIN_SYMBOL_STABLE_SEC
    ///   EXCLUDE_WARNING, EXCLUDE_SMALL_ACC
    ///   EMA_FAST, EMA_SLOW, RSI_PERIOD, RSI_OVERSOLD
    ///   WEBSOCKET_HEARTBEAT_TIMEOUT, WEBSOCKET_MAX_RETRIES,
    ///   WEBSOCKET_BACKOFF_BASE, WEBSOCKET_MAX_BACKOFF
    ///   MAX_TOTAL_POSITION_KRW, MAX_CONCURRENT_POSITIONS,
    ///   DAILY_LOSS_LIMIT_KRW, MAX_COIN_RATIO
    ///   DB_PATH, RUST_LOG
    pub fn load_or_default() -> Self {
        let _ = dotenv::dotenv();

        let mut config = Self::default();

        if let Ok(key) = std::env::var("UPBIT_ACCESS_KEY") {
            config.upbit.access_key = key;
        }
        if let Ok(key) = std::env::var("UPBIT_SECRET_KEY") {
            config.upbit.secret_key = key;
        }

        if let Ok(token) = std::env::var("TELEGRAM_TOKEN") {
            if !token.is_empty() {
                config.telegram.token = Some(token);
            }
        }
        if let Some(chat_id) = env_parse::<i64>("TELEGRAM_CHAT_ID") {
            config.telegram.chat_id = Some(chat_id);
        }

        if let Ok(list) = std::env::var("SYMBOLS") {
            let seed: Vec<String> = list
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            if !seed.is_empty() {
                config.symbols.seed = seed;
            }
        }
        if let Some(kind) = env_parse::<StrategyKind>("STRATEGY") {
            config.strategy.kind = kind;
        }
        if let Some(n) = env_parse("TOP_N_SYMBOLS") {
            config.symbols.top_n = n;
        }
        if let Some(secs) = env_parse("MIN_SYMBOL_STABLE_SEC") {
            config.symbols.min_stable_secs = secs;
        }
        if let Some(b) = env_parse("EXCLUDE_WARNING") {
            config.symbols.exclude_warning = b;
        }
        if let Some(b) = env_parse("EXCLUDE_SMALL_ACC") {
            config.symbols.exclude_small_acc = b;
        }

        if let Some(v) = env_parse("EMA_FAST") {
            config.signal.ema_fast = v;
        }
        if let Some(v) = env_parse("EMA_SLOW") {
            config.signal.ema_slow = v;
        }
        if let Some(v) = env_parse("RSI_PERIOD") {
            config.signal.rsi_period = v;
        }
        if let Some(v) = env_parse("RSI_OVERSOLD") {
            config.signal.rsi_oversold = v;
        }

        if let Some(v) = env_parse("WEBSOCKET_HEARTBEAT_TIMEOUT") {
            config.websocket.heartbeat_timeout_secs = v;
        }
        if let Some(v) = env_parse::<i64>("WEBSOCKET_MAX_RETRIES") {
            config.websocket.max_retries = if v < 0 { None } else { Some(v as u32) };
        }
        if let Some(v) = env_parse("WEBSOCKET_BACKOFF_BASE") {
            config.websocket.backoff_base_secs = v;
        }
        if let Some(v) = env_parse("WEBSOCKET_MAX_BACKOFF") {
            config.websocket.max_backoff_secs = v;
        }

        if let Some(v) = env_parse("MAX_TOTAL_POSITION_KRW") {
            config.risk.max_total_position_krw = v;
        }
        if let Some(v) = env_parse("MAX_CONCURRENT_POSITIONS") {
            config.risk.max_concurrent_positions = v;
        }
        if let Some(v) = env_parse("DAILY_LOSS_LIMIT_KRW") {
            config.risk.daily_loss_limit_krw = v;
        }
        if let Some(v) = env_parse("MAX_COIN_RATIO") {
            config.risk.max_coin_ratio = v;
        }

        if let Ok(path) = std::env::var("DB_PATH") {
            config.db_path = path;
        }

        config
    }

    /// Merged strategy parameters for a symbol.
    pub fn strategy_params(&self, symbol: &str) -> StrategyParams {
        self.strategy
            .per_symbol
            .get(symbol)
            .cloned()
            .unwrap_or_else(|| self.strategy.default_params.clone())
    }

    /// Per-symbol order-size cap in KRW.
    pub fn max_position_krw(&self, symbol: &str) -> f64 {
        self.risk
            .max_position_krw
            .get(symbol)
            .copied()
            .unwrap_or(self.risk.default_max_position_krw)
    }

    pub fn has_credentials(&self) -> bool {
        !self.upbit.access_key.is_empty() && !self.upbit.secret_key.is_empty()
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.has_credentials(),
            "UPBIT_ACCESS_KEY and UPBIT_SECRET_KEY must be set"
        );
        anyhow::ensure!(
            self.risk.max_coin_ratio > 0.0 && self.risk.max_coin_ratio <= 1.0,
            "max_coin_ratio must be in (0, 1]"
        );
        anyhow::ensure!(self.symbols.top_n > 0, "TOP_N_SYMBOLS must be positive");
        for (symbol, params) in &self.strategy.per_symbol {
            anyhow::ensure!(
                params.partial_close_levels.len() == params.partial_close_ratios.len(),
                "{symbol}: partial_close_levels and partial_close_ratios lengths differ"
            );
            if params.partial_close_enabled {
                let total: f64 = params.partial_close_ratios.iter().sum();
                anyhow::ensure!(
                    (total - 1.0).abs() < 0.01,
                    "{symbol}: partial_close_ratios must sum to 1.0, got {total}"
                );
            }
        }
        Ok(())
    }
}

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalAction {
    None,
    Buy,
    Sell,
}

/// Outcome of one strategy evaluation against one tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub action: SignalAction,
    pub price: Option<f64>,
    /// Set for partial closes; a full-position sell leaves it to the trader.
    pub volume: Option<f64>,
    pub reason: Option<String>,
}

impl Signal {
    pub fn none() -> Self {
        Self {
            action: SignalAction::None,
            price: None,
            volume: None,
            reason: None,
        }
    }

    pub fn hold(reason: impl Into<String>) -> Self {
        Self {
            action: SignalAction::None,
            price: None,
            volume: None,
            reason: Some(reason.into()),
        }
    }

    pub fn buy(price: f64, reason: impl Into<String>) -> Self {
        Self {
            action: SignalAction::Buy,
            price: Some(price),
            volume: None,
            reason: Some(reason.into()),
        }
    }

    pub fn sell(price: f64, volume: Option<f64>, reason: impl Into<String>) -> Self {
        Self {
            action: SignalAction::Sell,
            price: Some(price),
            volume,
            reason: Some(reason.into()),
        }
    }

    pub fn is_none(&self) -> bool {
        self.action == SignalAction::None
    }
}

/// Out-of-band control messages entering over the command channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    Pause,
    Resume,
    Shutdown,
    PortfolioStatus,
    StrategyPerformance,
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionKind {
    None,
    Long,
    // Short is reserved; nothing produces it today.
    Short,
}

/// Per-symbol position bookkeeping shared by every strategy variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub kind: PositionKind,
    pub entry_price: f64,
    pub volume: f64,
    pub entry_ts: Option<DateTime<Utc>>,
    pub unrealized_pnl: f64,
    pub realized_pnl: f64,
}

impl Position {
    pub fn flat(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            kind: PositionKind::None,
            entry_price: 0.0,
            volume: 0.0,
            entry_ts: None,
            unrealized_pnl: 0.0,
            realized_pnl: 0.0,
        }
    }

    pub fn is_long(&self) -> bool {
        self.kind == PositionKind::Long
    }

    /// Reset to flat while keeping the realized pnl tally.
    pub fn close(&mut self) {
        self.kind = PositionKind::None;
        self.entry_price = 0.0;
        self.volume = 0.0;
        self.entry_ts = None;
        self.unrealized_pnl = 0.0;
    }
}

/// One slice of a position opened for staged profit taking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartialSlice {
    pub volume: f64,
    pub entry_price: f64,
    pub entry_ts: DateTime<Utc>,
    pub closed: bool,
    pub close_price: f64,
    pub close_ts: Option<DateTime<Utc>>,
}

impl PartialSlice {
    pub fn open(volume: f64, entry_price: f64) -> Self {
        Self {
            volume,
            entry_price,
            entry_ts: Utc::now(),
            closed: false,
            close_price: 0.0,
            close_ts: None,
        }
    }
}

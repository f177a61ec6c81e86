use crate::models::order::TradeRecord;
use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info};

/// Append-only SQLite trade log, one row per confirmed fill.
pub struct TradeLogWriter {
    conn: Connection,
}

impl TradeLogWriter {
    pub fn open(path: &str) -> Result<Self> {
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).context("create trade log directory")?;
            }
        }
        let conn = Connection::open(path).context("open trade log db")?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.execute(
            "CREATE TABLE IF NOT EXISTS trade_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                side TEXT NOT NULL,
                symbol TEXT NOT NULL,
                price REAL NOT NULL,
                volume REAL NOT NULL
            )",
            [],
        )?;
        Ok(Self { conn })
    }

    pub fn insert(&self, record: &TradeRecord) -> Result<()> {
        self.conn.execute(
            "INSERT INTO trade_log (timestamp, side, symbol, price, volume)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.ts_iso_utc,
                record.side,
                record.symbol,
                record.price,
                record.volume
            ],
        )?;
        Ok(())
    }

    pub fn count(&self) -> Result<i64> {
        let n = self
            .conn
            .query_row("SELECT COUNT(*) FROM trade_log", [], |row| row.get(0))?;
        Ok(n)
    }

    /// Consume the db channel until shutdown.
    pub fn start(
        self,
        mut db_rx: mpsc::Receiver<TradeRecord>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        tokio::spawn(async move {
            info!("TradeLogWriter started");
            loop {
                tokio::select! {
                    record = db_rx.recv() => match record {
                        Some(record) => {
                            if let Err(e) = self.insert(&record) {
                                error!("Trade log write failed: {e}");
                            }
                        }
                        None => break,
                    },
                    _ = shutdown.recv() => break,
                }
            }
            info!("TradeLogWriter stopped");
        });
    }
}

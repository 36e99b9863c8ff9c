// ===============================
// src/storage.rs (SQLite sink)
// ===============================
//
// WAL-mode SQLite backing both write paths:
// - raw_trades : append-only, nullable columns + original payload text
// - bars_1m    : one row per (code, bucket_ms), upsert overwrites all fields
//
use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection};
use tracing::info;

use crate::domain::{Bar, RawTrade};
use crate::sink::{Sink, SinkError};

pub struct SqliteStore {
    conn: Connection,
}

fn init_schema(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS raw_trades (
            id       INTEGER PRIMARY KEY AUTOINCREMENT,
            code     TEXT,
            trade_ms INTEGER,
            side     TEXT,
            price    REAL,
            volume   REAL,
            raw      TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_raw_code_ms ON raw_trades(code, trade_ms)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS bars_1m (
            code           TEXT NOT NULL,
            bucket_ms      INTEGER NOT NULL,
            o              REAL NOT NULL,
            h              REAL NOT NULL,
            l              REAL NOT NULL,
            c              REAL NOT NULL,
            v              REAL NOT NULL,
            trade_count    INTEGER NOT NULL,
            first_trade_ms INTEGER NOT NULL,
            last_trade_ms  INTEGER NOT NULL,
            updated_ms     INTEGER NOT NULL,
            PRIMARY KEY (code, bucket_ms)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_bars_bucket ON bars_1m(bucket_ms)",
        [],
    )?;
    Ok(())
}

impl SqliteStore {
    /// Open (or create) the database. Failure here is fatal to the worker —
    /// main aborts before any feed task starts.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, SinkError> {
        if let Some(parent) = db_path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(&db_path)?;
        init_schema(&conn)?;
        info!(path = %db_path.as_ref().display(), "sqlite store ready (WAL)");
        Ok(Self { conn })
    }

    fn insert_raw(&self, raw: &RawTrade) -> Result<(), SinkError> {
        self.conn.execute(
            "INSERT INTO raw_trades (code, trade_ms, side, price, volume, raw)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                raw.code,
                raw.trade_ms,
                raw.side,
                raw.price,
                raw.volume,
                raw.payload,
            ],
        )?;
        Ok(())
    }

    fn upsert(&self, bar: &Bar) -> Result<(), SinkError> {
        self.conn.execute(
            "INSERT INTO bars_1m
               (code, bucket_ms, o, h, l, c, v, trade_count,
                first_trade_ms, last_trade_ms, updated_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(code, bucket_ms) DO UPDATE SET
               o              = excluded.o,
               h              = excluded.h,
               l              = excluded.l,
               c              = excluded.c,
               v              = excluded.v,
               trade_count    = excluded.trade_count,
               first_trade_ms = excluded.first_trade_ms,
               last_trade_ms  = excluded.last_trade_ms,
               updated_ms     = excluded.updated_ms",
            params![
                bar.code,
                bar.bucket_ms,
                bar.open,
                bar.high,
                bar.low,
                bar.close,
                bar.volume,
                bar.trade_count,
                bar.first_trade_ms,
                bar.last_trade_ms,
                Utc::now().timestamp_millis(),
            ],
        )?;
        Ok(())
    }
}

#[async_trait]
impl Sink for SqliteStore {
    async fn insert_raw_trade(&mut self, raw: &RawTrade) -> Result<(), SinkError> {
        self.insert_raw(raw)
    }

    async fn upsert_bar(&mut self, bar: &Bar) -> Result<(), SinkError> {
        self.upsert(bar)
    }
}

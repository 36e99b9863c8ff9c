// ===============================
// src/sink.rs (persistence boundary)
// ===============================
//
// The ingest driver writes through this trait only; the aggregator itself
// never sees it. Two write paths: raw trades (every decoded event) and
// finalized 1m bars (rollover / shutdown flush).
//
use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{Bar, RawTrade};

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("database error: {0}")]
    Database(String),
}

impl From<rusqlite::Error> for SinkError {
    fn from(err: rusqlite::Error) -> Self {
        SinkError::Database(err.to_string())
    }
}

#[async_trait]
pub trait Sink: Send {
    /// Append one decoded trade, validated or not. Missing fields are
    /// stored as NULLs alongside the original payload.
    async fn insert_raw_trade(&mut self, raw: &RawTrade) -> Result<(), SinkError>;

    /// Idempotent upsert keyed by (code, bucket_ms): re-delivery of the
    /// same key overwrites every value column.
    async fn upsert_bar(&mut self, bar: &Bar) -> Result<(), SinkError>;
}

// ===============================
// src/domain.rs
// ===============================
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Taker side as reported by the exchange (`ab` field). Informational only —
/// bar math never looks at it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side { Ask, Bid }

impl Side {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ASK" => Some(Side::Ask),
            "BID" => Some(Side::Bid),
            _ => None,
        }
    }
}

/// Decoded wire message, pre-validation. Every field may be missing; the
/// original payload text is kept for the raw_trades table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawTrade {
    pub code: Option<String>,
    pub trade_ms: Option<i64>,
    pub price: Option<f64>,
    pub volume: Option<f64>,
    pub side: Option<String>,
    pub payload: String,
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("missing instrument code")]
    MissingCode,
    #[error("missing trade timestamp")]
    MissingTimestamp,
    #[error("missing price")]
    MissingPrice,
    #[error("missing volume")]
    MissingVolume,
    #[error("price not positive finite: {0}")]
    BadPrice(f64),
    #[error("volume not positive finite: {0}")]
    BadVolume(f64),
}

/// Validated trade. Immutable once built — the aggregator only ever sees
/// these, never a RawTrade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeEvent {
    pub code: String,
    pub trade_ms: i64,
    pub price: f64,
    pub volume: f64,
    pub side: Option<Side>,
}

impl TradeEvent {
    pub fn from_raw(raw: &RawTrade) -> Result<Self, ValidationError> {
        let code = match raw.code.as_deref().map(str::trim) {
            Some(c) if !c.is_empty() => c.to_string(),
            _ => return Err(ValidationError::MissingCode),
        };
        let trade_ms = raw.trade_ms.ok_or(ValidationError::MissingTimestamp)?;
        let price = raw.price.ok_or(ValidationError::MissingPrice)?;
        let volume = raw.volume.ok_or(ValidationError::MissingVolume)?;
        if !price.is_finite() || price <= 0.0 {
            return Err(ValidationError::BadPrice(price));
        }
        if !volume.is_finite() || volume <= 0.0 {
            return Err(ValidationError::BadVolume(volume));
        }
        Ok(Self {
            code,
            trade_ms,
            price,
            volume,
            side: raw.side.as_deref().and_then(Side::parse),
        })
    }
}

/// One 1-minute OHLCV bar. Live while inside the aggregator map, finalized
/// the moment it is handed out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub code: String,
    pub bucket_ms: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub trade_count: u32,
    pub first_trade_ms: i64,
    pub last_trade_ms: i64,
}

/// Recorder envelope (JSONL lines).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event { Trade(TradeEvent), Bar(Bar) }

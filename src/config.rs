// ===============================
// src/config.rs
// ===============================
use std::env;

use dotenvy::dotenv;

use crate::upbit;

/// Sumber trade feed
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FeedMode {
    Mock,
    Upbit,
}

impl FeedMode {
    pub fn from_env(key: &str, default_mode: FeedMode) -> FeedMode {
        match env::var(key).unwrap_or_default().to_ascii_lowercase().as_str() {
            "mock"  => FeedMode::Mock,
            "upbit" => FeedMode::Upbit,
            _ => default_mode,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FeedMode::Mock  => "mock",
            FeedMode::Upbit => "upbit",
        }
    }
}

#[derive(Clone, Debug)]
pub struct Args {
    // instruments
    pub codes: Vec<String>, // multi-code feed/aggregation

    // feed
    pub feed_mode: FeedMode,
    pub upbit_ws_url: String,

    // storage/files/metrics
    pub db_path: String,
    pub record_file: Option<String>,
    pub metrics_port: u16,
}

pub fn load() -> Args {
    // Pastikan .env dibaca (agar CODES, DB_PATH, dll ter-load)
    let _ = dotenv();

    // Multi-code: CODES=KRW-BTC,KRW-ETH
    let codes: Vec<String> = env::var("CODES")
        .ok()
        .map(|s| {
            s.split(',')
                .map(|x| x.trim().to_string())
                .filter(|x| !x.is_empty())
                .collect()
        })
        .filter(|v: &Vec<String>| !v.is_empty())
        .unwrap_or_else(|| vec!["KRW-BTC".to_string()]);

    let feed_mode = FeedMode::from_env("FEED_MODE", FeedMode::Mock);
    let upbit_ws_url = env::var("UPBIT_WS_URL")
        .unwrap_or_else(|_| upbit::DEFAULT_WS_URL.to_string());

    let db_path = env::var("DB_PATH").unwrap_or_else(|_| "data/market.db".to_string());
    let record_file = env::var("RECORD_FILE").ok();
    let metrics_port = env::var("METRICS_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(9898);

    Args {
        codes,
        feed_mode,
        upbit_ws_url,
        db_path,
        record_file,
        metrics_port,
    }
}

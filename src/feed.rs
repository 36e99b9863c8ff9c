// ===============================
// src/feed.rs
// ===============================
//
// Trade feed adapters:
// - run_mock  : random-walk trade generator (~20 trades/s) for local runs
// - run_upbit : Upbit WS trade stream (subscribe + SIMPLE frames)
//
// Both forward RawTrade over a bounded mpsc channel; send().await is the
// backpressure boundary — the feed stalls instead of queueing unboundedly.
//
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use serde_json::json;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{error, info, warn};
use url::Url;

use crate::domain::RawTrade;
use crate::metrics::{TRADES, TRADES_BY_CODE, WS_CONNECTED, WS_RECONNECTS};
use crate::upbit::{self, WsTrade};

/// Mock trade generator (random walk), one task per code.
pub async fn run_mock(tx: mpsc::Sender<RawTrade>, code: String) {
    let mut px: f64 = 100.0;
    loop {
        // jangan simpan ThreadRng melewati .await
        let (step, vol, is_ask) = {
            let mut rng = rand::thread_rng();
            (
                rng.gen_range(-0.05..=0.05),
                rng.gen_range(0.01..1.0),
                rng.gen_bool(0.5),
            )
        };
        px = (px + step).max(1.0);
        let tms = Utc::now().timestamp_millis();
        let side = if is_ask { "ASK" } else { "BID" };
        let payload = json!({
            "ty": "trade", "cd": code, "tp": px, "tv": vol, "ab": side, "tms": tms,
        })
        .to_string();

        let raw = RawTrade {
            code: Some(code.clone()),
            trade_ms: Some(tms),
            price: Some(px),
            volume: Some(vol),
            side: Some(side.to_string()),
            payload,
        };
        if tx.send(raw).await.is_err() {
            info!(%code, "ingest channel closed, mock feed stopping");
            return;
        }
        TRADES.inc();
        TRADES_BY_CODE.with_label_values(&[&code]).inc();
        sleep(Duration::from_millis(50)).await; // ~20 trades/s
    }
}

/// Upbit WS trade stream for a list of codes.
///
/// - subscribes with SIMPLE format (fields cd/tp/tv/tms/ab)
/// - frames usually arrive as binary JSON -> decode utf-8 first
/// - reconnects forever with exponential backoff + jitter
pub async fn run_upbit(tx: mpsc::Sender<RawTrade>, codes: Vec<String>, ws_url: String) {
    let codes = upbit::normalize_codes(&codes);
    if codes.is_empty() {
        error!("no codes configured, upbit feed not started");
        return;
    }

    let mut attempt: u32 = 0;
    loop {
        if Url::parse(&ws_url).is_err() {
            error!(%ws_url, "bad ws url");
            return;
        }

        info!(%ws_url, ?codes, "connecting upbit trade stream");
        match connect_async(ws_url.as_str()).await {
            Ok((mut ws, _resp)) => {
                if let Err(e) = ws.send(Message::Text(upbit::subscribe_payload(&codes))).await {
                    error!(?e, "subscribe send failed");
                } else {
                    info!(?codes, "subscribed trade");
                    WS_CONNECTED.set(1);
                    attempt = 0; // reset backoff

                    while let Some(frame) = ws.next().await {
                        match frame {
                            Ok(m) => {
                                let txt = match m {
                                    Message::Text(t) => t,
                                    Message::Binary(buf) => match String::from_utf8(buf) {
                                        Ok(t) => t,
                                        Err(e) => {
                                            warn!(?e, "non-utf8 binary frame");
                                            continue;
                                        }
                                    },
                                    // ping/pong/close handled by tungstenite
                                    _ => continue,
                                };
                                let msg: WsTrade = match serde_json::from_str(&txt) {
                                    Ok(m) => m,
                                    Err(e) => {
                                        warn!(?e, "frame decode failed, skip");
                                        continue;
                                    }
                                };
                                let raw = msg.into_raw(txt);
                                let code_label =
                                    raw.code.clone().unwrap_or_else(|| "?".to_string());
                                if tx.send(raw).await.is_err() {
                                    info!("ingest channel closed, upbit feed stopping");
                                    WS_CONNECTED.set(0);
                                    return;
                                }
                                TRADES.inc();
                                TRADES_BY_CODE.with_label_values(&[&code_label]).inc();
                            }
                            Err(e) => {
                                error!(?e, "ws read error");
                                break;
                            }
                        }
                    }
                    info!("trade stream disconnected, will reconnect…");
                }
                WS_CONNECTED.set(0);
            }
            Err(e) => {
                error!(?e, "connect failed");
            }
        }

        // Exponential backoff + jitter
        WS_RECONNECTS.inc();
        attempt = attempt.saturating_add(1);
        let shift = attempt.min(6) as u32;           // 0..=6
        let factor = 1u64 << shift;                  // 1,2,4,...,64
        let base_ms = 500u64.saturating_mul(factor); // 0.5s..32s
        let jitter = rand::thread_rng().gen_range(0..=250);
        sleep(Duration::from_millis(base_ms + jitter)).await;
    }
}

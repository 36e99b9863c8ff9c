// ===============================
// src/upbit.rs
// ===============================
//
// Minimal models for the Upbit public WebSocket trade stream.
// SIMPLE format field names: cd(code), tp(trade price), tv(trade volume),
// tms(trade ms), ab(ASK/BID).
//
use serde::Deserialize;
use serde_json::json;

use crate::domain::RawTrade;

pub const DEFAULT_WS_URL: &str = "wss://api.upbit.com/websocket/v1";

#[derive(Debug, Deserialize)]
pub struct WsTrade {
    pub cd: Option<String>,
    pub tp: Option<f64>,
    pub tv: Option<f64>,
    pub tms: Option<i64>,
    pub ab: Option<String>,
}

impl WsTrade {
    pub fn into_raw(self, payload: String) -> RawTrade {
        RawTrade {
            code: self.cd,
            trade_ms: self.tms,
            price: self.tp,
            volume: self.tv,
            side: self.ab,
            payload,
        }
    }
}

/// Trim/uppercase codes, drop empties. "krw-btc" -> "KRW-BTC".
pub fn normalize_codes(codes: &[String]) -> Vec<String> {
    codes
        .iter()
        .map(|c| c.trim().to_ascii_uppercase())
        .filter(|c| !c.is_empty())
        .collect()
}

/// Subscribe message: realtime trade frames only, SIMPLE field names.
pub fn subscribe_payload(codes: &[String]) -> String {
    json!([
        {"ticket": "ohlcv-worker"},
        {"type": "trade", "codes": codes, "isOnlyRealtime": true},
        {"format": "SIMPLE"},
    ])
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_simple_trade_frame() {
        let txt = r#"{"ty":"trade","cd":"KRW-BTC","tp":52000000.0,"tv":0.0012,"ab":"BID","tms":1700000000123}"#;
        let msg: WsTrade = serde_json::from_str(txt).unwrap();
        let raw = msg.into_raw(txt.to_string());
        assert_eq!(raw.code.as_deref(), Some("KRW-BTC"));
        assert_eq!(raw.trade_ms, Some(1_700_000_000_123));
        assert!((raw.price.unwrap() - 52_000_000.0).abs() < 1e-6);
        assert_eq!(raw.side.as_deref(), Some("BID"));
        assert_eq!(raw.payload, txt);
    }

    #[test]
    fn missing_fields_survive_decode() {
        let txt = r#"{"ty":"trade","cd":"KRW-BTC"}"#;
        let msg: WsTrade = serde_json::from_str(txt).unwrap();
        let raw = msg.into_raw(txt.to_string());
        assert!(raw.trade_ms.is_none() && raw.price.is_none() && raw.volume.is_none());
    }

    #[test]
    fn normalize_and_subscribe() {
        let codes = normalize_codes(&[" krw-btc ".into(), "".into(), "KRW-ETH".into()]);
        assert_eq!(codes, vec!["KRW-BTC".to_string(), "KRW-ETH".to_string()]);

        let payload = subscribe_payload(&codes);
        let v: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(v[1]["type"], "trade");
        assert_eq!(v[1]["codes"][0], "KRW-BTC");
        assert_eq!(v[2]["format"], "SIMPLE");
    }
}

// ===============================
// src/metrics.rs
// ===============================
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder,
};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;

// Single custom registry (we register everything here)
pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

// -------- Pipeline metrics --------
pub static TRADES: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("trades_total", "decoded trade frames forwarded").unwrap());

pub static TRADES_BY_CODE: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("trades_total_by_code", "decoded trade frames per code"),
        &["code"],
    )
    .unwrap()
});

pub static MALFORMED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "malformed_trades_total",
        "trades rejected by validation (dropped before aggregation)",
    )
    .unwrap()
});

pub static RAW_INSERTS: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("raw_trades_inserted_total", "raw trade rows written").unwrap());

pub static BARS_FLUSHED: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("bars_flushed_total", "finalized 1m bars upserted").unwrap());

pub static BARS_LIVE: Lazy<IntGauge> =
    Lazy::new(|| IntGauge::new("bars_live", "live (unflushed) bars in memory").unwrap());

pub static SINK_ERRORS: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("sink_errors_total", "persistence write failures").unwrap());

// -------- Upbit WS health --------
pub static WS_CONNECTED: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("upbit_ws_connected", "1 if trade stream WS connected, 0 otherwise").unwrap()
});

pub static WS_RECONNECTS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "upbit_ws_reconnects_total",
        "Number of reconnect attempts to the trade stream WS",
    )
    .unwrap()
});

// ---- Config visibility (feed / codes) ----
pub static CONFIG_FEED_MODE: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("config_feed_mode", "feed mode (label: mode)"),
        &["mode"],
    )
    .unwrap()
});

pub static CONFIG_CODE: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("config_code", "configured codes (label: code)"),
        &["code"],
    )
    .unwrap()
});

pub fn init() {
    // Register all metrics to the custom registry
    for m in [
        REGISTRY.register(Box::new(TRADES.clone())),
        REGISTRY.register(Box::new(TRADES_BY_CODE.clone())),
        REGISTRY.register(Box::new(MALFORMED.clone())),
        REGISTRY.register(Box::new(RAW_INSERTS.clone())),
        REGISTRY.register(Box::new(BARS_FLUSHED.clone())),
        REGISTRY.register(Box::new(BARS_LIVE.clone())),
        REGISTRY.register(Box::new(SINK_ERRORS.clone())),
        // WS health
        REGISTRY.register(Box::new(WS_CONNECTED.clone())),
        REGISTRY.register(Box::new(WS_RECONNECTS.clone())),
        // Config visibility
        REGISTRY.register(Box::new(CONFIG_FEED_MODE.clone())),
        REGISTRY.register(Box::new(CONFIG_CODE.clone())),
    ] {
        let _ = m;
    }
}

// Encode all metrics in Prometheus text format
fn encode_metrics() -> Vec<u8> {
    let encoder = TextEncoder::new();
    let families = REGISTRY.gather();
    let mut buf = Vec::new();
    if encoder.encode(&families, &mut buf).is_err() || buf.is_empty() {
        buf.extend_from_slice(b"# no metrics\n");
    }
    buf
}

// Serve one HTTP request (GET / or /metrics) — tiny HTTP 1.1 responder
fn handle_client(mut stream: TcpStream) {
    // Read a bit to consume headers (no full parse)
    let mut _req_buf = [0u8; 1024];
    let _ = stream.read(&mut _req_buf);

    let body = encode_metrics();
    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );

    let _ = stream.write_all(header.as_bytes());
    let _ = stream.write_all(&body);
    let _ = stream.flush();
}

// Run the metrics server in a dedicated OS thread (keeps Tokio runtime clean)
pub async fn serve_metrics(port: u16) {
    thread::spawn(move || {
        let addr = format!("0.0.0.0:{port}");
        let listener = TcpListener::bind(&addr)
            .unwrap_or_else(|e| panic!("metrics bind {} failed: {}", addr, e));
        eprintln!("metrics listening on http://{addr}/ (and /metrics)");

        for conn in listener.incoming() {
            match conn {
                Ok(stream) => handle_client(stream),
                Err(e) => eprintln!("metrics accept error: {}", e),
            }
        }
    });
}

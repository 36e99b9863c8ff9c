// ===============================
// src/main.rs
// ===============================
/*
 cd ohlcv_worker_rust

 # konfigurasi yang aktif
curl -s localhost:9898/metrics | egrep '^config_(feed_mode|code)'

# aktivitas per code & bar flushes
curl -s localhost:9898/metrics | grep '^trades_total_by_code'
curl -s localhost:9898/metrics | grep '^bars_flushed_total'

*/
/*
=============================================================================
Project : ohlcv_worker_rust — tick-to-1m-bar market analytics worker in Rust
Module  : <module_name>.rs
Version : 0.2.0

Summary : Streams Upbit trades (mock/WS), persists every raw trade, folds
          well-formed trades into per-code 1-minute OHLCV bars, upserts
          finalized bars keyed by (code, bucket_ms), flushes live bars on
          shutdown, exposes Prometheus metrics, and records JSONL events.
=============================================================================
*/
mod domain;
mod config;
mod metrics;
mod recorder;
mod upbit;      // wire models + subscribe payload for the trade stream
mod feed;
mod aggregator; // tick -> 1m bar state machine
mod sink;       // persistence boundary (trait + error)
mod storage;    // SQLite sink (raw_trades + bars_1m)
mod ingest;     // single-writer driver: raw persist -> validate -> apply

use tokio::sync::mpsc;
use tracing::{error, info};

use crate::domain::{Event, RawTrade};

#[tokio::main]
async fn main() {
    // ---- Logging ----
    tracing_subscriber::fmt().with_env_filter("info").init();

    // ---- Load config ----
    let args = config::load();

    // ---- Metrics ----
    metrics::init();
    tokio::spawn(metrics::serve_metrics(args.metrics_port));

    // ---- Human-friendly startup info + export config to metrics ----
    info!(
        feed_mode = %args.feed_mode.as_str(),
        codes = ?args.codes,
        db_path = %args.db_path,
        upbit_ws = %args.upbit_ws_url,
        record_file = ?args.record_file,
        "startup config"
    );

    metrics::CONFIG_FEED_MODE
        .with_label_values(&[args.feed_mode.as_str()])
        .set(1);
    for c in &args.codes {
        metrics::CONFIG_CODE.with_label_values(&[c]).set(1);
    }

    // ---- Store (fatal if unreachable: no point running without it) ----
    let store = match storage::SqliteStore::open(&args.db_path) {
        Ok(s) => s,
        Err(e) => {
            error!(?e, path = %args.db_path, "store open failed, aborting");
            std::process::exit(1);
        }
    };

    // ---- Recorder (optional) ----
    let (rec_tx, rec_handle) = if let Some(path) = args.record_file.clone() {
        let (tx, rx) = mpsc::channel::<Event>(8192);
        let handle = tokio::spawn(recorder::run(rx, path));
        (Some(tx), Some(handle))
    } else {
        (None, None)
    };

    // ---- Feed -> ingest bus (bounded; this is the backpressure boundary) ----
    let (raw_tx, raw_rx) = mpsc::channel::<RawTrade>(4096);

    let mut feed_handles = Vec::new();
    match args.feed_mode {
        config::FeedMode::Mock => {
            for code in args.codes.iter().cloned() {
                let tx = raw_tx.clone();
                feed_handles.push(tokio::spawn(feed::run_mock(tx, code)));
            }
        }
        config::FeedMode::Upbit => {
            // one connection carries all codes
            let tx = raw_tx.clone();
            let codes = args.codes.clone();
            let ws_url = args.upbit_ws_url.clone();
            feed_handles.push(tokio::spawn(feed::run_upbit(tx, codes, ws_url)));
        }
    }
    // only feed tasks hold senders now: stopping them closes the channel
    drop(raw_tx);

    // ---- Ingestion driver (owns aggregator + store) ----
    let mut ingest_handle = tokio::spawn(ingest::run(raw_rx, store, rec_tx.clone()));

    // ---- Shutdown: ctrl-c -> stop feeds -> drain -> flush_all -> exit ----
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received, stopping feeds");
            for h in &feed_handles {
                h.abort();
            }
            match (&mut ingest_handle).await {
                Ok(Ok(())) => info!("ingest drained, all live bars flushed"),
                Ok(Err(e)) => error!(?e, "sink failure during final flush"),
                Err(e) => error!(?e, "ingest task panicked"),
            }
        }
        // the driver only returns on its own when persistence is broken
        res = &mut ingest_handle => {
            match res {
                Ok(Err(e)) => error!(?e, "persistence failure, aborting"),
                Ok(Ok(())) => error!("ingest stopped unexpectedly"),
                Err(e) => error!(?e, "ingest task panicked"),
            }
            for h in &feed_handles {
                h.abort();
            }
            std::process::exit(1);
        }
    }

    // let the recorder drain and flush its buffer
    drop(rec_tx);
    if let Some(handle) = rec_handle {
        let _ = handle.await;
    }
}

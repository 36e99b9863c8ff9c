// ===============================
// src/ingest.rs (Ingestion Driver)
// ===============================
//
// Single consumer of the feed channel; sole owner of the aggregator and the
// sink, so apply()/flush_all() are never concurrent. Per event, in order:
//
//   1. persist the raw trade (always, validated or not)
//   2. validate -> TradeEvent, or log + drop (malformed never reaches the
//      aggregator and never ends the stream)
//   3. apply; a finalized bar from a rollover is upserted immediately
//
// Channel close (feeds stopped) drains what's left via flush_all. Sink
// failures are returned to the caller — no retry, no buffering here.
//
use tokio::sync::mpsc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::aggregator::BucketAggregator;
use crate::domain::{Event, RawTrade, TradeEvent};
use crate::metrics::{BARS_FLUSHED, BARS_LIVE, MALFORMED, RAW_INSERTS, SINK_ERRORS};
use crate::sink::{Sink, SinkError};

pub async fn run<S: Sink>(
    mut rx: mpsc::Receiver<RawTrade>,
    mut sink: S,
    rec_tx: Option<mpsc::Sender<Event>>,
) -> Result<(), SinkError> {
    let mut agg = BucketAggregator::new();

    let mut tick = interval(Duration::from_secs(1));
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut trade_count: u64 = 0;

    loop {
        tokio::select! {
            maybe_raw = rx.recv() => {
                match maybe_raw {
                    Some(raw) => {
                        if let Err(e) = sink.insert_raw_trade(&raw).await {
                            SINK_ERRORS.inc();
                            error!(?e, "raw trade insert failed");
                            return Err(e);
                        }
                        RAW_INSERTS.inc();

                        let ev = match TradeEvent::from_raw(&raw) {
                            Ok(ev) => ev,
                            Err(e) => {
                                MALFORMED.inc();
                                warn!(%e, payload = %raw.payload, "malformed trade dropped");
                                continue;
                            }
                        };
                        trade_count += 1;

                        if let Some(tx) = &rec_tx {
                            let _ = tx.try_send(Event::Trade(ev.clone()));
                        }

                        if let Some(bar) = agg.apply(&ev) {
                            if let Some(tx) = &rec_tx {
                                let _ = tx.try_send(Event::Bar(bar.clone()));
                            }
                            if let Err(e) = sink.upsert_bar(&bar).await {
                                SINK_ERRORS.inc();
                                error!(?e, code = %bar.code, bucket_ms = bar.bucket_ms, "bar upsert failed");
                                return Err(e);
                            }
                            BARS_FLUSHED.inc();
                        }
                        BARS_LIVE.set(agg.live_count() as i64);
                    }
                    None => {
                        // feeds stopped: drain every live bar exactly once
                        let bars = agg.flush_all();
                        let n = bars.len();
                        for bar in bars {
                            if let Some(tx) = &rec_tx {
                                let _ = tx.try_send(Event::Bar(bar.clone()));
                            }
                            if let Err(e) = sink.upsert_bar(&bar).await {
                                SINK_ERRORS.inc();
                                error!(?e, code = %bar.code, bucket_ms = bar.bucket_ms, "final bar upsert failed");
                                return Err(e);
                            }
                            BARS_FLUSHED.inc();
                        }
                        BARS_LIVE.set(0);
                        info!(bars = n, "ingest: channel closed, final flush done");
                        return Ok(());
                    }
                }
            }

            _ = tick.tick() => {
                info!(trades = trade_count, live_bars = agg.live_count(), "heartbeat");
                trade_count = 0;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Bar;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct FakeSink {
        raws: Arc<Mutex<Vec<RawTrade>>>,
        bars: Arc<Mutex<Vec<Bar>>>,
        fail_upserts: bool,
    }

    #[async_trait]
    impl Sink for FakeSink {
        async fn insert_raw_trade(&mut self, raw: &RawTrade) -> Result<(), SinkError> {
            self.raws.lock().unwrap().push(raw.clone());
            Ok(())
        }
        async fn upsert_bar(&mut self, bar: &Bar) -> Result<(), SinkError> {
            if self.fail_upserts {
                return Err(SinkError::Database("boom".to_string()));
            }
            self.bars.lock().unwrap().push(bar.clone());
            Ok(())
        }
    }

    fn raw(code: &str, ms: i64, px: f64, vol: f64) -> RawTrade {
        RawTrade {
            code: Some(code.to_string()),
            trade_ms: Some(ms),
            price: Some(px),
            volume: Some(vol),
            side: Some("BID".to_string()),
            payload: "{}".to_string(),
        }
    }

    #[tokio::test]
    async fn persists_validates_rolls_and_flushes() {
        let (tx, rx) = mpsc::channel(16);
        let sink = FakeSink::default();
        let raws = sink.raws.clone();
        let bars = sink.bars.clone();
        let handle = tokio::spawn(run(rx, sink, None));

        tx.send(raw("X", 1_000, 10.0, 1.0)).await.unwrap();
        tx.send(raw("X", 1_500, 12.0, 2.0)).await.unwrap();
        tx.send(raw("X", 2_000, -3.0, 1.0)).await.unwrap(); // malformed, dropped
        tx.send(raw("X", 61_000, 9.0, 1.0)).await.unwrap(); // rollover
        drop(tx);

        handle.await.unwrap().unwrap();

        // every decoded frame lands in raw_trades, malformed included
        assert_eq!(raws.lock().unwrap().len(), 4);

        let bars = bars.lock().unwrap();
        assert_eq!(bars.len(), 2); // rollover bar + shutdown flush
        assert_eq!(bars[0].bucket_ms, 0);
        assert!((bars[0].close - 12.0).abs() < 1e-10);
        assert!((bars[0].volume - 3.0).abs() < 1e-10);
        assert_eq!(bars[0].trade_count, 2);
        assert_eq!(bars[1].bucket_ms, 60_000);
        assert_eq!(bars[1].trade_count, 1);
    }

    #[tokio::test]
    async fn single_trade_flushed_on_shutdown() {
        let (tx, rx) = mpsc::channel(4);
        let sink = FakeSink::default();
        let bars = sink.bars.clone();
        let handle = tokio::spawn(run(rx, sink, None));

        tx.send(raw("KRW-BTC", 1_000, 10.0, 1.0)).await.unwrap();
        drop(tx);
        handle.await.unwrap().unwrap();

        let bars = bars.lock().unwrap();
        assert_eq!(bars.len(), 1);
        let b = &bars[0];
        assert!((b.open - 10.0).abs() < 1e-10);
        assert!((b.close - 10.0).abs() < 1e-10);
        assert_eq!(b.trade_count, 1);
    }

    #[tokio::test]
    async fn sink_failure_propagates() {
        let (tx, rx) = mpsc::channel(4);
        let sink = FakeSink { fail_upserts: true, ..Default::default() };
        let handle = tokio::spawn(run(rx, sink, None));

        tx.send(raw("X", 1_000, 10.0, 1.0)).await.unwrap();
        tx.send(raw("X", 61_000, 11.0, 1.0)).await.unwrap(); // rollover -> upsert fails
        drop(tx);

        let res = handle.await.unwrap();
        assert!(matches!(res, Err(SinkError::Database(_))));
    }
}

// ===============================
// src/aggregator.rs (tick -> 1m bar state machine)
// ===============================
//
// Per-code live bar map. apply() is synchronous and never touches I/O:
// a finalized bar is returned as a value and the caller (ingest driver)
// decides where it goes. Single-writer only — one task owns this struct.
//
use ahash::AHashMap as HashMap;

use crate::domain::{Bar, TradeEvent};

pub const BUCKET_WIDTH_MS: i64 = 60_000;

#[inline]
pub fn bucket_ms(trade_ms: i64) -> i64 {
    (trade_ms / BUCKET_WIDTH_MS) * BUCKET_WIDTH_MS
}

fn seed(ev: &TradeEvent, bucket: i64) -> Bar {
    Bar {
        code: ev.code.clone(),
        bucket_ms: bucket,
        open: ev.price,
        high: ev.price,
        low: ev.price,
        close: ev.price,
        volume: ev.volume,
        trade_count: 1,
        first_trade_ms: ev.trade_ms,
        last_trade_ms: ev.trade_ms,
    }
}

fn absorb(bar: &mut Bar, ev: &TradeEvent) {
    if ev.price > bar.high {
        bar.high = ev.price;
    }
    if ev.price < bar.low {
        bar.low = ev.price;
    }
    // close = last applied, by arrival order — NOT by timestamp order
    bar.close = ev.price;
    bar.volume += ev.volume;
    bar.trade_count += 1;
    if ev.trade_ms < bar.first_trade_ms {
        bar.first_trade_ms = ev.trade_ms;
    }
    if ev.trade_ms > bar.last_trade_ms {
        bar.last_trade_ms = ev.trade_ms;
    }
}

/// Owns all live bar state; at most one live bar per code.
#[derive(Debug, Default)]
pub struct BucketAggregator {
    bars: HashMap<String, Bar>,
}

impl BucketAggregator {
    pub fn new() -> Self {
        Self { bars: HashMap::new() }
    }

    /// Fold one trade in. Returns the finalized previous bar when the trade
    /// opens a different bucket for its code (rollover), otherwise None.
    /// A bucket older than the live one rolls over the same way — flushed
    /// bars are never reopened.
    pub fn apply(&mut self, ev: &TradeEvent) -> Option<Bar> {
        let bucket = bucket_ms(ev.trade_ms);

        if let Some(cur) = self.bars.get_mut(&ev.code) {
            if cur.bucket_ms == bucket {
                absorb(cur, ev);
                return None;
            }
        }

        // first trade for this code, or rollover: the displaced live bar
        // (if any) comes back finalized
        self.bars.insert(ev.code.clone(), seed(ev, bucket))
    }

    /// Drain every live bar exactly once and clear the map. Order across
    /// codes is unspecified. Second call in a row yields nothing.
    pub fn flush_all(&mut self) -> Vec<Bar> {
        self.bars.drain().map(|(_, bar)| bar).collect()
    }

    pub fn live_count(&self) -> usize {
        self.bars.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Side;

    fn trade(code: &str, ms: i64, px: f64, vol: f64) -> TradeEvent {
        TradeEvent {
            code: code.to_string(),
            trade_ms: ms,
            price: px,
            volume: vol,
            side: Some(Side::Bid),
        }
    }

    #[test]
    fn first_trade_seeds_bar() {
        let mut agg = BucketAggregator::new();
        assert!(agg.apply(&trade("KRW-BTC", 1_000, 10.0, 1.0)).is_none());
        assert_eq!(agg.live_count(), 1);

        let bars = agg.flush_all();
        assert_eq!(bars.len(), 1);
        let b = &bars[0];
        assert_eq!(b.bucket_ms, 0);
        assert!((b.open - 10.0).abs() < 1e-10);
        assert!((b.high - 10.0).abs() < 1e-10);
        assert!((b.low - 10.0).abs() < 1e-10);
        assert!((b.close - 10.0).abs() < 1e-10);
        assert!((b.volume - 1.0).abs() < 1e-10);
        assert_eq!(b.trade_count, 1);
        assert_eq!(b.first_trade_ms, 1_000);
        assert_eq!(b.last_trade_ms, 1_000);
    }

    #[test]
    fn same_bucket_accumulates() {
        let mut agg = BucketAggregator::new();
        agg.apply(&trade("KRW-BTC", 10_000, 50_000.0, 0.1));
        agg.apply(&trade("KRW-BTC", 20_000, 50_005.0, 0.2));
        agg.apply(&trade("KRW-BTC", 30_000, 49_995.0, 0.1));
        agg.apply(&trade("KRW-BTC", 50_000, 50_001.0, 0.1));

        let bars = agg.flush_all();
        assert_eq!(bars.len(), 1);
        let b = &bars[0];
        assert!((b.open - 50_000.0).abs() < 1e-10);
        assert!((b.high - 50_005.0).abs() < 1e-10);
        assert!((b.low - 49_995.0).abs() < 1e-10);
        assert!((b.close - 50_001.0).abs() < 1e-10);
        assert!((b.volume - 0.5).abs() < 1e-10);
        assert_eq!(b.trade_count, 4);
    }

    #[test]
    fn rollover_flushes_prior_bar() {
        // 1000/10/1 and 1500/12/2 fill bucket 0; 61000/9/1 rolls it over
        let mut agg = BucketAggregator::new();
        assert!(agg.apply(&trade("X", 1_000, 10.0, 1.0)).is_none());
        assert!(agg.apply(&trade("X", 1_500, 12.0, 2.0)).is_none());

        let done = agg.apply(&trade("X", 61_000, 9.0, 1.0)).unwrap();
        assert_eq!(done.bucket_ms, 0);
        assert!((done.open - 10.0).abs() < 1e-10);
        assert!((done.high - 12.0).abs() < 1e-10);
        assert!((done.low - 10.0).abs() < 1e-10);
        assert!((done.close - 12.0).abs() < 1e-10);
        assert!((done.volume - 3.0).abs() < 1e-10);
        assert_eq!(done.trade_count, 2);
        assert_eq!(done.first_trade_ms, 1_000);
        assert_eq!(done.last_trade_ms, 1_500);

        // the new live bar is seeded solely from the triggering trade
        assert_eq!(agg.live_count(), 1);
        let live = agg.flush_all().pop().unwrap();
        assert_eq!(live.bucket_ms, 60_000);
        assert!((live.open - 9.0).abs() < 1e-10);
        assert!((live.high - 9.0).abs() < 1e-10);
        assert!((live.low - 9.0).abs() < 1e-10);
        assert!((live.close - 9.0).abs() < 1e-10);
        assert!((live.volume - 1.0).abs() < 1e-10);
        assert_eq!(live.trade_count, 1);
    }

    #[test]
    fn out_of_order_close_is_arrival_order() {
        // close tracks the last applied trade, not the latest timestamp;
        // high/low still cover every price seen
        let mut agg = BucketAggregator::new();
        agg.apply(&trade("X", 5_000, 11.0, 1.0));
        agg.apply(&trade("X", 2_000, 13.0, 1.0));

        let b = agg.flush_all().pop().unwrap();
        assert!((b.close - 13.0).abs() < 1e-10);
        assert!((b.high - 13.0).abs() < 1e-10);
        assert!((b.low - 11.0).abs() < 1e-10);
        assert_eq!(b.first_trade_ms, 2_000);
        assert_eq!(b.last_trade_ms, 5_000);
    }

    #[test]
    fn stale_bucket_triggers_rollover_not_reopen() {
        let mut agg = BucketAggregator::new();
        agg.apply(&trade("X", 125_000, 20.0, 1.0)); // bucket 120_000

        // far-past trade: prior live bar flushed, stale bucket becomes live
        let done = agg.apply(&trade("X", 3_000, 15.0, 2.0)).unwrap();
        assert_eq!(done.bucket_ms, 120_000);

        let live = agg.flush_all().pop().unwrap();
        assert_eq!(live.bucket_ms, 0);
        assert!((live.open - 15.0).abs() < 1e-10);
        assert_eq!(live.trade_count, 1);
    }

    #[test]
    fn codes_are_independent() {
        let mut agg = BucketAggregator::new();
        agg.apply(&trade("KRW-BTC", 1_000, 10.0, 1.0));
        agg.apply(&trade("KRW-ETH", 2_000, 5.0, 3.0));
        assert_eq!(agg.live_count(), 2);

        // rollover on one code must not flush the other
        let done = agg.apply(&trade("KRW-BTC", 61_000, 11.0, 1.0)).unwrap();
        assert_eq!(done.code, "KRW-BTC");
        assert_eq!(agg.live_count(), 2);
    }

    #[test]
    fn duplicate_trades_count_twice() {
        let mut agg = BucketAggregator::new();
        let t = trade("X", 1_000, 10.0, 1.0);
        agg.apply(&t);
        agg.apply(&t);

        let b = agg.flush_all().pop().unwrap();
        assert_eq!(b.trade_count, 2);
        assert!((b.volume - 2.0).abs() < 1e-10);
    }

    #[test]
    fn flush_all_clears_and_is_idempotent() {
        let mut agg = BucketAggregator::new();
        agg.apply(&trade("KRW-BTC", 1_000, 10.0, 1.0));
        agg.apply(&trade("KRW-ETH", 1_000, 20.0, 1.0));

        let first = agg.flush_all();
        assert_eq!(first.len(), 2);
        assert_eq!(agg.live_count(), 0);
        assert!(agg.flush_all().is_empty());
    }

    #[test]
    fn ohlc_bounds_hold_after_every_update() {
        let mut agg = BucketAggregator::new();
        let prices = [10.0, 14.0, 8.0, 12.0, 9.5, 13.5];
        for (i, px) in prices.iter().enumerate() {
            agg.apply(&trade("X", 1_000 + i as i64, *px, 1.0));
        }
        let b = agg.flush_all().pop().unwrap();
        assert!(b.low <= b.open && b.low <= b.close && b.low <= b.high);
        assert!(b.high >= b.open && b.high >= b.close && b.high >= b.low);
        assert!((b.high - 14.0).abs() < 1e-10);
        assert!((b.low - 8.0).abs() < 1e-10);
    }

    #[test]
    fn bucket_arithmetic() {
        assert_eq!(bucket_ms(0), 0);
        assert_eq!(bucket_ms(59_999), 0);
        assert_eq!(bucket_ms(60_000), 60_000);
        assert_eq!(bucket_ms(61_000), 60_000);
        // 2024-01-01 00:01:30.500 -> 00:01:00.000
        assert_eq!(bucket_ms(1_704_067_290_500), 1_704_067_260_000);
    }
}

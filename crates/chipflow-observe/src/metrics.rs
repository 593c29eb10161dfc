use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Monotonic count of requests, pixels, rows or models since process start.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn inc(&self) {
        self.inc_by(1);
    }

    pub fn inc_by(&self, value: u64) {
        self.0.fetch_add(value, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Level that moves both ways, such as pool tasks currently in flight.
#[derive(Debug, Default)]
pub struct Gauge(AtomicU64);

impl Gauge {
    /// Adds `delta` and returns the new value.
    pub fn add(&self, delta: u64) -> u64 {
        self.0.fetch_add(delta, Ordering::Relaxed).saturating_add(delta)
    }

    /// Subtracts `delta`, saturating at zero.
    pub fn sub(&self, delta: u64) {
        let _ = self
            .0
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                Some(v.saturating_sub(delta))
            });
    }

    /// Raises the gauge to `value` if it is currently lower (high-water marks).
    pub fn max(&self, value: u64) {
        self.0.fetch_max(value, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Count, total and max of recorded durations.
#[derive(Debug, Default)]
pub struct DurationAgg {
    count: AtomicU64,
    total_ns: AtomicU64,
    max_ns: AtomicU64,
}

impl DurationAgg {
    pub fn record(&self, dur: Duration) {
        let ns = dur.as_nanos().min(u64::MAX as u128) as u64;
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total_ns.fetch_add(ns, Ordering::Relaxed);
        self.max_ns.fetch_max(ns, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DurationAggSnapshot {
        DurationAggSnapshot {
            count: self.count.load(Ordering::Relaxed),
            total_ns: self.total_ns.load(Ordering::Relaxed),
            max_ns: self.max_ns.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DurationAggSnapshot {
    pub count: u64,
    pub total_ns: u64,
    pub max_ns: u64,
}

impl DurationAggSnapshot {
    pub fn avg_ns(&self) -> u64 {
        if self.count == 0 {
            0
        } else {
            self.total_ns / self.count
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gauge_tracks_high_water_and_never_underflows() {
        let g = Gauge::default();
        assert_eq!(g.add(5), 5);
        g.sub(7);
        assert_eq!(g.get(), 0);

        let hw = Gauge::default();
        hw.max(3);
        hw.max(1);
        assert_eq!(hw.get(), 3);
    }

    #[test]
    fn duration_agg_tracks_count_total_and_max() {
        let agg = DurationAgg::default();
        agg.record(Duration::from_millis(2));
        agg.record(Duration::from_millis(4));
        let snap = agg.snapshot();
        assert_eq!(snap.count, 2);
        assert_eq!(snap.max_ns, 4_000_000);
        assert_eq!(snap.avg_ns(), 3_000_000);
    }

    #[test]
    fn empty_aggregate_has_zero_average() {
        assert_eq!(DurationAgg::default().snapshot().avg_ns(), 0);
    }
}

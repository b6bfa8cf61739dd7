use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Monotonic event counter.
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

/// Point-in-time value. `max` turns a gauge into a high-water mark.
#[derive(Debug, Default)]
pub struct Gauge(AtomicU64);

impl Gauge {
    pub fn set(&self, value: u64) {
        self.0.store(value, Ordering::Relaxed);
    }

    /// Adds `delta` and returns the new value.
    pub fn add(&self, delta: u64) -> u64 {
        self.0
            .fetch_add(delta, Ordering::Relaxed)
            .saturating_add(delta)
    }

    /// Subtracts `delta`, saturating at zero.
    pub fn sub(&self, delta: u64) {
        let _ = self
            .0
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |cur| {
                Some(cur.saturating_sub(delta))
            });
    }

    /// Raises the gauge to `value` if it is currently lower.
    pub fn max(&self, value: u64) {
        self.0.fetch_max(value, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

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

    pub fn timer(&self) -> ScopedTimer<'_> {
        ScopedTimer::new(self)
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

    pub fn total_ms(&self) -> u64 {
        self.total_ns / 1_000_000
    }
}

/// Records the elapsed time into its aggregate when dropped.
pub struct ScopedTimer<'a> {
    start: Instant,
    agg: &'a DurationAgg,
}

impl<'a> ScopedTimer<'a> {
    pub fn new(agg: &'a DurationAgg) -> Self {
        Self {
            start: Instant::now(),
            agg,
        }
    }
}

impl Drop for ScopedTimer<'_> {
    fn drop(&mut self) {
        self.agg.record(self.start.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gauge_tracks_high_water() {
        let current = Gauge::default();
        let high = Gauge::default();
        high.max(current.add(10));
        high.max(current.add(5));
        current.sub(12);
        high.max(current.get());
        assert_eq!(current.get(), 3);
        assert_eq!(high.get(), 15);

        current.sub(100);
        assert_eq!(current.get(), 0);
    }

    #[test]
    fn duration_agg_keeps_max_and_average() {
        let agg = DurationAgg::default();
        agg.record(Duration::from_nanos(100));
        agg.record(Duration::from_nanos(300));
        let snap = agg.snapshot();
        assert_eq!(snap.count, 2);
        assert_eq!(snap.max_ns, 300);
        assert_eq!(snap.avg_ns(), 200);
        assert_eq!(DurationAggSnapshot { count: 0, total_ns: 0, max_ns: 0 }.avg_ns(), 0);
    }

    #[test]
    fn scoped_timer_records_on_drop() {
        let agg = DurationAgg::default();
        {
            let _t = agg.timer();
        }
        assert_eq!(agg.snapshot().count, 1);
    }
}

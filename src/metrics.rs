//! Pipeline counters
//!
//! Monotonic atomic counters written from the data path and sampled by the
//! once-per-second monitor ticker. Torn reads across counters are fine; each
//! individual counter is consistent.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// Shared counter block; every handle is an `Arc<Metrics>`
#[derive(Debug, Default)]
pub struct Metrics {
    /// Datagrams framed into the pool
    pub datagrams_framed: AtomicU64,
    /// Datagrams fully transmitted (or mirrored, when that counts as a send)
    pub datagrams_sent: AtomicU64,
    /// Bytes handed to the socket in completed sends
    pub bytes_sent: AtomicU64,
    /// Failed send attempts
    pub send_failures: AtomicU64,
    /// Datagrams lost to pool overwrites
    pub overflows: AtomicU64,
    /// Stereo frames whose discarded byte was not idle
    pub possible_bad_audio: AtomicU64,
    /// Sequence discontinuities observed by the sender
    pub seq_skips: AtomicU64,

    send_duration_total_us: AtomicU64,
    send_duration_count: AtomicU64,
    peak_send_duration_us: AtomicU64,
    min_free_slots: AtomicUsize,
}

impl Metrics {
    pub fn new(pool_slots: usize) -> Self {
        let metrics = Self::default();
        metrics.min_free_slots.store(pool_slots, Ordering::Relaxed);
        metrics
    }

    /// Record the duration of one send attempt; returns true when this is a
    /// new worst case.
    pub fn record_send_duration(&self, duration: Duration) -> bool {
        let us = duration.as_micros() as u64;
        self.send_duration_total_us.fetch_add(us, Ordering::Relaxed);
        self.send_duration_count.fetch_add(1, Ordering::Relaxed);
        self.peak_send_duration_us.fetch_max(us, Ordering::Relaxed) < us
    }

    /// Track the low-water mark of free pool slots
    pub fn record_free_slots(&self, free: usize) {
        self.min_free_slots.fetch_min(free, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let count = self.send_duration_count.load(Ordering::Relaxed);
        let total = self.send_duration_total_us.load(Ordering::Relaxed);
        MetricsSnapshot {
            datagrams_framed: self.datagrams_framed.load(Ordering::Relaxed),
            datagrams_sent: self.datagrams_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            overflows: self.overflows.load(Ordering::Relaxed),
            possible_bad_audio: self.possible_bad_audio.load(Ordering::Relaxed),
            seq_skips: self.seq_skips.load(Ordering::Relaxed),
            peak_send_duration_us: self.peak_send_duration_us.load(Ordering::Relaxed),
            avg_send_duration_us: if count > 0 { total / count } else { 0 },
            min_free_slots: self.min_free_slots.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub datagrams_framed: u64,
    pub datagrams_sent: u64,
    pub bytes_sent: u64,
    pub send_failures: u64,
    pub overflows: u64,
    pub possible_bad_audio: u64,
    pub seq_skips: u64,
    pub peak_send_duration_us: u64,
    pub avg_send_duration_us: u64,
    pub min_free_slots: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let metrics = Metrics::new(200);
        metrics.datagrams_framed.fetch_add(3, Ordering::Relaxed);
        metrics.datagrams_sent.fetch_add(2, Ordering::Relaxed);
        metrics.overflows.fetch_add(1, Ordering::Relaxed);

        let snap = metrics.snapshot();
        assert_eq!(snap.datagrams_framed, 3);
        assert_eq!(snap.datagrams_sent, 2);
        assert_eq!(snap.overflows, 1);
        assert_eq!(snap.min_free_slots, 200);
    }

    #[test]
    fn test_send_duration_stats() {
        let metrics = Metrics::new(8);
        assert!(metrics.record_send_duration(Duration::from_micros(100)));
        assert!(!metrics.record_send_duration(Duration::from_micros(50)));
        assert!(metrics.record_send_duration(Duration::from_micros(300)));

        let snap = metrics.snapshot();
        assert_eq!(snap.peak_send_duration_us, 300);
        assert_eq!(snap.avg_send_duration_us, 150);
    }

    #[test]
    fn test_free_slot_watermark() {
        let metrics = Metrics::new(10);
        metrics.record_free_slots(7);
        metrics.record_free_slots(9);
        metrics.record_free_slots(3);
        assert_eq!(metrics.snapshot().min_free_slots, 3);
    }
}

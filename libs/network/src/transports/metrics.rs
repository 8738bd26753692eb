//! Server Metrics
//!
//! Lock-free counters updated from the poll thread and from sender handles,
//! plus a sampled delivery-latency window fed from header creation times.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of a server's counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerStats {
    pub frames_sent: u64,
    pub frames_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    /// Malformed inbound frames that were dropped
    pub violations: u64,
    /// Sends rejected because the outbound slot was occupied
    pub backpressure_events: u64,
    pub endpoints_opened: u64,
    pub endpoints_closed: u64,
    pub active_endpoints: usize,
    pub last_delivery_latency_ns: u64,
    pub avg_delivery_latency_ns: u64,
    pub p95_delivery_latency_ns: u64,
    pub p99_delivery_latency_ns: u64,
}

/// Counter set shared between the poll loop and its sender handles
#[derive(Debug, Default)]
pub(crate) struct StatsTracker {
    frames_sent: AtomicU64,
    frames_received: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    violations: AtomicU64,
    backpressure_events: AtomicU64,
    endpoints_opened: AtomicU64,
    endpoints_closed: AtomicU64,
    latency: Mutex<LatencyTracker>,
}

impl StatsTracker {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn record_bytes_sent(&self, bytes: usize) {
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_frame_sent(&self) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_bytes_received(&self, bytes: usize) {
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Record a delivered frame and how long ago its header was created
    #[inline]
    pub(crate) fn record_delivery(&self, age_ns: u64) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
        if let Some(mut tracker) = self.latency.try_lock() {
            tracker.record(age_ns);
        }
    }

    pub(crate) fn record_violation(&self) {
        self.violations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_backpressure(&self) {
        self.backpressure_events.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_opened(&self) {
        self.endpoints_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_closed(&self) {
        self.endpoints_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, active_endpoints: usize) -> ServerStats {
        let latency = self.latency.lock();
        ServerStats {
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            violations: self.violations.load(Ordering::Relaxed),
            backpressure_events: self.backpressure_events.load(Ordering::Relaxed),
            endpoints_opened: self.endpoints_opened.load(Ordering::Relaxed),
            endpoints_closed: self.endpoints_closed.load(Ordering::Relaxed),
            active_endpoints,
            last_delivery_latency_ns: latency.last(),
            avg_delivery_latency_ns: latency.average(),
            p95_delivery_latency_ns: latency.percentile(95),
            p99_delivery_latency_ns: latency.percentile(99),
        }
    }
}

/// Latency percentile tracker over a ring of recent samples
#[derive(Debug)]
struct LatencyTracker {
    samples: Vec<u64>,
    position: usize,
    total_samples: u64,
    sum: u128,
    last: u64,
}

impl Default for LatencyTracker {
    fn default() -> Self {
        Self {
            samples: Vec::with_capacity(Self::SAMPLE_SIZE),
            position: 0,
            total_samples: 0,
            sum: 0,
            last: 0,
        }
    }
}

impl LatencyTracker {
    const SAMPLE_SIZE: usize = 1000;

    fn record(&mut self, latency_ns: u64) {
        self.last = latency_ns;
        self.sum += latency_ns as u128;
        self.total_samples += 1;

        if self.samples.len() < Self::SAMPLE_SIZE {
            self.samples.push(latency_ns);
        } else {
            self.samples[self.position] = latency_ns;
            self.position = (self.position + 1) % Self::SAMPLE_SIZE;
        }
    }

    fn last(&self) -> u64 {
        self.last
    }

    fn average(&self) -> u64 {
        if self.total_samples == 0 {
            return 0;
        }
        (self.sum / self.total_samples as u128) as u64
    }

    fn percentile(&self, p: usize) -> u64 {
        if self.samples.is_empty() {
            return 0;
        }
        let mut sorted = self.samples.clone();
        sorted.sort_unstable();
        let index = ((sorted.len() - 1) * p) / 100;
        sorted[index]
    }
}

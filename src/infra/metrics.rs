//! Lock-free scan station counters and periodic reporting
//!
//! NOTE: All atomics use Relaxed ordering intentionally. These are statistical
//! counters only and must not drive station logic.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Update an atomic max value using compare-and-swap loop
#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

pub struct Metrics {
    decodes: AtomicU64,
    ignored_decodes: AtomicU64,
    malformed: AtomicU64,
    verifications: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    camera_faults: AtomicU64,
    camera_switches: AtomicU64,
    verify_latency_sum_ms: AtomicU64,
    verify_latency_max_ms: AtomicU64,
    started_at: Instant,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            decodes: AtomicU64::new(0),
            ignored_decodes: AtomicU64::new(0),
            malformed: AtomicU64::new(0),
            verifications: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            camera_faults: AtomicU64::new(0),
            camera_switches: AtomicU64::new(0),
            verify_latency_sum_ms: AtomicU64::new(0),
            verify_latency_max_ms: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    #[inline]
    pub fn record_decode(&self) {
        self.decodes.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_ignored_decode(&self) {
        self.ignored_decodes.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_malformed(&self) {
        self.malformed.fetch_add(1, Ordering::Relaxed);
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_verification_sent(&self) {
        self.verifications.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a finished verification call and its latency
    pub fn record_verification_done(&self, success: bool, latency_ms: u64) {
        if success {
            self.successes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
        self.verify_latency_sum_ms.fetch_add(latency_ms, Ordering::Relaxed);
        update_atomic_max(&self.verify_latency_max_ms, latency_ms);
    }

    #[inline]
    pub fn record_camera_fault(&self) {
        self.camera_faults.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_camera_switch(&self) {
        self.camera_switches.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot of all counters since start
    pub fn report(&self) -> MetricsSummary {
        let verifications = self.verifications.load(Ordering::Relaxed);
        let successes = self.successes.load(Ordering::Relaxed);
        let failures = self.failures.load(Ordering::Relaxed);
        let malformed = self.malformed.load(Ordering::Relaxed);
        let completed = (successes + failures).saturating_sub(malformed);
        let latency_sum = self.verify_latency_sum_ms.load(Ordering::Relaxed);

        MetricsSummary {
            uptime_secs: self.started_at.elapsed().as_secs(),
            decodes: self.decodes.load(Ordering::Relaxed),
            ignored_decodes: self.ignored_decodes.load(Ordering::Relaxed),
            malformed,
            verifications,
            successes,
            failures,
            camera_faults: self.camera_faults.load(Ordering::Relaxed),
            camera_switches: self.camera_switches.load(Ordering::Relaxed),
            avg_verify_latency_ms: if completed > 0 { latency_sum / completed } else { 0 },
            max_verify_latency_ms: self.verify_latency_max_ms.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MetricsSummary {
    pub uptime_secs: u64,
    pub decodes: u64,
    pub ignored_decodes: u64,
    pub malformed: u64,
    pub verifications: u64,
    pub successes: u64,
    pub failures: u64,
    pub camera_faults: u64,
    pub camera_switches: u64,
    pub avg_verify_latency_ms: u64,
    pub max_verify_latency_ms: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            uptime_secs = %self.uptime_secs,
            decodes = %self.decodes,
            ignored_decodes = %self.ignored_decodes,
            malformed = %self.malformed,
            verifications = %self.verifications,
            successes = %self.successes,
            failures = %self.failures,
            camera_faults = %self.camera_faults,
            camera_switches = %self.camera_switches,
            avg_verify_latency_ms = %self.avg_verify_latency_ms,
            max_verify_latency_ms = %self.max_verify_latency_ms,
            "metrics"
        );
    }
}

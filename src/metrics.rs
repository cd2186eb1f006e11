//! Per-operation counters and timing helpers for the Steel client.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Remote operations tracked by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SteelOperation {
    Scrape,
    Extract,
    Screenshot,
    CreateSession,
    CloseSession,
}

impl SteelOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            SteelOperation::Scrape => "scrape",
            SteelOperation::Extract => "extract",
            SteelOperation::Screenshot => "screenshot",
            SteelOperation::CreateSession => "create_session",
            SteelOperation::CloseSession => "close_session",
        }
    }
}

/// Counters for a single operation.
#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct OperationStats {
    pub requests: u64,
    pub failures: u64,
    pub retries: u64,
    pub elapsed_ms: u64,
}

impl OperationStats {
    fn add(&mut self, other: &OperationStats) {
        self.requests += other.requests;
        self.failures += other.failures;
        self.retries += other.retries;
        self.elapsed_ms += other.elapsed_ms;
    }
}

/// Aggregated counters across every operation plus totals.
#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SteelMetrics {
    pub scrape: OperationStats,
    pub extract: OperationStats,
    pub screenshot: OperationStats,
    pub create_session: OperationStats,
    pub close_session: OperationStats,
    pub total: OperationStats,
}

impl SteelMetrics {
    /// Merge the values from another metrics instance into this one.
    pub fn merge(&mut self, other: &SteelMetrics) {
        self.scrape.add(&other.scrape);
        self.extract.add(&other.extract);
        self.screenshot.add(&other.screenshot);
        self.create_session.add(&other.create_session);
        self.close_session.add(&other.close_session);
        self.total.add(&other.total);
    }

    /// Record one logical call: its attempt count, outcome and wall time.
    pub fn record(&mut self, operation: SteelOperation, attempts: u32, failed: bool, elapsed_ms: u64) {
        let sample = OperationStats {
            requests: 1,
            failures: u64::from(failed),
            retries: u64::from(attempts.saturating_sub(1)),
            elapsed_ms,
        };
        self.get_mut(operation).add(&sample);
        self.total.add(&sample);
    }

    pub fn get(&self, operation: SteelOperation) -> &OperationStats {
        match operation {
            SteelOperation::Scrape => &self.scrape,
            SteelOperation::Extract => &self.extract,
            SteelOperation::Screenshot => &self.screenshot,
            SteelOperation::CreateSession => &self.create_session,
            SteelOperation::CloseSession => &self.close_session,
        }
    }

    fn get_mut(&mut self, operation: SteelOperation) -> &mut OperationStats {
        match operation {
            SteelOperation::Scrape => &mut self.scrape,
            SteelOperation::Extract => &mut self.extract,
            SteelOperation::Screenshot => &mut self.screenshot,
            SteelOperation::CreateSession => &mut self.create_session,
            SteelOperation::CloseSession => &mut self.close_session,
        }
    }
}

/// Shared, thread-safe metrics sink owned by one client.
#[derive(Debug, Clone, Default)]
pub(crate) struct MetricsRecorder {
    inner: Arc<Mutex<SteelMetrics>>,
}

impl MetricsRecorder {
    pub(crate) fn record(&self, operation: SteelOperation, attempts: u32, failed: bool, elapsed_ms: u64) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record(operation, attempts, failed, elapsed_ms);
    }

    pub(crate) fn snapshot(&self) -> SteelMetrics {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Start an operation timer; follows tokio's clock so paused-time tests see virtual time.
pub fn start_timer() -> Instant {
    Instant::now()
}

/// Elapsed milliseconds since `start`, saturating at `u64::MAX`.
pub fn elapsed_ms(start: Instant) -> u64 {
    duration_ms(start.elapsed())
}

pub(crate) fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_updates_totals() {
        let mut metrics = SteelMetrics::default();
        metrics.record(SteelOperation::Scrape, 1, false, 100);
        metrics.record(SteelOperation::Scrape, 3, true, 40);
        metrics.record(SteelOperation::CloseSession, 2, false, 20);

        assert_eq!(metrics.scrape.requests, 2);
        assert_eq!(metrics.scrape.failures, 1);
        assert_eq!(metrics.scrape.retries, 2);
        assert_eq!(metrics.scrape.elapsed_ms, 140);
        assert_eq!(metrics.get(SteelOperation::CloseSession).retries, 1);
        assert_eq!(metrics.total.requests, 3);
        assert_eq!(metrics.total.retries, 3);
        assert_eq!(metrics.total.elapsed_ms, 160);
    }

    #[test]
    fn merge_combines_two_instances() {
        let mut a = SteelMetrics::default();
        a.record(SteelOperation::Extract, 1, false, 50);

        let mut b = SteelMetrics::default();
        b.record(SteelOperation::Extract, 2, false, 20);
        b.record(SteelOperation::CreateSession, 1, true, 30);

        a.merge(&b);
        assert_eq!(a.extract.requests, 2);
        assert_eq!(a.extract.retries, 1);
        assert_eq!(a.extract.elapsed_ms, 70);
        assert_eq!(a.create_session.failures, 1);
        assert_eq!(a.total.requests, 3);
    }

    #[test]
    fn timer_reports_elapsed_millis() {
        let start = start_timer();
        std::thread::sleep(Duration::from_millis(10));
        assert!(elapsed_ms(start) >= 10);
    }
}

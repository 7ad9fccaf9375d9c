use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Lifecycle engine counters plus the audit degraded-mode flag
#[derive(Debug, Default)]
pub struct EngineMetrics {
    pub submissions: AtomicU64,
    pub approvals: AtomicU64,
    pub rejections: AtomicU64,
    pub lock_conflicts: AtomicU64,
    pub cas_retries: AtomicU64,
    pub transient_errors: AtomicU64,
    pub audit_sink_failures: AtomicU64,
    degraded: AtomicBool,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_submission(&self) {
        self.submissions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_approval(&self) {
        self.approvals.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejection(&self) {
        self.rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_lock_conflict(&self) {
        self.lock_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cas_retry(&self) {
        self.cas_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_transient_error(&self) {
        self.transient_errors.fetch_add(1, Ordering::Relaxed);
        warn!("Transient store failure");
    }

    /// A committed entry could not be delivered; flips degraded mode on.
    pub fn record_audit_sink_failure(&self, entry_id: &str) {
        self.audit_sink_failures.fetch_add(1, Ordering::Relaxed);
        if !self.degraded.swap(true, Ordering::AcqRel) {
            error!(entry_id = %entry_id, "Audit sink delivery failed, entering degraded mode");
        } else {
            error!(entry_id = %entry_id, "Audit sink delivery failed");
        }
    }

    pub fn record_audit_sink_recovered(&self) {
        if self.degraded.swap(false, Ordering::AcqRel) {
            info!("Audit sink delivering again, leaving degraded mode");
        }
    }

    pub fn degraded(&self) -> bool {
        self.degraded.load(Ordering::Acquire)
    }

    pub fn get_stats(&self) -> EngineStats {
        EngineStats {
            submissions: self.submissions.load(Ordering::Relaxed),
            approvals: self.approvals.load(Ordering::Relaxed),
            rejections: self.rejections.load(Ordering::Relaxed),
            lock_conflicts: self.lock_conflicts.load(Ordering::Relaxed),
            cas_retries: self.cas_retries.load(Ordering::Relaxed),
            transient_errors: self.transient_errors.load(Ordering::Relaxed),
            audit_sink_failures: self.audit_sink_failures.load(Ordering::Relaxed),
            degraded: self.degraded(),
        }
    }

    pub fn log_stats(&self) {
        let stats = self.get_stats();
        info!(
            "Lifecycle metrics: submissions={}, approvals={}, rejections={}, lock_conflicts={}, cas_retries={}, transient_errors={}, audit_sink_failures={}, degraded={}",
            stats.submissions,
            stats.approvals,
            stats.rejections,
            stats.lock_conflicts,
            stats.cas_retries,
            stats.transient_errors,
            stats.audit_sink_failures,
            stats.degraded
        );
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStats {
    pub submissions: u64,
    pub approvals: u64,
    pub rejections: u64,
    pub lock_conflicts: u64,
    pub cas_retries: u64,
    pub transient_errors: u64,
    pub audit_sink_failures: u64,
    pub degraded: bool,
}

/// Time an operation and log its duration on completion
pub struct OperationTimer {
    operation: &'static str,
    start: Instant,
}

impl OperationTimer {
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            start: Instant::now(),
        }
    }

    pub fn finish(self) {
        debug!(
            operation = %self.operation,
            duration_ms = self.start.elapsed().as_millis() as u64,
            "Operation completed"
        );
    }
}

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;
use tracing::{debug, info, warn};

#[cfg(any(test, feature = "testing"))]
use mockall::automock;

use crate::config::AuditConfig;
use crate::model::AuditEntry;
use crate::observability::EngineMetrics;

#[derive(Debug, Error)]
pub enum AuditSinkError {
    #[error("Audit sink unavailable: {0}")]
    Unavailable(String),
    #[error("Audit sink rejected entry {entry_id}: {reason}")]
    Rejected { entry_id: String, reason: String },
}

/// Downstream consumer of committed audit entries. Delivery is
/// at-least-once; implementations deduplicate on `entry.id`.
#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn deliver(&self, entry: &AuditEntry) -> Result<(), AuditSinkError>;
}

/// Writes each entry as a structured event on the `audit` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn deliver(&self, entry: &AuditEntry) -> Result<(), AuditSinkError> {
        info!(
            target: "audit",
            entry_id = %entry.id,
            action = %entry.action,
            resource_type = %entry.resource_type,
            resource_id = %entry.resource_id,
            actor_id = %entry.actor_id,
            timestamp = %entry.timestamp,
            "{}",
            entry.description
        );
        Ok(())
    }
}

/// Retry policy for sink delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&AuditConfig::default())
    }
}

impl From<&AuditConfig> for RetryPolicy {
    fn from(config: &AuditConfig) -> Self {
        Self {
            retries: config.sink_retries,
            base_delay: Duration::from_millis(config.sink_backoff_ms),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Delays between attempts: doubling from `base_delay`, capped at
    /// `max_delay`, with jitter. One delay per retry.
    pub fn strategy(&self) -> impl Iterator<Item = Duration> {
        // ExponentialBackoff yields `factor * 2^n` ms for a base of 2.
        let factor = (self.base_delay.as_millis() as u64 / 2).max(1);
        ExponentialBackoff::from_millis(2)
            .factor(factor)
            .max_delay(self.max_delay)
            .map(jitter)
            .take(self.retries as usize)
    }
}

/// Tracks forwards and commits that are still running, so a short-lived
/// process can wait for them before exiting.
#[derive(Debug, Clone, Default)]
pub struct AuditOutbox {
    in_flight: Arc<AtomicUsize>,
    idle: Arc<Notify>,
}

/// Held while one piece of audit work is outstanding.
#[derive(Debug)]
pub struct InFlight {
    outbox: AuditOutbox,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if self.outbox.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.outbox.idle.notify_waiters();
        }
    }
}

impl AuditOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&self) -> InFlight {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        InFlight {
            outbox: self.clone(),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Wait until nothing is outstanding. Returns false if `within` elapsed
    /// first.
    pub async fn drain(&self, within: Duration) -> bool {
        tokio::time::timeout(within, async {
            loop {
                let idle = self.idle.notified();
                if self.in_flight() == 0 {
                    return;
                }
                idle.await;
            }
        })
        .await
        .is_ok()
    }
}

/// Pushes committed entries to the configured sink after the store
/// transaction has landed. Failure never undoes the commit; it marks the
/// engine degraded until a later batch is delivered in full.
#[derive(Clone)]
pub struct AuditForwarder {
    sink: Arc<dyn AuditSink>,
    policy: RetryPolicy,
    metrics: Arc<EngineMetrics>,
    outbox: AuditOutbox,
}

impl AuditForwarder {
    pub fn new(sink: Arc<dyn AuditSink>, policy: RetryPolicy, metrics: Arc<EngineMetrics>) -> Self {
        Self {
            sink,
            policy,
            metrics,
            outbox: AuditOutbox::new(),
        }
    }

    pub fn with_outbox(mut self, outbox: AuditOutbox) -> Self {
        self.outbox = outbox;
        self
    }

    /// Forward on a detached task. The caller does not wait for the sink.
    pub fn spawn(&self, entries: Vec<AuditEntry>) -> JoinHandle<bool> {
        let forwarder = self.clone();
        let in_flight = self.outbox.track();
        tokio::spawn(async move {
            let delivered = forwarder.forward(&entries).await;
            drop(in_flight);
            delivered
        })
    }

    /// Deliver every entry; returns false if any entry was given up on.
    pub async fn forward(&self, entries: &[AuditEntry]) -> bool {
        let mut all_delivered = true;
        for entry in entries {
            if !self.deliver_with_retry(entry).await {
                self.metrics.record_audit_sink_failure(&entry.id);
                all_delivered = false;
            }
        }
        if all_delivered && !entries.is_empty() {
            self.metrics.record_audit_sink_recovered();
        }
        all_delivered
    }

    async fn deliver_with_retry(&self, entry: &AuditEntry) -> bool {
        let mut attempt = 0u32;
        let sink = &self.sink;
        let result = Retry::spawn(self.policy.strategy(), || {
            attempt += 1;
            let current = attempt;
            async move {
                sink.deliver(entry).await.map_err(|e| {
                    warn!(entry_id = %entry.id, attempt = current, "Audit sink delivery failed: {}", e);
                    e
                })
            }
        })
        .await;

        match result {
            Ok(()) => {
                debug!(entry_id = %entry.id, "Audit entry delivered");
                true
            }
            Err(e) => {
                warn!(entry_id = %entry.id, "Audit sink delivery abandoned: {}", e);
                false
            }
        }
    }
}

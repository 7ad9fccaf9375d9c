//! The workflow engine: the only path by which asset status changes.
//!
//! The engine holds no mutable state of its own. Every call reads from the
//! injected [`LifecycleStore`], builds a [`Transaction`] with expected
//! versions, and commits it; optimistic conflicts are re-read and retried a
//! bounded number of times.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::audit::{AuditForwarder, AuditOutbox, AuditSink, RetryPolicy, TracingAuditSink};
use crate::config::{EngineConfig, LifecycleConfig, OnboardingPolicy};
use crate::error::{LifecycleError, LifecycleResult};
use crate::model::{Asset, Workflow};
use crate::observability::EngineMetrics;
use crate::store::{CommitReceipt, LifecycleStore, StoreError, StoreResult, Transaction};
use crate::telemetry::{create_lifecycle_span, generate_correlation_id};

pub mod assets;
pub mod authorizer;
pub mod decide;
pub mod queries;
pub mod submit;

pub use assets::Registration;
pub use authorizer::{AllowListAuthorizer, ApproverAuthorizer, AuthorizationDenied, PermitAll};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    pub store_timeout: Duration,
    pub max_conflict_retries: u32,
    pub forbid_self_approval: bool,
    pub onboarding: OnboardingPolicy,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for EngineSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            store_timeout: Duration::from_millis(config.store_timeout_ms),
            max_conflict_retries: config.max_conflict_retries,
            forbid_self_approval: config.forbid_self_approval,
            onboarding: config.onboarding,
        }
    }
}

pub struct WorkflowEngine {
    store: Arc<dyn LifecycleStore>,
    authorizer: Arc<dyn ApproverAuthorizer>,
    audit_sink: Arc<dyn AuditSink>,
    retry_policy: RetryPolicy,
    metrics: Arc<EngineMetrics>,
    settings: EngineSettings,
    audit_outbox: AuditOutbox,
}

impl WorkflowEngine {
    /// Engine with default settings, no approver restrictions and the
    /// tracing audit sink.
    pub fn new(store: Arc<dyn LifecycleStore>) -> Self {
        Self {
            store,
            authorizer: Arc::new(PermitAll),
            audit_sink: Arc::new(TracingAuditSink),
            retry_policy: RetryPolicy::default(),
            metrics: Arc::new(EngineMetrics::new()),
            settings: EngineSettings::default(),
            audit_outbox: AuditOutbox::new(),
        }
    }

    pub fn from_config(store: Arc<dyn LifecycleStore>, config: &LifecycleConfig) -> Self {
        Self::new(store)
            .with_settings(EngineSettings::from(&config.engine))
            .with_authorizer(Arc::new(AllowListAuthorizer::new(
                config.engine.approvers.iter().cloned(),
            )))
            .with_retry_policy(RetryPolicy::from(&config.audit))
    }

    pub fn with_settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_authorizer(mut self, authorizer: Arc<dyn ApproverAuthorizer>) -> Self {
        self.authorizer = authorizer;
        self
    }

    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit_sink = sink;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn metrics(&self) -> &Arc<EngineMetrics> {
        &self.metrics
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<dyn LifecycleStore> {
        &self.store
    }

    /// Commits and audit forwards still running in the background.
    pub fn audit_outbox(&self) -> &AuditOutbox {
        &self.audit_outbox
    }

    fn span(
        &self,
        operation: &'static str,
        asset_id: Option<&str>,
        workflow_id: Option<&str>,
    ) -> tracing::Span {
        create_lifecycle_span(operation, asset_id, workflow_id, &generate_correlation_id())
    }

    /// Run one store read under the configured timeout.
    async fn read<T, F>(&self, operation: &str, fut: F) -> LifecycleResult<T>
    where
        F: Future<Output = StoreResult<T>>,
    {
        match tokio::time::timeout(self.settings.store_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(self.store_failure(operation, e)),
            Err(_) => Err(self.store_failure(operation, self.timeout_error())),
        }
    }

    /// Commits run on their own task: once started they finish even if the
    /// caller goes away or the timeout below fires. The task also starts
    /// forwarding of the committed audit entries; the caller never waits on
    /// the sink.
    async fn commit(&self, tx: Transaction) -> StoreResult<CommitReceipt> {
        let store = Arc::clone(&self.store);
        let forwarder = self.forwarder();
        let in_flight = self.audit_outbox.track();
        let handle = tokio::spawn(async move {
            let result = store.commit(tx).await;
            if let Ok(receipt) = &result {
                if !receipt.audit.is_empty() {
                    forwarder.spawn(receipt.audit.clone());
                }
            }
            drop(in_flight);
            result
        });
        match tokio::time::timeout(self.settings.store_timeout, handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(StoreError::Backend(format!(
                "commit task failed: {join_error}"
            ))),
            Err(_) => {
                warn!("Commit outlived the store timeout; its audit entries will follow if it lands");
                Err(self.timeout_error())
            }
        }
    }

    fn forwarder(&self) -> AuditForwarder {
        AuditForwarder::new(
            Arc::clone(&self.audit_sink),
            self.retry_policy,
            Arc::clone(&self.metrics),
        )
        .with_outbox(self.audit_outbox.clone())
    }

    fn timeout_error(&self) -> StoreError {
        StoreError::Timeout {
            duration_ms: self.settings.store_timeout.as_millis() as u64,
        }
    }

    fn store_failure(&self, operation: &str, err: StoreError) -> LifecycleError {
        let mapped = LifecycleError::from_store(operation, err);
        match &mapped {
            LifecycleError::TransientStore { reason, .. } => {
                self.metrics.record_transient_error();
                warn!(operation, "Store call failed: {}", reason);
            }
            LifecycleError::AssetLocked { .. } => self.metrics.record_lock_conflict(),
            _ => {}
        }
        mapped
    }

    /// Decide what a failed commit means. `Ok(())` asks the caller to
    /// re-read and try again.
    fn retry_or_fail(
        &self,
        operation: &str,
        subject: &str,
        err: StoreError,
        attempt: &mut u32,
    ) -> LifecycleResult<()> {
        match err {
            StoreError::Conflict { .. } if *attempt < self.settings.max_conflict_retries => {
                *attempt += 1;
                self.metrics.record_cas_retry();
                debug!(operation, subject, attempt = *attempt, "Version conflict, retrying");
                Ok(())
            }
            StoreError::Conflict { .. } => {
                self.metrics.record_transient_error();
                Err(LifecycleError::TransientStore {
                    operation: operation.to_string(),
                    reason: format!(
                        "{subject} kept changing underneath {} attempts",
                        *attempt + 1
                    ),
                })
            }
            other => Err(self.store_failure(operation, other)),
        }
    }

    async fn load_asset(&self, operation: &str, id: &str) -> LifecycleResult<Asset> {
        self.read(operation, self.store.get_asset(id))
            .await?
            .ok_or_else(|| LifecycleError::asset_not_found(id))
    }

    async fn load_workflow(&self, operation: &str, id: &str) -> LifecycleResult<Workflow> {
        self.read(operation, self.store.get_workflow(id))
            .await?
            .ok_or_else(|| LifecycleError::workflow_not_found(id))
    }
}

fn missing_from_receipt(kind: &str, id: &str) -> LifecycleError {
    LifecycleError::InvariantViolation {
        details: format!("committed {kind} {id} missing from commit receipt"),
    }
}

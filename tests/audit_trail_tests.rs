//! Audit ledger, sink forwarding and store-timeout behaviour.

mod fixtures;

use async_trait::async_trait;
use cmdb_lifecycle::store::{CommitReceipt, StoreResult};
use cmdb_lifecycle::{
    Asset, AssetFilter, AssetStatus, AssetType, AuditAction, AuditEntry, AuditQuery, AuditSink,
    AuditSinkError, EngineSettings, LifecycleError, LifecycleStore, MemoryStore, NewAsset,
    ResourceType, Transaction, Workflow, WorkflowEngine, WorkflowFilter, WorkflowIntent,
    WorkflowRequest,
};
use fixtures::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[tokio::test]
async fn failing_sink_keeps_commit_and_marks_degraded() {
    let store = Arc::new(MemoryStore::new());
    let sink = Arc::new(RecordingSink::failing());
    let engine = direct_engine(store.clone()).with_audit_sink(sink.clone());
    online_asset(&engine, "SRV-001", AssetType::Server).await;

    let wf = engine
        .submit(WorkflowIntent::new(
            "SRV-001",
            WorkflowRequest::maintenance(),
            requester(),
            "Disk swap",
        ))
        .await
        .unwrap();
    let (asset, _) = engine.approve(&wf.id, &approver(), None).await.unwrap();
    assert_eq!(asset.status, AssetStatus::Maintenance);

    let metrics = engine.metrics().clone();
    assert!(engine.audit_outbox().drain(Duration::from_secs(2)).await);
    assert!(metrics.degraded());

    // Committed state and ledger are unaffected by the sink outage.
    let stored = store.snapshot().await;
    assert_eq!(stored.assets["SRV-001"].status, AssetStatus::Maintenance);
    let approvals = engine
        .audit_trail(&AuditQuery::default().with_action(AuditAction::WorkflowApproved))
        .await
        .unwrap();
    assert_eq!(approvals.len(), 1);
    assert!(sink.delivered().is_empty());
    assert!(sink.attempts() >= 3);

    // The next successful delivery clears the degraded signal.
    sink.set_failing(false);
    online_asset(&engine, "SRV-002", AssetType::Server).await;
    assert!(engine.audit_outbox().drain(Duration::from_secs(2)).await);
    assert!(!metrics.degraded());
    assert!(metrics.get_stats().audit_sink_failures >= 1);
}

#[tokio::test]
async fn hanging_sink_does_not_block_submit() {
    let store = Arc::new(MemoryStore::new());
    let engine = direct_engine(store.clone()).with_audit_sink(Arc::new(HangingSink));
    online_asset(&engine, "SRV-001", AssetType::Server).await;

    let submitted = tokio::time::timeout(
        Duration::from_secs(1),
        engine.submit(WorkflowIntent::new(
            "SRV-001",
            WorkflowRequest::maintenance(),
            requester(),
            "Firmware",
        )),
    )
    .await
    .expect("submit returns while the sink hangs")
    .unwrap();

    let asset = engine.get_asset("SRV-001").await.unwrap();
    assert_eq!(asset.active_workflow_id.as_deref(), Some(submitted.id.as_str()));
    assert!(engine.audit_outbox().in_flight() >= 1);
    assert!(!engine.audit_outbox().drain(Duration::from_millis(20)).await);
}

/// Accepts everything except asset registrations.
#[derive(Default)]
struct RegistrationRejectingSink {
    delivered: std::sync::Mutex<Vec<AuditAction>>,
}

#[async_trait]
impl AuditSink for RegistrationRejectingSink {
    async fn deliver(&self, entry: &AuditEntry) -> Result<(), AuditSinkError> {
        if entry.action == AuditAction::AssetRegistered {
            return Err(AuditSinkError::Rejected {
                entry_id: entry.id.clone(),
                reason: "unsupported action".to_string(),
            });
        }
        self.delivered.lock().unwrap().push(entry.action);
        Ok(())
    }
}

#[tokio::test]
async fn partial_batch_delivery_stays_degraded() {
    let sink = Arc::new(RegistrationRejectingSink::default());
    let engine = WorkflowEngine::new(Arc::new(MemoryStore::new()))
        .with_retry_policy(quick_retries())
        .with_audit_sink(sink.clone());

    // Onboarding commits the registration and its workflow in one batch.
    let registration = engine
        .register_asset(NewAsset::new("web-01", AssetType::Server), &requester())
        .await
        .unwrap();
    assert!(registration.onboarding.is_some());

    assert!(engine.audit_outbox().drain(Duration::from_secs(2)).await);
    assert_eq!(
        *sink.delivered.lock().unwrap(),
        vec![AuditAction::WorkflowSubmitted]
    );
    assert!(engine.metrics().degraded());
    assert_eq!(engine.metrics().get_stats().audit_sink_failures, 1);
}

#[tokio::test]
async fn sink_receives_ledger_entries_with_stable_ids() {
    let store = Arc::new(MemoryStore::new());
    let sink = Arc::new(RecordingSink::default());
    let engine = direct_engine(store.clone()).with_audit_sink(sink.clone());
    online_asset(&engine, "NET-001", AssetType::Network).await;
    let wf = engine
        .delete_asset("NET-001", &requester(), "Replaced")
        .await
        .unwrap();
    engine.reject(&wf.id, &approver(), "Still routing").await.unwrap();

    let ledger = engine.audit_trail(&AuditQuery::default()).await.unwrap();
    assert_eq!(ledger.len(), 3);
    assert_eq!(ledger[0].action, AuditAction::WorkflowRejected);
    assert_eq!(ledger[2].action, AuditAction::AssetRegistered);

    let sink_ref = sink.clone();
    assert!(eventually(move || sink_ref.delivered().len() == 3).await);
    let mut delivered: Vec<String> = sink.delivered().into_iter().map(|e| e.id).collect();
    let mut expected: Vec<String> = ledger.into_iter().map(|e| e.id).collect();
    delivered.sort();
    expected.sort();
    assert_eq!(delivered, expected);
}

#[tokio::test]
async fn audit_trail_filters_and_limits() {
    let (_store, engine) = memory_engine();
    for n in 1..=4 {
        online_asset(&engine, &format!("WS-{n:03}"), AssetType::Workstation).await;
    }

    let by_asset = engine
        .audit_trail(&AuditQuery::for_resource(ResourceType::Asset, "WS-003"))
        .await
        .unwrap();
    assert_eq!(by_asset.len(), 1);
    assert_eq!(by_asset[0].resource_id, "WS-003");

    let limited = engine
        .audit_trail(&AuditQuery {
            limit: Some(2),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(limited.len(), 2);
    assert_eq!(limited[0].resource_id, "WS-004");

    assert!(matches!(
        engine
            .audit_trail(&AuditQuery {
                limit: Some(0),
                ..Default::default()
            })
            .await,
        Err(LifecycleError::Validation { .. })
    ));
}

/// Memory store whose commits take longer than the engine will wait.
struct SlowCommitStore {
    inner: MemoryStore,
    delay: Duration,
}

#[async_trait]
impl LifecycleStore for SlowCommitStore {
    async fn get_asset(&self, id: &str) -> StoreResult<Option<Asset>> {
        self.inner.get_asset(id).await
    }

    async fn get_workflow(&self, id: &str) -> StoreResult<Option<Workflow>> {
        self.inner.get_workflow(id).await
    }

    async fn put_asset(&self, asset: Asset, expected_version: Option<u64>) -> StoreResult<Asset> {
        self.inner.put_asset(asset, expected_version).await
    }

    async fn query_pending_by_asset(&self, asset_id: &str) -> StoreResult<Vec<Workflow>> {
        self.inner.query_pending_by_asset(asset_id).await
    }

    async fn list_assets(&self, filter: &AssetFilter) -> StoreResult<Vec<Asset>> {
        self.inner.list_assets(filter).await
    }

    async fn list_workflows(&self, filter: &WorkflowFilter) -> StoreResult<Vec<Workflow>> {
        self.inner.list_workflows(filter).await
    }

    async fn count_assets_by_type(&self, asset_type: &AssetType) -> StoreResult<u64> {
        self.inner.count_assets_by_type(asset_type).await
    }

    async fn audit_entries(&self, query: &AuditQuery) -> StoreResult<Vec<AuditEntry>> {
        self.inner.audit_entries(query).await
    }

    async fn commit(&self, tx: Transaction) -> StoreResult<CommitReceipt> {
        tokio::time::sleep(self.delay).await;
        self.inner.commit(tx).await
    }
}

#[tokio::test]
async fn commit_landing_after_timeout_is_still_forwarded() {
    let store = Arc::new(SlowCommitStore {
        inner: MemoryStore::new(),
        delay: Duration::from_millis(150),
    });
    let sink = Arc::new(RecordingSink::default());
    let engine = WorkflowEngine::new(store.clone())
        .with_settings(EngineSettings {
            store_timeout: Duration::from_millis(50),
            ..direct_settings()
        })
        .with_retry_policy(quick_retries())
        .with_audit_sink(sink.clone());

    let result = engine
        .register_asset(
            NewAsset::new("db-01", AssetType::Server)
                .with_id("SRV-001")
                .with_initial_status(AssetStatus::Online),
            &requester(),
        )
        .await;
    assert!(matches!(result, Err(LifecycleError::TransientStore { .. })));

    // The commit finishes on its own task and its entry still reaches the sink.
    assert!(engine.audit_outbox().drain(Duration::from_secs(2)).await);
    assert!(store.inner.get_asset("SRV-001").await.unwrap().is_some());
    let delivered = sink.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].action, AuditAction::AssetRegistered);
    assert_eq!(delivered[0].resource_id, "SRV-001");
}

/// Delegates to a memory store but can be switched to never answer.
struct StallingStore {
    inner: MemoryStore,
    stalled: AtomicBool,
}

impl StallingStore {
    fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            stalled: AtomicBool::new(false),
        }
    }

    async fn gate(&self) {
        if self.stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
    }
}

#[async_trait]
impl LifecycleStore for StallingStore {
    async fn get_asset(&self, id: &str) -> StoreResult<Option<Asset>> {
        self.gate().await;
        self.inner.get_asset(id).await
    }

    async fn get_workflow(&self, id: &str) -> StoreResult<Option<Workflow>> {
        self.gate().await;
        self.inner.get_workflow(id).await
    }

    async fn put_asset(&self, asset: Asset, expected_version: Option<u64>) -> StoreResult<Asset> {
        self.gate().await;
        self.inner.put_asset(asset, expected_version).await
    }

    async fn query_pending_by_asset(&self, asset_id: &str) -> StoreResult<Vec<Workflow>> {
        self.gate().await;
        self.inner.query_pending_by_asset(asset_id).await
    }

    async fn list_assets(&self, filter: &AssetFilter) -> StoreResult<Vec<Asset>> {
        self.gate().await;
        self.inner.list_assets(filter).await
    }

    async fn list_workflows(&self, filter: &WorkflowFilter) -> StoreResult<Vec<Workflow>> {
        self.gate().await;
        self.inner.list_workflows(filter).await
    }

    async fn count_assets_by_type(&self, asset_type: &AssetType) -> StoreResult<u64> {
        self.gate().await;
        self.inner.count_assets_by_type(asset_type).await
    }

    async fn audit_entries(&self, query: &AuditQuery) -> StoreResult<Vec<AuditEntry>> {
        self.gate().await;
        self.inner.audit_entries(query).await
    }

    async fn commit(&self, tx: Transaction) -> StoreResult<CommitReceipt> {
        self.gate().await;
        self.inner.commit(tx).await
    }
}

#[tokio::test]
async fn unresponsive_store_fails_as_transient_within_timeout() {
    let store = Arc::new(StallingStore::new());
    let engine = direct_engine(store.clone());
    online_asset(&engine, "SRV-001", AssetType::Server).await;

    store.stalled.store(true, Ordering::SeqCst);
    let timeout = engine.settings().store_timeout;
    let started = Instant::now();
    let result = engine
        .submit(WorkflowIntent::new(
            "SRV-001",
            WorkflowRequest::maintenance(),
            requester(),
            "Patch window",
        ))
        .await;
    let elapsed = started.elapsed();

    match result {
        Err(err @ LifecycleError::TransientStore { .. }) => assert!(err.is_retryable()),
        other => panic!("expected TransientStore, got {other:?}"),
    }
    assert!(elapsed < timeout + Duration::from_secs(2), "took {elapsed:?}");
    assert!(engine.metrics().get_stats().transient_errors >= 1);

    store.stalled.store(false, Ordering::SeqCst);
    let asset = engine.get_asset("SRV-001").await.unwrap();
    assert!(asset.active_workflow_id.is_none());
}

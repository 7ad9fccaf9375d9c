use chrono::Utc;
use tracing::{info, Instrument};

use super::{missing_from_receipt, WorkflowEngine};
use crate::error::{LifecycleError, LifecycleResult};
use crate::model::{AuditAction, AuditEntry, ResourceType, Workflow, WorkflowIntent};
use crate::observability::OperationTimer;
use crate::store::Transaction;

impl WorkflowEngine {
    /// Open a workflow against an asset and lock the asset until the
    /// workflow is decided. Fails with `AssetLocked` if another workflow is
    /// already pending.
    ///
    /// Gateway mapping: `POST /workflows`.
    pub async fn submit(&self, intent: WorkflowIntent) -> LifecycleResult<Workflow> {
        let span = self.span("submit", Some(&intent.asset_id), None);
        self.submit_inner(intent).instrument(span).await
    }

    async fn submit_inner(&self, intent: WorkflowIntent) -> LifecycleResult<Workflow> {
        let timer = OperationTimer::new("submit");
        intent.validate().map_err(LifecycleError::validation)?;

        let mut attempt = 0;
        loop {
            let asset = self.load_asset("submit", &intent.asset_id).await?;
            if let Some(active) = &asset.active_workflow_id {
                self.metrics.record_lock_conflict();
                return Err(LifecycleError::AssetLocked {
                    asset_id: asset.id.clone(),
                    workflow_id: Some(active.clone()),
                });
            }
            intent
                .request
                .check_against(&asset)
                .map_err(LifecycleError::validation)?;

            let now = Utc::now();
            let workflow = Workflow::new_pending(&intent, &asset, now);
            let workflow_id = workflow.id.clone();

            let mut locked = asset.clone();
            locked.active_workflow_id = Some(workflow_id.clone());

            let entry = AuditEntry::new(
                &intent.requester,
                AuditAction::WorkflowSubmitted,
                ResourceType::Workflow,
                &workflow_id,
                format!(
                    "{} requested {} of {} ({} -> {})",
                    intent.requester.name,
                    workflow.kind(),
                    asset.id,
                    asset.status,
                    workflow.request.target_status()
                ),
            )
            .at(now)
            .with_after(workflow.snapshot());

            let tx = Transaction::new()
                .put_workflow(workflow, None)
                .put_asset(locked, Some(asset.version))
                .append_audit(entry);

            match self.commit(tx).await {
                Ok(receipt) => {
                    self.metrics.record_submission();
                    let created = receipt
                        .workflow(&workflow_id)
                        .cloned()
                        .ok_or_else(|| missing_from_receipt("workflow", &workflow_id))?;
                    info!(
                        asset_id = %created.asset_id,
                        workflow_id = %created.id,
                        kind = %created.kind(),
                        priority = %created.priority,
                        "Workflow submitted"
                    );
                    timer.finish();
                    return Ok(created);
                }
                Err(e) => self.retry_or_fail("submit", &intent.asset_id, e, &mut attempt)?,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Actor, AssetStatus, AssetType, NewAsset, WorkflowRequest, WorkflowStatus};
    use crate::store::{LifecycleStore, MemoryStore};
    use std::sync::Arc;

    async fn engine_with_server(status: AssetStatus) -> (WorkflowEngine, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let asset = NewAsset::new("Web Server 01", AssetType::Server).into_asset(
            "SRV-001".to_string(),
            status,
            Utc::now(),
        );
        store.put_asset(asset, None).await.unwrap();
        (WorkflowEngine::new(store.clone()), store)
    }

    fn maintenance(reason: &str) -> WorkflowIntent {
        WorkflowIntent::new(
            "SRV-001",
            WorkflowRequest::maintenance(),
            Actor::new("u-ops", "Ops"),
            reason,
        )
    }

    #[tokio::test]
    async fn test_submit_locks_asset_and_audits() {
        let (engine, store) = engine_with_server(AssetStatus::Online).await;
        let workflow = engine.submit(maintenance("patching")).await.unwrap();

        assert_eq!(workflow.status, WorkflowStatus::Pending);
        assert_eq!(workflow.asset_name, "Web Server 01");
        assert_eq!(workflow.version, 1);

        let asset = store.get_asset("SRV-001").await.unwrap().unwrap();
        assert_eq!(asset.active_workflow_id.as_deref(), Some(workflow.id.as_str()));
        assert_eq!(asset.status, AssetStatus::Online);

        let audit = store.snapshot().await.audit;
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].action, AuditAction::WorkflowSubmitted);
        assert_eq!(audit[0].resource_id, workflow.id);
    }

    #[tokio::test]
    async fn test_second_submit_is_locked_out() {
        let (engine, _) = engine_with_server(AssetStatus::Online).await;
        let first = engine.submit(maintenance("patching")).await.unwrap();
        let err = engine.submit(maintenance("again")).await.unwrap_err();
        match err {
            LifecycleError::AssetLocked { workflow_id, .. } => {
                assert_eq!(workflow_id, Some(first.id))
            }
            other => panic!("expected AssetLocked, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_validation_happens_before_store_access() {
        let (engine, _) = engine_with_server(AssetStatus::Online).await;
        let err = engine.submit(maintenance("  ")).await.unwrap_err();
        assert!(matches!(err, LifecycleError::Validation { .. }));

        let err = engine
            .submit(WorkflowIntent::new(
                "SRV-404",
                WorkflowRequest::maintenance(),
                Actor::new("u-ops", "Ops"),
                "patching",
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_request_must_change_status() {
        let (engine, _) = engine_with_server(AssetStatus::Maintenance).await;
        let err = engine.submit(maintenance("again")).await.unwrap_err();
        assert!(matches!(err, LifecycleError::Validation { .. }));
    }
}

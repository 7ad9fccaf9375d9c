use tracing::Instrument;

use super::WorkflowEngine;
use crate::error::{LifecycleError, LifecycleResult};
use crate::model::{
    Asset, AssetFilter, AuditEntry, AuditQuery, Workflow, WorkflowFilter, WorkflowStats,
    WorkflowStatus,
};
use crate::workflows::{audit_store, Inconsistency};

impl WorkflowEngine {
    /// Gateway mapping: `GET /assets/{id}`.
    pub async fn get_asset(&self, asset_id: &str) -> LifecycleResult<Asset> {
        self.load_asset("get_asset", asset_id).await
    }

    pub async fn get_workflow(&self, workflow_id: &str) -> LifecycleResult<Workflow> {
        self.load_workflow("get_workflow", workflow_id).await
    }

    pub async fn list_assets(&self, filter: &AssetFilter) -> LifecycleResult<Vec<Asset>> {
        let mut assets = self
            .read("list_assets", self.store.list_assets(filter))
            .await?;
        assets.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(assets)
    }

    /// Pending workflows, most urgent first, then oldest first.
    ///
    /// Gateway mapping: `GET /workflows?status=pending`.
    pub async fn list_pending(&self, filter: &WorkflowFilter) -> LifecycleResult<Vec<Workflow>> {
        let filter = WorkflowFilter {
            status: Some(WorkflowStatus::Pending),
            ..filter.clone()
        };
        let mut pending = self
            .read("list_pending", self.store.list_workflows(&filter))
            .await?;
        pending.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(pending)
    }

    /// Every workflow ever raised for an asset, newest first.
    pub async fn asset_workflow_history(&self, asset_id: &str) -> LifecycleResult<Vec<Workflow>> {
        self.load_asset("asset_workflow_history", asset_id).await?;
        let mut history = self
            .read(
                "asset_workflow_history",
                self.store.list_workflows(&WorkflowFilter::for_asset(asset_id)),
            )
            .await?;
        history.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        Ok(history)
    }

    pub async fn workflow_stats(&self) -> LifecycleResult<WorkflowStats> {
        let workflows = self
            .read(
                "workflow_stats",
                self.store.list_workflows(&WorkflowFilter::default()),
            )
            .await?;
        let mut stats = WorkflowStats::default();
        for workflow in &workflows {
            stats.record(workflow);
        }
        Ok(stats)
    }

    pub async fn audit_trail(&self, query: &AuditQuery) -> LifecycleResult<Vec<AuditEntry>> {
        if query.limit == Some(0) {
            return Err(LifecycleError::validation("audit limit must be positive"));
        }
        self.read("audit_trail", self.store.audit_entries(query))
            .await
    }

    /// Scan every asset for lock/workflow disagreements.
    pub async fn check(&self) -> LifecycleResult<Vec<Inconsistency>> {
        let span = self.span("check", None, None);
        let found = self
            .read("check", audit_store(self.store.as_ref()))
            .instrument(span)
            .await?;
        if !found.is_empty() {
            tracing::error!(count = found.len(), "Lifecycle store is inconsistent");
        }
        Ok(found)
    }
}

use chrono::Utc;
use serde_json::json;
use tracing::{error, info, Instrument};

use super::{missing_from_receipt, WorkflowEngine};
use crate::error::{LifecycleError, LifecycleResult};
use crate::model::{
    is_valid_identifier, Actor, Asset, AuditAction, AuditEntry, Decision, ResourceType, Workflow,
    WorkflowStatus,
};
use crate::observability::OperationTimer;
use crate::store::Transaction;
use crate::workflows::{resolve, validate};

impl WorkflowEngine {
    /// Approve or reject a pending workflow. Approval applies the requested
    /// status to the asset; both outcomes release the asset lock. A workflow
    /// that is already decided fails with `InvalidState` and nothing is
    /// re-applied.
    ///
    /// Gateway mapping: `PUT /workflows/{id}/approve` and
    /// `PUT /workflows/{id}/reject`.
    pub async fn decide(
        &self,
        workflow_id: &str,
        decision: Decision,
        approver: &Actor,
        comments: Option<String>,
    ) -> LifecycleResult<(Asset, Workflow)> {
        let span = self.span("decide", None, Some(workflow_id));
        self.decide_inner(workflow_id, decision, approver, comments)
            .instrument(span)
            .await
    }

    pub async fn approve(
        &self,
        workflow_id: &str,
        approver: &Actor,
        comments: Option<String>,
    ) -> LifecycleResult<(Asset, Workflow)> {
        self.decide(workflow_id, Decision::Approve, approver, comments)
            .await
    }

    pub async fn reject(
        &self,
        workflow_id: &str,
        approver: &Actor,
        comments: impl Into<String>,
    ) -> LifecycleResult<(Asset, Workflow)> {
        self.decide(workflow_id, Decision::Reject, approver, Some(comments.into()))
            .await
    }

    async fn decide_inner(
        &self,
        workflow_id: &str,
        decision: Decision,
        approver: &Actor,
        comments: Option<String>,
    ) -> LifecycleResult<(Asset, Workflow)> {
        let timer = OperationTimer::new("decide");
        if !is_valid_identifier(workflow_id) {
            return Err(LifecycleError::validation(format!(
                "'{workflow_id}' is not a valid workflow id"
            )));
        }
        if !is_valid_identifier(&approver.id) {
            return Err(LifecycleError::validation(format!(
                "'{}' is not a valid approver id",
                approver.id
            )));
        }
        let comments = comments
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());
        if decision == Decision::Reject && comments.is_none() {
            return Err(LifecycleError::validation(
                "comments are required when rejecting a workflow",
            ));
        }

        let mut attempt = 0;
        loop {
            let workflow = self.load_workflow("decide", workflow_id).await?;
            if !workflow.is_pending() {
                return Err(LifecycleError::InvalidState {
                    workflow_id: workflow.id,
                    status: workflow.status,
                });
            }

            if self.settings.forbid_self_approval && approver.id == workflow.requester_id {
                return Err(LifecycleError::Unauthorized {
                    approver_id: approver.id.clone(),
                    reason: "requesters cannot decide their own workflow".to_string(),
                });
            }
            self.authorizer
                .authorize(approver, &workflow)
                .await
                .map_err(|denied| LifecycleError::Unauthorized {
                    approver_id: approver.id.clone(),
                    reason: denied.reason,
                })?;

            let asset = self
                .read("decide", self.store.get_asset(&workflow.asset_id))
                .await?
                .ok_or_else(|| LifecycleError::InvariantViolation {
                    details: format!(
                        "workflow {} references missing asset {}",
                        workflow.id, workflow.asset_id
                    ),
                })?;

            let issues = validate(&asset, &workflow);
            if !issues.is_empty() {
                error!(
                    asset_id = %asset.id,
                    workflow_id = %workflow.id,
                    ?issues,
                    "Refusing to decide inconsistent workflow"
                );
                return Err(LifecycleError::InvariantViolation {
                    details: format!("{issues:?}"),
                });
            }

            let next = resolve(&workflow.id, workflow.status, decision).map_err(|status| {
                LifecycleError::InvalidState {
                    workflow_id: workflow.id.clone(),
                    status,
                }
            })?;

            let now = Utc::now();
            let mut decided = workflow.clone();
            decided.status = next;
            decided.approver_id = Some(approver.id.clone());
            decided.approver_name = Some(approver.name.clone());
            decided.comments = comments.clone();
            decided.decided_at = Some(now);
            decided.updated_at = now;

            let mut updated = asset.clone();
            updated.active_workflow_id = None;
            let action = if next == WorkflowStatus::Approved {
                updated.status = workflow.request.target_status();
                updated.updated_at = now;
                AuditAction::WorkflowApproved
            } else {
                AuditAction::WorkflowRejected
            };

            let entry = AuditEntry::new(
                approver,
                action,
                ResourceType::Workflow,
                &workflow.id,
                format!(
                    "{} {} {} of {} ({} -> {})",
                    approver.name,
                    next,
                    workflow.kind(),
                    asset.id,
                    asset.status,
                    updated.status
                ),
            )
            .at(now)
            .with_before(json!({ "workflow": workflow.snapshot(), "asset": asset.snapshot() }))
            .with_after(json!({ "workflow": decided.snapshot(), "asset": updated.snapshot() }));

            let tx = Transaction::new()
                .put_workflow(decided, Some(workflow.version))
                .put_asset(updated, Some(asset.version))
                .append_audit(entry);

            match self.commit(tx).await {
                Ok(receipt) => {
                    match next {
                        WorkflowStatus::Approved => self.metrics.record_approval(),
                        _ => self.metrics.record_rejection(),
                    }
                    let stored_asset = receipt
                        .asset(&asset.id)
                        .cloned()
                        .ok_or_else(|| missing_from_receipt("asset", &asset.id))?;
                    let stored_workflow = receipt
                        .workflow(&workflow.id)
                        .cloned()
                        .ok_or_else(|| missing_from_receipt("workflow", &workflow.id))?;
                    info!(
                        asset_id = %stored_asset.id,
                        workflow_id = %stored_workflow.id,
                        decision = %decision,
                        asset_status = %stored_asset.status,
                        "Workflow decided"
                    );
                    timer.finish();
                    return Ok((stored_asset, stored_workflow));
                }
                Err(e) => self.retry_or_fail("decide", workflow_id, e, &mut attempt)?,
            }
        }
    }
}

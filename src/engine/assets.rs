use chrono::Utc;
use serde::Serialize;
use tracing::{info, Instrument};

use super::{missing_from_receipt, WorkflowEngine};
use crate::config::OnboardingPolicy;
use crate::error::{LifecycleError, LifecycleResult};
use crate::model::{
    is_valid_identifier, Actor, Asset, AssetDetailsPatch, AssetStatus, AssetType, AuditAction,
    AuditEntry, NewAsset, ResourceType, Workflow, WorkflowIntent, WorkflowRequest,
};
use crate::store::{StoreError, Transaction};

const MAX_ID_PROBES: u64 = 1000;

/// Result of [`WorkflowEngine::register_asset`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub asset: Asset,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub onboarding: Option<Workflow>,
}

impl WorkflowEngine {
    /// Create an asset row. Under the `require-approval` onboarding policy
    /// the asset starts offline behind a pending onboarding workflow created
    /// in the same commit.
    pub async fn register_asset(&self, new: NewAsset, actor: &Actor) -> LifecycleResult<Registration> {
        let span = self.span("register_asset", new.id.as_deref(), None);
        self.register_inner(new, actor).instrument(span).await
    }

    /// Edit descriptive fields. Status is not part of the patch and can only
    /// move through a workflow.
    ///
    /// Gateway mapping: `PUT /assets/{id}`.
    pub async fn update_asset_details(
        &self,
        asset_id: &str,
        patch: AssetDetailsPatch,
        actor: &Actor,
    ) -> LifecycleResult<Asset> {
        let span = self.span("update_asset_details", Some(asset_id), None);
        self.update_inner(asset_id, patch, actor)
            .instrument(span)
            .await
    }

    /// Never removes the row: submits a decommission workflow instead, and
    /// fails with `AssetLocked` if one is already pending.
    ///
    /// Gateway mapping: `DELETE /assets/{id}`, answered with the workflow.
    pub async fn delete_asset(
        &self,
        asset_id: &str,
        requester: &Actor,
        reason: impl Into<String>,
    ) -> LifecycleResult<Workflow> {
        self.submit(WorkflowIntent::new(
            asset_id,
            WorkflowRequest::decommission(),
            requester.clone(),
            reason,
        ))
        .await
    }

    async fn register_inner(&self, new: NewAsset, actor: &Actor) -> LifecycleResult<Registration> {
        new.validate().map_err(LifecycleError::validation)?;
        if !is_valid_identifier(&actor.id) {
            return Err(LifecycleError::validation(format!(
                "'{}' is not a valid actor id",
                actor.id
            )));
        }
        let asset_type = new
            .asset_type
            .clone()
            .ok_or_else(|| LifecycleError::validation("asset type is required"))?;

        let mut attempt = 0;
        loop {
            let id = match &new.id {
                Some(id) => {
                    if self
                        .read("register_asset", self.store.get_asset(id))
                        .await?
                        .is_some()
                    {
                        return Err(already_exists(id));
                    }
                    id.clone()
                }
                None => self.next_asset_id(&asset_type).await?,
            };

            let now = Utc::now();
            let (status, onboard) = match self.settings.onboarding {
                OnboardingPolicy::RequireApproval => (AssetStatus::Offline, true),
                OnboardingPolicy::Direct => {
                    (new.initial_status.unwrap_or(AssetStatus::Offline), false)
                }
            };
            let mut asset = new.clone().into_asset(id.clone(), status, now);

            let system = Actor::system();
            let workflow = onboard.then(|| {
                let intent = WorkflowIntent::new(
                    id.clone(),
                    WorkflowRequest::onboarding(),
                    system.clone(),
                    format!("Onboard new asset {}", asset.name),
                );
                Workflow::new_pending(&intent, &asset, now)
            });
            if let Some(wf) = &workflow {
                asset.active_workflow_id = Some(wf.id.clone());
            }

            let mut tx = Transaction::new().append_audit(
                AuditEntry::new(
                    actor,
                    AuditAction::AssetRegistered,
                    ResourceType::Asset,
                    &id,
                    format!("{} registered {} {} ({})", actor.name, asset_type, asset.name, id),
                )
                .at(now)
                .with_after(asset.snapshot()),
            );
            if let Some(wf) = &workflow {
                tx = tx
                    .put_workflow(wf.clone(), None)
                    .append_audit(
                        AuditEntry::new(
                            &system,
                            AuditAction::WorkflowSubmitted,
                            ResourceType::Workflow,
                            &wf.id,
                            format!("Onboarding requested for {id}"),
                        )
                        .at(now)
                        .with_after(wf.snapshot()),
                    );
            }
            tx = tx.put_asset(asset, None);

            match self.commit(tx).await {
                Ok(receipt) => {
                    let asset = receipt
                        .asset(&id)
                        .cloned()
                        .ok_or_else(|| missing_from_receipt("asset", &id))?;
                    let onboarding = match &workflow {
                        Some(wf) => {
                            self.metrics.record_submission();
                            Some(
                                receipt
                                    .workflow(&wf.id)
                                    .cloned()
                                    .ok_or_else(|| missing_from_receipt("workflow", &wf.id))?,
                            )
                        }
                        None => None,
                    };
                    info!(
                        asset_id = %asset.id,
                        status = %asset.status,
                        onboarding_workflow = onboarding.as_ref().map(|w| w.id.as_str()),
                        "Asset registered"
                    );
                    return Ok(Registration { asset, onboarding });
                }
                Err(StoreError::Conflict { .. }) if new.id.is_some() => {
                    return Err(already_exists(&id));
                }
                Err(e) => self.retry_or_fail("register_asset", &id, e, &mut attempt)?,
            }
        }
    }

    /// `<PREFIX>-<NNN>`, counting from the number of assets of this type and
    /// probing upward past ids already taken.
    async fn next_asset_id(&self, asset_type: &AssetType) -> LifecycleResult<String> {
        let count = self
            .read("register_asset", self.store.count_assets_by_type(asset_type))
            .await?;
        for n in (count + 1)..=(count + MAX_ID_PROBES) {
            let candidate = format!("{}-{:03}", asset_type.id_prefix(), n);
            if self
                .read("register_asset", self.store.get_asset(&candidate))
                .await?
                .is_none()
            {
                return Ok(candidate);
            }
        }
        Err(LifecycleError::InvariantViolation {
            details: format!(
                "no free {} id within {} of the asset count",
                asset_type.id_prefix(),
                MAX_ID_PROBES
            ),
        })
    }

    async fn update_inner(
        &self,
        asset_id: &str,
        patch: AssetDetailsPatch,
        actor: &Actor,
    ) -> LifecycleResult<Asset> {
        if patch.is_empty() {
            return Err(LifecycleError::validation("no fields to update"));
        }
        patch.validate().map_err(LifecycleError::validation)?;
        if !is_valid_identifier(&actor.id) {
            return Err(LifecycleError::validation(format!(
                "'{}' is not a valid actor id",
                actor.id
            )));
        }

        let mut attempt = 0;
        loop {
            let asset = self.load_asset("update_asset_details", asset_id).await?;
            if asset.is_decommissioned() {
                return Err(LifecycleError::validation(format!(
                    "asset {asset_id} is decommissioned and read-only"
                )));
            }

            let mut updated = asset.clone();
            if !patch.apply(&mut updated) {
                return Ok(asset);
            }
            let now = Utc::now();
            updated.updated_at = now;

            let entry = AuditEntry::new(
                actor,
                AuditAction::AssetUpdated,
                ResourceType::Asset,
                asset_id,
                format!("{} updated details of {}", actor.name, asset_id),
            )
            .at(now)
            .with_before(asset.snapshot())
            .with_after(updated.snapshot());

            let tx = Transaction::new()
                .put_asset(updated, Some(asset.version))
                .append_audit(entry);

            match self.commit(tx).await {
                Ok(receipt) => {
                    let stored = receipt
                        .asset(asset_id)
                        .cloned()
                        .ok_or_else(|| missing_from_receipt("asset", asset_id))?;
                    info!(asset_id = %stored.id, version = stored.version, "Asset details updated");
                    return Ok(stored);
                }
                Err(e) => self.retry_or_fail("update_asset_details", asset_id, e, &mut attempt)?,
            }
        }
    }
}

fn already_exists(id: &str) -> LifecycleError {
    LifecycleError::validation(format!("asset {id} already exists"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineSettings;
    use crate::model::WorkflowStatus;
    use crate::store::{LifecycleStore, MemoryStore};
    use std::sync::Arc;

    fn operator() -> Actor {
        Actor::new("u-ops", "Ops")
    }

    #[tokio::test]
    async fn test_register_requires_onboarding_by_default() {
        let store = Arc::new(MemoryStore::new());
        let engine = WorkflowEngine::new(store.clone());
        let registration = engine
            .register_asset(NewAsset::new("Web Server 01", AssetType::Server), &operator())
            .await
            .unwrap();

        assert_eq!(registration.asset.id, "SRV-001");
        assert_eq!(registration.asset.status, AssetStatus::Offline);
        let onboarding = registration.onboarding.unwrap();
        assert_eq!(onboarding.status, WorkflowStatus::Pending);
        assert_eq!(onboarding.requester_id, "system");
        assert_eq!(
            registration.asset.active_workflow_id.as_deref(),
            Some(onboarding.id.as_str())
        );

        let audit = store.snapshot().await.audit;
        assert_eq!(audit.len(), 2);
    }

    #[tokio::test]
    async fn test_direct_policy_honours_initial_status() {
        let store = Arc::new(MemoryStore::new());
        let engine = WorkflowEngine::new(store.clone()).with_settings(EngineSettings {
            onboarding: OnboardingPolicy::Direct,
            ..Default::default()
        });
        let registration = engine
            .register_asset(
                NewAsset::new("Core Switch", AssetType::Network)
                    .with_initial_status(AssetStatus::Online),
                &operator(),
            )
            .await
            .unwrap();
        assert_eq!(registration.asset.id, "NET-001");
        assert_eq!(registration.asset.status, AssetStatus::Online);
        assert!(registration.onboarding.is_none());
        assert!(!registration.asset.is_locked());
    }

    #[tokio::test]
    async fn test_generated_ids_skip_taken_ones() {
        let store = Arc::new(MemoryStore::new());
        let engine = WorkflowEngine::new(store.clone());
        engine
            .register_asset(
                NewAsset::new("Manual", AssetType::Storage).with_id("STG-001"),
                &operator(),
            )
            .await
            .unwrap();
        engine
            .register_asset(
                NewAsset::new("Custom", AssetType::Storage).with_id("STG-002"),
                &operator(),
            )
            .await
            .unwrap();
        let third = engine
            .register_asset(NewAsset::new("Generated", AssetType::Storage), &operator())
            .await
            .unwrap();
        assert_eq!(third.asset.id, "STG-003");

        let dup = engine
            .register_asset(
                NewAsset::new("Again", AssetType::Storage).with_id("STG-001"),
                &operator(),
            )
            .await
            .unwrap_err();
        assert!(matches!(dup, LifecycleError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_update_details_while_locked_keeps_lock() {
        let store = Arc::new(MemoryStore::new());
        let engine = WorkflowEngine::new(store.clone());
        let registration = engine
            .register_asset(NewAsset::new("Web Server 01", AssetType::Server), &operator())
            .await
            .unwrap();

        let patch = AssetDetailsPatch {
            location: Some("DC-East".to_string()),
            ..Default::default()
        };
        let updated = engine
            .update_asset_details("SRV-001", patch, &operator())
            .await
            .unwrap();
        assert_eq!(updated.location, "DC-East");
        assert_eq!(updated.version, registration.asset.version + 1);
        assert_eq!(updated.active_workflow_id, registration.asset.active_workflow_id);
        assert_eq!(updated.status, AssetStatus::Offline);

        let err = engine
            .update_asset_details("SRV-001", AssetDetailsPatch::default(), &operator())
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_delete_asset_submits_decommission() {
        let store = Arc::new(MemoryStore::new());
        let engine = WorkflowEngine::new(store.clone()).with_settings(EngineSettings {
            onboarding: OnboardingPolicy::Direct,
            ..Default::default()
        });
        engine
            .register_asset(
                NewAsset::new("Old Laptop", AssetType::Workstation)
                    .with_initial_status(AssetStatus::Online),
                &operator(),
            )
            .await
            .unwrap();

        let workflow = engine
            .delete_asset("WS-001", &operator(), "end of lease")
            .await
            .unwrap();
        assert_eq!(workflow.request, WorkflowRequest::decommission());
        assert!(store.get_asset("WS-001").await.unwrap().is_some());

        let err = engine
            .delete_asset("WS-001", &operator(), "again")
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::AssetLocked { .. }));
    }
}

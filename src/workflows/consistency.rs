//! Lock/workflow agreement checks.
//!
//! An asset's `active_workflow_id` must point at exactly the one pending
//! workflow for that asset, and at nothing else.

use serde::Serialize;
use std::collections::HashMap;

use crate::model::{Asset, AssetFilter, Workflow, WorkflowFilter};
use crate::store::{LifecycleStore, StoreResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Inconsistency {
    /// A pending workflow exists but the asset's lock names something else.
    #[serde(rename_all = "camelCase")]
    LockMismatch {
        asset_id: String,
        expected: String,
        actual: Option<String>,
    },
    /// The asset's lock names a workflow that belongs to another asset.
    #[serde(rename_all = "camelCase")]
    AssetMismatch {
        asset_id: String,
        workflow_id: String,
        workflow_asset_id: String,
    },
    /// More than one pending workflow for the same asset.
    #[serde(rename_all = "camelCase")]
    DuplicatePending {
        asset_id: String,
        workflow_ids: Vec<String>,
    },
    /// The lock names a workflow that is missing or already decided.
    #[serde(rename_all = "camelCase")]
    DanglingLock {
        asset_id: String,
        workflow_id: String,
    },
    /// A pending workflow for an asset that does not exist.
    #[serde(rename_all = "camelCase")]
    OrphanWorkflow {
        workflow_id: String,
        asset_id: String,
    },
}

/// `asset.active_workflow_id == workflow.id` iff the workflow is pending and
/// targets this asset. Empty result means the pair agrees.
pub fn validate(asset: &Asset, workflow: &Workflow) -> Vec<Inconsistency> {
    let points_here = asset.active_workflow_id.as_deref() == Some(workflow.id.as_str());
    let should_point = workflow.is_pending() && workflow.asset_id == asset.id;

    match (points_here, should_point) {
        (true, true) | (false, false) => Vec::new(),
        (true, false) if workflow.asset_id != asset.id => vec![Inconsistency::AssetMismatch {
            asset_id: asset.id.clone(),
            workflow_id: workflow.id.clone(),
            workflow_asset_id: workflow.asset_id.clone(),
        }],
        (true, false) => vec![Inconsistency::DanglingLock {
            asset_id: asset.id.clone(),
            workflow_id: workflow.id.clone(),
        }],
        (false, true) => vec![Inconsistency::LockMismatch {
            asset_id: asset.id.clone(),
            expected: workflow.id.clone(),
            actual: asset.active_workflow_id.clone(),
        }],
    }
}

/// All checks for one asset, given its pending workflows and, when the lock
/// points outside that set, the workflow it points at.
pub fn check_asset(
    asset: &Asset,
    pending: &[Workflow],
    lock_target: Option<&Workflow>,
) -> Vec<Inconsistency> {
    let mut found = Vec::new();

    if pending.len() > 1 {
        let mut workflow_ids: Vec<String> = pending.iter().map(|w| w.id.clone()).collect();
        workflow_ids.sort();
        found.push(Inconsistency::DuplicatePending {
            asset_id: asset.id.clone(),
            workflow_ids,
        });
    }

    for workflow in pending {
        found.extend(validate(asset, workflow));
    }

    if let Some(active) = &asset.active_workflow_id {
        if !pending.iter().any(|w| &w.id == active) {
            match lock_target {
                Some(target) => found.extend(validate(asset, target)),
                None => found.push(Inconsistency::DanglingLock {
                    asset_id: asset.id.clone(),
                    workflow_id: active.clone(),
                }),
            }
        }
    }

    found
}

/// Full scan of the store.
pub async fn audit_store(store: &dyn LifecycleStore) -> StoreResult<Vec<Inconsistency>> {
    let assets = store.list_assets(&AssetFilter::default()).await?;
    let pending = store.list_workflows(&WorkflowFilter::pending()).await?;

    let mut by_asset: HashMap<&str, Vec<Workflow>> = HashMap::new();
    for workflow in &pending {
        by_asset
            .entry(workflow.asset_id.as_str())
            .or_default()
            .push(workflow.clone());
    }

    let mut found = Vec::new();
    for asset in &assets {
        let pending_here = by_asset.remove(asset.id.as_str()).unwrap_or_default();
        let lock_target = match &asset.active_workflow_id {
            Some(active) if !pending_here.iter().any(|w| &w.id == active) => {
                store.get_workflow(active).await?
            }
            _ => None,
        };
        found.extend(check_asset(asset, &pending_here, lock_target.as_ref()));
    }

    let mut orphans: Vec<Inconsistency> = by_asset
        .into_values()
        .flatten()
        .map(|w| Inconsistency::OrphanWorkflow {
            workflow_id: w.id,
            asset_id: w.asset_id,
        })
        .collect();
    orphans.sort_by(|a, b| format!("{a:?}").cmp(&format!("{b:?}")));
    found.extend(orphans);

    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        Actor, AssetStatus, AssetType, NewAsset, WorkflowIntent, WorkflowRequest, WorkflowStatus,
    };
    use chrono::Utc;

    fn asset(id: &str) -> Asset {
        NewAsset::new("Array", AssetType::Storage).into_asset(
            id.to_string(),
            AssetStatus::Online,
            Utc::now(),
        )
    }

    fn workflow(asset: &Asset) -> Workflow {
        let intent = WorkflowIntent::new(
            asset.id.clone(),
            WorkflowRequest::maintenance(),
            Actor::new("u-1", "Dana"),
            "disk swap",
        );
        Workflow::new_pending(&intent, asset, Utc::now())
    }

    #[test]
    fn test_locked_asset_with_its_pending_workflow_is_consistent() {
        let mut a = asset("STG-001");
        let w = workflow(&a);
        a.active_workflow_id = Some(w.id.clone());
        assert!(validate(&a, &w).is_empty());
    }

    #[test]
    fn test_unlocked_asset_with_decided_workflow_is_consistent() {
        let a = asset("STG-001");
        let mut w = workflow(&a);
        w.status = WorkflowStatus::Approved;
        assert!(validate(&a, &w).is_empty());
    }

    #[test]
    fn test_pending_workflow_without_lock_is_flagged() {
        let a = asset("STG-001");
        let w = workflow(&a);
        assert_eq!(
            validate(&a, &w),
            vec![Inconsistency::LockMismatch {
                asset_id: "STG-001".to_string(),
                expected: w.id.clone(),
                actual: None,
            }]
        );
    }

    #[test]
    fn test_lock_on_decided_workflow_is_dangling() {
        let mut a = asset("STG-001");
        let mut w = workflow(&a);
        w.status = WorkflowStatus::Rejected;
        a.active_workflow_id = Some(w.id.clone());
        assert!(matches!(
            validate(&a, &w).as_slice(),
            [Inconsistency::DanglingLock { .. }]
        ));
    }

    #[test]
    fn test_lock_on_foreign_workflow_is_asset_mismatch() {
        let other = asset("STG-002");
        let w = workflow(&other);
        let mut a = asset("STG-001");
        a.active_workflow_id = Some(w.id.clone());
        assert!(matches!(
            validate(&a, &w).as_slice(),
            [Inconsistency::AssetMismatch { .. }]
        ));
    }

    #[test]
    fn test_check_asset_reports_duplicates_and_missing_lock_target() {
        let mut a = asset("STG-001");
        let first = workflow(&a);
        let second = workflow(&a);
        a.active_workflow_id = Some(first.id.clone());

        let found = check_asset(&a, &[first, second], None);
        assert!(found
            .iter()
            .any(|i| matches!(i, Inconsistency::DuplicatePending { .. })));

        let mut locked = asset("STG-003");
        locked.active_workflow_id = Some("WF-missing".to_string());
        assert_eq!(
            check_asset(&locked, &[], None),
            vec![Inconsistency::DanglingLock {
                asset_id: "STG-003".to_string(),
                workflow_id: "WF-missing".to_string(),
            }]
        );
    }
}

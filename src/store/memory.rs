use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use tokio::sync::RwLock;

use super::{next_version, CommitReceipt, LifecycleStore, StoreError, StoreResult, Transaction, Write};
use crate::model::{
    Asset, AssetFilter, AssetType, AuditEntry, AuditQuery, Workflow, WorkflowFilter,
    WorkflowStatus,
};

/// Serializable image of a [`MemoryStore`], used by the CLI state file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSnapshot {
    #[serde(default)]
    pub assets: BTreeMap<String, Asset>,
    #[serde(default)]
    pub workflows: BTreeMap<String, Workflow>,
    #[serde(default)]
    pub audit: Vec<AuditEntry>,
    /// Ids present in `audit`; rebuilt on load.
    #[serde(skip)]
    audit_ids: HashSet<String>,
}

impl StoreSnapshot {
    fn reindex(&mut self) {
        self.audit_ids = self.audit.iter().map(|e| e.id.clone()).collect();
    }

    fn has_audit_entry(&self, id: &str) -> bool {
        self.audit_ids.contains(id)
    }
}

/// Map-backed store. A commit validates and applies under one write lock.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<StoreSnapshot>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(mut snapshot: StoreSnapshot) -> Self {
        snapshot.reindex();
        Self {
            state: RwLock::new(snapshot),
        }
    }

    pub async fn snapshot(&self) -> StoreSnapshot {
        self.state.read().await.clone()
    }
}

/// Writes staged on top of the current state while a commit is checked.
#[derive(Default)]
struct Staged {
    assets: HashMap<String, Asset>,
    workflows: HashMap<String, Workflow>,
    audit: Vec<AuditEntry>,
    audit_ids: HashSet<String>,
}

fn stage(state: &StoreSnapshot, writes: Vec<Write>) -> StoreResult<Staged> {
    let mut staged = Staged::default();

    for write in writes {
        match write {
            Write::PutAsset {
                mut asset,
                expected_version,
            } => {
                let found = staged
                    .assets
                    .get(&asset.id)
                    .or_else(|| state.assets.get(&asset.id))
                    .map(|a| a.version);
                if found != expected_version {
                    return Err(StoreError::Conflict {
                        entity: "asset",
                        id: asset.id,
                        expected: expected_version,
                        found,
                    });
                }
                asset.version = next_version(expected_version);
                staged.assets.insert(asset.id.clone(), asset);
            }
            Write::PutWorkflow {
                mut workflow,
                expected_version,
            } => {
                let found = staged
                    .workflows
                    .get(&workflow.id)
                    .or_else(|| state.workflows.get(&workflow.id))
                    .map(|w| w.version);
                if found != expected_version {
                    return Err(StoreError::Conflict {
                        entity: "workflow",
                        id: workflow.id,
                        expected: expected_version,
                        found,
                    });
                }
                workflow.version = next_version(expected_version);
                staged.workflows.insert(workflow.id.clone(), workflow);
            }
            Write::AppendAudit(entry) => {
                let duplicate = staged.audit_ids.contains(&entry.id)
                    || state.has_audit_entry(&entry.id);
                if !duplicate {
                    staged.audit_ids.insert(entry.id.clone());
                    staged.audit.push(entry);
                }
            }
        }
    }

    check_pending_uniqueness(state, &staged)?;
    Ok(staged)
}

fn check_pending_uniqueness(state: &StoreSnapshot, staged: &Staged) -> StoreResult<()> {
    for workflow in staged.workflows.values().filter(|w| w.is_pending()) {
        let existing = state
            .workflows
            .values()
            .filter(|w| !staged.workflows.contains_key(&w.id))
            .chain(staged.workflows.values())
            .find(|w| w.id != workflow.id && w.asset_id == workflow.asset_id && w.is_pending());
        if let Some(existing) = existing {
            return Err(StoreError::UniqueViolation {
                asset_id: workflow.asset_id.clone(),
                workflow_id: Some(existing.id.clone()),
            });
        }
    }
    Ok(())
}

#[async_trait]
impl LifecycleStore for MemoryStore {
    async fn get_asset(&self, id: &str) -> StoreResult<Option<Asset>> {
        Ok(self.state.read().await.assets.get(id).cloned())
    }

    async fn get_workflow(&self, id: &str) -> StoreResult<Option<Workflow>> {
        Ok(self.state.read().await.workflows.get(id).cloned())
    }

    async fn put_asset(&self, asset: Asset, expected_version: Option<u64>) -> StoreResult<Asset> {
        let id = asset.id.clone();
        let receipt = self
            .commit(Transaction::new().put_asset(asset, expected_version))
            .await?;
        receipt
            .assets
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::Backend(format!("asset {id} missing from commit receipt")))
    }

    async fn query_pending_by_asset(&self, asset_id: &str) -> StoreResult<Vec<Workflow>> {
        let state = self.state.read().await;
        Ok(state
            .workflows
            .values()
            .filter(|w| w.asset_id == asset_id && w.status == WorkflowStatus::Pending)
            .cloned()
            .collect())
    }

    async fn list_assets(&self, filter: &AssetFilter) -> StoreResult<Vec<Asset>> {
        let state = self.state.read().await;
        Ok(state
            .assets
            .values()
            .filter(|a| filter.matches(a))
            .cloned()
            .collect())
    }

    async fn list_workflows(&self, filter: &WorkflowFilter) -> StoreResult<Vec<Workflow>> {
        let state = self.state.read().await;
        Ok(state
            .workflows
            .values()
            .filter(|w| filter.matches(w))
            .cloned()
            .collect())
    }

    async fn count_assets_by_type(&self, asset_type: &AssetType) -> StoreResult<u64> {
        let state = self.state.read().await;
        Ok(state
            .assets
            .values()
            .filter(|a| &a.asset_type == asset_type)
            .count() as u64)
    }

    async fn audit_entries(&self, query: &AuditQuery) -> StoreResult<Vec<AuditEntry>> {
        let state = self.state.read().await;
        let mut entries: Vec<AuditEntry> = state
            .audit
            .iter()
            .rev()
            .filter(|e| query.matches(e))
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        entries.truncate(query.effective_limit());
        Ok(entries)
    }

    async fn commit(&self, tx: Transaction) -> StoreResult<CommitReceipt> {
        let mut state = self.state.write().await;
        let staged = stage(&state, tx.into_writes())?;

        let mut receipt = CommitReceipt::default();
        for (id, asset) in staged.assets {
            receipt.assets.push(asset.clone());
            state.assets.insert(id, asset);
        }
        for (id, workflow) in staged.workflows {
            receipt.workflows.push(workflow.clone());
            state.workflows.insert(id, workflow);
        }
        state.audit_ids.extend(staged.audit_ids);
        state.audit.extend(staged.audit.iter().cloned());
        receipt.audit = staged.audit;
        Ok(receipt)
    }
}

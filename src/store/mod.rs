//! Persistence boundary for assets, workflows and the audit ledger.
//!
//! Every multi-record change goes through [`LifecycleStore::commit`], which
//! applies a [`Transaction`] atomically: each write carries the version it
//! expects to replace, and the store refuses the whole batch if any version
//! moved or if it would leave two pending workflows on one asset.

use async_trait::async_trait;
use thiserror::Error;

#[cfg(any(test, feature = "testing"))]
use mockall::automock;

use crate::model::{Asset, AssetFilter, AssetType, AuditEntry, AuditQuery, Workflow, WorkflowFilter};

pub mod memory;
#[cfg(feature = "database")]
pub mod sqlite;

pub use memory::{MemoryStore, StoreSnapshot};
#[cfg(feature = "database")]
pub use sqlite::SqliteStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Version conflict on {entity} {id} (expected {expected:?}, found {found:?})")]
    Conflict {
        entity: &'static str,
        id: String,
        expected: Option<u64>,
        found: Option<u64>,
    },

    #[error("Asset {asset_id} already has a pending workflow")]
    UniqueViolation {
        asset_id: String,
        workflow_id: Option<String>,
    },

    #[error("Store operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    #[error("Store backend error: {0}")]
    Backend(String),

    #[error("Record serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone)]
pub enum Write {
    /// `expected_version: None` inserts and fails if the id exists.
    PutAsset {
        asset: Asset,
        expected_version: Option<u64>,
    },
    PutWorkflow {
        workflow: Workflow,
        expected_version: Option<u64>,
    },
    /// Duplicate entry ids are ignored.
    AppendAudit(AuditEntry),
}

#[derive(Debug, Clone, Default)]
pub struct Transaction {
    writes: Vec<Write>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_asset(mut self, asset: Asset, expected_version: Option<u64>) -> Self {
        self.writes.push(Write::PutAsset {
            asset,
            expected_version,
        });
        self
    }

    pub fn put_workflow(mut self, workflow: Workflow, expected_version: Option<u64>) -> Self {
        self.writes.push(Write::PutWorkflow {
            workflow,
            expected_version,
        });
        self
    }

    pub fn append_audit(mut self, entry: AuditEntry) -> Self {
        self.writes.push(Write::AppendAudit(entry));
        self
    }

    pub fn writes(&self) -> &[Write] {
        &self.writes
    }

    pub fn into_writes(self) -> Vec<Write> {
        self.writes
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }
}

/// Records as stored by a successful commit, with their new versions.
#[derive(Debug, Clone, Default)]
pub struct CommitReceipt {
    pub assets: Vec<Asset>,
    pub workflows: Vec<Workflow>,
    pub audit: Vec<AuditEntry>,
}

impl CommitReceipt {
    pub fn asset(&self, id: &str) -> Option<&Asset> {
        self.assets.iter().find(|a| a.id == id)
    }

    pub fn workflow(&self, id: &str) -> Option<&Workflow> {
        self.workflows.iter().find(|w| w.id == id)
    }
}

#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait LifecycleStore: Send + Sync {
    async fn get_asset(&self, id: &str) -> StoreResult<Option<Asset>>;

    async fn get_workflow(&self, id: &str) -> StoreResult<Option<Workflow>>;

    /// Single-record write with the same version rules as [`Write::PutAsset`].
    async fn put_asset(&self, asset: Asset, expected_version: Option<u64>) -> StoreResult<Asset>;

    async fn query_pending_by_asset(&self, asset_id: &str) -> StoreResult<Vec<Workflow>>;

    async fn list_assets(&self, filter: &AssetFilter) -> StoreResult<Vec<Asset>>;

    async fn list_workflows(&self, filter: &WorkflowFilter) -> StoreResult<Vec<Workflow>>;

    async fn count_assets_by_type(&self, asset_type: &AssetType) -> StoreResult<u64>;

    /// Newest first, truncated to the query's limit.
    async fn audit_entries(&self, query: &AuditQuery) -> StoreResult<Vec<AuditEntry>>;

    async fn commit(&self, tx: Transaction) -> StoreResult<CommitReceipt>;
}

pub(crate) fn next_version(expected: Option<u64>) -> u64 {
    expected.map_or(1, |v| v + 1)
}

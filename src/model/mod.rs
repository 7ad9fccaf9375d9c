//! Records owned by the lifecycle store: assets, workflows and audit entries.

pub mod asset;
pub mod audit;
pub mod workflow;

pub use asset::{Asset, AssetCost, AssetDetailsPatch, AssetFilter, AssetStatus, AssetType, NewAsset};
pub use audit::{AuditAction, AuditEntry, AuditQuery, ResourceType};
pub use workflow::{
    Decision, Workflow, WorkflowFilter, WorkflowIntent, WorkflowKind, WorkflowRequest,
    WorkflowStats, WorkflowStatus, WorkflowView,
};

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

static IDENTIFIER: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._:@-]{0,127}$"));

/// Ids for assets, workflows and actors: no whitespace, no path separators.
pub fn is_valid_identifier(value: &str) -> bool {
    match IDENTIFIER.as_ref() {
        Ok(re) => re.is_match(value),
        Err(_) => false,
    }
}

/// Pre-verified identity handed to the engine by its caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    pub name: String,
}

impl Actor {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }

    /// The engine's own identity, used for workflows it raises by itself.
    pub fn system() -> Self {
        Self::new("system", "System")
    }
}

pub(crate) fn snapshot<T: Serialize>(value: &T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or(serde_json::Value::Null)
}

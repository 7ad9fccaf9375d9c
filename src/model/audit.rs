use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::Actor;

pub const DEFAULT_AUDIT_LIMIT: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    AssetRegistered,
    AssetUpdated,
    WorkflowSubmitted,
    WorkflowApproved,
    WorkflowRejected,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditAction::AssetRegistered => "asset_registered",
            AuditAction::AssetUpdated => "asset_updated",
            AuditAction::WorkflowSubmitted => "workflow_submitted",
            AuditAction::WorkflowApproved => "workflow_approved",
            AuditAction::WorkflowRejected => "workflow_rejected",
        }
    }
}

impl FromStr for AuditAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "asset_registered" => Ok(AuditAction::AssetRegistered),
            "asset_updated" => Ok(AuditAction::AssetUpdated),
            "workflow_submitted" => Ok(AuditAction::WorkflowSubmitted),
            "workflow_approved" => Ok(AuditAction::WorkflowApproved),
            "workflow_rejected" => Ok(AuditAction::WorkflowRejected),
            other => Err(format!("unknown audit action '{other}'")),
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Asset,
    Workflow,
}

impl ResourceType {
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceType::Asset => "asset",
            ResourceType::Workflow => "workflow",
        }
    }
}

impl FromStr for ResourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asset" => Ok(ResourceType::Asset),
            "workflow" => Ok(ResourceType::Workflow),
            other => Err(format!("unknown resource type '{other}'")),
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only ledger row. Ids are UUIDv4 so replays can be deduplicated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub actor_id: String,
    pub actor_name: String,
    pub action: AuditAction,
    pub resource_type: ResourceType,
    pub resource_id: String,
    pub description: String,
    pub before: serde_json::Value,
    pub after: serde_json::Value,
}

impl AuditEntry {
    pub fn new(
        actor: &Actor,
        action: AuditAction,
        resource_type: ResourceType,
        resource_id: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            actor_id: actor.id.clone(),
            actor_name: actor.name.clone(),
            action,
            resource_type,
            resource_id: resource_id.into(),
            description: description.into(),
            before: serde_json::Value::Null,
            after: serde_json::Value::Null,
        }
    }

    pub fn with_before(mut self, before: serde_json::Value) -> Self {
        self.before = before;
        self
    }

    pub fn with_after(mut self, after: serde_json::Value) -> Self {
        self.after = after;
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditQuery {
    pub resource_type: Option<ResourceType>,
    pub resource_id: Option<String>,
    pub actor_id: Option<String>,
    pub action: Option<AuditAction>,
    pub limit: Option<usize>,
}

impl AuditQuery {
    pub fn for_resource(resource_type: ResourceType, resource_id: impl Into<String>) -> Self {
        Self {
            resource_type: Some(resource_type),
            resource_id: Some(resource_id.into()),
            ..Default::default()
        }
    }

    pub fn with_action(mut self, action: AuditAction) -> Self {
        self.action = Some(action);
        self
    }

    pub fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_AUDIT_LIMIT)
    }

    pub fn matches(&self, entry: &AuditEntry) -> bool {
        self.resource_type.is_none_or(|t| entry.resource_type == t)
            && self
                .resource_id
                .as_ref()
                .is_none_or(|id| &entry.resource_id == id)
            && self.actor_id.as_ref().is_none_or(|id| &entry.actor_id == id)
            && self.action.is_none_or(|a| entry.action == a)
    }
}

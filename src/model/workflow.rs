use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::asset::{Asset, AssetStatus};
use super::{is_valid_identifier, Actor};
use crate::priority::Priority;

/// Discriminant of [`WorkflowRequest`], used for filters and statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkflowKind {
    Onboarding,
    StatusChange,
    Maintenance,
    Decommission,
}

impl WorkflowKind {
    pub const ALL: [WorkflowKind; 4] = [
        WorkflowKind::Onboarding,
        WorkflowKind::StatusChange,
        WorkflowKind::Maintenance,
        WorkflowKind::Decommission,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            WorkflowKind::Onboarding => "onboarding",
            WorkflowKind::StatusChange => "status-change",
            WorkflowKind::Maintenance => "maintenance",
            WorkflowKind::Decommission => "decommission",
        }
    }
}

impl FromStr for WorkflowKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "onboarding" => Ok(WorkflowKind::Onboarding),
            "status-change" => Ok(WorkflowKind::StatusChange),
            "maintenance" => Ok(WorkflowKind::Maintenance),
            "decommission" => Ok(WorkflowKind::Decommission),
            other => Err(format!("unknown workflow type '{other}'")),
        }
    }
}

impl fmt::Display for WorkflowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The requested change, tagged by workflow type.
///
/// Serialized adjacently so the wire keeps `type` and `requestedChange`
/// side by side: `{"type":"maintenance","requestedChange":{"status":"maintenance"}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "requestedChange", rename_all = "kebab-case")]
pub enum WorkflowRequest {
    Onboarding { status: AssetStatus },
    StatusChange { status: AssetStatus },
    Maintenance { status: AssetStatus },
    Decommission { status: AssetStatus },
}

impl WorkflowRequest {
    pub fn onboarding() -> Self {
        WorkflowRequest::Onboarding {
            status: AssetStatus::Online,
        }
    }

    pub fn status_change(status: AssetStatus) -> Self {
        WorkflowRequest::StatusChange { status }
    }

    pub fn maintenance() -> Self {
        WorkflowRequest::Maintenance {
            status: AssetStatus::Maintenance,
        }
    }

    pub fn decommission() -> Self {
        WorkflowRequest::Decommission {
            status: AssetStatus::Decommissioned,
        }
    }

    /// Builds the request for a kind, using the kind's natural target when
    /// none is given.
    pub fn for_kind(kind: WorkflowKind, status: Option<AssetStatus>) -> Result<Self, String> {
        let request = match (kind, status) {
            (WorkflowKind::Onboarding, None) => Self::onboarding(),
            (WorkflowKind::Onboarding, Some(status)) => WorkflowRequest::Onboarding { status },
            (WorkflowKind::StatusChange, None) => {
                return Err("status-change requests need a target status".to_string())
            }
            (WorkflowKind::StatusChange, Some(status)) => Self::status_change(status),
            (WorkflowKind::Maintenance, status) => WorkflowRequest::Maintenance {
                status: status.unwrap_or(AssetStatus::Maintenance),
            },
            (WorkflowKind::Decommission, status) => WorkflowRequest::Decommission {
                status: status.unwrap_or(AssetStatus::Decommissioned),
            },
        };
        request.validate()?;
        Ok(request)
    }

    pub fn kind(&self) -> WorkflowKind {
        match self {
            WorkflowRequest::Onboarding { .. } => WorkflowKind::Onboarding,
            WorkflowRequest::StatusChange { .. } => WorkflowKind::StatusChange,
            WorkflowRequest::Maintenance { .. } => WorkflowKind::Maintenance,
            WorkflowRequest::Decommission { .. } => WorkflowKind::Decommission,
        }
    }

    pub fn target_status(&self) -> AssetStatus {
        match self {
            WorkflowRequest::Onboarding { status }
            | WorkflowRequest::StatusChange { status }
            | WorkflowRequest::Maintenance { status }
            | WorkflowRequest::Decommission { status } => *status,
        }
    }

    /// The payload must agree with its kind.
    pub fn validate(&self) -> Result<(), String> {
        let ok = match self {
            WorkflowRequest::Onboarding { status } | WorkflowRequest::StatusChange { status } => {
                matches!(status, AssetStatus::Online | AssetStatus::Offline)
            }
            WorkflowRequest::Maintenance { status } => *status == AssetStatus::Maintenance,
            WorkflowRequest::Decommission { status } => *status == AssetStatus::Decommissioned,
        };
        if ok {
            Ok(())
        } else {
            Err(format!(
                "{} requests cannot target status '{}'",
                self.kind(),
                self.target_status()
            ))
        }
    }

    /// Checks the request against the asset it would be applied to.
    pub fn check_against(&self, asset: &Asset) -> Result<(), String> {
        if asset.is_decommissioned() {
            return Err(format!(
                "asset {} is decommissioned and accepts no further changes",
                asset.id
            ));
        }
        let target = self.target_status();
        if asset.status == target {
            return Err(format!("asset {} is already {}", asset.id, target));
        }
        if let WorkflowRequest::Onboarding { .. } = self {
            if asset.status != AssetStatus::Offline {
                return Err(format!(
                    "only offline assets can be onboarded; {} is {}",
                    asset.id, asset.status
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    Pending,
    Approved,
    Rejected,
}

impl WorkflowStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkflowStatus::Pending => "pending",
            WorkflowStatus::Approved => "approved",
            WorkflowStatus::Rejected => "rejected",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, WorkflowStatus::Pending)
    }
}

impl FromStr for WorkflowStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(WorkflowStatus::Pending),
            "approved" => Ok(WorkflowStatus::Approved),
            "rejected" => Ok(WorkflowStatus::Rejected),
            other => Err(format!("unknown workflow status '{other}'")),
        }
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Approve,
    Reject,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Approve => f.write_str("approve"),
            Decision::Reject => f.write_str("reject"),
        }
    }
}

/// One lifecycle request against one asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    pub id: String,
    pub request: WorkflowRequest,
    pub asset_id: String,
    pub asset_name: String,
    pub requester_id: String,
    pub requester_name: String,
    #[serde(default)]
    pub approver_id: Option<String>,
    #[serde(default)]
    pub approver_name: Option<String>,
    pub status: WorkflowStatus,
    pub reason: String,
    pub priority: Priority,
    #[serde(default)]
    pub comments: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub decided_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub version: u64,
}

impl Workflow {
    pub fn generate_id() -> String {
        let simple = Uuid::new_v4().simple().to_string();
        format!("WF-{}", &simple[..12])
    }

    pub(crate) fn new_pending(intent: &WorkflowIntent, asset: &Asset, now: DateTime<Utc>) -> Self {
        Self {
            id: Self::generate_id(),
            request: intent.request.clone(),
            asset_id: asset.id.clone(),
            asset_name: asset.name.clone(),
            requester_id: intent.requester.id.clone(),
            requester_name: intent.requester.name.clone(),
            approver_id: None,
            approver_name: None,
            status: WorkflowStatus::Pending,
            reason: intent.reason.trim().to_string(),
            priority: intent.priority,
            comments: None,
            created_at: now,
            updated_at: now,
            decided_at: None,
            version: 0,
        }
    }

    pub fn kind(&self) -> WorkflowKind {
        self.request.kind()
    }

    pub fn is_pending(&self) -> bool {
        self.status == WorkflowStatus::Pending
    }

    pub fn snapshot(&self) -> serde_json::Value {
        super::snapshot(self)
    }

    pub fn view(&self) -> WorkflowView {
        WorkflowView::from(self)
    }
}

/// Gateway representation of a workflow.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowView {
    pub id: String,
    #[serde(flatten)]
    pub request: WorkflowRequest,
    pub status: WorkflowStatus,
    pub asset_id: String,
    pub asset_name: String,
    pub requester_id: String,
    pub requester_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approver_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approver_name: Option<String>,
    pub reason: String,
    pub priority: Priority,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<DateTime<Utc>>,
}

impl From<&Workflow> for WorkflowView {
    fn from(workflow: &Workflow) -> Self {
        let approved_at = match workflow.status {
            WorkflowStatus::Approved => workflow.decided_at,
            _ => None,
        };
        Self {
            id: workflow.id.clone(),
            request: workflow.request.clone(),
            status: workflow.status,
            asset_id: workflow.asset_id.clone(),
            asset_name: workflow.asset_name.clone(),
            requester_id: workflow.requester_id.clone(),
            requester_name: workflow.requester_name.clone(),
            approver_id: workflow.approver_id.clone(),
            approver_name: workflow.approver_name.clone(),
            reason: workflow.reason.clone(),
            priority: workflow.priority,
            comments: workflow.comments.clone(),
            created_at: workflow.created_at,
            updated_at: workflow.updated_at,
            approved_at,
        }
    }
}

/// What a caller asks [`crate::engine::WorkflowEngine::submit`] to do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowIntent {
    pub asset_id: String,
    #[serde(flatten)]
    pub request: WorkflowRequest,
    pub requester: Actor,
    pub reason: String,
    #[serde(default)]
    pub priority: Priority,
}

impl WorkflowIntent {
    pub fn new(
        asset_id: impl Into<String>,
        request: WorkflowRequest,
        requester: Actor,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            asset_id: asset_id.into(),
            request,
            requester,
            reason: reason.into(),
            priority: Priority::default(),
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if !is_valid_identifier(&self.asset_id) {
            return Err(format!("'{}' is not a valid asset id", self.asset_id));
        }
        if !is_valid_identifier(&self.requester.id) {
            return Err(format!("'{}' is not a valid requester id", self.requester.id));
        }
        if self.reason.trim().is_empty() {
            return Err("a reason is required".to_string());
        }
        self.request.validate()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowFilter {
    pub asset_id: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<WorkflowKind>,
    pub status: Option<WorkflowStatus>,
    pub requester_id: Option<String>,
    pub priority: Option<Priority>,
}

impl WorkflowFilter {
    pub fn pending() -> Self {
        Self {
            status: Some(WorkflowStatus::Pending),
            ..Default::default()
        }
    }

    pub fn for_asset(asset_id: impl Into<String>) -> Self {
        Self {
            asset_id: Some(asset_id.into()),
            ..Default::default()
        }
    }

    pub fn matches(&self, workflow: &Workflow) -> bool {
        self.asset_id.as_ref().is_none_or(|id| &workflow.asset_id == id)
            && self.kind.is_none_or(|k| workflow.kind() == k)
            && self.status.is_none_or(|s| workflow.status == s)
            && self
                .requester_id
                .as_ref()
                .is_none_or(|id| &workflow.requester_id == id)
            && self.priority.is_none_or(|p| workflow.priority == p)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStats {
    pub total: u64,
    pub pending: u64,
    pub approved: u64,
    pub rejected: u64,
    pub by_type: std::collections::BTreeMap<String, u64>,
}

impl WorkflowStats {
    pub fn record(&mut self, workflow: &Workflow) {
        self.total += 1;
        match workflow.status {
            WorkflowStatus::Pending => self.pending += 1,
            WorkflowStatus::Approved => self.approved += 1,
            WorkflowStatus::Rejected => self.rejected += 1,
        }
        *self
            .by_type
            .entry(workflow.kind().as_str().to_string())
            .or_insert(0) += 1;
    }
}

use anyhow::Result;
use tracing::info;

use super::{parse_arg, parse_opt, print_json, Command, CommandEnv};
use crate::cli::session::with_engine;
use cmdb_lifecycle::{
    Decision, Priority, WorkflowFilter, WorkflowIntent, WorkflowKind, WorkflowRequest,
    WorkflowView,
};

pub struct SubmitCommand {
    env: CommandEnv,
    asset_id: String,
    kind: String,
    status: Option<String>,
    reason: String,
    priority: String,
}

impl SubmitCommand {
    pub fn new(env: CommandEnv, asset_id: String, kind: String, reason: String) -> Self {
        Self {
            env,
            asset_id,
            kind,
            status: None,
            reason,
            priority: Priority::default().to_string(),
        }
    }

    pub fn with_status(mut self, status: Option<String>) -> Self {
        self.status = status;
        self
    }

    pub fn with_priority(mut self, priority: String) -> Self {
        self.priority = priority;
        self
    }

    fn intent(&self) -> Result<WorkflowIntent> {
        let kind: WorkflowKind = parse_arg(&self.kind)?;
        let request = WorkflowRequest::for_kind(kind, parse_opt(self.status.as_deref())?)
            .map_err(cmdb_lifecycle::LifecycleError::validation)?;
        let priority: Priority = parse_arg(&self.priority)?;
        Ok(WorkflowIntent::new(
            self.asset_id.clone(),
            request,
            self.env.actor.clone(),
            self.reason.clone(),
        )
        .with_priority(priority))
    }
}

impl Command for SubmitCommand {
    async fn execute(&self) -> Result<()> {
        let intent = self.intent()?;
        let workflow = with_engine(&self.env.config, |engine| async move {
            Ok(engine.submit(intent).await?)
        })
        .await?;
        info!(workflow_id = %workflow.id, asset_id = %workflow.asset_id, "Workflow submitted");
        print_json(&workflow.view())
    }
}

pub struct DecideCommand {
    env: CommandEnv,
    workflow_id: String,
    decision: Decision,
    comments: Option<String>,
}

impl DecideCommand {
    pub fn approve(env: CommandEnv, workflow_id: String) -> Self {
        Self {
            env,
            workflow_id,
            decision: Decision::Approve,
            comments: None,
        }
    }

    pub fn reject(env: CommandEnv, workflow_id: String, comments: String) -> Self {
        Self {
            env,
            workflow_id,
            decision: Decision::Reject,
            comments: Some(comments),
        }
    }

    pub fn with_comments(mut self, comments: Option<String>) -> Self {
        if comments.is_some() {
            self.comments = comments;
        }
        self
    }
}

impl Command for DecideCommand {
    async fn execute(&self) -> Result<()> {
        let workflow_id = self.workflow_id.clone();
        let decision = self.decision;
        let comments = self.comments.clone();
        let actor = self.env.actor.clone();
        let (asset, workflow) = with_engine(&self.env.config, |engine| async move {
            Ok(engine.decide(&workflow_id, decision, &actor, comments).await?)
        })
        .await?;
        print_json(&serde_json::json!({
            "workflow": workflow.view(),
            "asset": asset,
        }))
    }
}

pub struct ShowWorkflowCommand {
    env: CommandEnv,
    workflow_id: String,
}

impl ShowWorkflowCommand {
    pub fn new(env: CommandEnv, workflow_id: String) -> Self {
        Self { env, workflow_id }
    }
}

impl Command for ShowWorkflowCommand {
    async fn execute(&self) -> Result<()> {
        let workflow_id = self.workflow_id.clone();
        let workflow = with_engine(&self.env.config, |engine| async move {
            Ok(engine.get_workflow(&workflow_id).await?)
        })
        .await?;
        print_json(&workflow.view())
    }
}

pub struct PendingCommand {
    env: CommandEnv,
    asset_id: Option<String>,
    kind: Option<String>,
    requester_id: Option<String>,
    priority: Option<String>,
}

impl PendingCommand {
    pub fn new(env: CommandEnv) -> Self {
        Self {
            env,
            asset_id: None,
            kind: None,
            requester_id: None,
            priority: None,
        }
    }

    pub fn with_asset(mut self, asset_id: Option<String>) -> Self {
        self.asset_id = asset_id;
        self
    }

    pub fn with_kind(mut self, kind: Option<String>) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_requester(mut self, requester_id: Option<String>) -> Self {
        self.requester_id = requester_id;
        self
    }

    pub fn with_priority(mut self, priority: Option<String>) -> Self {
        self.priority = priority;
        self
    }
}

impl Command for PendingCommand {
    async fn execute(&self) -> Result<()> {
        let filter = WorkflowFilter {
            asset_id: self.asset_id.clone(),
            kind: parse_opt(self.kind.as_deref())?,
            status: None,
            requester_id: self.requester_id.clone(),
            priority: parse_opt(self.priority.as_deref())?,
        };
        let pending = with_engine(&self.env.config, |engine| async move {
            Ok(engine.list_pending(&filter).await?)
        })
        .await?;
        let views: Vec<WorkflowView> = pending.iter().map(|w| w.view()).collect();
        print_json(&views)
    }
}

pub struct HistoryCommand {
    env: CommandEnv,
    asset_id: String,
}

impl HistoryCommand {
    pub fn new(env: CommandEnv, asset_id: String) -> Self {
        Self { env, asset_id }
    }
}

impl Command for HistoryCommand {
    async fn execute(&self) -> Result<()> {
        let asset_id = self.asset_id.clone();
        let history = with_engine(&self.env.config, |engine| async move {
            Ok(engine.asset_workflow_history(&asset_id).await?)
        })
        .await?;
        let views: Vec<WorkflowView> = history.iter().map(|w| w.view()).collect();
        print_json(&views)
    }
}

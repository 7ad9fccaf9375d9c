use anyhow::Result;
use serde::Serialize;

use super::{parse_opt, print_json, Command, CommandEnv};
use crate::cli::session::with_engine;
use cmdb_lifecycle::{AuditQuery, Inconsistency, WorkflowStats};

pub struct StatsCommand {
    env: CommandEnv,
}

impl StatsCommand {
    pub fn new(env: CommandEnv) -> Self {
        Self { env }
    }
}

impl Command for StatsCommand {
    async fn execute(&self) -> Result<()> {
        let stats: WorkflowStats = with_engine(&self.env.config, |engine| async move {
            Ok(engine.workflow_stats().await?)
        })
        .await?;
        print_json(&stats)
    }
}

pub struct AuditCommand {
    env: CommandEnv,
    resource_type: Option<String>,
    resource_id: Option<String>,
    actor_id: Option<String>,
    action: Option<String>,
    limit: Option<usize>,
}

impl AuditCommand {
    pub fn new(env: CommandEnv) -> Self {
        Self {
            env,
            resource_type: None,
            resource_id: None,
            actor_id: None,
            action: None,
            limit: None,
        }
    }

    pub fn with_resource(mut self, resource_type: Option<String>, resource_id: Option<String>) -> Self {
        self.resource_type = resource_type;
        self.resource_id = resource_id;
        self
    }

    pub fn with_actor(mut self, actor_id: Option<String>) -> Self {
        self.actor_id = actor_id;
        self
    }

    pub fn with_action(mut self, action: Option<String>) -> Self {
        self.action = action;
        self
    }

    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    fn query(&self) -> Result<AuditQuery> {
        Ok(AuditQuery {
            resource_type: parse_opt(self.resource_type.as_deref())?,
            resource_id: self.resource_id.clone(),
            actor_id: self.actor_id.clone(),
            action: parse_opt(self.action.as_deref())?,
            limit: self.limit,
        })
    }
}

impl Command for AuditCommand {
    async fn execute(&self) -> Result<()> {
        let query = self.query()?;
        let entries = with_engine(&self.env.config, |engine| async move {
            Ok(engine.audit_trail(&query).await?)
        })
        .await?;
        print_json(&entries)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CheckReport {
    consistent: bool,
    inconsistencies: Vec<Inconsistency>,
}

pub struct CheckCommand {
    env: CommandEnv,
}

impl CheckCommand {
    pub fn new(env: CommandEnv) -> Self {
        Self { env }
    }
}

impl Command for CheckCommand {
    async fn execute(&self) -> Result<()> {
        let inconsistencies = with_engine(&self.env.config, |engine| async move {
            Ok(engine.check().await?)
        })
        .await?;
        let report = CheckReport {
            consistent: inconsistencies.is_empty(),
            inconsistencies,
        };
        print_json(&report)?;
        if !report.consistent {
            anyhow::bail!("{} inconsistencies found", report.inconsistencies.len());
        }
        Ok(())
    }
}

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

pub mod commands;
pub mod session;

#[derive(Parser)]
#[command(name = "cmdb-lifecycle")]
#[command(about = "Approval-gated lifecycle management for CMDB assets")]
#[command(long_about = "Registers configuration items and moves them between statuses only \
                       through approved workflows. Every committed change is written to an \
                       append-only audit ledger. Output is JSON on stdout; logs go to stderr.")]
pub struct Cli {
    /// Configuration file to use instead of cmdb-lifecycle.toml
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// State file for the file-backed store (overrides storage.state_file)
    #[arg(long, global = true, value_name = "PATH")]
    pub state_file: Option<PathBuf>,

    /// Identity recorded as requester, approver or editor
    #[arg(long, global = true, default_value = "cli-operator")]
    pub actor_id: String,

    /// Display name for the actor (defaults to the actor id)
    #[arg(long, global = true)]
    pub actor_name: Option<String>,

    /// Emit plain-text logs instead of JSON
    #[arg(long, global = true)]
    pub text_logs: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Register a new asset (starts behind an onboarding workflow by default)
    Register(RegisterArgs),
    /// Show one asset
    Show {
        asset_id: String,
    },
    /// List assets, optionally filtered
    Assets {
        #[arg(long = "type")]
        asset_type: Option<String>,
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        department: Option<String>,
        #[arg(long)]
        location: Option<String>,
    },
    /// Edit descriptive fields of an asset (never its status)
    Update(UpdateArgs),
    /// Request a lifecycle change for an asset
    Submit {
        asset_id: String,
        /// onboarding, status-change, maintenance or decommission
        #[arg(long = "type")]
        kind: String,
        /// Target status, required for status-change
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        reason: String,
        #[arg(long, default_value = "medium", help = "low, medium, high or urgent")]
        priority: String,
    },
    /// Request decommissioning of an asset
    Decommission {
        asset_id: String,
        #[arg(long, default_value = "Decommission requested")]
        reason: String,
    },
    /// Approve a pending workflow and apply its change
    Approve {
        workflow_id: String,
        #[arg(long)]
        comments: Option<String>,
    },
    /// Reject a pending workflow and release the asset
    Reject {
        workflow_id: String,
        #[arg(long)]
        comments: String,
    },
    /// Show one workflow
    Workflow {
        workflow_id: String,
    },
    /// List pending workflows, most urgent first
    Pending {
        #[arg(long = "asset")]
        asset_id: Option<String>,
        #[arg(long = "type")]
        kind: Option<String>,
        #[arg(long = "requester")]
        requester_id: Option<String>,
        #[arg(long)]
        priority: Option<String>,
    },
    /// Every workflow raised for an asset, newest first
    History {
        asset_id: String,
    },
    /// Workflow counts by status and type
    Stats,
    /// Query the audit ledger, newest first
    Audit {
        #[arg(long)]
        resource_type: Option<String>,
        #[arg(long)]
        resource_id: Option<String>,
        #[arg(long = "actor")]
        actor_filter: Option<String>,
        #[arg(long)]
        action: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Scan the store for lock and workflow disagreements
    Check,
}

#[derive(Args, Debug, Clone, Default)]
pub struct RegisterArgs {
    #[arg(long)]
    pub name: String,
    #[arg(long = "type")]
    pub asset_type: String,
    /// Explicit id; generated from the type when omitted
    #[arg(long)]
    pub id: Option<String>,
    /// online or offline; honoured only by the direct onboarding policy
    #[arg(long)]
    pub status: Option<String>,
    #[arg(long, default_value = "")]
    pub location: String,
    #[arg(long, default_value = "")]
    pub owner: String,
    #[arg(long, default_value = "")]
    pub department: String,
    #[arg(long, default_value = "")]
    pub description: String,
    #[arg(long)]
    pub ip: Option<String>,
    #[arg(long)]
    pub purchase_price: Option<f64>,
    #[arg(long)]
    pub annual_cost: Option<f64>,
    #[arg(long)]
    pub currency: Option<String>,
    #[arg(long = "tag")]
    pub tags: Vec<String>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct UpdateArgs {
    pub asset_id: String,
    #[arg(long)]
    pub name: Option<String>,
    #[arg(long)]
    pub location: Option<String>,
    #[arg(long)]
    pub owner: Option<String>,
    #[arg(long)]
    pub department: Option<String>,
    #[arg(long)]
    pub description: Option<String>,
    /// Pass an empty string to clear
    #[arg(long)]
    pub ip: Option<String>,
    #[arg(long)]
    pub purchase_price: Option<f64>,
    #[arg(long)]
    pub annual_cost: Option<f64>,
    #[arg(long)]
    pub currency: Option<String>,
    /// Replaces the full tag list when given at least once
    #[arg(long = "tag")]
    pub tags: Vec<String>,
}

use anyhow::Result;
use clap::Parser;

mod cli;

use cli::commands::assets::{
    DecommissionCommand, ListAssetsCommand, RegisterCommand, ShowAssetCommand, UpdateAssetCommand,
};
use cli::commands::reports::{AuditCommand, CheckCommand, StatsCommand};
use cli::commands::workflows::{
    DecideCommand, HistoryCommand, PendingCommand, ShowWorkflowCommand, SubmitCommand,
};
use cli::commands::{Command, CommandEnv};
use cli::{Cli, Commands};
use cmdb_lifecycle::{init_telemetry, Actor, LifecycleConfig, LifecycleError};

fn main() {
    let cli = Cli::parse();

    let outcome = tokio::runtime::Runtime::new()
        .map_err(anyhow::Error::from)
        .and_then(|runtime| runtime.block_on(run(cli)));

    if let Err(err) = outcome {
        let lifecycle = err.downcast_ref::<LifecycleError>();
        let report = serde_json::json!({
            "error": lifecycle.map_or("error", LifecycleError::code),
            "message": format!("{err:#}"),
            "retryable": lifecycle.is_some_and(LifecycleError::is_retryable),
        });
        eprintln!("{report}");
        std::process::exit(exit_code(lifecycle));
    }
}

fn exit_code(err: Option<&LifecycleError>) -> i32 {
    match err {
        Some(LifecycleError::Validation { .. }) => 2,
        Some(LifecycleError::NotFound { .. }) => 3,
        Some(LifecycleError::AssetLocked { .. }) | Some(LifecycleError::InvalidState { .. }) => 4,
        Some(LifecycleError::Unauthorized { .. }) => 5,
        Some(LifecycleError::TransientStore { .. }) => 75,
        Some(LifecycleError::InvariantViolation { .. }) | None => 1,
    }
}

async fn run(cli: Cli) -> Result<()> {
    LifecycleConfig::load_env_file()?;
    let mut config = LifecycleConfig::load_from(cli.config.as_deref())?;
    if let Some(state_file) = &cli.state_file {
        config.storage.state_file = state_file.to_string_lossy().into_owned();
    }
    if cli.text_logs {
        config.observability.json_logs = false;
    }
    init_telemetry(&config.observability)?;

    let actor_name = cli.actor_name.clone().unwrap_or_else(|| cli.actor_id.clone());
    let env = CommandEnv::new(config, Actor::new(cli.actor_id.clone(), actor_name));

    match cli.command {
        Commands::Register(args) => RegisterCommand::new(env, args).execute().await,
        Commands::Show { asset_id } => ShowAssetCommand::new(env, asset_id).execute().await,
        Commands::Assets {
            asset_type,
            status,
            department,
            location,
        } => {
            ListAssetsCommand::new(env)
                .with_type(asset_type)
                .with_status(status)
                .with_department(department)
                .with_location(location)
                .execute()
                .await
        }
        Commands::Update(args) => UpdateAssetCommand::new(env, args).execute().await,
        Commands::Submit {
            asset_id,
            kind,
            status,
            reason,
            priority,
        } => {
            SubmitCommand::new(env, asset_id, kind, reason)
                .with_status(status)
                .with_priority(priority)
                .execute()
                .await
        }
        Commands::Decommission { asset_id, reason } => {
            DecommissionCommand::new(env, asset_id, reason).execute().await
        }
        Commands::Approve {
            workflow_id,
            comments,
        } => {
            DecideCommand::approve(env, workflow_id)
                .with_comments(comments)
                .execute()
                .await
        }
        Commands::Reject {
            workflow_id,
            comments,
        } => DecideCommand::reject(env, workflow_id, comments).execute().await,
        Commands::Workflow { workflow_id } => {
            ShowWorkflowCommand::new(env, workflow_id).execute().await
        }
        Commands::Pending {
            asset_id,
            kind,
            requester_id,
            priority,
        } => {
            PendingCommand::new(env)
                .with_asset(asset_id)
                .with_kind(kind)
                .with_requester(requester_id)
                .with_priority(priority)
                .execute()
                .await
        }
        Commands::History { asset_id } => HistoryCommand::new(env, asset_id).execute().await,
        Commands::Stats => StatsCommand::new(env).execute().await,
        Commands::Audit {
            resource_type,
            resource_id,
            actor_filter,
            action,
            limit,
        } => {
            AuditCommand::new(env)
                .with_resource(resource_type, resource_id)
                .with_actor(actor_filter)
                .with_action(action)
                .with_limit(limit)
                .execute()
                .await
        }
        Commands::Check => CheckCommand::new(env).execute().await,
    }
}

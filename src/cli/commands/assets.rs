use anyhow::Result;
use tracing::info;

use super::{parse_arg, parse_opt, print_json, Command, CommandEnv};
use crate::cli::session::with_engine;
use crate::cli::{RegisterArgs, UpdateArgs};
use cmdb_lifecycle::{AssetDetailsPatch, AssetFilter, AssetType, NewAsset};

pub struct RegisterCommand {
    env: CommandEnv,
    args: RegisterArgs,
}

impl RegisterCommand {
    pub fn new(env: CommandEnv, args: RegisterArgs) -> Self {
        Self { env, args }
    }

    fn new_asset(&self) -> Result<NewAsset> {
        let args = &self.args;
        let asset_type: AssetType = parse_arg(&args.asset_type)?;
        let mut new = NewAsset::new(args.name.clone(), asset_type);
        new.id = args.id.clone();
        new.initial_status = parse_opt(args.status.as_deref())?;
        new.location = args.location.clone();
        new.owner = args.owner.clone();
        new.department = args.department.clone();
        new.description = args.description.clone();
        new.ip_address = args.ip.clone();
        new.purchase_price = args.purchase_price;
        new.annual_cost = args.annual_cost;
        new.currency = args.currency.clone();
        new.tags = args.tags.clone();
        Ok(new)
    }
}

impl Command for RegisterCommand {
    async fn execute(&self) -> Result<()> {
        let new = self.new_asset()?;
        let actor = self.env.actor.clone();
        let registration = with_engine(&self.env.config, |engine| async move {
            Ok(engine.register_asset(new, &actor).await?)
        })
        .await?;
        info!(asset_id = %registration.asset.id, "Asset registered");
        print_json(&serde_json::json!({
            "asset": registration.asset,
            "onboarding": registration.onboarding.as_ref().map(|w| w.view()),
        }))
    }
}

pub struct ShowAssetCommand {
    env: CommandEnv,
    asset_id: String,
}

impl ShowAssetCommand {
    pub fn new(env: CommandEnv, asset_id: String) -> Self {
        Self { env, asset_id }
    }
}

impl Command for ShowAssetCommand {
    async fn execute(&self) -> Result<()> {
        let asset_id = self.asset_id.clone();
        let asset = with_engine(&self.env.config, |engine| async move {
            Ok(engine.get_asset(&asset_id).await?)
        })
        .await?;
        print_json(&asset)
    }
}

pub struct ListAssetsCommand {
    env: CommandEnv,
    asset_type: Option<String>,
    status: Option<String>,
    department: Option<String>,
    location: Option<String>,
}

impl ListAssetsCommand {
    pub fn new(env: CommandEnv) -> Self {
        Self {
            env,
            asset_type: None,
            status: None,
            department: None,
            location: None,
        }
    }

    pub fn with_type(mut self, asset_type: Option<String>) -> Self {
        self.asset_type = asset_type;
        self
    }

    pub fn with_status(mut self, status: Option<String>) -> Self {
        self.status = status;
        self
    }

    pub fn with_department(mut self, department: Option<String>) -> Self {
        self.department = department;
        self
    }

    pub fn with_location(mut self, location: Option<String>) -> Self {
        self.location = location;
        self
    }
}

impl Command for ListAssetsCommand {
    async fn execute(&self) -> Result<()> {
        let filter = AssetFilter {
            asset_type: parse_opt(self.asset_type.as_deref())?,
            status: parse_opt(self.status.as_deref())?,
            department: self.department.clone(),
            location: self.location.clone(),
        };
        let assets = with_engine(&self.env.config, |engine| async move {
            Ok(engine.list_assets(&filter).await?)
        })
        .await?;
        print_json(&assets)
    }
}

pub struct UpdateAssetCommand {
    env: CommandEnv,
    args: UpdateArgs,
}

impl UpdateAssetCommand {
    pub fn new(env: CommandEnv, args: UpdateArgs) -> Self {
        Self { env, args }
    }

    fn patch(&self) -> AssetDetailsPatch {
        let args = &self.args;
        AssetDetailsPatch {
            name: args.name.clone(),
            location: args.location.clone(),
            owner: args.owner.clone(),
            department: args.department.clone(),
            description: args.description.clone(),
            ip_address: args.ip.clone(),
            tags: (!args.tags.is_empty()).then(|| args.tags.clone()),
            purchase_price: args.purchase_price,
            annual_cost: args.annual_cost,
            currency: args.currency.clone(),
        }
    }
}

impl Command for UpdateAssetCommand {
    async fn execute(&self) -> Result<()> {
        let patch = self.patch();
        let asset_id = self.args.asset_id.clone();
        let actor = self.env.actor.clone();
        let asset = with_engine(&self.env.config, |engine| async move {
            Ok(engine.update_asset_details(&asset_id, patch, &actor).await?)
        })
        .await?;
        print_json(&asset)
    }
}

pub struct DecommissionCommand {
    env: CommandEnv,
    asset_id: String,
    reason: String,
}

impl DecommissionCommand {
    pub fn new(env: CommandEnv, asset_id: String, reason: String) -> Self {
        Self {
            env,
            asset_id,
            reason,
        }
    }
}

impl Command for DecommissionCommand {
    async fn execute(&self) -> Result<()> {
        let asset_id = self.asset_id.clone();
        let reason = self.reason.clone();
        let actor = self.env.actor.clone();
        let workflow = with_engine(&self.env.config, |engine| async move {
            Ok(engine.delete_asset(&asset_id, &actor, reason).await?)
        })
        .await?;
        print_json(&workflow.view())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cmdb_lifecycle::{Actor, AssetStatus, LifecycleConfig};

    fn env() -> CommandEnv {
        CommandEnv::new(LifecycleConfig::default(), Actor::new("u-1", "Dana"))
    }

    #[test]
    fn test_register_args_map_onto_new_asset() {
        let cmd = RegisterCommand::new(
            env(),
            RegisterArgs {
                name: "core-switch".to_string(),
                asset_type: "Network".to_string(),
                status: Some("offline".to_string()),
                tags: vec!["rack-4".to_string()],
                ..Default::default()
            },
        );
        let new = cmd.new_asset().unwrap();
        assert_eq!(new.asset_type, Some(AssetType::Network));
        assert_eq!(new.initial_status, Some(AssetStatus::Offline));
        assert_eq!(new.tags, vec!["rack-4".to_string()]);
    }

    #[test]
    fn test_update_without_tags_leaves_them_alone() {
        let cmd = UpdateAssetCommand::new(
            env(),
            UpdateArgs {
                asset_id: "SRV-001".to_string(),
                owner: Some("platform".to_string()),
                ..Default::default()
            },
        );
        let patch = cmd.patch();
        assert_eq!(patch.owner.as_deref(), Some("platform"));
        assert!(patch.tags.is_none());
    }
}

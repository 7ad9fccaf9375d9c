use anyhow::Result;
use serde::Serialize;
use std::str::FromStr;

use cmdb_lifecycle::{Actor, LifecycleConfig, LifecycleError};

pub mod assets;
pub mod reports;
pub mod workflows;

#[allow(async_fn_in_trait)]
pub trait Command {
    async fn execute(&self) -> Result<()>;
}

/// Who is acting and with which configuration, shared by every command.
#[derive(Debug, Clone)]
pub struct CommandEnv {
    pub config: LifecycleConfig,
    pub actor: Actor,
}

impl CommandEnv {
    pub fn new(config: LifecycleConfig, actor: Actor) -> Self {
        Self { config, actor }
    }
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Parse a user-supplied enum value, reporting failures as validation errors.
pub fn parse_arg<T>(value: &str) -> Result<T, LifecycleError>
where
    T: FromStr<Err = String>,
{
    value.parse().map_err(LifecycleError::validation)
}

pub fn parse_opt<T>(value: Option<&str>) -> Result<Option<T>, LifecycleError>
where
    T: FromStr<Err = String>,
{
    value.map(parse_arg).transpose()
}

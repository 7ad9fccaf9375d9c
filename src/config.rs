use anyhow::Result;
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const CONFIG_FILE: &str = "cmdb-lifecycle.toml";
pub const RC_FILE: &str = ".cmdb-lifecycle-rc";
pub const ENV_PREFIX: &str = "CMDB_LIFECYCLE";

/// Main configuration structure for the lifecycle engine and its CLI
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Workflow engine behaviour
    pub engine: EngineConfig,
    /// Audit sink delivery
    pub audit: AuditConfig,
    /// Logging settings
    pub observability: ObservabilityConfig,
    /// File-backed state for the in-memory store
    pub storage: StorageConfig,
    /// SQLite settings (optional, used with the `database` feature)
    pub database: Option<DatabaseConfig>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum OnboardingPolicy {
    /// New assets start offline behind a pending onboarding workflow
    #[default]
    RequireApproval,
    /// New assets take their requested initial status immediately
    Direct,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound for any single store call
    pub store_timeout_ms: u64,
    /// Re-reads allowed after an optimistic-concurrency conflict
    pub max_conflict_retries: u32,
    /// Refuse decisions made by the workflow's own requester
    pub forbid_self_approval: bool,
    pub onboarding: OnboardingPolicy,
    /// Approver allow-list; empty permits every approver
    pub approvers: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            store_timeout_ms: 5000,
            max_conflict_retries: 5,
            forbid_self_approval: true,
            onboarding: OnboardingPolicy::RequireApproval,
            approvers: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Extra delivery attempts per entry after the first failure
    pub sink_retries: u32,
    /// Base backoff between attempts, doubled each retry
    pub sink_backoff_ms: u64,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            sink_retries: 3,
            sink_backoff_ms: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Default filter when RUST_LOG is unset
    pub log_level: String,
    /// Emit JSON lines instead of human-readable logs
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    pub state_file: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_file: ".cmdb-lifecycle/state.json".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database URL (SQLite file path or connection string)
    pub url: String,
    /// Maximum connections in pool
    pub max_connections: u32,
    /// Enable automatic migrations
    pub auto_migrate: bool,
    /// Pool acquire and busy timeout
    pub acquire_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://.cmdb-lifecycle/lifecycle.db".to_string(),
            max_connections: 5,
            auto_migrate: true,
            acquire_timeout_ms: 5000,
        }
    }
}

impl LifecycleConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Default values
    /// 2. Configuration files (cmdb-lifecycle.toml, .cmdb-lifecycle-rc)
    /// 3. Environment variables (CMDB_LIFECYCLE_<SECTION>__<KEY>)
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Same as [`LifecycleConfig::load`], with an explicit file taking the
    /// place of the default configuration files.
    pub fn load_from(explicit: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        match explicit {
            Some(path) => {
                builder = builder.add_source(File::from(path).format(FileFormat::Toml));
            }
            None => {
                if Path::new(CONFIG_FILE).exists() {
                    builder = builder.add_source(File::new(CONFIG_FILE, FileFormat::Toml));
                }
                if Path::new(RC_FILE).exists() {
                    builder = builder.add_source(File::new(RC_FILE, FileFormat::Toml));
                }
            }
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("engine.approvers"),
        );

        let config: LifecycleConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.engine.store_timeout_ms == 0 {
            anyhow::bail!("engine.store_timeout_ms must be greater than zero");
        }
        if let Some(db) = &self.database {
            if db.url.trim().is_empty() {
                anyhow::bail!("database.url must not be empty");
            }
            if db.max_connections == 0 {
                anyhow::bail!("database.max_connections must be greater than zero");
            }
        }
        Ok(())
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let toml_content = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_content)?;
        Ok(())
    }

    /// Load .env file if it exists
    pub fn load_env_file() -> Result<()> {
        if Path::new(".env").exists() {
            dotenvy::dotenv()?;
            tracing::info!("Loaded environment variables from .env file");
        }
        Ok(())
    }
}

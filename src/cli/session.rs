use anyhow::{Context, Result};
use fd_lock::RwLock;
use std::fs::{File, OpenOptions};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use cmdb_lifecycle::{LifecycleConfig, MemoryStore, StoreSnapshot, WorkflowEngine};

/// Runs `f` against an engine backed by the configured store.
///
/// The file-backed store holds an exclusive lock on `<state>.lock` for the
/// whole command, so concurrent CLI invocations serialize instead of
/// overwriting each other's snapshot.
pub async fn with_engine<F, Fut, R>(config: &LifecycleConfig, f: F) -> Result<R>
where
    F: FnOnce(WorkflowEngine) -> Fut,
    Fut: Future<Output = Result<R>>,
{
    #[cfg(feature = "database")]
    if let Some(db) = &config.database {
        let store = Arc::new(
            cmdb_lifecycle::SqliteStore::connect(db)
                .await
                .context("Failed to open lifecycle database")?,
        );
        let result = run(WorkflowEngine::from_config(store.clone(), config), f).await;
        store.shutdown().await;
        return result;
    }

    let state_path = PathBuf::from(&config.storage.state_file);
    if let Some(parent) = state_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let lock_file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(lock_path(&state_path))?;
    let mut lock = RwLock::new(lock_file);
    let _guard = lock.write().context("Failed to lock state file")?;

    let store = Arc::new(MemoryStore::from_snapshot(read_snapshot(&state_path)?));
    let result = run(WorkflowEngine::from_config(store.clone(), config), f).await;

    // Partial progress (e.g. a registration followed by a failed lookup) is
    // still committed state.
    write_snapshot(&state_path, &store.snapshot().await)?;
    result
}

/// Run the command, then give background commits and audit forwards one
/// store timeout to finish before the process moves on.
async fn run<F, Fut, R>(engine: WorkflowEngine, f: F) -> Result<R>
where
    F: FnOnce(WorkflowEngine) -> Fut,
    Fut: Future<Output = Result<R>>,
{
    let outbox = engine.audit_outbox().clone();
    let grace = engine.settings().store_timeout;
    let result = f(engine).await;
    if !outbox.drain(grace).await {
        warn!(
            in_flight = outbox.in_flight(),
            "Audit forwarding still running at exit"
        );
    }
    result
}

fn lock_path(state_path: &Path) -> PathBuf {
    let mut name = state_path.as_os_str().to_owned();
    name.push(".lock");
    PathBuf::from(name)
}

fn read_snapshot(path: &Path) -> Result<StoreSnapshot> {
    if !path.exists() {
        debug!(path = %path.display(), "No state file yet, starting empty");
        return Ok(StoreSnapshot::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    if content.trim().is_empty() {
        return Ok(StoreSnapshot::default());
    }
    serde_json::from_str(&content).with_context(|| format!("Corrupt state file {}", path.display()))
}

fn write_snapshot(path: &Path, snapshot: &StoreSnapshot) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let file = File::create(&tmp)?;
    serde_json::to_writer_pretty(&file, snapshot)?;
    file.sync_all()?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("Failed to replace {}", path.display()))?;
    debug!(
        path = %path.display(),
        assets = snapshot.assets.len(),
        workflows = snapshot.workflows.len(),
        "State file written"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cmdb_lifecycle::{Actor, AssetType, NewAsset};
    use tempfile::TempDir;

    fn config_in(dir: &TempDir) -> LifecycleConfig {
        let mut config = LifecycleConfig::default();
        config.storage.state_file = dir
            .path()
            .join("nested/state.json")
            .to_string_lossy()
            .into_owned();
        config
    }

    #[tokio::test]
    async fn test_state_survives_between_sessions() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);

        let id = with_engine(&config, |engine| async move {
            let reg = engine
                .register_asset(
                    NewAsset::new("db-01", AssetType::Server),
                    &Actor::new("u-1", "Dana"),
                )
                .await?;
            Ok(reg.asset.id)
        })
        .await
        .unwrap();

        let found = with_engine(&config, |engine| async move {
            Ok(engine.get_asset(&id).await?)
        })
        .await
        .unwrap();
        assert_eq!(found.name, "db-01");
        assert!(found.is_locked());
    }

    #[tokio::test]
    async fn test_session_waits_for_audit_forwarding() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);

        let outbox = with_engine(&config, |engine| async move {
            engine
                .register_asset(
                    NewAsset::new("db-02", AssetType::Server),
                    &Actor::new("u-1", "Dana"),
                )
                .await?;
            Ok(engine.audit_outbox().clone())
        })
        .await
        .unwrap();
        assert_eq!(outbox.in_flight(), 0);
    }

    #[test]
    fn test_lock_path_appends_suffix() {
        assert_eq!(
            lock_path(Path::new("/tmp/state.json")),
            PathBuf::from("/tmp/state.json.lock")
        );
    }

    #[test]
    fn test_empty_state_file_reads_as_empty_store() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "").unwrap();
        let snapshot = read_snapshot(&path).unwrap();
        assert!(snapshot.assets.is_empty());
    }
}

//! Shared builders for the integration suites.
#![allow(dead_code)]

use async_trait::async_trait;
use cmdb_lifecycle::{
    Actor, Asset, AssetStatus, AssetType, AuditEntry, AuditSink, AuditSinkError, EngineSettings,
    LifecycleStore, MemoryStore, NewAsset, OnboardingPolicy, RetryPolicy, WorkflowEngine,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn requester() -> Actor {
    Actor::new("u-ops", "Olivia Ops")
}

pub fn approver() -> Actor {
    Actor::new("u-cab", "Carl CAB")
}

/// Settings where registration takes the requested status directly, so
/// tests can start from an online asset without an onboarding round-trip.
pub fn direct_settings() -> EngineSettings {
    EngineSettings {
        onboarding: OnboardingPolicy::Direct,
        store_timeout: Duration::from_millis(500),
        ..EngineSettings::default()
    }
}

pub fn quick_retries() -> RetryPolicy {
    RetryPolicy {
        retries: 2,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
    }
}

pub fn direct_engine(store: Arc<dyn LifecycleStore>) -> WorkflowEngine {
    WorkflowEngine::new(store)
        .with_settings(direct_settings())
        .with_retry_policy(quick_retries())
}

pub fn memory_engine() -> (Arc<MemoryStore>, WorkflowEngine) {
    let store = Arc::new(MemoryStore::new());
    let engine = direct_engine(store.clone());
    (store, engine)
}

pub async fn online_asset(engine: &WorkflowEngine, id: &str, asset_type: AssetType) -> Asset {
    let registration = engine
        .register_asset(
            NewAsset::new(format!("{id} host"), asset_type)
                .with_id(id)
                .with_initial_status(AssetStatus::Online),
            &requester(),
        )
        .await
        .expect("registration should succeed");
    assert!(registration.onboarding.is_none());
    registration.asset
}

/// Sink that records every delivery and can be told to fail.
#[derive(Default)]
pub struct RecordingSink {
    delivered: Mutex<Vec<AuditEntry>>,
    failing: std::sync::atomic::AtomicBool,
    attempts: AtomicUsize,
}

impl RecordingSink {
    pub fn failing() -> Self {
        let sink = Self::default();
        sink.set_failing(true);
        sink
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn delivered(&self) -> Vec<AuditEntry> {
        self.delivered.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

/// Sink that never answers.
pub struct HangingSink;

#[async_trait]
impl AuditSink for HangingSink {
    async fn deliver(&self, _entry: &AuditEntry) -> Result<(), AuditSinkError> {
        std::future::pending().await
    }
}

#[async_trait]
impl AuditSink for RecordingSink {
    async fn deliver(&self, entry: &AuditEntry) -> Result<(), AuditSinkError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(AuditSinkError::Unavailable("sink offline".to_string()));
        }
        self.delivered.lock().unwrap().push(entry.clone());
        Ok(())
    }
}

/// Poll `check` until it holds or the deadline passes. Audit forwarding is
/// detached from the engine call, so sink-side effects land shortly after it
/// returns.
pub async fn eventually<F>(mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}

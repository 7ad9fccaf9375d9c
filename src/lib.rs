// CMDB Lifecycle - approval-gated state changes for configuration items
// This exposes the engine, stores and models for the CLI and for embedding

pub mod audit;
pub mod config;
pub mod engine;
pub mod error;
pub mod model;
pub mod observability;
pub mod priority;
pub mod store;
pub mod telemetry;
pub mod workflows;

// Re-export key types for easy access
pub use audit::{
    AuditForwarder, AuditOutbox, AuditSink, AuditSinkError, RetryPolicy, TracingAuditSink,
};
pub use config::{LifecycleConfig, OnboardingPolicy};
pub use engine::{
    AllowListAuthorizer, ApproverAuthorizer, AuthorizationDenied, EngineSettings, PermitAll,
    Registration, WorkflowEngine,
};
pub use error::{LifecycleError, LifecycleResult};
pub use model::{
    Actor, Asset, AssetDetailsPatch, AssetFilter, AssetStatus, AssetType, AuditAction, AuditEntry,
    AuditQuery, Decision, NewAsset, ResourceType, Workflow, WorkflowFilter, WorkflowIntent,
    WorkflowKind, WorkflowRequest, WorkflowStats, WorkflowStatus, WorkflowView,
};
pub use observability::{EngineMetrics, EngineStats, OperationTimer};
pub use priority::Priority;
pub use store::{LifecycleStore, MemoryStore, StoreError, StoreSnapshot, Transaction};
#[cfg(feature = "database")]
pub use store::SqliteStore;
pub use telemetry::{create_lifecycle_span, generate_correlation_id, init_telemetry};
pub use workflows::Inconsistency;

//! Delivery of committed audit entries beyond the canonical ledger.

pub mod sink;

pub use sink::{
    AuditForwarder, AuditOutbox, AuditSink, AuditSinkError, InFlight, RetryPolicy, TracingAuditSink,
};

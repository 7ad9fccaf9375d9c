use async_trait::async_trait;
use std::collections::HashSet;
use thiserror::Error;

#[cfg(any(test, feature = "testing"))]
use mockall::automock;

use crate::model::{Actor, Workflow};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{reason}")]
pub struct AuthorizationDenied {
    pub reason: String,
}

impl AuthorizationDenied {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Decides whether an already-authenticated actor may decide a workflow.
#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait ApproverAuthorizer: Send + Sync {
    async fn authorize(&self, approver: &Actor, workflow: &Workflow) -> Result<(), AuthorizationDenied>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PermitAll;

#[async_trait]
impl ApproverAuthorizer for PermitAll {
    async fn authorize(&self, _approver: &Actor, _workflow: &Workflow) -> Result<(), AuthorizationDenied> {
        Ok(())
    }
}

/// Permits only listed approver ids. An empty list permits everyone.
#[derive(Debug, Default, Clone)]
pub struct AllowListAuthorizer {
    approvers: HashSet<String>,
}

impl AllowListAuthorizer {
    pub fn new<I, S>(approvers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            approvers: approvers.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl ApproverAuthorizer for AllowListAuthorizer {
    async fn authorize(&self, approver: &Actor, workflow: &Workflow) -> Result<(), AuthorizationDenied> {
        if self.approvers.is_empty() || self.approvers.contains(&approver.id) {
            Ok(())
        } else {
            Err(AuthorizationDenied::new(format!(
                "{} is not on the approver list for {}",
                approver.id, workflow.id
            )))
        }
    }
}

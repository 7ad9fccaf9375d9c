use statig::prelude::*;

use crate::model::{Decision, WorkflowStatus};

/// Decision lifecycle of one workflow: `pending` moves once to `approved`
/// or `rejected`; both are terminal and swallow further events.
#[derive(Debug, Default)]
pub struct DecisionMachine {
    workflow_id: String,
    outcome: Option<WorkflowStatus>,
}

impl DecisionMachine {
    pub fn new(workflow_id: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            outcome: None,
        }
    }

    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    /// Status reached by the most recent handled event, if it moved the machine.
    pub fn outcome(&self) -> Option<WorkflowStatus> {
        self.outcome
    }
}

#[state_machine(initial = "State::pending()")]
impl DecisionMachine {
    #[state]
    fn pending(&mut self, event: &Decision) -> Outcome<State> {
        match event {
            Decision::Approve => {
                self.outcome = Some(WorkflowStatus::Approved);
                tracing::debug!(workflow_id = %self.workflow_id, "Workflow approved");
                Transition(State::approved())
            }
            Decision::Reject => {
                self.outcome = Some(WorkflowStatus::Rejected);
                tracing::debug!(workflow_id = %self.workflow_id, "Workflow rejected");
                Transition(State::rejected())
            }
        }
    }

    #[state]
    fn approved(&mut self, event: &Decision) -> Outcome<State> {
        tracing::warn!(workflow_id = %self.workflow_id, decision = %event, "Workflow already approved");
        self.outcome = None;
        Handled
    }

    #[state]
    fn rejected(&mut self, event: &Decision) -> Outcome<State> {
        tracing::warn!(workflow_id = %self.workflow_id, decision = %event, "Workflow already rejected");
        self.outcome = None;
        Handled
    }
}

/// Resolve `decision` against a workflow currently in `current`.
///
/// The machine is rehydrated by replaying the event that produced
/// `current`; terminal states clear the outcome on any event. Returns the
/// new status, or `Err(current)` when the workflow was already decided.
pub fn resolve(
    workflow_id: &str,
    current: WorkflowStatus,
    decision: Decision,
) -> Result<WorkflowStatus, WorkflowStatus> {
    let mut machine = DecisionMachine::new(workflow_id).state_machine();
    match current {
        WorkflowStatus::Pending => {}
        WorkflowStatus::Approved => machine.handle(&Decision::Approve),
        WorkflowStatus::Rejected => machine.handle(&Decision::Reject),
    }
    machine.handle(&decision);
    machine.inner().outcome().ok_or(current)
}

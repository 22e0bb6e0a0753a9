//! Policy gate consulted before routing.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::types::{Priority, TaskId, TaskRequest};

/// What the caller is about to do, as seen by the policy gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionContext {
    pub task_id: TaskId,
    /// Action name, e.g. `route`.
    pub action: String,
    pub required_capability: Option<String>,
    pub priority: Priority,
    pub requester: String,
}

impl ActionContext {
    /// Context for routing `task`.
    pub fn for_route(task: &TaskRequest) -> Self {
        Self {
            task_id: task.id,
            action: "route".to_string(),
            required_capability: task.required_capability.clone(),
            priority: task.priority,
            requester: task.requester.clone(),
        }
    }
}

/// Verdict returned by a [`PolicyGate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub allowed: bool,
    pub reason: Option<String>,
}

impl PolicyDecision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }
}

impl std::fmt::Display for PolicyDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.allowed, &self.reason) {
            (true, _) => write!(f, "allowed"),
            (false, Some(reason)) => write!(f, "denied: {}", reason),
            (false, None) => write!(f, "denied"),
        }
    }
}

/// External authorization hook.
///
/// A denial short-circuits routing with a policy-denied outcome, before any
/// candidate is scored.
pub trait PolicyGate: Send + Sync {
    fn is_allowed(&self, ctx: &ActionContext) -> PolicyDecision;
}

impl<F> PolicyGate for F
where
    F: Fn(&ActionContext) -> PolicyDecision + Send + Sync,
{
    fn is_allowed(&self, ctx: &ActionContext) -> PolicyDecision {
        self(ctx)
    }
}

/// Shared policy gate handle.
pub type SharedPolicyGate = Arc<dyn PolicyGate>;

/// Denies any action whose priority is below a floor.
///
/// Useful to shed low-priority load during incidents.
#[derive(Debug, Clone, Copy)]
pub struct MinimumPriority(pub Priority);

impl PolicyGate for MinimumPriority {
    fn is_allowed(&self, ctx: &ActionContext) -> PolicyDecision {
        if ctx.priority >= self.0 {
            PolicyDecision::allow()
        } else {
            PolicyDecision::deny(format!(
                "priority {} below minimum {}",
                ctx.priority, self.0
            ))
        }
    }
}

//! Audit event types
//!
//! One event is produced per routing decision, task completion and
//! consensus round. Events serialize with a `type` tag so sinks can forward
//! them as flat JSON records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Priority, TaskId, WorkerId, WorkerStatus};

/// Unique identifier for events
pub type EventId = String;

/// All dispatch and consensus audit events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DispatchEvent {
    /// A worker joined the registry
    WorkerRegistered {
        worker_id: WorkerId,
        capabilities: Vec<String>,
        max_concurrent: u32,
        timestamp: DateTime<Utc>,
    },

    /// An operator changed a worker's status
    WorkerStatusChanged {
        worker_id: WorkerId,
        status: WorkerStatus,
        timestamp: DateTime<Utc>,
    },

    /// A task was routed to a worker
    TaskRouted {
        task_id: TaskId,
        worker_id: WorkerId,
        score: f64,
        candidates: usize,
        priority: Priority,
        routing_latency_us: u64,
        timestamp: DateTime<Utc>,
    },

    /// No worker could take the task
    NoCandidate {
        task_id: TaskId,
        capability: Option<String>,
        priority: Priority,
        timestamp: DateTime<Utc>,
    },

    /// The policy gate refused the task
    PolicyDenied {
        task_id: TaskId,
        reason: String,
        priority: Priority,
        timestamp: DateTime<Utc>,
    },

    /// A worker finished (or failed) a task
    TaskCompleted {
        task_id: TaskId,
        worker_id: WorkerId,
        success: bool,
        duration_ms: u64,
        error: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// A roundtable round produced its final report
    RoundtableCompleted {
        task_id: TaskId,
        algorithm: String,
        consensus_achieved: bool,
        consensus_score: f64,
        winning_value: Option<String>,
        votes: usize,
        attempted: usize,
        quorum_met: bool,
        tie_break: Option<String>,
        timestamp: DateTime<Utc>,
    },
}

impl DispatchEvent {
    /// Get the timestamp of this event
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            DispatchEvent::WorkerRegistered { timestamp, .. } => *timestamp,
            DispatchEvent::WorkerStatusChanged { timestamp, .. } => *timestamp,
            DispatchEvent::TaskRouted { timestamp, .. } => *timestamp,
            DispatchEvent::NoCandidate { timestamp, .. } => *timestamp,
            DispatchEvent::PolicyDenied { timestamp, .. } => *timestamp,
            DispatchEvent::TaskCompleted { timestamp, .. } => *timestamp,
            DispatchEvent::RoundtableCompleted { timestamp, .. } => *timestamp,
        }
    }

    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            DispatchEvent::WorkerRegistered { .. } => "worker_registered",
            DispatchEvent::WorkerStatusChanged { .. } => "worker_status_changed",
            DispatchEvent::TaskRouted { .. } => "task_routed",
            DispatchEvent::NoCandidate { .. } => "no_candidate",
            DispatchEvent::PolicyDenied { .. } => "policy_denied",
            DispatchEvent::TaskCompleted { .. } => "task_completed",
            DispatchEvent::RoundtableCompleted { .. } => "roundtable_completed",
        }
    }

    /// Get the task ID if this event is task-scoped
    pub fn task_id(&self) -> Option<TaskId> {
        match self {
            DispatchEvent::TaskRouted { task_id, .. }
            | DispatchEvent::NoCandidate { task_id, .. }
            | DispatchEvent::PolicyDenied { task_id, .. }
            | DispatchEvent::TaskCompleted { task_id, .. }
            | DispatchEvent::RoundtableCompleted { task_id, .. } => Some(*task_id),
            _ => None,
        }
    }

    /// Get the worker ID if this event concerns a single worker
    pub fn worker_id(&self) -> Option<&str> {
        match self {
            DispatchEvent::WorkerRegistered { worker_id, .. }
            | DispatchEvent::WorkerStatusChanged { worker_id, .. }
            | DispatchEvent::TaskRouted { worker_id, .. }
            | DispatchEvent::TaskCompleted { worker_id, .. } => Some(worker_id),
            _ => None,
        }
    }

    /// Generate a new unique event ID
    pub fn new_id() -> EventId {
        uuid::Uuid::new_v4().to_string()
    }
}

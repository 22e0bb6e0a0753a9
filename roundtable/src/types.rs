//! Core data model for worker dispatch and roundtable consensus
//!
//! Worker profiles are owned by the registry and only mutated through
//! dispatcher/executor methods. Tasks and results are plain records; the
//! only dynamic field is the typed metadata map on [`TaskRequest`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Unique identifier for a registered worker
pub type WorkerId = String;

/// Monotonic task identifier
pub type TaskId = u64;

/// Scratch/metadata map carried by tasks and results
pub type Metadata = HashMap<String, serde_json::Value>;

/// Metadata key holding the worker a task copy was assigned to
pub const ASSIGNED_WORKER_KEY: &str = "assigned_worker";

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

fn next_task_id() -> TaskId {
    NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed)
}

/// Operational status of a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    /// Accepting work
    Available,
    /// Every concurrency slot is in use
    Busy,
    /// Shut down or unreachable
    Offline,
    /// Last interaction left the worker in an error state
    Error,
    /// Taken out of rotation by an operator
    Maintenance,
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Available => write!(f, "available"),
            Self::Busy => write!(f, "busy"),
            Self::Offline => write!(f, "offline"),
            Self::Error => write!(f, "error"),
            Self::Maintenance => write!(f, "maintenance"),
        }
    }
}

impl std::str::FromStr for WorkerStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "available" => Ok(Self::Available),
            "busy" => Ok(Self::Busy),
            "offline" => Ok(Self::Offline),
            "error" => Ok(Self::Error),
            "maintenance" => Ok(Self::Maintenance),
            other => Err(format!("unknown worker status: {other}")),
        }
    }
}

/// Task priority, ordered low < normal < high < critical
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Normal => write!(f, "normal"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "normal" => Ok(Self::Normal),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(format!("unknown priority: {other}")),
        }
    }
}

/// A named skill advertised by a worker.
///
/// Immutable once built; updating a capability replaces it wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerCapability {
    /// Capability name used as the index key
    pub name: String,
    /// Proficiency in 0.0–1.0
    pub proficiency: f64,
    /// Cost per operation (>= 0)
    #[serde(default)]
    pub cost_per_op: f64,
    /// Average response time in seconds (>= 0)
    #[serde(default)]
    pub avg_response_time: f64,
    /// Success rate in 0.0–1.0
    #[serde(default = "default_success_rate")]
    pub success_rate: f64,
}

fn default_success_rate() -> f64 {
    1.0
}

impl WorkerCapability {
    pub fn new(name: impl Into<String>, proficiency: f64) -> Self {
        Self {
            name: name.into(),
            proficiency,
            cost_per_op: 0.0,
            avg_response_time: 0.0,
            success_rate: 1.0,
        }
    }

    pub fn with_cost(mut self, cost_per_op: f64) -> Self {
        self.cost_per_op = cost_per_op;
        self
    }

    pub fn with_response_time(mut self, secs: f64) -> Self {
        self.avg_response_time = secs;
        self
    }

    pub fn with_success_rate(mut self, success_rate: f64) -> Self {
        self.success_rate = success_rate;
        self
    }

    /// Check the numeric ranges, returning a reason on violation
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("capability name is empty".to_string());
        }
        if !(0.0..=1.0).contains(&self.proficiency) {
            return Err(format!(
                "{}: proficiency {} outside 0..=1",
                self.name, self.proficiency
            ));
        }
        if !(0.0..=1.0).contains(&self.success_rate) {
            return Err(format!(
                "{}: success rate {} outside 0..=1",
                self.name, self.success_rate
            ));
        }
        if !(self.cost_per_op >= 0.0) {
            return Err(format!("{}: negative cost per op", self.name));
        }
        if !(self.avg_response_time >= 0.0) {
            return Err(format!("{}: negative response time", self.name));
        }
        Ok(())
    }
}

/// Everything the registry knows about one worker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerProfile {
    /// Unique identity
    pub id: WorkerId,
    pub name: String,
    pub role: String,
    pub description: String,
    /// Capabilities in advertised order
    pub capabilities: Vec<WorkerCapability>,
    pub status: WorkerStatus,
    pub last_heartbeat: DateTime<Utc>,
    /// Lifetime task counters
    pub total_tasks: u64,
    pub succeeded_tasks: u64,
    pub failed_tasks: u64,
    /// Rolling average response time in seconds (exponentially smoothed)
    pub avg_response_time: f64,
    /// Fraction of capacity currently in use (in_flight / max_concurrent)
    pub current_load: f64,
    /// Maximum concurrent tasks
    pub max_concurrent: u32,
    pub tags: BTreeSet<String>,
}

impl WorkerProfile {
    /// Create an available worker with a single concurrency slot
    pub fn new(id: impl Into<WorkerId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            role: String::new(),
            description: String::new(),
            capabilities: Vec::new(),
            status: WorkerStatus::Available,
            last_heartbeat: Utc::now(),
            total_tasks: 0,
            succeeded_tasks: 0,
            failed_tasks: 0,
            avg_response_time: 0.0,
            current_load: 0.0,
            max_concurrent: 1,
            tags: BTreeSet::new(),
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = role.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_capability(mut self, capability: WorkerCapability) -> Self {
        self.capabilities.push(capability);
        self
    }

    pub fn with_max_concurrent(mut self, max_concurrent: u32) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_status(mut self, status: WorkerStatus) -> Self {
        self.status = status;
        self
    }

    /// Look up a capability by name
    pub fn capability(&self, name: &str) -> Option<&WorkerCapability> {
        self.capabilities.iter().find(|c| c.name == name)
    }

    pub fn has_capability(&self, name: &str) -> bool {
        self.capability(name).is_some()
    }

    /// Lifetime success rate; a worker with no history counts as 1.0
    pub fn lifetime_success_rate(&self) -> f64 {
        if self.total_tasks == 0 {
            1.0
        } else {
            self.succeeded_tasks as f64 / self.total_tasks as f64
        }
    }

    /// Whether the heartbeat is older than `window`
    pub fn is_stale(&self, now: DateTime<Utc>, window: Duration) -> bool {
        let window =
            chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::weeks(5200));
        now.signed_duration_since(self.last_heartbeat) > window
    }
}

/// A unit of work submitted for routing or consensus
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRequest {
    /// Unique, monotonic identifier
    pub id: TaskId,
    pub content: String,
    pub required_capability: Option<String>,
    pub priority: Priority,
    /// Upper bound on a single worker call
    pub max_response_time: Option<Duration>,
    pub requester: String,
    pub created_at: DateTime<Utc>,
    /// Scratch data written during execution
    pub metadata: Metadata,
}

impl TaskRequest {
    /// Create a new task with a fresh id
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            id: next_task_id(),
            content: content.into(),
            required_capability: None,
            priority: Priority::Normal,
            max_response_time: None,
            requester: String::new(),
            created_at: Utc::now(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.required_capability = Some(capability.into());
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_response_time(mut self, max: Duration) -> Self {
        self.max_response_time = Some(max);
        self
    }

    pub fn with_requester(mut self, requester: impl Into<String>) -> Self {
        self.requester = requester.into();
        self
    }

    /// Record the worker this copy of the task was handed to
    pub fn assign_to(&mut self, worker_id: &str) {
        self.metadata.insert(
            ASSIGNED_WORKER_KEY.to_string(),
            serde_json::Value::String(worker_id.to_string()),
        );
    }

    pub fn assigned_worker(&self) -> Option<&str> {
        self.metadata
            .get(ASSIGNED_WORKER_KEY)
            .and_then(|v| v.as_str())
    }
}

/// Outcome of one worker executing one task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: TaskId,
    pub worker_id: WorkerId,
    /// Raw reply from the worker (empty on failure)
    pub output: String,
    pub success: bool,
    pub duration_ms: u64,
    pub error: Option<String>,
    pub completed_at: DateTime<Utc>,
    pub metadata: Metadata,
}

impl TaskResult {
    pub fn succeeded(task_id: TaskId, worker_id: WorkerId, output: String, elapsed: Duration) -> Self {
        Self {
            task_id,
            worker_id,
            output,
            success: true,
            duration_ms: elapsed.as_millis() as u64,
            error: None,
            completed_at: Utc::now(),
            metadata: Metadata::new(),
        }
    }

    pub fn failed(task_id: TaskId, worker_id: WorkerId, error: String, elapsed: Duration) -> Self {
        Self {
            task_id,
            worker_id,
            output: String::new(),
            success: false,
            duration_ms: elapsed.as_millis() as u64,
            error: Some(error),
            completed_at: Utc::now(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

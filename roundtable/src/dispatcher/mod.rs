//! Dispatcher: capability-aware routing with load accounting
//!
//! The dispatcher owns the [`CapabilityRegistry`] behind one coarse lock
//! together with routing counters and the bounded result history. Scoring
//! happens under that lock; the lock is never held across the opaque
//! executor call.
//!
//! # Flow
//!
//! ```text
//! TaskRequest ──▶ PolicyGate ──▶ candidates ──▶ filter ──▶ score ──▶ LoadGuard
//!                   │ deny          (index)    (status,     (max)       │
//!                   ▼                           capacity)                ▼
//!              PolicyDenied                        │ empty          executor
//!                                                  ▼                     │
//!                                             NoCandidate           TaskResult
//! ```

mod guard;
pub mod scoring;

pub use guard::LoadGuard;

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::DispatcherConfig;
use crate::error::{DispatchResult, RegistrationResult};
use crate::events::{emit, DispatchEvent, SharedAuditSink, TracingAuditSink};
use crate::executor::{self, SharedExecutor};
use crate::policy::{ActionContext, SharedPolicyGate};
use crate::registry::CapabilityRegistry;
use crate::types::{TaskRequest, TaskResult, WorkerId, WorkerProfile, WorkerStatus};

/// Shared reference to a Dispatcher
pub type SharedDispatcher = Arc<Dispatcher>;

/// Result of a routing decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RouteOutcome {
    /// A worker was selected
    Assigned { worker_id: WorkerId, score: f64 },
    /// No worker passed the filters
    NoCandidate { capability: Option<String> },
    /// The policy gate refused the task before scoring
    PolicyDenied { reason: String },
}

impl RouteOutcome {
    pub fn worker_id(&self) -> Option<&str> {
        match self {
            Self::Assigned { worker_id, .. } => Some(worker_id),
            _ => None,
        }
    }

    pub fn is_assigned(&self) -> bool {
        matches!(self, Self::Assigned { .. })
    }
}

/// Result of routing and executing a task
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DispatchOutcome {
    /// The task ran (successfully or not) on the selected worker
    Completed(TaskResult),
    NoCandidate { capability: Option<String> },
    PolicyDenied { reason: String },
}

impl DispatchOutcome {
    /// The task result, if the task was executed
    pub fn result(&self) -> Option<&TaskResult> {
        match self {
            Self::Completed(result) => Some(result),
            _ => None,
        }
    }
}

/// Routing and completion counters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Counters {
    routed: u64,
    no_candidate: u64,
    policy_denied: u64,
    succeeded: u64,
    failed: u64,
    routing_samples: u64,
    avg_routing_latency_us: f64,
}

/// Everything guarded by the dispatcher lock
pub(crate) struct DispatchState {
    pub(crate) registry: CapabilityRegistry,
    counters: Counters,
    history: VecDeque<TaskResult>,
}

pub(crate) fn lock_state(state: &Mutex<DispatchState>) -> MutexGuard<'_, DispatchState> {
    state.lock().unwrap_or_else(|poisoned| {
        warn!("Dispatcher state lock poisoned, recovering");
        poisoned.into_inner()
    })
}

/// Snapshot returned by [`Dispatcher::get_statistics`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherStatistics {
    pub total_workers: usize,
    pub available_workers: usize,
    pub tasks_routed: u64,
    pub no_candidate: u64,
    pub policy_denied: u64,
    pub tasks_succeeded: u64,
    pub tasks_failed: u64,
    /// Rolling average time spent choosing a worker, in microseconds
    pub avg_routing_latency_us: f64,
    /// Current load per worker
    pub utilization: BTreeMap<WorkerId, f64>,
    pub available_capabilities: Vec<String>,
}

/// Snapshot returned by [`Dispatcher::health_check`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    /// No stale heartbeats and at least one worker not offline.
    /// Busy workers count as healthy.
    pub healthy: bool,
    pub total_workers: usize,
    /// Workers not marked offline
    pub online_workers: usize,
    /// Informational only; does not affect `healthy`
    pub available_workers: usize,
    pub stale_workers: Vec<WorkerId>,
    pub staleness_window_secs: u64,
    pub checked_at: DateTime<Utc>,
}

enum Selection {
    Assigned {
        worker_id: WorkerId,
        score: f64,
        candidates: usize,
    },
    NoCandidate,
}

/// Capability-aware router over a registry of workers
pub struct Dispatcher {
    state: Arc<Mutex<DispatchState>>,
    config: DispatcherConfig,
    policy: Option<SharedPolicyGate>,
    audit: SharedAuditSink,
}

impl Dispatcher {
    /// Create a dispatcher with an empty registry and the tracing audit sink
    pub fn new(config: DispatcherConfig) -> Self {
        let registry = CapabilityRegistry::new(config.registration_mode);
        let history = VecDeque::with_capacity(config.history_capacity.min(1024));
        Self {
            state: Arc::new(Mutex::new(DispatchState {
                registry,
                counters: Counters::default(),
                history,
            })),
            config,
            policy: None,
            audit: Arc::new(TracingAuditSink),
        }
    }

    /// Consult `policy` before every routing decision
    pub fn with_policy(mut self, policy: SharedPolicyGate) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Report audit events to `audit` instead of tracing
    pub fn with_audit_sink(mut self, audit: SharedAuditSink) -> Self {
        self.audit = audit;
        self
    }

    /// Create a shared reference to this dispatcher
    pub fn shared(self) -> SharedDispatcher {
        Arc::new(self)
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub(crate) fn audit(&self) -> &SharedAuditSink {
        &self.audit
    }

    fn state(&self) -> MutexGuard<'_, DispatchState> {
        lock_state(&self.state)
    }

    // =========================================================================
    // Registration and status
    // =========================================================================

    /// Register a worker and bind its executor
    pub fn register(
        &self,
        profile: WorkerProfile,
        executor: SharedExecutor,
    ) -> RegistrationResult<bool> {
        let worker_id = profile.id.clone();
        let capabilities: Vec<String> = profile.capabilities.iter().map(|c| c.name.clone()).collect();
        let max_concurrent = profile.max_concurrent;

        let added = self.state().registry.register(profile, executor)?;
        if added {
            emit(
                self.audit.as_ref(),
                &DispatchEvent::WorkerRegistered {
                    worker_id,
                    capabilities,
                    max_concurrent,
                    timestamp: Utc::now(),
                },
            );
        }
        Ok(added)
    }

    /// Profile snapshot for one worker
    pub fn get_worker_status(&self, worker_id: &str) -> Option<WorkerProfile> {
        self.state().registry.get(worker_id).cloned()
    }

    /// Profile snapshots matching the filters, ordered by identity
    pub fn list_workers(
        &self,
        capability: Option<&str>,
        status: Option<WorkerStatus>,
    ) -> Vec<WorkerProfile> {
        let mut workers: Vec<WorkerProfile> = self
            .state()
            .registry
            .list(capability, status)
            .into_iter()
            .cloned()
            .collect();
        workers.sort_by(|a, b| a.id.cmp(&b.id));
        workers
    }

    /// Set an operator status; false if the worker is unknown
    pub fn set_status(&self, worker_id: &str, status: WorkerStatus) -> bool {
        let updated = {
            let mut state = self.state();
            state
                .registry
                .set_status(worker_id, status)
                .then(|| state.registry.get(worker_id).map(|p| p.status))
                .flatten()
        };

        match updated {
            Some(status) => {
                info!(worker_id, %status, "Worker status changed");
                emit(
                    self.audit.as_ref(),
                    &DispatchEvent::WorkerStatusChanged {
                        worker_id: worker_id.to_string(),
                        status,
                        timestamp: Utc::now(),
                    },
                );
                true
            }
            None => false,
        }
    }

    /// Refresh a worker's heartbeat; false if unknown
    pub fn heartbeat(&self, worker_id: &str) -> bool {
        self.state().registry.heartbeat(worker_id)
    }

    /// Shutdown: mark every worker offline and clear in-flight bookkeeping
    pub fn mark_offline_all(&self) {
        self.state().registry.mark_offline_all();
    }

    // =========================================================================
    // Routing
    // =========================================================================

    fn select(&self, state: &DispatchState, task: &TaskRequest) -> Selection {
        let capability = task.required_capability.as_deref();
        let max_secs = task.max_response_time.map(|d| d.as_secs_f64());

        let mut best: Option<(&str, f64)> = None;
        let mut candidates = 0usize;

        for entry in state.registry.candidates(capability) {
            let profile = &entry.profile;
            if !entry.is_dispatchable() {
                continue;
            }
            if let Some(max) = max_secs {
                if profile.total_tasks > 0 && profile.avg_response_time > max {
                    debug!(worker_id = %profile.id, avg = profile.avg_response_time, max, "Too slow for task");
                    continue;
                }
            }

            candidates += 1;
            let score = scoring::score(profile, capability, &self.config.scoring);
            debug!(task_id = task.id, worker_id = %profile.id, score, "Candidate scored");

            match best {
                Some((_, best_score)) if !scoring::beats(score, best_score) => {}
                _ => best = Some((profile.id.as_str(), score)),
            }
        }

        match best {
            Some((worker_id, score)) => Selection::Assigned {
                worker_id: worker_id.to_string(),
                score,
                candidates,
            },
            None => Selection::NoCandidate,
        }
    }

    /// Route and optionally reserve, returning the guard when reserved
    fn route_inner(
        &self,
        task: &TaskRequest,
        reserve: bool,
    ) -> (RouteOutcome, Option<(LoadGuard, SharedExecutor)>) {
        let start = Instant::now();

        if let Some(policy) = &self.policy {
            let decision = policy.is_allowed(&ActionContext::for_route(task));
            if !decision.allowed {
                let reason = decision.reason.unwrap_or_else(|| "denied by policy".to_string());
                self.state().counters.policy_denied += 1;
                info!(task_id = task.id, %reason, "Task denied by policy");
                emit(
                    self.audit.as_ref(),
                    &DispatchEvent::PolicyDenied {
                        task_id: task.id,
                        reason: reason.clone(),
                        priority: task.priority,
                        timestamp: Utc::now(),
                    },
                );
                return (RouteOutcome::PolicyDenied { reason }, None);
            }
        }

        let (selection, reservation, latency) = {
            let mut state = self.state();
            let selection = self.select(&state, task);

            let mut reservation = None;
            if let (true, Selection::Assigned { worker_id, .. }) = (reserve, &selection) {
                // Selection only yields dispatchable workers, so this cannot fail
                // while the lock is held.
                if let Ok(epoch) = state.registry.acquire(worker_id) {
                    let guard = LoadGuard::new(Arc::clone(&self.state), worker_id.clone(), epoch);
                    match state.registry.executor(worker_id) {
                        Some(executor) => reservation = Some((guard, executor)),
                        None => guard.release_locked(&mut state),
                    }
                }
            }

            let latency = start.elapsed();
            let counters = &mut state.counters;
            let sample = latency.as_secs_f64() * 1_000_000.0;
            counters.avg_routing_latency_us = if counters.routing_samples == 0 {
                sample
            } else {
                self.config.smoothing_alpha * sample
                    + (1.0 - self.config.smoothing_alpha) * counters.avg_routing_latency_us
            };
            counters.routing_samples += 1;
            match selection {
                Selection::Assigned { .. } => counters.routed += 1,
                Selection::NoCandidate => counters.no_candidate += 1,
            }

            (selection, reservation, latency)
        };

        let outcome = match selection {
            Selection::Assigned {
                worker_id,
                score,
                candidates,
            } => {
                info!(
                    task_id = task.id,
                    worker_id = %worker_id,
                    score,
                    candidates,
                    priority = %task.priority,
                    "Task routed"
                );
                emit(
                    self.audit.as_ref(),
                    &DispatchEvent::TaskRouted {
                        task_id: task.id,
                        worker_id: worker_id.clone(),
                        score,
                        candidates,
                        priority: task.priority,
                        routing_latency_us: latency.as_micros() as u64,
                        timestamp: Utc::now(),
                    },
                );
                RouteOutcome::Assigned { worker_id, score }
            }
            Selection::NoCandidate => {
                info!(
                    task_id = task.id,
                    capability = ?task.required_capability,
                    "No candidate worker"
                );
                emit(
                    self.audit.as_ref(),
                    &DispatchEvent::NoCandidate {
                        task_id: task.id,
                        capability: task.required_capability.clone(),
                        priority: task.priority,
                        timestamp: Utc::now(),
                    },
                );
                RouteOutcome::NoCandidate {
                    capability: task.required_capability.clone(),
                }
            }
        };

        (outcome, reservation)
    }

    /// Choose the best worker for `task` without executing it
    pub fn route(&self, task: &TaskRequest) -> RouteOutcome {
        self.route_inner(task, false).0
    }

    /// Route `task`, reserve the chosen worker atomically, and execute it
    pub async fn dispatch(&self, task: TaskRequest) -> DispatchOutcome {
        let timeout = task.max_response_time;
        match self.route_inner(&task, true) {
            (RouteOutcome::Assigned { .. }, Some((guard, executor))) => {
                DispatchOutcome::Completed(self.run(task, guard, executor, timeout).await)
            }
            (RouteOutcome::PolicyDenied { reason }, _) => DispatchOutcome::PolicyDenied { reason },
            (RouteOutcome::NoCandidate { capability }, _) => {
                DispatchOutcome::NoCandidate { capability }
            }
            (RouteOutcome::Assigned { .. }, None) => DispatchOutcome::NoCandidate {
                capability: task.required_capability.clone(),
            },
        }
    }

    // =========================================================================
    // Execution
    // =========================================================================

    /// Execute `task` on an explicitly named worker, time-boxed by the
    /// task's own `max_response_time`
    pub async fn execute(&self, task: TaskRequest, worker_id: &str) -> DispatchResult<TaskResult> {
        let timeout = task.max_response_time;
        self.execute_on(task, worker_id, timeout).await
    }

    /// Execute `task` on an explicitly named worker with `timeout`.
    ///
    /// Fails only when the worker cannot take the task; executor failures
    /// and timeouts come back as a failed [`TaskResult`].
    pub async fn execute_on(
        &self,
        task: TaskRequest,
        worker_id: &str,
        timeout: Option<Duration>,
    ) -> DispatchResult<TaskResult> {
        let (guard, executor) = {
            let mut state = self.state();
            let epoch = state.registry.acquire(worker_id)?;
            let executor = state.registry.executor(worker_id);
            let guard = LoadGuard::new(Arc::clone(&self.state), worker_id.to_string(), epoch);
            match executor {
                Some(executor) => (guard, executor),
                None => {
                    guard.release_locked(&mut state);
                    return Err(crate::error::DispatchError::UnknownWorker(
                        worker_id.to_string(),
                    ));
                }
            }
        };

        Ok(self.run(task, guard, executor, timeout).await)
    }

    async fn run(
        &self,
        mut task: TaskRequest,
        guard: LoadGuard,
        executor: SharedExecutor,
        timeout: Option<Duration>,
    ) -> TaskResult {
        let worker_id = guard.worker_id().to_string();
        task.assign_to(&worker_id);

        let mut result = executor::invoke(executor.as_ref(), &task, &worker_id, timeout).await;
        result.metadata.extend(task.metadata);

        {
            let mut state = self.state();
            state.registry.record_completion(
                &worker_id,
                result.success,
                result.duration_ms as f64 / 1000.0,
                self.config.smoothing_alpha,
            );
            guard.release_locked(&mut state);

            if let Some(profile) = state.registry.get(&worker_id) {
                result
                    .metadata
                    .insert("worker_load".to_string(), profile.current_load.into());
            }

            if result.success {
                state.counters.succeeded += 1;
            } else {
                state.counters.failed += 1;
            }

            let capacity = self.config.history_capacity;
            if capacity > 0 {
                if state.history.len() >= capacity {
                    state.history.pop_front();
                }
                state.history.push_back(result.clone());
            }
        }

        emit(
            self.audit.as_ref(),
            &DispatchEvent::TaskCompleted {
                task_id: result.task_id,
                worker_id,
                success: result.success,
                duration_ms: result.duration_ms,
                error: result.error.clone(),
                timestamp: Utc::now(),
            },
        );

        result
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    /// Most recent `n` task results, oldest first
    pub fn recent_results(&self, n: usize) -> Vec<TaskResult> {
        let state = self.state();
        let skip = state.history.len().saturating_sub(n);
        state.history.iter().skip(skip).cloned().collect()
    }

    /// Totals, routing latency, utilization and available capabilities
    pub fn get_statistics(&self) -> DispatcherStatistics {
        let state = self.state();
        let counters = &state.counters;
        DispatcherStatistics {
            total_workers: state.registry.len(),
            available_workers: state
                .registry
                .list(None, Some(WorkerStatus::Available))
                .len(),
            tasks_routed: counters.routed,
            no_candidate: counters.no_candidate,
            policy_denied: counters.policy_denied,
            tasks_succeeded: counters.succeeded,
            tasks_failed: counters.failed,
            avg_routing_latency_us: counters.avg_routing_latency_us,
            utilization: state.registry.utilization(),
            available_capabilities: state.registry.available_capabilities(),
        }
    }

    /// Heartbeat freshness against the configured staleness window
    pub fn health_check(&self) -> HealthReport {
        self.health_check_at(Utc::now())
    }

    /// [`Dispatcher::health_check`] evaluated at `now`
    pub fn health_check_at(&self, now: DateTime<Utc>) -> HealthReport {
        let window = self.config.staleness_window();
        let state = self.state();

        let mut stale_workers: Vec<WorkerId> = state
            .registry
            .profiles()
            .filter(|p| p.status != WorkerStatus::Offline && p.is_stale(now, window))
            .map(|p| p.id.clone())
            .collect();
        stale_workers.sort();

        let online_workers = state
            .registry
            .profiles()
            .filter(|p| p.status != WorkerStatus::Offline)
            .count();
        let available_workers = state
            .registry
            .list(None, Some(WorkerStatus::Available))
            .len();

        let report = HealthReport {
            healthy: stale_workers.is_empty() && online_workers > 0,
            total_workers: state.registry.len(),
            online_workers,
            available_workers,
            stale_workers,
            staleness_window_secs: window.as_secs(),
            checked_at: now,
        };

        if !report.healthy {
            warn!(
                stale = report.stale_workers.len(),
                online = report.online_workers,
                "Health check failed"
            );
        }
        report
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(DispatcherConfig::default())
    }
}

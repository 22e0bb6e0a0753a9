//! Dispatch test suite: routing, load accounting and audit behaviour.
//!
//! Exercises the dispatcher end to end with hand-written executors: scripted
//! replies, failing workers, slow workers and a concurrency tracker.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use roundtable::config::{DispatcherConfig, RegistrationMode, ScoringWeights};
use roundtable::dispatcher::scoring;
use roundtable::error::{AuditError, RegistrationError};
use roundtable::events::{AuditSink, DispatchEvent, EventBus};
use roundtable::executor::{SharedExecutor, WorkerExecutor};
use roundtable::policy::{ActionContext, PolicyDecision};
use roundtable::{
    DispatchOutcome, Dispatcher, Priority, RouteOutcome, TaskRequest, WorkerCapability,
    WorkerProfile, WorkerStatus,
};

// ── Test doubles ──────────────────────────────────────────────────────

struct Scripted(&'static str);

#[async_trait]
impl WorkerExecutor for Scripted {
    async fn execute(&self, _content: &str) -> anyhow::Result<String> {
        Ok(self.0.to_string())
    }
}

struct Failing;

#[async_trait]
impl WorkerExecutor for Failing {
    async fn execute(&self, _content: &str) -> anyhow::Result<String> {
        anyhow::bail!("worker crashed")
    }
}

struct Slow(Duration);

#[async_trait]
impl WorkerExecutor for Slow {
    async fn execute(&self, _content: &str) -> anyhow::Result<String> {
        tokio::time::sleep(self.0).await;
        Ok("finally".to_string())
    }
}

/// Tracks the peak number of overlapping calls
#[derive(Default)]
struct ConcurrencyTracker {
    active: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl WorkerExecutor for ConcurrencyTracker {
    async fn execute(&self, _content: &str) -> anyhow::Result<String> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok("done".to_string())
    }
}

struct BrokenSink;

impl AuditSink for BrokenSink {
    fn log(&self, _event: &DispatchEvent) -> Result<(), AuditError> {
        Err(AuditError::DeliveryFailed("disk full".to_string()))
    }
}

/// Route logs to the test writer; `RUST_LOG=roundtable=debug` shows scoring
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_test_writer()
        .try_init();
}

fn scripted(reply: &'static str) -> SharedExecutor {
    Arc::new(Scripted(reply))
}

fn rust_worker(id: &str, proficiency: f64) -> WorkerProfile {
    WorkerProfile::new(id, id)
        .with_role("coder")
        .with_capability(WorkerCapability::new("rust", proficiency))
}

fn rust_task() -> TaskRequest {
    TaskRequest::new("implement the parser").with_capability("rust")
}

// ── Registration ──────────────────────────────────────────────────────

#[test]
fn registration_strict_rejects_duplicate() {
    let dispatcher = Dispatcher::default();
    dispatcher.register(rust_worker("w1", 0.5), scripted("a")).unwrap();

    let err = dispatcher
        .register(rust_worker("w1", 0.9), scripted("b"))
        .unwrap_err();
    assert!(matches!(err, RegistrationError::DuplicateWorker(_)));

    // Registry unchanged: original proficiency still in place
    let profile = dispatcher.get_worker_status("w1").unwrap();
    assert_eq!(profile.capability("rust").unwrap().proficiency, 0.5);
}

#[test]
fn registration_soft_ignores_duplicate() {
    let config = DispatcherConfig {
        registration_mode: RegistrationMode::Soft,
        ..DispatcherConfig::default()
    };
    let dispatcher = Dispatcher::new(config);
    assert!(dispatcher.register(rust_worker("w1", 0.5), scripted("a")).unwrap());
    assert!(!dispatcher.register(rust_worker("w1", 0.9), scripted("b")).unwrap());
    assert_eq!(dispatcher.list_workers(None, None).len(), 1);
}

#[test]
fn registration_rejects_malformed_capability() {
    let dispatcher = Dispatcher::default();
    let bad = WorkerProfile::new("w1", "w1")
        .with_capability(WorkerCapability::new("rust", 0.5).with_success_rate(1.2));
    assert!(matches!(
        dispatcher.register(bad, scripted("a")),
        Err(RegistrationError::InvalidCapability { .. })
    ));
    assert!(dispatcher.get_worker_status("w1").is_none());
}

#[test]
fn list_workers_filters_by_capability_and_status() {
    let dispatcher = Dispatcher::default();
    dispatcher.register(rust_worker("w1", 0.5), scripted("a")).unwrap();
    dispatcher
        .register(
            WorkerProfile::new("w2", "w2").with_capability(WorkerCapability::new("python", 0.5)),
            scripted("b"),
        )
        .unwrap();
    dispatcher.set_status("w1", WorkerStatus::Maintenance);

    assert_eq!(dispatcher.list_workers(Some("python"), None).len(), 1);
    assert_eq!(
        dispatcher
            .list_workers(None, Some(WorkerStatus::Maintenance))
            .iter()
            .map(|p| p.id.as_str())
            .collect::<Vec<_>>(),
        vec!["w1"]
    );
}

// ── Routing ───────────────────────────────────────────────────────────

#[test]
fn routing_unregistered_capability_is_no_candidate() {
    let dispatcher = Dispatcher::default();
    dispatcher.register(rust_worker("w1", 0.9), scripted("a")).unwrap();

    let outcome = dispatcher.route(&TaskRequest::new("x").with_capability("haskell"));
    assert!(matches!(outcome, RouteOutcome::NoCandidate { .. }));
}

#[test]
fn routing_empty_registry_is_no_candidate() {
    let dispatcher = Dispatcher::default();
    assert!(matches!(
        dispatcher.route(&TaskRequest::new("anything")),
        RouteOutcome::NoCandidate { capability: None }
    ));
}

#[test]
fn routing_without_capability_considers_all_available() {
    let dispatcher = Dispatcher::default();
    dispatcher.register(rust_worker("w1", 0.9), scripted("a")).unwrap();
    dispatcher
        .register(WorkerProfile::new("w2", "w2"), scripted("b"))
        .unwrap();

    let outcome = dispatcher.route(&TaskRequest::new("anything"));
    assert!(outcome.is_assigned());
}

#[test]
fn scores_are_never_negative() {
    let weights = ScoringWeights {
        load_penalty: 500.0,
        ..ScoringWeights::default()
    };
    for load in [0.0, 0.5, 1.0] {
        for proficiency in [0.0, 0.3, 1.0] {
            let mut profile = rust_worker("w", proficiency);
            profile.current_load = load;
            profile.total_tasks = 100;
            profile.failed_tasks = 100;
            profile.avg_response_time = 1_000.0;
            assert!(scoring::score(&profile, Some("rust"), &weights) >= 0.0);
            assert!(scoring::score(&profile, None, &weights) >= 0.0);
        }
    }
}

#[test]
fn priority_is_carried_but_does_not_change_choice() {
    let dispatcher = Dispatcher::default();
    dispatcher.register(rust_worker("w1", 0.4), scripted("a")).unwrap();
    dispatcher.register(rust_worker("w2", 0.8), scripted("b")).unwrap();

    for priority in [Priority::Low, Priority::Critical] {
        let task = rust_task().with_priority(priority);
        assert_eq!(dispatcher.route(&task).worker_id(), Some("w2"));
    }
}

// ── Policy and audit ──────────────────────────────────────────────────

#[test]
fn policy_denial_is_distinct_from_no_candidate() {
    let dispatcher = Dispatcher::default().with_policy(Arc::new(|ctx: &ActionContext| {
        if ctx.requester == "intruder" {
            PolicyDecision::deny("unknown requester")
        } else {
            PolicyDecision::allow()
        }
    }));
    dispatcher.register(rust_worker("w1", 0.9), scripted("a")).unwrap();

    let denied = dispatcher.route(&rust_task().with_requester("intruder"));
    assert!(matches!(denied, RouteOutcome::PolicyDenied { .. }));

    let allowed = dispatcher.route(&rust_task().with_requester("ops"));
    assert_eq!(allowed.worker_id(), Some("w1"));

    let stats = dispatcher.get_statistics();
    assert_eq!(stats.policy_denied, 1);
    assert_eq!(stats.tasks_routed, 1);
}

#[tokio::test]
async fn audit_sink_failure_never_fails_routing() {
    init_tracing();
    let dispatcher = Dispatcher::default().with_audit_sink(Arc::new(BrokenSink));
    dispatcher.register(rust_worker("w1", 0.9), scripted("ok")).unwrap();

    assert_eq!(dispatcher.route(&rust_task()).worker_id(), Some("w1"));
    let outcome = dispatcher.dispatch(rust_task()).await;
    assert!(outcome.result().unwrap().success);
}

#[tokio::test]
async fn event_bus_sees_full_lifecycle() {
    let bus = EventBus::new().shared();
    let dispatcher = Dispatcher::default().with_audit_sink(bus.clone());
    dispatcher.register(rust_worker("w1", 0.9), scripted("ok")).unwrap();

    let task = rust_task();
    let task_id = task.id;
    dispatcher.dispatch(task).await;

    let kinds: Vec<&str> = bus
        .events_for_task(task_id)
        .iter()
        .map(|e| e.event_type())
        .collect();
    assert_eq!(kinds, vec!["task_routed", "task_completed"]);
    assert_eq!(bus.count("worker_registered"), 1);
}

// ── Load accounting ───────────────────────────────────────────────────

#[tokio::test]
async fn load_balanced_after_success_and_failure() {
    let dispatcher = Dispatcher::default();
    dispatcher
        .register(rust_worker("ok", 0.9).with_max_concurrent(2), scripted("fine"))
        .unwrap();
    dispatcher
        .register(rust_worker("bad", 0.1).with_max_concurrent(2), Arc::new(Failing))
        .unwrap();

    for _ in 0..3 {
        dispatcher.dispatch(rust_task()).await;
    }
    dispatcher
        .execute(rust_task(), "bad")
        .await
        .expect("bad worker has capacity");

    for id in ["ok", "bad"] {
        let profile = dispatcher.get_worker_status(id).unwrap();
        assert_eq!(profile.current_load, 0.0, "{id} leaked load");
        assert_eq!(profile.status, WorkerStatus::Available);
    }
    let bad = dispatcher.get_worker_status("bad").unwrap();
    assert_eq!(bad.failed_tasks, 1);
    assert_eq!(bad.lifetime_success_rate(), 0.0);
}

#[tokio::test(start_paused = true)]
async fn timeout_releases_load() {
    init_tracing();
    let dispatcher = Dispatcher::default();
    dispatcher
        .register(rust_worker("slow", 0.9), Arc::new(Slow(Duration::from_secs(120))))
        .unwrap();

    let task = rust_task().with_max_response_time(Duration::from_secs(2));
    let outcome = dispatcher.dispatch(task).await;

    let result = outcome.result().unwrap();
    assert!(!result.success);
    assert!(result.error.as_deref().unwrap().contains("timed out"));

    let profile = dispatcher.get_worker_status("slow").unwrap();
    assert_eq!(profile.current_load, 0.0);
    assert_eq!(profile.failed_tasks, 1);
    assert_eq!(profile.status, WorkerStatus::Available);
}

#[tokio::test(start_paused = true)]
async fn cancelled_dispatch_releases_load() {
    let dispatcher = Dispatcher::default().shared();
    dispatcher
        .register(rust_worker("slow", 0.9), Arc::new(Slow(Duration::from_secs(120))))
        .unwrap();

    let handle = {
        let dispatcher = Arc::clone(&dispatcher);
        tokio::spawn(async move { dispatcher.dispatch(rust_task()).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(
        dispatcher.get_worker_status("slow").unwrap().status,
        WorkerStatus::Busy
    );

    handle.abort();
    assert!(handle.await.unwrap_err().is_cancelled());

    let profile = dispatcher.get_worker_status("slow").unwrap();
    assert_eq!(profile.current_load, 0.0);
    assert_eq!(profile.status, WorkerStatus::Available);
}

#[tokio::test(start_paused = true)]
async fn operator_busy_survives_task_completion() {
    let dispatcher = Dispatcher::default().shared();
    dispatcher
        .register(
            rust_worker("w1", 0.9).with_max_concurrent(2),
            Arc::new(Slow(Duration::from_secs(1))),
        )
        .unwrap();

    let handle = {
        let dispatcher = Arc::clone(&dispatcher);
        tokio::spawn(async move { dispatcher.dispatch(rust_task()).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(dispatcher.set_status("w1", WorkerStatus::Busy));

    assert!(handle.await.unwrap().result().unwrap().success);

    let profile = dispatcher.get_worker_status("w1").unwrap();
    assert_eq!(profile.current_load, 0.0);
    assert_eq!(profile.status, WorkerStatus::Busy);
    assert!(!dispatcher.route(&rust_task()).is_assigned());
}

#[tokio::test(start_paused = true)]
async fn shutdown_mid_flight_never_oversubscribes() {
    let dispatcher = Dispatcher::default().shared();
    dispatcher
        .register(rust_worker("w1", 0.9), Arc::new(Slow(Duration::from_secs(60))))
        .unwrap();

    let spawn_dispatch = |dispatcher: &Arc<Dispatcher>| {
        let dispatcher = Arc::clone(dispatcher);
        tokio::spawn(async move { dispatcher.dispatch(rust_task()).await })
    };

    let before_shutdown = spawn_dispatch(&dispatcher);
    tokio::time::sleep(Duration::from_millis(10)).await;

    dispatcher.mark_offline_all();
    dispatcher.set_status("w1", WorkerStatus::Available);
    let after_shutdown = spawn_dispatch(&dispatcher);
    tokio::time::sleep(Duration::from_millis(10)).await;

    // The pre-shutdown task finishes first; its slot was already cleared
    before_shutdown.await.unwrap();
    let profile = dispatcher.get_worker_status("w1").unwrap();
    assert_eq!(profile.current_load, 1.0);
    assert_eq!(profile.status, WorkerStatus::Busy);
    assert!(!dispatcher.route(&rust_task()).is_assigned());

    after_shutdown.await.unwrap();
    let profile = dispatcher.get_worker_status("w1").unwrap();
    assert_eq!(profile.current_load, 0.0);
    assert_eq!(profile.status, WorkerStatus::Available);
}

#[tokio::test(start_paused = true)]
async fn routing_never_exceeds_capacity() {
    init_tracing();
    let tracker = Arc::new(ConcurrencyTracker::default());
    let dispatcher = Dispatcher::default().shared();
    dispatcher
        .register(rust_worker("w1", 0.9).with_max_concurrent(2), tracker.clone())
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..6 {
        let dispatcher = Arc::clone(&dispatcher);
        handles.push(tokio::spawn(async move { dispatcher.dispatch(rust_task()).await }));
    }

    let mut completed = 0;
    let mut rejected = 0;
    for handle in handles {
        match handle.await.unwrap() {
            DispatchOutcome::Completed(_) => completed += 1,
            DispatchOutcome::NoCandidate { .. } => rejected += 1,
            DispatchOutcome::PolicyDenied { .. } => unreachable!("no policy installed"),
        }
    }

    assert_eq!(completed + rejected, 6);
    assert!(completed >= 1);
    assert!(tracker.peak.load(Ordering::SeqCst) <= 2);
    assert_eq!(dispatcher.get_worker_status("w1").unwrap().current_load, 0.0);
}

// ── Statistics and health ─────────────────────────────────────────────

#[tokio::test]
async fn statistics_track_outcomes() {
    let dispatcher = Dispatcher::default();
    dispatcher.register(rust_worker("w1", 0.9), scripted("ok")).unwrap();

    dispatcher.dispatch(rust_task()).await;
    dispatcher
        .dispatch(TaskRequest::new("x").with_capability("go"))
        .await;

    let stats = dispatcher.get_statistics();
    assert_eq!(stats.tasks_routed, 1);
    assert_eq!(stats.no_candidate, 1);
    assert_eq!(stats.tasks_succeeded, 1);
    assert!(stats.avg_routing_latency_us >= 0.0);
    assert_eq!(stats.utilization["w1"], 0.0);
    assert_eq!(stats.available_capabilities, vec!["rust".to_string()]);

    let recent = dispatcher.recent_results(5);
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].output, "ok");
}

#[tokio::test(start_paused = true)]
async fn fully_loaded_pool_is_healthy() {
    let dispatcher = Dispatcher::default().shared();
    dispatcher
        .register(rust_worker("w1", 0.9), Arc::new(Slow(Duration::from_secs(10))))
        .unwrap();

    let handle = {
        let dispatcher = Arc::clone(&dispatcher);
        tokio::spawn(async move { dispatcher.dispatch(rust_task()).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    let health = dispatcher.health_check();
    assert!(health.healthy);
    assert!(health.stale_workers.is_empty());
    assert_eq!(health.available_workers, 0);
    assert_eq!(health.online_workers, 1);

    handle.await.unwrap();
    assert_eq!(dispatcher.health_check().available_workers, 1);
}

#[test]
fn shutdown_marks_everyone_offline() {
    let dispatcher = Dispatcher::default();
    dispatcher.register(rust_worker("w1", 0.9), scripted("a")).unwrap();
    dispatcher.register(rust_worker("w2", 0.9), scripted("b")).unwrap();

    dispatcher.mark_offline_all();

    assert!(dispatcher
        .list_workers(None, None)
        .iter()
        .all(|p| p.status == WorkerStatus::Offline));
    assert!(!dispatcher.route(&rust_task()).is_assigned());
    // Offline workers are not reported stale, but nobody is online
    let health = dispatcher.health_check();
    assert!(health.stale_workers.is_empty());
    assert!(!health.healthy);
}

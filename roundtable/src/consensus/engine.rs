//! Roundtable: multi-worker consensus rounds
//!
//! A round fans one task out to a list of workers through the dispatcher,
//! bounded by a semaphore and with an independent timeout per call. Every
//! call is joined before resolution (a barrier, not first-N). Failed or
//! timed-out calls simply contribute no vote.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::confidence::parse_reply;
use super::ledger::{RoundtableStatistics, VoteLedger};
use super::phase::RoundPhase;
use super::voting::{
    consensus_score, quorum_threshold, resolve, TieBreakRule, TieBreakUsed, VoteRecord,
    VotingAlgorithm,
};
use crate::config::RoundtableConfig;
use crate::dispatcher::SharedDispatcher;
use crate::error::{ConsensusError, ConsensusResult};
use crate::events::{emit, DispatchEvent};
use crate::types::{TaskId, TaskRequest, TaskResult, WorkerId};

/// Per-round parameters
#[derive(Debug, Clone)]
pub struct RoundtableOptions {
    pub algorithm: VotingAlgorithm,
    /// Independent time box for each worker call
    pub timeout: Duration,
    /// Fraction of workers that must vote, in (0, 1]
    pub quorum_ratio: f64,
    pub tie_break: TieBreakRule,
    /// Per-worker vote weight; missing workers vote with 1.0
    pub weights: HashMap<WorkerId, f64>,
}

impl Default for RoundtableOptions {
    fn default() -> Self {
        Self {
            algorithm: VotingAlgorithm::Majority,
            timeout: Duration::from_secs(30),
            quorum_ratio: 0.6,
            tie_break: TieBreakRule::Confidence,
            weights: HashMap::new(),
        }
    }
}

impl RoundtableOptions {
    /// Options from configuration, parsing algorithm and tie-break names
    pub fn from_config(config: &RoundtableConfig) -> ConsensusResult<Self> {
        Ok(Self {
            algorithm: config.algorithm.parse()?,
            timeout: config.timeout(),
            quorum_ratio: config.quorum_ratio,
            tie_break: TieBreakRule::parse(
                &config.tie_break,
                config.chair.as_deref(),
                config.random_seed,
            )?,
            weights: HashMap::new(),
        })
    }

    pub fn with_algorithm(mut self, algorithm: VotingAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_quorum_ratio(mut self, ratio: f64) -> Self {
        self.quorum_ratio = ratio;
        self
    }

    pub fn with_tie_break(mut self, rule: TieBreakRule) -> Self {
        self.tie_break = rule;
        self
    }

    pub fn with_weight(mut self, worker_id: impl Into<WorkerId>, weight: f64) -> Self {
        self.weights.insert(worker_id.into(), weight);
        self
    }

    fn weight_for(&self, worker_id: &str) -> f64 {
        match self.weights.get(worker_id) {
            None => 1.0,
            Some(&w) if w > 0.0 && w.is_finite() => w,
            Some(&w) => {
                warn!(worker_id, weight = w, "Non-positive vote weight, using 1.0");
                1.0
            }
        }
    }
}

/// Bookkeeping attached to every final report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundMetadata {
    pub elapsed_ms: u64,
    /// Distinct workers asked, in the order supplied
    pub attempted_workers: Vec<WorkerId>,
    /// Attempted workers that produced no vote (failure, timeout, unavailable)
    pub failed_workers: Vec<WorkerId>,
    pub quorum_threshold: usize,
    pub quorum_met: bool,
}

/// Outcome of one roundtable round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalReport {
    pub task_id: TaskId,
    /// Quorum met and a winner chosen
    pub consensus_achieved: bool,
    /// Share of weighted confidence behind the winner, in 0..=1
    pub consensus_score: f64,
    pub winning_value: Option<String>,
    pub algorithm: VotingAlgorithm,
    /// Collected votes in the order workers were supplied; absent workers
    /// are missing rather than null
    pub votes: Vec<VoteRecord>,
    /// Tie-break rule actually invoked, if the top score tied
    pub tie_break: Option<TieBreakUsed>,
    /// Algorithm score per distinct value
    pub scores: BTreeMap<String, f64>,
    pub metadata: RoundMetadata,
}

/// Consensus engine over a shared dispatcher
pub struct Roundtable {
    dispatcher: SharedDispatcher,
    pool_size: usize,
    ledger: Mutex<VoteLedger>,
}

impl Roundtable {
    /// Create a roundtable with the configured pool size and ledger capacity
    pub fn new(dispatcher: SharedDispatcher, config: &RoundtableConfig) -> Self {
        Self {
            dispatcher,
            pool_size: config.pool_size.max(1),
            ledger: Mutex::new(VoteLedger::new(config.ledger_capacity)),
        }
    }

    pub fn dispatcher(&self) -> &SharedDispatcher {
        &self.dispatcher
    }

    fn ledger(&self) -> MutexGuard<'_, VoteLedger> {
        self.ledger.lock().unwrap_or_else(|poisoned| {
            warn!("Vote ledger lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Run one consensus round for `task` across `worker_ids`.
    ///
    /// Fails only on configuration errors (no workers, bad quorum ratio),
    /// before any worker is called. Everything else folds into the report.
    pub async fn execute_roundtable(
        &self,
        task: &TaskRequest,
        worker_ids: &[WorkerId],
        options: &RoundtableOptions,
    ) -> ConsensusResult<FinalReport> {
        let start = Instant::now();
        let mut phase = RoundPhase::Idle;

        if worker_ids.is_empty() {
            return Err(ConsensusError::NoWorkersAvailable);
        }

        let mut seen = HashSet::new();
        let workers: Vec<WorkerId> = worker_ids
            .iter()
            .filter(|id| seen.insert(id.as_str()))
            .cloned()
            .collect();
        let threshold = quorum_threshold(workers.len(), options.quorum_ratio)?;

        info!(
            task_id = task.id,
            workers = workers.len(),
            algorithm = %options.algorithm,
            quorum_threshold = threshold,
            "Starting roundtable"
        );

        // ── Dispatched: fan out ──
        phase = phase.advance(RoundPhase::Dispatched(workers.len()));
        let results = self.fan_out(task, &workers, options.timeout).await;

        // ── Collecting ──
        phase = phase.advance(RoundPhase::Collecting);
        let mut responded: HashSet<&str> = HashSet::new();
        let mut votes = Vec::with_capacity(results.len());
        for result in &results {
            if !result.success {
                continue;
            }
            let parsed = parse_reply(&result.output);
            let mut vote = VoteRecord::new(result.worker_id.clone(), parsed.value, parsed.confidence)
                .with_weight(options.weight_for(&result.worker_id));
            vote.rationale = parsed.rationale;
            debug!(
                task_id = task.id,
                worker_id = %vote.worker_id,
                value = %vote.value,
                confidence = vote.confidence,
                "Vote collected"
            );
            responded.insert(result.worker_id.as_str());
            votes.push(vote);
        }
        let failed_workers: Vec<WorkerId> = workers
            .iter()
            .filter(|id| !responded.contains(id.as_str()))
            .cloned()
            .collect();

        // ── Resolving ──
        phase = phase.advance(RoundPhase::Resolving);
        let quorum_met = votes.len() >= threshold;
        let resolution = resolve(&votes, options.algorithm, &options.tie_break);
        let score = consensus_score(&votes, resolution.winner.as_deref());
        let consensus_achieved = quorum_met && resolution.winner.is_some();

        let report = FinalReport {
            task_id: task.id,
            consensus_achieved,
            consensus_score: score,
            winning_value: resolution.winner,
            algorithm: options.algorithm,
            votes,
            tie_break: resolution.tie_break,
            scores: resolution.scores,
            metadata: RoundMetadata {
                elapsed_ms: start.elapsed().as_millis() as u64,
                attempted_workers: workers,
                failed_workers,
                quorum_threshold: threshold,
                quorum_met,
            },
        };

        // ── Reported ──
        phase = phase.advance(RoundPhase::Reported);
        debug_assert!(phase.is_terminal());

        info!(
            task_id = task.id,
            consensus_achieved,
            consensus_score = score,
            votes = report.votes.len(),
            quorum_met,
            winner = ?report.winning_value,
            tie_break = ?report.tie_break,
            "Roundtable reported"
        );

        emit(
            self.dispatcher.audit().as_ref(),
            &DispatchEvent::RoundtableCompleted {
                task_id: report.task_id,
                algorithm: report.algorithm.to_string(),
                consensus_achieved,
                consensus_score: score,
                winning_value: report.winning_value.clone(),
                votes: report.votes.len(),
                attempted: report.metadata.attempted_workers.len(),
                quorum_met,
                tie_break: report.tie_break.map(|t| t.to_string()),
                timestamp: Utc::now(),
            },
        );

        self.ledger().record(report.clone());
        Ok(report)
    }

    /// Call every worker concurrently and join all of them.
    ///
    /// Results come back in the order `workers` were supplied; workers that
    /// could not be called at all are missing.
    async fn fan_out(
        &self,
        task: &TaskRequest,
        workers: &[WorkerId],
        timeout: Duration,
    ) -> Vec<TaskResult> {
        let sem = Arc::new(Semaphore::new(self.pool_size));
        let mut join_set: JoinSet<(usize, Option<TaskResult>)> = JoinSet::new();

        for (index, worker_id) in workers.iter().enumerate() {
            let sem = Arc::clone(&sem);
            let dispatcher = Arc::clone(&self.dispatcher);
            let task = task.clone();
            let worker_id = worker_id.clone();

            join_set.spawn(async move {
                let Ok(_permit) = sem.acquire().await else {
                    return (index, None);
                };
                match dispatcher.execute_on(task, &worker_id, Some(timeout)).await {
                    Ok(result) => (index, Some(result)),
                    Err(e) => {
                        warn!(worker_id = %worker_id, error = %e, "Worker skipped for roundtable");
                        (index, None)
                    }
                }
            });
        }

        let mut collected = Vec::with_capacity(workers.len());
        while let Some(res) = join_set.join_next().await {
            match res {
                Ok((index, Some(result))) => collected.push((index, result)),
                Ok((_, None)) => {}
                Err(e) => {
                    warn!(error = %e, "Roundtable worker task panicked");
                }
            }
        }

        collected.sort_by_key(|(index, _)| *index);
        collected.into_iter().map(|(_, result)| result).collect()
    }

    /// Latest retained report for `task_id`
    pub fn report(&self, task_id: TaskId) -> Option<FinalReport> {
        self.ledger().report(task_id).cloned()
    }

    /// Most recent `n` reports, oldest first
    pub fn recent_reports(&self, n: usize) -> Vec<FinalReport> {
        self.ledger().recent(n)
    }

    pub fn statistics(&self) -> RoundtableStatistics {
        self.ledger().statistics()
    }
}

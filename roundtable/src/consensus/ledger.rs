//! In-memory ledger of final reports

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};

use super::engine::FinalReport;
use crate::types::TaskId;

/// Aggregate counters over every recorded round
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoundtableStatistics {
    pub rounds: u64,
    pub consensus_achieved: u64,
    pub quorum_missed: u64,
    pub no_winner: u64,
    pub total_votes: u64,
    /// Rounds decided by each tie-break rule
    pub tie_breaks: BTreeMap<String, u64>,
    /// Mean consensus score over rounds with a winner
    pub avg_consensus_score: f64,
}

/// Bounded history of final reports plus lifetime statistics
pub struct VoteLedger {
    reports: VecDeque<FinalReport>,
    capacity: usize,
    stats: RoundtableStatistics,
    scored_rounds: u64,
}

impl VoteLedger {
    pub fn new(capacity: usize) -> Self {
        Self {
            reports: VecDeque::with_capacity(capacity.min(256)),
            capacity,
            stats: RoundtableStatistics::default(),
            scored_rounds: 0,
        }
    }

    pub fn record(&mut self, report: FinalReport) {
        let stats = &mut self.stats;
        stats.rounds += 1;
        stats.total_votes += report.votes.len() as u64;
        if report.consensus_achieved {
            stats.consensus_achieved += 1;
        }
        if !report.metadata.quorum_met {
            stats.quorum_missed += 1;
        }
        match &report.winning_value {
            Some(_) => {
                self.scored_rounds += 1;
                let n = self.scored_rounds as f64;
                stats.avg_consensus_score += (report.consensus_score - stats.avg_consensus_score) / n;
            }
            None => stats.no_winner += 1,
        }
        if let Some(rule) = report.tie_break {
            *stats.tie_breaks.entry(rule.to_string()).or_insert(0) += 1;
        }

        if self.capacity == 0 {
            return;
        }
        if self.reports.len() >= self.capacity {
            self.reports.pop_front();
        }
        self.reports.push_back(report);
    }

    /// Latest retained report for `task_id`
    pub fn report(&self, task_id: TaskId) -> Option<&FinalReport> {
        self.reports.iter().rev().find(|r| r.task_id == task_id)
    }

    /// Most recent `n` reports, oldest first
    pub fn recent(&self, n: usize) -> Vec<FinalReport> {
        let skip = self.reports.len().saturating_sub(n);
        self.reports.iter().skip(skip).cloned().collect()
    }

    pub fn statistics(&self) -> RoundtableStatistics {
        self.stats.clone()
    }

    pub fn len(&self) -> usize {
        self.reports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }
}

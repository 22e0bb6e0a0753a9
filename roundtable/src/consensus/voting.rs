//! Vote resolution
//!
//! Every algorithm reduces the collected votes to a score per distinct
//! vote value. The highest score wins; when several values share the top
//! score (within [`TIE_EPSILON`]) the configured [`TieBreakRule`] decides.
//! Resolution is synchronous and independent of vote arrival order.

use std::collections::BTreeMap;
use std::str::FromStr;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ConsensusError, ConsensusResult};
use crate::types::WorkerId;

/// Absolute tolerance under which two scores are an exact tie
pub const TIE_EPSILON: f64 = 1e-9;

/// One worker's vote in a roundtable round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteRecord {
    pub worker_id: WorkerId,
    pub value: String,
    /// Confidence in 0..=1
    pub confidence: f64,
    pub rationale: Option<String>,
    /// Voting weight (> 0, default 1.0)
    pub weight: f64,
}

impl VoteRecord {
    pub fn new(worker_id: impl Into<WorkerId>, value: impl Into<String>, confidence: f64) -> Self {
        Self {
            worker_id: worker_id.into(),
            value: value.into(),
            confidence,
            rationale: None,
            weight: 1.0,
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = Some(rationale.into());
        self
    }
}

/// How votes are tallied
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VotingAlgorithm {
    /// One vote per worker; highest count wins
    #[default]
    Majority,
    /// Sum of confidence × weight per value
    Weighted,
    /// Rank-based points by confidence
    Borda,
}

impl std::fmt::Display for VotingAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Majority => write!(f, "majority"),
            Self::Weighted => write!(f, "weighted"),
            Self::Borda => write!(f, "borda"),
        }
    }
}

impl FromStr for VotingAlgorithm {
    type Err = ConsensusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "majority" => Ok(Self::Majority),
            "weighted" => Ok(Self::Weighted),
            "borda" => Ok(Self::Borda),
            _ => Err(ConsensusError::UnknownVotingAlgorithm(s.to_string())),
        }
    }
}

/// Policy applied only when the top score is an exact tie
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum TieBreakRule {
    /// Highest summed confidence among tied values
    #[default]
    Confidence,
    /// The named worker's choice, if among the tied values
    Chair { worker_id: WorkerId },
    /// Uniform pick from a generator seeded with `seed`.
    ///
    /// The generator is re-seeded for every tie, so a given seed always
    /// picks the same position among the sorted tied values. Repeated
    /// rounds are reproducible, not independently random.
    Random { seed: u64 },
}

impl TieBreakRule {
    /// Build a rule from its configuration name
    pub fn parse(name: &str, chair: Option<&str>, seed: u64) -> ConsensusResult<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "confidence" => Ok(Self::Confidence),
            "random" => Ok(Self::Random { seed }),
            "chair" => match chair {
                Some(worker_id) if !worker_id.trim().is_empty() => Ok(Self::Chair {
                    worker_id: worker_id.to_string(),
                }),
                _ => Err(ConsensusError::UnknownTieBreakRule(
                    "chair (no chair worker configured)".to_string(),
                )),
            },
            _ => Err(ConsensusError::UnknownTieBreakRule(name.to_string())),
        }
    }
}

/// The tie-break rule that actually decided a round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreakUsed {
    Confidence,
    Chair,
    Random,
}

impl std::fmt::Display for TieBreakUsed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Confidence => write!(f, "confidence"),
            Self::Chair => write!(f, "chair"),
            Self::Random => write!(f, "random"),
        }
    }
}

/// Outcome of resolving one set of votes
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub winner: Option<String>,
    /// Populated only when the top score was an exact tie
    pub tie_break: Option<TieBreakUsed>,
    /// Algorithm score per distinct value
    pub scores: BTreeMap<String, f64>,
}

impl Resolution {
    fn empty() -> Self {
        Self {
            winner: None,
            tie_break: None,
            scores: BTreeMap::new(),
        }
    }
}

/// Minimum number of votes for a decisive round: `ceil(ratio × n)`
pub fn quorum_threshold(n: usize, ratio: f64) -> ConsensusResult<usize> {
    if !(ratio > 0.0 && ratio <= 1.0) {
        return Err(ConsensusError::InvalidQuorumRatio(ratio));
    }
    if n == 0 {
        return Ok(0);
    }
    // Guard against 0.7 × 10 = 7.000000000000001 rounding up to 8
    let threshold = (ratio * n as f64 - TIE_EPSILON).ceil() as usize;
    Ok(threshold.clamp(1, n))
}

fn majority_scores(votes: &[VoteRecord]) -> BTreeMap<String, f64> {
    let mut scores = BTreeMap::new();
    for vote in votes {
        *scores.entry(vote.value.clone()).or_insert(0.0) += 1.0;
    }
    scores
}

fn weighted_scores(votes: &[VoteRecord]) -> BTreeMap<String, f64> {
    let mut scores = BTreeMap::new();
    for vote in votes {
        *scores.entry(vote.value.clone()).or_insert(0.0) += vote.confidence * vote.weight;
    }
    scores
}

fn borda_scores(votes: &[VoteRecord]) -> BTreeMap<String, f64> {
    let mut ranked: Vec<&VoteRecord> = votes.iter().collect();
    ranked.sort_by(|a, b| {
        b.confidence
            .total_cmp(&a.confidence)
            .then_with(|| a.worker_id.cmp(&b.worker_id))
    });

    let n = ranked.len();
    let mut scores = BTreeMap::new();
    for (rank, vote) in ranked.into_iter().enumerate() {
        *scores.entry(vote.value.clone()).or_insert(0.0) += (n - 1 - rank) as f64;
    }
    scores
}

fn confidence_totals(votes: &[VoteRecord]) -> BTreeMap<&str, f64> {
    let mut totals = BTreeMap::new();
    for vote in votes {
        *totals.entry(vote.value.as_str()).or_insert(0.0) += vote.confidence;
    }
    totals
}

/// Highest summed confidence; remaining ties go to the smallest value
fn break_by_confidence(votes: &[VoteRecord], tied: &[String]) -> String {
    let totals = confidence_totals(votes);
    let mut best: Option<(&String, f64)> = None;
    // `tied` is sorted, so strict improvement keeps the smallest value on ties
    for value in tied {
        let total = totals.get(value.as_str()).copied().unwrap_or(0.0);
        match best {
            Some((_, best_total)) if total <= best_total + TIE_EPSILON => {}
            _ => best = Some((value, total)),
        }
    }
    best.map(|(v, _)| v.clone()).unwrap_or_default()
}

fn break_tie(votes: &[VoteRecord], tied: &[String], rule: &TieBreakRule) -> (String, TieBreakUsed) {
    match rule {
        TieBreakRule::Confidence => (break_by_confidence(votes, tied), TieBreakUsed::Confidence),
        TieBreakRule::Chair { worker_id } => {
            let chair_value = votes
                .iter()
                .find(|v| &v.worker_id == worker_id)
                .map(|v| &v.value)
                .filter(|value| tied.contains(value));
            match chair_value {
                Some(value) => (value.clone(), TieBreakUsed::Chair),
                None => {
                    debug!(chair = %worker_id, "Chair absent from tie, falling back to confidence");
                    (break_by_confidence(votes, tied), TieBreakUsed::Confidence)
                }
            }
        }
        TieBreakRule::Random { seed } => {
            // Fresh generator per tie; `tied` is sorted
            let mut rng = StdRng::seed_from_u64(*seed);
            let pick = rng.gen_range(0..tied.len());
            (tied[pick].clone(), TieBreakUsed::Random)
        }
    }
}

/// Resolve `votes` with `algorithm`, consulting `rule` on exact top ties
pub fn resolve(
    votes: &[VoteRecord],
    algorithm: VotingAlgorithm,
    rule: &TieBreakRule,
) -> Resolution {
    if votes.is_empty() {
        return Resolution::empty();
    }

    let scores = match algorithm {
        VotingAlgorithm::Majority => majority_scores(votes),
        VotingAlgorithm::Weighted => weighted_scores(votes),
        VotingAlgorithm::Borda => borda_scores(votes),
    };

    let top = scores.values().copied().fold(f64::NEG_INFINITY, f64::max);
    // BTreeMap iteration keeps `tied` sorted
    let tied: Vec<String> = scores
        .iter()
        .filter(|(_, score)| (top - **score).abs() <= TIE_EPSILON)
        .map(|(value, _)| value.clone())
        .collect();

    let (winner, tie_break) = match tied.as_slice() {
        [] => (None, None),
        [only] => (Some(only.clone()), None),
        _ => {
            let (winner, used) = break_tie(votes, &tied, rule);
            debug!(
                algorithm = %algorithm,
                tied = tied.len(),
                rule = %used,
                winner = %winner,
                "Tie broken"
            );
            (Some(winner), Some(used))
        }
    };

    Resolution {
        winner,
        tie_break,
        scores,
    }
}

/// Share of weighted confidence behind `winner`, in 0..=1.
///
/// Falls back to the share of votes when every vote has zero confidence.
pub fn consensus_score(votes: &[VoteRecord], winner: Option<&str>) -> f64 {
    let Some(winner) = winner else {
        return 0.0;
    };
    if votes.is_empty() {
        return 0.0;
    }

    let total: f64 = votes.iter().map(|v| v.confidence * v.weight).sum();
    if total > 0.0 {
        let support: f64 = votes
            .iter()
            .filter(|v| v.value == winner)
            .map(|v| v.confidence * v.weight)
            .sum();
        (support / total).clamp(0.0, 1.0)
    } else {
        let support = votes.iter().filter(|v| v.value == winner).count();
        support as f64 / votes.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vote(worker: &str, value: &str, confidence: f64) -> VoteRecord {
        VoteRecord::new(worker, value, confidence)
    }

    fn sample() -> Vec<VoteRecord> {
        vec![
            vote("w1", "A", 0.8),
            vote("w2", "A", 0.9),
            vote("w3", "B", 0.7),
        ]
    }

    // ── Quorum ──

    #[test]
    fn test_quorum_threshold() {
        assert_eq!(quorum_threshold(3, 0.6).unwrap(), 2);
        assert_eq!(quorum_threshold(5, 0.8).unwrap(), 4);
        assert_eq!(quorum_threshold(10, 0.7).unwrap(), 7);
        assert_eq!(quorum_threshold(4, 1.0).unwrap(), 4);
        assert_eq!(quorum_threshold(1, 0.01).unwrap(), 1);
    }

    #[test]
    fn test_quorum_ratio_validation() {
        for ratio in [0.0, -0.5, 1.01, f64::NAN] {
            assert!(matches!(
                quorum_threshold(3, ratio),
                Err(ConsensusError::InvalidQuorumRatio(_))
            ));
        }
    }

    // ── Algorithms ──

    #[test]
    fn test_majority() {
        let r = resolve(&sample(), VotingAlgorithm::Majority, &TieBreakRule::Confidence);
        assert_eq!(r.winner.as_deref(), Some("A"));
        assert_eq!(r.tie_break, None);
        assert_eq!(r.scores["A"], 2.0);
    }

    #[test]
    fn test_weighted() {
        let votes = vec![
            vote("w1", "A", 0.8),
            vote("w2", "A", 0.9).with_weight(2.0),
            vote("w3", "B", 0.7),
        ];
        let r = resolve(&votes, VotingAlgorithm::Weighted, &TieBreakRule::Confidence);
        assert_eq!(r.winner.as_deref(), Some("A"));
        assert!((r.scores["A"] - 2.6).abs() < 1e-9);
        assert!((r.scores["B"] - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_borda() {
        let r = resolve(&sample(), VotingAlgorithm::Borda, &TieBreakRule::Confidence);
        assert_eq!(r.winner.as_deref(), Some("A"));
        assert_eq!(r.scores["A"], 3.0);
        assert_eq!(r.scores["B"], 0.0);
    }

    #[test]
    fn test_borda_can_differ_from_majority() {
        // B's single very confident vote outranks two lukewarm A votes
        let votes = vec![
            vote("w1", "A", 0.2),
            vote("w2", "A", 0.1),
            vote("w3", "B", 0.95),
            vote("w4", "C", 0.5),
        ];
        let r = resolve(&votes, VotingAlgorithm::Borda, &TieBreakRule::Confidence);
        // B: 3, C: 2, A: 1 + 0
        assert_eq!(r.winner.as_deref(), Some("B"));
    }

    #[test]
    fn test_empty_votes_no_winner() {
        let r = resolve(&[], VotingAlgorithm::Majority, &TieBreakRule::Confidence);
        assert_eq!(r.winner, None);
        assert_eq!(r.tie_break, None);
    }

    #[test]
    fn test_order_independent() {
        let mut votes = sample();
        let forward = resolve(&votes, VotingAlgorithm::Borda, &TieBreakRule::Confidence);
        votes.reverse();
        let backward = resolve(&votes, VotingAlgorithm::Borda, &TieBreakRule::Confidence);
        assert_eq!(forward, backward);
    }

    // ── Tie-break ──

    fn tied() -> Vec<VoteRecord> {
        vec![vote("w1", "A", 0.6), vote("w2", "B", 0.9)]
    }

    #[test]
    fn test_confidence_tie_break() {
        let r = resolve(&tied(), VotingAlgorithm::Majority, &TieBreakRule::Confidence);
        assert_eq!(r.winner.as_deref(), Some("B"));
        assert_eq!(r.tie_break, Some(TieBreakUsed::Confidence));
    }

    #[test]
    fn test_confidence_tie_falls_to_smallest_value() {
        let votes = vec![vote("w1", "B", 0.5), vote("w2", "A", 0.5)];
        let r = resolve(&votes, VotingAlgorithm::Majority, &TieBreakRule::Confidence);
        assert_eq!(r.winner.as_deref(), Some("A"));
    }

    #[test]
    fn test_chair_tie_break() {
        let rule = TieBreakRule::Chair {
            worker_id: "w1".to_string(),
        };
        let r = resolve(&tied(), VotingAlgorithm::Majority, &rule);
        assert_eq!(r.winner.as_deref(), Some("A"));
        assert_eq!(r.tie_break, Some(TieBreakUsed::Chair));
    }

    #[test]
    fn test_chair_absent_falls_back_to_confidence() {
        let rule = TieBreakRule::Chair {
            worker_id: "w9".to_string(),
        };
        let r = resolve(&tied(), VotingAlgorithm::Majority, &rule);
        assert_eq!(r.winner.as_deref(), Some("B"));
        assert_eq!(r.tie_break, Some(TieBreakUsed::Confidence));
    }

    #[test]
    fn test_chair_outside_tie_falls_back_to_confidence() {
        let votes = vec![
            vote("w1", "A", 0.5),
            vote("w2", "A", 0.5),
            vote("w3", "B", 0.6),
            vote("w4", "B", 0.6),
            vote("chair", "C", 0.9),
        ];
        let rule = TieBreakRule::Chair {
            worker_id: "chair".to_string(),
        };
        let r = resolve(&votes, VotingAlgorithm::Majority, &rule);
        assert_eq!(r.winner.as_deref(), Some("B"));
        assert_eq!(r.tie_break, Some(TieBreakUsed::Confidence));
    }

    #[test]
    fn test_random_pick_position_depends_only_on_seed_and_size() {
        let rule = TieBreakRule::Random { seed: 7 };
        let abc = vec![vote("w1", "A", 0.5), vote("w2", "B", 0.5), vote("w3", "C", 0.5)];
        let xyz = vec![vote("w1", "X", 0.5), vote("w2", "Y", 0.5), vote("w3", "Z", 0.5)];

        let position = |votes: &[VoteRecord], values: [&str; 3]| {
            let winner = resolve(votes, VotingAlgorithm::Majority, &rule).winner.unwrap();
            values.iter().position(|v| *v == winner).unwrap()
        };
        assert_eq!(position(&abc, ["A", "B", "C"]), position(&xyz, ["X", "Y", "Z"]));
    }

    #[test]
    fn test_random_tie_break_is_deterministic() {
        let votes = vec![
            vote("w1", "A", 0.5),
            vote("w2", "B", 0.5),
            vote("w3", "C", 0.5),
        ];
        let rule = TieBreakRule::Random { seed: 7 };
        let first = resolve(&votes, VotingAlgorithm::Majority, &rule);
        assert_eq!(first.tie_break, Some(TieBreakUsed::Random));

        for _ in 0..10 {
            let mut shuffled = votes.clone();
            shuffled.rotate_left(1);
            let again = resolve(&shuffled, VotingAlgorithm::Majority, &rule);
            assert_eq!(again.winner, first.winner);
        }
    }

    #[test]
    fn test_no_tie_break_without_tie() {
        let rule = TieBreakRule::Random { seed: 1 };
        let r = resolve(&sample(), VotingAlgorithm::Majority, &rule);
        assert_eq!(r.tie_break, None);
    }

    // ── Parsing ──

    #[test]
    fn test_algorithm_parsing() {
        assert_eq!(
            "Borda".parse::<VotingAlgorithm>().unwrap(),
            VotingAlgorithm::Borda
        );
        assert!(matches!(
            "plurality".parse::<VotingAlgorithm>(),
            Err(ConsensusError::UnknownVotingAlgorithm(name)) if name == "plurality"
        ));
    }

    #[test]
    fn test_tie_break_parsing() {
        assert_eq!(
            TieBreakRule::parse("random", None, 9).unwrap(),
            TieBreakRule::Random { seed: 9 }
        );
        assert_eq!(
            TieBreakRule::parse("chair", Some("w1"), 0).unwrap(),
            TieBreakRule::Chair {
                worker_id: "w1".to_string()
            }
        );
        assert!(TieBreakRule::parse("chair", None, 0).is_err());
        assert!(matches!(
            TieBreakRule::parse("coin", None, 0),
            Err(ConsensusError::UnknownTieBreakRule(_))
        ));
    }

    // ── Consensus score ──

    #[test]
    fn test_consensus_score() {
        let score = consensus_score(&sample(), Some("A"));
        assert!((score - 1.7 / 2.4).abs() < 1e-9);
        assert_eq!(consensus_score(&sample(), None), 0.0);
        assert_eq!(consensus_score(&[], Some("A")), 0.0);
    }

    #[test]
    fn test_consensus_score_zero_confidence_uses_counts() {
        let votes = vec![vote("w1", "A", 0.0), vote("w2", "B", 0.0)];
        assert!((consensus_score(&votes, Some("A")) - 0.5).abs() < 1e-9);
    }
}

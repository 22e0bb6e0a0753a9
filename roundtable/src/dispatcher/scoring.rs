//! Candidate scoring.
//!
//! ```text
//! score = proficiency_w · proficiency
//!       + capability_success_w · capability.success_rate
//!       − min(latency_cap, response_time_secs)
//!       − load_penalty_w · current_load
//!       + lifetime_success_w · lifetime_success_rate
//!       + newcomer_bonus            (if total_tasks < newcomer_threshold)
//! ```
//!
//! The first three terms only apply when the task requires a capability.
//! The result is floored at zero.

use crate::config::ScoringWeights;
use crate::types::{WorkerCapability, WorkerProfile};

/// Absolute tolerance under which two scores are an exact tie.
pub const TIE_EPSILON: f64 = 1e-9;

/// Response time used for the latency penalty.
///
/// The worker's observed rolling average once it has history, otherwise
/// the capability's advertised figure.
fn response_time_secs(profile: &WorkerProfile, capability: &WorkerCapability) -> f64 {
    if profile.total_tasks > 0 {
        profile.avg_response_time
    } else {
        capability.avg_response_time
    }
}

/// Score `profile` for a task requiring `capability` (if any).
pub fn score(profile: &WorkerProfile, capability: Option<&str>, weights: &ScoringWeights) -> f64 {
    let mut score = 0.0;

    if let Some(cap) = capability.and_then(|name| profile.capability(name)) {
        score += weights.proficiency * cap.proficiency;
        score += weights.capability_success * cap.success_rate;
        score -= response_time_secs(profile, cap).min(weights.latency_cap);
    }

    score -= weights.load_penalty * profile.current_load;
    score += weights.lifetime_success * profile.lifetime_success_rate();
    if profile.total_tasks < weights.newcomer_threshold {
        score += weights.newcomer_bonus;
    }

    // f64::max discards NaN
    score.max(0.0)
}

/// Whether `candidate` strictly beats `best` beyond tie tolerance.
pub fn beats(candidate: f64, best: f64) -> bool {
    candidate > best + TIE_EPSILON
}

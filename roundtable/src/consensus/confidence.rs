//! Reply parsing and confidence estimation.
//!
//! A worker reply becomes a vote as follows:
//!
//! - an explicit `[confidence: 0.85]` (or `[confidence: 85%]`) tag anywhere
//!   in the reply is stripped and used as the confidence, clamped to 0..=1
//! - the first non-empty line is the vote value
//! - any remaining text is the rationale
//!
//! Without a tag the confidence is estimated from lexical cues: hedging
//! language pulls it down toward 0.1–0.3, assertive language pushes it up
//! toward 0.7–0.9, and an empty reply floors at 0.1.

use std::sync::LazyLock;

use regex::Regex;

static CONFIDENCE_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\[\s*confidence\s*[:=]\s*([0-9]*\.?[0-9]+)\s*(%?)\s*\]")
        .expect("CONFIDENCE_TAG_RE regex should compile")
});

static HEDGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(maybe|perhaps|might|possibly|unsure|not sure|probably|could be|i think|i guess|uncertain|unclear|not certain)\b",
    )
    .expect("HEDGE_RE regex should compile")
});

static ASSERTIVE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(definitely|certainly|clearly|confident|absolutely|always|must|undoubtedly|without doubt|guaranteed|obviously)\b",
    )
    .expect("ASSERTIVE_RE regex should compile")
});

/// Confidence for an empty reply
pub const EMPTY_CONFIDENCE: f64 = 0.1;
/// Confidence when hedging and assertive cues balance out
pub const NEUTRAL_CONFIDENCE: f64 = 0.5;

const HEDGED_BASE: f64 = 0.3;
const ASSERTIVE_BASE: f64 = 0.7;
const CUE_STEP: f64 = 0.05;
const HEDGED_FLOOR: f64 = 0.1;
const ASSERTIVE_CEILING: f64 = 0.9;

/// Where a vote's confidence came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfidenceSource {
    /// Explicit tag in the reply
    Supplied,
    /// Lexical heuristic
    Estimated,
}

/// A worker reply split into vote fields
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedReply {
    pub value: String,
    pub rationale: Option<String>,
    pub confidence: f64,
    pub source: ConfidenceSource,
}

/// Estimate confidence from hedging and assertive wording
pub fn estimate_confidence(text: &str) -> f64 {
    let text = text.trim();
    if text.is_empty() {
        return EMPTY_CONFIDENCE;
    }

    let hedges = HEDGE_RE.find_iter(text).count();
    let asserts = ASSERTIVE_RE.find_iter(text).count();

    if hedges > asserts {
        let extra = (hedges - asserts - 1) as f64;
        (HEDGED_BASE - CUE_STEP * extra).max(HEDGED_FLOOR)
    } else if asserts > hedges {
        let extra = (asserts - hedges - 1) as f64;
        (ASSERTIVE_BASE + CUE_STEP * extra).min(ASSERTIVE_CEILING)
    } else {
        NEUTRAL_CONFIDENCE
    }
}

/// Extract an explicit confidence tag, if any
fn supplied_confidence(raw: &str) -> Option<f64> {
    let caps = CONFIDENCE_TAG_RE.captures(raw)?;
    let mut value: f64 = caps.get(1)?.as_str().parse().ok()?;
    if caps.get(2).is_some_and(|m| !m.as_str().is_empty()) {
        value /= 100.0;
    }
    Some(value.clamp(0.0, 1.0))
}

/// Split a raw reply into value, rationale and confidence
pub fn parse_reply(raw: &str) -> ParsedReply {
    let supplied = supplied_confidence(raw);
    let stripped = CONFIDENCE_TAG_RE.replace_all(raw, "");

    let mut lines = stripped.lines().map(str::trim);
    let value = lines
        .by_ref()
        .find(|line| !line.is_empty())
        .unwrap_or_default()
        .to_string();
    let rest: Vec<&str> = lines.filter(|line| !line.is_empty()).collect();
    let rationale = (!rest.is_empty()).then(|| rest.join("\n"));

    match supplied {
        Some(confidence) => ParsedReply {
            value,
            rationale,
            confidence,
            source: ConfidenceSource::Supplied,
        },
        None => ParsedReply {
            value,
            rationale,
            confidence: estimate_confidence(&stripped),
            source: ConfidenceSource::Estimated,
        },
    }
}

//! Consensus engine (roundtable)
//!
//! # Architecture
//!
//! 1. **Confidence** (`confidence.rs`): splits a raw worker reply into vote
//!    value, rationale and confidence (explicit tag or lexical estimate).
//!
//! 2. **Voting** (`voting.rs`): majority, weighted and Borda tallies, the
//!    tie-break rules, quorum arithmetic and the consensus score.
//!
//! 3. **Engine** (`engine.rs`): the round itself. Bounded concurrent
//!    fan-out through the dispatcher, a join barrier, resolution, report.
//!
//! 4. **Ledger** (`ledger.rs`) and **Phase** (`phase.rs`): bounded report
//!    history with statistics, and the round state machine.
//!
//! # Usage
//!
//! ```ignore
//! let dispatcher = Dispatcher::new(config.dispatcher.clone()).shared();
//! dispatcher.register(profile, executor)?;
//!
//! let roundtable = Roundtable::new(dispatcher, &config.roundtable);
//! let options = RoundtableOptions::from_config(&config.roundtable)?;
//! let report = roundtable
//!     .execute_roundtable(&TaskRequest::new("Is this safe?"), &workers, &options)
//!     .await?;
//! ```

pub mod confidence;
pub mod engine;
pub mod ledger;
pub mod phase;
pub mod voting;

pub use confidence::{estimate_confidence, parse_reply, ConfidenceSource, ParsedReply};
pub use engine::{FinalReport, RoundMetadata, Roundtable, RoundtableOptions};
pub use ledger::{RoundtableStatistics, VoteLedger};
pub use phase::RoundPhase;
pub use voting::{
    consensus_score, quorum_threshold, resolve, Resolution, TieBreakRule, TieBreakUsed,
    VoteRecord, VotingAlgorithm,
};

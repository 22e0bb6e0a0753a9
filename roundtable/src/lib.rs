//! Roundtable Library
//!
//! Capability-indexed worker dispatch and multi-worker consensus.
//!
//! This library provides:
//! - A capability registry of workers, each bound to an opaque executor
//! - A dispatcher that scores candidates and keeps load accounting balanced
//! - A roundtable engine that asks several workers the same question and
//!   resolves their answers by majority, weighted or Borda voting
//!
//! # Components
//!
//! ## Registry and Dispatch
//! - [`registry::CapabilityRegistry`]: profiles plus the capability index
//! - [`dispatcher::Dispatcher`]: routing, execution, statistics, health
//! - [`executor::WorkerExecutor`]: the `execute(content) -> text` seam
//!
//! ## Consensus
//! - [`consensus::Roundtable`]: bounded fan-out with per-call timeouts
//! - [`consensus::voting`]: algorithms, tie-break rules, quorum
//!
//! ## Seams
//! - [`policy::PolicyGate`]: consulted before routing
//! - [`events::AuditSink`]: fire-and-forget audit trail

#![allow(clippy::uninlined_format_args)]

pub mod config;
pub mod consensus;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod executor;
pub mod policy;
pub mod registry;
pub mod types;

pub use config::{Config, DispatcherConfig, RegistrationMode, RoundtableConfig, ScoringWeights};
pub use consensus::{
    FinalReport, RoundPhase, Roundtable, RoundtableOptions, RoundtableStatistics, TieBreakRule,
    TieBreakUsed, VoteRecord, VotingAlgorithm,
};
pub use dispatcher::{
    DispatchOutcome, Dispatcher, DispatcherStatistics, HealthReport, RouteOutcome,
    SharedDispatcher,
};
pub use error::{
    AuditError, ConfigError, ConsensusError, DispatchError, ExecutionError, RegistrationError,
};
pub use events::{AuditSink, DispatchEvent, EventBus, TracingAuditSink};
pub use executor::{FnExecutor, SharedExecutor, WorkerExecutor};
pub use policy::{ActionContext, PolicyDecision, PolicyGate};
pub use types::{
    Priority, TaskId, TaskRequest, TaskResult, WorkerCapability, WorkerId, WorkerProfile,
    WorkerStatus,
};

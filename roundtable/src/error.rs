//! Error taxonomy
//!
//! Configuration and precondition violations surface as errors to the
//! immediate caller. Recoverable runtime conditions (no candidate, policy
//! denial, worker failure, timeout) are folded into outcome/result values
//! instead and never appear here.

use std::time::Duration;

use thiserror::Error;

use crate::types::{WorkerId, WorkerStatus};

/// Registration failures; the registry is unchanged when one is returned
#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("Worker already registered: {0}")]
    DuplicateWorker(WorkerId),

    #[error("Invalid capability for worker {worker_id}: {reason}")]
    InvalidCapability { worker_id: WorkerId, reason: String },

    #[error("Invalid profile for worker {worker_id}: {reason}")]
    InvalidProfile { worker_id: WorkerId, reason: String },
}

/// Result type for registration
pub type RegistrationResult<T> = Result<T, RegistrationError>;

/// Failures when a specific worker is requested by identity
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Unknown worker: {0}")]
    UnknownWorker(WorkerId),

    #[error("Worker {worker_id} is {status}")]
    WorkerUnavailable {
        worker_id: WorkerId,
        status: WorkerStatus,
    },

    #[error("Worker {worker_id} is at capacity ({max_concurrent} concurrent)")]
    AtCapacity {
        worker_id: WorkerId,
        max_concurrent: u32,
    },
}

/// Result type for dispatch operations
pub type DispatchResult<T> = Result<T, DispatchError>;

/// Failure of an opaque worker call, captured into a failed `TaskResult`
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Worker raised: {0}")]
    Raised(String),

    #[error("Worker timed out after {0:?}")]
    TimedOut(Duration),
}

/// Fatal configuration errors for a roundtable round
#[derive(Debug, Error)]
pub enum ConsensusError {
    #[error("No workers configured for roundtable")]
    NoWorkersAvailable,

    #[error("Unknown voting algorithm: {0}")]
    UnknownVotingAlgorithm(String),

    #[error("Unknown tie-break rule: {0}")]
    UnknownTieBreakRule(String),

    #[error("Quorum ratio must be in (0, 1], got {0}")]
    InvalidQuorumRatio(f64),
}

/// Result type for consensus operations
pub type ConsensusResult<T> = Result<T, ConsensusError>;

/// Audit sink failure; never fails routing or consensus
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Failed to deliver audit event: {0}")]
    DeliveryFailed(String),

    #[error("Audit sink closed")]
    Closed,
}

/// Configuration loading failures
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Result type for configuration
pub type ConfigResult<T> = Result<T, ConfigError>;

//! Capability Registry: worker profiles and the capability index
//!
//! Holds every registered worker together with its bound executor, live
//! load bookkeeping and lifetime counters, plus an inverted index from
//! capability name to the workers advertising it. The registry itself is
//! not synchronized; the dispatcher owns it behind a single lock.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::config::RegistrationMode;
use crate::error::{DispatchError, DispatchResult, RegistrationError, RegistrationResult};
use crate::executor::WorkerExecutor;
use crate::types::{WorkerId, WorkerProfile, WorkerStatus};

/// A registered worker: profile, bound executor and in-flight count
pub struct WorkerEntry {
    pub profile: WorkerProfile,
    executor: Arc<dyn WorkerExecutor>,
    in_flight: u32,
    /// `Busy` was set by a full worker, not by an operator
    busy_from_capacity: bool,
}

impl WorkerEntry {
    /// Tasks currently executing on this worker
    pub fn in_flight(&self) -> u32 {
        self.in_flight
    }

    /// Whether another task may start now
    pub fn has_capacity(&self) -> bool {
        self.in_flight < self.profile.max_concurrent
    }

    /// Available and below its concurrency limit
    pub fn is_dispatchable(&self) -> bool {
        self.profile.status == WorkerStatus::Available && self.has_capacity()
    }

    fn refresh_load(&mut self) {
        self.profile.current_load = self.in_flight as f64 / self.profile.max_concurrent as f64;
    }
}

/// Shutdown generation a reservation was taken in
pub type Epoch = u64;

/// Registry of workers with a capability → worker index
pub struct CapabilityRegistry {
    mode: RegistrationMode,
    /// Bumped by every shutdown; releases from older generations are ignored
    epoch: Epoch,
    workers: HashMap<WorkerId, WorkerEntry>,
    /// Registration order, used for first-seen tie resolution
    order: Vec<WorkerId>,
    index: HashMap<String, Vec<WorkerId>>,
}

impl CapabilityRegistry {
    pub fn new(mode: RegistrationMode) -> Self {
        Self {
            mode,
            epoch: 0,
            workers: HashMap::new(),
            order: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Register a worker and bind its executor.
    ///
    /// Returns `Ok(true)` when added. A duplicate identity is an error in
    /// strict mode and `Ok(false)` in soft mode. Malformed profiles are
    /// rejected in both modes.
    pub fn register(
        &mut self,
        mut profile: WorkerProfile,
        executor: Arc<dyn WorkerExecutor>,
    ) -> RegistrationResult<bool> {
        Self::validate(&profile)?;

        if self.workers.contains_key(&profile.id) {
            return match self.mode {
                RegistrationMode::Strict => Err(RegistrationError::DuplicateWorker(profile.id)),
                RegistrationMode::Soft => {
                    warn!(worker_id = %profile.id, "Duplicate registration ignored");
                    Ok(false)
                }
            };
        }

        profile.total_tasks = 0;
        profile.succeeded_tasks = 0;
        profile.failed_tasks = 0;
        profile.current_load = 0.0;
        profile.last_heartbeat = Utc::now();

        for capability in &profile.capabilities {
            self.index
                .entry(capability.name.clone())
                .or_default()
                .push(profile.id.clone());
        }

        info!(
            worker_id = %profile.id,
            capabilities = profile.capabilities.len(),
            max_concurrent = profile.max_concurrent,
            "Worker registered"
        );

        self.order.push(profile.id.clone());
        self.workers.insert(
            profile.id.clone(),
            WorkerEntry {
                profile,
                executor,
                in_flight: 0,
                busy_from_capacity: false,
            },
        );
        Ok(true)
    }

    fn validate(profile: &WorkerProfile) -> RegistrationResult<()> {
        if profile.id.trim().is_empty() {
            return Err(RegistrationError::InvalidProfile {
                worker_id: profile.id.clone(),
                reason: "empty identity".to_string(),
            });
        }
        if profile.max_concurrent == 0 {
            return Err(RegistrationError::InvalidProfile {
                worker_id: profile.id.clone(),
                reason: "max_concurrent must be at least 1".to_string(),
            });
        }

        let mut seen = BTreeSet::new();
        for capability in &profile.capabilities {
            capability
                .validate()
                .map_err(|reason| RegistrationError::InvalidCapability {
                    worker_id: profile.id.clone(),
                    reason,
                })?;
            if !seen.insert(capability.name.as_str()) {
                return Err(RegistrationError::InvalidCapability {
                    worker_id: profile.id.clone(),
                    reason: format!("capability {} listed twice", capability.name),
                });
            }
        }
        Ok(())
    }

    /// Profile for `worker_id`, if registered
    pub fn get(&self, worker_id: &str) -> Option<&WorkerProfile> {
        self.workers.get(worker_id).map(|e| &e.profile)
    }

    /// Entry for `worker_id`, if registered
    pub fn entry(&self, worker_id: &str) -> Option<&WorkerEntry> {
        self.workers.get(worker_id)
    }

    /// Profiles matching the optional capability and status filters
    pub fn list(
        &self,
        capability: Option<&str>,
        status: Option<WorkerStatus>,
    ) -> Vec<&WorkerProfile> {
        self.workers
            .values()
            .map(|e| &e.profile)
            .filter(|p| capability.map_or(true, |c| p.has_capability(c)))
            .filter(|p| status.map_or(true, |s| p.status == s))
            .collect()
    }

    /// Initial candidate set in registration order.
    ///
    /// With a required capability this is exactly the index entry (empty if
    /// unknown, no fallback); otherwise every available worker.
    pub fn candidates(&self, capability: Option<&str>) -> Vec<&WorkerEntry> {
        match capability {
            Some(name) => self
                .index
                .get(name)
                .map(|ids| ids.iter().filter_map(|id| self.workers.get(id)).collect())
                .unwrap_or_default(),
            None => self
                .order
                .iter()
                .filter_map(|id| self.workers.get(id))
                .filter(|e| e.profile.status == WorkerStatus::Available)
                .collect(),
        }
    }

    /// Workers indexed under `capability`, in registration order
    pub fn indexed(&self, capability: &str) -> &[WorkerId] {
        self.index.get(capability).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Executor bound to `worker_id`
    pub fn executor(&self, worker_id: &str) -> Option<Arc<dyn WorkerExecutor>> {
        self.workers.get(worker_id).map(|e| Arc::clone(&e.executor))
    }

    /// Current shutdown generation
    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    /// Reserve one concurrency slot on `worker_id`.
    ///
    /// Returns the generation to hand back to [`CapabilityRegistry::release`].
    pub fn acquire(&mut self, worker_id: &str) -> DispatchResult<Epoch> {
        let entry = self
            .workers
            .get_mut(worker_id)
            .ok_or_else(|| DispatchError::UnknownWorker(worker_id.to_string()))?;

        if !entry.has_capacity() {
            return Err(DispatchError::AtCapacity {
                worker_id: worker_id.to_string(),
                max_concurrent: entry.profile.max_concurrent,
            });
        }
        if entry.profile.status != WorkerStatus::Available {
            return Err(DispatchError::WorkerUnavailable {
                worker_id: worker_id.to_string(),
                status: entry.profile.status,
            });
        }

        entry.in_flight += 1;
        entry.refresh_load();
        if !entry.has_capacity() {
            entry.profile.status = WorkerStatus::Busy;
            entry.busy_from_capacity = true;
        }
        Ok(self.epoch)
    }

    /// Release one concurrency slot taken in generation `epoch`.
    ///
    /// Slots reserved before the last shutdown were already cleared and are
    /// not released twice.
    pub fn release(&mut self, worker_id: &str, epoch: Epoch) {
        if epoch != self.epoch {
            debug!(worker_id, epoch, current = self.epoch, "Stale release ignored");
            return;
        }
        if let Some(entry) = self.workers.get_mut(worker_id) {
            entry.in_flight = entry.in_flight.saturating_sub(1);
            entry.refresh_load();
            if entry.busy_from_capacity && entry.has_capacity() {
                entry.busy_from_capacity = false;
                if entry.profile.status == WorkerStatus::Busy {
                    entry.profile.status = WorkerStatus::Available;
                }
            }
        }
    }

    /// Update lifetime counters, rolling response time and heartbeat
    pub fn record_completion(&mut self, worker_id: &str, success: bool, elapsed_secs: f64, alpha: f64) {
        let Some(entry) = self.workers.get_mut(worker_id) else {
            return;
        };
        let profile = &mut entry.profile;

        profile.avg_response_time = if profile.total_tasks == 0 {
            elapsed_secs
        } else {
            alpha * elapsed_secs + (1.0 - alpha) * profile.avg_response_time
        };
        profile.total_tasks += 1;
        if success {
            profile.succeeded_tasks += 1;
        } else {
            profile.failed_tasks += 1;
        }
        profile.last_heartbeat = Utc::now();
    }

    /// Refresh the heartbeat of `worker_id`; false if unknown
    pub fn heartbeat(&mut self, worker_id: &str) -> bool {
        match self.workers.get_mut(worker_id) {
            Some(entry) => {
                entry.profile.last_heartbeat = Utc::now();
                true
            }
            None => false,
        }
    }

    /// Set an operator status; false if unknown.
    ///
    /// Setting `Available` on a worker with no free slot yields `Busy`,
    /// which clears itself once a slot frees. Any other status sticks until
    /// the operator changes it.
    pub fn set_status(&mut self, worker_id: &str, status: WorkerStatus) -> bool {
        match self.workers.get_mut(worker_id) {
            Some(entry) => {
                let full = status == WorkerStatus::Available && !entry.has_capacity();
                entry.profile.status = if full { WorkerStatus::Busy } else { status };
                entry.busy_from_capacity = full;
                true
            }
            None => false,
        }
    }

    /// Shutdown: every worker goes offline and in-flight bookkeeping is
    /// cleared. Reservations still held are orphaned by the new generation.
    pub fn mark_offline_all(&mut self) {
        self.epoch += 1;
        for entry in self.workers.values_mut() {
            entry.profile.status = WorkerStatus::Offline;
            entry.in_flight = 0;
            entry.busy_from_capacity = false;
            entry.refresh_load();
        }
        info!(
            workers = self.workers.len(),
            epoch = self.epoch,
            "All workers marked offline"
        );
    }

    /// Current load per worker
    pub fn utilization(&self) -> BTreeMap<WorkerId, f64> {
        self.workers
            .iter()
            .map(|(id, e)| (id.clone(), e.profile.current_load))
            .collect()
    }

    /// Capability names offered by at least one available worker
    pub fn available_capabilities(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .index
            .iter()
            .filter(|(_, ids)| {
                ids.iter().any(|id| {
                    self.workers
                        .get(id)
                        .is_some_and(|e| e.profile.status == WorkerStatus::Available)
                })
            })
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Profiles in registration order
    pub fn profiles(&self) -> impl Iterator<Item = &WorkerProfile> {
        self.order
            .iter()
            .filter_map(|id| self.workers.get(id))
            .map(|e| &e.profile)
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::new(RegistrationMode::Strict)
    }
}

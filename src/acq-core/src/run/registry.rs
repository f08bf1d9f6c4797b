// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Process-lifetime history of acquisition runs.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{AcquisitionError, AcquisitionResult};

use super::AcquisitionRun;

/// Upper bound on run identifier length.
pub const MAX_RUN_ID_LEN: usize = 40;

#[derive(Debug, Default)]
struct RegistryInner {
    order: Vec<String>,
    runs: HashMap<String, AcquisitionRun>,
    allocated: HashSet<String>,
}

/// Append-only store of run records, in creation order.
#[derive(Debug)]
pub struct RunRegistry {
    device_id: String,
    counter: AtomicU64,
    inner: RwLock<RegistryInner>,
}

impl RunRegistry {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            counter: AtomicU64::new(0),
            inner: RwLock::new(RegistryInner::default()),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Produce a fresh run id.
    ///
    /// The id is the hex SHA-256 prefix of the device identity, a nanosecond
    /// timestamp, a per-registry counter and a random UUID, which keeps ids
    /// from different devices apart. Ids are reserved on allocation and
    /// never handed out twice by the same registry.
    pub fn allocate_run_id(&self) -> String {
        loop {
            let seq = self.counter.fetch_add(1, Ordering::Relaxed);
            let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();

            let mut hasher = Sha256::new();
            hasher.update(self.device_id.as_bytes());
            hasher.update(nanos.to_le_bytes());
            hasher.update(seq.to_le_bytes());
            hasher.update(Uuid::new_v4().as_bytes());
            let mut run_id = hex::encode(hasher.finalize());
            run_id.truncate(MAX_RUN_ID_LEN);

            if self.write().allocated.insert(run_id.clone()) {
                return run_id;
            }
        }
    }

    /// Insert or update a run record. Frozen records reject updates.
    pub fn record(&self, run: AcquisitionRun) -> AcquisitionResult<()> {
        validate_run_id(&run.run_id)?;

        let mut inner = self.write();
        match inner.runs.get(&run.run_id) {
            Some(existing) if existing.is_frozen() => {
                return Err(AcquisitionError::precondition(format!(
                    "run {} has ended and can no longer be modified",
                    run.run_id
                )));
            }
            Some(_) => {}
            None => {
                inner.allocated.insert(run.run_id.clone());
                inner.order.push(run.run_id.clone());
            }
        }
        inner.runs.insert(run.run_id.clone(), run);
        Ok(())
    }

    pub fn get(&self, run_id: &str) -> AcquisitionResult<AcquisitionRun> {
        self.read()
            .runs
            .get(run_id)
            .cloned()
            .ok_or_else(|| AcquisitionError::not_found(format!("unknown run id '{}'", run_id)))
    }

    /// All known run ids in creation order.
    pub fn list(&self) -> Vec<String> {
        self.read().order.clone()
    }

    /// The most recently started run.
    pub fn current(&self) -> AcquisitionResult<AcquisitionRun> {
        let inner = self.read();
        inner
            .order
            .last()
            .and_then(|id| inner.runs.get(id))
            .cloned()
            .ok_or_else(|| {
                AcquisitionError::precondition("no acquisition run has been started yet")
            })
    }

    pub fn len(&self) -> usize {
        self.read().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn validate_run_id(run_id: &str) -> AcquisitionResult<()> {
    if run_id.is_empty() {
        return Err(AcquisitionError::validation("run id must not be empty"));
    }
    if run_id.len() > MAX_RUN_ID_LEN || !run_id.is_ascii() {
        return Err(AcquisitionError::validation(format!(
            "run id '{}' must be ASCII and at most {} characters",
            run_id, MAX_RUN_ID_LEN
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::ConfigSummary;
    use crate::run::StopReason;

    fn new_run(registry: &RunRegistry) -> AcquisitionRun {
        AcquisitionRun::new(
            registry.allocate_run_id(),
            ConfigSummary::default(),
            Utc::now(),
        )
    }

    #[test]
    fn test_allocated_ids_are_short_ascii_and_unique() {
        let registry = RunRegistry::new("MN12345");
        let mut seen = HashSet::new();
        for _ in 0..1000 {
            let id = registry.allocate_run_id();
            assert!(id.len() <= MAX_RUN_ID_LEN);
            assert!(id.is_ascii());
            assert!(seen.insert(id));
        }
    }

    #[test]
    fn test_ids_differ_across_devices() {
        let a = RunRegistry::new("MN00001");
        let b = RunRegistry::new("MN00002");
        assert_ne!(a.allocate_run_id(), b.allocate_run_id());
    }

    #[test]
    fn test_current_before_any_run_is_precondition() {
        let registry = RunRegistry::new("dev");
        assert!(matches!(
            registry.current(),
            Err(AcquisitionError::Precondition(_))
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_record_get_list_current() {
        let registry = RunRegistry::new("dev");
        let first = new_run(&registry);
        let second = new_run(&registry);
        registry.record(first.clone()).unwrap();
        registry.record(second.clone()).unwrap();

        assert_eq!(registry.list(), vec![first.run_id.clone(), second.run_id.clone()]);
        assert_eq!(registry.get(&first.run_id).unwrap(), first);
        assert_eq!(registry.current().unwrap().run_id, second.run_id);
    }

    #[test]
    fn test_get_unknown_is_not_found() {
        let registry = RunRegistry::new("dev");
        assert!(matches!(
            registry.get("nope"),
            Err(AcquisitionError::NotFound(_))
        ));
    }

    #[test]
    fn test_update_keeps_position() {
        let registry = RunRegistry::new("dev");
        let mut run = new_run(&registry);
        registry.record(run.clone()).unwrap();
        run.mark_running(Utc::now());
        registry.record(run.clone()).unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(&run.run_id).unwrap(), run);
    }

    #[test]
    fn test_frozen_run_rejects_updates() {
        let registry = RunRegistry::new("dev");
        let mut run = new_run(&registry);
        run.complete(StopReason::StoppedByUser, Utc::now());
        registry.record(run.clone()).unwrap();

        run.stop_reason = StopReason::StoppedDeviceError;
        assert!(matches!(
            registry.record(run.clone()),
            Err(AcquisitionError::Precondition(_))
        ));
        assert_eq!(
            registry.get(&run.run_id).unwrap().stop_reason,
            StopReason::StoppedByUser
        );
    }

    #[test]
    fn test_record_rejects_bad_ids() {
        let registry = RunRegistry::new("dev");
        let mut run = new_run(&registry);
        run.run_id = "x".repeat(MAX_RUN_ID_LEN + 1);
        assert!(matches!(
            registry.record(run),
            Err(AcquisitionError::Validation(_))
        ));
    }
}

// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Acquisition event notification system.
//!
//! Typed callbacks for device status, run state and drain phase changes,
//! invoked synchronously from the acquisition task.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{info, warn};

use crate::run::{FinishingState, RunState, StopReason};

use super::machine::{DeviceStatus, StatusReport};

/// Unique identifier for a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Trait for components that want to receive acquisition events.
///
/// All methods have default no-op implementations. Callbacks run on the
/// acquisition task and must not block.
pub trait AcquisitionListener: Send + Sync {
    /// Called when the device-wide status changes.
    fn on_status_change(&self, _old: &StatusReport, _new: &StatusReport) {}

    /// Called when a run changes state. `old` is `None` for a new run.
    fn on_run_state_change(&self, _run_id: &str, _old: Option<RunState>, _new: RunState) {}

    /// Called when a finishing run enters a new drain phase.
    fn on_finishing_phase(&self, _run_id: &str, _phase: FinishingState) {}

    /// Called when a stop is initiated for a run.
    fn on_stop(&self, _run_id: &str, _reason: StopReason) {}
}

/// Manages registered listeners and dispatches events.
pub struct AcquisitionEventEmitter {
    listeners: Vec<(ListenerId, Arc<dyn AcquisitionListener>)>,
}

impl Default for AcquisitionEventEmitter {
    fn default() -> Self {
        Self::new()
    }
}

impl AcquisitionEventEmitter {
    pub fn new() -> Self {
        Self {
            listeners: Vec::new(),
        }
    }

    /// Register a listener to receive events.
    /// Returns an ID that can be used to unregister the listener.
    pub fn register(&mut self, listener: Arc<dyn AcquisitionListener>) -> ListenerId {
        let id = ListenerId::new();
        self.listeners.push((id, listener));
        id
    }

    pub fn unregister(&mut self, id: ListenerId) {
        self.listeners.retain(|(lid, _)| *lid != id);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn notify_status_change(&self, old: &StatusReport, new: &StatusReport) {
        for (_, listener) in &self.listeners {
            listener.on_status_change(old, new);
        }
    }

    pub fn notify_run_state_change(&self, run_id: &str, old: Option<RunState>, new: RunState) {
        for (_, listener) in &self.listeners {
            listener.on_run_state_change(run_id, old, new);
        }
    }

    pub fn notify_finishing_phase(&self, run_id: &str, phase: FinishingState) {
        for (_, listener) in &self.listeners {
            listener.on_finishing_phase(run_id, phase);
        }
    }

    pub fn notify_stop(&self, run_id: &str, reason: StopReason) {
        for (_, listener) in &self.listeners {
            listener.on_stop(run_id, reason);
        }
    }
}

/// Logs every acquisition event through `tracing`.
#[derive(Debug, Default)]
pub struct TracingListener;

impl AcquisitionListener for TracingListener {
    fn on_status_change(&self, old: &StatusReport, new: &StatusReport) {
        match (&new.status, &new.fault) {
            (DeviceStatus::Error, Some(fault)) if !fault.recoverable => {
                warn!(
                    "Device status {} -> {} (needs intervention: {})",
                    old.status, new.status, fault.message
                );
            }
            (DeviceStatus::Error, Some(fault)) => {
                warn!(
                    "Device status {} -> {} ({})",
                    old.status, new.status, fault.message
                );
            }
            _ => info!("Device status {} -> {}", old.status, new.status),
        }
    }

    fn on_run_state_change(&self, run_id: &str, old: Option<RunState>, new: RunState) {
        match old {
            Some(old) => info!("Run {}: {} -> {}", run_id, old, new),
            None => info!("Run {} created ({})", run_id, new),
        }
    }

    fn on_finishing_phase(&self, run_id: &str, phase: FinishingState) {
        info!("Run {}: finishing phase {}", run_id, phase);
    }

    fn on_stop(&self, run_id: &str, reason: StopReason) {
        info!("Run {}: stop requested ({:?})", run_id, reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingListener {
        events: Mutex<Vec<String>>,
    }

    impl AcquisitionListener for RecordingListener {
        fn on_status_change(&self, old: &StatusReport, new: &StatusReport) {
            self.events
                .lock()
                .unwrap()
                .push(format!("status {}->{}", old.status, new.status));
        }

        fn on_finishing_phase(&self, run_id: &str, phase: FinishingState) {
            self.events
                .lock()
                .unwrap()
                .push(format!("{} {}", run_id, phase));
        }
    }

    #[test]
    fn test_register_and_unregister() {
        let mut emitter = AcquisitionEventEmitter::new();
        let id = emitter.register(Arc::new(RecordingListener::default()));
        emitter.register(Arc::new(TracingListener));
        assert_eq!(emitter.listener_count(), 2);
        emitter.unregister(id);
        assert_eq!(emitter.listener_count(), 1);
    }

    #[test]
    fn test_dispatch_reaches_listener() {
        let mut emitter = AcquisitionEventEmitter::new();
        let listener = Arc::new(RecordingListener::default());
        emitter.register(listener.clone());

        let starting = StatusReport {
            status: DeviceStatus::Starting,
            fault: None,
        };
        emitter.notify_status_change(&StatusReport::ready(), &starting);
        emitter.notify_finishing_phase("run1", FinishingState::SavingData);
        // No-op defaults
        emitter.notify_stop("run1", StopReason::StoppedByUser);

        let events = listener.events.lock().unwrap();
        assert_eq!(
            *events,
            vec![
                "status READY->STARTING".to_string(),
                "run1 SAVING_DATA".to_string()
            ]
        );
    }
}

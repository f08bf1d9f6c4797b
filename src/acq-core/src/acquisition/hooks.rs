// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Entry points for collaborators reporting back into the acquisition task.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use crate::broadcast::StatusBroadcaster;
use crate::error::AcquisitionError;
use crate::run::progress::ProgressTracker;
use crate::run::{AcquisitionRun, FinishingState, RunState, StopReason};

/// Asynchronous conditions that stop the active run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopTrigger {
    /// Output storage is exhausted.
    DiskFull,
    /// The device or its ASIC went away.
    DeviceDisconnected,
    /// The driving protocol finished.
    ProtocolEnded,
    /// Another run is being started in place of this one. Sent by an
    /// external orchestrator that owns run scheduling; the built-in
    /// backends never raise it.
    Preempted,
}

impl StopTrigger {
    pub fn stop_reason(self) -> StopReason {
        match self {
            Self::DiskFull => StopReason::StoppedNoDiskSpace,
            Self::DeviceDisconnected => StopReason::StoppedDeviceError,
            Self::ProtocolEnded => StopReason::StoppedByProtocol,
            Self::Preempted => StopReason::StoppedStartingAnotherRun,
        }
    }
}

/// Internal events delivered to the acquisition task.
#[derive(Debug)]
pub(crate) enum PipelineEvent {
    SetupComplete { run_id: String },
    SetupFailed { run_id: String, error: AcquisitionError },
    PhaseComplete { run_id: String, phase: FinishingState },
    Trigger(StopTrigger),
    Fault(String),
    DeviceRecovered,
    RecoveryFinished(Result<(), String>),
}

/// Handle given to the device and pipeline collaborators.
///
/// Cheap to clone. All reporting methods are fire-and-forget and safe to
/// call from synchronous code.
#[derive(Clone)]
pub struct PipelineHooks {
    events: mpsc::UnboundedSender<PipelineEvent>,
    progress: Arc<ProgressTracker>,
    run_info: StatusBroadcaster<AcquisitionRun>,
}

impl PipelineHooks {
    pub(crate) fn new(
        events: mpsc::UnboundedSender<PipelineEvent>,
        progress: Arc<ProgressTracker>,
        run_info: StatusBroadcaster<AcquisitionRun>,
    ) -> Self {
        Self {
            events,
            progress,
            run_info,
        }
    }

    /// Counters the pipeline feeds while a run is processing.
    pub fn progress(&self) -> &ProgressTracker {
        &self.progress
    }

    /// Id of the run currently owning the device, if any.
    pub fn current_run_id(&self) -> Option<String> {
        let run = self.run_info.current();
        run.is_active().then_some(run.run_id)
    }

    /// State of the latest run, `None` before the first run.
    pub fn current_run_state(&self) -> Option<RunState> {
        let run = self.run_info.current();
        (!run.is_placeholder()).then_some(run.state)
    }

    /// Current drain phase of the active run.
    pub fn current_finishing_state(&self) -> Option<FinishingState> {
        let run = self.run_info.current();
        (run.state == RunState::Finishing).then_some(run.finishing_state)
    }

    /// Report that a drain phase of `run_id` has completed. Phases may be
    /// reported out of order; they are applied in order.
    pub fn phase_complete(&self, run_id: &str, phase: FinishingState) {
        self.send(PipelineEvent::PhaseComplete {
            run_id: run_id.to_string(),
            phase,
        });
    }

    pub fn report_trigger(&self, trigger: StopTrigger) {
        self.send(PipelineEvent::Trigger(trigger));
    }

    /// Report an unrecoverable internal fault.
    pub fn report_fault(&self, message: impl Into<String>) {
        self.send(PipelineEvent::Fault(message.into()));
    }

    /// The device is usable again after an error.
    pub fn device_recovered(&self) {
        self.send(PipelineEvent::DeviceRecovered);
    }

    pub(crate) fn send(&self, event: PipelineEvent) {
        if let Err(e) = self.events.send(event) {
            debug!("Acquisition task gone, dropping {:?}", e.0);
        }
    }
}

// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Client-facing handle to the acquisition task.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::error;

use crate::acquisition::hooks::PipelineHooks;
use crate::acquisition::machine::StatusReport;
use crate::acquisition::request::{AcquisitionCommand, AcquisitionRequest, CommandOutcome};
use crate::acquisition::task::{
    run_acquisition_task, AcquisitionShared, AcquisitionStateMachine, AcquisitionTaskConfig,
};
use crate::broadcast::Subscription;
use crate::error::{AcquisitionError, AcquisitionResult};
use crate::options::{SignalReaderConfig, StartOptions, StopOptions};
use crate::run::progress::RawProgress;
use crate::run::AcquisitionRun;

/// Cheap-to-clone handle used by every client surface.
///
/// Mutating calls go through the acquisition task. Reads are served from
/// shared state and never queue behind a slow start or stop.
#[derive(Clone)]
pub struct AcquisitionController {
    tx: mpsc::Sender<AcquisitionRequest>,
    shared: Arc<AcquisitionShared>,
    hooks: PipelineHooks,
}

impl AcquisitionController {
    /// Spawn the acquisition task. It runs until every controller clone has
    /// been dropped.
    pub fn spawn(config: AcquisitionTaskConfig) -> (Self, JoinHandle<()>) {
        let shared = Arc::new(AcquisitionShared::new(
            &config.device.info().device_id,
            config.subscriber_queue_depth,
        ));
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let hooks = PipelineHooks::new(
            events_tx,
            Arc::clone(&shared.progress),
            shared.run_info.clone(),
        );
        let (tx, rx) = mpsc::channel(config.request_channel_buffer.max(1));

        let machine = AcquisitionStateMachine::new(config, Arc::clone(&shared), hooks.clone());
        let handle = tokio::spawn(run_acquisition_task(machine, rx, events_rx));

        (Self { tx, shared, hooks }, handle)
    }

    async fn request(&self, cmd: AcquisitionCommand) -> AcquisitionResult<CommandOutcome> {
        let name = cmd.name();
        let (resp_tx, resp_rx) = oneshot::channel();
        let req = AcquisitionRequest {
            cmd,
            respond_to: resp_tx,
        };

        if let Err(e) = self.tx.send(req).await {
            error!("Failed to send {} to acquisition task: {:?}", name, e.0.cmd);
            return Err(AcquisitionError::internal(
                "acquisition task not available",
            ));
        }

        match resp_rx.await {
            Ok(result) => result,
            Err(e) => {
                error!("Acquisition response oneshot recv error: {:?}", e);
                Err(AcquisitionError::internal(format!(
                    "acquisition task dropped the {} request",
                    name
                )))
            }
        }
    }

    /// Start a new run and return its id.
    pub async fn start(&self, options: StartOptions) -> AcquisitionResult<String> {
        match self.request(AcquisitionCommand::Start(options)).await? {
            CommandOutcome::Started { run_id } => Ok(run_id),
            other => Err(unexpected("start", other)),
        }
    }

    /// Stop the active run.
    pub async fn stop(&self, options: StopOptions) -> AcquisitionResult<()> {
        match self.request(AcquisitionCommand::Stop(options)).await? {
            CommandOutcome::Stopped => Ok(()),
            other => Err(unexpected("stop", other)),
        }
    }

    pub async fn set_signal_reader(
        &self,
        config: SignalReaderConfig,
    ) -> AcquisitionResult<SignalReaderConfig> {
        match self
            .request(AcquisitionCommand::SetSignalReader(config))
            .await?
        {
            CommandOutcome::SignalReader(config) => Ok(config),
            other => Err(unexpected("set_signal_reader", other)),
        }
    }

    pub async fn signal_reader(&self) -> AcquisitionResult<SignalReaderConfig> {
        match self.request(AcquisitionCommand::GetSignalReader).await? {
            CommandOutcome::SignalReader(config) => Ok(config),
            other => Err(unexpected("get_signal_reader", other)),
        }
    }

    pub fn current_status(&self) -> StatusReport {
        self.shared.status.current()
    }

    /// Raw sample counters of the current (or last) run.
    pub fn get_progress(&self) -> RawProgress {
        self.shared.progress.snapshot()
    }

    /// Look up a run by id, or the most recent run when `run_id` is `None`.
    /// Active runs carry a live yield summary.
    pub fn get_acquisition_info(&self, run_id: Option<&str>) -> AcquisitionResult<AcquisitionRun> {
        let mut run = match run_id {
            Some(id) => self.shared.registry.get(id)?,
            None => self.shared.registry.current()?,
        };
        if run.is_active() {
            run.yield_summary = self.shared.progress.yield_summary();
        }
        Ok(run)
    }

    /// All run ids in creation order.
    pub fn list_acquisition_runs(&self) -> Vec<String> {
        self.shared.registry.list()
    }

    pub fn get_current_acquisition_run(&self) -> AcquisitionResult<AcquisitionRun> {
        self.get_acquisition_info(None)
    }

    /// Subscribe to device status. The current status is delivered first.
    pub fn watch_for_status_change(&self) -> Subscription<StatusReport> {
        self.shared.status.subscribe()
    }

    /// Subscribe to the current run. Before any run exists the first item is
    /// a placeholder with an empty id.
    pub fn watch_current_acquisition_run(&self) -> Subscription<AcquisitionRun> {
        self.shared.run_info.subscribe()
    }

    /// Number of live status watchers.
    pub fn status_subscriber_count(&self) -> usize {
        self.shared.status.subscriber_count()
    }

    /// Hooks for collaborators that were not handed them through setup.
    pub fn hooks(&self) -> PipelineHooks {
        self.hooks.clone()
    }
}

fn unexpected(cmd: &str, outcome: CommandOutcome) -> AcquisitionError {
    AcquisitionError::internal(format!("unexpected {} outcome: {:?}", cmd, outcome))
}

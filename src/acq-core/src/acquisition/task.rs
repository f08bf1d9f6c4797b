// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! The acquisition task: sole owner and writer of device status and the
//! active run.
//!
//! Requests from controllers and events from collaborators are handled one
//! at a time on a single task. Nothing in here awaits; readiness waits,
//! pipeline setup and device recovery run as spawned tasks that report back
//! through the event channel, so a stop is never stuck behind a start.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, error, info, warn};

use crate::broadcast::{StatusBroadcaster, DEFAULT_QUEUE_DEPTH};
use crate::device::{AcquisitionDevice, AcquisitionPipeline};
use crate::error::{AcquisitionError, AcquisitionResult};
use crate::options::{ConfigSummary, DataAction, SignalReaderConfig, StartOptions, StopOptions};
use crate::run::progress::ProgressTracker;
use crate::run::registry::RunRegistry;
use crate::run::{AcquisitionRun, FinishingState, RunState, StopReason};

use super::events::{AcquisitionEventEmitter, AcquisitionListener, TracingListener};
use super::handlers::{command_handler, CommandContext};
use super::hooks::{PipelineEvent, PipelineHooks, StopTrigger};
use super::machine::{AcquisitionEvent, DeviceStateMachine, DeviceStatus, StatusFault, StatusReport};
use super::policies::resolve_config;
use super::request::{AcquisitionCommand, AcquisitionRequest, CommandOutcome};

pub const DEFAULT_READINESS_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_RECOVERY_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_REQUEST_CHANNEL_BUFFER: usize = 32;

/// Configuration for the acquisition task.
pub struct AcquisitionTaskConfig {
    pub device: Arc<dyn AcquisitionDevice>,
    pub pipeline: Arc<dyn AcquisitionPipeline>,
    /// Upper bound on waiting for device readiness during start.
    pub readiness_timeout: Duration,
    /// Upper bound on one automatic device reset.
    pub recovery_timeout: Duration,
    /// What `DataAction::Default` means for stops and stop triggers.
    pub default_stop_action: DataAction,
    pub subscriber_queue_depth: usize,
    pub request_channel_buffer: usize,
    pub listeners: Vec<Arc<dyn AcquisitionListener>>,
}

impl AcquisitionTaskConfig {
    pub fn new(device: Arc<dyn AcquisitionDevice>, pipeline: Arc<dyn AcquisitionPipeline>) -> Self {
        Self {
            device,
            pipeline,
            readiness_timeout: DEFAULT_READINESS_TIMEOUT,
            recovery_timeout: DEFAULT_RECOVERY_TIMEOUT,
            default_stop_action: DataAction::KeepAllData,
            subscriber_queue_depth: DEFAULT_QUEUE_DEPTH,
            request_channel_buffer: DEFAULT_REQUEST_CHANNEL_BUFFER,
            listeners: vec![Arc::new(TracingListener)],
        }
    }
}

/// State read directly by controllers without going through the task.
pub(crate) struct AcquisitionShared {
    pub(crate) registry: RunRegistry,
    pub(crate) progress: Arc<ProgressTracker>,
    pub(crate) status: StatusBroadcaster<StatusReport>,
    pub(crate) run_info: StatusBroadcaster<AcquisitionRun>,
}

impl AcquisitionShared {
    pub(crate) fn new(device_id: &str, queue_depth: usize) -> Self {
        Self {
            registry: RunRegistry::new(device_id),
            progress: Arc::new(ProgressTracker::new()),
            status: StatusBroadcaster::new(StatusReport::ready(), queue_depth),
            run_info: StatusBroadcaster::new(AcquisitionRun::placeholder(), queue_depth),
        }
    }
}

type Responder = oneshot::Sender<AcquisitionResult<CommandOutcome>>;

/// The run currently owning the device.
struct ActiveRun {
    run: AcquisitionRun,
    drain_action: DataAction,
    completed_phases: HashSet<FinishingState>,
    setup_task: Option<JoinHandle<()>>,
}

/// A start caller waiting for PROCESSING.
struct PendingStart {
    run_id: String,
    respond_to: Responder,
}

/// Context owned by the acquisition task.
pub struct AcquisitionStateMachine {
    device: Arc<dyn AcquisitionDevice>,
    pipeline: Arc<dyn AcquisitionPipeline>,
    status_machine: DeviceStateMachine,
    active: Option<ActiveRun>,
    signal_reader: SignalReaderConfig,
    emitter: AcquisitionEventEmitter,
    shared: Arc<AcquisitionShared>,
    hooks: PipelineHooks,
    readiness_timeout: Duration,
    recovery_timeout: Duration,
    default_stop_action: DataAction,
    pending_start: Option<PendingStart>,
    ready_waiters: Vec<Responder>,
    recovery_in_flight: bool,
}

/// Command context implementation for validation.
struct TaskCommandContext<'a> {
    machine: &'a AcquisitionStateMachine,
}

impl CommandContext for TaskCommandContext<'_> {
    fn status(&self) -> &StatusReport {
        self.machine.status_machine.report()
    }

    fn active_run(&self) -> Option<&AcquisitionRun> {
        self.machine.active.as_ref().map(|active| &active.run)
    }

    fn device_ready(&self) -> bool {
        self.machine.device.is_ready()
    }

    fn signal_reader(&self) -> &SignalReaderConfig {
        &self.machine.signal_reader
    }
}

impl AcquisitionStateMachine {
    pub(crate) fn new(
        config: AcquisitionTaskConfig,
        shared: Arc<AcquisitionShared>,
        hooks: PipelineHooks,
    ) -> Self {
        let mut emitter = AcquisitionEventEmitter::new();
        for listener in config.listeners {
            emitter.register(listener);
        }
        Self {
            device: config.device,
            pipeline: config.pipeline,
            status_machine: DeviceStateMachine::new(),
            active: None,
            signal_reader: SignalReaderConfig::device(),
            emitter,
            shared,
            hooks,
            readiness_timeout: config.readiness_timeout,
            recovery_timeout: config.recovery_timeout,
            default_stop_action: config.default_stop_action,
            pending_start: None,
            ready_waiters: Vec::new(),
            recovery_in_flight: false,
        }
    }

    fn handle_command(&mut self, cmd: AcquisitionCommand, respond_to: Responder) {
        let handler = command_handler(&cmd);
        let verdict = handler.can_execute(&TaskCommandContext { machine: self });
        if let Err(err) = verdict.into_result() {
            warn!("{} rejected: {}", handler.name(), err);
            let _ = respond_to.send(Err(err));
            return;
        }

        match cmd {
            AcquisitionCommand::Start(options) => self.start(options, respond_to),
            AcquisitionCommand::Stop(options) => self.stop(options, respond_to),
            AcquisitionCommand::SetSignalReader(config) => {
                info!("Signal reader set to {:?}", config.reader);
                self.signal_reader = config;
                let _ = respond_to.send(Ok(CommandOutcome::SignalReader(config)));
            }
            AcquisitionCommand::GetSignalReader => {
                let _ = respond_to.send(Ok(CommandOutcome::SignalReader(self.signal_reader)));
            }
        }
    }

    fn handle_event(&mut self, event: PipelineEvent) {
        match event {
            PipelineEvent::SetupComplete { run_id } => self.on_setup_complete(&run_id),
            PipelineEvent::SetupFailed { run_id, error } => self.on_setup_failed(&run_id, error),
            PipelineEvent::PhaseComplete { run_id, phase } => self.on_phase_complete(&run_id, phase),
            PipelineEvent::Trigger(trigger) => self.on_trigger(trigger),
            PipelineEvent::Fault(message) => {
                error!("Internal acquisition fault: {}", message);
                self.enter_error(StatusFault::transient(message));
            }
            PipelineEvent::DeviceRecovered => self.on_device_recovered(),
            PipelineEvent::RecoveryFinished(result) => self.on_recovery_finished(result),
        }
    }

    fn start(&mut self, options: StartOptions, respond_to: Responder) {
        let config = match resolve_config(&options, &self.signal_reader) {
            Ok(config) => config,
            Err(err) => {
                let _ = respond_to.send(Err(err));
                return;
            }
        };

        let run_id = self.shared.registry.allocate_run_id();
        self.shared.progress.reset();
        let run = AcquisitionRun::new(run_id.clone(), config.clone(), Utc::now());

        self.transition(AcquisitionEvent::StartRequested);
        let setup_task = self.spawn_setup(run_id.clone(), config);
        self.active = Some(ActiveRun {
            run,
            drain_action: self.default_stop_action,
            completed_phases: HashSet::new(),
            setup_task: Some(setup_task),
        });
        self.publish_active(None);

        if options.wait_until_processing {
            self.pending_start = Some(PendingStart { run_id, respond_to });
        } else {
            let _ = respond_to.send(Ok(CommandOutcome::Started { run_id }));
        }
    }

    fn spawn_setup(&self, run_id: String, config: ConfigSummary) -> JoinHandle<()> {
        let device = Arc::clone(&self.device);
        let pipeline = Arc::clone(&self.pipeline);
        let hooks = self.hooks.clone();
        let timeout = self.readiness_timeout;

        tokio::spawn(async move {
            let outcome = match time::timeout(timeout, device.wait_until_ready()).await {
                Err(_) => Err(AcquisitionError::device_not_ready(format!(
                    "device did not become ready within {:?}",
                    timeout
                ))),
                Ok(Err(e)) => Err(AcquisitionError::device_not_ready(format!(
                    "device readiness check failed: {}",
                    e
                ))),
                Ok(Ok(())) => pipeline
                    .setup(&run_id, &config, hooks.clone())
                    .await
                    .map_err(|e| AcquisitionError::internal(format!("pipeline setup failed: {}", e))),
            };
            let event = match outcome {
                Ok(()) => PipelineEvent::SetupComplete { run_id },
                Err(error) => PipelineEvent::SetupFailed { run_id, error },
            };
            hooks.send(event);
        })
    }

    fn on_setup_complete(&mut self, run_id: &str) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        if active.run.run_id != run_id || active.run.state != RunState::Starting {
            debug!("Ignoring stale setup completion for run {}", run_id);
            return;
        }
        active.setup_task = None;
        active.run.mark_running(Utc::now());

        self.transition(AcquisitionEvent::SetupComplete);
        self.publish_active(Some(RunState::Starting));

        if let Some(pending) = self.take_pending_start(run_id) {
            let _ = pending.respond_to.send(Ok(CommandOutcome::Started {
                run_id: run_id.to_string(),
            }));
        }
    }

    fn on_setup_failed(&mut self, run_id: &str, error: AcquisitionError) {
        let current = self
            .active
            .as_ref()
            .is_some_and(|a| a.run.run_id == run_id && a.run.state == RunState::Starting);
        if !current {
            debug!("Ignoring stale setup failure for run {}", run_id);
            return;
        }

        warn!("Run {} failed to start: {}", run_id, error);
        if let Some(pending) = self.take_pending_start(run_id) {
            let _ = pending.respond_to.send(Err(error.clone()));
        }
        self.enter_error(StatusFault::transient(error.message()));
    }

    fn stop(&mut self, options: StopOptions, respond_to: Responder) {
        let finishing = self
            .active
            .as_ref()
            .is_some_and(|a| a.run.state == RunState::Finishing);
        if finishing {
            debug!("Stop requested while already finishing");
        } else {
            let action = options.data_action.resolve(self.default_stop_action);
            self.begin_finishing(StopReason::StoppedByUser, action, options.keep_power_on);
        }

        if options.wait_until_ready && self.status_machine.status() != DeviceStatus::Ready {
            self.ready_waiters.push(respond_to);
        } else {
            let _ = respond_to.send(Ok(CommandOutcome::Stopped));
        }
    }

    fn on_trigger(&mut self, trigger: StopTrigger) {
        match self.active.as_ref().map(|a| a.run.state) {
            Some(RunState::Starting | RunState::Running) => {
                warn!("Stopping acquisition: {:?}", trigger);
                let action = DataAction::Default.resolve(self.default_stop_action);
                self.begin_finishing(trigger.stop_reason(), action, false);
            }
            Some(_) => debug!("Ignoring {:?}: run already finishing", trigger),
            None => warn!("Ignoring {:?}: no acquisition run is active", trigger),
        }
    }

    /// Shared FINISHING entry for explicit stops and stop triggers.
    fn begin_finishing(&mut self, reason: StopReason, action: DataAction, keep_power_on: bool) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        let previous = active.run.state;
        if !active.run.begin_finishing(reason) {
            return;
        }
        if let Some(task) = active.setup_task.take() {
            task.abort();
        }
        active.drain_action = action;
        let run_id = active.run.run_id.clone();
        let stop_reason = active.run.stop_reason;

        if let Some(pending) = self.take_pending_start(&run_id) {
            let _ = pending.respond_to.send(Err(AcquisitionError::precondition(format!(
                "run {} was stopped before it reached processing",
                run_id
            ))));
        }

        self.emitter.notify_stop(&run_id, stop_reason);
        self.transition(AcquisitionEvent::StopRequested);
        self.publish_active(Some(previous));
        self.device.stop_acquisition(keep_power_on);

        if previous == RunState::Starting {
            // No data was read, nothing to drain.
            if let Some(active) = self.active.as_mut() {
                active.completed_phases.extend([
                    FinishingState::ProcessingDeviceSignal,
                    FinishingState::BasecallingReads,
                    FinishingState::SavingData,
                ]);
            }
            self.advance_finishing();
        } else {
            self.pipeline.begin_drain(&run_id, action);
        }
    }

    fn on_phase_complete(&mut self, run_id: &str, phase: FinishingState) {
        let Some(active) = self.active.as_mut() else {
            debug!("Ignoring {} completion: no active run", phase);
            return;
        };
        if active.run.run_id != run_id
            || active.run.state != RunState::Finishing
            || phase == FinishingState::Unknown
        {
            debug!("Ignoring {} completion for run {}", phase, run_id);
            return;
        }
        active.completed_phases.insert(phase);
        self.advance_finishing();
    }

    /// Walk the drain phases in order as far as completions allow.
    fn advance_finishing(&mut self) {
        loop {
            let Some(active) = self.active.as_mut() else {
                return;
            };
            let phase = active.run.finishing_state;
            if !active.completed_phases.contains(&phase) {
                return;
            }

            let next = match phase {
                FinishingState::ProcessingDeviceSignal => {
                    active.run.mark_data_read_end(Utc::now());
                    Some(FinishingState::BasecallingReads)
                }
                FinishingState::BasecallingReads => {
                    if active.drain_action == DataAction::KeepAllData {
                        let skipped = self.shared.progress.skip_outstanding_reads();
                        if skipped > 0 {
                            info!(
                                "Run {}: {} unfinished reads counted as skipped",
                                active.run.run_id, skipped
                            );
                        }
                    }
                    active
                        .run
                        .config_summary
                        .file_output_enabled
                        .then_some(FinishingState::SavingData)
                }
                FinishingState::SavingData => None,
                FinishingState::Unknown => return,
            };

            match next {
                Some(next) => {
                    active.run.finishing_state = next;
                    let run_id = active.run.run_id.clone();
                    self.emitter.notify_finishing_phase(&run_id, next);
                    self.publish_active(Some(RunState::Finishing));
                }
                None => {
                    self.complete_active_run();
                    return;
                }
            }
        }
    }

    fn complete_active_run(&mut self) {
        let Some(mut active) = self.active.take() else {
            return;
        };
        let previous = active.run.state;
        let reason = active.run.stop_reason;
        active.run.yield_summary = self.shared.progress.yield_summary();
        active.run.complete(reason, Utc::now());
        self.publish_run(&active.run, Some(previous));

        if reason == StopReason::StoppedDeviceError {
            self.enter_error(StatusFault::transient(format!(
                "device error during run {}",
                active.run.run_id
            )));
        } else {
            self.transition(AcquisitionEvent::DrainComplete);
            self.resolve_ready_waiters();
        }
    }

    /// Move to ERROR, closing any active run, and attempt one automatic
    /// revert to READY.
    fn enter_error(&mut self, fault: StatusFault) {
        if let Some(mut active) = self.active.take() {
            if let Some(task) = active.setup_task.take() {
                task.abort();
            }
            let run_id = active.run.run_id.clone();
            if let Some(pending) = self.take_pending_start(&run_id) {
                let _ = pending
                    .respond_to
                    .send(Err(AcquisitionError::internal(fault.message.clone())));
            }
            let previous = active.run.state;
            active.run.yield_summary = self.shared.progress.yield_summary();
            active.run.complete(StopReason::StoppedDeviceError, Utc::now());
            self.publish_run(&active.run, Some(previous));
        }

        self.transition(AcquisitionEvent::Fault(fault));
        self.spawn_recovery();
    }

    fn spawn_recovery(&mut self) {
        if self.recovery_in_flight {
            return;
        }
        self.recovery_in_flight = true;

        let device = Arc::clone(&self.device);
        let hooks = self.hooks.clone();
        let timeout = self.recovery_timeout;
        tokio::spawn(async move {
            let result = match time::timeout(timeout, device.reset()).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(e.to_string()),
                Err(_) => Err(format!("device reset did not finish within {:?}", timeout)),
            };
            hooks.send(PipelineEvent::RecoveryFinished(result));
        });
    }

    fn on_recovery_finished(&mut self, result: Result<(), String>) {
        self.recovery_in_flight = false;
        if self.status_machine.status() != DeviceStatus::Error {
            return;
        }
        match result {
            Ok(()) => {
                info!("Device recovered from error");
                self.transition(AcquisitionEvent::Recovered);
                self.resolve_ready_waiters();
            }
            Err(message) => {
                error!("Automatic recovery failed: {}", message);
                self.transition(AcquisitionEvent::RecoveryFailed);
                for waiter in self.ready_waiters.drain(..) {
                    let _ = waiter.send(Err(AcquisitionError::internal(format!(
                        "device did not return to READY: {}",
                        message
                    ))));
                }
            }
        }
    }

    fn on_device_recovered(&mut self) {
        if self.transition(AcquisitionEvent::Recovered) {
            info!("Device reported recovered");
            self.resolve_ready_waiters();
        }
    }

    fn resolve_ready_waiters(&mut self) {
        for waiter in self.ready_waiters.drain(..) {
            let _ = waiter.send(Ok(CommandOutcome::Stopped));
        }
    }

    fn take_pending_start(&mut self, run_id: &str) -> Option<PendingStart> {
        if self
            .pending_start
            .as_ref()
            .is_some_and(|pending| pending.run_id == run_id)
        {
            self.pending_start.take()
        } else {
            None
        }
    }

    fn transition(&mut self, event: AcquisitionEvent) -> bool {
        let old = self.status_machine.report().clone();
        let dwell = self.status_machine.time_in_state();
        if !self.status_machine.process_event(event) {
            return false;
        }
        let new = self.status_machine.report().clone();
        debug!(
            "Device status {} -> {} after {:?} (transition #{})",
            old.status,
            new.status,
            dwell.unwrap_or_default(),
            self.status_machine.transition_count()
        );
        self.emitter.notify_status_change(&old, &new);
        self.shared.status.publish(new);
        true
    }

    fn publish_active(&mut self, previous: Option<RunState>) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        active.run.yield_summary = self.shared.progress.yield_summary();
        let run = active.run.clone();
        self.publish_run(&run, previous);
    }

    fn publish_run(&self, run: &AcquisitionRun, previous: Option<RunState>) {
        if let Err(e) = self.shared.registry.record(run.clone()) {
            error!("Failed to record run {}: {}", run.run_id, e);
        }
        if previous != Some(run.state) {
            self.emitter
                .notify_run_state_change(&run.run_id, previous, run.state);
        }
        self.shared.run_info.publish(run.clone());
    }

    fn shutdown(&mut self) {
        if let Some(active) = self.active.as_mut() {
            if let Some(task) = active.setup_task.take() {
                task.abort();
            }
            warn!(
                "Acquisition task stopping while run {} is {}",
                active.run.run_id, active.run.state
            );
        }
        self.shared.status.close();
        self.shared.run_info.close();
    }
}

/// Run the acquisition task until every controller is dropped.
pub(crate) async fn run_acquisition_task(
    mut machine: AcquisitionStateMachine,
    mut rx: mpsc::Receiver<AcquisitionRequest>,
    mut events: mpsc::UnboundedReceiver<PipelineEvent>,
) {
    info!(
        "Acquisition task started for device {}",
        machine.device.info().device_id
    );

    loop {
        tokio::select! {
            maybe_req = rx.recv() => {
                let Some(AcquisitionRequest { cmd, respond_to }) = maybe_req else { break; };
                let label = cmd.name();
                let started = Instant::now();
                machine.handle_command(cmd, respond_to);
                debug!("Acquisition command {} handled in {:?}", label, started.elapsed());
            },
            Some(event) = events.recv() => {
                machine.handle_event(event);
            },
        }
    }

    machine.shutdown();
    info!("acquisition task shutting down (channel closed)");
}

// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Simulated sequencing device for development and testing.
//!
//! The device warms up for a configurable delay before it reports ready.
//! The pipeline produces a steady stream of samples, reads, basecalls and
//! output bytes while a run is RUNNING, and walks through the drain phases
//! when asked to. No hardware required.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, warn};

use acq_core::{
    AcquisitionDevice, AcquisitionPipeline, BasecallBatch, BoxFuture, ConfigSummary,
    DataAction, DeviceInfo, DynResult, FinishingState, PipelineHooks, RunState, StopTrigger,
};

use crate::BackendSettings;

/// Raw samples making up one read.
const SAMPLES_PER_READ: u64 = 40_000;
/// Raw samples per called base.
const SAMPLES_PER_BASE: u64 = 10;
/// Bytes written per raw sample.
const BYTES_PER_SAMPLE: u64 = 2;
/// Per mille of basecalled reads that pass.
const PASS_PER_MILLE: u64 = 900;
/// Pause between drain phases.
const PHASE_STEP: Duration = Duration::from_millis(20);

pub struct SimulatedDevice {
    info: DeviceInfo,
    ready_delay: Duration,
    fail_recovery: bool,
    ready: AtomicBool,
    connected: AtomicBool,
    reconnected: Notify,
}

impl SimulatedDevice {
    pub fn new(settings: &BackendSettings) -> Self {
        Self {
            info: DeviceInfo {
                device_id: settings.device_id.clone(),
                model: "simulated".to_string(),
                channel_count: settings.channel_count,
            },
            ready_delay: settings.ready_delay,
            fail_recovery: settings.fail_recovery,
            ready: AtomicBool::new(false),
            connected: AtomicBool::new(true),
            reconnected: Notify::new(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Pull the device. A run in progress is stopped through `hooks`.
    pub fn disconnect(&self, hooks: &PipelineHooks) {
        warn!("Simulated device {} disconnected", self.info.device_id);
        self.connected.store(false, Ordering::SeqCst);
        self.ready.store(false, Ordering::SeqCst);
        if hooks.current_run_id().is_some() {
            hooks.report_trigger(StopTrigger::DeviceDisconnected);
        }
    }

    pub fn reconnect(&self) {
        info!("Simulated device {} reconnected", self.info.device_id);
        self.connected.store(true, Ordering::SeqCst);
        self.reconnected.notify_waiters();
    }

    async fn warm_up(&self) {
        loop {
            let reconnected = self.reconnected.notified();
            if self.is_connected() {
                break;
            }
            reconnected.await;
        }
        time::sleep(self.ready_delay).await;
        if self.is_connected() {
            self.ready.store(true, Ordering::SeqCst);
        }
    }
}

impl AcquisitionDevice for SimulatedDevice {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn wait_until_ready(&self) -> BoxFuture<'_, DynResult<()>> {
        Box::pin(async move {
            while !self.is_ready() {
                self.warm_up().await;
            }
            Ok(())
        })
    }

    fn stop_acquisition(&self, keep_power_on: bool) {
        if keep_power_on {
            debug!("Acquisition stopped, ASIC kept powered");
        } else {
            debug!("Acquisition stopped, ASIC powered down");
            self.ready.store(false, Ordering::SeqCst);
        }
    }

    fn reset(&self) -> BoxFuture<'_, DynResult<()>> {
        Box::pin(async move {
            if self.fail_recovery {
                return Err("simulated reset failure".into());
            }
            if !self.is_connected() {
                return Err("device is not connected".into());
            }
            self.ready.store(false, Ordering::SeqCst);
            self.warm_up().await;
            if self.is_ready() {
                Ok(())
            } else {
                Err("device went away during reset".into())
            }
        })
    }
}

/// Volume produced per feed interval.
#[derive(Debug, Clone, Copy)]
struct FeedPlan {
    interval: Duration,
    samples_per_tick: u64,
    disk_capacity_bytes: Option<u64>,
}

struct PipelineRun {
    run_id: String,
    hooks: PipelineHooks,
    config: ConfigSummary,
    feeder: JoinHandle<()>,
}

pub struct SimulatedPipeline {
    plan: FeedPlan,
    run: Mutex<Option<PipelineRun>>,
}

impl SimulatedPipeline {
    pub fn new(settings: &BackendSettings) -> Self {
        let interval = settings.feed_interval.max(Duration::from_millis(1));
        let per_second = settings.sample_rate_hz * u64::from(settings.channel_count);
        let samples_per_tick = (per_second as u128 * interval.as_millis() / 1000) as u64;
        Self {
            plan: FeedPlan {
                interval,
                samples_per_tick: samples_per_tick.max(1),
                disk_capacity_bytes: settings.disk_capacity_bytes,
            },
            run: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<PipelineRun>> {
        self.run.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for SimulatedPipeline {
    fn drop(&mut self) {
        if let Some(run) = self.lock().take() {
            run.feeder.abort();
        }
    }
}

/// Produce data for `run_id` while it is RUNNING.
async fn feed(run_id: String, hooks: PipelineHooks, file_output: bool, plan: FeedPlan) {
    let mut ticker = time::interval(plan.interval);
    let mut carry = 0u64;
    loop {
        ticker.tick().await;
        match hooks.current_run_state() {
            Some(RunState::Starting) => continue,
            Some(RunState::Running) if hooks.current_run_id().as_deref() == Some(run_id.as_str()) => {}
            _ => break,
        }

        let progress = hooks.progress();
        let samples = plan.samples_per_tick;
        progress.add_acquired(samples);
        progress.add_processed(samples);

        carry += samples;
        let new_reads = carry / SAMPLES_PER_READ;
        carry %= SAMPLES_PER_READ;
        progress.add_reads(new_reads);

        // Basecalling trails acquisition by one interval.
        let backlog = progress
            .yield_summary()
            .outstanding_read_count()
            .saturating_sub(new_reads);
        let batch = basecall_batch(backlog);
        progress.record_basecalled(batch);
        progress.record_selection(samples, samples / SAMPLES_PER_BASE * 2, samples / SAMPLES_PER_BASE);

        if !file_output {
            continue;
        }
        let summary = progress.yield_summary();
        let bytes = samples * BYTES_PER_SAMPLE;
        if let Some(capacity) = plan.disk_capacity_bytes {
            if summary.bytes_to_write_produced + bytes > capacity {
                warn!("Run {}: simulated disk is full", run_id);
                hooks.report_trigger(StopTrigger::DiskFull);
                break;
            }
        }
        progress.record_write(bytes, 0, summary.bytes_to_write_pending());
        progress.add_written_reads(batch.pass_reads);
    }
    debug!("Feeder for run {} finished", run_id);
}

fn basecall_batch(reads: u64) -> BasecallBatch {
    let pass_reads = reads * PASS_PER_MILLE / 1000;
    let fail_reads = reads - pass_reads;
    let bases_per_read = SAMPLES_PER_READ / SAMPLES_PER_BASE;
    BasecallBatch {
        pass_reads,
        fail_reads,
        pass_bases: pass_reads * bases_per_read,
        fail_bases: fail_reads * bases_per_read,
        samples: reads * SAMPLES_PER_READ,
    }
}

/// Walk the drain phases in order, doing the work each one stands for.
async fn drain(run_id: String, hooks: PipelineHooks, file_output: bool, action: DataAction) {
    let progress = hooks.progress();

    time::sleep(PHASE_STEP).await;
    let raw = progress.snapshot();
    progress.add_processed(raw.acquired.saturating_sub(raw.processed));
    hooks.phase_complete(&run_id, FinishingState::ProcessingDeviceSignal);

    time::sleep(PHASE_STEP).await;
    if action == DataAction::FinishProcessing {
        let outstanding = progress.yield_summary().outstanding_read_count();
        progress.record_basecalled(basecall_batch(outstanding));
    }
    hooks.phase_complete(&run_id, FinishingState::BasecallingReads);

    if file_output {
        time::sleep(PHASE_STEP).await;
        let pending = progress.yield_summary().bytes_to_write_pending();
        progress.record_write(0, 0, pending);
        hooks.phase_complete(&run_id, FinishingState::SavingData);
    }
    info!("Run {} drained ({:?})", run_id, action);
}

impl AcquisitionPipeline for SimulatedPipeline {
    fn setup<'a>(
        &'a self,
        run_id: &'a str,
        config: &'a ConfigSummary,
        hooks: PipelineHooks,
    ) -> BoxFuture<'a, DynResult<()>> {
        Box::pin(async move {
            let feeder = tokio::spawn(feed(
                run_id.to_string(),
                hooks.clone(),
                config.file_output_enabled,
                self.plan,
            ));
            let previous = self.lock().replace(PipelineRun {
                run_id: run_id.to_string(),
                hooks,
                config: config.clone(),
                feeder,
            });
            if let Some(previous) = previous {
                previous.feeder.abort();
            }
            info!(
                "Pipeline ready for run {} ({:?}, file output {})",
                run_id, config.purpose, config.file_output_enabled
            );
            Ok(())
        })
    }

    fn begin_drain(&self, run_id: &str, action: DataAction) {
        let Some(run) = self.lock().take() else {
            warn!("Drain requested for run {} but no run is set up", run_id);
            return;
        };
        if run.run_id != run_id {
            warn!("Drain requested for run {} but {} is set up", run_id, run.run_id);
        }
        run.feeder.abort();
        tokio::spawn(drain(
            run_id.to_string(),
            run.hooks,
            run.config.file_output_enabled,
            action,
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use acq_core::{
        AcquisitionController, AcquisitionTaskConfig, DeviceStatus, StartOptions, StopOptions,
        StopReason,
    };

    const WAIT: Duration = Duration::from_secs(3);

    fn settings() -> BackendSettings {
        BackendSettings {
            device_id: "SIM42".to_string(),
            ready_delay: Duration::from_millis(10),
            sample_rate_hz: 4_000,
            channel_count: 100,
            disk_capacity_bytes: None,
            fail_recovery: false,
            feed_interval: Duration::from_millis(10),
        }
    }

    fn spawn(settings: &BackendSettings) -> (AcquisitionController, Arc<SimulatedDevice>) {
        let device = Arc::new(SimulatedDevice::new(settings));
        let pipeline = Arc::new(SimulatedPipeline::new(settings));
        let mut config = AcquisitionTaskConfig::new(device.clone(), pipeline);
        config.readiness_timeout = Duration::from_millis(500);
        config.recovery_timeout = Duration::from_millis(500);
        (AcquisitionController::spawn(config).0, device)
    }

    async fn wait_for(ctrl: &AcquisitionController, status: DeviceStatus) {
        let mut sub = ctrl.watch_for_status_change();
        time::timeout(WAIT, async {
            while let Some(report) = sub.recv().await {
                if report.status == status {
                    return;
                }
            }
            panic!("status feed closed");
        })
        .await
        .expect("timed out waiting for status");
    }

    async fn start(ctrl: &AcquisitionController) -> String {
        ctrl.start(StartOptions {
            wait_until_processing: true,
            ..StartOptions::default()
        })
        .await
        .unwrap()
    }

    #[test]
    fn test_basecall_batch_split() {
        let batch = basecall_batch(10);
        assert_eq!(batch.pass_reads, 9);
        assert_eq!(batch.fail_reads, 1);
        assert_eq!(batch.samples, 10 * SAMPLES_PER_READ);
        assert_eq!(basecall_batch(0), BasecallBatch::default());
    }

    #[tokio::test]
    async fn test_device_warms_up() {
        let device = SimulatedDevice::new(&settings());
        assert!(!device.is_ready());
        time::timeout(WAIT, device.wait_until_ready())
            .await
            .unwrap()
            .unwrap();
        assert!(device.is_ready());
        device.stop_acquisition(true);
        assert!(device.is_ready());
        device.stop_acquisition(false);
        assert!(!device.is_ready());
    }

    #[tokio::test]
    async fn test_full_run_produces_yield() {
        let (ctrl, _device) = spawn(&settings());
        let run_id = start(&ctrl).await;

        time::sleep(Duration::from_millis(100)).await;
        assert!(ctrl.get_progress().acquired > 0);

        ctrl.stop(StopOptions {
            data_action: DataAction::FinishProcessing,
            wait_until_ready: true,
            ..StopOptions::default()
        })
        .await
        .unwrap();
        assert_eq!(ctrl.current_status().status, DeviceStatus::Ready);

        let run = ctrl.get_acquisition_info(Some(&run_id)).unwrap();
        let raw = ctrl.get_progress();
        assert_eq!(raw.processed, raw.acquired);
        assert!(run.yield_summary.read_count > 0);
        assert_eq!(run.yield_summary.outstanding_read_count(), 0);
        assert_eq!(run.yield_summary.basecalled_skipped_read_count, 0);
        assert_eq!(run.yield_summary.bytes_to_write_pending(), 0);
        assert_eq!(run.stop_reason, StopReason::StoppedByUser);
    }

    #[tokio::test]
    async fn test_disk_full_stops_run() {
        let settings = BackendSettings {
            disk_capacity_bytes: Some(4 * 400 * 2 * 10),
            ..settings()
        };
        let (ctrl, _device) = spawn(&settings);
        let run_id = start(&ctrl).await;

        wait_for(&ctrl, DeviceStatus::Finishing).await;
        wait_for(&ctrl, DeviceStatus::Ready).await;
        let run = ctrl.get_acquisition_info(Some(&run_id)).unwrap();
        assert_eq!(run.stop_reason, StopReason::StoppedNoDiskSpace);
        assert!(run.yield_summary.bytes_to_write_produced <= 4 * 400 * 2 * 10);
    }

    #[tokio::test]
    async fn test_disconnect_and_recover() {
        let (ctrl, device) = spawn(&settings());
        let run_id = start(&ctrl).await;

        device.disconnect(&ctrl.hooks());
        wait_for(&ctrl, DeviceStatus::Error).await;
        // Recovery cannot succeed while unplugged.
        let report = {
            let mut sub = ctrl.watch_for_status_change();
            time::timeout(WAIT, async {
                loop {
                    let report = sub.recv().await.unwrap();
                    if report.is_terminal_error() {
                        return report;
                    }
                }
            })
            .await
            .unwrap()
        };
        assert_eq!(report.status, DeviceStatus::Error);

        let run = ctrl.get_acquisition_info(Some(&run_id)).unwrap();
        assert_eq!(run.stop_reason, StopReason::StoppedDeviceError);

        device.reconnect();
        ctrl.hooks().device_recovered();
        wait_for(&ctrl, DeviceStatus::Ready).await;
        start(&ctrl).await;
    }

    #[tokio::test]
    async fn test_failed_reset_reported() {
        let device = SimulatedDevice::new(&BackendSettings {
            fail_recovery: true,
            ..settings()
        });
        assert!(device.reset().await.is_err());
    }
}

// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Interfaces of the external collaborators driven by the acquisition task:
//! the device driver and the signal processing pipeline.

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::acquisition::hooks::PipelineHooks;
use crate::options::{ConfigSummary, DataAction};
use crate::DynResult;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Static description of a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Identity embedded in run ids.
    pub device_id: String,
    pub model: String,
    pub channel_count: u32,
}

/// Device driver as seen by the acquisition task.
pub trait AcquisitionDevice: Send + Sync {
    fn info(&self) -> &DeviceInfo;

    /// Non-blocking readiness query.
    fn is_ready(&self) -> bool;

    /// Resolves once the device is ready to acquire. The caller applies its
    /// own timeout.
    fn wait_until_ready(&self) -> BoxFuture<'_, DynResult<()>>;

    /// Stop signal acquisition on the hardware.
    fn stop_acquisition(&self, keep_power_on: bool);

    /// Best-effort return to a usable state after an error.
    fn reset(&self) -> BoxFuture<'_, DynResult<()>>;
}

/// Acquisition pipeline as seen by the acquisition task.
///
/// The pipeline feeds `PipelineHooks::progress` while running and must call
/// `PipelineHooks::phase_complete` for every drain phase once a drain has
/// begun.
pub trait AcquisitionPipeline: Send + Sync {
    /// Prepare the pipeline for a run that is about to start reading data.
    fn setup<'a>(
        &'a self,
        run_id: &'a str,
        config: &'a ConfigSummary,
        hooks: PipelineHooks,
    ) -> BoxFuture<'a, DynResult<()>>;

    /// Begin draining the run with the given (already resolved) policy.
    fn begin_drain(&self, run_id: &str, action: DataAction);
}

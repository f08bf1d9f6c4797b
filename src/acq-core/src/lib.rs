// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

pub mod acquisition;
pub mod broadcast;
pub mod controller;
pub mod device;
pub mod error;
pub mod options;
pub mod run;

pub type DynResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

pub use acquisition::{
    AcquisitionListener, AcquisitionTaskConfig, DeviceStatus, OptionPolicy, PipelineHooks,
    Purpose, StatusFault, StatusReport, StopTrigger,
};
pub use broadcast::{StatusBroadcaster, Subscription};
pub use controller::AcquisitionController;
pub use device::{AcquisitionDevice, AcquisitionPipeline, BoxFuture, DeviceInfo};
pub use error::{AcquisitionError, AcquisitionResult, ErrorKind};
pub use options::{
    ConfigSummary, DataAction, ReplayMode, ReplayOptions, SignalReaderConfig, SignalReaderType,
    StartOptions, StopOptions,
};
pub use run::progress::{BasecallBatch, ProgressTracker, RawProgress, YieldSummary};
pub use run::{AcquisitionRun, FinishingState, RunState, StopReason};

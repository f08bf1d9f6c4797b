// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Acquisition lifecycle: device status machine, command admission and the
//! task that drives runs through STARTING, RUNNING, FINISHING and COMPLETED.

pub mod events;
pub mod handlers;
pub mod hooks;
pub mod machine;
pub mod policies;
pub mod request;
pub mod task;

pub use events::{AcquisitionEventEmitter, AcquisitionListener, ListenerId, TracingListener};
pub use handlers::{
    command_handler, AcquisitionCommandHandler, CommandContext, ValidationResult,
};
pub use hooks::{PipelineHooks, StopTrigger};
pub use machine::{
    AcquisitionEvent, DeviceStateMachine, DeviceStatus, StatusFault, StatusReport,
};
pub use policies::{resolve_config, OptionPolicy, Purpose, PurposeDefaults};
pub use request::{AcquisitionCommand, AcquisitionRequest, CommandOutcome};
pub use task::{AcquisitionStateMachine, AcquisitionTaskConfig};

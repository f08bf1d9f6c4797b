// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use tokio::sync::oneshot;

use crate::error::AcquisitionResult;
use crate::options::{SignalReaderConfig, StartOptions, StopOptions};

/// Mutating or task-owned requests served by the acquisition task.
#[derive(Debug, Clone)]
pub enum AcquisitionCommand {
    Start(StartOptions),
    Stop(StopOptions),
    SetSignalReader(SignalReaderConfig),
    GetSignalReader,
}

impl AcquisitionCommand {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Start(_) => "start",
            Self::Stop(_) => "stop",
            Self::SetSignalReader(_) => "set_signal_reader",
            Self::GetSignalReader => "get_signal_reader",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    Started { run_id: String },
    Stopped,
    SignalReader(SignalReaderConfig),
}

/// Request sent to the acquisition task with a one-shot reply channel.
#[derive(Debug)]
pub struct AcquisitionRequest {
    pub cmd: AcquisitionCommand,
    pub respond_to: oneshot::Sender<AcquisitionResult<CommandOutcome>>,
}

// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Transport DTOs for the JSON line protocol.

use serde::{Deserialize, Serialize};

use acq_core::run::progress::RawProgress;
use acq_core::{
    AcquisitionError, AcquisitionRun, DataAction, ErrorKind, OptionPolicy, Purpose,
    ReplayOptions, SignalReaderConfig, SignalReaderType, StatusReport,
};

/// Command received from network clients (JSON).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum ClientCommand {
    Start {
        #[serde(default)]
        wait_until_processing: bool,
        #[serde(default)]
        dont_wait_for_device_ready: bool,
        #[serde(default)]
        purpose: Purpose,
        #[serde(default)]
        generate_report: OptionPolicy,
        #[serde(default)]
        send_read_metrics: OptionPolicy,
        #[serde(default)]
        analysis: OptionPolicy,
        #[serde(default)]
        file_output: OptionPolicy,
    },
    Stop {
        #[serde(default)]
        data_action: DataAction,
        #[serde(default)]
        wait_until_ready: bool,
        #[serde(default)]
        keep_power_on: bool,
    },
    CurrentStatus,
    GetProgress,
    GetAcquisitionInfo {
        #[serde(default)]
        run_id: Option<String>,
    },
    ListAcquisitionRuns,
    GetCurrentAcquisitionRun,
    SetSignalReader {
        reader_type: SignalReaderType,
        #[serde(default)]
        replay: Option<ReplayOptions>,
    },
    GetSignalReader,
    WatchForStatusChange,
    WatchCurrentAcquisitionRun,
}

/// Envelope for client commands with optional authentication token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientEnvelope {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(flatten)]
    pub cmd: ClientCommand,
}

/// Line sent by a client while a watch is streaming.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WatchControl {
    #[serde(default)]
    pub stop: bool,
}

/// Successful result carried by a response line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponsePayload {
    Started { run_id: String },
    Stopped,
    Status(StatusReport),
    Progress(RawProgress),
    Run(AcquisitionRun),
    Runs { run_ids: Vec<String> },
    SignalReader(SignalReaderConfig),
    WatchStarted,
    WatchStopped,
}

/// Response sent to network clients over TCP.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<ResponsePayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl ClientResponse {
    pub fn ok(payload: ResponsePayload) -> Self {
        Self {
            success: true,
            payload: Some(payload),
            error: None,
            error_kind: None,
        }
    }

    /// Failure with no acquisition error class, e.g. rejected credentials.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            payload: None,
            error: Some(message.into()),
            error_kind: None,
        }
    }
}

impl From<&AcquisitionError> for ClientResponse {
    fn from(err: &AcquisitionError) -> Self {
        Self {
            success: false,
            payload: None,
            error: Some(err.to_string()),
            error_kind: Some(err.kind()),
        }
    }
}

impl<T> From<Result<T, AcquisitionError>> for ClientResponse
where
    T: Into<ResponsePayload>,
{
    fn from(result: Result<T, AcquisitionError>) -> Self {
        match result {
            Ok(value) => Self::ok(value.into()),
            Err(err) => Self::from(&err),
        }
    }
}

impl From<StatusReport> for ResponsePayload {
    fn from(report: StatusReport) -> Self {
        Self::Status(report)
    }
}

impl From<AcquisitionRun> for ResponsePayload {
    fn from(run: AcquisitionRun) -> Self {
        Self::Run(run)
    }
}

impl From<SignalReaderConfig> for ResponsePayload {
    fn from(config: SignalReaderConfig) -> Self {
        Self::SignalReader(config)
    }
}

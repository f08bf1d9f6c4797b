// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Mapping from wire commands to acquisition controller calls.

use acq_core::{AcquisitionResult, SignalReaderConfig, StartOptions, StopOptions};

use crate::types::ClientCommand;

/// A client command with its options converted to core types.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientRequest {
    Start(StartOptions),
    Stop(StopOptions),
    CurrentStatus,
    GetProgress,
    GetAcquisitionInfo(Option<String>),
    ListAcquisitionRuns,
    GetCurrentAcquisitionRun,
    SetSignalReader(SignalReaderConfig),
    GetSignalReader,
    WatchStatus,
    WatchCurrentRun,
}

impl ClientRequest {
    /// Whether the request switches the connection into streaming mode.
    pub fn is_watch(&self) -> bool {
        matches!(self, Self::WatchStatus | Self::WatchCurrentRun)
    }
}

/// Convert a ClientCommand to a ClientRequest.
///
/// Fails with a validation error when signal reader options do not apply to
/// the requested reader type.
pub fn client_command_to_request(cmd: ClientCommand) -> AcquisitionResult<ClientRequest> {
    let req = match cmd {
        ClientCommand::Start {
            wait_until_processing,
            dont_wait_for_device_ready,
            purpose,
            generate_report,
            send_read_metrics,
            analysis,
            file_output,
        } => ClientRequest::Start(StartOptions {
            wait_until_processing,
            dont_wait_for_device_ready,
            purpose,
            generate_report,
            send_read_metrics,
            analysis,
            file_output,
        }),
        ClientCommand::Stop {
            data_action,
            wait_until_ready,
            keep_power_on,
        } => ClientRequest::Stop(StopOptions {
            data_action,
            wait_until_ready,
            keep_power_on,
        }),
        ClientCommand::CurrentStatus => ClientRequest::CurrentStatus,
        ClientCommand::GetProgress => ClientRequest::GetProgress,
        ClientCommand::GetAcquisitionInfo { run_id } => ClientRequest::GetAcquisitionInfo(run_id),
        ClientCommand::ListAcquisitionRuns => ClientRequest::ListAcquisitionRuns,
        ClientCommand::GetCurrentAcquisitionRun => ClientRequest::GetCurrentAcquisitionRun,
        ClientCommand::SetSignalReader {
            reader_type,
            replay,
        } => ClientRequest::SetSignalReader(SignalReaderConfig::new(reader_type, replay)?),
        ClientCommand::GetSignalReader => ClientRequest::GetSignalReader,
        ClientCommand::WatchForStatusChange => ClientRequest::WatchStatus,
        ClientCommand::WatchCurrentAcquisitionRun => ClientRequest::WatchCurrentRun,
    };
    Ok(req)
}

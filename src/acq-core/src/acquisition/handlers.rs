// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Admission checks for acquisition commands.
//!
//! Each command is wrapped in a handler that decides, against a read-only
//! view of the task context, whether it may run. Execution itself stays in
//! the acquisition task.

use std::fmt::Debug;

use crate::error::{AcquisitionError, AcquisitionResult};
use crate::options::{SignalReaderConfig, StartOptions, StopOptions};
use crate::run::AcquisitionRun;

use super::machine::{DeviceStatus, StatusReport};
use super::policies::resolve_config;
use super::request::AcquisitionCommand;

/// Result of command validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    /// Command can be executed.
    Ok,
    /// Command cannot be executed due to current state.
    InvalidState(String),
    /// Command parameters are invalid.
    InvalidParams(String),
    /// Hardware is not ready and the caller asked not to wait.
    DeviceNotReady(String),
}

impl ValidationResult {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }

    pub fn into_result(self) -> AcquisitionResult<()> {
        match self {
            Self::Ok => Ok(()),
            Self::InvalidState(msg) => Err(AcquisitionError::Precondition(msg)),
            Self::InvalidParams(msg) => Err(AcquisitionError::Validation(msg)),
            Self::DeviceNotReady(msg) => Err(AcquisitionError::DeviceNotReady(msg)),
        }
    }
}

/// Read-only view of the acquisition task used for validation.
pub trait CommandContext {
    fn status(&self) -> &StatusReport;

    /// The run currently owning the device, if any.
    fn active_run(&self) -> Option<&AcquisitionRun>;

    fn device_ready(&self) -> bool;

    fn signal_reader(&self) -> &SignalReaderConfig;
}

pub trait AcquisitionCommandHandler: Debug + Send + Sync {
    /// Human-readable name of the command.
    fn name(&self) -> &'static str;

    /// Validate if the command can be executed in the current context.
    fn can_execute(&self, ctx: &dyn CommandContext) -> ValidationResult;
}

/// Reject commands that need an idle device.
fn require_idle(ctx: &dyn CommandContext, action: &str) -> ValidationResult {
    if let Some(run) = ctx.active_run() {
        return ValidationResult::InvalidState(format!(
            "cannot {} while run {} is {}",
            action, run.run_id, run.state
        ));
    }
    let status = ctx.status();
    if status.is_terminal_error() {
        return ValidationResult::InvalidState(format!(
            "cannot {}: device is in an error state that needs intervention",
            action
        ));
    }
    if status.status != DeviceStatus::Ready {
        return ValidationResult::InvalidState(format!(
            "cannot {} while device status is {}",
            action, status.status
        ));
    }
    ValidationResult::Ok
}

#[derive(Debug)]
pub struct StartHandler {
    pub options: StartOptions,
}

impl AcquisitionCommandHandler for StartHandler {
    fn name(&self) -> &'static str {
        "start"
    }

    fn can_execute(&self, ctx: &dyn CommandContext) -> ValidationResult {
        let idle = require_idle(ctx, "start acquisition");
        if !idle.is_ok() {
            return idle;
        }
        if let Err(err) = resolve_config(&self.options, ctx.signal_reader()) {
            return ValidationResult::InvalidParams(err.message().to_string());
        }
        if self.options.dont_wait_for_device_ready && !ctx.device_ready() {
            return ValidationResult::DeviceNotReady(
                "device is not ready and waiting was disabled".to_string(),
            );
        }
        ValidationResult::Ok
    }
}

#[derive(Debug)]
pub struct StopHandler {
    pub options: StopOptions,
}

impl AcquisitionCommandHandler for StopHandler {
    fn name(&self) -> &'static str {
        "stop"
    }

    fn can_execute(&self, ctx: &dyn CommandContext) -> ValidationResult {
        if ctx.active_run().is_none() {
            return ValidationResult::InvalidState("no acquisition run is active".to_string());
        }
        ValidationResult::Ok
    }
}

#[derive(Debug)]
pub struct SetSignalReaderHandler {
    pub config: SignalReaderConfig,
}

impl AcquisitionCommandHandler for SetSignalReaderHandler {
    fn name(&self) -> &'static str {
        "set_signal_reader"
    }

    fn can_execute(&self, ctx: &dyn CommandContext) -> ValidationResult {
        if let Err(err) = self.config.validate() {
            return ValidationResult::InvalidParams(err.message().to_string());
        }
        require_idle(ctx, "change the signal reader")
    }
}

#[derive(Debug)]
pub struct ReadOnlyHandler {
    pub name: &'static str,
}

impl AcquisitionCommandHandler for ReadOnlyHandler {
    fn name(&self) -> &'static str {
        self.name
    }

    fn can_execute(&self, _ctx: &dyn CommandContext) -> ValidationResult {
        ValidationResult::Ok
    }
}

/// Build the handler for a command.
pub fn command_handler(cmd: &AcquisitionCommand) -> Box<dyn AcquisitionCommandHandler> {
    match cmd {
        AcquisitionCommand::Start(options) => Box::new(StartHandler {
            options: options.clone(),
        }),
        AcquisitionCommand::Stop(options) => Box::new(StopHandler {
            options: options.clone(),
        }),
        AcquisitionCommand::SetSignalReader(config) => {
            Box::new(SetSignalReaderHandler { config: *config })
        }
        AcquisitionCommand::GetSignalReader => Box::new(ReadOnlyHandler {
            name: "get_signal_reader",
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::machine::StatusFault;
    use crate::acquisition::policies::Purpose;
    use crate::options::{ReplayOptions, SignalReaderType};
    use crate::run::RunState;

    struct MockContext {
        status: StatusReport,
        run: Option<AcquisitionRun>,
        ready: bool,
        reader: SignalReaderConfig,
    }

    impl MockContext {
        fn idle() -> Self {
            Self {
                status: StatusReport::ready(),
                run: None,
                ready: true,
                reader: SignalReaderConfig::device(),
            }
        }

        fn with_run(state: RunState, status: DeviceStatus) -> Self {
            let mut run = AcquisitionRun::new("r1", Default::default(), chrono::Utc::now());
            run.state = state;
            Self {
                status: StatusReport {
                    status,
                    fault: None,
                },
                run: Some(run),
                ..Self::idle()
            }
        }
    }

    impl CommandContext for MockContext {
        fn status(&self) -> &StatusReport {
            &self.status
        }

        fn active_run(&self) -> Option<&AcquisitionRun> {
            self.run.as_ref()
        }

        fn device_ready(&self) -> bool {
            self.ready
        }

        fn signal_reader(&self) -> &SignalReaderConfig {
            &self.reader
        }
    }

    fn start(options: StartOptions) -> Box<dyn AcquisitionCommandHandler> {
        command_handler(&AcquisitionCommand::Start(options))
    }

    #[test]
    fn test_start_allowed_when_idle() {
        assert!(start(StartOptions::default())
            .can_execute(&MockContext::idle())
            .is_ok());
    }

    #[test]
    fn test_start_rejected_while_finishing() {
        let ctx = MockContext::with_run(RunState::Finishing, DeviceStatus::Finishing);
        let result = start(StartOptions::default()).can_execute(&ctx);
        assert!(matches!(result, ValidationResult::InvalidState(_)));
        assert!(matches!(
            result.into_result(),
            Err(AcquisitionError::Precondition(_))
        ));
    }

    #[test]
    fn test_start_rejected_in_terminal_error() {
        let ctx = MockContext {
            status: StatusReport {
                status: DeviceStatus::Error,
                fault: Some(StatusFault::fatal("gone")),
            },
            ..MockContext::idle()
        };
        assert!(matches!(
            start(StartOptions::default()).can_execute(&ctx),
            ValidationResult::InvalidState(_)
        ));
    }

    #[test]
    fn test_start_conflicting_options() {
        let ctx = MockContext {
            reader: SignalReaderConfig::new(SignalReaderType::Replay, None).unwrap(),
            ..MockContext::idle()
        };
        let opts = StartOptions {
            purpose: Purpose::Calibration,
            ..StartOptions::default()
        };
        assert!(matches!(
            start(opts).can_execute(&ctx),
            ValidationResult::InvalidParams(_)
        ));
    }

    #[test]
    fn test_start_immediate_fail_when_not_ready() {
        let ctx = MockContext {
            ready: false,
            ..MockContext::idle()
        };
        let opts = StartOptions {
            dont_wait_for_device_ready: true,
            ..StartOptions::default()
        };
        assert!(matches!(
            start(opts).can_execute(&ctx).into_result(),
            Err(AcquisitionError::DeviceNotReady(_))
        ));
        // Waiting is allowed
        assert!(start(StartOptions::default()).can_execute(&ctx).is_ok());
    }

    #[test]
    fn test_stop_requires_active_run() {
        let handler = command_handler(&AcquisitionCommand::Stop(StopOptions::default()));
        assert!(matches!(
            handler.can_execute(&MockContext::idle()),
            ValidationResult::InvalidState(_)
        ));
        let ctx = MockContext::with_run(RunState::Running, DeviceStatus::Processing);
        assert!(handler.can_execute(&ctx).is_ok());
    }

    #[test]
    fn test_signal_reader_rules() {
        let bad = SignalReaderConfig {
            reader: SignalReaderType::Device,
            replay: Some(ReplayOptions::default()),
        };
        let handler = command_handler(&AcquisitionCommand::SetSignalReader(bad));
        assert!(matches!(
            handler.can_execute(&MockContext::idle()),
            ValidationResult::InvalidParams(_)
        ));

        let good = SignalReaderConfig::new(SignalReaderType::Replay, None).unwrap();
        let handler = command_handler(&AcquisitionCommand::SetSignalReader(good));
        assert!(handler.can_execute(&MockContext::idle()).is_ok());
        let ctx = MockContext::with_run(RunState::Running, DeviceStatus::Processing);
        assert!(matches!(
            handler.can_execute(&ctx),
            ValidationResult::InvalidState(_)
        ));
    }
}

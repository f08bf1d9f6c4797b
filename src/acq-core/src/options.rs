// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Request options for starting and stopping acquisition, signal reader
//! selection and the configuration snapshot stored on every run.

use serde::{Deserialize, Serialize};

use crate::acquisition::policies::{OptionPolicy, Purpose};
use crate::error::{AcquisitionError, AcquisitionResult};

/// Options accepted by `start`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StartOptions {
    /// Block until the device reaches PROCESSING instead of returning once
    /// STARTING begins.
    pub wait_until_processing: bool,
    /// Fail with `DeviceNotReady` straight away if the hardware is not ready.
    pub dont_wait_for_device_ready: bool,
    pub purpose: Purpose,
    pub generate_report: OptionPolicy,
    pub send_read_metrics: OptionPolicy,
    pub analysis: OptionPolicy,
    pub file_output: OptionPolicy,
}

/// Drain policy applied when a run enters FINISHING.
///
/// There is no discard-all variant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataAction {
    /// Use the configured default.
    #[default]
    Default,
    /// Finish writing committed data; unfinished reads are counted as skipped.
    KeepAllData,
    /// Let basecalling catch up on all buffered signal before finishing.
    FinishProcessing,
}

impl DataAction {
    /// Resolve `Default` against a configured fallback. A fallback that is
    /// itself `Default` means `KeepAllData`.
    pub fn resolve(self, fallback: DataAction) -> DataAction {
        match (self, fallback) {
            (DataAction::Default, DataAction::Default) => DataAction::KeepAllData,
            (DataAction::Default, other) => other,
            (action, _) => action,
        }
    }
}

/// Options accepted by `stop`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StopOptions {
    pub data_action: DataAction,
    /// Block until the device is back in READY.
    pub wait_until_ready: bool,
    /// Hint forwarded to the device; has no effect on run state.
    pub keep_power_on: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalReaderType {
    /// Live signal from the device.
    #[default]
    Device,
    /// Previously recorded signal played back through the pipeline.
    Replay,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReplayMode {
    #[default]
    SinglePass,
    Loop,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayOptions {
    pub mode: ReplayMode,
    /// Playback speed relative to the recorded sample rate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_rate_scale_factor: Option<f32>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalReaderConfig {
    pub reader: SignalReaderType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replay: Option<ReplayOptions>,
}

impl SignalReaderConfig {
    pub fn device() -> Self {
        Self {
            reader: SignalReaderType::Device,
            replay: None,
        }
    }

    /// Build a checked configuration from a reader type and optional replay
    /// options.
    pub fn new(reader: SignalReaderType, replay: Option<ReplayOptions>) -> AcquisitionResult<Self> {
        let config = Self { reader, replay };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> AcquisitionResult<()> {
        match (self.reader, self.replay.as_ref()) {
            (SignalReaderType::Device, Some(_)) => Err(AcquisitionError::validation(
                "replay options are not applicable to the device signal reader",
            )),
            (SignalReaderType::Device, None) | (SignalReaderType::Replay, None) => Ok(()),
            (SignalReaderType::Replay, Some(opts)) => match opts.sample_rate_scale_factor {
                Some(factor) if !factor.is_finite() || factor <= 0.0 => {
                    Err(AcquisitionError::validation(format!(
                        "sample_rate_scale_factor must be a positive number (got {})",
                        factor
                    )))
                }
                _ => Ok(()),
            },
        }
    }

    pub fn is_replay(&self) -> bool {
        self.reader == SignalReaderType::Replay
    }
}

/// Settings resolved at start and frozen on the run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigSummary {
    pub purpose: Purpose,
    pub signal_reader: SignalReaderConfig,
    pub generate_report: bool,
    pub send_read_metrics: bool,
    pub analysis_enabled: bool,
    pub file_output_enabled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_action_resolution() {
        assert_eq!(
            DataAction::Default.resolve(DataAction::FinishProcessing),
            DataAction::FinishProcessing
        );
        assert_eq!(
            DataAction::Default.resolve(DataAction::Default),
            DataAction::KeepAllData
        );
        assert_eq!(
            DataAction::KeepAllData.resolve(DataAction::FinishProcessing),
            DataAction::KeepAllData
        );
    }

    #[test]
    fn test_device_reader_rejects_replay_options() {
        let err = SignalReaderConfig::new(
            SignalReaderType::Device,
            Some(ReplayOptions::default()),
        )
        .unwrap_err();
        assert!(matches!(err, AcquisitionError::Validation(_)));
    }

    #[test]
    fn test_replay_scale_factor_checked() {
        let bad = ReplayOptions {
            mode: ReplayMode::Loop,
            sample_rate_scale_factor: Some(0.0),
        };
        assert!(SignalReaderConfig::new(SignalReaderType::Replay, Some(bad)).is_err());

        let nan = ReplayOptions {
            mode: ReplayMode::Loop,
            sample_rate_scale_factor: Some(f32::NAN),
        };
        assert!(SignalReaderConfig::new(SignalReaderType::Replay, Some(nan)).is_err());

        let good = ReplayOptions {
            mode: ReplayMode::Loop,
            sample_rate_scale_factor: Some(2.5),
        };
        let cfg = SignalReaderConfig::new(SignalReaderType::Replay, Some(good)).unwrap();
        assert!(cfg.is_replay());
    }

    #[test]
    fn test_stop_options_defaults_from_empty_json() {
        let opts: StopOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(opts.data_action, DataAction::Default);
        assert!(!opts.wait_until_ready);
        assert!(!opts.keep_power_on);
    }

    #[test]
    fn test_data_action_wire_names() {
        let action: DataAction = serde_json::from_str("\"KEEP_ALL_DATA\"").unwrap();
        assert_eq!(action, DataAction::KeepAllData);
        assert!(serde_json::from_str::<DataAction>("\"DISCARD_ALL_DATA\"").is_err());
    }
}

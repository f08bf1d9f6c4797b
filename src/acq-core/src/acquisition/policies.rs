// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Purpose-driven option policies.
//!
//! Each optional feature of a run is requested as auto/force-on/force-off.
//! `Auto` defers to the run purpose. Everything is resolved once at start
//! into the plain booleans of `ConfigSummary`.

use serde::{Deserialize, Serialize};

use crate::error::{AcquisitionError, AcquisitionResult};
use crate::options::{ConfigSummary, SignalReaderConfig, StartOptions};

/// Coarse intent of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Purpose {
    #[default]
    Other,
    Sequencing,
    Calibration,
}

/// Tri-state request for an optional feature.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OptionPolicy {
    #[default]
    Auto,
    ForceOn,
    ForceOff,
}

impl OptionPolicy {
    pub fn resolve(self, auto_default: bool) -> bool {
        match self {
            Self::Auto => auto_default,
            Self::ForceOn => true,
            Self::ForceOff => false,
        }
    }
}

/// Values `Auto` resolves to for a given purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PurposeDefaults {
    pub generate_report: bool,
    pub send_read_metrics: bool,
    pub analysis: bool,
    pub file_output: bool,
}

impl PurposeDefaults {
    pub fn for_purpose(purpose: Purpose) -> Self {
        match purpose {
            Purpose::Sequencing => Self {
                generate_report: true,
                send_read_metrics: true,
                analysis: true,
                file_output: true,
            },
            Purpose::Calibration => Self {
                generate_report: false,
                send_read_metrics: false,
                analysis: false,
                file_output: false,
            },
            Purpose::Other => Self {
                generate_report: false,
                send_read_metrics: false,
                analysis: true,
                file_output: true,
            },
        }
    }
}

/// Resolve start options against the configured signal reader.
///
/// Fails with `Validation` on contradictory combinations.
pub fn resolve_config(
    options: &StartOptions,
    signal_reader: &SignalReaderConfig,
) -> AcquisitionResult<ConfigSummary> {
    if options.purpose == Purpose::Calibration && signal_reader.is_replay() {
        return Err(AcquisitionError::validation(
            "calibration requires the device signal reader, not a replay source",
        ));
    }

    let defaults = PurposeDefaults::for_purpose(options.purpose);
    let summary = ConfigSummary {
        purpose: options.purpose,
        signal_reader: *signal_reader,
        generate_report: options.generate_report.resolve(defaults.generate_report),
        send_read_metrics: options
            .send_read_metrics
            .resolve(defaults.send_read_metrics),
        analysis_enabled: options.analysis.resolve(defaults.analysis),
        file_output_enabled: options.file_output.resolve(defaults.file_output),
    };

    if summary.generate_report && !summary.file_output_enabled {
        return Err(AcquisitionError::validation(
            "a run report cannot be generated with file output disabled",
        ));
    }

    Ok(summary)
}

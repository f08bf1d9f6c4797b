// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Acquisition run records.

pub mod progress;
pub mod registry;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::options::ConfigSummary;

use self::progress::YieldSummary;

/// Run-scoped lifecycle state. `Completed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    Starting,
    Running,
    Finishing,
    Completed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Starting => "STARTING",
            Self::Running => "RUNNING",
            Self::Finishing => "FINISHING",
            Self::Completed => "COMPLETED",
        };
        f.write_str(name)
    }
}

/// Drain stage of a run in FINISHING, in the order they are passed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FinishingState {
    #[default]
    Unknown,
    ProcessingDeviceSignal,
    BasecallingReads,
    SavingData,
}

impl fmt::Display for FinishingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unknown => "UNKNOWN",
            Self::ProcessingDeviceSignal => "PROCESSING_DEVICE_SIGNAL",
            Self::BasecallingReads => "BASECALLING_READS",
            Self::SavingData => "SAVING_DATA",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StopReason {
    #[default]
    NotSet,
    StoppedByUser,
    StoppedNoDiskSpace,
    StoppedByProtocol,
    StoppedDeviceError,
    StoppedStartingAnotherRun,
}

/// One acquisition run as reported to clients.
///
/// Only the acquisition task mutates a run. Once `end_time` is set the
/// record is frozen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionRun {
    pub run_id: String,
    pub state: RunState,
    /// Meaningful only while `state` is `Finishing`.
    pub finishing_state: FinishingState,
    pub stop_reason: StopReason,
    pub start_time: Option<DateTime<Utc>>,
    pub data_read_start_time: Option<DateTime<Utc>>,
    pub data_read_end_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub yield_summary: YieldSummary,
    pub config_summary: ConfigSummary,
}

impl AcquisitionRun {
    pub fn new(run_id: impl Into<String>, config_summary: ConfigSummary, now: DateTime<Utc>) -> Self {
        Self {
            run_id: run_id.into(),
            state: RunState::Starting,
            finishing_state: FinishingState::Unknown,
            stop_reason: StopReason::NotSet,
            start_time: Some(now),
            data_read_start_time: None,
            data_read_end_time: None,
            end_time: None,
            yield_summary: YieldSummary::default(),
            config_summary,
        }
    }

    /// Synthetic completed run served to watchers before any run exists.
    pub fn placeholder() -> Self {
        Self {
            run_id: String::new(),
            state: RunState::Completed,
            finishing_state: FinishingState::Unknown,
            stop_reason: StopReason::NotSet,
            start_time: None,
            data_read_start_time: None,
            data_read_end_time: None,
            end_time: None,
            yield_summary: YieldSummary::default(),
            config_summary: ConfigSummary::default(),
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.run_id.is_empty()
    }

    pub fn is_active(&self) -> bool {
        !self.is_placeholder() && self.state != RunState::Completed
    }

    pub fn is_frozen(&self) -> bool {
        self.end_time.is_some()
    }

    /// STARTING -> RUNNING, stamping the start of data reading.
    pub fn mark_running(&mut self, now: DateTime<Utc>) -> bool {
        if self.state != RunState::Starting {
            return false;
        }
        self.data_read_start_time = Some(self.stamp(now));
        self.state = RunState::Running;
        true
    }

    /// STARTING/RUNNING -> FINISHING. The stop reason is only recorded the
    /// first time a stop is initiated.
    pub fn begin_finishing(&mut self, reason: StopReason) -> bool {
        if !matches!(self.state, RunState::Starting | RunState::Running) {
            return false;
        }
        if self.stop_reason == StopReason::NotSet {
            self.stop_reason = reason;
        }
        self.state = RunState::Finishing;
        self.finishing_state = FinishingState::ProcessingDeviceSignal;
        true
    }

    /// Record that signal ingestion has stopped. Ignored for runs that never
    /// started reading data.
    pub fn mark_data_read_end(&mut self, now: DateTime<Utc>) {
        if self.data_read_start_time.is_some() && self.data_read_end_time.is_none() {
            self.data_read_end_time = Some(self.stamp(now));
        }
    }

    /// Move to COMPLETED and freeze the record.
    pub fn complete(&mut self, reason: StopReason, now: DateTime<Utc>) -> bool {
        if self.state == RunState::Completed {
            return false;
        }
        if self.stop_reason == StopReason::NotSet {
            self.stop_reason = reason;
        }
        if self.data_read_start_time.is_some() && self.data_read_end_time.is_none() {
            self.data_read_end_time = Some(self.stamp(now));
        }
        self.end_time = Some(self.stamp(now));
        self.state = RunState::Completed;
        self.finishing_state = FinishingState::Unknown;
        true
    }

    /// Clamp `now` so that it never precedes an already-set timestamp.
    fn stamp(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        [
            self.start_time,
            self.data_read_start_time,
            self.data_read_end_time,
            self.end_time,
        ]
        .into_iter()
        .flatten()
        .fold(now, |acc, t| acc.max(t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn run() -> (AcquisitionRun, DateTime<Utc>) {
        let t0 = Utc::now();
        (AcquisitionRun::new("abc", ConfigSummary::default(), t0), t0)
    }

    #[test]
    fn test_new_run_is_starting() {
        let (run, t0) = run();
        assert_eq!(run.state, RunState::Starting);
        assert_eq!(run.start_time, Some(t0));
        assert_eq!(run.stop_reason, StopReason::NotSet);
        assert!(run.is_active());
        assert!(!run.is_frozen());
    }

    #[test]
    fn test_placeholder_is_completed_and_inactive() {
        let placeholder = AcquisitionRun::placeholder();
        assert_eq!(placeholder.state, RunState::Completed);
        assert!(placeholder.is_placeholder());
        assert!(!placeholder.is_active());
    }

    #[test]
    fn test_lifecycle_keeps_timestamps_ordered() {
        let (mut run, t0) = run();
        // A clock step backwards must not break the ordering.
        assert!(run.mark_running(t0 - Duration::seconds(5)));
        assert!(run.begin_finishing(StopReason::StoppedByUser));
        run.mark_data_read_end(t0 - Duration::seconds(10));
        assert!(run.complete(StopReason::StoppedDeviceError, t0 + Duration::seconds(1)));

        let start = run.start_time.unwrap();
        let read_start = run.data_read_start_time.unwrap();
        let read_end = run.data_read_end_time.unwrap();
        let end = run.end_time.unwrap();
        assert!(start <= read_start);
        assert!(read_start <= read_end);
        assert!(read_end <= end);
        assert!(run.is_frozen());
    }

    #[test]
    fn test_stop_reason_never_changes_once_set() {
        let (mut run, t0) = run();
        run.mark_running(t0);
        run.begin_finishing(StopReason::StoppedNoDiskSpace);
        assert!(!run.begin_finishing(StopReason::StoppedByUser));
        run.complete(StopReason::StoppedDeviceError, t0);
        assert_eq!(run.stop_reason, StopReason::StoppedNoDiskSpace);
    }

    #[test]
    fn test_completed_is_terminal() {
        let (mut run, t0) = run();
        assert!(run.complete(StopReason::StoppedDeviceError, t0));
        assert!(!run.mark_running(t0));
        assert!(!run.begin_finishing(StopReason::StoppedByUser));
        assert!(!run.complete(StopReason::StoppedByUser, t0));
        assert_eq!(run.finishing_state, FinishingState::Unknown);
        // Never read any data.
        assert!(run.data_read_start_time.is_none());
        assert!(run.data_read_end_time.is_none());
    }

    #[test]
    fn test_wire_names() {
        let json = serde_json::to_string(&StopReason::StoppedDeviceError).unwrap();
        assert_eq!(json, "\"STOPPED_DEVICE_ERROR\"");
        let json = serde_json::to_string(&FinishingState::ProcessingDeviceSignal).unwrap();
        assert_eq!(json, "\"PROCESSING_DEVICE_SIGNAL\"");
    }
}

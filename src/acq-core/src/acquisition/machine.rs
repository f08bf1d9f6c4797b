// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Device-wide status state machine.
//!
//! This module provides the explicit transition table for the process-wide
//! device status. It holds no run data; the acquisition task drives it
//! alongside the run record it owns.

use std::fmt;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceStatus {
    Error,
    Ready,
    Starting,
    Processing,
    Finishing,
}

impl DeviceStatus {
    /// True while a run owns the device.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Starting | Self::Processing | Self::Finishing)
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Error => "ERROR",
            Self::Ready => "READY",
            Self::Starting => "STARTING",
            Self::Processing => "PROCESSING",
            Self::Finishing => "FINISHING",
        };
        f.write_str(name)
    }
}

/// Error information attached to the ERROR status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusFault {
    pub message: String,
    /// False once the automatic revert to READY has failed.
    pub recoverable: bool,
    pub occurred_at: DateTime<Utc>,
}

impl StatusFault {
    pub fn new(message: impl Into<String>, recoverable: bool) -> Self {
        Self {
            message: message.into(),
            recoverable,
            occurred_at: Utc::now(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(message, true)
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(message, false)
    }
}

/// Value published on the device status feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub status: DeviceStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fault: Option<StatusFault>,
}

impl StatusReport {
    pub fn ready() -> Self {
        Self {
            status: DeviceStatus::Ready,
            fault: None,
        }
    }

    fn with_status(status: DeviceStatus) -> Self {
        Self {
            status,
            fault: None,
        }
    }

    /// ERROR with a failed automatic revert; needs outside intervention.
    pub fn is_terminal_error(&self) -> bool {
        self.status == DeviceStatus::Error
            && self.fault.as_ref().is_some_and(|fault| !fault.recoverable)
    }
}

impl Default for StatusReport {
    fn default() -> Self {
        Self::ready()
    }
}

/// Events that can trigger device status transitions.
#[derive(Debug, Clone)]
pub enum AcquisitionEvent {
    /// A start request was admitted
    StartRequested,
    /// Device readiness and pipeline setup completed
    SetupComplete,
    /// Explicit stop or an automatic stop trigger
    StopRequested,
    /// The last drain phase completed
    DrainComplete,
    /// Setup failure or internal fault
    Fault(StatusFault),
    /// The automatic revert from ERROR failed
    RecoveryFailed,
    /// The device is usable again
    Recovered,
}

/// The device status state machine.
#[derive(Debug, Clone)]
pub struct DeviceStateMachine {
    report: StatusReport,
    transition_count: u64,
    last_transition: Option<Instant>,
}

impl Default for DeviceStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceStateMachine {
    /// Create a new state machine in READY.
    pub fn new() -> Self {
        Self {
            report: StatusReport::ready(),
            transition_count: 0,
            last_transition: None,
        }
    }

    pub fn report(&self) -> &StatusReport {
        &self.report
    }

    pub fn status(&self) -> DeviceStatus {
        self.report.status
    }

    pub fn transition_count(&self) -> u64 {
        self.transition_count
    }

    /// Get the time since the last transition.
    pub fn time_in_state(&self) -> Option<Duration> {
        self.last_transition.map(|t| t.elapsed())
    }

    /// Process an event and potentially transition to a new state.
    /// Returns true if a transition occurred.
    pub fn process_event(&mut self, event: AcquisitionEvent) -> bool {
        if let Some(report) = self.next_state(event) {
            self.report = report;
            self.transition_count += 1;
            self.last_transition = Some(Instant::now());
            true
        } else {
            false
        }
    }

    fn next_state(&self, event: AcquisitionEvent) -> Option<StatusReport> {
        use DeviceStatus::*;

        match (self.report.status, event) {
            (Ready, AcquisitionEvent::StartRequested) => Some(StatusReport::with_status(Starting)),
            (Starting, AcquisitionEvent::SetupComplete) => {
                Some(StatusReport::with_status(Processing))
            }
            (Starting | Processing, AcquisitionEvent::StopRequested) => {
                Some(StatusReport::with_status(Finishing))
            }
            (Finishing, AcquisitionEvent::DrainComplete) => Some(StatusReport::ready()),

            // Faults from any state
            (_, AcquisitionEvent::Fault(fault)) => Some(StatusReport {
                status: Error,
                fault: Some(fault),
            }),

            (Error, AcquisitionEvent::RecoveryFailed) => {
                let fault = self.report.fault.as_ref()?;
                if !fault.recoverable {
                    return None;
                }
                Some(StatusReport {
                    status: Error,
                    fault: Some(StatusFault {
                        recoverable: false,
                        ..fault.clone()
                    }),
                })
            }
            (Error, AcquisitionEvent::Recovered) => Some(StatusReport::ready()),

            // Invalid transition - stay in current state
            _ => None,
        }
    }
}

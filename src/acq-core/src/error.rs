// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Error taxonomy surfaced to callers of the acquisition control surface.
//!
//! Disk exhaustion and hardware faults are deliberately absent: they never
//! fail a call, they stop the active run through a `StopTrigger` instead.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Machine-readable error class carried next to the message on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Precondition,
    Validation,
    DeviceNotReady,
    NotFound,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AcquisitionError {
    /// The request is valid but not allowed in the current state.
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// Malformed or contradictory options; rejected without a state change.
    #[error("invalid request: {0}")]
    Validation(String),

    /// Hardware did not become ready within policy.
    #[error("device not ready: {0}")]
    DeviceNotReady(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AcquisitionError {
    pub fn precondition(message: impl Into<String>) -> Self {
        Self::Precondition(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn device_not_ready(message: impl Into<String>) -> Self {
        Self::DeviceNotReady(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Precondition(_) => ErrorKind::Precondition,
            Self::Validation(_) => ErrorKind::Validation,
            Self::DeviceNotReady(_) => ErrorKind::DeviceNotReady,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// The bare message without the class prefix.
    pub fn message(&self) -> &str {
        match self {
            Self::Precondition(m)
            | Self::Validation(m)
            | Self::DeviceNotReady(m)
            | Self::NotFound(m)
            | Self::Internal(m) => m,
        }
    }
}

pub type AcquisitionResult<T> = Result<T, AcquisitionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_matches_variant() {
        assert_eq!(
            AcquisitionError::precondition("x").kind(),
            ErrorKind::Precondition
        );
        assert_eq!(
            AcquisitionError::device_not_ready("x").kind(),
            ErrorKind::DeviceNotReady
        );
        assert_eq!(AcquisitionError::not_found("x").kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_display_and_message() {
        let err = AcquisitionError::validation("scale factor must be positive");
        assert_eq!(err.to_string(), "invalid request: scale factor must be positive");
        assert_eq!(err.message(), "scale factor must be positive");
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::DeviceNotReady).unwrap();
        assert_eq!(json, "\"device_not_ready\"");
    }
}

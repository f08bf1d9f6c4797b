// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Client token checks for the control listener.

use std::collections::HashSet;

/// Strip a case-insensitive "Bearer " prefix and surrounding whitespace.
pub fn strip_bearer(value: &str) -> &str {
    let trimmed = value.trim();
    let prefix = "bearer ";
    match trimmed.get(..prefix.len()) {
        Some(head) if head.eq_ignore_ascii_case(prefix) => trimmed[prefix.len()..].trim_start(),
        _ => trimmed,
    }
}

/// Decides whether a request may reach the acquisition controller.
pub trait TokenValidator: Send + Sync {
    fn validate(&self, token: Option<&str>) -> Result<(), String>;
}

/// Accepts any of a fixed set of tokens. An empty set disables the check.
#[derive(Debug, Clone, Default)]
pub struct SimpleTokenValidator {
    tokens: HashSet<String>,
}

impl SimpleTokenValidator {
    /// Blank entries are ignored.
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            tokens: tokens
                .into_iter()
                .map(|t| t.as_ref().trim().to_string())
                .filter(|t| !t.is_empty())
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl TokenValidator for SimpleTokenValidator {
    fn validate(&self, token: Option<&str>) -> Result<(), String> {
        if self.tokens.is_empty() {
            return Ok(());
        }
        match token.map(strip_bearer) {
            None | Some("") => Err("missing authorization token".into()),
            Some(candidate) if self.tokens.contains(candidate) => Ok(()),
            Some(_) => Err("invalid authorization token".into()),
        }
    }
}

/// Used when the listener runs without authentication.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAuthValidator;

impl TokenValidator for NoAuthValidator {
    fn validate(&self, _token: Option<&str>) -> Result<(), String> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_bearer() {
        assert_eq!(strip_bearer("Bearer abc123"), "abc123");
        assert_eq!(strip_bearer("bEaReR  xyz"), "xyz");
        assert_eq!(strip_bearer("  plain  "), "plain");
        assert_eq!(strip_bearer("bearer"), "bearer");
        assert_eq!(strip_bearer(""), "");
    }

    #[test]
    fn test_validator_accepts_known_tokens() {
        let validator = SimpleTokenValidator::new(["s3cret", "other"]);
        assert!(validator.validate(Some("s3cret")).is_ok());
        assert!(validator.validate(Some("Bearer other")).is_ok());
    }

    #[test]
    fn test_validator_rejects() {
        let validator = SimpleTokenValidator::new(["s3cret"]);
        assert_eq!(
            validator.validate(None).unwrap_err(),
            "missing authorization token"
        );
        assert_eq!(
            validator.validate(Some("   ")).unwrap_err(),
            "missing authorization token"
        );
        assert_eq!(
            validator.validate(Some("guess")).unwrap_err(),
            "invalid authorization token"
        );
    }

    #[test]
    fn test_blank_tokens_are_ignored() {
        let validator = SimpleTokenValidator::new(["", "  "]);
        assert!(validator.is_empty());
        assert!(validator.validate(None).is_ok());
    }

    #[test]
    fn test_no_auth_validator() {
        assert!(NoAuthValidator.validate(None).is_ok());
        assert!(NoAuthValidator.validate(Some("anything")).is_ok());
    }
}

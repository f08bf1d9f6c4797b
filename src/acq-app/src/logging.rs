// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Resolve a configured level name, falling back to INFO.
pub fn parse_level(log_level: Option<&str>) -> Level {
    log_level
        .and_then(|s| s.trim().parse::<Level>().ok())
        .unwrap_or(Level::INFO)
}

/// Install the global fmt subscriber. Call once at process start.
pub fn init_logging(log_level: Option<&str>) {
    FmtSubscriber::builder()
        .with_target(false)
        .with_max_level(parse_level(log_level))
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level(Some("debug")), Level::DEBUG);
        assert_eq!(parse_level(Some(" WARN ")), Level::WARN);
        assert_eq!(parse_level(Some("chatty")), Level::INFO);
        assert_eq!(parse_level(None), Level::INFO);
    }
}

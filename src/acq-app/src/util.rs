// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

/// Normalize a backend name to lowercase alphanumeric so that
/// "Simulated", "simulated" and "SIMULATED" all match.
pub fn normalize_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("Simulated"), "simulated");
        assert_eq!(normalize_name("MinION-Mk1C"), "minionmk1c");
        assert_eq!(normalize_name("replay_file"), "replayfile");
        assert_eq!(normalize_name(""), "");
    }
}

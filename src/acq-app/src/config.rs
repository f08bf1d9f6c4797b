// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const CONFIG_FILE_NAME: &str = "acq-rs.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    ReadError(PathBuf, String),

    #[error("Failed to parse config file {0}: {1}")]
    ParseError(PathBuf, String),

    #[error("Config file {0} has no [{1}] section")]
    MissingSection(PathBuf, &'static str),
}

/// Candidate locations for `acq-rs.toml`, most specific first.
pub fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from(CONFIG_FILE_NAME)];
    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join("acq-rs").join(CONFIG_FILE_NAME));
    }
    paths.push(PathBuf::from("/etc/acq-rs").join(CONFIG_FILE_NAME));
    paths
}

/// Parse `content` and deserialize the table under `key`.
fn parse_section<T: DeserializeOwned>(
    path: &Path,
    content: &str,
    key: &str,
) -> Result<Option<T>, ConfigError> {
    let parse_err = |e: &dyn std::fmt::Display| ConfigError::ParseError(path.to_path_buf(), e.to_string());

    let mut table: toml::Table = toml::from_str(content).map_err(|e| parse_err(&e))?;
    let Some(section) = table.remove(key) else {
        return Ok(None);
    };
    section.try_into::<T>().map(Some).map_err(|e| parse_err(&e))
}

fn read_section<T: DeserializeOwned>(path: &Path, key: &str) -> Result<Option<T>, ConfigError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::ReadError(path.to_path_buf(), e.to_string()))?;
    parse_section(path, &content, key)
}

/// A component configuration stored as one section of `acq-rs.toml`.
pub trait ConfigFile: Sized + Default + DeserializeOwned {
    /// Section key, e.g. `"acq-server"`.
    fn section_key() -> &'static str;

    /// Load the section from a specific file. A missing section is an error.
    fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        read_section::<Self>(path, Self::section_key())?
            .ok_or_else(|| ConfigError::MissingSection(path.to_path_buf(), Self::section_key()))
    }

    /// Load the first default-path file that has the section. Falls back to
    /// `Default` with no path when none does.
    fn load_from_default_paths() -> Result<(Self, Option<PathBuf>), ConfigError> {
        Self::load_from_paths(config_search_paths())
    }

    fn load_from_paths<I>(paths: I) -> Result<(Self, Option<PathBuf>), ConfigError>
    where
        I: IntoIterator<Item = PathBuf>,
    {
        for path in paths {
            if !path.is_file() {
                continue;
            }
            if let Some(cfg) = read_section::<Self>(&path, Self::section_key())? {
                return Ok((cfg, Some(path)));
            }
        }
        Ok((Self::default(), None))
    }
}

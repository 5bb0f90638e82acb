// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::Result;

/// Read and deserialize a config file without semantic validation.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let contents = fs::read_to_string(path.as_ref())?;
    load_from_str(&contents)
}

pub fn load_from_str(contents: &str) -> Result<RawConfigFile> {
    let config: RawConfigFile = toml::from_str(contents)?;
    Ok(config)
}

/// Load a config file and validate it.
///
/// - Reads TOML.
/// - Applies defaults (`serde` + `Default` impls).
/// - Checks scheduler sanity, schedule id uniqueness, cron expressions and
///   every schedule's task graph.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ConfigFile> {
    let raw_config = load_from_path(&path)?;
    ConfigFile::try_from(raw_config)
}

/// `Jobtree.toml` in the current working directory.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("Jobtree.toml")
}

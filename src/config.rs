//! Runtime configuration.
//!
//! Loaded from a small TOML file with `[compat]` and `[limits]` tables;
//! every field has a default so an empty file (or no file) is valid.

use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Switches replicating legacy arithmetic quirks.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default)]
pub struct Compat {
    /// Compute the divide overflow through a signed 32-bit intermediate.
    /// Changes results for dividends of 0x8000 and above; leave off
    /// unless bit-for-bit parity with legacy output matters.
    pub signed_divide: bool,
}

/// Bounds on the dispatch loop.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Stop after this many dispatched chunks. Unset means run until
    /// the program pins its own PC.
    pub max_chunks: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub compat: Compat,
    pub limits: Limits,
}

impl Config {
    /// Load a configuration file.
    pub fn load(path: &Path) -> Result<Config, String> {
        let text = fs::read_to_string(path)
            .map_err(|e| format!("cannot read config {}: {}", path.display(), e))?;
        toml::from_str(&text).map_err(|e| format!("cannot parse config {}: {}", path.display(), e))
    }
}

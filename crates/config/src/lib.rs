// OOMDump - Fatal Heap Snapshot Writer
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Chunk size advertised to the snapshot serializer when none is configured.
pub const DEFAULT_CHUNK_SIZE: usize = 65536;

pub const DEFAULT_FILE_PREFIX: &str = "heapdump";

pub const DEFAULT_EXIT_CODE: i32 = 1;

/// How the snapshot filename is derived from the wall-clock time of the fatal event.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FilenamePolicy {
    /// `<prefix>-<secs>.<micros>.heapsnapshot`, seconds and microseconds since the epoch.
    #[default]
    EpochMicros,
    /// `<prefix>-<YYYYMMDD>-<HHMMSS>.<micros>.heapsnapshot` in local time.
    LocalTime,
}

#[derive(Debug, thiserror::Error)]
#[error("unknown filename policy '{0}' (expected 'epoch_micros' or 'local_time')")]
pub struct UnknownPolicy(String);

impl FromStr for FilenamePolicy {
    type Err = UnknownPolicy;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "epoch_micros" | "epoch" => Ok(Self::EpochMicros),
            "local_time" | "local" => Ok(Self::LocalTime),
            other => Err(UnknownPolicy(other.to_string())),
        }
    }
}

impl fmt::Display for FilenamePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EpochMicros => write!(f, "epoch_micros"),
            Self::LocalTime => write!(f, "local_time"),
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_file_prefix() -> String {
    DEFAULT_FILE_PREFIX.to_string()
}

fn default_chunk_size() -> String {
    "64KiB".to_string()
}

fn default_exit_code() -> i32 {
    DEFAULT_EXIT_CODE
}

/// Settings for the fatal-error heap dump.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct HookConfig {
    /// Directory the snapshot file is created in (default: working directory)
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default)]
    pub filename_policy: FilenamePolicy,
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,
    /// Preferred serializer chunk size, e.g. "64KiB"
    #[serde(default = "default_chunk_size")]
    pub chunk_size: String,
    /// Exit status of the process after the dump. Must be non-zero.
    #[serde(default = "default_exit_code")]
    pub exit_code: i32,
}

impl Default for HookConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            filename_policy: FilenamePolicy::default(),
            file_prefix: default_file_prefix(),
            chunk_size: default_chunk_size(),
            exit_code: default_exit_code(),
        }
    }
}

impl HookConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let f = std::fs::File::open(&path)
            .with_context(|| format!("Failed to open hook config at {:?}", path.as_ref()))?;
        let config: Self =
            serde_yaml::from_reader(f).context("Failed to parse hook config YAML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size_bytes()? == 0 {
            anyhow::bail!("'chunk_size' must be greater than zero");
        }

        if self.exit_code == 0 {
            anyhow::bail!("'exit_code' must be non-zero: a fatal condition is never survived");
        }

        if self.file_prefix.trim().is_empty() {
            anyhow::bail!("'file_prefix' cannot be empty");
        }

        if self.file_prefix.contains(['/', '\\']) {
            anyhow::bail!(
                "'file_prefix' must not contain path separators (got '{}')",
                self.file_prefix
            );
        }

        Ok(())
    }

    pub fn chunk_size_bytes(&self) -> Result<usize> {
        let bytes = parse_size(&self.chunk_size)
            .with_context(|| format!("Invalid 'chunk_size' value '{}'", self.chunk_size))?;
        usize::try_from(bytes).context("'chunk_size' does not fit in memory")
    }
}

pub fn parse_size(size_str: &str) -> Result<u64> {
    use human_size::{Byte, Size, SpecificSize};
    let s: Size = size_str
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid size format: {}", e))?;
    let bytes: SpecificSize<Byte> = s.into();
    Ok(bytes.value() as u64)
}

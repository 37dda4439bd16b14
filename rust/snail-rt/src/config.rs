//! Runtime configuration parsed from `snail.toml`.
//!
//! `discover()` searches the current directory then its ancestors and falls
//! back to defaults when no file is found.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::arena::{blocks_for, Arena, ArenaError, DEFAULT_CAPACITY_BLOCKS};

pub const CONFIG_FILE_NAME: &str = "snail.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid toml: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub arena: ArenaConfig,
    #[serde(default)]
    pub exec: ExecConfig,
}

/// Arena sizing. At most one of the two fields may be set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArenaConfig {
    pub capacity_blocks: Option<usize>,
    pub capacity_bytes: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecConfig {
    /// Maximum instructions per run; unlimited when absent.
    pub instruction_limit: Option<u64>,
}

impl ArenaConfig {
    pub fn with_blocks(blocks: usize) -> Self {
        Self {
            capacity_blocks: Some(blocks),
            capacity_bytes: None,
        }
    }

    /// Effective capacity in blocks.
    pub fn blocks(&self) -> usize {
        match (self.capacity_blocks, self.capacity_bytes) {
            (Some(blocks), _) => blocks,
            (None, Some(bytes)) => blocks_for(bytes),
            (None, None) => DEFAULT_CAPACITY_BLOCKS,
        }
    }

    pub fn build(&self) -> Result<Arena, ArenaError> {
        Arena::new(self.blocks())
    }
}

impl RuntimeConfig {
    pub fn from_toml_str(src: &str) -> Result<Self, ConfigError> {
        let cfg: Self = toml::from_str(src)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load config from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let cfg = Self::from_toml_str(&content)?;
        debug!(path = %path.display(), "loaded runtime config");
        Ok(cfg)
    }

    /// Find `snail.toml` in the current directory or an ancestor.
    pub fn find() -> Option<PathBuf> {
        let start = std::env::current_dir().ok()?;
        Self::find_from(&start)
    }

    pub fn find_from(start: &Path) -> Option<PathBuf> {
        start
            .ancestors()
            .map(|dir| dir.join(CONFIG_FILE_NAME))
            .find(|candidate| candidate.is_file())
    }

    /// Load the nearest `snail.toml`, or defaults when there is none.
    pub fn discover() -> Result<Self, ConfigError> {
        match Self::find() {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.arena.capacity_blocks.is_some() && self.arena.capacity_bytes.is_some() {
            return Err(ConfigError::Invalid(
                "arena.capacity_blocks and arena.capacity_bytes are mutually exclusive".into(),
            ));
        }
        if self.arena.blocks() == 0 {
            return Err(ConfigError::Invalid("arena capacity must be > 0".into()));
        }
        if self.exec.instruction_limit == Some(0) {
            return Err(ConfigError::Invalid(
                "exec.instruction_limit must be > 0".into(),
            ));
        }
        Ok(())
    }
}

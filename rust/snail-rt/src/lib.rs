//! Snail RT: the fixed-capacity block arena backing every heap value the VM
//! creates, and runtime configuration loaded from `snail.toml`.
#![warn(clippy::all)]

pub mod arena;
pub mod config;

pub use arena::{
    blocks_for, ABlk, ALink, ARef, ASlice, Arena, ArenaError, BlockAddr, BLOCK_SIZE,
    DEFAULT_CAPACITY_BLOCKS,
};
pub use config::{ArenaConfig, ConfigError, ExecConfig, RuntimeConfig, CONFIG_FILE_NAME};

//! Command-line driver for the crmsync calendar mirror.
//!
//! This crate provides the `crmsync` binary: it reads `config.toml`, opens
//! the SQLite mirror and drives the channel manager and sync engine.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;

pub use cli::Cli;
pub use config::CrmsyncConfig;
pub use error::{CliError, CliResult};

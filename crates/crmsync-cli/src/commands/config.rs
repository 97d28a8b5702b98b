//! Configuration commands.

use std::path::Path;

use crate::config::CrmsyncConfig;
use crate::error::{CliError, CliResult};

/// Dumps the effective configuration. Secret references are printed as
/// written, never resolved; literal secrets are masked.
pub fn dump(config: &CrmsyncConfig, source: &Path) -> CliResult<()> {
    let toml_str = toml::to_string_pretty(&config.redacted())
        .map_err(|e| CliError::config(format!("failed to serialize config: {}", e)))?;
    println!("# config.toml ({})", source.display());
    println!("{}", toml_str);
    Ok(())
}

/// Checks every setting a connected command would need.
pub fn validate(config: &CrmsyncConfig) -> CliResult<()> {
    let engine = config.engine_config()?;
    println!("webhook: {}", engine.webhook_address);

    #[cfg(feature = "google")]
    {
        config.google_config()?;
        println!("Google credentials resolved.");
    }

    println!("Configuration is valid.");
    Ok(())
}

/// Shows the configuration file and database paths.
pub fn path(config: &CrmsyncConfig, source: &Path) -> CliResult<()> {
    println!("config: {}", source.display());
    println!("store:  {}", config.store_path().display());
    Ok(())
}

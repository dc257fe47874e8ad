//! Print the effective configuration.

use anyhow::Result;

use crate::config::CliConfig;

/// Run the config command.
pub fn run(config: &CliConfig) -> Result<String> {
    config.to_toml()
}

//! Command handlers: bridge CLI args -> core operations -> output formatting.

pub mod config_cmd;
pub mod ctl;
pub mod discover;
pub mod run;

use fanfleet_config::Config;

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// Load the config named by `--config`, or the platform default.
pub fn load_config(global: &GlobalOpts) -> Result<Config, CliError> {
    Ok(fanfleet_config::load_config(global.config.as_deref())?)
}

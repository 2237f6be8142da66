use fanfleet_config::Config;

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::error::CliError;
use crate::output;

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let path = global
        .config
        .clone()
        .unwrap_or_else(fanfleet_config::config_path);

    let out = match args.command {
        ConfigCommand::Path => path.display().to_string(),

        ConfigCommand::Show => {
            let cfg = fanfleet_config::load_config(Some(&path))?.redacted();
            // Table and plain modes print the effective config as TOML.
            let toml = cfg.to_toml()?;
            output::render_single(global.output, &cfg, |_| toml.clone())
        }

        ConfigCommand::Init { force } => {
            if path.exists() && !force {
                return Err(CliError::ConfigExists {
                    path: path.display().to_string(),
                });
            }
            fanfleet_config::save_config(&Config::default(), &path)?;
            format!("Wrote default config to {}", path.display())
        }
    };

    output::print_output(&out, global.quiet);
    Ok(())
}

//! Config command implementation.

use anyhow::Result;

use mediaferry_core::config::Config;

use super::{with_hint, ConfigAction, ConfigArgs};

/// Run the config command.
pub fn run(args: &ConfigArgs) -> Result<()> {
    match args.action {
        ConfigAction::Path => {
            println!("{}", Config::config_path().display());
        }
        ConfigAction::Show => {
            let config = super::load_config();
            println!("# {}", Config::config_path().display());
            println!("# data dir: {}", config.data_dir().display());
            println!();
            print!("{}", toml::to_string_pretty(&config)?);
        }
        ConfigAction::Init { force } => {
            let path = Config::config_path();
            if path.exists() && !force {
                anyhow::bail!(
                    "{} already exists (use --force to overwrite)",
                    path.display()
                );
            }
            Config::default().save().map_err(with_hint)?;
            println!("Wrote default configuration to {}", path.display());
        }
    }
    Ok(())
}

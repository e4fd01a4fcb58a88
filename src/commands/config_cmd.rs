use clap::{Args, Subcommand};

use super::{CommandError, OutputFormat};
use crate::config::{mask_key, Config};

#[derive(Args)]
pub struct ConfigCommand {
    #[command(subcommand)]
    pub command: ConfigSubcommand,
}

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Show current configuration values
    Show {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

impl ConfigCommand {
    pub fn run(&self, config: &Config) -> Result<(), CommandError> {
        match &self.command {
            ConfigSubcommand::Show { format } => {
                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(config)?);
                    }
                    OutputFormat::Text => {
                        println!("Configuration");
                        println!("=============\n");

                        if let Some(path) = &config.config_file {
                            println!("Config file: {}", path.display());
                        } else {
                            println!(
                                "Config file: {} (not found)",
                                Config::default_config_path().display()
                            );
                        }
                        println!();

                        println!("data_dir: {}", config.data_dir.value.display());
                        println!("  source: {}", config.data_dir.source);
                        println!();

                        match &config.catalog_path.value {
                            Some(path) => println!("catalog_path: {}", path.display()),
                            None => println!("catalog_path: (built-in)"),
                        }
                        println!("  source: {}", config.catalog_path.source);
                        println!();

                        println!("server:");
                        match &config.server.url {
                            Some(url) => println!("  url: {}", url),
                            None => println!("  url: (not set, favorites stay on this device)"),
                        }
                        match &config.server.api_key {
                            Some(key) => println!("  api_key: {}", mask_key(key)),
                            None => println!("  api_key: (not set)"),
                        }
                        println!("  sync_timeout: {}s", config.server.sync_timeout);
                    }
                }
                Ok(())
            }
        }
    }
}

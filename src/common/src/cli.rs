use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// CLI arguments shared by every mediasweep command
#[derive(Parser, Debug, Clone)]
pub struct CommonArgs {
    #[arg(long, global = true, help = "Configuration file path")]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true, help = "Enable verbose logging")]
    pub verbose: bool,

    #[arg(short, long, global = true, help = "Enable quiet mode (minimal output)")]
    pub quiet: bool,
}

/// Subcommands that only need the configuration
#[derive(Subcommand, Debug, Clone, Default)]
pub enum CommonCommands {
    /// Start the background worker (default behavior)
    #[default]
    Start,
    /// Show current configuration and exit
    Config {
        #[arg(long, help = "Show configuration in JSON format")]
        json: bool,
    },
    /// Validate configuration and exit
    Validate,
    /// Show version information and exit
    Version,
}

/// Utility functions for CLI operations
pub mod utils {
    use super::*;
    use crate::config::Configuration;
    use anyhow::{Context, Result};
    use tracing_subscriber::EnvFilter;

    /// Default log level implied by the CLI flags.
    pub fn log_level(args: &CommonArgs) -> &'static str {
        if args.quiet {
            "warn"
        } else if args.verbose {
            "debug"
        } else {
            "info"
        }
    }

    /// Initialize logging; `RUST_LOG` wins over the CLI flags when set.
    pub fn init_logging(args: &CommonArgs) {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(log_level(args)));

        if let Err(e) = tracing_subscriber::fmt().with_env_filter(filter).try_init() {
            eprintln!("Logging already initialized: {e}");
        }
    }

    /// Load configuration with optional override from CLI
    pub fn load_config(config_path: Option<&PathBuf>) -> Result<Configuration> {
        match config_path {
            Some(path) => {
                log::info!("Loading configuration from: {}", path.display());
                Configuration::load_from_path(path).context("Failed to load configuration")
            }
            None => Configuration::load().context("Failed to load configuration"),
        }
    }

    /// Display configuration in human-readable or JSON format
    pub fn display_config(config: &Configuration, json: bool) -> Result<()> {
        if json {
            let json = serde_json::to_string_pretty(config)
                .context("Failed to serialize configuration to JSON")?;
            println!("{json}");
        } else {
            println!("mediasweep configuration:");
            println!("=========================");
            println!("Database DSN: {}", config.database.dsn);
            println!("Uploads directory: {}", config.database.uploads_dir.display());

            let scan = &config.scan;
            println!(
                "Scans: content-regex={} filename={} postmeta-id={} postmeta-url={}",
                scan.content_regex, scan.filename_like, scan.postmeta_id, scan.postmeta_url
            );
            println!(
                "Deep scans: termmeta-url={} options-url={} comments-url={}",
                scan.termmeta_url, scan.options_url, scan.comments_url
            );
            println!("Background processing: {}", scan.background_processing);
            if scan.allowed_post_types.is_empty() {
                println!("Post types: all but revision, nav_menu_item, attachment");
            } else {
                println!("Post types: {}", scan.allowed_post_types.join(", "));
            }
            println!("Protected media: {:?}", scan.protected_media_ids);

            let queue = &config.queue;
            println!(
                "Queue: batch {} / budget {:?} / lock ttl {:?}",
                queue.batch_size, queue.time_budget, queue.lock_ttl
            );
            println!(
                "Queue delays: initial {:?} / contention {:?} / continue {:?} / fallback {:?}",
                queue.initial_delay,
                queue.contention_delay,
                queue.continue_delay,
                queue.fallback_interval
            );
            println!("Schedule poll interval: {:?}", queue.schedule_poll_interval);
            println!(
                "Run now: budget {:?} / max {} drains",
                queue.run_now_budget, queue.run_now_max_iterations
            );
            println!("Notice TTL: {:?}", config.notices.ttl);
        }
        Ok(())
    }

    /// Validate configuration and report any issues
    pub fn validate_config(config: &Configuration) -> Result<()> {
        log::info!("Validating configuration...");
        config.validate()?;
        log::info!("Configuration validation passed");
        Ok(())
    }

    /// Handle commands that don't require the store; returns whether the
    /// command was handled.
    pub async fn handle_common_command(
        command: &CommonCommands,
        config: &Configuration,
    ) -> Result<bool> {
        match command {
            CommonCommands::Config { json } => {
                display_config(config, *json)?;
                Ok(true)
            }
            CommonCommands::Validate => {
                validate_config(config)?;
                Ok(true)
            }
            CommonCommands::Version => {
                println!("{}", version_info());
                Ok(true)
            }
            CommonCommands::Start => Ok(false),
        }
    }

    /// Standard version information
    pub fn version_info() -> String {
        format!(
            "{} {} ({})",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
            env!("CARGO_PKG_RUST_VERSION")
        )
    }
}

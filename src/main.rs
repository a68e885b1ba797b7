//! CLI entry point of the device runtime.
//!
//! # Usage
//!
//! Start the configured devices and the operator console:
//! ```bash
//! nds --config config/nds.toml run
//! ```
//!
//! Check a configuration without creating anything:
//! ```bash
//! nds --config config/nds.toml check
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use rust_nds::config::{NdsConfig, DEFAULT_CONFIG_PATH};
use rust_nds::core::DeviceDriver;
use rust_nds::tracing_init;
use rust_nds::App;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "nds")]
#[command(about = "Device runtime with a mock control system", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, short, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the configured devices and run the console until `quit`
    Run {
        /// Arguments handed to the control system
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Load and validate the configuration, then list the devices it creates
    Check {
        /// Print the merged configuration instead of a summary
        #[arg(long, value_enum)]
        dump: Option<DumpFormat>,
    },

    /// List the registered device drivers
    Drivers,
}

#[derive(Clone, Copy, ValueEnum)]
enum DumpFormat {
    Toml,
    Json,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = NdsConfig::load_from(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;
    tracing_init::init_from_config(&config)?;
    tracing::info!(application = %config.application.name, config = %cli.config.display(), "starting");

    match cli.command {
        Commands::Run { args } => run(&config, &args),
        Commands::Check { dump } => check(&config, dump),
        Commands::Drivers => drivers(&config),
    }
}

fn run(config: &NdsConfig, args: &[String]) -> Result<()> {
    let app = App::start(config)?;
    let outcome = app.run(args);
    app.shutdown()?;
    outcome
}

fn check(config: &NdsConfig, dump: Option<DumpFormat>) -> Result<()> {
    config.validate()?;
    match dump {
        Some(DumpFormat::Toml) => {
            print!("{}", toml::to_string_pretty(config)?);
            return Ok(());
        }
        Some(DumpFormat::Json) => {
            println!("{}", serde_json::to_string_pretty(config)?);
            return Ok(());
        }
        None => {}
    }
    println!("configuration is valid");
    if let Some(path) = &config.naming.rules_file {
        println!("naming rules: {} [{}]", path.display(), config.naming.section);
    }
    for device in &config.devices {
        println!("device {} (driver {})", device.name, device.driver);
        for (key, value) in &device.parameters {
            println!("  {key} = {value}");
        }
    }
    Ok(())
}

fn drivers(config: &NdsConfig) -> Result<()> {
    let app = App::start(&NdsConfig {
        devices: Vec::new(),
        ..config.clone()
    })?;
    for name in app.registry().driver_names() {
        let description = app.registry().driver(&name)?.description().to_string();
        println!("{name}: {description}");
    }
    app.shutdown()
}

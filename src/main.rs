//! `lab-instruments`: talk to configured instruments from the command line.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;

use lab_instruments::config::{Settings, DEFAULT_CONFIG_PATH};
use lab_instruments::core::Driver;
use lab_instruments::logging;
use lab_instruments::parameter::ParamValue;
use lab_instruments::registry::open_instrument;

/// Laboratory instrument drivers
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Cli {
    /// Configuration file
    #[clap(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log level (overrides application.log_level)
    #[clap(long, global = true)]
    log_level: Option<String>,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List configured instruments
    List,
    /// Show an instrument's parameters and functions
    Params {
        /// Instrument id
        id: String,
    },
    /// Read a parameter
    Get {
        /// Instrument id
        id: String,
        /// Parameter name
        param: String,
    },
    /// Set a parameter
    Set {
        /// Instrument id
        id: String,
        /// Parameter name
        param: String,
        /// New value (number, true/false, or text)
        value: String,
    },
    /// Call a function
    Call {
        /// Instrument id
        id: String,
        /// Function name
        function: String,
        /// Arguments
        args: Vec<String>,
    },
    /// Send a raw query and print the reply
    Ask {
        /// Instrument id
        id: String,
        /// Command text, without terminator
        command: String,
    },
    /// Send a raw command
    Write {
        /// Instrument id
        id: String,
        /// Command text, without terminator
        command: String,
    },
    /// Read every parameter and print JSON
    Snapshot {
        /// Instrument id
        id: String,
    },
}

impl Command {
    fn instrument_id(&self) -> Option<&str> {
        match self {
            Command::List => None,
            Command::Params { id }
            | Command::Get { id, .. }
            | Command::Set { id, .. }
            | Command::Call { id, .. }
            | Command::Ask { id, .. }
            | Command::Write { id, .. }
            | Command::Snapshot { id } => Some(id),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::load_from(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;
    if let Some(level) = &cli.log_level {
        settings.application.log_level = level.clone();
    }
    logging::init_from_config(&settings.application)
        .map_err(|e| anyhow!("Failed to initialise logging: {}", e))?;
    debug!("Loaded {} instrument(s) from {}", settings.instruments.len(), cli.config.display());

    let Some(id) = cli.command.instrument_id() else {
        list(&settings);
        return Ok(());
    };

    let definition = settings
        .instrument(id)
        .ok_or_else(|| anyhow!("No instrument '{}' in {}", id, cli.config.display()))?;
    let driver = open_instrument(definition, &settings.timeouts)
        .await
        .with_context(|| format!("Failed to open instrument '{}'", id))?;

    run(driver.as_ref(), &cli.command).await
}

fn list(settings: &Settings) {
    for instrument in &settings.instruments {
        println!(
            "{:<16} {:<18} {}{}",
            instrument.id,
            instrument.driver,
            transport_summary(&instrument.transport),
            if instrument.enabled { "" } else { " (disabled)" }
        );
    }
}

fn transport_summary(transport: &lab_instruments::config::TransportConfig) -> String {
    use lab_instruments::config::TransportConfig;
    match transport {
        TransportConfig::Tcp { host, port } => format!("tcp {}:{}", host, port),
        TransportConfig::Serial { port, .. } => format!("serial {}", port),
        TransportConfig::Visa { resource } => format!("visa {}", resource),
        TransportConfig::Mock { .. } => "mock".to_string(),
    }
}

async fn run(driver: &dyn Driver, command: &Command) -> Result<()> {
    match command {
        Command::List => {}
        Command::Params { .. } => {
            println!("{} ({})", driver.id(), driver.model());
            for p in driver.parameters() {
                let access = match (p.gettable, p.settable) {
                    (true, true) => "rw",
                    (true, false) => "r",
                    _ => "w",
                };
                println!("  {:<16} {:<3} {:<6} {}", p.name, access, p.unit, p.label);
            }
            for f in driver.functions() {
                println!("  {}({})  {}", f.name, f.args.join(", "), f.docstring);
            }
        }
        Command::Get { param, .. } => {
            let value = driver.get(param).await?;
            println!("{}", value);
        }
        Command::Set { param, value, .. } => {
            driver.set(param, ParamValue::parse_cli(value)).await?;
        }
        Command::Call { function, args, .. } => {
            let args: Vec<ParamValue> = args.iter().map(|a| ParamValue::parse_cli(a)).collect();
            if let Some(result) = driver.call(function, &args).await? {
                println!("{}", result);
            }
        }
        Command::Ask { command, .. } => {
            println!("{}", driver.connection().ask(command).await?);
        }
        Command::Write { command, .. } => {
            driver.connection().write(command).await?;
        }
        Command::Snapshot { .. } => {
            let snapshot = driver.snapshot().await?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
    }
    Ok(())
}

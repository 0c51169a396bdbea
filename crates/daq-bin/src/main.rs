//! `stm100`: manual operation and smoke testing of a Sycon STM-100.
//!
//! ```bash
//! stm100 --port /dev/ttyUSB0 get thickness
//! stm100 --simulate set density 19.32
//! RUST_LOG=daq_driver_sycon::frame=trace stm100 query S
//! ```

use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use daq_driver_sycon::attributes::{self, WriteRule};
use daq_driver_sycon::{
    SimulatedStm100, Stm100Config, Stm100Driver, ZeroTarget, ATTRIBUTES,
};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// STM-100 CLI
#[derive(Parser, Debug)]
#[command(
    name = "stm100",
    version,
    about = "Sycon STM-100 thickness monitor control",
    long_about = None
)]
struct Cli {
    /// Configuration file (default: config/stm100.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Serial port or VISA resource, overrides the configuration
    #[arg(short, long, global = true)]
    port: Option<String>,

    /// Baud rate, overrides the configuration
    #[arg(long, global = true)]
    baud: Option<u32>,

    /// Per-call timeout in milliseconds, overrides the configuration
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    /// Talk to an in-memory controller instead of a serial port
    #[arg(long, global = true)]
    simulate: bool,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the controller model string
    Identify,

    /// Print the attribute table
    List,

    /// Read one attribute
    Get {
        /// Attribute name (see `list`)
        attribute: String,
    },

    /// Write one attribute
    Set {
        /// Attribute name (see `list`)
        attribute: String,
        /// Number, or on/off/true/false for switches
        #[arg(allow_hyphen_values = true)]
        value: String,
    },

    /// Print the nine saved film slots
    Films,

    /// Zero thickness and/or timer
    Zero {
        /// both, thickness or timer
        #[arg(default_value = "both")]
        target: ZeroTarget,
    },

    /// Print the power-on status bits
    PowerOn {
        /// Clear the bits after printing them
        #[arg(long)]
        ack: bool,
    },

    /// Send a raw command and print the reply
    Query {
        /// Command text, at most 10 bytes
        command: String,
    },

    /// Poll thickness, rate and timer
    Monitor {
        /// Polling interval
        #[arg(long, default_value = "1000")]
        interval_ms: u64,
        /// Number of samples (0 = until interrupted)
        #[arg(long, default_value = "0")]
        count: u64,
    },

    /// Print the effective configuration as TOML
    ShowConfig,
}

#[derive(Serialize)]
struct ConfigFile<'a> {
    stm100: &'a Stm100Config,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// File and environment, then command-line flags.
fn effective_config(cli: &Cli) -> Result<Stm100Config> {
    let mut config = match &cli.config {
        Some(path) => Stm100Config::load_from(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => Stm100Config::load().context("Failed to load configuration")?,
    };

    if let Some(port) = &cli.port {
        config.port = port.clone();
    }
    if let Some(baud) = cli.baud {
        config.baud_rate = baud;
    }
    if let Some(timeout_ms) = cli.timeout_ms {
        config.timeout_ms = timeout_ms;
    }
    config.validate().context("Invalid command-line override")?;
    Ok(config)
}

fn connect(cli: &Cli) -> Result<Stm100Driver> {
    if cli.simulate {
        info!("Using simulated STM-100");
        return Ok(Stm100Driver::with_transport(SimulatedStm100::new()));
    }

    let config = effective_config(cli)?;
    Stm100Driver::from_config(&config)
        .with_context(|| format!("Failed to open STM-100 on {}", config.port))
}

fn print_table() {
    println!(
        "{:<18} {:<9} {:<6} {:<5} {:<22} description",
        "name", "kind", "unit", "read", "write"
    );
    for spec in ATTRIBUTES.iter() {
        let write = match spec.write {
            WriteRule::ReadOnly => "-".to_string(),
            WriteRule::Numeric {
                prefix,
                range: Some((min, max)),
                ..
            } => format!("{}<n> [{}, {}]", prefix, min, max),
            WriteRule::Numeric { prefix, .. } => format!("{}<n>", prefix),
            WriteRule::Switch { prefix } => format!("{}! / {}@", prefix, prefix),
        };
        println!(
            "{:<18} {:<9} {:<6} {:<5} {:<22} {}",
            spec.name,
            spec.kind.to_string(),
            spec.unit.unwrap_or("-"),
            spec.read,
            write,
            spec.description
        );
    }
}

fn run(cli: &Cli) -> Result<()> {
    match &cli.command {
        Commands::List => {
            print_table();
            return Ok(());
        }
        Commands::ShowConfig => {
            let config = effective_config(cli)?;
            print!("{}", toml::to_string_pretty(&ConfigFile { stm100: &config })?);
            return Ok(());
        }
        _ => {}
    }

    let mut qcm = connect(cli)?;

    match &cli.command {
        Commands::Identify => println!("{}", qcm.identify()?),
        Commands::Get { attribute } => {
            let spec = attributes::require(attribute)?;
            let value = qcm.read_attribute(spec.name)?;
            println!("{} = {} {}", spec.name, value, spec.unit.unwrap_or(""));
        }
        Commands::Set { attribute, value } => {
            let spec = attributes::require(attribute)?;
            let parsed = spec.parse_input(value)?;
            qcm.write_attribute(spec.name, &parsed)
                .with_context(|| format!("Failed to set {}", spec.name))?;
            println!("{} = {}", spec.name, parsed);
        }
        Commands::Films => {
            println!("slot  density  zfactor  tooling");
            for film in qcm.films()? {
                println!(
                    "{:>4}  {:>7.3}  {:>7.3}  {:>7.1}",
                    film.slot, film.density, film.zfactor, film.tooling
                );
            }
        }
        Commands::Zero { target } => {
            qcm.zero(*target)?;
            println!("zeroed {}", target);
        }
        Commands::PowerOn { ack } => {
            let status = qcm.power_on_status()?;
            println!("{}", status);
            if *ack {
                qcm.acknowledge_power_on_status()?;
                println!("acknowledged");
            }
        }
        Commands::Query { command } => {
            let response = qcm.exchange(command)?;
            let status = response
                .status()
                .map_or_else(|| "-".to_string(), |c| c.to_string());
            println!("status={} body={:?}", status, response.body());
            if !response.checksum_ok() {
                println!(
                    "checksum mismatch: received {:#04x}, expected {:#04x}",
                    response.received_checksum(),
                    response.expected_checksum()
                );
            }
        }
        Commands::Monitor { interval_ms, count } => {
            if *interval_ms == 0 {
                bail!("--interval-ms must be greater than 0");
            }
            let mut sample = 0u64;
            while *count == 0 || sample < *count {
                let thickness = qcm.thickness()?;
                let rate = qcm.rate()?;
                let timer = match qcm.timer()? {
                    Some(elapsed) => format!("{}s", elapsed.as_secs()),
                    None => "overflow".to_string(),
                };
                println!(
                    "thickness={:.1} Å rate={:.2} Å/s timer={} health={}",
                    thickness,
                    rate,
                    timer,
                    qcm.health()
                );
                sample += 1;
                if *count != 0 && sample >= *count {
                    break;
                }
                thread::sleep(Duration::from_millis(*interval_ms));
            }
        }
        Commands::List | Commands::ShowConfig => {}
    }

    qcm.close()?;
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    run(&cli)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use std::time::Instant;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_set_with_global_flags() {
        let cli = Cli::parse_from(["stm100", "set", "density", "8.9", "--simulate", "-v"]);
        assert!(cli.simulate);
        assert!(cli.verbose);
        match cli.command {
            Commands::Set { attribute, value } => {
                assert_eq!(attribute, "density");
                assert_eq!(value, "8.9");
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_zero_target_defaults_to_both() {
        let cli = Cli::parse_from(["stm100", "zero"]);
        assert!(matches!(
            cli.command,
            Commands::Zero {
                target: ZeroTarget::Both
            }
        ));
        assert!(Cli::try_parse_from(["stm100", "zero", "rate"]).is_err());
    }

    #[test]
    fn test_simulated_session_commands() {
        let cli = Cli::parse_from(["stm100", "--simulate", "films"]);
        run(&cli).unwrap();

        let cli = Cli::parse_from(["stm100", "--simulate", "set", "shutter", "on"]);
        run(&cli).unwrap();

        let cli = Cli::parse_from(["stm100", "--simulate", "set", "setpoint", "-1"]);
        assert!(run(&cli).is_err());
    }

    #[test]
    fn test_monitor_returns_after_last_sample() {
        let cli = Cli::parse_from([
            "stm100",
            "--simulate",
            "monitor",
            "--count",
            "1",
            "--interval-ms",
            "60000",
        ]);
        let started = Instant::now();
        run(&cli).unwrap();
        assert!(started.elapsed() < Duration::from_secs(30));

        let cli = Cli::parse_from(["stm100", "--simulate", "monitor", "--interval-ms", "0"]);
        assert!(run(&cli).is_err());
    }
}

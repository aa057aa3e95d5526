//! Loggerlink - capture labelled sensor sessions from the data logger
//!
//! Runs an interactive shell by default; `capture` and `status` serve
//! automation, `list-ports` helps find the device.

use anyhow::Context;
use clap::{Parser, Subcommand};
use loggerlink_core::cli::{print_exit_codes, run_capture, CliResult, ExitCodes, OutputFormat, Shell, StdinLineReader};
use loggerlink_core::config::AppConfig;
use loggerlink_core::core::logger::CsvFileSink;
use loggerlink_core::core::session::CaptureEngine;
use loggerlink_core::core::simulator::SimulatedLogger;
use loggerlink_core::core::transport::{LineTransport, SerialConfig, SerialTransport};
use loggerlink_core::utils::{available_ports, init_tracing, select_port, PortEntry, Verbosity};
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

/// Loggerlink CLI
#[derive(Parser, Debug)]
#[command(
    name = "loggerlink",
    version,
    about = "Capture labelled sensor sessions from a serial data logger",
    long_about = None
)]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(long, global = true, env = "LOGGERLINK_CONFIG")]
    config: Option<PathBuf>,

    /// Root directory for captures
    #[arg(short, long, global = true)]
    output_dir: Option<PathBuf>,

    /// Baud rate
    #[arg(short, long, global = true)]
    baud: Option<u32>,

    /// Talk to a simulated logger instead of a serial port
    #[arg(long, global = true)]
    simulate: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text, global = true)]
    format: OutputFormat,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode (warnings and errors only)
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List available serial ports
    ListPorts {
        /// Show port type and USB details
        #[arg(short, long)]
        detailed: bool,
    },

    /// Interactive collection shell (default)
    Shell {
        /// Port name or 1-based index from `list-ports`; prompts if omitted
        port: Option<String>,
    },

    /// Capture one labelled session and exit
    Capture {
        /// Serial port name
        #[arg(short, long)]
        port: Option<String>,

        /// Session label
        #[arg(short, long)]
        label: String,

        /// Stop after this many seconds
        #[arg(short, long)]
        duration: Option<u64>,
    },

    /// Query the device status and exit
    Status {
        /// Serial port name
        #[arg(short, long)]
        port: Option<String>,
    },

    /// Print the exit code table
    ExitCodes,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match AppConfig::resolve(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            return CliResult::from(&e).to_exit_code();
        }
    };
    if let Some(dir) = &cli.output_dir {
        config.capture.output_dir = dir.clone();
    }
    if let Some(baud) = cli.baud {
        config.serial.baud_rate = baud;
    }

    let _guard = match init_tracing(&config.logging, Verbosity::from_flags(cli.verbose, cli.quiet)) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::from(ExitCodes::CONFIG_ERROR);
        }
    };

    match run(&cli, config).await {
        Ok(result) => {
            if let CliResult::Error(code, msg) = &result {
                error!(code, "{msg}");
                if !cli.quiet {
                    eprintln!("Error: {msg}");
                }
            }
            result.to_exit_code()
        }
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(ExitCodes::ERROR)
        }
    }
}

async fn run(cli: &Cli, config: AppConfig) -> anyhow::Result<CliResult> {
    let interrupt = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&interrupt);
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
    })
    .context("failed to install Ctrl+C handler")?;

    let default = Commands::Shell { port: None };
    match cli.command.as_ref().unwrap_or(&default) {
        Commands::ListPorts { detailed } => list_ports(cli, *detailed),
        Commands::ExitCodes => {
            print_exit_codes();
            Ok(CliResult::success())
        }
        Commands::Shell { port } => {
            let port = match port {
                Some(port) => Some(port.clone()),
                None if cli.simulate => None,
                None if !config.serial.port.is_empty() => Some(config.serial.port.clone()),
                None => match prompt_for_port()? {
                    Some(port) => Some(port),
                    None => return Ok(CliResult::error(ExitCodes::PORT_NOT_FOUND, "No serial ports found")),
                },
            };
            let port = port.map(|p| resolve_port(&p)).transpose()?;
            let engine = build_engine(cli, &config, port.as_deref())?;

            let mut shell = Shell::new(engine, StdinLineReader::new(), io::stdout(), interrupt);
            Ok(shell.run().await?)
        }
        Commands::Capture { port, label, duration } => {
            if let Some(missing) = missing_port(cli, &config, port.as_deref()) {
                return Ok(missing);
            }
            let mut engine = build_engine(cli, &config, port.as_deref())?;
            let limit = duration.map(Duration::from_secs);
            let mut out = io::stdout();
            Ok(run_capture(&mut engine, label, limit, interrupt, cli.format, &mut out).await?)
        }
        Commands::Status { port } => match missing_port(cli, &config, port.as_deref()) {
            Some(missing) => Ok(missing),
            None => status(cli, &config, port.as_deref()).await,
        },
    }
}

const NO_PORT: &str = "no serial port given; pass --port or set serial.port in the config";

fn missing_port(cli: &Cli, config: &AppConfig, port: Option<&str>) -> Option<CliResult> {
    let port = port.unwrap_or(&config.serial.port);
    (!cli.simulate && port.is_empty()).then(|| CliResult::error(ExitCodes::INVALID_ARGS, NO_PORT))
}

/// Serial port (or simulator) wired to a CSV sink
fn build_engine(
    cli: &Cli,
    config: &AppConfig,
    port: Option<&str>,
) -> anyhow::Result<CaptureEngine<Box<dyn LineTransport>>> {
    let transport: Box<dyn LineTransport> = if cli.simulate {
        Box::new(SimulatedLogger::new(config.simulator.clone()))
    } else {
        let port = port.unwrap_or(&config.serial.port);
        if port.is_empty() {
            anyhow::bail!(NO_PORT);
        }
        let serial = SerialConfig {
            port: port.to_string(),
            ..config.serial.clone()
        };
        Box::new(SerialTransport::new(serial))
    };
    debug!(link = %transport.connection_info(), "transport selected");

    let sink = CsvFileSink::new(&config.capture.output_dir);
    Ok(CaptureEngine::with_timing(transport, Box::new(sink), config.timing.clone()))
}

/// Accept an index into the current port list as well as a name
fn resolve_port(choice: &str) -> anyhow::Result<String> {
    if choice.parse::<usize>().is_err() {
        return Ok(choice.to_string());
    }
    let ports = available_ports()?;
    Ok(select_port(choice, &ports).unwrap_or_else(|| choice.to_string()))
}

fn prompt_for_port() -> anyhow::Result<Option<String>> {
    let ports = available_ports()?;
    if ports.is_empty() {
        return Ok(None);
    }

    println!("Available serial ports:");
    for (i, port) in ports.iter().enumerate() {
        println!("  {}. {}", i + 1, port.name);
    }
    print!("\nSelect port (1-{}) or enter port name: ", ports.len());
    io::stdout().flush()?;

    let mut choice = String::new();
    io::stdin().read_line(&mut choice)?;
    Ok(select_port(&choice, &ports))
}

fn list_ports(cli: &Cli, detailed: bool) -> anyhow::Result<CliResult> {
    let ports = available_ports()?;

    if ports.is_empty() {
        if !cli.quiet {
            println!("No serial ports found.");
        }
        return Ok(CliResult::success());
    }

    match cli.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&ports)?),
        OutputFormat::Text if detailed => {
            println!("Available Serial Ports:");
            println!("{:-<60}", "");
            for (i, port) in ports.iter().enumerate() {
                print_port(i + 1, port);
            }
        }
        OutputFormat::Text => {
            for port in &ports {
                println!("{}", port.name);
            }
        }
    }

    Ok(CliResult::success())
}

fn print_port(index: usize, port: &PortEntry) {
    match &port.description {
        Some(details) => println!("  {index}. {} [{}] {details}", port.name, port.kind),
        None => println!("  {index}. {} [{}]", port.name, port.kind),
    }
}

async fn status(cli: &Cli, config: &AppConfig, port: Option<&str>) -> anyhow::Result<CliResult> {
    let mut engine = build_engine(cli, config, port)?;

    let responses = engine.connect().await;
    if let Err(e) = engine.disconnect().await {
        debug!(error = %e, "disconnect failed");
    }

    match responses {
        Ok(responses) => {
            match cli.format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&responses)?),
                OutputFormat::Text if responses.is_empty() => println!("No response from device"),
                OutputFormat::Text => {
                    for response in &responses {
                        println!("Device: {response}");
                    }
                }
            }
            Ok(CliResult::success())
        }
        Err(e) => Ok(CliResult::from(&e)),
    }
}

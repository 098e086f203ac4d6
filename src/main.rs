//! Teststation CLI
//!
//! Front end of the test station: runs a device's test end to end, manages
//! stored serial numbers and browses past runs.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use teststation_core::cli::exit_codes::{exit_code_table, print_exit_codes};
use teststation_core::cli::render;
use teststation_core::config::{self, LogFormat, LoggingConfig};
use teststation_core::{
    parse_serial, AppConfig, CliResult, ExecutionService, ExitCodes, FileStore,
    HttpExecutionService, OutputFormat, RunStatus, SerialSequencer, SessionEvent, SessionStatus,
    SimulatedService, TestStation, TokioClock,
};
use tokio::sync::broadcast::error::RecvError;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

/// Teststation CLI
#[derive(Parser, Debug)]
#[command(
    name = "teststation",
    version,
    about = "Hardware-in-loop PCB test station",
    long_about = None
)]
struct Cli {
    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text, global = true)]
    format: OutputFormat,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode (errors only)
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Config file (default: platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Execution service base URL (overrides config and TESTSTATION_URL)
    #[arg(long, global = true)]
    url: Option<String>,

    /// Use the built-in simulated execution service
    #[arg(long, global = true)]
    simulate: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List test devices
    Devices,

    /// Run one test on a device and wait for the outcome
    Run {
        /// Device id, e.g. ESP32-001
        #[arg(short, long)]
        device: String,

        /// Board serial number (default: the device's stored next serial)
        #[arg(short, long)]
        serial: Option<String>,
    },

    /// Stored serial numbers
    Serial {
        #[command(subcommand)]
        action: SerialAction,
    },

    /// Recent tests of a device
    Recent {
        /// Device id
        #[arg(short, long)]
        device: String,

        /// Number of rows (default from config)
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Show a test with its measurements
    Show {
        /// Test id
        #[arg(short, long)]
        test_id: String,
    },

    /// Configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Print the exit code table
    ExitCodes,
}

#[derive(Subcommand, Debug)]
enum SerialAction {
    /// Print the next serial of a device
    Get {
        /// Device id
        #[arg(short, long)]
        device: String,
    },
    /// Set the next serial of a device
    Set {
        /// Device id
        #[arg(short, long)]
        device: String,
        /// Serial number
        #[arg(long)]
        value: String,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the config file location
    Path,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e:#}");
            return ExitCode::from(ExitCodes::CONFIG_ERROR);
        }
    };

    let _guard = match init_logging(&cli, &config.logging) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: could not initialize logging: {e:#}");
            return ExitCode::from(ExitCodes::CONFIG_ERROR);
        }
    };
    tracing::debug!("Starting teststation v{}", teststation_core::VERSION);

    let result = match dispatch(&cli, &config).await {
        Ok(result) => result,
        Err(e) => CliResult::from_error(&e),
    };

    match &result {
        CliResult::Error(code, msg) => {
            tracing::debug!("Exiting with code {}", code);
            if !msg.is_empty() {
                eprintln!("Error: {msg}");
            }
        }
        CliResult::Success(Some(msg)) if !cli.quiet => eprintln!("{msg}"),
        CliResult::Success(_) => {}
    }
    result.to_exit_code()
}

fn config_path(cli: &Cli) -> anyhow::Result<PathBuf> {
    match &cli.config {
        Some(path) => Ok(path.clone()),
        None => config::config_file().context("Could not determine config directory"),
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<AppConfig> {
    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load()?,
    };
    config.apply_env();
    config.apply_url(cli.url.clone());
    Ok(config)
}

fn init_logging(cli: &Cli, logging: &LoggingConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        logging.level.as_str()
    };
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
    let stderr = fmt::layer().with_writer(std::io::stderr).with_target(false);
    layers.push(match logging.format {
        LogFormat::Text => stderr.boxed(),
        LogFormat::Json => stderr.json().boxed(),
    });

    let mut guard = None;
    if let Some(dir) = &logging.directory {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        let appender = tracing_appender::rolling::daily(dir, "teststation.log");
        let (writer, worker) = tracing_appender::non_blocking(appender);
        let file = fmt::layer().with_writer(writer).with_ansi(false);
        layers.push(match logging.format {
            LogFormat::Text => file.boxed(),
            LogFormat::Json => file.json().boxed(),
        });
        guard = Some(worker);
    }

    tracing_subscriber::registry().with(layers).with(filter).try_init()?;
    Ok(guard)
}

async fn build_station(cli: &Cli, config: &AppConfig) -> anyhow::Result<TestStation> {
    let service: Arc<dyn ExecutionService> = if cli.simulate {
        tracing::info!("Using simulated execution service");
        Arc::new(SimulatedService::default())
    } else {
        Arc::new(HttpExecutionService::new(
            &config.service.base_url,
            config.service.timeout(),
        )?)
    };

    Ok(TestStation::new(
        service,
        open_sequencer(config).await?,
        Arc::new(TokioClock),
        config.run_timing(),
    ))
}

async fn open_sequencer(config: &AppConfig) -> anyhow::Result<SerialSequencer> {
    let path = config.serial_file();
    let store = FileStore::open(&path)
        .await
        .with_context(|| format!("opening serial store {}", path.display()))?;
    Ok(SerialSequencer::new(Arc::new(store)))
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn dispatch(cli: &Cli, config: &AppConfig) -> anyhow::Result<CliResult> {
    match &cli.command {
        Commands::Devices => list_devices(cli, config).await,
        Commands::Run { device, serial } => run_test(cli, config, device, serial.as_deref()).await,
        Commands::Serial { action } => handle_serial(cli, config, action).await,
        Commands::Recent { device, limit } => {
            recent(cli, config, device, limit.unwrap_or(config.display.recent_limit)).await
        }
        Commands::Show { test_id } => show_test(cli, config, test_id).await,
        Commands::Config { action } => handle_config(cli, config, action),
        Commands::ExitCodes => {
            match cli.format {
                OutputFormat::Json => {
                    let table: Vec<_> = exit_code_table()
                        .into_iter()
                        .map(|(code, description)| serde_json::json!({ "code": code, "description": description }))
                        .collect();
                    print_json(&table)?;
                }
                OutputFormat::Text => print_exit_codes(),
            }
            Ok(CliResult::success())
        }
    }
}

async fn list_devices(cli: &Cli, config: &AppConfig) -> anyhow::Result<CliResult> {
    let station = build_station(cli, config).await?;
    let devices = station.service().list_devices().await?;

    match cli.format {
        OutputFormat::Json => print_json(&devices)?,
        OutputFormat::Text => print!("{}", render::devices_table(&devices)),
    }
    Ok(CliResult::success())
}

async fn run_test(cli: &Cli, config: &AppConfig, device: &str, serial: Option<&str>) -> anyhow::Result<CliResult> {
    let station = build_station(cli, config).await?;
    let coordinator = station.open(device).await;

    let serial = match serial {
        Some(serial) => serial.to_string(),
        None => match coordinator.snapshot().next_serial {
            Some(next) => next.to_string(),
            None => {
                return Ok(CliResult::error(
                    ExitCodes::VALIDATION_FAILED,
                    format!("No stored serial for {device}; pass --serial"),
                ))
            }
        },
    };

    let mut events = coordinator.subscribe();
    let test_id = coordinator.start(&serial).await?;
    let progress = !cli.quiet && cli.format == OutputFormat::Text;
    if progress {
        eprintln!("Running test {test_id} on {device} (serial {serial}). Press Ctrl+C to abandon.");
    }

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut last_status = coordinator.snapshot().status;
    let status = loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                coordinator.shutdown();
                if progress {
                    eprintln!();
                }
                return Ok(CliResult::cancelled(format!("Test {test_id} abandoned")));
            }
            event = events.recv() => match event {
                Ok(SessionEvent::Updated(session)) => {
                    if session.status != last_status {
                        last_status = session.status;
                        tracing::debug!("{}", render::session_line(&session));
                    }
                    if session.status == SessionStatus::Running && progress {
                        eprint!("\r  elapsed {:<10}", session.elapsed_display());
                    }
                    if session.status == SessionStatus::Idle {
                        if progress {
                            eprintln!();
                        }
                        let message = session.error.unwrap_or_else(|| "Run ended without a result".to_string());
                        return Ok(CliResult::connection_failed(message));
                    }
                }
                Ok(SessionEvent::Finished { status, .. }) => break status,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!("Skipped {} session events", skipped);
                }
                Err(RecvError::Closed) => anyhow::bail!("Session event stream closed"),
            }
        }
    };
    if progress {
        eprintln!();
    }

    let session = coordinator.snapshot();
    let recent = match station
        .service()
        .list_recent(device, config.display.recent_limit)
        .await
    {
        Ok(recent) => recent,
        Err(e) => {
            tracing::warn!("Could not load recent tests: {}", e);
            Vec::new()
        }
    };

    match cli.format {
        OutputFormat::Json => print_json(&serde_json::json!({ "session": session, "recent": recent }))?,
        OutputFormat::Text => {
            print!("{}", render::finished_block(&session));
            if !recent.is_empty() {
                println!();
                print!("{}", render::recent_table(&recent));
            }
        }
    }

    Ok(match status {
        RunStatus::Fail => CliResult::test_failed(format!("Test {test_id} failed")),
        _ => CliResult::success(),
    })
}

async fn handle_serial(cli: &Cli, config: &AppConfig, action: &SerialAction) -> anyhow::Result<CliResult> {
    let sequencer = open_sequencer(config).await?;

    match action {
        SerialAction::Get { device } => {
            let value = sequencer.read(device).await?;
            match cli.format {
                OutputFormat::Json => print_json(&serde_json::json!({ "deviceId": device, "serial": value }))?,
                OutputFormat::Text => match value {
                    Some(value) => println!("{value}"),
                    None if !cli.quiet => eprintln!("No serial stored for {device}"),
                    None => {}
                },
            }
        }
        SerialAction::Set { device, value } => {
            let serial = parse_serial(value).map_err(teststation_core::RunError::from)?;
            sequencer.write(device, &serial.to_string()).await?;
            return Ok(CliResult::success_with_message(format!(
                "Next serial for {device} set to {serial}"
            )));
        }
    }
    Ok(CliResult::success())
}

async fn recent(cli: &Cli, config: &AppConfig, device: &str, limit: usize) -> anyhow::Result<CliResult> {
    let station = build_station(cli, config).await?;
    let tests = station.service().list_recent(device, limit).await?;

    match cli.format {
        OutputFormat::Json => print_json(&tests)?,
        OutputFormat::Text => print!("{}", render::recent_table(&tests)),
    }
    Ok(CliResult::success())
}

async fn show_test(cli: &Cli, config: &AppConfig, test_id: &str) -> anyhow::Result<CliResult> {
    let station = build_station(cli, config).await?;
    let record = station.service().get_test(test_id).await?;

    match cli.format {
        OutputFormat::Json => print_json(&record)?,
        OutputFormat::Text => print!("{}", render::record_block(test_id, &record)),
    }
    Ok(CliResult::success())
}

fn handle_config(cli: &Cli, config: &AppConfig, action: &ConfigAction) -> anyhow::Result<CliResult> {
    match action {
        ConfigAction::Show => match cli.format {
            OutputFormat::Json => print_json(config)?,
            OutputFormat::Text => print!("{}", toml::to_string_pretty(config)?),
        },
        ConfigAction::Init { force } => {
            let path = config_path(cli)?;
            if path.exists() && !force {
                return Ok(CliResult::error(
                    ExitCodes::CONFIG_ERROR,
                    format!("{} already exists; use --force to overwrite", path.display()),
                ));
            }
            AppConfig::default().save_to(&path)?;
            return Ok(CliResult::success_with_message(format!("Wrote {}", path.display())));
        }
        ConfigAction::Path => println!("{}", config_path(cli)?.display()),
    }
    Ok(CliResult::success())
}

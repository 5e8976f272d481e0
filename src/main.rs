//! sensormq - publish decoded sensor events to an MQTT broker
//!
//! Reads newline-delimited JSON events and publishes them the way an
//! rtl_433 MQTT output does.
//!
//! Usage:
//!   sensormq [OPTIONS]
//!
//! Options:
//!   -F, --output <PARAM>   Output parameter, e.g. mqtt://broker:1883,retain=1
//!   -c, --config <FILE>    Configuration file path
//!   -i, --input <FILE>     Event input file (default: standard input)
//!   --device-hint <HINT>   Input device mixed into the client identifier
//!   -l, --log-level        Log level (error, warn, info, debug, trace)
//!   -h, --help             Print help

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::{debug, info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use sensormq::client::MqttOutput;
use sensormq::config::{client_id, short_hostname, Config, OutputConfig};
use sensormq::event::Event;

/// Log level for CLI
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum LogLevel {
    /// Only errors
    Error,
    /// Warnings and errors
    Warn,
    /// Informational messages
    #[default]
    Info,
    /// Debug messages
    Debug,
    /// Trace messages (very verbose)
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }

    fn from_config(level: &str) -> Self {
        match level.to_lowercase().as_str() {
            "error" => LogLevel::Error,
            "warn" => LogLevel::Warn,
            "debug" => LogLevel::Debug,
            "trace" => LogLevel::Trace,
            _ => LogLevel::Info,
        }
    }
}

/// sensormq - MQTT output for decoded sensor events
#[derive(Parser, Debug)]
#[command(name = "sensormq")]
#[command(version)]
#[command(about = "Publish newline-delimited JSON sensor events to an MQTT broker")]
struct Args {
    /// Output parameter: [mqtt[s]://]host[:port][,key=value...]
    #[arg(short = 'F', long)]
    output: Option<String>,

    /// Configuration file path (TOML format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Event input file (newline-delimited JSON); standard input if omitted
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Input device hint used to derive the client identifier
    #[arg(long)]
    device_hint: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, value_enum)]
    log_level: Option<LogLevel>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let file_config = if let Some(config_path) = &args.config {
        match Config::load(config_path) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("Error loading config file: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        Config::default()
    };

    // CLI overrides config, RUST_LOG overrides both
    let log_level = args
        .log_level
        .unwrap_or_else(|| LogLevel::from_config(&file_config.log.level));
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_tracing_level().to_string()));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    if let Some(path) = &args.config {
        info!("Loaded configuration from {:?}", path);
    }

    let hostname = short_hostname();
    let param = args.output.unwrap_or(file_config.output.url);
    let output_config = match OutputConfig::parse(&param, &hostname) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Invalid MQTT output \"{}\": {}", param, e);
            std::process::exit(1);
        }
    };

    let device_hint = args.device_hint.or(file_config.output.device_hint);
    let client_id = client_id(&hostname, device_hint.as_deref());

    let output = match MqttOutput::start(&output_config, client_id) {
        Ok(output) => output,
        Err(e) => {
            eprintln!("Failed to start MQTT output: {}", e);
            std::process::exit(1);
        }
    };

    let input = args.input.or(file_config.input.path);
    let result = match &input {
        Some(path) => {
            info!("Reading events from {:?}", path);
            let file = tokio::fs::File::open(path).await?;
            forward_events(file, &output).await
        }
        None => forward_events(tokio::io::stdin(), &output).await,
    };

    if let Err(e) = result {
        warn!("Event input failed: {}", e);
    }

    output.shutdown().await?;
    info!("MQTT output stopped");
    Ok(())
}

/// Publish every event line until end of input or Ctrl+C
async fn forward_events<R>(reader: R, output: &MqttOutput) -> Result<(), Box<dyn std::error::Error>>
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    let mut count: u64 = 0;

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break;
            }
        };
        let Some(line) = line else {
            debug!("End of input after {} events", count);
            break;
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match Event::from_json(line) {
            Ok(event) => {
                output.publish(event)?;
                count += 1;
            }
            Err(e) => warn!("Skipping malformed event: {}", e),
        }
    }

    Ok(())
}

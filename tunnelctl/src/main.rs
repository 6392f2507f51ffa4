use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use session_core::ControllerConfig;
use session_core::config::CONFIG_PATH_ENV;
use session_core::logging::{LogOptions, init_logging, init_logging_from_config};
use session_uapi::UapiClient;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Copy, Clone, Debug, ValueEnum)]
enum LogLevelArg {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevelArg> for tracing::Level {
    fn from(level: LogLevelArg) -> Self {
        match level {
            LogLevelArg::Trace => tracing::Level::TRACE,
            LogLevelArg::Debug => tracing::Level::DEBUG,
            LogLevelArg::Info => tracing::Level::INFO,
            LogLevelArg::Warn => tracing::Level::WARN,
            LogLevelArg::Error => tracing::Level::ERROR,
        }
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, after_help = "Examples:\n  tunnelctl get wg0\n  tunnelctl --output json get wg0\n  tunnelctl set wg0 --file peers.conf\n  echo 'listen_port=51820' | tunnelctl set wg0")]
struct Args {
    /// Configuration file (defaults to $TUNNEL_CONFIG, then the per-user
    /// config file, then built-in defaults)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory holding the control sockets
    #[arg(long)]
    socket_dir: Option<PathBuf>,

    /// Log level (defaults to the configuration's [log] level)
    #[arg(short, long, value_enum)]
    log_level: Option<LogLevelArg>,

    /// Emit JSON logs
    #[arg(long, env = "TUNNEL_JSON_LOGS")]
    json_logs: bool,

    /// Output format for command results (table|json)
    #[arg(long, value_enum, default_value = "table")]
    output: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the running configuration of an interface
    Get {
        /// Interface name
        interface: String,
    },
    /// Apply key=value lines to an interface
    Set {
        /// Interface name
        interface: String,

        /// Read lines from this file instead of stdin
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

#[derive(Serialize)]
struct Message<'a> {
    status: &'a str,
    detail: &'a str,
}

#[derive(Serialize)]
struct Setting<'a> {
    key: &'a str,
    value: &'a str,
}

fn print_msg(fmt: OutputFormat, status: &str, detail: &str) -> Result<()> {
    match fmt {
        OutputFormat::Table => println!("{status}: {detail}"),
        OutputFormat::Json => {
            let msg = Message { status, detail };
            println!("{}", serde_json::to_string_pretty(&msg)?);
        }
    }
    Ok(())
}

fn print_settings(fmt: OutputFormat, dump: &str) -> Result<()> {
    match fmt {
        OutputFormat::Table => print!("{dump}"),
        OutputFormat::Json => {
            let settings = settings_from_dump(dump);
            println!("{}", serde_json::to_string_pretty(&settings)?);
        }
    }
    Ok(())
}

fn settings_from_dump(dump: &str) -> Vec<Setting<'_>> {
    dump.lines()
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| Setting { key, value })
        .collect()
}

/// Resolve configuration: `--config`, then `$TUNNEL_CONFIG`, then the
/// per-user file at `fallback` if it exists, then defaults.
fn load_config(explicit: Option<&Path>, fallback: &Path) -> Result<ControllerConfig> {
    let path = match explicit {
        Some(path) => Some(path),
        None if std::env::var_os(CONFIG_PATH_ENV).is_some() => None,
        None => Some(fallback).filter(|path| path.exists()),
    };

    match path {
        Some(path) => ControllerConfig::load(path)
            .with_context(|| format!("Failed to load {}", path.display())),
        None => ControllerConfig::from_env().context("Failed to resolve configuration"),
    }
}

fn read_settings(file: Option<&Path>) -> Result<String> {
    match file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display())),
        None => {
            let mut settings = String::new();
            std::io::stdin()
                .read_to_string(&mut settings)
                .context("Failed to read settings from stdin")?;
            Ok(settings)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(args.config.as_deref(), &ControllerConfig::default_path())?;

    let _guard = match args.log_level {
        Some(level) => init_logging(LogOptions {
            level: tracing::Level::from(level).into(),
            json_format: args.json_logs || config.log.json,
            ..Default::default()
        }),
        None => init_logging_from_config(&config),
    };

    let socket_dir = args
        .socket_dir
        .clone()
        .unwrap_or_else(|| config.uapi.socket_dir.clone());
    debug!(socket_dir = %socket_dir.display(), "Using control socket directory");

    match args.command {
        Command::Get { interface } => {
            let mut client = UapiClient::connect(&socket_dir, &interface)
                .await
                .with_context(|| format!("Unable to reach {interface}"))?;
            let dump = client
                .get()
                .await
                .with_context(|| format!("Failed to read configuration of {interface}"))?;
            print_settings(args.output, &dump)?;
        }
        Command::Set { interface, file } => {
            let settings = read_settings(file.as_deref())?;
            let mut client = UapiClient::connect(&socket_dir, &interface)
                .await
                .with_context(|| format!("Unable to reach {interface}"))?;
            client
                .set(&settings)
                .await
                .with_context(|| format!("Failed to configure {interface}"))?;
            print_msg(args.output, "ok", &format!("{interface} configured"))?;
        }
    }

    info!("tunnelctl command completed");
    Ok(())
}

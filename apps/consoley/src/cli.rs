use clap::{Args, Parser, Subcommand};
use session_readiness::ProbeStrategy;
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::telemetry::logging::{LogConfig, LogLevel};

#[derive(Parser, Debug)]
#[command(
    name = "consoley",
    about = "Start the remote desktop worker and wait for its display service",
    author,
    version
)]
pub struct Cli {
    #[arg(
        long,
        global = true,
        env = "CONSOLEY_CONFIG",
        value_name = "PATH",
        help = "Read settings from this TOML file instead of the default location"
    )]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub logging: LoggingArgs,

    #[command(flatten)]
    pub session: SessionArgs,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Args, Debug, Clone)]
pub struct LoggingArgs {
    #[arg(
        long = "log-level",
        value_enum,
        global = true,
        env = "CONSOLEY_LOG_LEVEL",
        default_value_t = LogLevel::Warn,
        help = "Minimum log level (error, warn, info, debug, trace)"
    )]
    pub level: LogLevel,

    #[arg(
        long = "log-file",
        value_name = "PATH",
        global = true,
        env = "CONSOLEY_LOG_FILE",
        help = "Write structured logs to the specified file"
    )]
    pub file: Option<PathBuf>,
}

impl LoggingArgs {
    pub fn to_config(&self) -> LogConfig {
        LogConfig {
            level: self.level,
            file: self.file.clone(),
        }
    }
}

/// Overrides for values that may also come from the config file. Unset flags
/// fall through to the file, then to built-in defaults.
#[derive(Args, Debug, Clone, Default)]
pub struct SessionArgs {
    #[arg(long, global = true, env = "CONSOLEY_PROBE_HOST", value_name = "HOST")]
    pub probe_host: Option<String>,

    #[arg(long, global = true, env = "CONSOLEY_PROBE_PORT", value_name = "PORT")]
    pub probe_port: Option<u16>,

    #[arg(long, global = true, env = "CONSOLEY_PROBE_PATH", value_name = "PATH")]
    pub probe_path: Option<String>,

    #[arg(
        long,
        global = true,
        env = "CONSOLEY_PROBE_STRATEGY",
        value_name = "STRATEGY",
        help = "How readiness is checked: tcp (default), websocket or http"
    )]
    pub probe_strategy: Option<ProbeStrategy>,

    #[arg(long, global = true, env = "CONSOLEY_PROBE_TIMEOUT_MS", value_name = "MS")]
    pub probe_timeout_ms: Option<u64>,

    #[arg(long, global = true, env = "CONSOLEY_RETRY_INTERVAL_MS", value_name = "MS")]
    pub retry_interval_ms: Option<u64>,

    #[arg(long, global = true, env = "CONSOLEY_MAX_RETRIES", value_name = "COUNT")]
    pub max_retries: Option<u32>,

    #[arg(
        long,
        global = true,
        env = "CONSOLEY_RECHECK_INTERVAL_MS",
        value_name = "MS",
        help = "Liveness recheck cadence once running; 0 disables"
    )]
    pub recheck_interval_ms: Option<u64>,

    #[arg(long, global = true, env = "CONSOLEY_DISPLAY_HOST", value_name = "HOST")]
    pub display_host: Option<String>,

    #[arg(long, global = true, env = "CONSOLEY_DISPLAY_PORT", value_name = "PORT")]
    pub display_port: Option<u16>,

    #[arg(
        long,
        global = true,
        env = "CONSOLEY_VIEW_ONLY",
        value_name = "BOOL",
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true",
        value_parser = clap::builder::BoolishValueParser::new(),
        help = "Render the display URL in view-only mode; --view-only=false overrides the config file"
    )]
    pub view_only: Option<bool>,

    #[arg(
        long,
        global = true,
        env = "CONSOLEY_LISTEN",
        value_name = "ADDR",
        help = "Serve the backend event ingress on this address"
    )]
    pub listen: Option<SocketAddr>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Provision the worker and wait for its display (default)
    Run(RunArgs),
    /// Stop the worker
    Stop,
    /// Restart the worker
    Restart,
    /// Print the worker's recent logs
    Logs,
    /// Print application name, version and display status as JSON
    Info,
    /// Probe the display endpoint once and report the result
    Probe,
}

impl Default for Command {
    fn default() -> Self {
        Command::Run(RunArgs::default())
    }
}

#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    #[arg(
        long = "exit-when-ready",
        action = clap::ArgAction::SetTrue,
        help = "Exit as soon as the display is reachable"
    )]
    pub exit_when_ready: bool,

    #[arg(
        long = "stop-on-exit",
        action = clap::ArgAction::SetTrue,
        help = "Stop the worker when consoley exits"
    )]
    pub stop_on_exit: bool,
}

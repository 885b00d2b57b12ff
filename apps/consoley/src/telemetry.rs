//! Diagnostics for the binary. Logs never go to stdout, which carries the
//! status lines a user or wrapper script reads.

pub mod logging {
    use std::fs::{self, OpenOptions};
    use std::io::IsTerminal;
    use std::path::{Path, PathBuf};
    use std::sync::OnceLock;

    use clap::ValueEnum;
    use thiserror::Error;
    use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
    use tracing_subscriber::filter::ParseError;
    use tracing_subscriber::EnvFilter;

    /// Replaces the derived filter wholesale when set.
    pub const FILTER_ENV: &str = "CONSOLEY_LOG_FILTER";

    /// Target prefixes emitted by this workspace: `readiness.*` from the
    /// controller and bus, `consoley.*` from the binary.
    const WORKSPACE_TARGETS: [&str; 2] = ["readiness", "consoley"];

    #[derive(Clone, Copy, Debug, Default, ValueEnum, PartialEq, Eq, PartialOrd, Ord)]
    pub enum LogLevel {
        Error,
        #[default]
        Warn,
        Info,
        Debug,
        Trace,
    }

    impl LogLevel {
        pub fn as_str(self) -> &'static str {
            match self {
                LogLevel::Error => "error",
                LogLevel::Warn => "warn",
                LogLevel::Info => "info",
                LogLevel::Debug => "debug",
                LogLevel::Trace => "trace",
            }
        }
    }

    #[derive(Clone, Debug, Default)]
    pub struct LogConfig {
        pub level: LogLevel,
        /// Appended to instead of stderr when set.
        pub file: Option<PathBuf>,
    }

    #[derive(Debug, Error)]
    pub enum InitError {
        #[error("failed to open log file {path:?}: {source}")]
        OpenFile {
            path: PathBuf,
            source: std::io::Error,
        },
        #[error("invalid CONSOLEY_LOG_FILTER: {0}")]
        Filter(#[from] ParseError),
        #[error("a global logger is already installed")]
        AlreadyInstalled,
    }

    static WRITER_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

    pub fn init(config: &LogConfig) -> Result<(), InitError> {
        let override_directives = std::env::var(FILTER_ENV).ok();
        let filter = build_filter(config.level, override_directives.as_deref())?;
        let to_file = config.file.is_some();
        let (writer, guard) = match &config.file {
            Some(path) => file_writer(path)?,
            None => tracing_appender::non_blocking(std::io::stderr()),
        };

        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(writer)
            .with_target(true)
            .with_ansi(!to_file && std::io::stderr().is_terminal())
            .try_init()
            .map_err(|_| InitError::AlreadyInstalled)?;

        // The guard flushes on drop, so it lives as long as the process.
        let _ = WRITER_GUARD.set(guard);
        Ok(())
    }

    fn file_writer(path: &Path) -> Result<(NonBlocking, WorkerGuard), InitError> {
        let open_error = |source| InitError::OpenFile {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(open_error)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(open_error)?;
        Ok(tracing_appender::non_blocking(file))
    }

    pub(crate) fn build_filter(
        level: LogLevel,
        override_directives: Option<&str>,
    ) -> Result<EnvFilter, InitError> {
        match override_directives {
            Some(directives) => Ok(EnvFilter::try_new(directives)?),
            None => Ok(EnvFilter::try_new(directives_for(level))?),
        }
    }

    /// `level` applies to the workspace targets. Everything else (hyper,
    /// reqwest, tungstenite) is capped at `warn`.
    pub(crate) fn directives_for(level: LogLevel) -> String {
        let mut directives = level.min(LogLevel::Warn).as_str().to_owned();
        for target in WORKSPACE_TARGETS {
            directives.push_str(&format!(",{target}={}", level.as_str()));
        }
        directives
    }

}

pub mod metrics {
    use anyhow::{Context, Result};
    use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

    /// Installs the Prometheus recorder behind the ingress `/metrics` route.
    /// Without it the library counters are no-ops.
    pub fn install() -> Result<PrometheusHandle> {
        PrometheusBuilder::new()
            .install_recorder()
            .context("failed to install Prometheus metrics recorder")
    }
}

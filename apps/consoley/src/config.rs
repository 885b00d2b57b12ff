//! Settings resolution: CLI flags and `CONSOLEY_*` variables win over the TOML
//! file, which wins over built-in defaults.

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use session_readiness::{ControllerConfig, ProbeStrategy, ProbeTarget};
use thiserror::Error;

use crate::backend::CommandSet;
use crate::cli::SessionArgs;

pub const DEFAULT_DISPLAY_PORT: u16 = 6070;
const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub probe: ProbeSection,
    pub retry: RetrySection,
    pub display: DisplaySection,
    pub backend: BackendSection,
    pub ingress: IngressSection,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProbeSection {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub path: Option<String>,
    pub strategy: Option<ProbeStrategy>,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySection {
    pub interval_ms: Option<u64>,
    pub max_retries: Option<u32>,
    pub initial_delay_ms: Option<u64>,
    /// `0` disables the post-running liveness recheck.
    pub recheck_interval_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DisplaySection {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub view_only: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BackendSection {
    pub start: Option<String>,
    pub stop: Option<String>,
    pub restart: Option<String>,
    pub logs: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IngressSection {
    pub listen: Option<SocketAddr>,
}

impl FileConfig {
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "consoley").map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
    }

    /// Loads `explicit` if given (it must exist), otherwise the default
    /// location if present, otherwise an empty config.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        match explicit {
            Some(path) => Self::read(path),
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::read(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    fn read(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayConfig {
    pub host: String,
    pub port: u16,
    pub view_only: bool,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub controller: ControllerConfig,
    pub strategy: ProbeStrategy,
    pub display: DisplayConfig,
    pub commands: CommandSet,
    pub listen: Option<SocketAddr>,
}

impl AppConfig {
    pub fn resolve(file: FileConfig, args: &SessionArgs) -> Result<Self, ConfigError> {
        let defaults = ControllerConfig::default();
        let FileConfig {
            probe,
            retry,
            display,
            backend,
            ingress,
        } = file;

        let host = args
            .probe_host
            .clone()
            .or(probe.host)
            .unwrap_or_else(|| defaults.target.host().to_string());
        let port = args
            .probe_port
            .or(probe.port)
            .unwrap_or(defaults.target.port());
        let mut target = ProbeTarget::new(host.clone(), port);
        if let Some(path) = args.probe_path.clone().or(probe.path) {
            target = target.with_path(path);
        }

        let millis = |flag: Option<u64>, file: Option<u64>, default: Duration| {
            flag.or(file).map(Duration::from_millis).unwrap_or(default)
        };
        let recheck_interval = match args.recheck_interval_ms.or(retry.recheck_interval_ms) {
            Some(0) => None,
            Some(ms) => Some(Duration::from_millis(ms)),
            None => defaults.recheck_interval,
        };

        let controller = ControllerConfig {
            target,
            probe_timeout: millis(args.probe_timeout_ms, probe.timeout_ms, defaults.probe_timeout),
            retry_interval: millis(args.retry_interval_ms, retry.interval_ms, defaults.retry_interval),
            initial_delay: millis(None, retry.initial_delay_ms, defaults.initial_delay),
            max_retries: args
                .max_retries
                .or(retry.max_retries)
                .unwrap_or(defaults.max_retries),
            recheck_interval,
        };
        controller
            .validate()
            .map_err(|err| ConfigError::Invalid(err.to_string()))?;

        let display = DisplayConfig {
            host: args.display_host.clone().or(display.host).unwrap_or(host),
            port: args
                .display_port
                .or(display.port)
                .unwrap_or(DEFAULT_DISPLAY_PORT),
            view_only: args.view_only.or(display.view_only).unwrap_or(false),
        };
        if display.port == 0 {
            return Err(ConfigError::Invalid("display port must be non-zero".into()));
        }

        let mut commands = CommandSet::default();
        if let Some(start) = backend.start {
            commands.start = start;
        }
        if let Some(stop) = backend.stop {
            commands.stop = stop;
        }
        if let Some(restart) = backend.restart {
            commands.restart = restart;
        }
        if let Some(logs) = backend.logs {
            commands.logs = logs;
        }

        Ok(Self {
            controller,
            strategy: args.probe_strategy.or(probe.strategy).unwrap_or_default(),
            display,
            commands,
            listen: args.listen.or(ingress.listen),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test_timeout::timeout]
    fn empty_sources_give_defaults() {
        let config = AppConfig::resolve(FileConfig::default(), &SessionArgs::default())
            .expect("resolve");
        assert_eq!(config.controller, ControllerConfig::default());
        assert_eq!(config.strategy, ProbeStrategy::Tcp);
        assert_eq!(config.display.port, DEFAULT_DISPLAY_PORT);
        assert_eq!(config.display.host, "localhost");
        assert!(!config.display.view_only);
        assert_eq!(config.commands, CommandSet::default());
        assert!(config.listen.is_none());
    }

    #[test_timeout::timeout]
    fn file_values_apply_and_flags_win() {
        let file: FileConfig = toml::from_str(
            r#"
            [probe]
            host = "10.0.0.5"
            port = 5900
            strategy = "websocket"
            timeout_ms = 500

            [retry]
            interval_ms = 1000
            max_retries = 10
            recheck_interval_ms = 0

            [backend]
            start = "echo worker-7"

            [ingress]
            listen = "127.0.0.1:8091"
            "#,
        )
        .expect("parse");
        let args = SessionArgs {
            probe_port: Some(5800),
            max_retries: Some(3),
            ..SessionArgs::default()
        };

        let config = AppConfig::resolve(file, &args).expect("resolve");
        assert_eq!(config.controller.target.host(), "10.0.0.5");
        assert_eq!(config.controller.target.port(), 5800);
        assert_eq!(config.controller.probe_timeout, Duration::from_millis(500));
        assert_eq!(config.controller.retry_interval, Duration::from_millis(1000));
        assert_eq!(config.controller.max_retries, 3);
        assert_eq!(config.controller.recheck_interval, None);
        assert_eq!(config.strategy, ProbeStrategy::WebSocket);
        assert_eq!(config.display.host, "10.0.0.5");
        assert_eq!(config.commands.start, "echo worker-7");
        assert_eq!(config.commands.stop, CommandSet::default().stop);
        assert_eq!(config.listen, Some("127.0.0.1:8091".parse().expect("addr")));
    }

    #[test_timeout::timeout]
    fn view_only_follows_flag_then_file() {
        let file: FileConfig = toml::from_str("[display]\nview_only = true\n").expect("parse");
        let config = AppConfig::resolve(file.clone(), &SessionArgs::default()).expect("resolve");
        assert!(config.display.view_only);

        let args = SessionArgs {
            view_only: Some(false),
            ..SessionArgs::default()
        };
        let config = AppConfig::resolve(file, &args).expect("resolve");
        assert!(!config.display.view_only);
    }

    #[test_timeout::timeout]
    fn invalid_values_are_rejected() {
        let args = SessionArgs {
            max_retries: Some(0),
            ..SessionArgs::default()
        };
        let err = AppConfig::resolve(FileConfig::default(), &args).expect_err("invalid");
        assert!(matches!(err, ConfigError::Invalid(_)));

        let args = SessionArgs {
            display_port: Some(0),
            ..SessionArgs::default()
        };
        assert!(AppConfig::resolve(FileConfig::default(), &args).is_err());
    }

    #[test_timeout::timeout]
    fn load_reports_missing_and_malformed_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("absent.toml");
        assert!(matches!(
            FileConfig::load(Some(&missing)),
            Err(ConfigError::Io { .. })
        ));

        let path = dir.path().join("config.toml");
        let mut file = fs::File::create(&path).expect("create");
        writeln!(file, "[probe]\nport = \"not a number\"").expect("write");
        assert!(matches!(
            FileConfig::load(Some(&path)),
            Err(ConfigError::Parse { .. })
        ));

        fs::write(&path, "[display]\nview_only = true\n").expect("write");
        let loaded = FileConfig::load(Some(&path)).expect("load");
        assert_eq!(loaded.display.view_only, Some(true));
    }

    #[test_timeout::timeout]
    fn unknown_keys_are_errors() {
        assert!(toml::from_str::<FileConfig>("[probe]\nhots = \"x\"\n").is_err());
    }
}

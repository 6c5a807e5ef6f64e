use clap::Parser;
use mockchain_common::{
    api::ChainDescriptor,
    config::{DEFAULT_BIND_HOST, VERSION},
    logger::{default_logs_datetime_format, LogLevel, ModuleConfig},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_CONFIG_FILE: &str = "mockchain.json";

fn default_log_filename() -> String {
    "mockchain.log".to_owned()
}

fn default_logs_path() -> String {
    "logs/".to_owned()
}

fn default_bind_host() -> String {
    DEFAULT_BIND_HOST.to_owned()
}

#[derive(Debug, Clone, clap::Args, Serialize, Deserialize)]
pub struct LogConfig {
    /// Set log level
    #[clap(long, value_enum, default_value_t)]
    #[serde(default)]
    pub log_level: LogLevel,
    /// Set file log level
    /// By default, it will be the same as log level
    #[clap(long, value_enum)]
    pub file_log_level: Option<LogLevel>,
    /// Disable the log file
    #[clap(long)]
    #[serde(default)]
    pub disable_file_logging: bool,
    /// Disable the usage of colors in log
    #[clap(long)]
    #[serde(default)]
    pub disable_log_color: bool,
    /// Log filename
    ///
    /// By default filename is mockchain.log.
    /// File will be stored in logs directory, this is only the filename, not the full path.
    #[clap(long, default_value_t = default_log_filename())]
    #[serde(default = "default_log_filename")]
    pub filename_log: String,
    /// Logs directory
    ///
    /// By default it will be logs/ of the current directory.
    #[clap(long, default_value_t = default_logs_path())]
    #[serde(default = "default_logs_path")]
    pub logs_path: String,
    /// Module configuration for logs, written module=level
    #[clap(long)]
    #[serde(default)]
    pub logs_modules: Vec<ModuleConfig>,
    /// Change the datetime format used by the logger
    #[clap(long, default_value_t = default_logs_datetime_format())]
    #[serde(default = "default_logs_datetime_format")]
    pub datetime_format: String,
}

impl LogConfig {
    pub fn log_file(&self) -> Option<PathBuf> {
        if self.disable_file_logging {
            None
        } else {
            Some(Path::new(&self.logs_path).join(&self.filename_log))
        }
    }
}

#[derive(Parser, Debug, Clone)]
#[clap(
    version = VERSION,
    about = "Mockchain - run many simulated blockchain nodes in one process"
)]
pub struct Config {
    /// JSON file describing the control port and the chains to start
    #[clap(long, default_value = DEFAULT_CONFIG_FILE)]
    pub config_file: PathBuf,
    /// Override the host chains and the control server bind to
    #[clap(long)]
    pub bind_host: Option<String>,
    /// Log configuration
    #[clap(flatten)]
    pub log: LogConfig,
}

/// Content of the JSON config file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigFile {
    pub control_port: u16,
    #[serde(default = "default_bind_host")]
    pub bind_host: String,
    // Chains created and brought up at startup
    #[serde(default)]
    pub chains: Vec<ChainDescriptor>,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Missing required field '{0}'")]
    MissingField(&'static str),

    #[error("Invalid field '{field}': {reason}")]
    InvalidField { field: &'static str, reason: String },
}

/// Load the config file, `control_port` must be present and numeric
pub fn load_config_file<P: AsRef<Path>>(path: P) -> Result<ConfigFile, ConfigError> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(ConfigError::FileNotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(path, &content)
}

fn parse_config(path: &Path, content: &str) -> Result<ConfigFile, ConfigError> {
    let parse_error = |source: serde_json::Error| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    };
    let value: Value = serde_json::from_str(content).map_err(parse_error)?;

    // Checked by hand to report the field rather than a serde message
    let control_port = value
        .get("control_port")
        .ok_or(ConfigError::MissingField("control_port"))?;
    let port = control_port
        .as_u64()
        .ok_or_else(|| ConfigError::InvalidField {
            field: "control_port",
            reason: format!("expected a number, got {}", control_port),
        })?;
    if u16::try_from(port).is_err() {
        return Err(ConfigError::InvalidField {
            field: "control_port",
            reason: format!("{} is not a valid port", port),
        });
    }

    serde_json::from_value(value).map_err(parse_error)
}

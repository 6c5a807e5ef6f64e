use fern::colors::{Color, ColoredLevelConfig};
use log::LevelFilter;
use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Formatter},
    fs,
    path::PathBuf,
    str::FromStr,
};
use thiserror::Error;

pub const DEFAULT_LOGS_DATETIME_FORMAT: &str = "[%Y-%m-%d] (%H:%M:%S%.3f)";

pub fn default_logs_datetime_format() -> String {
    DEFAULT_LOGS_DATETIME_FORMAT.to_owned()
}

#[derive(Debug, Error)]
pub enum LoggerError {
    #[error("Error while preparing log file: {0}")]
    Io(#[from] std::io::Error),
    #[error("A logger is already installed: {0}")]
    SetLogger(#[from] log::SetLoggerError),
    #[error("Invalid module configuration '{0}', expected <module>=<level>")]
    InvalidModuleConfig(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(value: LogLevel) -> Self {
        match value {
            LogLevel::Off => LevelFilter::Off,
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "off" => Self::Off,
            "error" => Self::Error,
            "warn" => Self::Warn,
            "info" => Self::Info,
            "debug" => Self::Debug,
            "trace" => Self::Trace,
            _ => return Err(format!("Invalid log level '{}'", s)),
        })
    }
}

impl Display for LogLevel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let str = match self {
            Self::Off => "off",
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        };
        write!(f, "{}", str)
    }
}

/// Log level override for one module, written `module=level`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleConfig {
    pub module: String,
    pub level: LogLevel,
}

impl FromStr for ModuleConfig {
    type Err = LoggerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (module, level) = s
            .split_once('=')
            .ok_or_else(|| LoggerError::InvalidModuleConfig(s.to_owned()))?;
        let level =
            LogLevel::from_str(level).map_err(|_| LoggerError::InvalidModuleConfig(s.to_owned()))?;

        Ok(Self {
            module: module.to_owned(),
            level,
        })
    }
}

pub struct LoggerOptions<'a> {
    pub level: LogLevel,
    pub file_level: LogLevel,
    // None disables file logging
    pub file: Option<PathBuf>,
    pub colors: bool,
    pub modules: &'a [ModuleConfig],
    pub datetime_format: &'a str,
}

/// Install the global logger: colored stdout plus an optional plain file
pub fn setup_logger(options: LoggerOptions<'_>) -> Result<(), LoggerError> {
    let colors = ColoredLevelConfig::new()
        .error(Color::Red)
        .warn(Color::Yellow)
        .info(Color::Green)
        .debug(Color::Cyan)
        .trace(Color::Magenta);

    let mut base = fern::Dispatch::new().level(LevelFilter::max());
    for module in options.modules {
        base = base.level_for(module.module.clone(), module.level.into());
    }

    let use_colors = options.colors;
    let datetime_format = options.datetime_format.to_owned();
    let stdout = fern::Dispatch::new()
        .level(options.level.into())
        .format(move |out, message, record| {
            let level = if use_colors {
                colors.color(record.level()).to_string()
            } else {
                record.level().to_string()
            };
            out.finish(format_args!(
                "{} {} [{}] {}",
                chrono::Local::now().format(&datetime_format),
                level,
                record.target(),
                message
            ))
        })
        .chain(std::io::stdout());
    base = base.chain(stdout);

    if let Some(path) = options.file {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let datetime_format = options.datetime_format.to_owned();
        let file = fern::Dispatch::new()
            .level(options.file_level.into())
            .format(move |out, message, record| {
                out.finish(format_args!(
                    "{} {} [{}] {}",
                    chrono::Local::now().format(&datetime_format),
                    record.level(),
                    record.target(),
                    message
                ))
            })
            .chain(fern::log_file(path)?);
        base = base.chain(file);
    }

    base.apply()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_config_parsing() {
        let config = ModuleConfig::from_str("actix_server=warn").unwrap();
        assert_eq!(config.module, "actix_server");
        assert_eq!(config.level, LogLevel::Warn);

        assert!(ModuleConfig::from_str("actix_server").is_err());
        assert!(ModuleConfig::from_str("actix_server=loud").is_err());
    }

    #[test]
    fn test_log_level_filter() {
        assert_eq!(LevelFilter::from(LogLevel::default()), LevelFilter::Info);
        assert_eq!(LevelFilter::from(LogLevel::Off), LevelFilter::Off);
        assert_eq!(LogLevel::from_str("TRACE").unwrap(), LogLevel::Trace);
    }
}

//! Configuration of the engine.

use std::{fmt, fs, io, thread};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use log::{LevelFilter, error};
use rpki::uri;
use serde::de;
use serde::{Deserialize, Deserializer};
use crate::constants::*;


//------------ ConfigDefaults ------------------------------------------------

pub struct ConfigDefaults;

impl ConfigDefaults {
    fn log_level() -> LevelFilter {
        LevelFilter::Info
    }

    fn log_type() -> LogType {
        LogType::Stderr
    }

    fn log_file() -> PathBuf {
        PathBuf::from("./rpki-ca-engine.log")
    }

    fn invariant_checking_enabled() -> bool {
        false
    }

    fn key_rollover_max_age_days() -> u32 {
        KEY_ROLLOVER_MAX_AGE_DAYS
    }

    fn key_activation_staging_hours() -> u32 {
        KEY_ACTIVATION_STAGING_HOURS
    }

    fn ca_update_batch_size() -> usize {
        CA_UPDATE_BATCH_SIZE
    }

    fn batch_max_failures() -> usize {
        BATCH_MAX_FAILURES
    }

    fn batch_soft_deadline_seconds() -> u64 {
        BATCH_SOFT_DEADLINE_SECONDS
    }

    fn batch_parallelism() -> usize {
        thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
    }

    fn lock_timeout_ms() -> u64 {
        LOCK_TIMEOUT_MS
    }

    fn command_max_retries() -> u32 {
        COMMAND_MAX_RETRIES
    }

    fn public_repository_uri() -> uri::Rsync {
        Self::rsync("rsync://localhost/repository/")
    }

    fn ta_repository_uri() -> uri::Rsync {
        Self::rsync("rsync://localhost/ta/")
    }

    fn all_resources_ca_name() -> String {
        ALL_RESOURCES_CA_NAME.to_string()
    }

    fn production_ca_name() -> String {
        PRODUCTION_CA_NAME.to_string()
    }

    fn rsync(s: &str) -> uri::Rsync {
        uri::Rsync::from_str(s).unwrap()
    }
}


//------------ Config --------------------------------------------------------

/// Global configuration of the engine.
///
/// This is read from a TOML file. All fields are optional and fall back
/// to the values in [`ConfigDefaults`].
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    #[serde(
        default = "ConfigDefaults::log_level",
        deserialize_with = "de_level_filter"
    )]
    pub log_level: LevelFilter,

    #[serde(default = "ConfigDefaults::log_type")]
    pub log_type: LogType,

    #[serde(default = "ConfigDefaults::log_file")]
    pub log_file: PathBuf,

    /// Whether to check CA invariants after every command.
    #[serde(default = "ConfigDefaults::invariant_checking_enabled")]
    pub invariant_checking_enabled: bool,

    #[serde(default = "ConfigDefaults::key_rollover_max_age_days")]
    pub key_rollover_max_age_days: u32,

    #[serde(default = "ConfigDefaults::key_activation_staging_hours")]
    pub key_activation_staging_hours: u32,

    #[serde(default = "ConfigDefaults::ca_update_batch_size")]
    pub ca_update_batch_size: usize,

    #[serde(default = "ConfigDefaults::batch_max_failures")]
    pub batch_max_failures: usize,

    #[serde(default = "ConfigDefaults::batch_soft_deadline_seconds")]
    pub batch_soft_deadline_seconds: u64,

    #[serde(default = "ConfigDefaults::batch_parallelism")]
    pub batch_parallelism: usize,

    #[serde(default = "ConfigDefaults::lock_timeout_ms")]
    pub lock_timeout_ms: u64,

    #[serde(default = "ConfigDefaults::command_max_retries")]
    pub command_max_retries: u32,

    /// The rsync base under which CAs publish.
    #[serde(default = "ConfigDefaults::public_repository_uri")]
    pub public_repository_uri: uri::Rsync,

    /// The rsync base under which the trust anchor publishes.
    #[serde(default = "ConfigDefaults::ta_repository_uri")]
    pub ta_repository_uri: uri::Rsync,

    #[serde(default)]
    pub notification_uri: Option<uri::Https>,

    #[serde(default = "ConfigDefaults::all_resources_ca_name")]
    pub all_resources_ca_name: String,

    #[serde(default = "ConfigDefaults::production_ca_name")]
    pub production_ca_name: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            log_level: ConfigDefaults::log_level(),
            log_type: ConfigDefaults::log_type(),
            log_file: ConfigDefaults::log_file(),
            invariant_checking_enabled:
                ConfigDefaults::invariant_checking_enabled(),
            key_rollover_max_age_days:
                ConfigDefaults::key_rollover_max_age_days(),
            key_activation_staging_hours:
                ConfigDefaults::key_activation_staging_hours(),
            ca_update_batch_size: ConfigDefaults::ca_update_batch_size(),
            batch_max_failures: ConfigDefaults::batch_max_failures(),
            batch_soft_deadline_seconds:
                ConfigDefaults::batch_soft_deadline_seconds(),
            batch_parallelism: ConfigDefaults::batch_parallelism(),
            lock_timeout_ms: ConfigDefaults::lock_timeout_ms(),
            command_max_retries: ConfigDefaults::command_max_retries(),
            public_repository_uri: ConfigDefaults::public_repository_uri(),
            ta_repository_uri: ConfigDefaults::ta_repository_uri(),
            notification_uri: None,
            all_resources_ca_name: ConfigDefaults::all_resources_ca_name(),
            production_ca_name: ConfigDefaults::production_ca_name(),
        }
    }
}

impl Config {
    /// Reads, verifies and returns the config from a file.
    pub fn read_config(file: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(file)?;
        let config = Self::parse(&content)?;
        config.verify().map_err(|err| {
            ConfigError::Other(format!(
                "Error parsing config file: {}, error: {}",
                file.display(), err
            ))
        })?;
        Ok(config)
    }

    /// Parses the config from a TOML string without verifying it.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn verify(&self) -> Result<(), ConfigError> {
        if self.key_rollover_max_age_days < 1 {
            return Err(ConfigError::other(
                "key_rollover_max_age_days must be at least 1"
            ));
        }

        if self.ca_update_batch_size < 1 {
            return Err(ConfigError::other(
                "ca_update_batch_size must be at least 1"
            ));
        }

        if self.batch_parallelism < 1 {
            return Err(ConfigError::other(
                "batch_parallelism must be at least 1"
            ));
        }

        if self.lock_timeout_ms < 1 {
            return Err(ConfigError::other(
                "lock_timeout_ms must be at least 1"
            ));
        }

        if !self.public_repository_uri.as_str().ends_with('/') {
            return Err(ConfigError::other(
                "public_repository_uri must end with '/'"
            ));
        }

        if !self.ta_repository_uri.as_str().ends_with('/') {
            return Err(ConfigError::other(
                "ta_repository_uri must end with '/'"
            ));
        }

        if self.all_resources_ca_name == self.production_ca_name {
            return Err(ConfigError::other(
                "all_resources_ca_name and production_ca_name must differ"
            ));
        }

        Ok(())
    }

    pub fn init_logging(&self) -> Result<(), ConfigError> {
        match self.log_type {
            LogType::File => self.file_logger(&self.log_file),
            LogType::Stderr => self.stderr_logger(),
        }
    }

    /// Creates a stderr logger.
    fn stderr_logger(&self) -> Result<(), ConfigError> {
        self.fern_logger()
            .chain(io::stderr())
            .apply()
            .map_err(|e| {
                ConfigError::Other(
                    format!("Failed to init stderr logging: {}", e)
                )
            })
    }

    /// Creates a file logger using the file provided by `path`.
    fn file_logger(&self, path: &Path) -> Result<(), ConfigError> {
        let file = match fern::log_file(path) {
            Ok(file) => file,
            Err(err) => {
                let error_string = format!(
                    "Failed to open log file '{}': {}", path.display(), err
                );
                error!("{}", error_string.as_str());
                return Err(ConfigError::Other(error_string));
            }
        };
        self.fern_logger()
            .chain(file)
            .apply()
            .map_err(|e| {
                ConfigError::Other(
                    format!("Failed to init file logging: {}", e)
                )
            })
    }

    /// Creates and returns a fern logger with log level tweaks.
    fn fern_logger(&self) -> fern::Dispatch {
        // suppress overly noisy logging
        let framework_level = self.log_level.min(LevelFilter::Warn);
        let engine_framework_level = self.log_level.min(LevelFilter::Debug);

        let show_target = self.log_level == LevelFilter::Trace
            || self.log_level == LevelFilter::Debug;
        fern::Dispatch::new()
            .format(move |out, message, record| {
                if show_target {
                    out.finish(format_args!(
                        "{} [{}] [{}] {}",
                        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                        record.level(),
                        record.target(),
                        message
                    ))
                } else {
                    out.finish(format_args!(
                        "{} [{}] {}",
                        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                        record.level(),
                        message
                    ))
                }
            })
            .level(self.log_level)
            .level_for("mio", framework_level)
            .level_for("tokio", framework_level)
            .level_for("rpki_ca_engine::commons::locks", engine_framework_level)
            .level_for("rpki_ca_engine::server::store", engine_framework_level)
    }
}


//------------ ConfigError ---------------------------------------------------

#[derive(Debug)]
pub enum ConfigError {
    IoError(io::Error),
    TomlError(toml::de::Error),
    Other(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConfigError::IoError(e) => e.fmt(f),
            ConfigError::TomlError(e) => e.fmt(f),
            ConfigError::Other(s) => s.fmt(f),
        }
    }
}

impl ConfigError {
    pub fn other(s: &str) -> ConfigError {
        ConfigError::Other(s.to_string())
    }
}

impl From<io::Error> for ConfigError {
    fn from(e: io::Error) -> Self {
        ConfigError::IoError(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::TomlError(e)
    }
}

impl std::error::Error for ConfigError { }


//------------ LogType -------------------------------------------------------

/// The target to log to.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum LogType {
    Stderr,
    File,
}

impl<'de> Deserialize<'de> for LogType {
    fn deserialize<D>(d: D) -> Result<LogType, D::Error>
    where
        D: Deserializer<'de>,
    {
        let string = String::deserialize(d)?;
        match string.as_str() {
            "stderr" => Ok(LogType::Stderr),
            "file" => Ok(LogType::File),
            _ => Err(de::Error::custom(format!(
                "expected \"stderr\" or \"file\", found : \"{}\"",
                string
            ))),
        }
    }
}

fn de_level_filter<'de, D>(d: D) -> Result<LevelFilter, D::Error>
where
    D: Deserializer<'de>,
{
    let string = String::deserialize(d)?;
    LevelFilter::from_str(&string).map_err(de::Error::custom)
}


//============ Tests =========================================================

//! Configuration loading: TOML file, then environment, then command line.
//!
//! Looks for `busscripts.toml` in the working directory unless `--config`
//! names another file. Every field has a default so the file is optional.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use busscripts_adapter_mqtt::MqttConfig;
use busscripts_app::host::Sources;
use busscripts_app::runtime::RuntimeSettings;
use busscripts_domain::solar::Location;
use clap::{Parser, ValueEnum};
use serde::Deserialize;

const DEFAULT_PATH: &str = "busscripts.toml";
const ENV_PREFIX: &str = "BUSSCRIPTS_";

/// Command-line flags. Each one overrides the file and the environment.
#[derive(Debug, Default, Parser)]
#[command(name = "busscriptsd", version, about = "MQTT automation daemon running Rhai scripts")]
pub struct Cli {
    /// Configuration file.
    #[arg(short = 'c', long = "config", value_name = "PATH")]
    pub config: Option<PathBuf>,
    /// Broker URL.
    #[arg(short = 'u', long)]
    pub url: Option<String>,
    /// Instance name, used as client id prefix and liveness topic root.
    #[arg(short = 'n', long)]
    pub name: Option<String>,
    /// Root of the variable topics.
    #[arg(short = 's', long = "variable-prefix", value_name = "PREFIX")]
    pub variable_prefix: Option<String>,
    /// Ask the bus to set variables instead of writing them locally.
    #[arg(short = 't', long = "disable-variables")]
    pub disable_variables: bool,
    #[arg(short = 'l', long, allow_negative_numbers = true)]
    pub latitude: Option<f64>,
    #[arg(short = 'm', long, allow_negative_numbers = true)]
    pub longitude: Option<f64>,
    #[arg(short = 'v', long, value_enum)]
    pub verbosity: Option<Verbosity>,
    /// Directory of scripts; repeatable.
    #[arg(short = 'd', long = "dir", value_name = "DIR")]
    pub dirs: Vec<PathBuf>,
    /// Single script; repeatable.
    #[arg(short = 'f', long = "file", value_name = "FILE")]
    pub files: Vec<PathBuf>,
    /// Keep running when a script changes.
    #[arg(short = 'w', long = "disable-watch")]
    pub disable_watch: bool,
}

/// Log level used when no explicit filter is configured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Verbosity {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
}

impl Verbosity {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        <Self as ValueEnum>::from_str(value, true).ok()
    }
}

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub mqtt: MqttConfig,
    pub variables: VariablesConfig,
    pub location: LocationConfig,
    pub scripts: ScriptsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct VariablesConfig {
    pub prefix: String,
    pub enabled: bool,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LocationConfig {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ScriptsConfig {
    pub dirs: Vec<PathBuf>,
    pub files: Vec<PathBuf>,
    /// Exit when a script changes.
    pub watch: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub verbosity: Verbosity,
    /// Filter directive (`RUST_LOG` syntax), replaces `verbosity` when set.
    pub filter: Option<String>,
}

impl Config {
    /// Load the file, then apply `BUSSCRIPTS_*` variables, then `cli`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but is malformed, if a file named
    /// with `--config` is missing, or if the result fails validation.
    pub fn load(cli: &Cli) -> Result<Self, ConfigError> {
        let mut config = match &cli.config {
            Some(path) => Self::from_file(path, true)?,
            None => Self::from_file(Path::new(DEFAULT_PATH), false)?,
        };
        config.apply_env_overrides(|key| std::env::var_os(key));
        config.apply_cli(cli);
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path, required: bool) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(ConfigError::Parse),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound && !required => {
                Ok(Self::default())
            }
            Err(err) => Err(ConfigError::Io(err)),
        }
    }

    fn apply_env_overrides<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<OsString>,
    {
        let text = |key: &str| {
            var(&format!("{ENV_PREFIX}{key}")).and_then(|value| value.into_string().ok())
        };
        let flag = |key: &str| text(key).map(|value| matches!(value.as_str(), "1" | "true" | "yes"));

        if let Some(val) = text("URL") {
            self.mqtt.url = val;
        }
        if let Some(val) = text("NAME") {
            self.mqtt.name = val;
        }
        if let Some(val) = text("VARIABLE_PREFIX") {
            self.variables.prefix = val;
        }
        if let Some(disabled) = flag("DISABLE_VARIABLES") {
            self.variables.enabled = !disabled;
        }
        if let Some(lat) = text("LATITUDE").and_then(|val| val.parse().ok()) {
            self.location.latitude = lat;
        }
        if let Some(lon) = text("LONGITUDE").and_then(|val| val.parse().ok()) {
            self.location.longitude = lon;
        }
        if let Some(level) = text("VERBOSITY").as_deref().and_then(Verbosity::parse) {
            self.logging.verbosity = level;
        }
        if let Some(dirs) = var(&format!("{ENV_PREFIX}DIR")) {
            self.scripts.dirs = std::env::split_paths(&dirs).collect();
        }
        if let Some(disabled) = flag("DISABLE_WATCH") {
            self.scripts.watch = !disabled;
        }
        if let Some(val) = text("LOG") {
            self.logging.filter = Some(val);
        }
    }

    fn apply_cli(&mut self, cli: &Cli) {
        if let Some(url) = &cli.url {
            self.mqtt.url.clone_from(url);
        }
        if let Some(name) = &cli.name {
            self.mqtt.name.clone_from(name);
        }
        if let Some(prefix) = &cli.variable_prefix {
            self.variables.prefix.clone_from(prefix);
        }
        if cli.disable_variables {
            self.variables.enabled = false;
        }
        if let Some(lat) = cli.latitude {
            self.location.latitude = lat;
        }
        if let Some(lon) = cli.longitude {
            self.location.longitude = lon;
        }
        if let Some(level) = cli.verbosity {
            self.logging.verbosity = level;
            self.logging.filter = None;
        }
        if !cli.dirs.is_empty() {
            self.scripts.dirs.clone_from(&cli.dirs);
        }
        if !cli.files.is_empty() {
            self.scripts.files.clone_from(&cli.files);
        }
        if cli.disable_watch {
            self.scripts.watch = false;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(-90.0..=90.0).contains(&self.location.latitude) {
            return Err(ConfigError::Validation(format!(
                "latitude {} is outside [-90, 90]",
                self.location.latitude
            )));
        }
        if !(-180.0..=180.0).contains(&self.location.longitude) {
            return Err(ConfigError::Validation(format!(
                "longitude {} is outside [-180, 180]",
                self.location.longitude
            )));
        }
        if self.variables.prefix.is_empty() || self.variables.prefix.contains('/') {
            return Err(ConfigError::Validation(
                "variable prefix must be a single non-empty topic segment".to_string(),
            ));
        }
        self.mqtt
            .endpoint()
            .map_err(|err| ConfigError::Validation(err.to_string()))?;
        Ok(())
    }

    /// Settings of the automation core.
    #[must_use]
    pub fn runtime_settings(&self) -> RuntimeSettings {
        RuntimeSettings {
            variable_root: self.variables.prefix.clone(),
            variables_enabled: self.variables.enabled,
            location: Location {
                latitude: self.location.latitude,
                longitude: self.location.longitude,
            },
        }
    }

    /// Where scripts are loaded from.
    #[must_use]
    pub fn sources(&self) -> Sources {
        Sources {
            files: self.scripts.files.clone(),
            dirs: self.scripts.dirs.clone(),
        }
    }

    /// Directive for the log filter.
    #[must_use]
    pub fn log_directive(&self) -> String {
        self.logging
            .filter
            .clone()
            .unwrap_or_else(|| self.logging.verbosity.as_str().to_string())
    }
}

impl Default for VariablesConfig {
    fn default() -> Self {
        Self {
            prefix: "var".to_string(),
            enabled: true,
        }
    }
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            latitude: 48.7408,
            longitude: 9.1778,
        }
    }
}

impl Default for ScriptsConfig {
    fn default() -> Self {
        Self {
            dirs: Vec::new(),
            files: Vec::new(),
            watch: true,
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parse failure.
    #[error("failed to parse config file")]
    Parse(#[from] toml::de::Error),
    /// File I/O failure.
    #[error("failed to read config file")]
    Io(#[from] std::io::Error),
    /// Semantic validation failure.
    #[error("invalid configuration: {0}")]
    Validation(String),
}

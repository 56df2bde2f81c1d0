//! Configuration for the wordpage client and server.
//!
//! Both binaries read a flat key/value file (JSON, or TOML when the file
//! ends in `.toml`) and accept command-line overrides. CLI arguments take
//! precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Config file used when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "config.json";

/// Command-line arguments for the client
#[derive(Parser, Debug, Default)]
#[command(name = "wordpage-client")]
#[command(version = "0.1.0")]
#[command(about = "Fetch a word list page by page and report word frequencies", long_about = None)]
pub struct ClientArgs {
    /// Path to the configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Words requested per round (overrides `k`)
    #[arg(long)]
    pub k: Option<usize>,

    /// Initial offset (overrides `p`)
    #[arg(long)]
    pub p: Option<usize>,

    /// Perform a single request/response round
    #[arg(long)]
    pub run: bool,

    /// Suppress the timing and frequency report
    #[arg(long)]
    pub quiet: bool,

    /// Connect/read/write timeout in milliseconds (0 = none)
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// Command-line arguments for the server
#[derive(Parser, Debug, Default)]
#[command(name = "wordpage-server")]
#[command(version = "0.1.0")]
#[command(about = "Serve a word list in pages over TCP", long_about = None)]
pub struct ServerArgs {
    /// Path to the configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Accept another client after each session instead of exiting
    #[arg(long)]
    pub keep_alive: bool,

    /// Read/write timeout in milliseconds (0 = none)
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// Config file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Json,
    Toml,
}

impl Format {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => Format::Toml,
            _ => Format::Json,
        }
    }
}

/// A scalar config value as it appears in either file format.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Scalar {
    fn into_string(self) -> String {
        match self {
            Scalar::Bool(b) => b.to_string(),
            Scalar::Int(i) => i.to_string(),
            Scalar::Float(f) => f.to_string(),
            Scalar::Str(s) => s,
        }
    }
}

/// The config file as a string-to-string mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawConfig {
    values: BTreeMap<String, String>,
}

impl RawConfig {
    /// Read and parse a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileRead(path.to_path_buf(), e))?;
        Self::parse(&contents, Format::from_path(path))
            .map_err(|e| ConfigError::Parse(path.to_path_buf(), e))
    }

    /// Parse config text. Nested tables, arrays and nulls are rejected.
    pub fn parse(contents: &str, format: Format) -> Result<Self, String> {
        let scalars: BTreeMap<String, Scalar> = match format {
            Format::Json => serde_json::from_str(contents).map_err(|e| e.to_string())?,
            Format::Toml => toml::from_str(contents).map_err(|e| e.to_string())?,
        };

        Ok(RawConfig {
            values: scalars
                .into_iter()
                .map(|(k, v)| (k, v.into_string()))
                .collect(),
        })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    fn require(&self, key: &'static str) -> Result<&str, ConfigError> {
        self.get(key).ok_or(ConfigError::MissingKey(key))
    }

    fn parse_value<T>(&self, key: &'static str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.get(key)
            .map(|raw| parse_as(key, raw))
            .transpose()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RawConfig {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        RawConfig {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

fn parse_as<T>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key,
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

fn default_log_level() -> String {
    "info".to_string()
}

fn timeout(cli: Option<u64>, raw: &RawConfig) -> Result<Option<Duration>, ConfigError> {
    let ms = match cli {
        Some(ms) => ms,
        None => raw.parse_value::<u64>("timeout_ms")?.unwrap_or(0),
    };
    Ok((ms > 0).then(|| Duration::from_millis(ms)))
}

/// Final resolved client configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub server_ip: String,
    pub server_port: u16,
    /// Initial offset `p`
    pub offset: usize,
    /// Stride `k`, always > 0
    pub stride: usize,
    pub run_once: bool,
    pub quiet: bool,
    pub io_timeout: Option<Duration>,
    pub log_level: String,
}

impl ClientConfig {
    /// Load configuration from CLI args and the config file they name.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = ClientArgs::parse();
        let raw = RawConfig::load(&cli.config)?;
        Self::resolve(cli, &raw)
    }

    /// Merge CLI args over file values.
    pub fn resolve(cli: ClientArgs, raw: &RawConfig) -> Result<Self, ConfigError> {
        let stride = match cli.k {
            Some(k) => k,
            None => parse_as("k", raw.require("k")?)?,
        };
        if stride == 0 {
            return Err(ConfigError::InvalidValue {
                key: "k",
                value: "0".to_string(),
                reason: "stride must be positive".to_string(),
            });
        }

        Ok(ClientConfig {
            server_ip: raw.require("server_ip")?.to_string(),
            server_port: parse_as("server_port", raw.require("server_port")?)?,
            offset: match cli.p {
                Some(p) => p,
                None => raw.parse_value("p")?.unwrap_or(0),
            },
            stride,
            run_once: cli.run,
            quiet: cli.quiet,
            io_timeout: timeout(cli.timeout_ms, raw)?,
            log_level: cli
                .log_level
                .or_else(|| raw.get("log_level").map(str::to_string))
                .unwrap_or_else(default_log_level),
        })
    }
}

/// Final resolved server configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub server_ip: String,
    pub server_port: u16,
    /// Word list source
    pub filename: PathBuf,
    pub keep_alive: bool,
    pub io_timeout: Option<Duration>,
    pub log_level: String,
}

impl ServerConfig {
    /// Load configuration from CLI args and the config file they name.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = ServerArgs::parse();
        let raw = RawConfig::load(&cli.config)?;
        Self::resolve(cli, &raw)
    }

    /// Merge CLI args over file values.
    pub fn resolve(cli: ServerArgs, raw: &RawConfig) -> Result<Self, ConfigError> {
        Ok(ServerConfig {
            server_ip: raw.get("server_ip").unwrap_or("0.0.0.0").to_string(),
            server_port: parse_as("server_port", raw.require("server_port")?)?,
            filename: PathBuf::from(raw.require("filename")?),
            keep_alive: cli.keep_alive,
            io_timeout: timeout(cli.timeout_ms, raw)?,
            log_level: cli
                .log_level
                .or_else(|| raw.get("log_level").map(str::to_string))
                .unwrap_or_else(default_log_level),
        })
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read '{}': {}", .0.display(), .1)]
    FileRead(PathBuf, #[source] std::io::Error),
    #[error("failed to parse config file '{}': {}", .0.display(), .1)]
    Parse(PathBuf, String),
    #[error("missing required config key '{0}'")]
    MissingKey(&'static str),
    #[error("invalid value '{value}' for '{key}': {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RawConfig {
        RawConfig::parse(
            r#"{
                "server_ip": "127.0.0.1",
                "server_port": 8887,
                "p": 0,
                "k": 5,
                "filename": "words.txt"
            }"#,
            Format::Json,
        )
        .unwrap()
    }

    #[test]
    fn test_json_values_become_strings() {
        let raw = sample();
        assert_eq!(raw.get("server_ip"), Some("127.0.0.1"));
        assert_eq!(raw.get("server_port"), Some("8887"));
        assert_eq!(raw.get("k"), Some("5"));
        assert_eq!(raw.get("missing"), None);
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            server_ip = "10.0.0.1"
            server_port = "9000"
            filename = "corpus.txt"
            k = 3
            log_level = "debug"
        "#;

        let raw = RawConfig::parse(toml_str, Format::Toml).unwrap();
        let config = ServerConfig::resolve(ServerArgs::default(), &raw).unwrap();
        assert_eq!(config.server_ip, "10.0.0.1");
        assert_eq!(config.server_port, 9000);
        assert_eq!(config.filename, PathBuf::from("corpus.txt"));
        assert_eq!(config.log_level, "debug");
        assert!(!config.keep_alive);
    }

    #[test]
    fn test_nested_values_rejected() {
        assert!(RawConfig::parse(r#"{"k": [1, 2]}"#, Format::Json).is_err());
        assert!(RawConfig::parse("[server]\nport = 1\n", Format::Toml).is_err());
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(Format::from_path(Path::new("config.json")), Format::Json);
        assert_eq!(Format::from_path(Path::new("a/b.TOML")), Format::Toml);
        assert_eq!(Format::from_path(Path::new("settings")), Format::Json);
    }

    #[test]
    fn test_client_defaults_from_file() {
        let config = ClientConfig::resolve(ClientArgs::default(), &sample()).unwrap();
        assert_eq!(config.server_ip, "127.0.0.1");
        assert_eq!(config.server_port, 8887);
        assert_eq!(config.offset, 0);
        assert_eq!(config.stride, 5);
        assert!(!config.run_once);
        assert!(!config.quiet);
        assert_eq!(config.io_timeout, None);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_client_cli_overrides() {
        let cli = ClientArgs {
            k: Some(2),
            p: Some(4),
            run: true,
            quiet: true,
            timeout_ms: Some(250),
            ..ClientArgs::default()
        };
        let config = ClientConfig::resolve(cli, &sample()).unwrap();
        assert_eq!(config.stride, 2);
        assert_eq!(config.offset, 4);
        assert!(config.run_once);
        assert!(config.quiet);
        assert_eq!(config.io_timeout, Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_client_missing_p_defaults_to_zero() {
        let raw: RawConfig = [("server_ip", "localhost"), ("server_port", "1"), ("k", "1")]
            .into_iter()
            .collect();
        let config = ClientConfig::resolve(ClientArgs::default(), &raw).unwrap();
        assert_eq!(config.offset, 0);
    }

    #[test]
    fn test_client_missing_key() {
        let raw: RawConfig = [("server_port", "1"), ("k", "1")].into_iter().collect();
        match ClientConfig::resolve(ClientArgs::default(), &raw) {
            Err(ConfigError::MissingKey("server_ip")) => {}
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_zero_stride_rejected() {
        let cli = ClientArgs {
            k: Some(0),
            ..ClientArgs::default()
        };
        match ClientConfig::resolve(cli, &sample()) {
            Err(ConfigError::InvalidValue { key: "k", .. }) => {}
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_invalid_port() {
        let raw: RawConfig = [("server_port", "70000"), ("filename", "w.txt")]
            .into_iter()
            .collect();
        match ServerConfig::resolve(ServerArgs::default(), &raw) {
            Err(ConfigError::InvalidValue {
                key: "server_port", ..
            }) => {}
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_server_defaults() {
        let raw: RawConfig = [
            ("server_port", "8887"),
            ("filename", "w.txt"),
            ("timeout_ms", "0"),
        ]
        .into_iter()
        .collect();
        let config = ServerConfig::resolve(ServerArgs::default(), &raw).unwrap();
        assert_eq!(config.server_ip, "0.0.0.0");
        assert_eq!(config.io_timeout, None);
    }

    #[test]
    fn test_missing_file() {
        match RawConfig::load(Path::new("/nonexistent/wordpage.json")) {
            Err(ConfigError::FileRead(path, _)) => {
                assert_eq!(path, PathBuf::from("/nonexistent/wordpage.json"))
            }
            other => panic!("unexpected: {:?}", other),
        }
    }
}

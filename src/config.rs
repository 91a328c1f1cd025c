//! YAML configuration: server endpoints, log output and the watched file set.

use crate::error::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_HTTP_PORT: u16 = 8906;
pub const DEFAULT_WS_PORT: u16 = 9906;
pub const DEFAULT_WS_URL: &str = "ws://localhost";
pub const DEFAULT_LOG_FOLDER: &str = "/tmp";
pub const DEFAULT_HTML_FOLDER: &str = "html";
pub const DEFAULT_PATTERN: &str = "\n";
pub const DEFAULT_COLOR: &str = "auto";

/// One file to tail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WatchedFile {
    pub path: PathBuf,
    /// Regular expression separating records in appended content.
    pub pattern: String,
    /// Presentation hint for clients; never interpreted here.
    pub color: String,
}

impl WatchedFile {
    pub fn new(path: impl Into<PathBuf>, pattern: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            pattern: pattern.into(),
            color: DEFAULT_COLOR.to_string(),
        }
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = color.into();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    #[serde(deserialize_with = "or_default_host")]
    pub host: String,
    #[serde(deserialize_with = "or_default_http_port")]
    pub port: u16,
    #[serde(deserialize_with = "or_default_html")]
    pub html: PathBuf,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_HTTP_PORT,
            html: PathBuf::from(DEFAULT_HTML_FOLDER),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WebSocketConfig {
    /// Base URL advertised to browsers; the port is appended.
    #[serde(deserialize_with = "or_default_ws_url")]
    pub url: String,
    #[serde(deserialize_with = "or_default_host")]
    pub host: String,
    #[serde(deserialize_with = "or_default_ws_port")]
    pub port: u16,
}

impl WebSocketConfig {
    pub fn public_url(&self) -> String {
        format!("{}:{}", self.url.trim_end_matches('/'), self.port)
    }
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_WS_URL.to_string(),
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_WS_PORT,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub http: HttpConfig,
    pub websocket: WebSocketConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LogsConfig {
    #[serde(deserialize_with = "or_default_log_folder")]
    pub folder: PathBuf,
    #[serde(deserialize_with = "or_empty")]
    pub prefix: String,
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            folder: PathBuf::from(DEFAULT_LOG_FOLDER),
            prefix: String::new(),
        }
    }
}

impl LogsConfig {
    /// Full path of the application log file.
    pub fn file_path(&self) -> PathBuf {
        self.folder.join(format!("{}log-tracker.log", self.prefix))
    }
}

/// Loaded application configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub server: ServerConfig,
    pub logs: LogsConfig,
    pub files: Vec<WatchedFile>,
}

#[derive(Deserialize)]
struct RawConfig {
    server: Option<ServerConfig>,
    #[serde(default)]
    logs: Option<LogsConfig>,
    #[serde(default)]
    files: Option<Vec<RawFile>>,
}

#[derive(Deserialize)]
struct RawFile {
    path: Option<String>,
    pattern: Option<String>,
    color: Option<String>,
}

impl Config {
    /// Reads and parses a YAML configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config = Self::parse(&content)?;
        tracing::debug!(
            path = %path.as_ref().display(),
            files = config.files.len(),
            "configuration loaded"
        );
        Ok(config)
    }

    /// Parses YAML configuration text.
    pub fn parse(content: &str) -> Result<Self> {
        let raw: Option<RawConfig> = serde_yaml::from_str(content)?;
        let Some(raw) = raw else {
            return Err(Error::InvalidConfig {
                message: "configuration is empty".to_string(),
            });
        };
        let Some(server) = raw.server else {
            return Err(Error::InvalidConfig {
                message: "no server configuration".to_string(),
            });
        };

        let files = raw
            .files
            .unwrap_or_default()
            .into_iter()
            .filter_map(|file| {
                let path = file.path.filter(|p| !p.is_empty())?;
                Some(WatchedFile {
                    path: PathBuf::from(path),
                    pattern: non_empty_or(file.pattern, DEFAULT_PATTERN),
                    color: non_empty_or(file.color, DEFAULT_COLOR),
                })
            })
            .collect();

        Ok(Self {
            server,
            logs: raw.logs.unwrap_or_default(),
            files,
        })
    }
}

fn non_empty_or(value: Option<String>, default: &str) -> String {
    value
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

// Empty or null YAML values fall back to the documented default.
fn string_or<'de, D: Deserializer<'de>>(
    d: D,
    default: &str,
) -> std::result::Result<String, D::Error> {
    Ok(non_empty_or(Option::<String>::deserialize(d)?, default))
}

fn or_default_host<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<String, D::Error> {
    string_or(d, DEFAULT_HOST)
}

fn or_default_ws_url<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<String, D::Error> {
    string_or(d, DEFAULT_WS_URL)
}

fn or_default_html<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<PathBuf, D::Error> {
    string_or(d, DEFAULT_HTML_FOLDER).map(PathBuf::from)
}

fn or_default_log_folder<'de, D: Deserializer<'de>>(
    d: D,
) -> std::result::Result<PathBuf, D::Error> {
    string_or(d, DEFAULT_LOG_FOLDER).map(PathBuf::from)
}

fn or_empty<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<String, D::Error> {
    Ok(Option::<String>::deserialize(d)?.unwrap_or_default())
}

fn or_default_http_port<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<u16, D::Error> {
    Ok(Option::<u16>::deserialize(d)?.unwrap_or(DEFAULT_HTTP_PORT))
}

fn or_default_ws_port<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<u16, D::Error> {
    Ok(Option::<u16>::deserialize(d)?.unwrap_or(DEFAULT_WS_PORT))
}

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub report: ReportConfig,
}

impl AppConfig {
    /// Reads the TOML file (if any) and applies environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = match resolve_config_path() {
            Some(path) => Self::from_file(&path)?,
            None => AppConfig::default(),
        };
        config.apply_env(|key| env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        toml::from_str(&raw)
            .with_context(|| format!("failed to parse TOML from {}", path.display()))
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(url) = var("DATABASE_URL") {
            self.database.url = Some(url);
        }
        if let Some(host) = var("HOST") {
            self.server.host = host;
        }
        if let Some(port) = var("PORT") {
            self.server.port = port
                .parse()
                .with_context(|| format!("PORT must be a port number, got {port:?}"))?;
        }
        if let Some(level) = var("LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = var("LOG_FORMAT") {
            self.logging.format = match format.to_ascii_lowercase().as_str() {
                "json" => LogFormat::Json,
                _ => LogFormat::Text,
            };
        }
        if let Some(dir) = var("TEMPLATES_DIR") {
            self.report.templates_dir = PathBuf::from(dir);
        }
        if let Some(name) = var("REPORT_TEMPLATE_NAME") {
            self.report.template_name = name;
        }
        if let Some(dir) = var("TEMP_DIR") {
            self.report.temp_dir = Some(PathBuf::from(dir));
        }
        if let Some(binary) = var("CONVERTER_BINARY") {
            self.report.converter.binary = binary;
        }
        Ok(())
    }
}

fn resolve_config_path() -> Option<PathBuf> {
    if let Ok(path) = env::var("LESSONS_CONFIG") {
        return Some(PathBuf::from(path));
    }

    let local = Path::new("lessons.toml");
    local.exists().then(|| local.to_path_buf())
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_max_connections(),
        }
    }
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReportConfig {
    #[serde(default = "default_templates_dir")]
    pub templates_dir: PathBuf,
    #[serde(default = "default_template_name")]
    pub template_name: String,
    /// Root for per-report scratch directories.
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,
    #[serde(default)]
    pub converter: ConverterConfig,
}

impl ReportConfig {
    pub fn template_path(&self) -> PathBuf {
        self.templates_dir.join(&self.template_name)
    }

    /// The configured temp root, if it is an existing directory.
    pub fn temp_root(&self) -> Option<&Path> {
        self.temp_dir.as_deref().filter(|dir| dir.is_dir())
    }
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            templates_dir: default_templates_dir(),
            template_name: default_template_name(),
            temp_dir: None,
            converter: ConverterConfig::default(),
        }
    }
}

fn default_templates_dir() -> PathBuf {
    PathBuf::from("templates")
}

fn default_template_name() -> String {
    "report_template.docx".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConverterConfig {
    #[serde(default = "default_converter_binary")]
    pub binary: String,
    #[serde(default = "default_converter_timeout_secs")]
    pub timeout_secs: u64,
}

impl ConverterConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            binary: default_converter_binary(),
            timeout_secs: default_converter_timeout_secs(),
        }
    }
}

fn default_converter_binary() -> String {
    "libreoffice".to_string()
}

fn default_converter_timeout_secs() -> u64 {
    60
}

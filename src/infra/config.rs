//! Agent configuration and its on-disk form.
//!
//! Persists agent preferences (token driver, output location, retry policy,
//! PDF defaults, TSA and trust store settings) as TOML in the user's config
//! directory, with export and import in TOML, JSON and YAML.

use crate::adapters::timestamp_http_client::TsaCredentials;
use crate::domain::constants::{
    DEFAULT_MAX_SESSION_RETRIES, DEFAULT_NETWORK_TIMEOUT_SECS, DEFAULT_PDF_BACKOFF_STEP_MS,
    DEFAULT_PDF_LOCATION, DEFAULT_PDF_REASON, DEFAULT_XML_BACKOFF_STEP_MS,
};
use crate::domain::types::TimestampUrl;
use crate::infra::error::{SigningError, SigningResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding the PKCS#11 module path.
pub const PKCS11_MODULE_ENV: &str = "ESIGN_PKCS11_MODULE";

const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:8099";

/// Agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfiguration {
    /// PKCS#11 module; discovered from well-known paths when unset.
    pub pkcs11_module: Option<PathBuf>,

    /// Directory receiving signed artifacts.
    pub output_directory: PathBuf,

    /// Timeout for AIA, OCSP, CRL and TSA requests.
    pub network_timeout_seconds: u64,

    pub retry: RetryConfig,

    pub pdf: PdfDefaults,

    pub trust: TrustConfig,

    pub server: ServerConfig,
}

/// Session-invalid retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_session_retries: u32,
    /// Linear backoff step for XML signing.
    pub xml_backoff_step_ms: u64,
    /// Linear backoff step for PDF signing.
    pub pdf_backoff_step_ms: u64,
}

/// Defaults applied when a PDF request leaves an option unset.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PdfDefaults {
    pub reason: String,
    pub location: String,
    pub margin: f32,
    pub width: f32,
    pub height: f32,
    pub enable_timestamp: bool,
    pub timestamp_url: Option<String>,
    pub fallback_timestamp_urls: Vec<String>,
    pub tsa_username: Option<String>,
    pub tsa_password: Option<String>,
    pub auto_setup_trust_chain: bool,
    pub try_install_trust_to_local_machine: bool,
    pub configure_viewer_integration: bool,
}

/// Trust store and viewer integration locations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrustConfig {
    /// Root of the file trust store; platform data dir when unset.
    pub store_root: Option<PathBuf>,
    /// Viewer integration settings file; platform config dir when unset.
    pub viewer_settings_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    /// Browser origins allowed to call the API; empty allows any.
    pub allowed_origins: Vec<String>,
}

impl Default for AgentConfiguration {
    fn default() -> Self {
        Self {
            pkcs11_module: None,
            output_directory: default_output_directory(),
            network_timeout_seconds: DEFAULT_NETWORK_TIMEOUT_SECS,
            retry: RetryConfig::default(),
            pdf: PdfDefaults::default(),
            trust: TrustConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_session_retries: DEFAULT_MAX_SESSION_RETRIES,
            xml_backoff_step_ms: DEFAULT_XML_BACKOFF_STEP_MS,
            pdf_backoff_step_ms: DEFAULT_PDF_BACKOFF_STEP_MS,
        }
    }
}

impl Default for PdfDefaults {
    fn default() -> Self {
        Self {
            reason: DEFAULT_PDF_REASON.to_string(),
            location: DEFAULT_PDF_LOCATION.to_string(),
            margin: 24.0,
            width: 300.0,
            height: 128.0,
            enable_timestamp: false,
            timestamp_url: None,
            fallback_timestamp_urls: Vec::new(),
            tsa_username: None,
            tsa_password: None,
            auto_setup_trust_chain: true,
            try_install_trust_to_local_machine: true,
            configure_viewer_integration: true,
        }
    }
}

impl std::fmt::Debug for PdfDefaults {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PdfDefaults")
            .field("reason", &self.reason)
            .field("location", &self.location)
            .field("enable_timestamp", &self.enable_timestamp)
            .field("timestamp_url", &self.timestamp_url)
            .field("tsa_username", &self.tsa_username)
            .field("tsa_password", &self.tsa_password.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            allowed_origins: Vec::new(),
        }
    }
}

fn default_output_directory() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("esign-agent").join("signed-documents"))
        .unwrap_or_else(|| PathBuf::from("signed-documents"))
}

impl AgentConfiguration {
    #[must_use]
    pub fn network_timeout(&self) -> Duration {
        Duration::from_secs(self.network_timeout_seconds)
    }

    /// Module path with the environment override applied.
    #[must_use]
    pub fn effective_pkcs11_module(&self) -> Option<PathBuf> {
        std::env::var_os(PKCS11_MODULE_ENV)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .or_else(|| self.pkcs11_module.clone())
    }

    /// Basic-auth credentials when a username is configured.
    #[must_use]
    pub fn tsa_credentials(&self) -> Option<TsaCredentials> {
        credentials_from(self.pdf.tsa_username.as_deref(), self.pdf.tsa_password.as_deref())
    }
}

/// Pair a username with its (possibly empty) password.
#[must_use]
pub fn credentials_from(username: Option<&str>, password: Option<&str>) -> Option<TsaCredentials> {
    let username = username.map(str::trim).filter(|u| !u.is_empty())?;
    Some(TsaCredentials {
        username: username.to_string(),
        password: password.unwrap_or_default().to_string(),
    })
}

/// Reads and writes the agent's TOML file.
pub struct ConfigManager {
    config_path: PathBuf,
}

fn config_err(context: impl std::fmt::Display, e: impl std::fmt::Display) -> SigningError {
    SigningError::ConfigurationError(format!("{context}: {e}"))
}

impl ConfigManager {
    /// Manager for the per-user file; see [`Self::default_config_path`].
    pub fn new() -> SigningResult<Self> {
        Self::default_config_path().map(Self::with_path)
    }

    pub fn with_path<P: AsRef<Path>>(path: P) -> Self {
        Self {
            config_path: path.as_ref().into(),
        }
    }

    /// `{config_dir}/esign-agent/config.toml`, or a file in the working
    /// directory when the platform has no config dir.
    pub fn default_config_path() -> SigningResult<PathBuf> {
        Ok(dirs::config_dir().map_or_else(
            || PathBuf::from("esign-agent-config.toml"),
            |dir| dir.join("esign-agent").join("config.toml"),
        ))
    }

    /// Existing file, or the defaults written to disk on first run.
    pub fn load_or_create_default(&self) -> SigningResult<AgentConfiguration> {
        if self.config_path.is_file() {
            return self.load();
        }
        log::info!("No configuration at {}; writing defaults", self.config_path.display());
        let defaults = AgentConfiguration::default();
        self.save(&defaults)?;
        Ok(defaults)
    }

    pub fn load(&self) -> SigningResult<AgentConfiguration> {
        let path = self.config_path.display();
        log::debug!("Reading configuration {path}");
        let text = fs::read_to_string(&self.config_path)
            .map_err(|e| config_err(format_args!("cannot read {path}"), e))?;
        let config = ExportFormat::Toml.decode(&text)?;
        Self::validate(&config)?;
        Ok(config)
    }

    pub fn save(&self, config: &AgentConfiguration) -> SigningResult<()> {
        let path = self.config_path.display();
        log::info!("Writing configuration {path}");
        match self.config_path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => fs::create_dir_all(dir)
                .map_err(|e| config_err(format_args!("cannot create {}", dir.display()), e))?,
            _ => {}
        }
        let text = ExportFormat::Toml.encode(config)?;
        fs::write(&self.config_path, text)
            .map_err(|e| config_err(format_args!("cannot write {path}"), e))
    }

    /// Reject values the agent cannot work with.
    pub fn validate(config: &AgentConfiguration) -> SigningResult<()> {
        if let Some(url) = &config.pdf.timestamp_url {
            TimestampUrl::new(url)?;
        }
        for url in &config.pdf.fallback_timestamp_urls {
            TimestampUrl::new(url)?;
        }

        if config.network_timeout_seconds == 0 {
            return Err(SigningError::ConfigurationError(
                "network_timeout_seconds must be at least 1".into(),
            ));
        }

        if config.pdf.margin < 0.0 || config.pdf.width <= 0.0 || config.pdf.height <= 0.0 {
            return Err(SigningError::ConfigurationError(
                "PDF margin must be non-negative and widget size positive".to_string(),
            ));
        }

        if config.server.bind_address.parse::<std::net::SocketAddr>().is_err() {
            return Err(SigningError::ConfigurationError(format!(
                "Invalid server bind address: {}",
                config.server.bind_address
            )));
        }

        if let Some(origin) = config
            .server
            .allowed_origins
            .iter()
            .find(|origin| !crate::adapters::server::is_valid_origin(origin))
        {
            return Err(SigningError::ConfigurationError(format!(
                "Invalid allowed origin: {origin}"
            )));
        }

        Ok(())
    }

    /// Update one dotted key, e.g. `pdf.reason` or `retry.max_session_retries`.
    pub fn update_value(&self, key: &str, value: &str) -> SigningResult<()> {
        let mut config = self.load_or_create_default()?;

        match key {
            "pkcs11_module" => {
                config.pkcs11_module = optional(value).map(PathBuf::from);
            }
            "output_directory" => config.output_directory = PathBuf::from(value),
            "network_timeout_seconds" => config.network_timeout_seconds = parse(key, value)?,
            "retry.max_session_retries" => config.retry.max_session_retries = parse(key, value)?,
            "retry.xml_backoff_step_ms" => config.retry.xml_backoff_step_ms = parse(key, value)?,
            "retry.pdf_backoff_step_ms" => config.retry.pdf_backoff_step_ms = parse(key, value)?,
            "pdf.reason" => config.pdf.reason = value.to_string(),
            "pdf.location" => config.pdf.location = value.to_string(),
            "pdf.margin" => config.pdf.margin = parse(key, value)?,
            "pdf.width" => config.pdf.width = parse(key, value)?,
            "pdf.height" => config.pdf.height = parse(key, value)?,
            "pdf.enable_timestamp" => config.pdf.enable_timestamp = parse(key, value)?,
            "pdf.timestamp_url" => {
                if let Some(url) = optional(value) {
                    TimestampUrl::new(url)?;
                }
                config.pdf.timestamp_url = optional(value).map(str::to_string);
            }
            "pdf.tsa_username" => config.pdf.tsa_username = optional(value).map(str::to_string),
            "pdf.tsa_password" => config.pdf.tsa_password = optional(value).map(str::to_string),
            "pdf.auto_setup_trust_chain" => config.pdf.auto_setup_trust_chain = parse(key, value)?,
            "pdf.try_install_trust_to_local_machine" => {
                config.pdf.try_install_trust_to_local_machine = parse(key, value)?;
            }
            "pdf.configure_viewer_integration" => {
                config.pdf.configure_viewer_integration = parse(key, value)?;
            }
            "trust.store_root" => config.trust.store_root = optional(value).map(PathBuf::from),
            "trust.viewer_settings_file" => {
                config.trust.viewer_settings_file = optional(value).map(PathBuf::from);
            }
            "server.bind_address" => config.server.bind_address = value.to_string(),
            "server.allowed_origins" => {
                config.server.allowed_origins = value
                    .split(',')
                    .map(str::trim)
                    .filter(|origin| !origin.is_empty())
                    .map(str::to_string)
                    .collect();
            }
            _ => {
                return Err(SigningError::ConfigurationError(format!(
                    "no configuration key named {key}"
                )));
            }
        }

        Self::validate(&config)?;
        self.save(&config)
    }

    #[must_use]
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Current configuration serialized as `format`.
    pub fn export_config(&self, format: ExportFormat) -> SigningResult<String> {
        format.encode(&self.load_or_create_default()?)
    }

    /// Replace the stored configuration with `content`, after validation.
    pub fn import_config(&self, content: &str, format: ExportFormat) -> SigningResult<()> {
        let config = format.decode(content)?;
        Self::validate(&config)?;
        self.save(&config)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Toml,
    Json,
    Yaml,
}

impl ExportFormat {
    fn name(self) -> &'static str {
        match self {
            ExportFormat::Toml => "TOML",
            ExportFormat::Json => "JSON",
            ExportFormat::Yaml => "YAML",
        }
    }

    fn encode(self, config: &AgentConfiguration) -> SigningResult<String> {
        let encoded = match self {
            ExportFormat::Toml => toml::to_string_pretty(config).map_err(|e| e.to_string()),
            ExportFormat::Json => serde_json::to_string_pretty(config).map_err(|e| e.to_string()),
            ExportFormat::Yaml => serde_yaml::to_string(config).map_err(|e| e.to_string()),
        };
        encoded.map_err(|e| config_err(format_args!("{} encoding failed", self.name()), e))
    }

    fn decode(self, content: &str) -> SigningResult<AgentConfiguration> {
        let decoded: Result<AgentConfiguration, String> = match self {
            ExportFormat::Toml => toml::from_str(content).map_err(|e| e.to_string()),
            ExportFormat::Json => serde_json::from_str(content).map_err(|e| e.to_string()),
            ExportFormat::Yaml => serde_yaml::from_str(content).map_err(|e| e.to_string()),
        };
        decoded.map_err(|e| config_err(format_args!("invalid {} configuration", self.name()), e))
    }
}

fn optional(value: &str) -> Option<&str> {
    let value = value.trim();
    (!value.is_empty() && !value.eq_ignore_ascii_case("none")).then_some(value)
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> SigningResult<T> {
    value.trim().parse().map_err(|_| {
        SigningError::ConfigurationError(format!("Invalid value for {key}: {value}"))
    })
}

//! Service configuration loading
//!
//! Configuration file resolution follows this priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. Default system location (`/etc/callgate/callgate.toml`) if present
//! 4. Compiled defaults (no file)
//!
//! Every field has a serde default so a partial TOML file is valid.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default system-wide configuration location
pub const DEFAULT_CONFIG_PATH: &str = "/etc/callgate/callgate.toml";

/// Top-level service configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// HTTP listen address
    pub bind_addr: String,
    /// SQLite database file
    pub database_path: PathBuf,
    /// Largest accepted webhook body in bytes
    pub max_body_bytes: usize,
    /// Header carrying the `sha256=<hex>` webhook signature
    pub signature_header: String,
    /// Upper bound on how long a resolved tenant is served from cache
    pub tenant_cache_ttl_secs: u64,
    /// Fixed rate-limit window length
    pub rate_limit_window_secs: u64,
    pub pipeline: PipelineConfig,
    pub collaborators: CollaboratorConfig,
    pub logging: LoggingConfig,
}

/// Orchestrator bounds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Ceiling on concurrently running ingestions; admissions beyond it are
    /// rejected with a retriable error
    pub max_in_flight: usize,
    /// Per-stage deadline
    pub stage_timeout_secs: u64,
    /// Deadline for a whole ingestion run
    pub overall_deadline_secs: u64,
}

/// Endpoints and limits for the HTTP collaborator implementations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollaboratorConfig {
    /// Speech-to-text endpoint (POST audio bytes)
    pub transcription_url: Option<String>,
    /// Extraction endpoint (POST transcript + tenant rules)
    pub extraction_url: Option<String>,
    /// Largest audio file fetched from a recording URL
    pub max_audio_bytes: usize,
    /// Timeout applied to each outbound HTTP request
    pub http_timeout_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is not set
    pub level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:5780".to_string(),
            database_path: PathBuf::from("callgate.db"),
            max_body_bytes: 1024 * 1024,
            signature_header: "x-webhook-signature".to_string(),
            tenant_cache_ttl_secs: 30,
            rate_limit_window_secs: 60,
            pipeline: PipelineConfig::default(),
            collaborators: CollaboratorConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 64,
            stage_timeout_secs: 30,
            overall_deadline_secs: 300,
        }
    }
}

impl Default for CollaboratorConfig {
    fn default() -> Self {
        Self {
            transcription_url: None,
            extraction_url: None,
            max_audio_bytes: 50 * 1024 * 1024,
            http_timeout_secs: 20,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl PipelineConfig {
    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_secs)
    }

    pub fn overall_deadline(&self) -> Duration {
        Duration::from_secs(self.overall_deadline_secs)
    }
}

impl ServiceConfig {
    /// Parse configuration from TOML text and validate it
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: ServiceConfig = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    pub fn tenant_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.tenant_cache_ttl_secs)
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }

    /// Reject values that would disable a safety bound
    pub fn validate(&self) -> Result<()> {
        if self.max_body_bytes == 0 {
            return Err(Error::Config("max_body_bytes must be > 0".to_string()));
        }
        if self.signature_header.trim().is_empty() {
            return Err(Error::Config("signature_header must not be empty".to_string()));
        }
        if self.rate_limit_window_secs == 0 {
            return Err(Error::Config("rate_limit_window_secs must be > 0".to_string()));
        }
        if self.pipeline.max_in_flight == 0 {
            return Err(Error::Config("pipeline.max_in_flight must be > 0".to_string()));
        }
        if self.pipeline.stage_timeout_secs == 0 || self.pipeline.overall_deadline_secs == 0 {
            return Err(Error::Config("pipeline timeouts must be > 0".to_string()));
        }
        Ok(())
    }
}

/// Resolve which configuration file to read, if any
pub fn resolve_config_path(cli_arg: Option<&Path>, env_var_name: &str) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: System location
    let system = PathBuf::from(DEFAULT_CONFIG_PATH);
    if system.exists() {
        return Some(system);
    }

    None
}

/// Load the service configuration, falling back to compiled defaults when no
/// file is configured
pub fn load_service_config(cli_arg: Option<&Path>, env_var_name: &str) -> Result<ServiceConfig> {
    match resolve_config_path(cli_arg, env_var_name) {
        Some(path) => {
            tracing::info!("Loading configuration from {}", path.display());
            ServiceConfig::load(&path)
        }
        None => {
            tracing::info!("No configuration file found, using defaults");
            Ok(ServiceConfig::default())
        }
    }
}

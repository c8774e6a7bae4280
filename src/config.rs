//! Backend configuration
//!
//! Loaded from a JSON file. Optional fields take the defaults below; the
//! whole document is validated before anything is built from it.

use std::fs;
use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::auth::PasswordPolicy;
use crate::store::StartingPosition;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Read(#[from] std::io::Error),

    #[error("Invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {field}: {reason}")]
    Invalid { field: String, reason: String },
}

impl ConfigError {
    fn invalid(field: &str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ConfigError::Read(_) => "CONFIG_READ_ERROR",
            ConfigError::Parse(_) => "CONFIG_PARSE_ERROR",
            ConfigError::Invalid { .. } => "CONFIG_INVALID",
        }
    }
}

pub type ConfigResult<T> = Result<T, ConfigError>;

const NAME_PATTERN: &str = r"^[A-Za-z0-9_-]+$";
const MAX_BATCH_SIZE: usize = 10_000;
const MIN_SECRET_BYTES: usize = 16;

/// Top-level backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendConfig {
    /// Prefix of every resource name
    pub app_name: String,

    #[serde(default)]
    pub api: ApiConfig,

    pub auth: AuthConfig,

    #[serde(default)]
    pub functions: FunctionsConfig,

    #[serde(default)]
    pub table: TableSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiConfig {
    #[serde(default = "default_api_name")]
    pub name: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            name: default_api_name(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthConfig {
    #[serde(default = "default_pool_name")]
    pub pool_name: String,

    #[serde(default = "default_client_name")]
    pub client_name: String,

    #[serde(default = "default_identity_name")]
    pub identity_name: String,

    #[serde(default = "default_true")]
    pub allow_unauthenticated_identities: bool,

    #[serde(default)]
    pub password_policy: PasswordPolicy,

    pub jwt: JwtSettings,

    /// Lifetime of verification and recovery codes
    #[serde(default = "default_code_ttl_minutes")]
    pub code_ttl_minutes: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JwtSettings {
    pub secret: String,

    #[serde(default = "default_ttl_minutes")]
    pub ttl_minutes: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionsConfig {
    #[serde(default)]
    pub trip_table_stream: StreamFunctionConfig,
}

/// The stream consumer attached to the trip table
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamFunctionConfig {
    #[serde(default = "default_stream_function_name")]
    pub name: String,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default)]
    pub starting_position: StartingPosition,

    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default = "default_batch_timeout_ms")]
    pub batch_timeout_ms: u64,

    /// Unacknowledged batches are redelivered after this long
    #[serde(default = "default_visibility_timeout_ms")]
    pub visibility_timeout_ms: u64,

    /// First delay before a failed batch is redelivered; doubles per retry
    #[serde(default = "default_redelivery_backoff_ms")]
    pub redelivery_backoff_ms: u64,

    #[serde(default = "default_max_redelivery_backoff_ms")]
    pub max_redelivery_backoff_ms: u64,
}

impl Default for StreamFunctionConfig {
    fn default() -> Self {
        Self {
            name: default_stream_function_name(),
            batch_size: default_batch_size(),
            starting_position: StartingPosition::default(),
            workers: default_workers(),
            batch_timeout_ms: default_batch_timeout_ms(),
            visibility_timeout_ms: default_visibility_timeout_ms(),
            redelivery_backoff_ms: default_redelivery_backoff_ms(),
            max_redelivery_backoff_ms: default_max_redelivery_backoff_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSettings {
    #[serde(default = "default_table_name")]
    pub name: String,

    #[serde(default = "default_partitions")]
    pub partitions: u32,
}

impl Default for TableSettings {
    fn default() -> Self {
        Self {
            name: default_table_name(),
            partitions: default_partitions(),
        }
    }
}

fn default_api_name() -> String {
    "api".to_string()
}
fn default_pool_name() -> String {
    "userpool".to_string()
}
fn default_client_name() -> String {
    "userpool-client".to_string()
}
fn default_identity_name() -> String {
    "identitypool".to_string()
}
fn default_true() -> bool {
    true
}
fn default_ttl_minutes() -> i64 {
    15
}
fn default_code_ttl_minutes() -> i64 {
    24 * 60
}
fn default_stream_function_name() -> String {
    "trip-table-stream".to_string()
}
fn default_batch_size() -> usize {
    100
}
fn default_workers() -> usize {
    1
}
fn default_batch_timeout_ms() -> u64 {
    10_000
}
fn default_visibility_timeout_ms() -> u64 {
    60_000
}
fn default_redelivery_backoff_ms() -> u64 {
    250
}
fn default_max_redelivery_backoff_ms() -> u64 {
    30_000
}
fn default_table_name() -> String {
    "Trip".to_string()
}
fn default_partitions() -> u32 {
    4
}

/// Derived resource names
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceNames {
    pub api: String,
    pub user_pool: String,
    pub user_pool_client: String,
    pub identity_pool: String,
    pub stream_function: String,
    pub table: String,
}

impl BackendConfig {
    /// Load and validate a configuration file
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> ConfigResult<Self> {
        let config: BackendConfig = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        let pattern = Regex::new(NAME_PATTERN)
            .map_err(|e| ConfigError::invalid("pattern", e.to_string()))?;

        let names = [
            ("appName", &self.app_name),
            ("api.name", &self.api.name),
            ("auth.poolName", &self.auth.pool_name),
            ("auth.clientName", &self.auth.client_name),
            ("auth.identityName", &self.auth.identity_name),
            ("functions.tripTableStream.name", &self.functions.trip_table_stream.name),
            ("table.name", &self.table.name),
        ];
        for (field, value) in names {
            if !pattern.is_match(value) {
                return Err(ConfigError::invalid(
                    field,
                    format!("'{}' must match {}", value, NAME_PATTERN),
                ));
            }
        }

        if self.auth.jwt.secret.len() < MIN_SECRET_BYTES {
            return Err(ConfigError::invalid(
                "auth.jwt.secret",
                format!("must be at least {} bytes", MIN_SECRET_BYTES),
            ));
        }
        if self.auth.jwt.ttl_minutes <= 0 {
            return Err(ConfigError::invalid("auth.jwt.ttlMinutes", "must be > 0"));
        }
        if self.auth.code_ttl_minutes <= 0 {
            return Err(ConfigError::invalid("auth.codeTtlMinutes", "must be > 0"));
        }

        let stream = &self.functions.trip_table_stream;
        if !(1..=MAX_BATCH_SIZE).contains(&stream.batch_size) {
            return Err(ConfigError::invalid(
                "functions.tripTableStream.batchSize",
                format!("must be between 1 and {}", MAX_BATCH_SIZE),
            ));
        }
        if stream.workers == 0 {
            return Err(ConfigError::invalid("functions.tripTableStream.workers", "must be >= 1"));
        }
        if stream.batch_timeout_ms == 0 {
            return Err(ConfigError::invalid(
                "functions.tripTableStream.batchTimeoutMs",
                "must be > 0",
            ));
        }
        // A batch must time out before its lease can be handed to another worker
        if stream.visibility_timeout_ms <= stream.batch_timeout_ms {
            return Err(ConfigError::invalid(
                "functions.tripTableStream.visibilityTimeoutMs",
                "must be greater than batchTimeoutMs",
            ));
        }
        if stream.redelivery_backoff_ms == 0 {
            return Err(ConfigError::invalid(
                "functions.tripTableStream.redeliveryBackoffMs",
                "must be > 0",
            ));
        }
        if stream.max_redelivery_backoff_ms < stream.redelivery_backoff_ms {
            return Err(ConfigError::invalid(
                "functions.tripTableStream.maxRedeliveryBackoffMs",
                "must be >= redeliveryBackoffMs",
            ));
        }

        if self.table.partitions == 0 {
            return Err(ConfigError::invalid("table.partitions", "must be >= 1"));
        }

        Ok(())
    }

    /// `<appName>-<name>`
    pub fn resource_name(&self, name: &str) -> String {
        format!("{}-{}", self.app_name, name)
    }

    pub fn resource_names(&self) -> ResourceNames {
        ResourceNames {
            api: self.resource_name(&self.api.name),
            user_pool: self.resource_name(&self.auth.pool_name),
            user_pool_client: self.resource_name(&self.auth.client_name),
            identity_pool: self.resource_name(&self.auth.identity_name),
            stream_function: self.resource_name(&self.functions.trip_table_stream.name),
            table: self.resource_name(&self.table.name),
        }
    }
}

//! Engine configuration and plugin configuration merging.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use warden_nonce::InMemoryNonceTracker;

use crate::error::EngineError;

/// Main engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Where the engine is running
    #[serde(default)]
    pub execution_context: ExecutionContext,

    /// Skip access-rule checks entirely. Never set this in production.
    #[serde(default)]
    pub ignore_access_rules: bool,

    /// Replay protection
    #[serde(default)]
    pub nonce: NonceConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            execution_context: ExecutionContext::Agent,
            ignore_access_rules: false,
            nonce: NonceConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Execution context of the running process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionContext {
    /// Managed agent: access rules enforced, packages loaded securely
    #[default]
    Agent,

    /// Local user session: the user is running their own workflow
    Local,
}

/// Nonce tracker configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NonceConfig {
    /// How long a tracked nonce stays valid, in seconds.
    /// Must exceed the longest workflow validity window.
    #[serde(default = "default_nonce_retention")]
    pub retention_secs: u64,
}

impl NonceConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    /// In-memory tracker with this retention.
    pub fn tracker(&self) -> InMemoryNonceTracker {
        InMemoryNonceTracker::new(self.retention())
    }
}

impl Default for NonceConfig {
    fn default() -> Self {
        Self {
            retention_secs: default_nonce_retention(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or filter directive
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,

    /// Include timestamps
    #[serde(default = "default_true")]
    pub timestamps: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            timestamps: true,
        }
    }
}

// Default value helpers
fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_nonce_retention() -> u64 {
    24 * 60 * 60
}

impl EngineConfig {
    /// Load configuration: defaults, then an optional file, then `WARDEN__*`
    /// environment variables (`WARDEN__NONCE__RETENTION_SECS=3600`).
    pub fn load(path: Option<&str>) -> Result<Self, EngineError> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&EngineConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("WARDEN")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        Ok(builder.build()?.try_deserialize()?)
    }

    /// Configuration for a user running workflows on their own machine
    pub fn local() -> Self {
        Self {
            execution_context: ExecutionContext::Local,
            ..Default::default()
        }
    }

    /// Whether access-rule checks are skipped, and why.
    pub fn access_check_bypass(&self) -> Option<&'static str> {
        if self.execution_context == ExecutionContext::Local {
            Some("local execution context")
        } else if self.ignore_access_rules {
            Some("ignore_access_rules override")
        } else {
            None
        }
    }
}

/// Overlay `overlay` onto `base`.
///
/// Objects merge key by key, recursively. Any other overlay value replaces the
/// base value, except that a `null` inside an object deletes the key. A
/// top-level `null` overlay leaves `base` unchanged.
pub fn merge_configuration(base: &Value, overlay: &Value) -> Value {
    match (base, overlay) {
        (_, Value::Null) => base.clone(),
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            let mut merged: Map<String, Value> = base_map.clone();
            for (key, value) in overlay_map {
                if value.is_null() {
                    merged.remove(key);
                    continue;
                }
                let next = match merged.get(key) {
                    Some(existing) => merge_configuration(existing, value),
                    None => value.clone(),
                };
                merged.insert(key.clone(), next);
            }
            Value::Object(merged)
        }
        (_, other) => other.clone(),
    }
}

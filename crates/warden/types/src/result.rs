//! Step outcome taxonomy and plugin results.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Result code a plugin reports when it completed normally.
pub const RESULT_SUCCESS: &str = "Success";

/// Result code recorded when a plugin raised an error.
pub const RESULT_FAILURE: &str = "Failure";

/// Terminal outcome of one processed step.
///
/// Every variant except [`StepOutcome::RanPluginOk`] is produced by exactly
/// one pipeline phase refusing to continue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepOutcome {
    InvalidMessageSignature,
    Unauthorized,
    InvalidNonce,
    PackageVerificationFailed,
    ConditionsNotMet,
    RanPluginWithError,
    RanPluginOk,
}

impl StepOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidMessageSignature => "InvalidMessageSignature",
            Self::Unauthorized => "Unauthorized",
            Self::InvalidNonce => "InvalidNonce",
            Self::PackageVerificationFailed => "PackageVerificationFailed",
            Self::ConditionsNotMet => "ConditionsNotMet",
            Self::RanPluginWithError => "RanPluginWithError",
            Self::RanPluginOk => "RanPluginOk",
        }
    }

    /// Whether a plugin actually ran (successfully or not).
    pub fn plugin_ran(&self) -> bool {
        matches!(self, Self::RanPluginOk | Self::RanPluginWithError)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::RanPluginOk)
    }
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a plugin hands back after execution.
///
/// `secure_outputs` travel to the next step only; they never appear in a
/// finalized workflow receipt.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PluginResult {
    pub result_code: String,
    #[serde(default)]
    pub outputs: BTreeMap<String, Value>,
    #[serde(default)]
    pub secure_outputs: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl PluginResult {
    pub fn success() -> Self {
        Self {
            result_code: RESULT_SUCCESS.to_string(),
            ..Default::default()
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            result_code: RESULT_FAILURE.to_string(),
            message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn with_code(code: impl Into<String>) -> Self {
        Self {
            result_code: code.into(),
            ..Default::default()
        }
    }

    pub fn with_output(mut self, key: impl Into<String>, value: Value) -> Self {
        self.outputs.insert(key.into(), value);
        self
    }

    pub fn with_secure_output(mut self, key: impl Into<String>, value: Value) -> Self {
        self.secure_outputs.insert(key.into(), value);
        self
    }

    /// Copy of this result with every secure output removed.
    pub fn scrubbed(&self) -> Self {
        Self {
            result_code: self.result_code.clone(),
            outputs: self.outputs.clone(),
            secure_outputs: BTreeMap::new(),
            message: self.message.clone(),
        }
    }

    /// Public and secure outputs as one map, secure values winning on collision.
    pub fn shared_outputs(&self) -> BTreeMap<String, Value> {
        let mut shared = self.outputs.clone();
        shared.extend(self.secure_outputs.clone());
        shared
    }
}

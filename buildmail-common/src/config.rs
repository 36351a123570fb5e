//! Notification-server configuration.
//!
//! Read-only input to the dispatch pipeline, threaded explicitly through
//! it rather than looked up ambiently. Hosts typically deserialize this
//! from their configuration store; a TOML loader is provided.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Administrator-level settings consumed by the dispatch pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Sender address for every notification
    #[serde(default = "defaults::admin_address")]
    pub admin_address: String,

    /// Default MIME content type (e.g. `text/html`) applied when neither
    /// the trigger nor the project picks one. Unset falls back to
    /// `text/plain`.
    #[serde(default)]
    pub default_content_type: Option<String>,

    /// Global charset for subject and body
    #[serde(default = "defaults::charset")]
    pub charset: String,

    /// Notification-server charset override; wins over `charset` only
    /// when non-blank
    #[serde(default)]
    pub charset_override: Option<String>,

    /// Emergency reroute address list. When non-blank, every notification
    /// goes only to these addresses, regardless of providers, recipient
    /// lists, or gate-script edits.
    #[serde(default)]
    pub emergency_reroute: String,

    /// Patterns removed from resolved recipients. `*` matches any run of
    /// characters; comparison is against the normalized address.
    #[serde(default)]
    pub excluded_recipients: Vec<String>,

    /// Emit per-step debug lines into the build log
    #[serde(default)]
    pub debug_mode: bool,

    /// Value for the `List-ID` header, when set
    #[serde(default)]
    pub list_id: Option<String>,

    /// Add a `Precedence: bulk` header to every notification
    #[serde(default)]
    pub precedence_bulk: bool,

    /// Ask the script engine to sandbox gate scripts
    #[serde(default)]
    pub sandbox_enabled: bool,

    /// Upper bound on gate-script execution, in seconds
    #[serde(default = "defaults::script_timeout_secs")]
    pub script_timeout_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            admin_address: defaults::admin_address(),
            default_content_type: None,
            charset: defaults::charset(),
            charset_override: None,
            emergency_reroute: String::new(),
            excluded_recipients: Vec::new(),
            debug_mode: false,
            list_id: None,
            precedence_bulk: false,
            sandbox_enabled: false,
            script_timeout_secs: defaults::script_timeout_secs(),
        }
    }
}

impl DispatchConfig {
    /// Parse configuration from a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the document is not valid TOML for this
    /// structure.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        toml::from_str(input).map_err(ConfigError::from)
    }

    /// The effective charset: the override wins only when non-blank.
    #[must_use]
    pub fn effective_charset(&self) -> &str {
        match self.charset_override.as_deref() {
            Some(value) if !value.trim().is_empty() => value,
            _ => &self.charset,
        }
    }

    /// Whether the emergency reroute is active.
    #[must_use]
    pub fn has_emergency_reroute(&self) -> bool {
        !self.emergency_reroute.trim().is_empty()
    }
}

mod defaults {
    pub fn admin_address() -> String {
        "nobody@nowhere".to_string()
    }

    pub fn charset() -> String {
        "UTF-8".to_string()
    }

    pub const fn script_timeout_secs() -> u64 {
        60
    }
}

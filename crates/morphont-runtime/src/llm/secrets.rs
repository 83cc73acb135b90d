//! Credential handling for LLM and literature APIs.
//!
//! Credentials are wrapped in [`ApiCredential`] as soon as they are read, so
//! they never show up in `Debug` or `Display` output and have to be exposed
//! explicitly at the point of use.
//!
//! Nothing here reads the process environment. Callers pass an [`EnvLookup`];
//! the CLI hands in one backed by `std::env`, tests hand in fixed maps.
//!
//! ```ignore
//! let cred = ApiCredential::from_config_or_lookup(&config, "api_key", "OPENAI_API_KEY", "OpenAI API key", lookup)?;
//! request.header("Authorization", format!("Bearer {}", cred.expose()));
//! ```

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer};
use serde_json::Value as JsonValue;
use std::fmt;

use super::LlmError;

/// Environment-style lookup used to resolve credentials missing from config.
pub type EnvLookup = dyn Fn(&str) -> Option<String> + Send + Sync;

/// A lookup that never finds anything.
pub fn no_env(_: &str) -> Option<String> {
    None
}

/// Where a credential was loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    /// Loaded from configuration
    Config,
    /// Loaded from an environment variable
    Environment,
    /// Provided programmatically
    Programmatic,
}

impl fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialSource::Config => write!(f, "config"),
            CredentialSource::Environment => write!(f, "environment"),
            CredentialSource::Programmatic => write!(f, "programmatic"),
        }
    }
}

/// A securely-stored API credential.
pub struct ApiCredential {
    value: SecretString,
    source: CredentialSource,
    name: &'static str,
}

impl ApiCredential {
    pub fn new(value: impl Into<String>, source: CredentialSource, name: &'static str) -> Self {
        Self {
            value: SecretString::from(value.into()),
            source,
            name,
        }
    }

    /// Load from `config[config_key]`, falling back to `lookup(env_var)`.
    pub fn from_config_or_lookup(
        config: &JsonValue,
        config_key: &str,
        env_var: &str,
        name: &'static str,
        lookup: &EnvLookup,
    ) -> Result<Self, LlmError> {
        if let Some(value) = config[config_key].as_str() {
            return Ok(Self::new(value, CredentialSource::Config, name));
        }

        if let Some(value) = lookup(env_var) {
            return Ok(Self::new(value, CredentialSource::Environment, name));
        }

        Err(LlmError::NotConfigured(format!(
            "{} required: set '{}' in config or {} environment variable",
            name, config_key, env_var
        )))
    }

    /// Check if a credential is available without loading it.
    pub fn is_available(config: &JsonValue, config_key: &str, env_var: &str, lookup: &EnvLookup) -> bool {
        config[config_key].as_str().is_some() || lookup(env_var).is_some()
    }

    /// Expose the credential value. Call only where the value is sent.
    pub fn expose(&self) -> &str {
        self.value.expose_secret()
    }

    pub fn is_empty(&self) -> bool {
        self.value.expose_secret().is_empty()
    }

    pub fn source(&self) -> CredentialSource {
        self.source
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Debug for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiCredential")
            .field("value", &"[REDACTED]")
            .field("source", &self.source)
            .field("name", &self.name)
            .finish()
    }
}

impl fmt::Display for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} from {} [REDACTED]", self.name, self.source)
    }
}

/// A secret as it appears in configuration files.
///
/// Deserializes from a plain string and redacts itself in `Debug`. Sections
/// holding one mark the field `skip_serializing`.
pub struct ConfigSecret(SecretString);

impl ConfigSecret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(SecretString::from(value.into()))
    }

    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }

    /// Wrap as a credential for a backend.
    pub fn credential(&self, name: &'static str) -> ApiCredential {
        ApiCredential::new(self.expose(), CredentialSource::Config, name)
    }
}

impl Clone for ConfigSecret {
    fn clone(&self) -> Self {
        Self::new(self.expose())
    }
}

impl PartialEq for ConfigSecret {
    fn eq(&self, other: &Self) -> bool {
        self.expose() == other.expose()
    }
}

impl fmt::Debug for ConfigSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl From<String> for ConfigSecret {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for ConfigSecret {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl<'de> Deserialize<'de> for ConfigSecret {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        String::deserialize(deserializer).map(Self::new)
    }
}

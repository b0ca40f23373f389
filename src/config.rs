//! Configuration types.

use std::collections::BTreeMap;
use std::time::Duration;

use secrecy::SecretString;

use crate::backoff::{BackoffPolicy, DEFAULT_BACKOFF_BASE, DEFAULT_BACKOFF_CAP};
use crate::dispatcher::{ClientIdentity, DEFAULT_USER_AGENT};
use crate::error::ConfigError;
use crate::registry::{EndpointRegistry, ModuleLimits, ModuleName};

/// Upstream root used when `TENSAI_BASE_URL` is unset.
pub const DEFAULT_BASE_URL: &str = "http://localhost:5000";

/// Port for the HTTP facade when `TENSAI_DISPATCH_PORT` is unset.
pub const DEFAULT_PORT: u16 = 3978;

/// Dispatcher configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Root of every upstream URL.
    pub base_url: String,
    pub user_agent: String,
    /// Optional bearer token for the upstream API.
    pub api_key: Option<SecretString>,
    pub backoff: BackoffPolicy,
    /// Per-module timeout/retry overrides. Missing modules use shipped limits.
    pub limits: BTreeMap<ModuleName, ModuleLimits>,
    /// Port the HTTP facade listens on.
    pub port: u16,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            api_key: None,
            backoff: BackoffPolicy::default(),
            limits: ModuleName::ALL
                .into_iter()
                .map(|m| (m, ModuleLimits::default_for(m)))
                .collect(),
            port: DEFAULT_PORT,
        }
    }
}

impl DispatcherConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let base_url = get("TENSAI_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        reqwest::Url::parse(&base_url).map_err(|e| ConfigError::InvalidValue {
            key: "TENSAI_BASE_URL".into(),
            message: e.to_string(),
        })?;

        let user_agent = get("TENSAI_USER_AGENT").unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());
        let api_key = get("TENSAI_API_KEY").map(SecretString::from);

        let base_ms = parse_or(&get, "TENSAI_BACKOFF_BASE_MS", DEFAULT_BACKOFF_BASE.as_millis() as u64)?;
        let cap_ms = parse_or(&get, "TENSAI_BACKOFF_CAP_MS", DEFAULT_BACKOFF_CAP.as_millis() as u64)?;
        let jitter = parse_bool_or(&get, "TENSAI_BACKOFF_JITTER", false)?;
        let backoff = BackoffPolicy {
            base: Duration::from_millis(base_ms),
            // 0 disables the cap
            cap: (cap_ms > 0).then(|| Duration::from_millis(cap_ms)),
            jitter,
        };

        let mut limits = BTreeMap::new();
        for module in ModuleName::ALL {
            let defaults = ModuleLimits::default_for(module);
            let timeout_key = format!("TENSAI_{}_TIMEOUT_MS", module.env_key());
            let retries_key = format!("TENSAI_{}_RETRIES", module.env_key());
            let timeout_ms = parse_or(&get, &timeout_key, defaults.timeout.as_millis() as u64)?;
            if timeout_ms == 0 {
                return Err(ConfigError::InvalidValue {
                    key: timeout_key,
                    message: "timeout must be greater than zero".into(),
                });
            }
            let retries = parse_or(&get, &retries_key, defaults.retries)?;
            limits.insert(
                module,
                ModuleLimits {
                    timeout: Duration::from_millis(timeout_ms),
                    retries,
                },
            );
        }

        let port = parse_or(&get, "TENSAI_DISPATCH_PORT", DEFAULT_PORT)?;

        Ok(Self {
            base_url,
            user_agent,
            api_key,
            backoff,
            limits,
            port,
        })
    }

    /// Limits for one module, falling back to the shipped defaults.
    pub fn limits_for(&self, module: ModuleName) -> ModuleLimits {
        self.limits
            .get(&module)
            .copied()
            .unwrap_or_else(|| ModuleLimits::default_for(module))
    }

    /// Build the endpoint registry this configuration describes.
    pub fn registry(&self) -> EndpointRegistry {
        EndpointRegistry::tensai_with_limits(&self.base_url, |m| self.limits_for(m))
    }

    pub fn identity(&self) -> ClientIdentity {
        ClientIdentity {
            user_agent: self.user_agent.clone(),
            api_key: self.api_key.clone(),
        }
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("{raw:?}: {e}"),
        }),
        None => Ok(default),
    }
}

fn parse_bool_or<G>(get: &G, key: &str, default: bool) -> Result<bool, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key).map(|v| v.to_ascii_lowercase()).as_deref() {
        None => Ok(default),
        Some("1" | "true" | "yes" | "on") => Ok(true),
        Some("0" | "false" | "no" | "off") => Ok(false),
        Some(other) => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected a boolean, got {other:?}"),
        }),
    }
}

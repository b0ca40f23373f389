//! Endpoint registry: which upstream URLs each TensAI module exposes.
//!
//! The registry is built once at startup and handed to the dispatcher.
//! Nothing mutates it afterwards, so it is shared behind an `Arc`.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Serialize, Serializer};

use crate::error::ConfigError;
use crate::transport::Method;

/// Logical capability areas exposed by the TensAI API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum ModuleName {
    #[serde(rename = "WebGPT")]
    WebGpt,
    #[serde(rename = "Media Studio")]
    MediaStudio,
    #[serde(rename = "Translator")]
    Translator,
    #[serde(rename = "Summarizer")]
    Summarizer,
    #[serde(rename = "OmniQuest")]
    OmniQuest,
}

impl ModuleName {
    pub const ALL: [ModuleName; 5] = [
        Self::WebGpt,
        Self::MediaStudio,
        Self::Translator,
        Self::Summarizer,
        Self::OmniQuest,
    ];

    /// Display name, as callers and the upstream API spell it.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WebGpt => "WebGPT",
            Self::MediaStudio => "Media Studio",
            Self::Translator => "Translator",
            Self::Summarizer => "Summarizer",
            Self::OmniQuest => "OmniQuest",
        }
    }

    /// Upper-case key used in environment variable names.
    pub fn env_key(&self) -> &'static str {
        match self {
            Self::WebGpt => "WEBGPT",
            Self::MediaStudio => "MEDIA_STUDIO",
            Self::Translator => "TRANSLATOR",
            Self::Summarizer => "SUMMARIZER",
            Self::OmniQuest => "OMNIQUEST",
        }
    }
}

impl std::fmt::Display for ModuleName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ModuleName {
    type Err = ConfigError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| ConfigError::UnknownModule(s.to_string()))
    }
}

/// A named upstream operation within a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Endpoint {
    Chat,
    TextTranslate,
    DocumentTranslate,
    Query,
    ImageGeneration,
    AudioGeneration,
    VideoGeneration,
    VideoStatus,
    ImageEdit,
    Upload,
    Status,
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Chat => "chat",
            Self::TextTranslate => "text-translate",
            Self::DocumentTranslate => "document-translate",
            Self::Query => "query",
            Self::ImageGeneration => "image-generation",
            Self::AudioGeneration => "audio-generation",
            Self::VideoGeneration => "video-generation",
            Self::VideoStatus => "video-status",
            Self::ImageEdit => "image-edit",
            Self::Upload => "upload",
            Self::Status => "status",
        };
        f.write_str(s)
    }
}

/// Per-module timeout and retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleLimits {
    pub timeout: Duration,
    pub retries: u32,
}

impl ModuleLimits {
    /// Limits the TensAI service ships with.
    pub fn default_for(module: ModuleName) -> Self {
        let (timeout_ms, retries) = match module {
            ModuleName::WebGpt => (15_000, 2),
            // Media generation takes longer, so fewer but longer attempts.
            ModuleName::MediaStudio => (30_000, 1),
            ModuleName::Translator => (10_000, 2),
            ModuleName::Summarizer => (20_000, 2),
            ModuleName::OmniQuest => (15_000, 2),
        };
        Self {
            timeout: Duration::from_millis(timeout_ms),
            retries,
        }
    }
}

/// Static configuration for one module.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleEndpointConfig {
    pub module: ModuleName,
    pub endpoints: BTreeMap<Endpoint, String>,
    /// Endpoint used by the fallback route and by health checks.
    pub primary: Endpoint,
    pub method: Method,
    #[serde(rename = "timeoutMs", serialize_with = "serialize_millis")]
    pub timeout: Duration,
    pub retries: u32,
}

fn serialize_millis<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

impl ModuleEndpointConfig {
    /// Create a config with a single primary endpoint.
    pub fn new(module: ModuleName, primary: Endpoint, url: impl Into<String>) -> Self {
        let limits = ModuleLimits::default_for(module);
        let mut endpoints = BTreeMap::new();
        endpoints.insert(primary, url.into());
        Self {
            module,
            endpoints,
            primary,
            method: Method::Post,
            timeout: limits.timeout,
            retries: limits.retries,
        }
    }

    pub fn with_endpoint(mut self, endpoint: Endpoint, url: impl Into<String>) -> Self {
        self.endpoints.insert(endpoint, url.into());
        self
    }

    pub fn with_limits(mut self, limits: ModuleLimits) -> Self {
        self.timeout = limits.timeout;
        self.retries = limits.retries;
        self
    }

    /// URL for a named endpoint, if this module exposes it.
    pub fn url(&self, endpoint: Endpoint) -> Result<&str, ConfigError> {
        self.endpoints
            .get(&endpoint)
            .map(String::as_str)
            .ok_or_else(|| ConfigError::MissingEndpoint {
                module: self.module.to_string(),
                endpoint: endpoint.to_string(),
            })
    }

    pub fn primary_url(&self) -> Result<&str, ConfigError> {
        self.url(self.primary)
    }

    pub fn has(&self, endpoint: Endpoint) -> bool {
        self.endpoints.contains_key(&endpoint)
    }

    /// Initial attempt plus retries.
    pub fn max_attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }
}

/// Immutable map of module name to endpoint configuration.
#[derive(Debug, Clone, Default)]
pub struct EndpointRegistry {
    modules: BTreeMap<ModuleName, ModuleEndpointConfig>,
}

impl EndpointRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a module's configuration.
    pub fn with_module(mut self, config: ModuleEndpointConfig) -> Self {
        self.modules.insert(config.module, config);
        self
    }

    /// The standard TensAI endpoint layout rooted at `base_url`, with the
    /// shipped timeouts and retry counts.
    pub fn tensai(base_url: &str) -> Self {
        Self::tensai_with_limits(base_url, ModuleLimits::default_for)
    }

    /// Standard layout with caller-chosen limits per module.
    pub fn tensai_with_limits(base_url: &str, limits: impl Fn(ModuleName) -> ModuleLimits) -> Self {
        let base = base_url.trim_end_matches('/');
        let at = |path: &str| format!("{base}{path}");

        let webgpt = ModuleEndpointConfig::new(ModuleName::WebGpt, Endpoint::Chat, at("/api/webchat"));

        let media = ModuleEndpointConfig::new(
            ModuleName::MediaStudio,
            Endpoint::ImageGeneration,
            at("/api/generate-image"),
        )
        .with_endpoint(Endpoint::AudioGeneration, at("/api/audiogen"))
        .with_endpoint(Endpoint::VideoGeneration, at("/api/generate-video"))
        .with_endpoint(Endpoint::VideoStatus, at("/api/video-status"))
        .with_endpoint(Endpoint::ImageEdit, at("/api/edit-image"))
        .with_endpoint(Endpoint::Upload, at("/api/upload"));

        let translator = ModuleEndpointConfig::new(
            ModuleName::Translator,
            Endpoint::TextTranslate,
            at("/api/translate"),
        )
        .with_endpoint(Endpoint::DocumentTranslate, at("/api/docTranslator"))
        .with_endpoint(Endpoint::Upload, at("/api/upload"));

        let summarizer =
            ModuleEndpointConfig::new(ModuleName::Summarizer, Endpoint::Chat, at("/api/webchat"));

        let omniquest =
            ModuleEndpointConfig::new(ModuleName::OmniQuest, Endpoint::Query, at("/api/omniQuest"))
                .with_endpoint(Endpoint::Upload, at("/api/upload"))
                .with_endpoint(Endpoint::Status, at("/api/status"));

        [webgpt, media, translator, summarizer, omniquest]
            .into_iter()
            .fold(Self::new(), |registry, config| {
                let module_limits = limits(config.module);
                registry.with_module(config.with_limits(module_limits))
            })
    }

    /// Look up a module by its display name.
    pub fn get(&self, name: &str) -> Result<&ModuleEndpointConfig, ConfigError> {
        let module: ModuleName = name.parse()?;
        self.config(module)
            .ok_or_else(|| ConfigError::UnknownModule(name.to_string()))
    }

    pub fn config(&self, module: ModuleName) -> Option<&ModuleEndpointConfig> {
        self.modules.get(&module)
    }

    /// Configured modules, in registry order.
    pub fn modules(&self) -> Vec<ModuleName> {
        self.modules.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

//! Strongly-typed configuration for the Steel client.
//!
//! A [`SteelConfig`] is assembled once per client from three layers, highest
//! precedence first: explicit [`SteelConfigOverrides`], a pre-built
//! configuration supplied by the caller, and `STEEL_*` environment variables
//! (with optional `.env` support). The merged result is validated eagerly; a
//! missing API key is a construction-time error, never a lazy one.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use dotenvy::dotenv;
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map as JsonMap, Value as JsonValue};
use url::Url;

use crate::error::{PlanFeature, SteelError};
use crate::logging::LogCallback;
use crate::retry::RetryPolicy;

type JsonObject = JsonMap<String, JsonValue>;

/// Default public Steel API endpoint.
pub const DEFAULT_API_URL: &str = "https://api.steel.dev/v1";

/// Environment variable holding the API key.
pub const API_KEY_ENV: &str = "STEEL_API_KEY";

const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(300);
const DEFAULT_SESSION_IDLE_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_API_TIMEOUT: Duration = Duration::from_millis(60_000);

/// Output formats supported by content extraction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Markdown,
    Html,
    Text,
    Pdf,
}

impl OutputFormat {
    pub const ALL: [OutputFormat; 4] = [
        OutputFormat::Markdown,
        OutputFormat::Html,
        OutputFormat::Text,
        OutputFormat::Pdf,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            OutputFormat::Markdown => "markdown",
            OutputFormat::Html => "html",
            OutputFormat::Text => "text",
            OutputFormat::Pdf => "pdf",
        }
    }

    /// Whether results in this format carry binary rather than textual content.
    pub fn is_binary(self) -> bool {
        matches!(self, OutputFormat::Pdf)
    }

    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "markdown" | "md" => Some(OutputFormat::Markdown),
            "html" => Some(OutputFormat::Html),
            "text" | "txt" => Some(OutputFormat::Text),
            "pdf" => Some(OutputFormat::Pdf),
            _ => None,
        }
    }
}

impl FromStr for OutputFormat {
    type Err = SteelError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        OutputFormat::parse(value).ok_or_else(|| {
            SteelError::invalid(
                "format",
                format!("unsupported format '{value}'; expected one of markdown, html, text, pdf"),
            )
        })
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verbosity level for client logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Verbosity {
    Minimal,
    #[default]
    Medium,
    Detailed,
}

impl Verbosity {
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            Verbosity::Minimal => 0,
            Verbosity::Medium => 1,
            Verbosity::Detailed => 2,
        }
    }

    fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Verbosity::Minimal),
            1 => Some(Verbosity::Medium),
            2 => Some(Verbosity::Detailed),
            _ => None,
        }
    }
}

impl Serialize for Verbosity {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u8(self.as_u8())
    }
}

impl<'de> Deserialize<'de> for Verbosity {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = u8::deserialize(deserializer)?;
        Verbosity::from_u8(value).ok_or_else(|| {
            DeError::custom(format!(
                "invalid verbosity value {value}; expected 0, 1, or 2"
            ))
        })
    }
}

/// Proxy routing preferences, only consulted when `use_proxy` is enabled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxySettings {
    pub country: Option<String>,
    pub sticky_session: bool,
}

/// Validated configuration for a [`SteelClient`](crate::client::SteelClient).
#[derive(Clone)]
pub struct SteelConfig {
    pub api_key: String,
    pub api_url: String,
    pub default_format: OutputFormat,
    pub session_timeout: Duration,
    pub session_idle_timeout: Duration,
    pub api_timeout: Duration,
    pub use_proxy: bool,
    pub solve_captcha: bool,
    pub stealth_mode: bool,
    pub retry: RetryPolicy,
    pub proxy: ProxySettings,
    pub user_agent: Option<String>,
    pub session_options: JsonObject,
    pub verbose: Verbosity,
    pub logger: Option<LogCallback>,
}

impl SteelConfig {
    /// Configuration with defaults everywhere except the API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        SteelConfig {
            api_key: api_key.into(),
            api_url: DEFAULT_API_URL.to_string(),
            default_format: OutputFormat::default(),
            session_timeout: DEFAULT_SESSION_TIMEOUT,
            session_idle_timeout: DEFAULT_SESSION_IDLE_TIMEOUT,
            api_timeout: DEFAULT_API_TIMEOUT,
            use_proxy: false,
            solve_captcha: false,
            stealth_mode: false,
            retry: RetryPolicy::default(),
            proxy: ProxySettings::default(),
            user_agent: None,
            session_options: JsonObject::new(),
            verbose: Verbosity::default(),
            logger: None,
        }
    }

    /// Build from explicit overrides and the process environment only.
    pub fn from_env() -> Result<Self, SteelError> {
        Self::build(SteelConfigOverrides::default(), None)
    }

    /// Merge `overrides` over `base` over the current environment and validate.
    pub fn build(
        overrides: SteelConfigOverrides,
        base: Option<&SteelConfig>,
    ) -> Result<Self, SteelError> {
        Self::build_from(overrides, base, &EnvSnapshot::capture())
    }

    /// Pure variant of [`SteelConfig::build`] over a captured environment.
    pub fn build_from(
        overrides: SteelConfigOverrides,
        base: Option<&SteelConfig>,
        env: &EnvSnapshot,
    ) -> Result<Self, SteelError> {
        let mut merged = SteelConfigOverrides::from_env_snapshot(env)?;
        if let Some(base) = base {
            merged = merged.layer(SteelConfigOverrides::from(base));
        }
        merged.layer(overrides).resolve()
    }

    /// Apply overrides on top of this configuration, re-validating the result.
    pub fn with_overrides(&self, overrides: SteelConfigOverrides) -> Result<Self, SteelError> {
        SteelConfigOverrides::from(self).layer(overrides).resolve()
    }

    /// Check every invariant of a usable configuration.
    pub fn validate(&self) -> Result<(), SteelError> {
        if self.api_key.trim().is_empty() {
            return Err(SteelError::config(
                "api_key",
                format!("Steel API key is required; set {API_KEY_ENV} or provide api_key"),
            ));
        }

        let parsed = Url::parse(self.api_url.trim())
            .map_err(|err| SteelError::config("api_url", format!("'{}': {err}", self.api_url)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(SteelError::config(
                "api_url",
                format!("unsupported scheme '{}'", parsed.scheme()),
            ));
        }

        if self.session_timeout.is_zero() {
            return Err(SteelError::config("session_timeout", "must be positive"));
        }
        if self.api_timeout.is_zero() {
            return Err(SteelError::config("api_timeout", "must be positive"));
        }
        if self.retry.base_delay.is_zero() {
            return Err(SteelError::config("retry_delay", "must be positive"));
        }
        if self.retry.base_delay > self.retry.max_delay {
            return Err(SteelError::config(
                "retry_delay",
                format!(
                    "{:.2}s exceeds the backoff cap of {:.2}s; raise retry_max_delay",
                    self.retry.base_delay.as_secs_f64(),
                    self.retry.max_delay.as_secs_f64()
                ),
            ));
        }
        Ok(())
    }

    /// Options sent when creating a remote session.
    pub fn to_session_options(&self) -> JsonObject {
        let mut options = JsonObject::new();
        options.insert(
            "timeout".to_string(),
            JsonValue::from(self.session_timeout.as_millis() as u64),
        );
        options.insert("use_proxy".to_string(), JsonValue::Bool(self.use_proxy));
        options.insert(
            "solve_captcha".to_string(),
            JsonValue::Bool(self.solve_captcha),
        );

        if self.use_proxy {
            if let Some(country) = &self.proxy.country {
                options.insert(
                    "region".to_string(),
                    JsonValue::String(country.to_ascii_lowercase()),
                );
            }
        }
        if let Some(user_agent) = &self.user_agent {
            options.insert(
                "user_agent".to_string(),
                JsonValue::String(user_agent.clone()),
            );
        }
        if self.stealth_mode {
            options.insert("block_ads".to_string(), JsonValue::Bool(true));
        }

        for (key, value) in &self.session_options {
            options.insert(key.clone(), value.clone());
        }
        options
    }

    /// Plan-gated features this configuration asks the remote side for.
    pub fn requested_features(&self) -> Vec<PlanFeature> {
        let mut features = Vec::new();
        if self.use_proxy {
            features.push(PlanFeature::Proxy);
        }
        if self.solve_captcha {
            features.push(PlanFeature::Captcha);
        }
        if self.stealth_mode {
            features.push(PlanFeature::Stealth);
        }
        features
    }
}

impl fmt::Debug for SteelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SteelConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("default_format", &self.default_format)
            .field("session_timeout", &self.session_timeout)
            .field("session_idle_timeout", &self.session_idle_timeout)
            .field("api_timeout", &self.api_timeout)
            .field("use_proxy", &self.use_proxy)
            .field("solve_captcha", &self.solve_captcha)
            .field("stealth_mode", &self.stealth_mode)
            .field("retry", &self.retry)
            .field("proxy", &self.proxy)
            .field("user_agent", &self.user_agent)
            .field("session_options", &self.session_options)
            .field("verbose", &self.verbose)
            .field("logger_present", &self.logger.is_some())
            .finish()
    }
}

fn redact(secret: &str) -> String {
    if secret.chars().count() <= 4 {
        "****".to_string()
    } else {
        let prefix: String = secret.chars().take(4).collect();
        format!("{prefix}****")
    }
}

/// Field-level overrides; `None` leaves the lower layer's value in place.
#[derive(Default, Clone)]
pub struct SteelConfigOverrides {
    pub api_key: Option<String>,
    pub api_url: Option<String>,
    pub default_format: Option<OutputFormat>,
    pub session_timeout: Option<Duration>,
    pub session_idle_timeout: Option<Duration>,
    pub api_timeout: Option<Duration>,
    pub use_proxy: Option<bool>,
    pub solve_captcha: Option<bool>,
    pub stealth_mode: Option<bool>,
    pub max_retries: Option<u32>,
    pub retry_delay: Option<Duration>,
    pub retry_jitter: Option<Duration>,
    pub retry_max_delay: Option<Duration>,
    pub proxy: Option<ProxySettings>,
    pub user_agent: Option<String>,
    pub session_options: Option<JsonObject>,
    pub verbose: Option<Verbosity>,
    pub logger: Option<LogCallback>,
}

impl SteelConfigOverrides {
    /// Read the `STEEL_*` variables from an environment snapshot.
    pub fn from_env_snapshot(env: &EnvSnapshot) -> Result<Self, SteelError> {
        let mut overrides = SteelConfigOverrides {
            api_key: env.get(API_KEY_ENV),
            api_url: env.get("STEEL_BASE_URL"),
            user_agent: env.get("STEEL_USER_AGENT"),
            ..Default::default()
        };

        if let Some(value) = env.get("STEEL_DEFAULT_FORMAT") {
            overrides.default_format = Some(OutputFormat::parse(&value).ok_or_else(|| {
                SteelError::config("STEEL_DEFAULT_FORMAT", format!("invalid format '{value}'"))
            })?);
        }
        if let Some(value) = env.get("STEEL_USE_PROXY") {
            overrides.use_proxy = Some(parse_bool("STEEL_USE_PROXY", &value)?);
        }
        if let Some(value) = env.get("STEEL_SOLVE_CAPTCHA") {
            overrides.solve_captcha = Some(parse_bool("STEEL_SOLVE_CAPTCHA", &value)?);
        }
        if let Some(value) = env.get("STEEL_STEALTH_MODE") {
            overrides.stealth_mode = Some(parse_bool("STEEL_STEALTH_MODE", &value)?);
        }
        if let Some(value) = env.get("STEEL_SESSION_TIMEOUT") {
            overrides.session_timeout = Some(Duration::from_secs(parse_u64(
                "STEEL_SESSION_TIMEOUT",
                &value,
            )?));
        }
        if let Some(value) = env.get("STEEL_SESSION_IDLE_TIMEOUT") {
            overrides.session_idle_timeout = Some(Duration::from_secs(parse_u64(
                "STEEL_SESSION_IDLE_TIMEOUT",
                &value,
            )?));
        }
        if let Some(value) = env.get("STEEL_API_TIMEOUT") {
            overrides.api_timeout = Some(Duration::from_millis(parse_u64(
                "STEEL_API_TIMEOUT",
                &value,
            )?));
        }
        if let Some(value) = env.get("STEEL_MAX_RETRIES") {
            let parsed = parse_u64("STEEL_MAX_RETRIES", &value)?;
            overrides.max_retries = Some(u32::try_from(parsed).map_err(|_| {
                SteelError::config("STEEL_MAX_RETRIES", format!("'{value}' is too large"))
            })?);
        }
        if let Some(value) = env.get("STEEL_RETRY_DELAY") {
            overrides.retry_delay = Some(parse_seconds("STEEL_RETRY_DELAY", &value)?);
        }
        if let Some(value) = env.get("STEEL_RETRY_JITTER") {
            overrides.retry_jitter = Some(parse_seconds("STEEL_RETRY_JITTER", &value)?);
        }
        if let Some(value) = env.get("STEEL_RETRY_MAX_DELAY") {
            overrides.retry_max_delay = Some(parse_seconds("STEEL_RETRY_MAX_DELAY", &value)?);
        }
        if let Some(country) = env.get("STEEL_PROXY_COUNTRY") {
            overrides.proxy = Some(ProxySettings {
                country: Some(country),
                ..Default::default()
            });
        }
        if let Some(value) = env.get("STEEL_VERBOSE") {
            let parsed = parse_u64("STEEL_VERBOSE", &value)?;
            overrides.verbose = Some(
                u8::try_from(parsed)
                    .ok()
                    .and_then(Verbosity::from_u8)
                    .ok_or_else(|| {
                        SteelError::config("STEEL_VERBOSE", format!("invalid verbosity '{value}'"))
                    })?,
            );
        }

        Ok(overrides)
    }

    /// Stack `top` over `self`; fields set in `top` win.
    pub fn layer(self, top: SteelConfigOverrides) -> Self {
        SteelConfigOverrides {
            api_key: top.api_key.or(self.api_key),
            api_url: top.api_url.or(self.api_url),
            default_format: top.default_format.or(self.default_format),
            session_timeout: top.session_timeout.or(self.session_timeout),
            session_idle_timeout: top.session_idle_timeout.or(self.session_idle_timeout),
            api_timeout: top.api_timeout.or(self.api_timeout),
            use_proxy: top.use_proxy.or(self.use_proxy),
            solve_captcha: top.solve_captcha.or(self.solve_captcha),
            stealth_mode: top.stealth_mode.or(self.stealth_mode),
            max_retries: top.max_retries.or(self.max_retries),
            retry_delay: top.retry_delay.or(self.retry_delay),
            retry_jitter: top.retry_jitter.or(self.retry_jitter),
            retry_max_delay: top.retry_max_delay.or(self.retry_max_delay),
            proxy: top.proxy.or(self.proxy),
            user_agent: top.user_agent.or(self.user_agent),
            session_options: top.session_options.or(self.session_options),
            verbose: top.verbose.or(self.verbose),
            logger: top.logger.or(self.logger),
        }
    }

    /// Fill unset fields with defaults and validate the outcome.
    pub fn resolve(self) -> Result<SteelConfig, SteelError> {
        let api_key = self
            .api_key
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                SteelError::config(
                    "api_key",
                    format!("Steel API key is required; set {API_KEY_ENV} or provide api_key"),
                )
            })?;

        let mut config = SteelConfig::new(api_key.trim());
        if let Some(value) = self.api_url {
            config.api_url = value;
        }
        if let Some(value) = self.default_format {
            config.default_format = value;
        }
        if let Some(value) = self.session_timeout {
            config.session_timeout = value;
        }
        if let Some(value) = self.session_idle_timeout {
            config.session_idle_timeout = value;
        }
        if let Some(value) = self.api_timeout {
            config.api_timeout = value;
        }
        if let Some(value) = self.use_proxy {
            config.use_proxy = value;
        }
        if let Some(value) = self.solve_captcha {
            config.solve_captcha = value;
        }
        if let Some(value) = self.stealth_mode {
            config.stealth_mode = value;
        }
        if let Some(value) = self.max_retries {
            config.retry.max_attempts = value;
        }
        if let Some(value) = self.retry_delay {
            config.retry.base_delay = value;
        }
        if let Some(value) = self.retry_jitter {
            config.retry.max_jitter = value;
        }
        if let Some(value) = self.retry_max_delay {
            config.retry.max_delay = value;
        }
        if let Some(value) = self.proxy {
            config.proxy = value;
        }
        config.user_agent = self.user_agent;
        if let Some(value) = self.session_options {
            config.session_options = value;
        }
        if let Some(value) = self.verbose {
            config.verbose = value;
        }
        config.logger = self.logger;

        config.validate()?;
        Ok(config)
    }

    /// Builder-style helper to set the `api_key` override.
    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Builder-style helper to set the `api_url` override.
    pub fn api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = Some(api_url.into());
        self
    }

    pub fn use_proxy(mut self, enabled: bool) -> Self {
        self.use_proxy = Some(enabled);
        self
    }

    pub fn solve_captcha(mut self, enabled: bool) -> Self {
        self.solve_captcha = Some(enabled);
        self
    }

    pub fn stealth_mode(mut self, enabled: bool) -> Self {
        self.stealth_mode = Some(enabled);
        self
    }

    pub fn session_timeout_secs(mut self, seconds: u64) -> Self {
        self.session_timeout = Some(Duration::from_secs(seconds));
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    pub fn default_format(mut self, format: OutputFormat) -> Self {
        self.default_format = Some(format);
        self
    }
}

impl From<&SteelConfig> for SteelConfigOverrides {
    fn from(config: &SteelConfig) -> Self {
        SteelConfigOverrides {
            api_key: Some(config.api_key.clone()).filter(|key| !key.trim().is_empty()),
            api_url: Some(config.api_url.clone()),
            default_format: Some(config.default_format),
            session_timeout: Some(config.session_timeout),
            session_idle_timeout: Some(config.session_idle_timeout),
            api_timeout: Some(config.api_timeout),
            use_proxy: Some(config.use_proxy),
            solve_captcha: Some(config.solve_captcha),
            stealth_mode: Some(config.stealth_mode),
            max_retries: Some(config.retry.max_attempts),
            retry_delay: Some(config.retry.base_delay),
            retry_jitter: Some(config.retry.max_jitter),
            retry_max_delay: Some(config.retry.max_delay),
            proxy: Some(config.proxy.clone()),
            user_agent: config.user_agent.clone(),
            session_options: Some(config.session_options.clone()),
            verbose: Some(config.verbose),
            logger: config.logger.clone(),
        }
    }
}

impl fmt::Debug for SteelConfigOverrides {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SteelConfigOverrides")
            .field("api_key", &self.api_key.as_deref().map(redact))
            .field("api_url", &self.api_url)
            .field("default_format", &self.default_format)
            .field("session_timeout", &self.session_timeout)
            .field("session_idle_timeout", &self.session_idle_timeout)
            .field("api_timeout", &self.api_timeout)
            .field("use_proxy", &self.use_proxy)
            .field("solve_captcha", &self.solve_captcha)
            .field("stealth_mode", &self.stealth_mode)
            .field("max_retries", &self.max_retries)
            .field("retry_delay", &self.retry_delay)
            .field("retry_jitter", &self.retry_jitter)
            .field("retry_max_delay", &self.retry_max_delay)
            .field("proxy", &self.proxy)
            .field("user_agent", &self.user_agent)
            .field("session_options", &self.session_options)
            .field("verbose", &self.verbose)
            .field("logger", &self.logger.is_some())
            .finish()
    }
}

/// Point-in-time copy of the `STEEL_*` environment variables.
#[derive(Debug, Clone, Default)]
pub struct EnvSnapshot {
    vars: HashMap<String, String>,
}

impl EnvSnapshot {
    /// Load `.env` if present, then copy every `STEEL_*` variable.
    pub fn capture() -> Self {
        let _ = dotenv();
        Self::from_pairs(env::vars().filter(|(key, _)| key.starts_with("STEEL_")))
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        EnvSnapshot {
            vars: pairs
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }

    /// Trimmed, non-empty value for `key`.
    pub fn get(&self, key: &str) -> Option<String> {
        self.vars
            .get(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }
}

fn parse_bool(field: &'static str, value: &str) -> Result<bool, SteelError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(SteelError::config(
            field,
            format!("invalid boolean '{value}'"),
        )),
    }
}

fn parse_u64(field: &'static str, value: &str) -> Result<u64, SteelError> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|err| SteelError::config(field, format!("invalid number '{value}': {err}")))
}

fn parse_seconds(field: &'static str, value: &str) -> Result<Duration, SteelError> {
    let seconds = value
        .trim()
        .parse::<f64>()
        .map_err(|err| SteelError::config(field, format!("invalid number '{value}': {err}")))?;
    Duration::try_from_secs_f64(seconds)
        .map_err(|_| SteelError::config(field, format!("'{value}' is not a valid duration")))
}

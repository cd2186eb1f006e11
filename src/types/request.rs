use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::config::OutputFormat;
use crate::error::SteelError;
use crate::types::session::SessionHandle;

/// Raw scrape input as accepted from callers and tool adapters.
///
/// Nothing here is trusted; [`ScrapeRequest::validate`] turns it into a
/// [`RequestDescriptor`] or fails before any network activity.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScrapeRequest {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wait_for_selector: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
    pub screenshot: bool,
    pub extract_links: bool,
    pub extract_images: bool,
    pub full_page: bool,
    #[serde(skip)]
    pub session: Option<SessionHandle>,
}

impl ScrapeRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    pub fn wait_for(mut self, selector: impl Into<String>) -> Self {
        self.wait_for_selector = Some(selector.into());
        self
    }

    pub fn delay_ms(mut self, delay_ms: i64) -> Self {
        self.delay_ms = Some(delay_ms);
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .get_or_insert_with(BTreeMap::new)
            .insert(name.into(), value.into());
        self
    }

    pub fn session(mut self, handle: SessionHandle) -> Self {
        self.session = Some(handle);
        self
    }

    /// Check every descriptor invariant; `default_format` fills an absent format.
    pub fn validate(&self, default_format: OutputFormat) -> Result<RequestDescriptor, SteelError> {
        let url = parse_target(&self.url)?;

        let format = match self.format.as_deref() {
            Some(raw) => raw.parse::<OutputFormat>()?,
            None => default_format,
        };

        let delay = match self.delay_ms {
            Some(ms) if ms < 0 => {
                return Err(SteelError::invalid(
                    "delay_ms",
                    format!("delay must be >= 0, got {ms}"),
                ));
            }
            Some(ms) => Some(Duration::from_millis(ms.unsigned_abs())),
            None => None,
        };

        let wait_for_selector = match &self.wait_for_selector {
            Some(selector) if selector.trim().is_empty() => {
                return Err(SteelError::invalid(
                    "wait_for_selector",
                    "selector must not be empty",
                ));
            }
            other => other.clone(),
        };

        let headers = self.headers.clone().unwrap_or_default();
        if headers.keys().any(|name| name.trim().is_empty()) {
            return Err(SteelError::invalid("headers", "header names must not be empty"));
        }

        Ok(RequestDescriptor {
            url,
            format,
            wait_for_selector,
            delay,
            headers,
            screenshot: self.screenshot,
            extract_links: self.extract_links,
            extract_images: self.extract_images,
            full_page: self.full_page,
            session: self.session.clone(),
        })
    }
}

impl From<&str> for ScrapeRequest {
    fn from(url: &str) -> Self {
        ScrapeRequest::new(url)
    }
}

impl From<String> for ScrapeRequest {
    fn from(url: String) -> Self {
        ScrapeRequest::new(url)
    }
}

pub(crate) fn parse_target(raw: &str) -> Result<Url, SteelError> {
    let url = Url::parse(raw.trim())
        .map_err(|err| SteelError::invalid("url", format!("'{raw}' is not an absolute URL: {err}")))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(SteelError::invalid(
            "url",
            format!("'{raw}' must be an absolute http(s) URL"),
        ));
    }
    Ok(url)
}

/// A validated content-extraction request.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestDescriptor {
    url: Url,
    format: OutputFormat,
    wait_for_selector: Option<String>,
    delay: Option<Duration>,
    headers: BTreeMap<String, String>,
    screenshot: bool,
    extract_links: bool,
    extract_images: bool,
    full_page: bool,
    session: Option<SessionHandle>,
}

impl RequestDescriptor {
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    pub fn wait_for_selector(&self) -> Option<&str> {
        self.wait_for_selector.as_deref()
    }

    pub fn delay(&self) -> Option<Duration> {
        self.delay
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn screenshot(&self) -> bool {
        self.screenshot
    }

    pub fn extract_links(&self) -> bool {
        self.extract_links
    }

    pub fn extract_images(&self) -> bool {
        self.extract_images
    }

    pub fn full_page(&self) -> bool {
        self.full_page
    }

    pub fn session(&self) -> Option<&SessionHandle> {
        self.session.as_ref()
    }

    pub fn with_session(mut self, handle: SessionHandle) -> Self {
        self.session = Some(handle);
        self
    }

    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }
}

/// Options for structured extraction.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExtractOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

impl ExtractOptions {
    pub fn with_schema(schema: Value) -> Self {
        Self {
            schema: Some(schema),
            instructions: None,
        }
    }

    pub fn instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }
}

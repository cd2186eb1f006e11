use std::fmt;
use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::OutputFormat;

/// Content payload returned by the remote service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    Text(String),
    Binary(Vec<u8>),
}

impl Content {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Content::Text(text) => Some(text),
            Content::Binary(_) => None,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Content::Text(text) => text.as_bytes(),
            Content::Binary(bytes) => bytes,
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Content::Text(text) => text.trim().is_empty(),
            Content::Binary(bytes) => bytes.is_empty(),
        }
    }

    /// Write the payload verbatim to `path`.
    pub fn write_to(&self, path: impl AsRef<Path>) -> io::Result<()> {
        fs::write(path, self.as_bytes())
    }
}

impl fmt::Display for Content {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Content::Text(text) => f.write_str(text),
            Content::Binary(bytes) => write!(f, "<{} bytes of binary content>", bytes.len()),
        }
    }
}

/// Hyperlink discovered on a scraped page.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PageLink {
    pub href: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// Metadata attached to every result.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultMetadata {
    /// Wall time of the logical call, retries included.
    pub elapsed: Duration,
    pub timestamp: DateTime<Utc>,
    /// Final URL after redirects, or the requested URL when the remote omits it.
    pub resolved_url: String,
    pub title: Option<String>,
    /// Page load time reported by the remote side.
    pub load_time: Option<Duration>,
    pub attempts: u32,
    /// Remote metadata keys not mapped onto the fields above.
    pub extra: Map<String, Value>,
}

/// Result of a scrape or screenshot call.
#[derive(Debug, Clone, PartialEq)]
pub struct ScrapeResult {
    pub content: Content,
    pub format: OutputFormat,
    pub status: u16,
    pub metadata: ResultMetadata,
    pub links: Vec<PageLink>,
    pub images: Vec<String>,
    pub screenshot_url: Option<String>,
}

impl ScrapeResult {
    /// Human-readable summary of the page metadata.
    pub fn metadata_summary(&self) -> String {
        let mut parts = Vec::new();

        if let Some(title) = &self.metadata.title {
            parts.push(format!("Title: {title}"));
        }
        if !self.metadata.resolved_url.is_empty() {
            parts.push(format!("Final URL: {}", self.metadata.resolved_url));
        }
        parts.push(format!("Status Code: {}", self.status));
        if let Some(load_time) = self.metadata.load_time {
            parts.push(format!("Load Time: {}ms", load_time.as_millis()));
        }

        if !self.images.is_empty() {
            parts.push(format!("Images Found: {}", self.images.len()));
            for (index, src) in self.images.iter().take(3).enumerate() {
                parts.push(format!("  Image {}: {src}", index + 1));
            }
            if self.images.len() > 3 {
                parts.push(format!("  ... and {} more images", self.images.len() - 3));
            }
        }

        if !self.links.is_empty() {
            parts.push(format!("Links Found: {}", self.links.len()));
            for (index, link) in self.links.iter().take(3).enumerate() {
                match &link.text {
                    Some(text) => parts.push(format!("  Link {}: {text} -> {}", index + 1, link.href)),
                    None => parts.push(format!("  Link {}: {}", index + 1, link.href)),
                }
            }
            if self.links.len() > 3 {
                parts.push(format!("  ... and {} more links", self.links.len() - 3));
            }
        }

        if let Some(screenshot) = &self.screenshot_url {
            parts.push(format!("Screenshot: {screenshot}"));
        }

        parts.join("\n")
    }
}

/// Result of a structured extraction call.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractResult {
    pub data: Value,
    pub status: u16,
    pub metadata: ResultMetadata,
}

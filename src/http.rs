//! HTTP transport seam.
//!
//! [`SteelHttp`] is the only place the crate touches the network, so tests can
//! swap in counting fakes while production uses [`ReqwestHttp`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client as HttpClient;
use reqwest::header::{CONTENT_TYPE, HeaderMap};
use serde_json::Value;

use crate::error::SteelError;

/// Fully buffered response from the remote service.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    pub fn json(status: u16, value: &Value) -> Self {
        let mut response = Self::new(status, value.to_string());
        response.headers.insert(
            CONTENT_TYPE,
            reqwest::header::HeaderValue::from_static("application/json"),
        );
        response
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Lower-cased media type without parameters.
    pub fn content_type(&self) -> Option<String> {
        self.headers
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(';').next())
            .map(|value| value.trim().to_ascii_lowercase())
    }

    /// Whether the body should be parsed as JSON.
    pub fn is_json(&self) -> bool {
        match self.content_type() {
            Some(media) => media == "application/json" || media.ends_with("+json"),
            None => {
                let start = self.body.iter().find(|byte| !byte.is_ascii_whitespace());
                matches!(start, Some(b'{') | Some(b'['))
            }
        }
    }
}

/// Minimal HTTP surface used by the Steel API layer.
#[async_trait]
pub trait SteelHttp: Send + Sync {
    async fn post_json(
        &self,
        url: &str,
        headers: &HeaderMap,
        body: &Value,
    ) -> Result<HttpResponse, SteelError>;

    async fn delete(&self, url: &str, headers: &HeaderMap) -> Result<HttpResponse, SteelError>;
}

/// `reqwest`-backed transport with a per-call timeout.
#[derive(Debug, Clone)]
pub struct ReqwestHttp {
    client: HttpClient,
}

impl ReqwestHttp {
    pub fn new(timeout: Duration) -> Result<Self, SteelError> {
        let client = HttpClient::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| {
                SteelError::config("api_timeout", format!("failed to construct HTTP client: {err}"))
            })?;
        Ok(Self { client })
    }

    async fn buffer(response: reqwest::Response) -> Result<HttpResponse, SteelError> {
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.bytes().await?.to_vec();
        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

#[async_trait]
impl SteelHttp for ReqwestHttp {
    async fn post_json(
        &self,
        url: &str,
        headers: &HeaderMap,
        body: &Value,
    ) -> Result<HttpResponse, SteelError> {
        let response = self
            .client
            .post(url)
            .headers(headers.clone())
            .json(body)
            .send()
            .await?;
        Self::buffer(response).await
    }

    async fn delete(&self, url: &str, headers: &HeaderMap) -> Result<HttpResponse, SteelError> {
        let response = self
            .client
            .delete(url)
            .headers(headers.clone())
            .send()
            .await?;
        Self::buffer(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn content_type_drives_json_detection() {
        let mut pdf = HttpResponse::new(200, b"%PDF-1.7".to_vec());
        pdf.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/pdf"));
        assert!(!pdf.is_json());
        assert_eq!(pdf.content_type().as_deref(), Some("application/pdf"));

        let json = HttpResponse::json(200, &serde_json::json!({"ok": true}));
        assert!(json.is_json());

        let sniffed = HttpResponse::new(200, "  {\"content\": \"x\"}");
        assert!(sniffed.is_json());
        assert!(HttpResponse::new(204, "").is_success());
        assert!(!HttpResponse::new(404, "").is_success());
    }
}

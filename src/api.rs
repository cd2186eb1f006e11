//! Single-attempt calls against the Steel REST API.
//!
//! This layer owns the wire protocol: the auth header, payload shapes, the
//! array-valued `format` field, per-endpoint field filtering, and response
//! decoding. Retries and sessions are handled by the layers above.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::Utc;
use reqwest::header::{ACCEPT, HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::config::{OutputFormat, SteelConfig};
use crate::error::{PlanFeature, RemoteFailure, SteelError, classify_response};
use crate::http::{HttpResponse, SteelHttp};
use crate::metrics::start_timer;
use crate::session::SessionApi;
use crate::types::request::{ExtractOptions, RequestDescriptor};
use crate::types::result::{Content, ExtractResult, PageLink, ResultMetadata, ScrapeResult};
use crate::types::session::SessionHandle;

type JsonObject = Map<String, Value>;

const API_KEY_HEADER: &str = "steel-api-key";

pub(crate) const SCRAPE_FIELDS: &[&str] = &[
    "url",
    "format",
    "wait_for_selector",
    "delay",
    "headers",
    "session_id",
    "screenshot",
    "extract_links",
    "extract_images",
    "use_proxy",
    "region",
];

pub(crate) const SCREENSHOT_FIELDS: &[&str] = &[
    "url",
    "full_page",
    "wait_for_selector",
    "delay",
    "headers",
    "session_id",
    "use_proxy",
];

pub(crate) const EXTRACT_FIELDS: &[&str] = &[
    "url",
    "content",
    "schema",
    "instructions",
    "session_id",
    "use_proxy",
];

pub(crate) const SESSION_FIELDS: &[&str] = &[
    "timeout",
    "use_proxy",
    "solve_captcha",
    "block_ads",
    "user_agent",
    "region",
];

const STATUS_KEYS: &[&str] = &["status", "status_code", "statusCode"];
const URL_KEYS: &[&str] = &["final_url", "resolved_url", "sourceURL", "url"];

/// What a structured extraction runs against.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractSource {
    Page(RequestDescriptor),
    Content(String),
}

impl ExtractSource {
    fn label(&self) -> String {
        match self {
            ExtractSource::Page(descriptor) => descriptor.url().to_string(),
            ExtractSource::Content(_) => "<inline content>".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionResponse {
    id: String,
    #[serde(default, alias = "session_viewer_url")]
    session_viewer_url: Option<String>,
}

/// Typed client for the Steel endpoints used by this crate.
pub struct SteelApi {
    http: Arc<dyn SteelHttp>,
    base_url: String,
    headers: HeaderMap,
    session_lifetime: Duration,
    session_payload: JsonObject,
    /// Config-wide knobs offered to every endpoint, filtered per call.
    call_options: JsonObject,
    features: Vec<PlanFeature>,
}

impl SteelApi {
    pub fn new(config: &SteelConfig, http: Arc<dyn SteelHttp>) -> Result<Self, SteelError> {
        let mut headers = HeaderMap::new();
        let key = HeaderValue::from_str(config.api_key.trim())
            .map_err(|_| SteelError::config("api_key", "API key contains invalid characters"))?;
        headers.insert(HeaderName::from_static(API_KEY_HEADER), key);
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("steel-rs/", env!("CARGO_PKG_VERSION"))),
        );

        let options = config.to_session_options();
        let mut session_payload = filter_fields(options.clone(), SESSION_FIELDS);
        for (key, value) in &config.session_options {
            session_payload.insert(key.clone(), value.clone());
        }

        let mut call_options = options;
        call_options.retain(|key, _| !config.session_options.contains_key(key));

        Ok(Self {
            http,
            base_url: config.api_url.trim().to_string(),
            headers,
            session_lifetime: config.session_timeout,
            session_payload,
            call_options,
            features: config.requested_features(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        let path = path.trim_start_matches('/');
        format!("{base}/{path}")
    }

    async fn post(&self, path: &str, payload: JsonObject) -> Result<HttpResponse, SteelError> {
        let response = self
            .http
            .post_json(&self.endpoint(path), &self.headers, &Value::Object(payload))
            .await?;
        self.check(response)
    }

    fn check(&self, response: HttpResponse) -> Result<HttpResponse, SteelError> {
        if response.is_success() {
            Ok(response)
        } else {
            Err(classify_response(
                response.status,
                &response.headers,
                &response.body,
                &self.features,
            ))
        }
    }

    /// Payload offered to every page-level endpoint before filtering.
    fn page_payload(&self, descriptor: &RequestDescriptor) -> JsonObject {
        let mut payload = self.call_options.clone();
        payload.insert("url".into(), json!(descriptor.url().as_str()));
        payload.insert("format".into(), json!([descriptor.format().as_str()]));
        if let Some(selector) = descriptor.wait_for_selector() {
            payload.insert("wait_for_selector".into(), json!(selector));
        }
        if let Some(delay) = descriptor.delay() {
            payload.insert("delay".into(), json!(delay.as_millis() as u64));
        }
        if !descriptor.headers().is_empty() {
            payload.insert("headers".into(), json!(descriptor.headers()));
        }
        if let Some(session) = descriptor.session() {
            payload.insert("session_id".into(), json!(session.id));
        }
        payload.insert("screenshot".into(), json!(descriptor.screenshot()));
        payload.insert("extract_links".into(), json!(descriptor.extract_links()));
        payload.insert("extract_images".into(), json!(descriptor.extract_images()));
        payload.insert("full_page".into(), json!(descriptor.full_page()));
        payload
    }

    pub(crate) fn scrape_payload(&self, descriptor: &RequestDescriptor) -> JsonObject {
        filter_fields(self.page_payload(descriptor), SCRAPE_FIELDS)
    }

    pub(crate) fn screenshot_payload(&self, descriptor: &RequestDescriptor) -> JsonObject {
        filter_fields(self.page_payload(descriptor), SCREENSHOT_FIELDS)
    }

    pub(crate) fn extract_payload(
        &self,
        source: &ExtractSource,
        options: &ExtractOptions,
        session: Option<&SessionHandle>,
    ) -> JsonObject {
        let mut payload = match source {
            ExtractSource::Page(descriptor) => self.page_payload(descriptor),
            ExtractSource::Content(content) => {
                let mut payload = self.call_options.clone();
                payload.insert("content".into(), json!(content));
                payload
            }
        };
        if let Some(schema) = &options.schema {
            payload.insert("schema".into(), schema.clone());
        }
        if let Some(instructions) = &options.instructions {
            payload.insert("instructions".into(), json!(instructions));
        }
        if let Some(session) = session {
            payload.insert("session_id".into(), json!(session.id));
        }
        filter_fields(payload, EXTRACT_FIELDS)
    }

    pub async fn scrape(&self, descriptor: &RequestDescriptor) -> Result<ScrapeResult, SteelError> {
        let timer = start_timer();
        let target = descriptor.url().as_str();
        let response = self
            .post("scrape", self.scrape_payload(descriptor))
            .await
            .map_err(|err| err.with_url(target))?;
        let mut result = decode_scrape(response, descriptor)?;
        result.metadata.elapsed = timer.elapsed();
        Ok(result)
    }

    pub async fn screenshot(
        &self,
        descriptor: &RequestDescriptor,
    ) -> Result<ScrapeResult, SteelError> {
        let timer = start_timer();
        let target = descriptor.url().as_str();
        let response = self
            .post("screenshot", self.screenshot_payload(descriptor))
            .await
            .map_err(|err| err.with_url(target))?;
        let mut result = decode_screenshot(response, descriptor)?;
        result.metadata.elapsed = timer.elapsed();
        Ok(result)
    }

    pub async fn extract(
        &self,
        source: &ExtractSource,
        options: &ExtractOptions,
    ) -> Result<ExtractResult, SteelError> {
        let timer = start_timer();
        let label = source.label();
        let session = match source {
            ExtractSource::Page(descriptor) => descriptor.session(),
            ExtractSource::Content(_) => None,
        };
        let response = self
            .post("extract", self.extract_payload(source, options, session))
            .await
            .map_err(|err| err.with_url(&label))?;
        let mut result = decode_extract(response, &label)?;
        result.metadata.elapsed = timer.elapsed();
        Ok(result)
    }

    pub(crate) fn session_payload(&self) -> &JsonObject {
        &self.session_payload
    }
}

#[async_trait]
impl SessionApi for SteelApi {
    async fn create_session(&self) -> Result<SessionHandle, SteelError> {
        let response = self.post("sessions", self.session_payload.clone()).await?;
        let parsed: SessionResponse = serde_json::from_slice(&response.body).map_err(|err| {
            SteelError::Api(
                RemoteFailure::new(format!("malformed session response: {err}"))
                    .with_status(response.status),
            )
        })?;
        Ok(SessionHandle::new(
            parsed.id,
            self.session_lifetime,
            parsed.session_viewer_url,
        ))
    }

    async fn close_session(&self, session_id: &str) -> Result<(), SteelError> {
        let response = self
            .http
            .delete(&self.endpoint(&format!("sessions/{session_id}")), &self.headers)
            .await?;
        // an already-gone session counts as closed
        if response.status == 404 {
            return Ok(());
        }
        self.check(response).map(|_| ())
    }
}

fn filter_fields(mut payload: JsonObject, allowed: &[&str]) -> JsonObject {
    payload.retain(|key, _| allowed.contains(&key.as_str()));
    payload
}

fn content_error(url: &str, format: &str, message: impl Into<String>) -> SteelError {
    SteelError::Content {
        url: url.to_string(),
        format: format.to_string(),
        message: message.into(),
    }
}

fn parse_json(response: &HttpResponse, url: &str, format: &str) -> Result<Value, SteelError> {
    serde_json::from_slice(&response.body)
        .map_err(|err| content_error(url, format, format!("response is not valid JSON: {err}")))
}

/// Look `keys` up in the metadata object first, then the top-level body.
fn lookup<'a>(body: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    let metadata = body.get("metadata");
    keys.iter()
        .find_map(|key| metadata.and_then(|meta| meta.get(key)))
        .or_else(|| keys.iter().find_map(|key| body.get(key)))
        .filter(|value| !value.is_null())
}

fn decode_text(format: OutputFormat, raw: &str) -> Content {
    if format.is_binary() {
        if raw.starts_with("%PDF") {
            return Content::Binary(raw.as_bytes().to_vec());
        }
        if let Ok(bytes) = BASE64.decode(raw.trim()) {
            return Content::Binary(bytes);
        }
    }
    Content::Text(raw.to_string())
}

fn metadata_from(body: &Value, descriptor_url: &str, http_status: u16) -> (u16, ResultMetadata) {
    let status = lookup(body, STATUS_KEYS)
        .and_then(Value::as_u64)
        .and_then(|status| u16::try_from(status).ok())
        .unwrap_or(http_status);
    let resolved_url = lookup(body, URL_KEYS)
        .and_then(Value::as_str)
        .unwrap_or(descriptor_url)
        .to_string();
    let title = lookup(body, &["title"])
        .and_then(Value::as_str)
        .map(str::to_string);
    let load_time = lookup(body, &["load_time", "loadTime"])
        .and_then(Value::as_f64)
        .and_then(|ms| Duration::try_from_secs_f64(ms / 1000.0).ok());

    let mut extra = body
        .get("metadata")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    for key in STATUS_KEYS
        .iter()
        .chain(URL_KEYS)
        .chain(&["title", "load_time", "loadTime", "links", "images"])
    {
        extra.remove(*key);
    }

    (
        status,
        ResultMetadata {
            elapsed: Duration::ZERO,
            timestamp: Utc::now(),
            resolved_url,
            title,
            load_time,
            attempts: 1,
            extra,
        },
    )
}

fn links_from(body: &Value) -> Vec<PageLink> {
    let Some(Value::Array(items)) = lookup(body, &["links"]) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match item {
            Value::String(href) => Some(PageLink {
                href: href.clone(),
                text: None,
            }),
            Value::Object(link) => Some(PageLink {
                href: link.get("href").or_else(|| link.get("url"))?.as_str()?.to_string(),
                text: link
                    .get("text")
                    .and_then(Value::as_str)
                    .filter(|text| !text.is_empty())
                    .map(str::to_string),
            }),
            _ => None,
        })
        .collect()
}

fn images_from(body: &Value) -> Vec<String> {
    let Some(Value::Array(items)) = lookup(body, &["images"]) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match item {
            Value::String(src) => Some(src.clone()),
            Value::Object(image) => image
                .get("src")
                .or_else(|| image.get("url"))
                .and_then(Value::as_str)
                .map(str::to_string),
            _ => None,
        })
        .collect()
}

fn screenshot_url_from(body: &Value) -> Option<String> {
    match body.get("screenshot")? {
        Value::String(url) if url.starts_with("http") => Some(url.clone()),
        Value::Object(shot) => shot.get("url").and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}

fn decode_scrape(
    response: HttpResponse,
    descriptor: &RequestDescriptor,
) -> Result<ScrapeResult, SteelError> {
    let url = descriptor.url().as_str();
    let format = descriptor.format();

    if !response.is_json() {
        let content = match String::from_utf8(response.body) {
            Ok(text) if !format.is_binary() => Content::Text(text),
            Ok(text) => Content::Binary(text.into_bytes()),
            Err(err) => Content::Binary(err.into_bytes()),
        };
        if content.is_empty() {
            return Err(content_error(url, format.as_str(), "remote returned an empty body"));
        }
        let (status, metadata) = metadata_from(&Value::Null, url, response.status);
        return Ok(ScrapeResult {
            content,
            format,
            status,
            metadata,
            links: Vec::new(),
            images: Vec::new(),
            screenshot_url: None,
        });
    }

    let body = parse_json(&response, url, format.as_str())?;
    let raw = match body.get("content") {
        Some(Value::String(text)) => Some(text.as_str()),
        Some(Value::Object(by_format)) => by_format.get(format.as_str()).and_then(Value::as_str),
        _ => body.get(format.as_str()).and_then(Value::as_str),
    };
    let content = raw.map(|raw| decode_text(format, raw));
    let content = match content {
        Some(content) if !content.is_empty() => content,
        _ => {
            return Err(content_error(
                url,
                format.as_str(),
                format!("remote returned no usable {format} content"),
            ));
        }
    };

    let (status, metadata) = metadata_from(&body, url, response.status);
    Ok(ScrapeResult {
        content,
        format,
        status,
        metadata,
        links: links_from(&body),
        images: images_from(&body),
        screenshot_url: screenshot_url_from(&body),
    })
}

fn decode_screenshot(
    response: HttpResponse,
    descriptor: &RequestDescriptor,
) -> Result<ScrapeResult, SteelError> {
    let url = descriptor.url().as_str();
    const LABEL: &str = "screenshot";

    if !response.is_json() {
        if response.body.is_empty() {
            return Err(content_error(url, LABEL, "remote returned an empty image"));
        }
        let (status, metadata) = metadata_from(&Value::Null, url, response.status);
        return Ok(ScrapeResult {
            content: Content::Binary(response.body),
            format: descriptor.format(),
            status,
            metadata,
            links: Vec::new(),
            images: Vec::new(),
            screenshot_url: None,
        });
    }

    let body = parse_json(&response, url, LABEL)?;
    let encoded = ["screenshot", "data", "content"]
        .iter()
        .find_map(|key| body.get(key).and_then(Value::as_str))
        .filter(|raw| !raw.starts_with("http"));
    let hosted = body
        .get("url")
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| screenshot_url_from(&body));

    let content = match (encoded, &hosted) {
        (Some(raw), _) => Content::Binary(BASE64.decode(raw.trim()).map_err(|err| {
            content_error(url, LABEL, format!("screenshot is not valid base64: {err}"))
        })?),
        (None, Some(hosted)) => Content::Text(hosted.clone()),
        (None, None) => {
            return Err(content_error(url, LABEL, "remote returned no screenshot"));
        }
    };
    if content.is_empty() {
        return Err(content_error(url, LABEL, "remote returned an empty image"));
    }

    let (status, mut metadata) = metadata_from(&body, url, response.status);
    // a hosted screenshot URL is not the page's final URL
    if lookup(&body, &["final_url", "resolved_url", "sourceURL"]).is_none() {
        metadata.resolved_url = url.to_string();
    }
    Ok(ScrapeResult {
        content,
        format: descriptor.format(),
        status,
        metadata,
        links: Vec::new(),
        images: Vec::new(),
        screenshot_url: hosted,
    })
}

fn decode_extract(response: HttpResponse, label: &str) -> Result<ExtractResult, SteelError> {
    const FORMAT: &str = "json";
    let body = parse_json(&response, label, FORMAT)?;
    let data = ["data", "result", "extraction"]
        .iter()
        .find_map(|key| body.get(key))
        .cloned()
        .unwrap_or_else(|| body.clone());
    if data.is_null() {
        return Err(content_error(label, FORMAT, "remote returned no extracted data"));
    }
    let (status, metadata) = metadata_from(&body, label, response.status);
    Ok(ExtractResult {
        data,
        status,
        metadata,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::types::request::ScrapeRequest;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingHttp {
        requests: Mutex<Vec<(String, Value)>>,
        responses: Mutex<Vec<HttpResponse>>,
    }

    impl RecordingHttp {
        fn replying(response: HttpResponse) -> Arc<Self> {
            Arc::new(Self {
                requests: Mutex::new(Vec::new()),
                responses: Mutex::new(vec![response]),
            })
        }

        fn next(&self) -> HttpResponse {
            self.responses
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| HttpResponse::new(500, "no scripted response"))
        }
    }

    #[async_trait]
    impl SteelHttp for RecordingHttp {
        async fn post_json(
            &self,
            url: &str,
            headers: &HeaderMap,
            body: &Value,
        ) -> Result<HttpResponse, SteelError> {
            assert_eq!(headers.get(API_KEY_HEADER).unwrap(), "k1");
            self.requests
                .lock()
                .unwrap()
                .push((url.to_string(), body.clone()));
            Ok(self.next())
        }

        async fn delete(&self, url: &str, _headers: &HeaderMap) -> Result<HttpResponse, SteelError> {
            self.requests
                .lock()
                .unwrap()
                .push((url.to_string(), Value::Null));
            Ok(self.next())
        }
    }

    fn config() -> SteelConfig {
        let mut config = SteelConfig::new("k1");
        config.api_url = "https://steel.test/v1/".to_string();
        config
    }

    fn descriptor(request: ScrapeRequest) -> RequestDescriptor {
        request.validate(OutputFormat::Markdown).expect("valid request")
    }

    #[test]
    fn scrape_payload_sends_format_array_and_drops_session_knobs() {
        let mut config = config();
        config.use_proxy = true;
        config.solve_captcha = true;
        let api = SteelApi::new(&config, RecordingHttp::replying(HttpResponse::new(200, ""))).unwrap();

        let payload = api.scrape_payload(&descriptor(
            ScrapeRequest::new("https://example.com")
                .wait_for("main")
                .delay_ms(500)
                .header("Accept-Language", "de"),
        ));

        assert_eq!(payload["format"], json!(["markdown"]));
        assert_eq!(payload["delay"], json!(500));
        assert_eq!(payload["use_proxy"], json!(true));
        assert_eq!(payload["headers"], json!({"Accept-Language": "de"}));
        assert!(!payload.contains_key("timeout"));
        assert!(!payload.contains_key("solve_captcha"));
        assert!(!payload.contains_key("full_page"));
        assert!(payload.keys().all(|key| SCRAPE_FIELDS.contains(&key.as_str())));
    }

    #[test]
    fn screenshot_and_extract_payloads_are_filtered_per_endpoint() {
        let api = SteelApi::new(&config(), RecordingHttp::replying(HttpResponse::new(200, ""))).unwrap();
        let page = descriptor(ScrapeRequest::new("https://example.com"));

        let shot = api.screenshot_payload(&page);
        assert!(!shot.contains_key("format"));
        assert!(!shot.contains_key("extract_links"));
        assert!(shot.contains_key("full_page"));

        let extract = api.extract_payload(
            &ExtractSource::Content("<p>hi</p>".to_string()),
            &ExtractOptions::with_schema(json!({"type": "object"})).instructions("get it"),
            None,
        );
        assert_eq!(extract["content"], json!("<p>hi</p>"));
        assert_eq!(extract["instructions"], json!("get it"));
        assert!(!extract.contains_key("url"));
        assert!(!extract.contains_key("format"));
    }

    #[test]
    fn session_payload_keeps_custom_options() {
        let mut config = config();
        config.stealth_mode = true;
        config
            .session_options
            .insert("dimensions".to_string(), json!({"width": 1280}));
        let api = SteelApi::new(&config, RecordingHttp::replying(HttpResponse::new(200, ""))).unwrap();

        let payload = api.session_payload();
        assert_eq!(payload["timeout"], json!(300_000));
        assert_eq!(payload["block_ads"], json!(true));
        assert_eq!(payload["dimensions"], json!({"width": 1280}));
    }

    #[tokio::test]
    async fn scrape_reads_content_keyed_by_format() {
        let http = RecordingHttp::replying(HttpResponse::json(
            200,
            &json!({
                "content": {"markdown": "# Example", "html": "<h1>Example</h1>"},
                "metadata": {"statusCode": 201, "sourceURL": "https://example.com/final", "title": "Example", "language": "en"},
                "links": [{"href": "https://iana.org", "text": "More"}, "https://example.org"]
            }),
        ));
        let api = SteelApi::new(&config(), http.clone()).unwrap();

        let result = api
            .scrape(&descriptor(ScrapeRequest::new("https://example.com")))
            .await
            .expect("scrape");

        assert_eq!(result.content, Content::Text("# Example".to_string()));
        assert_eq!(result.status, 201);
        assert_eq!(result.metadata.resolved_url, "https://example.com/final");
        assert_eq!(result.metadata.title.as_deref(), Some("Example"));
        assert_eq!(result.metadata.extra.get("language"), Some(&json!("en")));
        assert_eq!(result.links.len(), 2);

        let requests = http.requests.lock().unwrap();
        assert_eq!(requests[0].0, "https://steel.test/v1/scrape");
    }

    #[tokio::test]
    async fn pdf_content_is_base64_decoded() {
        let encoded = BASE64.encode(b"%PDF-1.4 data");
        let http = RecordingHttp::replying(HttpResponse::json(200, &json!({"content": encoded})));
        let api = SteelApi::new(&config(), http).unwrap();

        let result = api
            .scrape(&descriptor(ScrapeRequest::new("https://example.com").format("pdf")))
            .await
            .expect("pdf scrape");
        assert_eq!(result.content, Content::Binary(b"%PDF-1.4 data".to_vec()));
    }

    #[tokio::test]
    async fn empty_content_is_a_content_error() {
        let http = RecordingHttp::replying(HttpResponse::json(200, &json!({"content": "  "})));
        let api = SteelApi::new(&config(), http).unwrap();

        let err = api
            .scrape(&descriptor(ScrapeRequest::new("https://example.com")))
            .await
            .expect_err("empty content");
        assert_eq!(err.kind(), ErrorKind::Content);
        assert_eq!(err.url(), Some("https://example.com/"));
    }

    #[tokio::test]
    async fn remote_errors_carry_the_target_url() {
        let http = RecordingHttp::replying(HttpResponse::json(
            503,
            &json!({"message": "upstream unavailable"}),
        ));
        let api = SteelApi::new(&config(), http).unwrap();

        let err = api
            .scrape(&descriptor(ScrapeRequest::new("https://example.com/a")))
            .await
            .expect_err("503");
        assert_eq!(err.kind(), ErrorKind::TransientNetwork);
        assert_eq!(err.url(), Some("https://example.com/a"));
    }

    #[tokio::test]
    async fn sessions_are_created_and_closed() {
        let http = RecordingHttp::replying(HttpResponse::json(
            200,
            &json!({"id": "sess-42", "sessionViewerUrl": "https://app.steel.dev/v/42"}),
        ));
        let api = SteelApi::new(&config(), http.clone()).unwrap();

        let handle = api.create_session().await.expect("session");
        assert_eq!(handle.id, "sess-42");
        assert_eq!(handle.viewer_url.as_deref(), Some("https://app.steel.dev/v/42"));

        http.responses
            .lock()
            .unwrap()
            .push(HttpResponse::new(404, "gone"));
        api.close_session("sess-42").await.expect("404 counts as closed");

        let requests = http.requests.lock().unwrap();
        assert_eq!(requests[1].0, "https://steel.test/v1/sessions/sess-42");
    }

    #[tokio::test]
    async fn screenshot_accepts_hosted_urls() {
        let http = RecordingHttp::replying(HttpResponse::json(
            200,
            &json!({"url": "https://cdn.steel.dev/shot.png"}),
        ));
        let api = SteelApi::new(&config(), http).unwrap();

        let result = api
            .screenshot(&descriptor(ScrapeRequest::new("https://example.com")))
            .await
            .expect("screenshot");
        assert_eq!(result.screenshot_url.as_deref(), Some("https://cdn.steel.dev/shot.png"));
        assert_eq!(result.metadata.resolved_url, "https://example.com/");
    }
}

//! End-to-end client behaviour against a mock Steel API.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use futures_util::future::join_all;
use reqwest::header::HeaderMap;
use serde_json::{Value, json};
use steel_rs::http::{HttpResponse, SteelHttp};
use steel_rs::{
    BlockingSteelClient, ErrorKind, ExtractOptions, ScrapeRequest, SessionState, SteelClient,
    SteelConfig, SteelError, Verbosity,
};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config(server: &MockServer) -> SteelConfig {
    let mut config = SteelConfig::new("k1");
    config.api_url = server.uri();
    config.verbose = Verbosity::Minimal;
    config.retry.base_delay = Duration::from_millis(10);
    config.retry.max_jitter = Duration::ZERO;
    config
}

async fn mount_session(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/sessions"))
        .and(header("steel-api-key", "k1"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": "sess-1",
            "sessionViewerUrl": "https://app.steel.dev/sessions/sess-1",
        })))
        .mount(server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/sessions/sess-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
        .mount(server)
        .await;
}

fn example_page() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "content": "# Example",
        "metadata": {"status": 200, "title": "Example Domain"},
    }))
}

async fn bodies_for(server: &MockServer, endpoint: &str) -> Vec<Value> {
    server
        .received_requests()
        .await
        .expect("request recording is enabled")
        .iter()
        .filter(|request| request.url.path() == endpoint)
        .map(|request| serde_json::from_slice(&request.body).expect("json body"))
        .collect()
}

#[tokio::test]
async fn scrapes_markdown_through_a_shared_session() -> Result<()> {
    let server = MockServer::start().await;
    mount_session(&server).await;
    Mock::given(method("POST"))
        .and(path("/scrape"))
        .and(header("steel-api-key", "k1"))
        .and(body_partial_json(json!({
            "url": "https://example.com/",
            "format": ["markdown"],
            "session_id": "sess-1",
        })))
        .respond_with(example_page())
        .expect(1)
        .mount(&server)
        .await;

    let client = SteelClient::new(config(&server))?;
    let result = client
        .scrape(ScrapeRequest::new("https://example.com").format("markdown"))
        .await?;

    assert_eq!(result.content.as_text(), Some("# Example"));
    assert_eq!(result.status, 200);
    assert_eq!(result.metadata.title.as_deref(), Some("Example Domain"));
    assert_eq!(result.metadata.attempts, 1);

    assert!(client.close_session().await);
    assert!(!client.close_session().await);
    assert_eq!(client.session_state(), SessionState::Closed);
    server.verify().await;
    Ok(())
}

#[tokio::test]
async fn plan_limitation_is_not_retried() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sessions"))
        .and(body_partial_json(json!({"use_proxy": true})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "sess-1"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/scrape"))
        .respond_with(
            ResponseTemplate::new(402)
                .set_body_json(json!({"message": "Proxy usage requires a paid plan"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let mut config = config(&server);
    config.use_proxy = true;
    config.retry.max_attempts = 5;
    let client = SteelClient::new(config)?;

    let err = client
        .scrape("https://example.com")
        .await
        .expect_err("plan limitation");
    assert_eq!(err.kind(), ErrorKind::PlanLimitation);
    assert_eq!(err.attempts(), None);
    assert_eq!(err.url(), Some("https://example.com/"));
    assert!(err.to_string().contains("proxy"), "{err}");
    assert_eq!(client.stats().metrics.scrape.retries, 0);
    server.verify().await;
    Ok(())
}

#[tokio::test]
async fn bad_credentials_fail_after_one_attempt() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sessions"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({"message": "Invalid API key"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = SteelClient::new(config(&server))?;
    let err = client
        .scrape("https://example.com")
        .await
        .expect_err("unauthorized");

    assert_eq!(err.kind(), ErrorKind::Authentication);
    assert!(err.to_string().contains("STEEL_API_KEY"));
    assert_eq!(client.session_state(), SessionState::Absent);
    server.verify().await;
    Ok(())
}

#[tokio::test]
async fn service_unavailable_is_retried() -> Result<()> {
    let server = MockServer::start().await;
    mount_session(&server).await;
    Mock::given(method("POST"))
        .and(path("/scrape"))
        .respond_with(ResponseTemplate::new(503).set_body_string("upstream busy"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/scrape"))
        .respond_with(example_page())
        .expect(1)
        .mount(&server)
        .await;

    let client = SteelClient::new(config(&server))?;
    let result = client.scrape("https://example.com").await?;

    assert_eq!(result.metadata.attempts, 2);
    let stats = client.stats();
    assert_eq!(stats.metrics.scrape.requests, 1);
    assert_eq!(stats.metrics.scrape.retries, 1);
    assert_eq!(stats.metrics.scrape.failures, 0);
    server.verify().await;
    Ok(())
}

#[tokio::test]
async fn exhausted_retries_report_the_attempt_count() -> Result<()> {
    let server = MockServer::start().await;
    mount_session(&server).await;
    Mock::given(method("POST"))
        .and(path("/scrape"))
        .respond_with(ResponseTemplate::new(502))
        .expect(3)
        .mount(&server)
        .await;

    let client = SteelClient::new(config(&server))?;
    let err = client
        .scrape("https://example.com")
        .await
        .expect_err("always failing");

    assert_eq!(err.kind(), ErrorKind::TransientNetwork);
    assert_eq!(err.attempts(), Some(3));
    assert_eq!(client.stats().metrics.scrape.failures, 1);
    server.verify().await;
    Ok(())
}

#[tokio::test]
async fn endpoints_only_receive_supported_fields() -> Result<()> {
    let server = MockServer::start().await;
    mount_session(&server).await;
    Mock::given(method("POST"))
        .and(path("/scrape"))
        .respond_with(example_page())
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/extract"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"title": "Example Domain"},
        })))
        .mount(&server)
        .await;

    let mut config = config(&server);
    config.solve_captcha = true;
    config.stealth_mode = true;
    let client = SteelClient::new(config)?;

    client
        .scrape(
            ScrapeRequest::new("https://example.com")
                .format("HTML")
                .delay_ms(250)
                .header("x-trace", "1"),
        )
        .await?;
    let extracted = client
        .extract(
            "https://example.com",
            ExtractOptions::with_schema(json!({"type": "object"})).instructions("page title"),
        )
        .await?;
    assert_eq!(extracted.data, json!({"title": "Example Domain"}));

    let sessions = bodies_for(&server, "/sessions").await;
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0]["timeout"], json!(300_000));
    assert_eq!(sessions[0]["solve_captcha"], json!(true));
    assert_eq!(sessions[0]["block_ads"], json!(true));

    let scrape = &bodies_for(&server, "/scrape").await[0];
    assert_eq!(scrape["format"], json!(["html"]));
    assert_eq!(scrape["delay"], json!(250));
    assert_eq!(scrape["headers"], json!({"x-trace": "1"}));
    for field in ["timeout", "solve_captcha", "block_ads", "full_page"] {
        assert!(scrape.get(field).is_none(), "scrape payload carried {field}");
    }

    let extract = &bodies_for(&server, "/extract").await[0];
    assert_eq!(extract["instructions"], json!("page title"));
    assert_eq!(extract["schema"], json!({"type": "object"}));
    for field in ["format", "timeout", "delay", "solve_captcha"] {
        assert!(extract.get(field).is_none(), "extract payload carried {field}");
    }
    Ok(())
}

#[tokio::test]
async fn concurrent_requests_create_one_session() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sessions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"id": "sess-1"}))
                .set_delay(Duration::from_millis(50)),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/scrape"))
        .respond_with(example_page())
        .expect(8)
        .mount(&server)
        .await;

    let client = SteelClient::new(config(&server))?;
    let results = join_all((0..8).map(|_| client.scrape("https://example.com"))).await;

    for result in results {
        assert_eq!(result?.content.as_text(), Some("# Example"));
    }
    assert_eq!(client.stats().session.leases, 0);
    server.verify().await;
    Ok(())
}

#[tokio::test]
async fn repeated_scrapes_return_identical_content() -> Result<()> {
    let server = MockServer::start().await;
    mount_session(&server).await;
    Mock::given(method("POST"))
        .and(path("/scrape"))
        .respond_with(example_page())
        .mount(&server)
        .await;

    let client = SteelClient::new(config(&server))?;
    let request = ScrapeRequest::new("https://example.com").format("markdown");
    let first = client.scrape(request.clone()).await?;
    let second = client.scrape(request).await?;

    assert_eq!(first.content, second.content);
    assert_eq!(first.status, second.status);
    Ok(())
}

#[tokio::test]
async fn session_context_releases_when_work_fails() -> Result<()> {
    let server = MockServer::start().await;
    mount_session(&server).await;

    let client = SteelClient::new(config(&server))?;
    let mut seen = None;
    let outcome: Result<(), SteelError> = client
        .session_context(|handle| {
            seen = Some(handle.id.clone());
            async { Err(SteelError::Cancelled) }
        })
        .await;

    assert_eq!(outcome.expect_err("work failed").kind(), ErrorKind::Cancelled);
    let id = seen.expect("work received a handle");
    assert!(matches!(
        client.session_state_of(&id),
        SessionState::Expiring | SessionState::Closed
    ));
    assert_eq!(client.stats().session.leases, 0);
    Ok(())
}

#[tokio::test]
async fn zero_idle_threshold_closes_on_release() -> Result<()> {
    let server = MockServer::start().await;
    mount_session(&server).await;

    let mut config = config(&server);
    config.session_idle_timeout = Duration::ZERO;
    let client = SteelClient::new(config)?;

    let lease = client.acquire_session().await?;
    client.release_session(&lease).await;
    client.release_session(&lease).await;

    assert_eq!(client.session_state_of(lease.session_id()), SessionState::Closed);
    let deletes = server
        .received_requests()
        .await
        .expect("recording")
        .iter()
        .filter(|request| request.method.as_str() == "DELETE")
        .count();
    assert_eq!(deletes, 1);
    Ok(())
}

/// Transport that counts every call so validation can prove it stayed offline.
#[derive(Default)]
struct CountingHttp {
    calls: AtomicUsize,
}

#[async_trait]
impl SteelHttp for CountingHttp {
    async fn post_json(
        &self,
        _url: &str,
        _headers: &HeaderMap,
        _body: &Value,
    ) -> Result<HttpResponse, SteelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(HttpResponse::json(200, &json!({"id": "sess-1"})))
    }

    async fn delete(&self, _url: &str, _headers: &HeaderMap) -> Result<HttpResponse, SteelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(HttpResponse::new(200, ""))
    }
}

#[tokio::test]
async fn invalid_requests_never_reach_the_network() -> Result<()> {
    let http = Arc::new(CountingHttp::default());
    let client = SteelClient::with_http(SteelConfig::new("k1"), http.clone())?;

    for request in [
        ScrapeRequest::new("not-a-url"),
        ScrapeRequest::new("https://example.com").format("docx"),
        ScrapeRequest::new("https://example.com").delay_ms(-5),
    ] {
        let err = client.scrape(request.clone()).await.expect_err("invalid");
        assert_eq!(err.kind(), ErrorKind::Validation);
        let err = client
            .extract(request, ExtractOptions::default())
            .await
            .expect_err("invalid");
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    assert_eq!(http.calls.load(Ordering::SeqCst), 0);
    assert_eq!(client.session_state(), SessionState::Absent);
    Ok(())
}

#[test]
fn blocking_and_async_results_match() -> Result<()> {
    let runtime = tokio::runtime::Runtime::new()?;
    let server = runtime.block_on(async {
        let server = MockServer::start().await;
        mount_session(&server).await;
        Mock::given(method("POST"))
            .and(path("/scrape"))
            .respond_with(example_page())
            .mount(&server)
            .await;
        server
    });

    let blocking = BlockingSteelClient::new(config(&server))?;
    let from_blocking = blocking.scrape("https://example.com")?;

    let client = SteelClient::new(config(&server))?;
    let from_async = runtime.block_on(client.scrape("https://example.com"))?;

    assert_eq!(from_blocking.content, from_async.content);
    assert_eq!(from_blocking.status, from_async.status);
    assert_eq!(from_blocking.format, from_async.format);
    assert_eq!(
        from_blocking.metadata.resolved_url,
        from_async.metadata.resolved_url
    );

    assert!(blocking.close_session());
    runtime.block_on(client.close_session());
    drop(blocking);
    drop(server);
    Ok(())
}

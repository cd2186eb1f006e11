use std::time::Duration;

use anyhow::Result;
use serde_json::json;
use steel_rs::{ErrorKind, ScrapeRequest, SteelClient, SteelConfig, SteelDocumentLoader, Verbosity};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> Result<SteelClient> {
    let mut config = SteelConfig::new("k1");
    config.api_url = server.uri();
    config.verbose = Verbosity::Minimal;
    config.retry.max_attempts = 1;
    Ok(SteelClient::new(config)?)
}

async fn mount_page(server: &MockServer, url: &str, body: &str, delay: Duration) {
    Mock::given(method("POST"))
        .and(path("/scrape"))
        .and(body_partial_json(json!({ "url": url })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({
                    "content": body,
                    "metadata": {"status": 200, "title": body, "final_url": url},
                    "links": [{"href": format!("{url}next"), "text": "next"}],
                }))
                .set_delay(delay),
        )
        .mount(server)
        .await;
}

async fn mount_session(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/sessions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "sess-batch"})))
        .expect(1)
        .mount(server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/sessions/sess-batch"))
        .respond_with(ResponseTemplate::new(200))
        .mount(server)
        .await;
}

#[tokio::test]
async fn concurrent_load_keeps_input_order() -> Result<()> {
    let server = MockServer::start().await;
    mount_session(&server).await;
    mount_page(&server, "https://a.example/", "alpha", Duration::from_millis(120)).await;
    mount_page(&server, "https://b.example/", "beta", Duration::from_millis(10)).await;
    mount_page(&server, "https://c.example/", "gamma", Duration::from_millis(60)).await;

    let loader = SteelDocumentLoader::new(
        client(&server)?,
        ["https://a.example", "https://b.example", "https://c.example"],
    )
    .template(ScrapeRequest {
        extract_links: true,
        ..Default::default()
    })
    .concurrency(3);

    let documents = loader.load_concurrent().await?;
    let contents: Vec<_> = documents.iter().map(|d| d.page_content.as_str()).collect();
    assert_eq!(contents, ["alpha", "beta", "gamma"]);

    let meta = &documents[0].metadata;
    assert_eq!(meta["source"], json!("https://a.example"));
    assert_eq!(meta["format"], json!("markdown"));
    assert_eq!(meta["status_code"], json!(200));
    assert_eq!(meta["final_url"], json!("https://a.example/"));
    assert_eq!(meta["title"], json!("alpha"));
    assert_eq!(meta["links"][0]["href"], json!("https://a.example/next"));
    assert!(meta.contains_key("elapsed_ms"));
    assert!(meta.contains_key("timestamp"));
    assert!(!meta.contains_key("images"));
    server.verify().await;
    Ok(())
}

#[tokio::test]
async fn failing_urls_are_skipped() -> Result<()> {
    let server = MockServer::start().await;
    mount_session(&server).await;
    mount_page(&server, "https://a.example/", "alpha", Duration::ZERO).await;
    Mock::given(method("POST"))
        .and(path("/scrape"))
        .and(body_partial_json(json!({"url": "https://broken.example/"})))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"message": "not found"})))
        .mount(&server)
        .await;

    let loader = SteelDocumentLoader::new(
        client(&server)?,
        ["https://broken.example", "https://a.example"],
    );
    let documents = loader.load().await?;

    assert_eq!(documents.len(), 1);
    assert_eq!(documents[0].page_content, "alpha");
    Ok(())
}

#[tokio::test]
async fn first_error_is_returned_when_nothing_loads() -> Result<()> {
    let server = MockServer::start().await;
    mount_session(&server).await;
    Mock::given(method("POST"))
        .and(path("/scrape"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({"message": "bad target"})))
        .mount(&server)
        .await;

    let loader = SteelDocumentLoader::new(
        client(&server)?,
        ["https://a.example", "https://b.example"],
    )
    .session_reuse(false);
    let err = loader.load().await.expect_err("nothing loaded");

    assert_eq!(err.kind(), ErrorKind::Api);
    assert_eq!(err.url(), Some("https://a.example/"));
    Ok(())
}

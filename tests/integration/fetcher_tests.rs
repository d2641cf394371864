//! Fetcher politeness, session login and render fallback

use async_trait::async_trait;
use forum_ripple::config::FetcherConfig;
use forum_ripple::crawler::{FetchResult, Fetcher, PageRenderer, RenderError};
use std::sync::Arc;
use std::time::{Duration, Instant};
use wiremock::matchers::{body_string_contains, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fetcher_config() -> FetcherConfig {
    FetcherConfig {
        request_delay_ms: 0,
        request_timeout_secs: 5,
        ..FetcherConfig::default()
    }
}

struct StaticRenderer(&'static str);

#[async_trait]
impl PageRenderer for StaticRenderer {
    async fn render(&self, _url: &str) -> Result<String, RenderError> {
        Ok(self.0.to_string())
    }
}

struct BrokenRenderer;

#[async_trait]
impl PageRenderer for BrokenRenderer {
    async fn render(&self, _url: &str) -> Result<String, RenderError> {
        Err(RenderError::Empty)
    }
}

#[tokio::test]
async fn test_login_happens_once_before_first_fetch() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/index.php"))
        .and(query_param("act", "Login"))
        .and(body_string_contains("UserName=crawler"))
        .respond_with(
            ResponseTemplate::new(200).insert_header("Set-Cookie", "member_id=5; Path=/"),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/index.php"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>board</html>"))
        .expect(3)
        .mount(&server)
        .await;

    let config = FetcherConfig {
        bot_username: Some("crawler".to_string()),
        bot_password: Some("hunter2".to_string()),
        ..fetcher_config()
    };
    let fetcher = Fetcher::new(&config, &server.uri()).unwrap();
    assert!(!fetcher.is_authenticated());

    let url = format!("{}/index.php?showtopic=1", server.uri());
    let (a, b) = tokio::join!(fetcher.fetch(&url), fetcher.fetch_politely(&url));
    assert!(a.is_success());
    assert!(b.is_success());
    assert!(fetcher.fetch(&url).await.is_success());
    assert!(fetcher.is_authenticated());
}

#[tokio::test]
async fn test_failures_are_returned_as_values() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/busy"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let fetcher = Fetcher::new(&fetcher_config(), &server.uri()).unwrap();

    let busy = fetcher.fetch(&format!("{}/busy", server.uri())).await;
    assert!(matches!(busy, FetchResult::HttpError { status_code: 503 }));

    let unreachable = fetcher.fetch("http://127.0.0.1:1/index.php").await;
    assert!(matches!(unreachable, FetchResult::NetworkError { .. }));
}

#[tokio::test]
async fn test_polite_fetches_pay_the_delay() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .mount(&server)
        .await;

    let config = FetcherConfig {
        request_delay_ms: 100,
        max_concurrent_requests: 1,
        ..fetcher_config()
    };
    let fetcher = Fetcher::new(&config, &server.uri()).unwrap();
    let url = format!("{}/index.php", server.uri());

    let started = Instant::now();
    let (a, b) = tokio::join!(fetcher.fetch_politely(&url), fetcher.fetch_politely(&url));
    assert!(a.is_success() && b.is_success());
    assert!(started.elapsed() >= Duration::from_millis(200));
}

#[tokio::test]
async fn test_rendered_fetch_uses_renderer_output() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("static"))
        .expect(0)
        .mount(&server)
        .await;

    let fetcher = Fetcher::new(&fetcher_config(), &server.uri())
        .unwrap()
        .with_renderer(Arc::new(StaticRenderer("<html>rendered</html>")));

    let result = fetcher
        .fetch_rendered(&format!("{}/index.php?showuser=1", server.uri()))
        .await;
    assert_eq!(result.into_body().as_deref(), Some("<html>rendered</html>"));
}

#[tokio::test]
async fn test_rendered_fetch_falls_back_to_plain_fetch() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("static"))
        .expect(1)
        .mount(&server)
        .await;

    let fetcher = Fetcher::new(&fetcher_config(), &server.uri())
        .unwrap()
        .with_renderer(Arc::new(BrokenRenderer));

    let result = fetcher
        .fetch_rendered(&format!("{}/index.php?showuser=1", server.uri()))
        .await;
    assert_eq!(result.into_body().as_deref(), Some("static"));
}

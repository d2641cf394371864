//! Admin export protocol against a mock admin panel

use crate::common::{test_config, EXPORT_SQL};
use forum_ripple::export::{ExportClient, ExportCredentials, ExportError, ExportState};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn credentials() -> ExportCredentials {
    ExportCredentials::new("admin", "secret")
}

async fn mount_login(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/admin.php"))
        .and(query_param("login", "yes"))
        .respond_with(
            ResponseTemplate::new(302).insert_header("Location", "admin.php?adsess=abc123&act=idx"),
        )
        .expect(1)
        .mount(server)
        .await;
}

fn client(server: &MockServer) -> ExportClient {
    let config = test_config(&server.uri());
    ExportClient::new(&server.uri(), &config.export, "ForumRippleTest/1.0").unwrap()
}

#[tokio::test]
async fn test_full_export_flow_follows_next_page_links() {
    let server = MockServer::start().await;
    mount_login(&server).await;

    // The topics part spans two pages
    Mock::given(method("GET"))
        .and(path("/admin.php"))
        .and(query_param("part", "23"))
        .and(query_param("line", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<a href="admin.php?act=mysql&code=dump&line=500&part=23&adsess=abc123">Next page</a>"#,
        ))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/admin.php"))
        .and(query_param("part", "23"))
        .and(query_param("line", "500"))
        .respond_with(ResponseTemplate::new(200).set_body_string("Part finished"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/admin.php"))
        .and(query_param("act", "mysql"))
        .and(query_param("adsess", "abc123"))
        .respond_with(ResponseTemplate::new(200).set_body_string("Part finished"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/sqls/abc123-board_.sql"))
        .respond_with(ResponseTemplate::new(200).set_body_string(EXPORT_SQL))
        .expect(1)
        .mount(&server)
        .await;

    let mut client = client(&server);
    assert_eq!(client.state(), ExportState::LoggedOut);

    let snapshot = client.try_fetch_snapshot(Some(&credentials())).await.unwrap();
    assert_eq!(client.state(), ExportState::Parsed);
    assert_eq!(snapshot.posts.len(), 3);
    assert_eq!(snapshot.topics.len(), 2);
    assert_eq!(snapshot.members.len(), 2);
    assert_eq!(snapshot.forum_name("5"), Some("IC Roleplay"));
}

#[tokio::test]
async fn test_rejected_login_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/admin.php"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let mut client = client(&server);
    let err = client.try_fetch_snapshot(Some(&credentials())).await.unwrap_err();
    assert!(matches!(err, ExportError::LoginRejected { status: 403 }));
    assert_eq!(client.state(), ExportState::LoggedOut);
}

#[tokio::test]
async fn test_missing_file_yields_empty_snapshot() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    Mock::given(method("GET"))
        .and(path("/admin.php"))
        .and(query_param("act", "mysql"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/sqls/abc123-board_.sql"))
        .respond_with(ResponseTemplate::new(200).set_body_string("-- empty"))
        .expect(2)
        .mount(&server)
        .await;

    let mut config = test_config(&server.uri());
    config.export.poll_schedule_ms = vec![0, 10];
    let mut client = ExportClient::new(&server.uri(), &config.export, "ForumRippleTest/1.0").unwrap();

    let snapshot = client.fetch_snapshot(Some(&credentials())).await;
    assert!(snapshot.is_empty());
    assert_eq!(client.state(), ExportState::Polling);
}

#[tokio::test]
async fn test_failed_dump_start_yields_empty_snapshot() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    Mock::given(method("GET"))
        .and(path("/admin.php"))
        .and(query_param("step1", "1"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/admin.php"))
        .and(query_param("act", "mysql"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let mut client = client(&server);
    let err = client.try_fetch_snapshot(Some(&credentials())).await.unwrap_err();
    assert!(matches!(err, ExportError::StartRejected { status: 500 }));
    assert_eq!(client.state(), ExportState::LoggedIn);
}

//! End-to-end crawl operations against a mock forum

use crate::common::*;
use forum_ripple::crawler::{OperationReport, ReconcileSource, ThreadEvent, LAST_EXPORT_SYNC_KEY};
use forum_ripple::storage::Storage;
use forum_ripple::ThreadCategory;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TONY_QUOTE: &str = r#"<b>"I am Iron Man, after all."</b>"#;

async fn mount_page(server: &MockServer, key: &str, value: &str, body: String) {
    Mock::given(method("GET"))
        .and(path("/index.php"))
        .and(query_param(key, value))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_character_thread_crawl_stores_threads_and_links() {
    let server = MockServer::start().await;
    let storage = memory_storage();
    seed_character(&storage, "1", "Tony Stark");

    Mock::given(method("GET"))
        .and(path("/index.php"))
        .and(query_param("CODE", "getalluser"))
        .and(query_param("mid", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_string(search_page(&[
            ("100", "Avengers Assemble", "49", "Completed Threads"),
            ("101", "Guide to the Board", "3", "Guidebook"),
        ])))
        .expect(1)
        .mount(&server)
        .await;

    mount_page(
        &server,
        "showtopic",
        "100",
        thread_page(
            "Avengers Assemble",
            ("49", "Completed Threads"),
            &[
                dated_post("2", "Steve Rogers", "Jan 15 2026, 08:30 PM", "Hello there."),
                post("1", "Tony Stark", TONY_QUOTE),
            ],
            "",
        ),
    )
    .await;

    let crawler = crawler(test_config(&server.uri()), &storage);
    let summary = crawler
        .crawl_character_threads("1")
        .await
        .expect("crawl should succeed");

    assert_eq!(summary.total_threads, 1);
    assert_eq!(summary.threads.complete, 1);
    assert_eq!(summary.posts_recorded, 2);
    assert_eq!(summary.quotes_added, 1);

    let guard = storage.lock().unwrap();
    let threads = guard.threads_for("1").unwrap();
    assert_eq!(threads.len(), 1);
    assert_eq!(threads[0].title, "Avengers Assemble");
    assert_eq!(threads[0].category, ThreadCategory::Complete);
    assert_eq!(threads[0].last_poster_name.as_deref(), Some("Tony Stark"));
    assert!(threads[0].is_user_last_poster);
    assert_eq!(threads[0].post_count, 1);

    let posts = guard.thread_posts("100").unwrap();
    let authors: Vec<_> = posts.iter().map(|p| p.author_id.as_str()).collect();
    assert_eq!(authors, vec!["2", "1"]);
    assert_eq!(posts[0].post_date.as_deref(), Some("2026-01-15"));
    assert_eq!(posts[1].post_date, None);

    let quotes = guard.quotes_for("1").unwrap();
    assert_eq!(quotes.len(), 1);
    assert_eq!(quotes[0].text, "I am Iron Man, after all.");
    assert_eq!(quotes[0].source_thread_id.as_deref(), Some("100"));

    let character = guard.get_character("1").unwrap().unwrap();
    assert!(character.threads_crawled_at.is_some());
    drop(guard);

    assert!(!crawler.activity().is_active());
}

#[tokio::test]
async fn test_unknown_character_is_reported() {
    let server = MockServer::start().await;
    let storage = memory_storage();
    let crawler = crawler(test_config(&server.uri()), &storage);

    let report = OperationReport::from(crawler.crawl_character_threads("404").await);
    assert!(!report.is_success());
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["error"], "character 404 is not tracked");
}

#[tokio::test]
async fn test_cooldown_aborts_thread_crawl() {
    let server = MockServer::start().await;
    let storage = memory_storage();
    seed_character(&storage, "1", "Tony Stark");

    Mock::given(method("GET"))
        .and(path("/index.php"))
        .and(query_param("CODE", "getalluser"))
        .respond_with(ResponseTemplate::new(200).set_body_string(cooldown_page()))
        .mount(&server)
        .await;

    let crawler = crawler(test_config(&server.uri()), &storage);
    let err = crawler.crawl_character_threads("1").await.unwrap_err();
    assert!(err.is_cooldown());
    assert!(err.is_retryable());

    let character = storage.lock().unwrap().get_character("1").unwrap().unwrap();
    assert!(character.threads_crawled_at.is_none());
}

#[tokio::test]
async fn test_single_thread_trusts_event_poster_over_stale_page() {
    let server = MockServer::start().await;
    let storage = memory_storage();
    seed_character(&storage, "1", "Tony Stark");
    seed_character(&storage, "2", "Steve Rogers");

    // The page still shows Tony as the last poster
    mount_page(
        &server,
        "showtopic",
        "100",
        thread_page(
            "Avengers Assemble",
            ("5", "IC Roleplay"),
            &[post("1", "Tony Stark", TONY_QUOTE)],
            "",
        ),
    )
    .await;

    let crawler = crawler(test_config(&server.uri()), &storage);
    let event = ThreadEvent {
        thread_id: "100".to_string(),
        user_id: Some("2".to_string()),
        forum_id: None,
    };
    let summary = crawler.crawl_single_thread(&event).await.unwrap();

    assert_eq!(summary.title, "Avengers Assemble");
    assert_eq!(summary.category, ThreadCategory::Ongoing);
    assert_eq!(summary.last_poster_id.as_deref(), Some("2"));
    assert_eq!(summary.last_poster_name.as_deref(), Some("Steve Rogers"));
    assert!(summary.linked_characters.contains(&"1".to_string()));
    assert!(summary.linked_characters.contains(&"2".to_string()));
    assert_eq!(summary.quotes_added, 1);

    let guard = storage.lock().unwrap();
    let steve = guard.threads_for("2").unwrap();
    assert_eq!(steve.len(), 1);
    assert!(steve[0].is_user_last_poster);
    // The event's post is not on the stale page yet
    assert_eq!(steve[0].post_count, 1);
    assert_eq!(steve[0].forum_name.as_deref(), Some("IC Roleplay"));

    let tony = guard.threads_for("1").unwrap();
    assert!(!tony[0].is_user_last_poster);
    assert_eq!(tony[0].post_count, 1);
    assert_eq!(tony[0].last_poster_name.as_deref(), Some("Steve Rogers"));
}

/// Mounts a three-page thread 100; offset-specific pages first so they win
/// over the first-page mock
async fn mount_three_page_thread(server: &MockServer, middle_body: &str) {
    let pages = pagination("100", &[25, 50]);
    let page = |posts: &[String]| {
        thread_page("Avengers Assemble", ("5", "IC Roleplay"), posts, &pages)
    };

    for (offset, body) in [
        ("25", page(&[post("1", "Tony Stark", middle_body)])),
        ("50", page(&[post("2", "Steve Rogers", "Language!")])),
    ] {
        Mock::given(method("GET"))
            .and(path("/index.php"))
            .and(query_param("showtopic", "100"))
            .and(query_param("st", offset))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .expect(1)
            .mount(server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path("/index.php"))
        .and(query_param("showtopic", "100"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(page(&[post("1", "Tony Stark", TONY_QUOTE)])),
        )
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_quote_pass_runs_once_per_thread_and_character() {
    let server = MockServer::start().await;
    let storage = memory_storage();
    seed_character(&storage, "1", "Tony Stark");

    mount_three_page_thread(
        &server,
        r#"<b>"Genius, billionaire, playboy, philanthropist."</b>"#,
    )
    .await;

    let crawler = crawler(test_config(&server.uri()), &storage);
    let event = ThreadEvent {
        thread_id: "100".to_string(),
        ..ThreadEvent::default()
    };

    let first_run = crawler.crawl_single_thread(&event).await.unwrap();
    assert_eq!(first_run.quotes_added, 2);
    assert_eq!(first_run.posts_recorded, 3);
    assert_eq!(first_run.last_poster_name.as_deref(), Some("Steve Rogers"));
    assert_eq!(first_run.linked_characters, vec!["1".to_string()]);

    // New dialogue appears on a page already scraped for Tony
    server.verify().await;
    server.reset().await;
    mount_three_page_thread(&server, r#"<b>"We have a Hulk on our side."</b>"#).await;

    let second_run = crawler.crawl_single_thread(&event).await.unwrap();
    assert_eq!(second_run.quotes_added, 0);
    assert_eq!(second_run.posts_recorded, 3);

    let guard = storage.lock().unwrap();
    assert_eq!(guard.quotes_for("1").unwrap().len(), 2);
    assert!(guard.is_thread_quote_scraped("100", "1").unwrap());
    assert_eq!(guard.threads_for("1").unwrap()[0].post_count, 2);
    assert_eq!(guard.thread_posts("100").unwrap().len(), 3);
}

#[tokio::test]
async fn test_guest_post_with_tracked_name_links_nobody() {
    let server = MockServer::start().await;
    let storage = memory_storage();
    seed_character(&storage, "1", "Tony Stark");
    seed_character(&storage, "2", "Steve Rogers");

    mount_page(
        &server,
        "showtopic",
        "300",
        thread_page(
            "Open House",
            ("5", "IC Roleplay"),
            &[
                post("2", "Steve Rogers", "Welcome, everyone."),
                guest_post("Tony Stark", TONY_QUOTE),
            ],
            "",
        ),
    )
    .await;

    let crawler = crawler(test_config(&server.uri()), &storage);
    let event = ThreadEvent {
        thread_id: "300".to_string(),
        ..ThreadEvent::default()
    };
    let summary = crawler.crawl_single_thread(&event).await.unwrap();

    assert_eq!(summary.linked_characters, vec!["2".to_string()]);
    assert_eq!(summary.quotes_added, 0);
    assert_eq!(summary.posts_recorded, 1);

    let guard = storage.lock().unwrap();
    assert!(guard.threads_for("1").unwrap().is_empty());
    assert!(guard.quotes_for("1").unwrap().is_empty());

    let steve = guard.threads_for("2").unwrap();
    assert_eq!(steve.len(), 1);
    assert_eq!(steve[0].post_count, 1);
    assert!(!steve[0].is_user_last_poster);
    assert_eq!(steve[0].last_poster_name.as_deref(), Some("Tony Stark"));
}

#[tokio::test]
async fn test_reset_quote_log_allows_rescrape() {
    let server = MockServer::start().await;
    let storage = memory_storage();
    seed_character(&storage, "1", "Tony Stark");
    storage
        .lock()
        .unwrap()
        .mark_thread_quote_scraped("100", "1")
        .unwrap();

    let crawler = crawler(test_config(&server.uri()), &storage);
    assert_eq!(crawler.reset_quote_log().unwrap(), 1);
    assert!(!storage
        .lock()
        .unwrap()
        .is_thread_quote_scraped("100", "1")
        .unwrap());
}

#[tokio::test]
async fn test_discovery_stops_after_consecutive_misses() {
    let server = MockServer::start().await;
    let storage = memory_storage();
    seed_character(&storage, "2", "Steve Rogers");

    mount_page(&server, "showuser", "1", profile_page("Tony Stark")).await;
    mount_page(&server, "CODE", "getalluser", search_page(&[])).await;
    // Id 3 is a deleted account; 4 and 5 fall through to wiremock's 404
    mount_page(&server, "showuser", "3", "<html><body>Bare page</body></html>".to_string()).await;
    Mock::given(method("GET"))
        .and(path("/index.php"))
        .and(query_param("showuser", "6"))
        .respond_with(ResponseTemplate::new(200).set_body_string(profile_page("Never Reached")))
        .expect(0)
        .mount(&server)
        .await;

    let crawler = crawler(test_config(&server.uri()), &storage);
    let summary = crawler.discover_characters().await.unwrap();

    assert_eq!(summary.registered, vec!["1".to_string()]);
    assert_eq!(summary.already_tracked, 1);
    assert_eq!(summary.probed, 5);
    assert_eq!(summary.last_user_id, 5);
    assert_eq!(summary.consecutive_misses, 3);

    let guard = storage.lock().unwrap();
    let tony = guard.get_character("1").unwrap().unwrap();
    assert_eq!(tony.name, "Tony Stark");
    assert!(tony.profile_crawled_at.is_some());
    assert_eq!(
        guard.profile_fields("1").unwrap().get("age").map(String::as_str),
        Some("35")
    );
}

#[tokio::test]
async fn test_discovery_known_id_resets_miss_count() {
    let server = MockServer::start().await;
    let storage = memory_storage();
    seed_character(&storage, "3", "Steve Rogers");

    // 1, 2, 4, 5 and everything past 6 fall through to wiremock's 404
    mount_page(&server, "showuser", "6", profile_page("Natasha Romanoff")).await;
    mount_page(&server, "CODE", "getalluser", search_page(&[])).await;

    let crawler = crawler(test_config(&server.uri()), &storage);
    let summary = crawler.discover_characters().await.unwrap();

    assert_eq!(summary.registered, vec!["6".to_string()]);
    assert_eq!(summary.already_tracked, 1);
    assert_eq!(summary.probed, 9);
    assert_eq!(summary.last_user_id, 9);
    assert_eq!(summary.consecutive_misses, 3);

    let natasha = storage.lock().unwrap().get_character("6").unwrap().unwrap();
    assert_eq!(natasha.name, "Natasha Romanoff");
    assert!(natasha.threads_crawled_at.is_some());
}

#[tokio::test]
async fn test_discovery_excluded_profile_resets_miss_count() {
    let server = MockServer::start().await;
    let storage = memory_storage();

    mount_page(&server, "showuser", "3", profile_page("Board Admin")).await;
    mount_page(&server, "showuser", "6", profile_page("Natasha Romanoff")).await;
    mount_page(&server, "CODE", "getalluser", search_page(&[])).await;

    let mut config = test_config(&server.uri());
    config.forum.excluded_names = vec!["board admin".to_string()];
    let crawler = crawler(config, &storage);
    let summary = crawler.discover_characters().await.unwrap();

    assert_eq!(summary.registered, vec!["6".to_string()]);
    assert_eq!(summary.excluded, 1);
    assert!(storage.lock().unwrap().get_character("3").unwrap().is_none());
}

#[tokio::test]
async fn test_registration_refuses_excluded_names() {
    let server = MockServer::start().await;
    let storage = memory_storage();
    mount_page(&server, "showuser", "9", profile_page("Board Admin")).await;

    let mut config = test_config(&server.uri());
    config.forum.excluded_names = vec!["board admin".to_string()];
    let crawler = crawler(config, &storage);

    let report = OperationReport::from(crawler.register_character("9").await);
    assert!(!report.is_success());
    assert!(storage.lock().unwrap().get_character("9").unwrap().is_none());
}

#[tokio::test]
async fn test_reconcile_from_export() {
    let server = MockServer::start().await;
    let storage = memory_storage();
    seed_character(&storage, "42", "Tony Stark");
    // Renamed on the board since registration
    seed_character(&storage, "99", "Wanda");

    Mock::given(method("GET"))
        .and(path("/admin.php"))
        .and(query_param("login", "yes"))
        .respond_with(
            ResponseTemplate::new(302).insert_header("Location", "admin.php?adsess=abc123"),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/admin.php"))
        .and(query_param("act", "mysql"))
        .respond_with(ResponseTemplate::new(200).set_body_string("Dump page written"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/sqls/abc123-board_.sql"))
        .respond_with(ResponseTemplate::new(200).set_body_string(EXPORT_SQL))
        .mount(&server)
        .await;
    mount_page(
        &server,
        "showtopic",
        "100",
        thread_page(
            "Avengers Assemble",
            ("5", "IC Roleplay"),
            &[post("42", "Tony Stark", TONY_QUOTE)],
            "",
        ),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/index.php"))
        .and(query_param("showtopic", "200"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let mut config = test_config(&server.uri());
    config.export.admin_username = Some("admin".to_string());
    config.export.admin_password = Some("secret".to_string());
    let crawler = crawler(config, &storage);

    let summary = crawler.reconcile_all().await.unwrap();
    assert_eq!(summary.source, ReconcileSource::Export);
    assert_eq!(summary.total_threads, 1);
    assert_eq!(summary.threads.ongoing, 1);
    assert_eq!(summary.posts_recorded, 2);
    assert_eq!(summary.characters_crawled, 1);
    assert_eq!(summary.names_refreshed, 1);
    assert_eq!(summary.quotes_added, 1);

    let guard = storage.lock().unwrap();
    let threads = guard.threads_for("42").unwrap();
    assert_eq!(threads.len(), 1);
    assert_eq!(threads[0].title, "Avengers Assemble");
    assert_eq!(threads[0].forum_name.as_deref(), Some("IC Roleplay"));
    assert!(threads[0].is_user_last_poster);
    assert_eq!(threads[0].post_count, 2);
    assert!(guard.get_crawl_status(LAST_EXPORT_SYNC_KEY).unwrap().is_some());

    let dates: Vec<_> = guard
        .thread_posts("100")
        .unwrap()
        .into_iter()
        .map(|p| p.post_date)
        .collect();
    assert_eq!(
        dates,
        vec![Some("2023-11-14".to_string()), Some("2023-11-15".to_string())]
    );

    assert_eq!(guard.get_character("99").unwrap().unwrap().name, "Wanda Maximoff");
    assert_eq!(guard.get_character("42").unwrap().unwrap().name, "Tony Stark");
}

#[tokio::test]
async fn test_reconcile_falls_back_to_html_when_export_fails() {
    let server = MockServer::start().await;
    let storage = memory_storage();
    seed_character(&storage, "1", "Tony Stark");

    // Login page without a session token
    Mock::given(method("GET"))
        .and(path("/admin.php"))
        .respond_with(ResponseTemplate::new(200).set_body_string("Invalid login"))
        .mount(&server)
        .await;
    mount_page(
        &server,
        "CODE",
        "getactive",
        search_page(&[("100", "Avengers Assemble", "5", "IC Roleplay")]),
    )
    .await;
    mount_page(
        &server,
        "CODE",
        "getalluser",
        search_page(&[("100", "Avengers Assemble", "5", "IC Roleplay")]),
    )
    .await;
    mount_page(
        &server,
        "showtopic",
        "100",
        thread_page(
            "Avengers Assemble",
            ("5", "IC Roleplay"),
            &[post("1", "Tony Stark", TONY_QUOTE)],
            "",
        ),
    )
    .await;

    let mut config = test_config(&server.uri());
    config.export.admin_username = Some("admin".to_string());
    config.export.admin_password = Some("wrong".to_string());
    let crawler = crawler(config, &storage);

    let summary = crawler.reconcile_all().await.unwrap();
    assert_eq!(summary.source, ReconcileSource::Html);
    assert_eq!(summary.recent_threads, 1);
    assert_eq!(summary.characters_crawled, 1);
    assert_eq!(summary.total_threads, 1);
    assert_eq!(summary.failures, 0);
    // Quotes were taken by the recent-activity pass; the character crawl adds none
    assert_eq!(summary.quotes_added, 1);

    // Both passes record the thread's posts; the second replaces the first
    assert_eq!(summary.posts_recorded, 2);
    assert_eq!(storage.lock().unwrap().thread_posts("100").unwrap().len(), 1);
    assert_eq!(storage.lock().unwrap().threads_for("1").unwrap()[0].post_count, 1);

    let log = crawler.activity().snapshot().log;
    assert!(log.iter().any(|entry| entry.message.contains("crawling HTML instead")));
}

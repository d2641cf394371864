//! Configuration loading and file-backed storage

use crate::common::seed_character;
use forum_ripple::config::{load_config, load_config_with_hash};
use forum_ripple::crawler::SharedStorage;
use forum_ripple::storage::{open_storage, Storage};
use std::io::Write;
use std::sync::{Arc, Mutex};

const MINIMAL_CONFIG: &str = r#"
[forum]
base-url = "https://board.example.net"
excluded-names = ["Board Admin"]

[storage]
database-path = "./forum.db"
"#;

#[test]
fn test_load_config_from_file_applies_defaults() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(MINIMAL_CONFIG.as_bytes()).unwrap();

    let (config, hash) = load_config_with_hash(file.path()).unwrap();
    assert_eq!(hash.len(), 64);
    assert_eq!(config.forum.complete_forum_id, "49");
    assert_eq!(config.fetcher.request_delay_ms, 2000);
    assert_eq!(config.crawl.max_consecutive_misses, 20);
    assert_eq!(config.export.table_parts, vec!["23", "32", "36", "21"]);
    assert!(config.forum.is_excluded_name("board admin"));
}

#[test]
fn test_invalid_config_file_is_rejected() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(
        br#"
[forum]
base-url = "ftp://board.example.net"

[storage]
database-path = "./forum.db"
"#,
    )
    .unwrap();

    assert!(load_config(file.path()).is_err());
}

#[test]
fn test_file_storage_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("forum.db");

    {
        let storage: SharedStorage = Arc::new(Mutex::new(open_storage(&db_path).unwrap()));
        seed_character(&storage, "1", "Tony Stark");
        storage
            .lock()
            .unwrap()
            .set_crawl_status("acp_username", "admin")
            .unwrap();
    }

    let reopened = open_storage(&db_path).unwrap();
    assert_eq!(reopened.list_characters().unwrap().len(), 1);
    assert_eq!(
        reopened.get_crawl_status("acp_username").unwrap().as_deref(),
        Some("admin")
    );
}

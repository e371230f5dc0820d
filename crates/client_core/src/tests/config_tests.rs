use super::*;

#[test]
fn normalizes_plain_file_path_to_sqlite_url() {
    assert_eq!(
        prepare_database_url("./data/test.db"),
        "sqlite://./data/test.db"
    );
}

#[test]
fn keeps_existing_sqlite_urls() {
    assert_eq!(prepare_database_url("sqlite::memory:"), "sqlite::memory:");
    assert_eq!(
        prepare_database_url("sqlite://./cache.db"),
        "sqlite://./cache.db"
    );
    assert_eq!(prepare_database_url("sqlite:cache.db"), "sqlite://cache.db");
}

#[test]
fn empty_database_url_falls_back_to_default() {
    assert_eq!(
        prepare_database_url("   "),
        Settings::default().database_url
    );
}

#[test]
fn file_overrides_replace_defaults() {
    let mut settings = Settings::default();
    apply_file_overrides(
        &mut settings,
        r#"
        server_url = "https://relay.example"
        default_account_id = "secondary"
        liveness_interval_secs = 5
        "#,
    );
    assert_eq!(settings.server_url, "https://relay.example");
    assert_eq!(settings.default_account().as_str(), "secondary");
    assert_eq!(settings.liveness_interval(), Duration::from_secs(5));
    assert_eq!(settings.reconnect_delay_ms, 2_000);
}

#[test]
fn unparsable_file_keeps_defaults() {
    let mut settings = Settings::default();
    apply_file_overrides(&mut settings, "server_url = ");
    assert_eq!(settings.server_url, Settings::default().server_url);
}

#[test]
fn push_url_swaps_scheme_and_appends_ws_path() {
    assert_eq!(
        push_url("https://relay.example/").expect("url"),
        "wss://relay.example/ws"
    );
    assert_eq!(
        push_url("http://127.0.0.1:8000").expect("url"),
        "ws://127.0.0.1:8000/ws"
    );
    assert!(matches!(
        push_url("relay.example"),
        Err(crate::error::ClientError::Validation(_))
    ));
}

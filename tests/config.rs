use std::time::Duration;

use assert_matches::assert_matches;
use chrono::NaiveTime;

use epaper_archiver::config::{Config, ConfigLoader};
use epaper_archiver::error::ArchiverError;

fn no_env(_key: &str) -> Option<String> {
    None
}

#[test]
fn json_overrides_portal_and_timing() {
    let config: Config = serde_json::from_str(
        r##"{
            "publication": "Allgemeine Zeitung",
            "download_dir": "/srv/epaper",
            "min_valid_bytes": 2048,
            "portal": {
                "dashboard_url": "https://epaper.example.org/dashboard.act?region=M01",
                "widget_id": "77",
                "selectors": { "download": "#pdf-button" }
            },
            "timing": { "download_timeout": 60, "retry_backoff": 1 },
            "schedule": { "fetch_at": "05:30" }
        }"##,
    )
    .unwrap();

    let resolved = ConfigLoader::resolve_config(config, &no_env).unwrap();

    assert_eq!(resolved.publication.as_str(), "Allgemeine_Zeitung");
    assert_eq!(resolved.download_dir.to_str(), Some("/srv/epaper"));
    assert_eq!(resolved.min_valid_bytes, 2048);
    assert_eq!(resolved.portal.domain, "epaper.example.org");
    assert_eq!(resolved.portal.region.as_deref(), Some("M01"));
    assert_eq!(resolved.portal.selectors.download, "#pdf-button");
    assert_eq!(resolved.portal.selectors.logout, "a[title='Abmelden']");
    assert_eq!(
        resolved.portal.archive_url("2025-01-02"),
        "https://epaper.example.org/widgetshelf.act?dateTo=2025-01-02&widgetId=77&region=M01"
    );
    assert_eq!(resolved.timing.reconcile.timeout, Duration::from_secs(60));
    assert_eq!(resolved.timing.reconcile.stuck_budget, Duration::from_secs(20));
    assert_eq!(resolved.timing.retry_backoff, Duration::from_secs(1));
    assert_eq!(resolved.schedule.fetch_at, NaiveTime::from_hms_opt(5, 30, 0).unwrap());
    assert_eq!(resolved.schedule.reindex_at, NaiveTime::from_hms_opt(6, 15, 0).unwrap());
}

#[test]
fn environment_wins_over_file() {
    let config: Config =
        serde_json::from_str(r#"{ "download_dir": "/from/file" }"#).unwrap();
    let env = |key: &str| match key {
        "EPAPER_DOWNLOAD_DIR" => Some("/from/env".to_string()),
        "PAPER_URL" => Some("https://other.example.net/dashboard.act".to_string()),
        "PAPER_USER" => Some("reader".to_string()),
        "PAPER_PASS" => Some("pw".to_string()),
        "PROXY_SERVER" => Some("http://proxy:3128".to_string()),
        _ => None,
    };

    let resolved = ConfigLoader::resolve_config(config, &env).unwrap();

    assert_eq!(resolved.download_dir.to_str(), Some("/from/env"));
    assert_eq!(resolved.portal.base_url, "https://other.example.net");
    assert_eq!(resolved.portal.region, None);
    assert_eq!(resolved.proxy.as_deref(), Some("http://proxy:3128"));
    assert_eq!(resolved.require_credentials().unwrap().user, "reader");
}

#[test]
fn half_configured_web_user_is_ignored() {
    let env = |key: &str| match key {
        "WEB_USER_ADMIN" => Some("admin".to_string()),
        "WEB_USER_GUEST" => Some("guest".to_string()),
        "WEB_PASS_GUEST" => Some("guest".to_string()),
        "EPAPER_DOWNLOAD_DIR" => Some("/tmp/epaper".to_string()),
        _ => None,
    };

    let resolved = ConfigLoader::resolve_config(Config::default(), &env).unwrap();

    assert!(resolved.web_users.admin.is_none());
    assert_eq!(resolved.web_users.guest.as_ref().unwrap().user, "guest");
    assert_matches!(
        resolved.require_credentials(),
        Err(ArchiverError::MissingCredentials)
    );
}

#[test]
fn invalid_schedule_time_is_rejected() {
    let config: Config =
        serde_json::from_str(r#"{ "schedule": { "reindex_at": "quarter past six" } }"#).unwrap();
    let env = |key: &str| (key == "EPAPER_DOWNLOAD_DIR").then(|| "/tmp/epaper".to_string());

    assert_matches!(
        ConfigLoader::resolve_config(config, &env),
        Err(ArchiverError::ConfigParse(_))
    );
}

#[test]
fn missing_explicit_config_file_is_an_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("absent.json");
    assert_matches!(
        ConfigLoader::resolve(Some(path.to_str().unwrap())),
        Err(ArchiverError::ConfigRead(_))
    );
}

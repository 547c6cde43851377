mod common;

use std::fs;

use epaper_archiver::clock::ManualClock;
use epaper_archiver::domain::EditionDate;
use epaper_archiver::fetch::FetchStatus;
use epaper_archiver::output::JsonOutput;

use common::{Delivery, EDITION_BYTES, FakePortal, config_for, fetcher, write_edition};

fn date() -> EditionDate {
    "2025-03-04".parse().unwrap()
}

#[test]
fn valid_edition_on_disk_skips_the_browser() {
    let temp = tempfile::tempdir().unwrap();
    let clock = ManualClock::new();
    let portal = FakePortal::new(temp.path(), clock.clone());
    write_edition(temp.path(), "2025-03-04", EDITION_BYTES);

    let result = fetcher(&portal, &clock, &config_for(temp.path())).run_daily(date(), &JsonOutput);

    assert_eq!(result.status, FetchStatus::AlreadyPresent);
    assert!(result.is_resolved());
    assert!(!result.is_fresh());
    assert_eq!(portal.state().launches, 0);
}

#[test]
fn fresh_download_lands_on_canonical_path() {
    let temp = tempfile::tempdir().unwrap();
    let clock = ManualClock::new();
    let portal = FakePortal::new(temp.path(), clock.clone());
    portal.script_daily(&[Delivery::Complete { bytes: EDITION_BYTES }]);

    let result = fetcher(&portal, &clock, &config_for(temp.path())).run_daily(date(), &JsonOutput);

    assert_eq!(result.status, FetchStatus::Fetched { attempts: 1 });
    let path = result.path.unwrap();
    assert_eq!(path, temp.path().join("2025-03-04_Wormser_Zeitung.pdf"));
    assert_eq!(fs::metadata(&path).unwrap().len(), EDITION_BYTES as u64);
    assert!(!temp.path().join("E-Paper_1.pdf").exists());

    let state = portal.state();
    assert_eq!(state.logouts, 1);
    assert_eq!(state.quits, 1);
}

#[test]
fn undersized_file_is_replaced() {
    let temp = tempfile::tempdir().unwrap();
    let clock = ManualClock::new();
    let portal = FakePortal::new(temp.path(), clock.clone());
    write_edition(temp.path(), "2025-03-04", 512);
    portal.script_daily(&[Delivery::Complete { bytes: EDITION_BYTES }]);

    let result = fetcher(&portal, &clock, &config_for(temp.path())).run_daily(date(), &JsonOutput);

    assert!(result.is_fresh());
    let path = result.path.unwrap();
    assert_eq!(fs::metadata(path).unwrap().len(), EDITION_BYTES as u64);
}

#[test]
fn stalled_download_is_retried_after_refresh() {
    let temp = tempfile::tempdir().unwrap();
    let clock = ManualClock::new();
    let portal = FakePortal::new(temp.path(), clock.clone());
    portal.script_daily(&[Delivery::StuckAtZero, Delivery::Complete { bytes: EDITION_BYTES }]);

    let result = fetcher(&portal, &clock, &config_for(temp.path())).run_daily(date(), &JsonOutput);

    assert_eq!(result.status, FetchStatus::Fetched { attempts: 2 });
    assert!(!temp.path().join("E-Paper_1.pdf").exists());
    assert_eq!(portal.state().refreshes, 1);
}

#[test]
fn gives_up_after_three_attempts() {
    let temp = tempfile::tempdir().unwrap();
    let clock = ManualClock::new();
    let portal = FakePortal::new(temp.path(), clock.clone());
    portal.script_daily(&[Delivery::Nothing, Delivery::Nothing, Delivery::Nothing]);

    let result = fetcher(&portal, &clock, &config_for(temp.path())).run_daily(date(), &JsonOutput);

    assert!(matches!(result.status, FetchStatus::Failed { .. }));
    assert!(result.path.is_none());
    let state = portal.state();
    let downloads = state
        .clicks
        .iter()
        .filter(|locator| locator.as_str() == ".pdf-download")
        .count();
    assert_eq!(downloads, 3);
    assert_eq!(state.quits, 1);
}

#[test]
fn rejected_login_aborts_without_clicking() {
    let temp = tempfile::tempdir().unwrap();
    let clock = ManualClock::new();
    let portal = FakePortal::new(temp.path(), clock.clone());
    portal.state().accepted_password = "rotated".to_string();
    portal.script_daily(&[Delivery::Complete { bytes: EDITION_BYTES }]);

    let result = fetcher(&portal, &clock, &config_for(temp.path())).run_daily(date(), &JsonOutput);

    match result.status {
        FetchStatus::Failed { reason } => assert!(reason.contains("authentication")),
        other => panic!("unexpected status: {other:?}"),
    }
    let state = portal.state();
    assert_eq!(state.deliveries, 0);
    assert_eq!(state.quits, 1);
}

#[test]
fn launch_failure_is_reported() {
    let temp = tempfile::tempdir().unwrap();
    let clock = ManualClock::new();
    let portal = FakePortal::new(temp.path(), clock.clone());
    portal.state().fail_launch = true;

    let result = fetcher(&portal, &clock, &config_for(temp.path())).run_daily(date(), &JsonOutput);

    assert!(matches!(result.status, FetchStatus::Failed { .. }));
}

#[test]
fn missing_download_control_exhausts_attempts() {
    let temp = tempfile::tempdir().unwrap();
    let clock = ManualClock::new();
    let portal = FakePortal::new(temp.path(), clock.clone());
    portal.state().daily_control = false;

    let result = fetcher(&portal, &clock, &config_for(temp.path())).run_daily(date(), &JsonOutput);

    match result.status {
        FetchStatus::Failed { reason } => assert!(reason.contains(".pdf-download")),
        other => panic!("unexpected status: {other:?}"),
    }
    assert_eq!(portal.state().refreshes, 2);
}

#[test]
fn popups_opened_by_the_download_are_closed() {
    let temp = tempfile::tempdir().unwrap();
    let clock = ManualClock::new();
    let portal = FakePortal::new(temp.path(), clock.clone());
    portal.state().open_popup_on_click = true;
    portal.script_daily(&[Delivery::Complete { bytes: EDITION_BYTES }]);

    let result = fetcher(&portal, &clock, &config_for(temp.path())).run_daily(date(), &JsonOutput);

    assert!(result.is_fresh());
    assert!(portal.state().popups.is_empty());
}

#[test]
fn leftover_partials_are_swept_before_clicking() {
    let temp = tempfile::tempdir().unwrap();
    let clock = ManualClock::new();
    let portal = FakePortal::new(temp.path(), clock.clone());
    fs::write(temp.path().join("old.pdf.crdownload"), b"x").unwrap();
    fs::write(temp.path().join("E-Paper (1).pdf"), vec![1u8; 2048]).unwrap();
    portal.script_daily(&[Delivery::Complete { bytes: EDITION_BYTES }]);

    let result = fetcher(&portal, &clock, &config_for(temp.path())).run_daily(date(), &JsonOutput);

    assert!(result.is_fresh());
    assert!(!temp.path().join("old.pdf.crdownload").exists());
    assert!(!temp.path().join("E-Paper (1).pdf").exists());
}

#[test]
fn undersized_download_is_discarded_and_retried() {
    let temp = tempfile::tempdir().unwrap();
    let clock = ManualClock::new();
    let portal = FakePortal::new(temp.path(), clock.clone());
    portal.script_daily(&[Delivery::Complete { bytes: 200 }, Delivery::Complete { bytes: EDITION_BYTES }]);

    let result = fetcher(&portal, &clock, &config_for(temp.path())).run_daily(date(), &JsonOutput);

    assert_eq!(result.status, FetchStatus::Fetched { attempts: 2 });
    let path = result.path.unwrap();
    assert_eq!(fs::metadata(path).unwrap().len(), EDITION_BYTES as u64);
}

#[test]
fn only_undersized_downloads_is_a_failure() {
    let temp = tempfile::tempdir().unwrap();
    let clock = ManualClock::new();
    let portal = FakePortal::new(temp.path(), clock.clone());
    portal.script_daily(&[
        Delivery::Complete { bytes: 200 },
        Delivery::Complete { bytes: 200 },
        Delivery::Complete { bytes: 200 },
    ]);

    let result = fetcher(&portal, &clock, &config_for(temp.path())).run_daily(date(), &JsonOutput);

    match &result.status {
        FetchStatus::Failed { reason } => assert!(reason.contains("minimum")),
        other => panic!("unexpected status: {other:?}"),
    }
    assert!(!result.is_fresh());
    assert!(!temp.path().join("2025-03-04_Wormser_Zeitung.pdf").exists());
}

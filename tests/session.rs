mod common;

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;

use epaper_archiver::browser::LaunchOptions;
use epaper_archiver::clock::ManualClock;
use epaper_archiver::config::Credentials;
use epaper_archiver::error::ArchiverError;
use epaper_archiver::session::Session;

use common::{FakeBrowser, FakePortal, PASSWORD, USER, config_for};

fn open(portal: &FakePortal, clock: &ManualClock, dir: &std::path::Path) -> Session<FakeBrowser> {
    let config = config_for(dir);
    Session::open(
        portal,
        &LaunchOptions::new(dir.to_path_buf()),
        config.portal.clone(),
        Duration::from_secs(30),
        Arc::new(clock.clone()),
    )
    .unwrap()
}

fn credentials(password: &str) -> Credentials {
    Credentials {
        user: USER.to_string(),
        password: password.to_string(),
    }
}

#[test]
fn login_walks_through_identity_provider() {
    let temp = tempfile::tempdir().unwrap();
    let clock = ManualClock::new();
    let portal = FakePortal::new(temp.path(), clock.clone());
    portal.state().cookie_banner = true;

    let mut session = open(&portal, &clock, temp.path());
    session.login(&credentials(PASSWORD)).unwrap();

    let state = portal.state();
    assert!(state.logged_in);
    assert!(!state.cookie_banner);
    assert_eq!(state.typed_user.as_deref(), Some(USER));
    assert_eq!(state.typed_password.as_deref(), Some(PASSWORD));
    assert!(state.url.contains("vrm-epaper.de"));
}

#[test]
fn existing_login_is_reused() {
    let temp = tempfile::tempdir().unwrap();
    let clock = ManualClock::new();
    let portal = FakePortal::new(temp.path(), clock.clone());
    portal.state().logged_in = true;

    let mut session = open(&portal, &clock, temp.path());
    session.login(&credentials(PASSWORD)).unwrap();

    let state = portal.state();
    assert!(state.typed_user.is_none());
    assert!(state.clicks.is_empty());
}

#[test]
fn rejected_password_is_an_authentication_error() {
    let temp = tempfile::tempdir().unwrap();
    let clock = ManualClock::new();
    let portal = FakePortal::new(temp.path(), clock.clone());

    let mut session = open(&portal, &clock, temp.path());
    let err = session.login(&credentials("wrong")).unwrap_err();

    assert_matches!(err, ArchiverError::Authentication(_));
    assert!(!err.is_retryable());
    assert!(!portal.state().logged_in);
}

#[test]
fn logout_then_close_quits_once() {
    let temp = tempfile::tempdir().unwrap();
    let clock = ManualClock::new();
    let portal = FakePortal::new(temp.path(), clock.clone());

    let mut session = open(&portal, &clock, temp.path());
    session.login(&credentials(PASSWORD)).unwrap();
    session.logout();
    session.close();
    session.close();
    assert!(!session.is_alive());
    drop(session);

    let state = portal.state();
    assert_eq!(state.logouts, 1);
    assert_eq!(state.quits, 1);
    assert!(!state.logged_in);
}

#[test]
fn logout_failure_is_swallowed() {
    let temp = tempfile::tempdir().unwrap();
    let clock = ManualClock::new();
    let portal = FakePortal::new(temp.path(), clock.clone());

    // never logged in, so the logout control is absent
    let mut session = open(&portal, &clock, temp.path());
    session.logout();
    assert_eq!(portal.state().logouts, 0);
    assert!(session.is_alive());
}

#[test]
fn popups_are_closed_and_main_window_kept() {
    let temp = tempfile::tempdir().unwrap();
    let clock = ManualClock::new();
    let portal = FakePortal::new(temp.path(), clock.clone());
    portal.state().popups = vec!["reader".to_string(), "ad".to_string()];

    let mut session = open(&portal, &clock, temp.path());
    assert_eq!(session.close_popups(), 2);
    assert_eq!(session.close_popups(), 0);
    assert!(portal.state().popups.is_empty());
}

#[test]
fn dropping_session_quits_browser() {
    let temp = tempfile::tempdir().unwrap();
    let clock = ManualClock::new();
    let portal = FakePortal::new(temp.path(), clock.clone());

    {
        let _session = open(&portal, &clock, temp.path());
        assert_eq!(portal.state().launches, 1);
    }
    assert_eq!(portal.state().quits, 1);
}

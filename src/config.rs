use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use chrono::NaiveTime;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::domain::{DEFAULT_MIN_VALID_BYTES, Publication};
use crate::error::ArchiverError;
use crate::reconcile::ReconcileTiming;

pub const CONFIG_FILE: &str = "epaper.json";
pub const DEFAULT_DASHBOARD_URL: &str = "https://vrm-epaper.de/dashboard.act?region=E120";
pub const DEFAULT_PUBLICATION: &str = "Wormser_Zeitung";
pub const DEFAULT_WIDGET_ID: &str = "1020";
pub const DOCKER_DOWNLOAD_DIR: &str = "/app/downloads";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub publication: Option<String>,
    #[serde(default)]
    pub download_dir: Option<String>,
    #[serde(default)]
    pub min_valid_bytes: Option<u64>,
    #[serde(default)]
    pub compress_after_fetch: Option<bool>,
    #[serde(default)]
    pub portal: Option<PortalEntry>,
    #[serde(default)]
    pub timing: Option<TimingEntry>,
    #[serde(default)]
    pub schedule: Option<ScheduleEntry>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct PortalEntry {
    #[serde(default)]
    pub dashboard_url: Option<String>,
    #[serde(default)]
    pub widget_id: Option<String>,
    #[serde(default)]
    pub sso_marker: Option<String>,
    #[serde(default)]
    pub selectors: Option<SelectorsEntry>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct SelectorsEntry {
    pub login_link: Option<String>,
    pub cookie_accept: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub submit: Option<String>,
    pub download: Option<String>,
    pub logout: Option<String>,
}

/// All durations in seconds.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct TimingEntry {
    pub wait_timeout: Option<u64>,
    pub download_timeout: Option<u64>,
    pub stuck_budget: Option<u64>,
    pub poll_interval: Option<u64>,
    pub settle_interval: Option<u64>,
    pub retry_backoff: Option<u64>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ScheduleEntry {
    /// `HH:MM`, local time.
    pub fetch_at: Option<String>,
    pub reindex_at: Option<String>,
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Locators for the portal's controls: CSS by default, XPath with an `xpath:` prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selectors {
    pub login_link: String,
    pub cookie_accept: String,
    pub username: String,
    pub password: String,
    pub submit: String,
    pub download: String,
    pub logout: String,
}

impl Default for Selectors {
    fn default() -> Self {
        Self {
            login_link: "xpath://a[normalize-space(text())='Anmelden']".to_string(),
            cookie_accept: "xpath://a[contains(@class, 'cmpboxbtnyes') or contains(text(), 'Zustimmen') or contains(text(), 'Akzeptieren')]".to_string(),
            username: "#email".to_string(),
            password: "#password".to_string(),
            submit: "button[type='submit']".to_string(),
            download: ".pdf-download".to_string(),
            logout: "a[title='Abmelden']".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PortalSettings {
    pub dashboard_url: String,
    /// Origin of the dashboard, without a default port.
    pub base_url: String,
    /// Lowercased host name the login flow must return to.
    pub domain: String,
    pub region: Option<String>,
    pub widget_id: String,
    pub sso_marker: String,
    pub selectors: Selectors,
    base: Url,
}

impl PortalSettings {
    pub fn from_dashboard_url(dashboard_url: &str) -> Result<Self, ArchiverError> {
        let invalid = || ArchiverError::ConfigParse(format!("invalid portal url: {dashboard_url}"));
        let parsed = Url::parse(dashboard_url).map_err(|_| invalid())?;
        let domain = parsed
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(invalid)?
            .to_string();
        let region = parsed
            .query_pairs()
            .find(|(key, _)| key == "region")
            .map(|(_, value)| value.into_owned());
        let mut base = parsed.clone();
        base.set_path("/");
        base.set_query(None);
        base.set_fragment(None);
        Ok(Self {
            dashboard_url: dashboard_url.to_string(),
            base_url: parsed.origin().ascii_serialization(),
            domain,
            region,
            widget_id: DEFAULT_WIDGET_ID.to_string(),
            sso_marker: "sso".to_string(),
            selectors: Selectors::default(),
            base,
        })
    }

    /// Listing page that addresses one day's edition directly.
    pub fn archive_url(&self, iso_date: &str) -> String {
        let mut url = self.base.clone();
        url.set_path("/widgetshelf.act");
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("dateTo", iso_date)
                .append_pair("widgetId", &self.widget_id);
            if let Some(region) = &self.region {
                query.append_pair("region", region);
            }
        }
        url.into()
    }

    /// Container holding the download anchor for `iso_date` on the archive page.
    pub fn archive_link_selector(&self, iso_date: &str) -> String {
        format!(".pdf-date-{iso_date} a")
    }
}

#[derive(Debug, Clone)]
pub struct Timing {
    pub wait_timeout: Duration,
    pub retry_backoff: Duration,
    pub reconcile: ReconcileTiming,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            wait_timeout: Duration::from_secs(30),
            retry_backoff: Duration::from_secs(5),
            reconcile: ReconcileTiming::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    pub fetch_at: NaiveTime,
    pub reindex_at: NaiveTime,
}

impl Default for Schedule {
    fn default() -> Self {
        Self {
            fetch_at: NaiveTime::from_hms_opt(6, 0, 0).unwrap_or_default(),
            reindex_at: NaiveTime::from_hms_opt(6, 15, 0).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct WebUsers {
    pub admin: Option<Credentials>,
    pub guest: Option<Credentials>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub publication: Publication,
    pub download_dir: PathBuf,
    pub min_valid_bytes: u64,
    pub headless: bool,
    pub compress_after_fetch: bool,
    pub portal: PortalSettings,
    pub credentials: Option<Credentials>,
    pub proxy: Option<String>,
    pub webhook_url: Option<String>,
    pub web_users: WebUsers,
    pub timing: Timing,
    pub schedule: Schedule,
}

impl ResolvedConfig {
    pub fn require_credentials(&self) -> Result<&Credentials, ArchiverError> {
        self.credentials
            .as_ref()
            .ok_or(ArchiverError::MissingCredentials)
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Reads the optional JSON file and the process environment, once.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, ArchiverError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(CONFIG_FILE),
        };

        let config = if path.is_none() && !config_path.exists() {
            Config::default()
        } else {
            let content = fs::read_to_string(&config_path)
                .map_err(|_| ArchiverError::ConfigRead(config_path.clone()))?;
            serde_json::from_str(&content)
                .map_err(|err| ArchiverError::ConfigParse(err.to_string()))?
        };

        Self::resolve_config(config, &|key| std::env::var(key).ok())
    }

    pub fn resolve_config(
        config: Config,
        env: &dyn Fn(&str) -> Option<String>,
    ) -> Result<ResolvedConfig, ArchiverError> {
        let var = |key: &str| env(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let schema_version = config.schema_version.unwrap_or(1);
        let headless = var("RUNNING_IN_DOCKER")
            .map(|value| value.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let publication = config
            .publication
            .as_deref()
            .unwrap_or(DEFAULT_PUBLICATION)
            .parse()?;

        let download_dir = match var("EPAPER_DOWNLOAD_DIR").or(config.download_dir) {
            Some(dir) => PathBuf::from(dir),
            None if headless => PathBuf::from(DOCKER_DOWNLOAD_DIR),
            None => default_download_dir()?,
        };

        let portal_entry = config.portal.unwrap_or_default();
        let dashboard_url = var("PAPER_URL")
            .or(portal_entry.dashboard_url)
            .unwrap_or_else(|| DEFAULT_DASHBOARD_URL.to_string());
        let mut portal = PortalSettings::from_dashboard_url(&dashboard_url)?;
        if let Some(widget_id) = portal_entry.widget_id {
            portal.widget_id = widget_id;
        }
        if let Some(marker) = portal_entry.sso_marker {
            portal.sso_marker = marker;
        }
        if let Some(selectors) = portal_entry.selectors {
            apply_selectors(&mut portal.selectors, selectors);
        }

        let credentials = match (var("PAPER_USER"), var("PAPER_PASS")) {
            (Some(user), Some(password)) => Some(Credentials { user, password }),
            _ => None,
        };

        let web_users = WebUsers {
            admin: pair(var("WEB_USER_ADMIN"), var("WEB_PASS_ADMIN")),
            guest: pair(var("WEB_USER_GUEST"), var("WEB_PASS_GUEST")),
        };

        let timing = resolve_timing(config.timing.unwrap_or_default());
        let schedule = resolve_schedule(config.schedule.unwrap_or_default())?;

        Ok(ResolvedConfig {
            schema_version,
            publication,
            download_dir,
            min_valid_bytes: config.min_valid_bytes.unwrap_or(DEFAULT_MIN_VALID_BYTES),
            headless,
            compress_after_fetch: config.compress_after_fetch.unwrap_or(true),
            portal,
            credentials,
            proxy: var("PROXY_SERVER"),
            webhook_url: var("DISCORD_WEBHOOK_URL"),
            web_users,
            timing,
            schedule,
        })
    }
}

fn pair(user: Option<String>, password: Option<String>) -> Option<Credentials> {
    Some(Credentials {
        user: user?,
        password: password?,
    })
}

fn default_download_dir() -> Result<PathBuf, ArchiverError> {
    let cwd = std::env::current_dir().map_err(|err| ArchiverError::Filesystem(err.to_string()))?;
    let local = cwd.join("downloads");
    if local.exists() {
        return Ok(local);
    }
    BaseDirs::new()
        .map(|dirs| dirs.data_local_dir().join("epaper-archiver").join("downloads"))
        .ok_or_else(|| ArchiverError::Filesystem("unable to resolve data directory".to_string()))
}

fn apply_selectors(target: &mut Selectors, entry: SelectorsEntry) {
    let SelectorsEntry {
        login_link,
        cookie_accept,
        username,
        password,
        submit,
        download,
        logout,
    } = entry;
    for (slot, value) in [
        (&mut target.login_link, login_link),
        (&mut target.cookie_accept, cookie_accept),
        (&mut target.username, username),
        (&mut target.password, password),
        (&mut target.submit, submit),
        (&mut target.download, download),
        (&mut target.logout, logout),
    ] {
        if let Some(value) = value {
            *slot = value;
        }
    }
}

fn resolve_timing(entry: TimingEntry) -> Timing {
    let defaults = Timing::default();
    let secs = |value: Option<u64>, fallback: Duration| {
        value.map(Duration::from_secs).unwrap_or(fallback)
    };
    Timing {
        wait_timeout: secs(entry.wait_timeout, defaults.wait_timeout),
        retry_backoff: secs(entry.retry_backoff, defaults.retry_backoff),
        reconcile: ReconcileTiming {
            timeout: secs(entry.download_timeout, defaults.reconcile.timeout),
            stuck_budget: secs(entry.stuck_budget, defaults.reconcile.stuck_budget),
            poll_interval: secs(entry.poll_interval, defaults.reconcile.poll_interval),
            settle_interval: secs(entry.settle_interval, defaults.reconcile.settle_interval),
        },
    }
}

fn resolve_schedule(entry: ScheduleEntry) -> Result<Schedule, ArchiverError> {
    let defaults = Schedule::default();
    let parse = |value: Option<String>, fallback: NaiveTime| match value {
        Some(raw) => NaiveTime::parse_from_str(raw.trim(), "%H:%M")
            .map_err(|_| ArchiverError::ConfigParse(format!("invalid schedule time: {raw}"))),
        None => Ok(fallback),
    };
    Ok(Schedule {
        fetch_at: parse(entry.fetch_at, defaults.fetch_at)?,
        reindex_at: parse(entry.reindex_at, defaults.reindex_at)?,
    })
}

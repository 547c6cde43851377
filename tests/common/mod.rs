#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use epaper_archiver::app::{App, Services};
use epaper_archiver::browser::{Browser, BrowserLauncher, LaunchOptions, WaitFor, WindowId};
use epaper_archiver::clock::{Clock, ManualClock};
use epaper_archiver::config::{Config, ConfigLoader, ResolvedConfig, Selectors};
use epaper_archiver::error::ArchiverError;
use epaper_archiver::fetch::{FetchSettings, Fetcher};
use epaper_archiver::indexer::{Indexer, TextExtractor};
use epaper_archiver::store::Store;

pub const USER: &str = "reader@example.com";
pub const PASSWORD: &str = "hunter2";
pub const SSO_URL: &str = "https://login.example.com/sso/auth";
pub const EDITION_BYTES: usize = 64 * 1024;

/// What the portal does after a download link is clicked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// `.crdownload` for two seconds, then the finished PDF.
    Complete { bytes: usize },
    /// A zero-byte PDF that never grows.
    StuckAtZero,
    /// Nothing lands in the download directory.
    Nothing,
}

#[derive(Debug, Default)]
pub struct PortalState {
    pub url: String,
    pub logged_in: bool,
    pub cookie_banner: bool,
    pub accepted_password: String,
    pub typed_user: Option<String>,
    pub typed_password: Option<String>,
    pub daily_control: bool,
    pub daily: VecDeque<Delivery>,
    pub archive: HashMap<String, VecDeque<Delivery>>,
    pub open_popup_on_click: bool,
    pub popups: Vec<WindowId>,
    pub clicks: Vec<String>,
    pub navigations: Vec<String>,
    pub deliveries: usize,
    pub launches: usize,
    pub quits: usize,
    pub logouts: usize,
    pub refreshes: usize,
    pub fail_launch: bool,
}

/// Scripted stand-in for the e-paper portal. Cloning shares the state, so a
/// test keeps one handle for assertions and hands another to the code under
/// test as its [`BrowserLauncher`].
#[derive(Clone)]
pub struct FakePortal {
    state: Arc<Mutex<PortalState>>,
    clock: ManualClock,
    download_dir: PathBuf,
    selectors: Selectors,
}

impl FakePortal {
    pub fn new(download_dir: &Path, clock: ManualClock) -> Self {
        Self {
            state: Arc::new(Mutex::new(PortalState {
                accepted_password: PASSWORD.to_string(),
                daily_control: true,
                ..PortalState::default()
            })),
            clock,
            download_dir: download_dir.to_path_buf(),
            selectors: Selectors::default(),
        }
    }

    pub fn state(&self) -> MutexGuard<'_, PortalState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn script_daily(&self, deliveries: &[Delivery]) {
        self.state().daily.extend(deliveries.iter().copied());
    }

    pub fn script_archive(&self, iso_date: &str, deliveries: &[Delivery]) {
        self.state()
            .archive
            .entry(iso_date.to_string())
            .or_default()
            .extend(deliveries.iter().copied());
    }

    fn deliver(&self, delivery: Delivery) {
        let number = {
            let mut state = self.state();
            state.deliveries += 1;
            state.deliveries
        };
        let name = format!("E-Paper_{number}.pdf");
        let final_path = self.download_dir.join(&name);
        let partial = self.download_dir.join(format!("{name}.crdownload"));
        match delivery {
            Delivery::Complete { bytes } => {
                let early = partial.clone();
                self.clock.schedule_after(Duration::from_millis(500), move || {
                    fs::write(&early, vec![1u8; bytes / 2]).unwrap();
                });
                self.clock.schedule_after(Duration::from_millis(2500), move || {
                    fs::write(&final_path, vec![1u8; bytes]).unwrap();
                    let _ = fs::remove_file(&partial);
                });
            }
            Delivery::StuckAtZero => {
                self.clock.schedule_after(Duration::from_millis(500), move || {
                    fs::write(&final_path, b"").unwrap();
                });
            }
            Delivery::Nothing => {}
        }
    }
}

impl BrowserLauncher for FakePortal {
    type Browser = FakeBrowser;

    fn launch(&self, _options: &LaunchOptions) -> Result<FakeBrowser, ArchiverError> {
        let mut state = self.state();
        if state.fail_launch {
            return Err(ArchiverError::BrowserLaunch("chrome not installed".to_string()));
        }
        state.launches += 1;
        state.url = "about:blank".to_string();
        Ok(FakeBrowser {
            portal: self.clone(),
            quit: false,
        })
    }
}

pub struct FakeBrowser {
    portal: FakePortal,
    quit: bool,
}

impl FakeBrowser {
    fn archive_date_for(&self, locator: &str) -> Option<String> {
        locator
            .strip_prefix(".pdf-date-")
            .and_then(|rest| rest.strip_suffix(" a"))
            .map(str::to_string)
    }

    fn present(&self, locator: &str) -> bool {
        let selectors = &self.portal.selectors;
        let state = self.portal.state();
        let on_sso = state.url.contains("/sso/");
        if locator == selectors.cookie_accept {
            state.cookie_banner
        } else if locator == selectors.logout {
            state.logged_in && !on_sso
        } else if locator == selectors.login_link {
            !state.logged_in && !on_sso
        } else if locator == selectors.username
            || locator == selectors.password
            || locator == selectors.submit
        {
            on_sso
        } else if locator == selectors.download {
            state.logged_in && state.daily_control
        } else if let Some(iso) = self.archive_date_for(locator) {
            state.url.contains(&format!("dateTo={iso}")) && state.archive.contains_key(&iso)
        } else {
            false
        }
    }

    fn alive(&self) -> Result<(), ArchiverError> {
        if self.quit {
            return Err(ArchiverError::Browser("browser already quit".to_string()));
        }
        Ok(())
    }
}

impl Browser for FakeBrowser {
    fn navigate(&mut self, url: &str) -> Result<(), ArchiverError> {
        self.alive()?;
        let mut state = self.portal.state();
        state.url = url.to_string();
        state.navigations.push(url.to_string());
        Ok(())
    }

    fn refresh(&mut self) -> Result<(), ArchiverError> {
        self.alive()?;
        self.portal.state().refreshes += 1;
        Ok(())
    }

    fn current_url(&mut self) -> Result<String, ArchiverError> {
        self.alive()?;
        Ok(self.portal.state().url.clone())
    }

    fn wait_for(
        &mut self,
        locator: &str,
        _condition: WaitFor,
        timeout: Duration,
    ) -> Result<bool, ArchiverError> {
        self.alive()?;
        if self.present(locator) {
            return Ok(true);
        }
        self.portal.clock.sleep(timeout);
        Ok(self.present(locator))
    }

    fn wait_for_url(&mut self, fragment: &str, timeout: Duration) -> Result<bool, ArchiverError> {
        self.alive()?;
        if self.portal.state().url.contains(fragment) {
            return Ok(true);
        }
        self.portal.clock.sleep(timeout);
        Ok(self.portal.state().url.contains(fragment))
    }

    fn exists(&mut self, locator: &str) -> Result<bool, ArchiverError> {
        self.alive()?;
        Ok(self.present(locator))
    }

    fn click(&mut self, locator: &str) -> Result<(), ArchiverError> {
        self.alive()?;
        if !self.present(locator) {
            return Err(ArchiverError::ElementNotFound(locator.to_string()));
        }
        let selectors = self.portal.selectors.clone();
        let delivery = {
            let mut state = self.portal.state();
            state.clicks.push(locator.to_string());
            if locator == selectors.cookie_accept {
                state.cookie_banner = false;
                None
            } else if locator == selectors.login_link {
                state.url = SSO_URL.to_string();
                None
            } else if locator == selectors.submit {
                let accepted = state.typed_user.as_deref() == Some(USER)
                    && state.typed_password.as_deref() == Some(state.accepted_password.as_str());
                if accepted {
                    state.logged_in = true;
                    state.url = "https://vrm-epaper.de/dashboard.act?region=E120".to_string();
                }
                None
            } else if locator == selectors.logout {
                state.logged_in = false;
                state.logouts += 1;
                None
            } else if locator == selectors.download {
                Some(state.daily.pop_front().unwrap_or(Delivery::Nothing))
            } else if let Some(iso) = self.archive_date_for(locator) {
                Some(
                    state
                        .archive
                        .get_mut(&iso)
                        .and_then(|queue| queue.pop_front())
                        .unwrap_or(Delivery::Nothing),
                )
            } else {
                None
            }
        };
        if let Some(delivery) = delivery {
            let mut state = self.portal.state();
            if state.open_popup_on_click {
                let id = format!("popup-{}", state.clicks.len());
                state.popups.push(id);
            }
            drop(state);
            self.portal.deliver(delivery);
        }
        Ok(())
    }

    fn scroll_into_view(&mut self, _locator: &str) -> Result<(), ArchiverError> {
        self.alive()
    }

    fn fill(&mut self, locator: &str, value: &str) -> Result<(), ArchiverError> {
        self.alive()?;
        let selectors = &self.portal.selectors;
        let mut state = self.portal.state();
        if locator == selectors.username {
            state.typed_user = Some(value.to_string());
        } else if locator == selectors.password {
            state.typed_password = Some(value.to_string());
        }
        Ok(())
    }

    fn windows(&mut self) -> Result<Vec<WindowId>, ArchiverError> {
        self.alive()?;
        let mut windows = vec!["main".to_string()];
        windows.extend(self.portal.state().popups.iter().cloned());
        Ok(windows)
    }

    fn close_window(&mut self, id: &WindowId) -> Result<(), ArchiverError> {
        self.alive()?;
        self.portal.state().popups.retain(|popup| popup != id);
        Ok(())
    }

    fn quit(&mut self) -> Result<(), ArchiverError> {
        if !self.quit {
            self.quit = true;
            self.portal.state().quits += 1;
        }
        Ok(())
    }
}

/// Returns the same text for every PDF.
pub struct FixedText(pub &'static str);

impl TextExtractor for FixedText {
    fn extract(&self, _pdf: &Path) -> Result<String, ArchiverError> {
        Ok(self.0.to_string())
    }
}

pub fn config_for(download_dir: &Path) -> ResolvedConfig {
    let dir = download_dir.display().to_string();
    let env = move |key: &str| match key {
        "PAPER_USER" => Some(USER.to_string()),
        "PAPER_PASS" => Some(PASSWORD.to_string()),
        "EPAPER_DOWNLOAD_DIR" => Some(dir.clone()),
        "WEB_USER_ADMIN" => Some("admin".to_string()),
        "WEB_PASS_ADMIN" => Some("secret".to_string()),
        "WEB_USER_GUEST" => Some("guest".to_string()),
        "WEB_PASS_GUEST" => Some("guest".to_string()),
        _ => None,
    };
    let mut config = ConfigLoader::resolve_config(Config::default(), &env).unwrap();
    config.compress_after_fetch = false;
    config
}

pub fn fetcher(portal: &FakePortal, clock: &ManualClock, config: &ResolvedConfig) -> Fetcher<FakePortal> {
    let settings = FetchSettings::from_config(config).unwrap();
    Fetcher::new(portal.clone(), settings, Arc::new(clock.clone())).unwrap()
}

pub fn app(portal: &FakePortal, clock: &ManualClock, config: ResolvedConfig) -> App<FakePortal> {
    app_with(portal, clock, config, |_| {})
}

pub fn app_with(
    portal: &FakePortal,
    clock: &ManualClock,
    config: ResolvedConfig,
    customize: impl FnOnce(&mut Services),
) -> App<FakePortal> {
    let store = Store::new(&config.download_dir).unwrap();
    store.ensure_dirs().unwrap();
    let indexer = Indexer::new(store, Box::new(FixedText("Stadtrat beschliesst neuen Haushalt")), None).unwrap();
    let mut services = Services::new(indexer);
    services.clock = Arc::new(clock.clone());
    customize(&mut services);
    App::new(config, portal.clone(), services).unwrap()
}

pub fn write_edition(dir: &Path, iso_date: &str, bytes: usize) -> PathBuf {
    let path = dir.join(format!("{iso_date}_Wormser_Zeitung.pdf"));
    fs::write(&path, vec![9u8; bytes]).unwrap();
    path
}

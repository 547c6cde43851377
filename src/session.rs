use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::browser::{Browser, BrowserLauncher, LaunchOptions, WaitFor};
use crate::clock::Clock;
use crate::config::{Credentials, PortalSettings};
use crate::error::ArchiverError;

pub type SharedClock = Arc<dyn Clock>;

const COOKIE_WAIT: Duration = Duration::from_secs(5);
const LOGGED_IN_WAIT: Duration = Duration::from_secs(3);
const LOGOUT_PAUSE: Duration = Duration::from_secs(2);

/// One authenticated browser. The browser process is terminated by
/// [`Session::close`] or, failing that, on drop.
pub struct Session<B: Browser> {
    browser: Option<B>,
    portal: PortalSettings,
    wait_timeout: Duration,
    clock: SharedClock,
}

impl<B: Browser> Session<B> {
    pub fn open<L>(
        launcher: &L,
        options: &LaunchOptions,
        portal: PortalSettings,
        wait_timeout: Duration,
        clock: SharedClock,
    ) -> Result<Self, ArchiverError>
    where
        L: BrowserLauncher<Browser = B>,
    {
        info!(download_dir = %options.download_dir.display(), headless = options.headless, "launching browser");
        let browser = launcher.launch(options)?;
        Ok(Self {
            browser: Some(browser),
            portal,
            wait_timeout,
            clock,
        })
    }

    pub fn is_alive(&self) -> bool {
        self.browser.is_some()
    }

    pub fn wait_timeout(&self) -> Duration {
        self.wait_timeout
    }

    pub fn browser(&mut self) -> Result<&mut B, ArchiverError> {
        self.browser
            .as_mut()
            .ok_or_else(|| ArchiverError::Browser("session already closed".to_string()))
    }

    pub fn login(&mut self, credentials: &Credentials) -> Result<(), ArchiverError> {
        let wait = self.wait_timeout;
        let clock = self.clock.clone();
        let portal = self.portal.clone();
        let selectors = &portal.selectors;
        let browser = self.browser()?;

        browser.navigate(&portal.dashboard_url)?;

        match browser.wait_for(&selectors.cookie_accept, WaitFor::Clickable, COOKIE_WAIT) {
            Ok(true) => {
                if let Err(err) = browser.click(&selectors.cookie_accept) {
                    debug!(error = %err, "cookie banner click failed");
                }
                clock.sleep(Duration::from_secs(1));
            }
            Ok(false) => debug!("no cookie banner"),
            Err(err) => debug!(error = %err, "cookie banner lookup failed"),
        }

        if browser.wait_for(&selectors.logout, WaitFor::Present, LOGGED_IN_WAIT)? {
            info!("already logged in");
            return Ok(());
        }

        if !browser.exists(&selectors.login_link)? {
            return Err(ArchiverError::Authentication(
                "login link not found on dashboard".to_string(),
            ));
        }
        browser.click(&selectors.login_link)?;

        if !browser.wait_for_url(&portal.sso_marker, wait)? {
            return Err(ArchiverError::Authentication(format!(
                "never reached identity provider (url without '{}')",
                portal.sso_marker
            )));
        }
        if !browser.wait_for(&selectors.username, WaitFor::Visible, wait)? {
            return Err(ArchiverError::Authentication(
                "username field not visible".to_string(),
            ));
        }
        browser.fill(&selectors.username, &credentials.user)?;
        if !browser.exists(&selectors.password)? {
            return Err(ArchiverError::Authentication(
                "password field not found".to_string(),
            ));
        }
        browser.fill(&selectors.password, &credentials.password)?;
        if !browser.exists(&selectors.submit)? {
            return Err(ArchiverError::Authentication(
                "submit button not found".to_string(),
            ));
        }
        browser.click(&selectors.submit)?;

        if !browser.wait_for_url(&portal.domain, wait)? {
            return Err(ArchiverError::Authentication(format!(
                "no redirect back to {} after submitting credentials",
                portal.domain
            )));
        }
        info!(user = %credentials.user, "logged in");
        Ok(())
    }

    /// Best effort; failures are logged and swallowed.
    pub fn logout(&mut self) {
        if let Err(err) = self.try_logout() {
            warn!(error = %err, "logout failed");
        }
    }

    fn try_logout(&mut self) -> Result<(), ArchiverError> {
        let wait = self.wait_timeout;
        let clock = self.clock.clone();
        let dashboard = self.portal.dashboard_url.clone();
        let logout = self.portal.selectors.logout.clone();
        let browser = self.browser()?;

        browser.navigate(&dashboard)?;
        clock.sleep(LOGOUT_PAUSE);
        if !browser.wait_for(&logout, WaitFor::Present, wait)? {
            return Err(ArchiverError::ElementNotFound(logout));
        }
        browser.click(&logout)?;
        clock.sleep(LOGOUT_PAUSE);
        info!("logged out");
        Ok(())
    }

    /// Closes every window except the main one and returns how many went.
    pub fn close_popups(&mut self) -> usize {
        let browser = match self.browser() {
            Ok(browser) => browser,
            Err(_) => return 0,
        };
        let windows = match browser.windows() {
            Ok(windows) => windows,
            Err(err) => {
                warn!(error = %err, "could not list windows");
                return 0;
            }
        };
        let mut closed = 0;
        for id in windows.iter().skip(1) {
            match browser.close_window(id) {
                Ok(()) => closed += 1,
                Err(err) => warn!(window = %id, error = %err, "could not close popup"),
            }
        }
        if closed > 0 {
            info!(closed, "closed popup windows");
        }
        closed
    }

    pub fn close(&mut self) {
        if let Some(mut browser) = self.browser.take() {
            if let Err(err) = browser.quit() {
                warn!(error = %err, "browser did not shut down cleanly");
            } else {
                debug!("browser closed");
            }
        }
    }
}

impl<B: Browser> Drop for Session<B> {
    fn drop(&mut self) {
        self.close();
    }
}

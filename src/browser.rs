use std::path::PathBuf;
use std::time::Duration;

use crate::error::ArchiverError;

/// How an element must look before `wait_for` reports success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitFor {
    Present,
    Visible,
    Clickable,
}

/// A CSS selector, or an XPath expression when written as `xpath:<expr>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Locator<'a> {
    Css(&'a str),
    XPath(&'a str),
}

impl<'a> Locator<'a> {
    pub fn parse(raw: &'a str) -> Self {
        match raw.strip_prefix("xpath:") {
            Some(expr) => Locator::XPath(expr.trim()),
            None => Locator::Css(raw.trim()),
        }
    }
}

pub type WindowId = String;

/// The slice of browser automation the fetch pipeline needs.
///
/// Every call blocks until the browser answered. Element arguments are
/// locator strings (see [`Locator`]), not handles, so implementations stay
/// stateless between calls.
pub trait Browser {
    fn navigate(&mut self, url: &str) -> Result<(), ArchiverError>;
    fn refresh(&mut self) -> Result<(), ArchiverError>;
    fn current_url(&mut self) -> Result<String, ArchiverError>;

    /// `Ok(false)` when `timeout` passed without the element reaching `condition`.
    fn wait_for(
        &mut self,
        locator: &str,
        condition: WaitFor,
        timeout: Duration,
    ) -> Result<bool, ArchiverError>;

    /// `Ok(false)` when the current URL never contained `fragment`.
    fn wait_for_url(&mut self, fragment: &str, timeout: Duration) -> Result<bool, ArchiverError>;

    /// Immediate lookup, no waiting.
    fn exists(&mut self, locator: &str) -> Result<bool, ArchiverError>;

    /// Scripted `element.click()`, which is not intercepted by overlays.
    fn click(&mut self, locator: &str) -> Result<(), ArchiverError>;
    fn scroll_into_view(&mut self, locator: &str) -> Result<(), ArchiverError>;
    fn fill(&mut self, locator: &str, value: &str) -> Result<(), ArchiverError>;

    /// Open windows/tabs, the main window first.
    fn windows(&mut self) -> Result<Vec<WindowId>, ArchiverError>;
    fn close_window(&mut self, id: &WindowId) -> Result<(), ArchiverError>;

    /// Terminates the browser process. Must be safe to call twice.
    fn quit(&mut self) -> Result<(), ArchiverError>;
}

#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub download_dir: PathBuf,
    pub window_size: (u32, u32),
    pub proxy: Option<String>,
    pub headless: bool,
    /// Fresh temporary profile when `None`.
    pub profile_dir: Option<PathBuf>,
}

impl LaunchOptions {
    pub fn new(download_dir: PathBuf) -> Self {
        Self {
            download_dir,
            window_size: (1920, 1080),
            proxy: None,
            headless: true,
            profile_dir: None,
        }
    }
}

pub trait BrowserLauncher: Send + Sync {
    type Browser: Browser;

    fn launch(&self, options: &LaunchOptions) -> Result<Self::Browser, ArchiverError>;
}

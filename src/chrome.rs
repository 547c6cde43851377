//! [`Browser`] backed by a real Chrome/Chromium over the DevTools protocol.
//!
//! `chromiumoxide` is async; the pipeline is blocking. Each [`ChromeBrowser`]
//! owns a small tokio runtime that drives the CDP handler in the background
//! and `block_on`s every call.

use std::fs;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chromiumoxide::Page;
use chromiumoxide::browser::{Browser as CdpBrowser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::browser::{
    SetDownloadBehaviorBehavior, SetDownloadBehaviorParams,
};
use chromiumoxide::element::Element;
use futures::StreamExt;
use tempfile::TempDir;
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::browser::{Browser, BrowserLauncher, LaunchOptions, Locator, WaitFor, WindowId};
use crate::error::ArchiverError;
use crate::tools;

const POLL: Duration = Duration::from_millis(250);

const VISIBLE_JS: &str = "function() { \
    const r = this.getBoundingClientRect(); \
    const s = window.getComputedStyle(this); \
    return r.width > 0 && r.height > 0 && s.visibility !== 'hidden' && s.display !== 'none'; }";

const CLICKABLE_JS: &str = "function() { \
    const r = this.getBoundingClientRect(); \
    const s = window.getComputedStyle(this); \
    return r.width > 0 && r.height > 0 && s.visibility !== 'hidden' && s.display !== 'none' \
        && !this.disabled && s.pointerEvents !== 'none'; }";

#[derive(Debug, Clone, Default)]
pub struct ChromeLauncher {
    executable: Option<PathBuf>,
}

impl ChromeLauncher {
    pub fn new() -> Self {
        Self {
            executable: find_chrome(),
        }
    }

    pub fn with_executable(path: PathBuf) -> Self {
        Self {
            executable: Some(path),
        }
    }

    pub fn executable(&self) -> Option<&Path> {
        self.executable.as_deref()
    }
}

impl BrowserLauncher for ChromeLauncher {
    type Browser = ChromeBrowser;

    fn launch(&self, options: &LaunchOptions) -> Result<ChromeBrowser, ArchiverError> {
        let executable = self
            .executable
            .clone()
            .ok_or_else(|| ArchiverError::MissingTool("google-chrome or chromium".to_string()))?;
        ChromeBrowser::launch(&executable, options)
    }
}

pub struct ChromeBrowser {
    runtime: Runtime,
    browser: Option<CdpBrowser>,
    handler: Option<JoinHandle<()>>,
    page: Option<Page>,
    _profile: Option<TempDir>,
}

impl ChromeBrowser {
    fn launch(executable: &Path, options: &LaunchOptions) -> Result<Self, ArchiverError> {
        fs::create_dir_all(&options.download_dir)
            .map_err(|err| ArchiverError::Filesystem(err.to_string()))?;
        let download_dir = options
            .download_dir
            .canonicalize()
            .map_err(|err| ArchiverError::Filesystem(err.to_string()))?;

        let (profile_dir, temp_profile) = match &options.profile_dir {
            Some(dir) => (dir.clone(), None),
            None => {
                let temp = tempfile::Builder::new()
                    .prefix("epaper-profile")
                    .tempdir()
                    .map_err(|err| ArchiverError::Filesystem(err.to_string()))?;
                (temp.path().to_path_buf(), Some(temp))
            }
        };
        write_download_preferences(&profile_dir, &download_dir)?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .map_err(|err| ArchiverError::BrowserLaunch(err.to_string()))?;

        let (width, height) = options.window_size;
        let mut builder = BrowserConfig::builder()
            .chrome_executable(executable)
            .user_data_dir(&profile_dir)
            .window_size(width, height)
            .viewport(None)
            .arg("--disable-extensions")
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--no-first-run")
            .arg("--no-default-browser-check");
        if options.headless {
            builder = builder.no_sandbox().arg("--disable-dev-shm-usage");
        } else {
            builder = builder.with_head();
        }
        if let Some(proxy) = &options.proxy {
            builder = builder.arg(format!("--proxy-server={proxy}"));
        }
        let config = builder.build().map_err(ArchiverError::BrowserLaunch)?;

        let (browser, mut handler) = runtime
            .block_on(CdpBrowser::launch(config))
            .map_err(|err| ArchiverError::BrowserLaunch(err.to_string()))?;
        let handler = runtime.spawn(async move { while (handler.next().await).is_some() {} });

        let mut this = Self {
            runtime,
            browser: Some(browser),
            handler: Some(handler),
            page: None,
            _profile: temp_profile,
        };

        let download_path = download_dir.to_string_lossy().to_string();
        let page = this.block(|browser| async move {
            let behavior = SetDownloadBehaviorParams::builder()
                .behavior(SetDownloadBehaviorBehavior::Allow)
                .download_path(download_path)
                .build()
                .map_err(ArchiverError::Browser)?;
            browser.execute(behavior).await.map_err(cdp_err)?;
            browser.new_page("about:blank").await.map_err(cdp_err)
        })?;
        this.page = Some(page);
        info!(download_dir = %download_dir.display(), headless = options.headless, "browser started");
        Ok(this)
    }

    fn block<'a, F, Fut, T>(&'a self, f: F) -> Result<T, ArchiverError>
    where
        F: FnOnce(&'a CdpBrowser) -> Fut,
        Fut: Future<Output = Result<T, ArchiverError>>,
    {
        let browser = self
            .browser
            .as_ref()
            .ok_or_else(|| ArchiverError::Browser("browser already closed".to_string()))?;
        self.runtime.block_on(f(browser))
    }

    fn page(&self) -> Result<&Page, ArchiverError> {
        self.page
            .as_ref()
            .ok_or_else(|| ArchiverError::Browser("no active page".to_string()))
    }

    fn find(&self, locator: &str) -> Result<Option<Element>, ArchiverError> {
        let page = self.page()?;
        let found = self.runtime.block_on(async {
            match Locator::parse(locator) {
                Locator::Css(css) => page.find_element(css).await,
                Locator::XPath(xpath) => page.find_xpath(xpath).await,
            }
        });
        Ok(found.ok())
    }

    fn require(&self, locator: &str) -> Result<Element, ArchiverError> {
        self.find(locator)?
            .ok_or_else(|| ArchiverError::ElementNotFound(locator.to_string()))
    }

    fn check(&self, element: &Element, function: &str) -> bool {
        self.runtime
            .block_on(element.call_js_fn(function, false))
            .ok()
            .and_then(|ret| ret.result.value)
            .and_then(|value| value.as_bool())
            .unwrap_or(false)
    }
}

impl Browser for ChromeBrowser {
    fn navigate(&mut self, url: &str) -> Result<(), ArchiverError> {
        debug!(url, "navigate");
        let page = self.page()?;
        self.runtime
            .block_on(page.goto(url))
            .map(|_| ())
            .map_err(cdp_err)
    }

    fn refresh(&mut self) -> Result<(), ArchiverError> {
        let page = self.page()?;
        self.runtime
            .block_on(page.reload())
            .map(|_| ())
            .map_err(cdp_err)
    }

    fn current_url(&mut self) -> Result<String, ArchiverError> {
        let page = self.page()?;
        self.runtime
            .block_on(page.url())
            .map(|url| url.unwrap_or_default())
            .map_err(cdp_err)
    }

    fn wait_for(
        &mut self,
        locator: &str,
        condition: WaitFor,
        timeout: Duration,
    ) -> Result<bool, ArchiverError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(element) = self.find(locator)? {
                let ready = match condition {
                    WaitFor::Present => true,
                    WaitFor::Visible => self.check(&element, VISIBLE_JS),
                    WaitFor::Clickable => self.check(&element, CLICKABLE_JS),
                };
                if ready {
                    return Ok(true);
                }
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            std::thread::sleep(POLL);
        }
    }

    fn wait_for_url(&mut self, fragment: &str, timeout: Duration) -> Result<bool, ArchiverError> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.current_url()?.contains(fragment) {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            std::thread::sleep(POLL);
        }
    }

    fn exists(&mut self, locator: &str) -> Result<bool, ArchiverError> {
        Ok(self.find(locator)?.is_some())
    }

    fn click(&mut self, locator: &str) -> Result<(), ArchiverError> {
        let element = self.require(locator)?;
        self.runtime
            .block_on(element.call_js_fn("function() { this.click(); }", false))
            .map(|_| ())
            .map_err(cdp_err)
    }

    fn scroll_into_view(&mut self, locator: &str) -> Result<(), ArchiverError> {
        let element = self.require(locator)?;
        self.runtime
            .block_on(element.scroll_into_view())
            .map(|_| ())
            .map_err(cdp_err)
    }

    fn fill(&mut self, locator: &str, value: &str) -> Result<(), ArchiverError> {
        let element = self.require(locator)?;
        self.runtime.block_on(async {
            element
                .call_js_fn("function() { this.value = ''; }", false)
                .await
                .map_err(cdp_err)?;
            element.focus().await.map_err(cdp_err)?;
            element.type_str(value).await.map_err(cdp_err)?;
            Ok(())
        })
    }

    fn windows(&mut self) -> Result<Vec<WindowId>, ArchiverError> {
        let main = self.page()?.target_id().inner().clone();
        let pages = self.block(|browser| async move { browser.pages().await.map_err(cdp_err) })?;
        let mut ids = vec![main.clone()];
        ids.extend(
            pages
                .iter()
                .map(|page| page.target_id().inner().clone())
                .filter(|id| *id != main),
        );
        Ok(ids)
    }

    fn close_window(&mut self, id: &WindowId) -> Result<(), ArchiverError> {
        let pages = self.block(|browser| async move { browser.pages().await.map_err(cdp_err) })?;
        let Some(page) = pages
            .into_iter()
            .find(|page| page.target_id().inner() == id)
        else {
            return Ok(());
        };
        self.runtime.block_on(page.close()).map_err(cdp_err)
    }

    fn quit(&mut self) -> Result<(), ArchiverError> {
        self.page = None;
        let Some(mut browser) = self.browser.take() else {
            return Ok(());
        };
        let result = self.runtime.block_on(async {
            let closed = browser.close().await.map(|_| ()).map_err(cdp_err);
            if let Err(err) = browser.wait().await {
                warn!(error = %err, "waiting for browser exit failed");
            }
            closed
        });
        if let Some(handler) = self.handler.take() {
            handler.abort();
        }
        info!("browser stopped");
        result
    }
}

impl Drop for ChromeBrowser {
    fn drop(&mut self) {
        if self.browser.is_some() {
            if let Err(err) = self.quit() {
                warn!(error = %err, "browser shutdown on drop failed");
            }
        }
    }
}

/// Chrome reads these before the first page opens; `always_open_pdf_externally`
/// makes PDF links download instead of opening the built-in viewer.
fn write_download_preferences(profile_dir: &Path, download_dir: &Path) -> Result<(), ArchiverError> {
    let default_dir = profile_dir.join("Default");
    fs::create_dir_all(&default_dir).map_err(|err| ArchiverError::Filesystem(err.to_string()))?;
    let prefs = serde_json::json!({
        "download": {
            "default_directory": download_dir.to_string_lossy(),
            "prompt_for_download": false,
            "directory_upgrade": true
        },
        "safebrowsing": { "enabled": true },
        "plugins": { "always_open_pdf_externally": true }
    });
    let content =
        serde_json::to_vec_pretty(&prefs).map_err(|err| ArchiverError::Filesystem(err.to_string()))?;
    fs::write(default_dir.join("Preferences"), content)
        .map_err(|err| ArchiverError::Filesystem(err.to_string()))
}

fn find_chrome() -> Option<PathBuf> {
    if let Some(path) = tools::find_any(&[
        "google-chrome",
        "google-chrome-stable",
        "chromium",
        "chromium-browser",
    ]) {
        return Some(path);
    }
    [
        "/usr/bin/google-chrome",
        "/usr/bin/chromium",
        "/snap/bin/chromium",
        "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
    ]
    .iter()
    .map(PathBuf::from)
    .find(|path| path.exists())
}

fn cdp_err(err: chromiumoxide::error::CdpError) -> ArchiverError {
    ArchiverError::Browser(err.to_string())
}

use tracing::{error, info, warn};

use crate::app::{ProgressEvent, ProgressSink};
use crate::browser::{Browser, BrowserLauncher, WaitFor};
use crate::domain::{EditionDate, TargetArtifact};
use crate::error::ArchiverError;
use crate::fetch::{DAILY_CLICK_PAUSE, EditionResult, FetchStatus, Fetcher, REFRESH_PAUSE};
use crate::retry::RetryOutcome;
use crate::session::Session;

impl<L: BrowserLauncher> Fetcher<L> {
    /// Fetches the edition for `date` from the dashboard's download control.
    ///
    /// Never fails: launch, login and attempt errors are logged and reported
    /// as [`FetchStatus::Failed`]. The browser is closed on every path.
    pub fn run_daily(&self, date: EditionDate, sink: &dyn ProgressSink) -> EditionResult {
        let target = self.target(date);
        sink.event(ProgressEvent::message(format!("daily fetch {}", target.file_name)));

        match self.already_resolved(&target) {
            Ok(true) => return EditionResult::new(&target, FetchStatus::AlreadyPresent),
            Ok(false) => {}
            Err(err) => {
                error!(error = %err, "could not inspect existing edition");
                return EditionResult::new(&target, FetchStatus::failed(&err));
            }
        }

        let mut session = match self.open_session() {
            Ok(session) => session,
            Err(err) => {
                error!(error = %err, "daily run aborted");
                return EditionResult::new(&target, FetchStatus::failed(&err));
            }
        };

        let outcome = self.settings.retry.run(&*self.clock, &target.file_name, |attempt| {
            info!(attempt, max = self.settings.retry.max_attempts, date = %date, "daily attempt");
            sink.event(ProgressEvent::message(format!(
                "attempt {attempt}/{}",
                self.settings.retry.max_attempts
            )));
            self.daily_attempt(&mut session, &target, attempt)
        });

        let status = match outcome {
            RetryOutcome::Succeeded { attempt, .. } => FetchStatus::Fetched { attempts: attempt },
            RetryOutcome::Exhausted { last } => {
                warn!(date = %date, error = %last, "daily fetch gave up");
                FetchStatus::failed(&last)
            }
            RetryOutcome::Fatal { error, .. } => {
                error!(date = %date, error = %error, "daily run aborted");
                FetchStatus::failed(&error)
            }
        };

        session.logout();
        session.close();
        EditionResult::new(&target, status)
    }

    fn daily_attempt(
        &self,
        session: &mut Session<L::Browser>,
        target: &TargetArtifact,
        attempt: u32,
    ) -> Result<std::path::PathBuf, ArchiverError> {
        let selector = self.settings.portal.selectors.download.clone();
        let wait = session.wait_timeout();

        if attempt > 1 {
            session.browser()?.refresh()?;
            self.clock.sleep(REFRESH_PAUSE);
        }
        self.sweep()?;

        let browser = session.browser()?;
        if !browser.wait_for(&selector, WaitFor::Clickable, wait)? {
            return Err(ArchiverError::ElementNotFound(selector));
        }
        browser.scroll_into_view(&selector)?;

        let snapshot = self.snapshot()?;
        browser.click(&selector)?;
        self.clock.sleep(DAILY_CLICK_PAUSE);
        session.close_popups();

        self.settle_download(&snapshot, target)
    }
}

//! The browser contract the login and scraping steps drive, plus page-load retry
//! and feed scrolling built on top of it.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tracing::{error, info, warn};

use crate::pacing::{Pacer, PauseWindow};

/// How an element is found on the page.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Locator {
    Id(String),
    Name(String),
    ClassName(String),
    Css(String),
    XPath(String),
}

impl Locator {
    pub fn id(value: impl Into<String>) -> Self {
        Self::Id(value.into())
    }

    pub fn name(value: impl Into<String>) -> Self {
        Self::Name(value.into())
    }

    pub fn class_name(value: impl Into<String>) -> Self {
        Self::ClassName(value.into())
    }

    pub fn css(value: impl Into<String>) -> Self {
        Self::Css(value.into())
    }

    pub fn xpath(value: impl Into<String>) -> Self {
        Self::XPath(value.into())
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(v) => write!(f, "id={v}"),
            Self::Name(v) => write!(f, "name={v}"),
            Self::ClassName(v) => write!(f, "class={v}"),
            Self::Css(v) => write!(f, "css={v}"),
            Self::XPath(v) => write!(f, "xpath={v}"),
        }
    }
}

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("timed out after {}s waiting for {locator}", timeout.as_secs())]
    Timeout { locator: Locator, timeout: Duration },
    #[error("connection failure: {0}")]
    Connection(String),
    #[error("browser session is closed")]
    Closed,
    #[error("browser driver error: {0}")]
    Driver(String),
}

impl BrowserError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection(_))
    }
}

/// A synchronous, single-threaded handle on one browser tab.
pub trait BrowserSession {
    type Element;

    fn navigate(&mut self, url: &str) -> Result<(), BrowserError>;
    /// Block until an element matching `locator` is rendered, or `timeout` elapses.
    fn wait_for_visible(&mut self, locator: &Locator, timeout: Duration) -> Result<Self::Element, BrowserError>;
    fn find_all(&mut self, locator: &Locator) -> Result<Vec<Self::Element>, BrowserError>;
    fn click(&mut self, element: &Self::Element) -> Result<(), BrowserError>;
    fn type_text(&mut self, element: &Self::Element, text: &str) -> Result<(), BrowserError>;
    /// Scroll to `fraction` of the document height.
    fn scroll_to_fraction(&mut self, fraction: f64) -> Result<(), BrowserError>;
    fn page_source(&mut self) -> Result<String, BrowserError>;
    fn title(&mut self) -> Result<String, BrowserError>;
    /// Save a screenshot into `dir` and return its path.
    fn capture_diagnostic(&mut self, dir: &Path) -> Result<PathBuf, BrowserError>;
    /// Release the browser. Calling it again is a no-op.
    fn close(&mut self) -> Result<(), BrowserError>;
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("{url} unreachable after {attempts} attempts")]
    Unreachable { url: String, attempts: usize },
    #[error("{url} answered with the bot-check interstitial {title:?}")]
    Blocked { url: String, title: String },
    #[error("{url} did not finish loading within {}s", timeout.as_secs())]
    Timeout {
        url: String,
        timeout: Duration,
        diagnostic: Option<PathBuf>,
    },
    #[error(transparent)]
    Browser(#[from] BrowserError),
}

/// Navigates to a page and waits for its ready marker, retrying
/// connection-level failures.
#[derive(Debug, Clone)]
pub struct PageLoader {
    pub attempts: usize,
    pub timeout: Duration,
    pub diagnostics_dir: PathBuf,
    /// Title of the bot-check page shown instead of the requested one.
    pub challenge_title: Option<String>,
}

impl Default for PageLoader {
    fn default() -> Self {
        Self {
            attempts: 4,
            timeout: Duration::from_secs(60),
            diagnostics_dir: PathBuf::from("diagnostics"),
            challenge_title: None,
        }
    }
}

impl PageLoader {
    pub fn with_challenge_title(mut self, title: impl Into<String>) -> Self {
        self.challenge_title = Some(title.into());
        self
    }

    fn is_challenge<S: BrowserSession>(&self, session: &mut S) -> Option<String> {
        let expected = self.challenge_title.as_deref()?;
        match session.title() {
            Ok(title) if title == expected => Some(title),
            Ok(_) => None,
            Err(err) => {
                warn!(error = %err, "could not read page title");
                None
            }
        }
    }

    /// A timeout is terminal: a screenshot is captured, the session is closed and
    /// [`LoadError::Timeout`] returned without further attempts. A timeout on
    /// the bot-check page returns [`LoadError::Blocked`] instead and leaves the
    /// session open.
    pub fn load<S: BrowserSession>(
        &self,
        session: &mut S,
        pacer: &dyn Pacer,
        url: &str,
        ready: &Locator,
    ) -> Result<(), LoadError> {
        let mut attempts = 0;
        while attempts < self.attempts {
            attempts += 1;
            info!(url, attempt = attempts, "opening page");

            match session.navigate(url) {
                Ok(()) => {}
                Err(err) if err.is_connection() => {
                    error!(url, attempt = attempts, error = %err, "site unreachable");
                    continue;
                }
                Err(err) => return Err(err.into()),
            }
            pacer.pause(PauseWindow::NAVIGATION);

            match session.wait_for_visible(ready, self.timeout) {
                Ok(_) => {
                    info!(url, attempts, "site loaded");
                    return Ok(());
                }
                Err(err) if err.is_timeout() => {
                    if let Some(title) = self.is_challenge(session) {
                        error!(url, title = %title, "bot-check interstitial shown instead of the page");
                        return Err(LoadError::Blocked {
                            url: url.to_string(),
                            title,
                        });
                    }
                    let diagnostic = match session.capture_diagnostic(&self.diagnostics_dir) {
                        Ok(path) => Some(path),
                        Err(capture_err) => {
                            warn!(url, error = %capture_err, "could not capture diagnostic screenshot");
                            None
                        }
                    };
                    error!(
                        url,
                        timeout_secs = self.timeout.as_secs(),
                        diagnostic = ?diagnostic,
                        "page did not become ready, closing session"
                    );
                    if let Err(close_err) = session.close() {
                        warn!(error = %close_err, "closing browser after timeout failed");
                    }
                    return Err(LoadError::Timeout {
                        url: url.to_string(),
                        timeout: self.timeout,
                        diagnostic,
                    });
                }
                Err(err) if err.is_connection() => {
                    error!(url, attempt = attempts, error = %err, "connection dropped while loading");
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(LoadError::Unreachable {
            url: url.to_string(),
            attempts,
        })
    }
}

/// Fraction of the page height covered by one scroll step.
pub const SCROLL_STEP: f64 = 0.1;
/// Scrolling continues while the covered fraction is at most this.
pub const SCROLL_LIMIT: f64 = 0.2;

/// Scroll the feed in small steps so lazily rendered job tiles exist before the
/// page source is read. Returns the fractions scrolled to.
pub fn scroll_feed<S: BrowserSession>(session: &mut S, pacer: &dyn Pacer) -> Result<Vec<f64>, BrowserError> {
    info!("scrolling down to load job tiles");
    pacer.pause(PauseWindow::SCROLL_SETTLE);

    let mut positions = Vec::new();
    // Counted in whole steps to keep float error out of the loop condition.
    let limit_steps = (SCROLL_LIMIT / SCROLL_STEP).round() as u32;
    let mut steps = 0u32;
    while steps <= limit_steps {
        steps += 1;
        let fraction = f64::from(steps) * SCROLL_STEP;
        session.scroll_to_fraction(fraction)?;
        positions.push(fraction);
        pacer.pause(PauseWindow::SCROLL_STEP);
    }
    Ok(positions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pacing::NoPacer;
    use crate::testing::{Action, ScriptedPage, ScriptedSession};
    use tempfile::tempdir;

    const URL: &str = "https://www.upwork.com/nx/find-work/";

    fn ready() -> Locator {
        Locator::css("div[data-test=job-tile-list]")
    }

    fn loader(dir: &Path) -> PageLoader {
        PageLoader {
            attempts: 4,
            timeout: Duration::from_secs(60),
            diagnostics_dir: dir.to_path_buf(),
            challenge_title: None,
        }
    }

    #[test]
    fn loads_on_first_attempt() {
        let dir = tempdir().expect("tempdir");
        let mut session = ScriptedSession::new().with_page(URL, ScriptedPage::new("Find Work", "<html></html>"));
        loader(dir.path()).load(&mut session, &NoPacer, URL, &ready()).expect("load");
        assert_eq!(session.navigations(), vec![URL.to_string()]);
    }

    #[test]
    fn retries_connection_failures_then_succeeds() {
        let dir = tempdir().expect("tempdir");
        let mut session = ScriptedSession::new()
            .with_page(URL, ScriptedPage::new("Find Work", "<html></html>"))
            .with_connection_failures(3);
        loader(dir.path()).load(&mut session, &NoPacer, URL, &ready()).expect("load on fourth try");
        assert!(!session.is_closed());
    }

    #[test]
    fn exhausted_attempts_report_unreachable() {
        let dir = tempdir().expect("tempdir");
        let mut session = ScriptedSession::new().with_connection_failures(10);
        let err = loader(dir.path()).load(&mut session, &NoPacer, URL, &ready()).unwrap_err();
        match err {
            LoadError::Unreachable { url, attempts } => {
                assert_eq!(url, URL);
                assert_eq!(attempts, 4);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn timeout_captures_diagnostic_and_closes() {
        let dir = tempdir().expect("tempdir");
        let mut session = ScriptedSession::new()
            .with_page(URL, ScriptedPage::new("Find Work", "<html></html>"))
            .missing(ready());
        let err = loader(dir.path()).load(&mut session, &NoPacer, URL, &ready()).unwrap_err();

        match err {
            LoadError::Timeout { diagnostic, .. } => {
                let path = diagnostic.expect("diagnostic path");
                assert!(path.starts_with(dir.path()));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(session.is_closed());
        assert_eq!(session.navigations().len(), 1);
    }

    #[test]
    fn challenge_page_is_reported_instead_of_timeout() {
        let dir = tempdir().expect("tempdir");
        let mut session = ScriptedSession::new()
            .with_page(URL, ScriptedPage::new("Just a moment...", "<html>checking</html>"))
            .missing(ready());
        let err = loader(dir.path())
            .with_challenge_title("Just a moment...")
            .load(&mut session, &NoPacer, URL, &ready())
            .unwrap_err();

        assert!(matches!(err, LoadError::Blocked { ref title, .. } if title == "Just a moment..."));
        assert!(!session.is_closed());
        assert!(!session.actions().iter().any(|a| matches!(a, Action::Diagnostic(_))));
    }

    #[test]
    fn timeout_on_other_title_is_still_a_timeout() {
        let dir = tempdir().expect("tempdir");
        let mut session = ScriptedSession::new()
            .with_page(URL, ScriptedPage::new("Find Work", "<html></html>"))
            .missing(ready());
        let err = loader(dir.path())
            .with_challenge_title("Just a moment...")
            .load(&mut session, &NoPacer, URL, &ready())
            .unwrap_err();
        assert!(matches!(err, LoadError::Timeout { .. }));
        assert!(session.is_closed());
    }

    #[test]
    fn feed_scroll_takes_three_steps() {
        let mut session = ScriptedSession::new().with_page(URL, ScriptedPage::new("Find Work", ""));
        session.navigate(URL).expect("navigate");
        let positions = scroll_feed(&mut session, &NoPacer).expect("scroll");
        assert_eq!(positions.len(), 3);
        assert!((positions[0] - 0.1).abs() < 1e-9);
        assert!((positions[2] - 0.3).abs() < 1e-9);
        let scrolls = session
            .actions()
            .iter()
            .filter(|a| matches!(a, Action::Scrolled(_)))
            .count();
        assert_eq!(scrolls, 3);
    }
}

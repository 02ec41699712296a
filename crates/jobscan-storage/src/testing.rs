//! A [`BrowserSession`] over canned pages, for exercising login and scan flows
//! without a browser.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::browser::{BrowserError, BrowserSession, Locator};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptedPage {
    pub title: String,
    pub source: String,
}

impl ScriptedPage {
    pub fn new(title: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            source: source.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Navigated(String),
    Clicked(Locator),
    Typed(Locator, String),
    Scrolled(f64),
    Diagnostic(PathBuf),
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptedElement {
    pub locator: Locator,
}

#[derive(Debug, Default)]
pub struct ScriptedSession {
    pages: HashMap<String, ScriptedPage>,
    transitions: HashMap<Locator, VecDeque<ScriptedPage>>,
    missing: HashSet<Locator>,
    failing: HashSet<Locator>,
    connection_failures: usize,
    current: ScriptedPage,
    closed: bool,
    actions: Vec<Action>,
}

impl ScriptedSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Page shown after navigating to `url`. Unknown URLs show an empty page.
    pub fn with_page(mut self, url: impl Into<String>, page: ScriptedPage) -> Self {
        self.pages.insert(url.into(), page);
        self
    }

    /// Pages shown after successive clicks on `locator`, in order.
    pub fn on_click(mut self, locator: Locator, pages: impl IntoIterator<Item = ScriptedPage>) -> Self {
        self.transitions.entry(locator).or_default().extend(pages);
        self
    }

    /// Waiting for `locator` times out.
    pub fn missing(mut self, locator: Locator) -> Self {
        self.missing.insert(locator);
        self
    }

    /// Waiting for `locator` raises a driver error.
    pub fn failing(mut self, locator: Locator) -> Self {
        self.failing.insert(locator);
        self
    }

    /// The next `count` navigations fail at the connection level.
    pub fn with_connection_failures(mut self, count: usize) -> Self {
        self.connection_failures = count;
        self
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn close_count(&self) -> usize {
        self.actions.iter().filter(|a| matches!(a, Action::Closed)).count()
    }

    pub fn navigations(&self) -> Vec<String> {
        self.actions
            .iter()
            .filter_map(|a| match a {
                Action::Navigated(url) => Some(url.clone()),
                _ => None,
            })
            .collect()
    }

    /// Text typed into `locator`, in order.
    pub fn typed_into(&self, locator: &Locator) -> Vec<String> {
        self.actions
            .iter()
            .filter_map(|a| match a {
                Action::Typed(l, text) if l == locator => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    fn ensure_open(&self) -> Result<(), BrowserError> {
        if self.closed {
            Err(BrowserError::Closed)
        } else {
            Ok(())
        }
    }
}

impl BrowserSession for ScriptedSession {
    type Element = ScriptedElement;

    fn navigate(&mut self, url: &str) -> Result<(), BrowserError> {
        self.ensure_open()?;
        self.actions.push(Action::Navigated(url.to_string()));
        if self.connection_failures > 0 {
            self.connection_failures -= 1;
            return Err(BrowserError::Connection(format!("net::ERR_CONNECTION_RESET at {url}")));
        }
        self.current = self.pages.get(url).cloned().unwrap_or_default();
        Ok(())
    }

    fn wait_for_visible(&mut self, locator: &Locator, timeout: Duration) -> Result<ScriptedElement, BrowserError> {
        self.ensure_open()?;
        if self.failing.contains(locator) {
            return Err(BrowserError::Driver(format!("stale element {locator}")));
        }
        if self.missing.contains(locator) {
            return Err(BrowserError::Timeout {
                locator: locator.clone(),
                timeout,
            });
        }
        Ok(ScriptedElement {
            locator: locator.clone(),
        })
    }

    fn find_all(&mut self, locator: &Locator) -> Result<Vec<ScriptedElement>, BrowserError> {
        self.ensure_open()?;
        if self.missing.contains(locator) {
            return Ok(Vec::new());
        }
        Ok(vec![ScriptedElement {
            locator: locator.clone(),
        }])
    }

    fn click(&mut self, element: &ScriptedElement) -> Result<(), BrowserError> {
        self.ensure_open()?;
        self.actions.push(Action::Clicked(element.locator.clone()));
        if let Some(next) = self
            .transitions
            .get_mut(&element.locator)
            .and_then(VecDeque::pop_front)
        {
            self.current = next;
        }
        Ok(())
    }

    fn type_text(&mut self, element: &ScriptedElement, text: &str) -> Result<(), BrowserError> {
        self.ensure_open()?;
        self.actions
            .push(Action::Typed(element.locator.clone(), text.to_string()));
        Ok(())
    }

    fn scroll_to_fraction(&mut self, fraction: f64) -> Result<(), BrowserError> {
        self.ensure_open()?;
        self.actions.push(Action::Scrolled(fraction));
        Ok(())
    }

    fn page_source(&mut self) -> Result<String, BrowserError> {
        self.ensure_open()?;
        Ok(self.current.source.clone())
    }

    fn title(&mut self) -> Result<String, BrowserError> {
        self.ensure_open()?;
        Ok(self.current.title.clone())
    }

    fn capture_diagnostic(&mut self, dir: &Path) -> Result<PathBuf, BrowserError> {
        self.ensure_open()?;
        fs::create_dir_all(dir).map_err(|e| BrowserError::Driver(e.to_string()))?;
        let path = dir.join("scripted_session.txt");
        fs::write(&path, &self.current.source).map_err(|e| BrowserError::Driver(e.to_string()))?;
        self.actions.push(Action::Diagnostic(path.clone()));
        Ok(path)
    }

    fn close(&mut self) -> Result<(), BrowserError> {
        if !self.closed {
            self.closed = true;
            self.actions.push(Action::Closed);
        }
        Ok(())
    }
}

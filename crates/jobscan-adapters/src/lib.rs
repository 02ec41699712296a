//! Site adapter contracts and the marketplace adapters built on them.

use chrono::NaiveDate;
use jobscan_core::{ExtractionPolicy, JobDraft, LoginFailure, ProfileDraft};
use jobscan_storage::Locator;
use scraper::{ElementRef, Selector};
use thiserror::Error;

pub mod upwork;

pub use upwork::{upwork_adapter, ProfileSection, UpworkAdapter};

pub const CRATE_NAME: &str = "jobscan-adapters";

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("{0}")]
    Message(String),
    #[error("invalid selector `{selector}`: {reason}")]
    Selector { selector: String, reason: String },
    #[error("employment heading {heading:?} has no `|` between role and employer")]
    MalformedEmploymentHeading { heading: String },
    #[error("profile has {found} sections, {section} section expected at position {position}")]
    MissingProfileSection {
        section: &'static str,
        position: usize,
        found: usize,
    },
}

/// Element locators for each step of the login form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginLocators {
    pub username_field: Locator,
    pub username_submit: Locator,
    pub password_field: Locator,
    pub password_submit: Locator,
    /// Its presence means the secret-answer step is required.
    pub secret_answer_probe: Locator,
    pub secret_answer_field: Locator,
}

/// Everything the login state machine needs to know about a site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginFlow {
    pub login_url: String,
    pub locators: LoginLocators,
    /// Page title of the bot-check interstitial.
    pub challenge_title: &'static str,
    /// Substring of the title while the login page is still shown.
    pub login_title_marker: &'static str,
    /// Error banner text and the failure kind it signals, checked in order.
    pub banners: &'static [(&'static str, LoginFailure)],
}

impl LoginFlow {
    /// First known banner contained in `page_source`.
    pub fn detect_banner(&self, page_source: &str) -> Option<(&'static str, LoginFailure)> {
        self.banners
            .iter()
            .copied()
            .find(|(text, _)| page_source.contains(text))
    }
}

pub trait SiteAdapter: Send + Sync {
    fn site_id(&self) -> &'static str;
    fn base_url(&self) -> &'static str;
    fn login_flow(&self) -> LoginFlow;
    /// Job tiles rendered in the feed after login.
    fn job_tiles(&self) -> Locator;
    /// Element whose presence marks the profile page as loaded.
    fn profile_ready(&self) -> Locator;

    fn parse_listing(&self, html: &str) -> Result<Vec<JobDraft>, AdapterError>;
    fn find_profile_url(&self, html: &str) -> Result<Option<String>, AdapterError>;
    fn parse_profile(
        &self,
        html: &str,
        policy: ExtractionPolicy,
        today: NaiveDate,
    ) -> Result<ProfileDraft, AdapterError>;
}

pub fn adapter_for_site(site_id: &str) -> Option<Box<dyn SiteAdapter>> {
    match site_id {
        "upwork" => Some(Box::new(upwork_adapter())),
        _ => None,
    }
}

/// Prefix a site-relative link (`/jobs/...`) with `base_url`. Absolute and empty
/// links are returned unchanged.
pub fn absolute_url(base_url: &str, link: &str) -> String {
    match link.strip_prefix('/') {
        Some(path) => format!("{}/{}", base_url.trim_end_matches('/'), path),
        None => link.to_string(),
    }
}

pub(crate) fn parse_selector(selector: &str) -> Result<Selector, AdapterError> {
    Selector::parse(selector).map_err(|e| AdapterError::Selector {
        selector: selector.to_string(),
        reason: e.to_string(),
    })
}

/// Each descendant text node trimmed, then concatenated without separators.
pub(crate) fn element_text(element: ElementRef<'_>) -> String {
    element.text().map(str::trim).collect()
}

pub(crate) fn text_or_none(value: String) -> Option<String> {
    let trimmed = value.trim().to_string();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

pub(crate) fn select_first<'a>(scope: ElementRef<'a>, selector: &str) -> Result<Option<ElementRef<'a>>, AdapterError> {
    let sel = parse_selector(selector)?;
    Ok(scope.select(&sel).next())
}

pub(crate) fn select_first_text(scope: ElementRef<'_>, selector: &str) -> Result<Option<String>, AdapterError> {
    Ok(select_first(scope, selector)?.and_then(|n| text_or_none(element_text(n))))
}

/// Text of every match, in document order. Empty texts are kept.
pub(crate) fn select_all_texts(scope: ElementRef<'_>, selector: &str) -> Result<Vec<String>, AdapterError> {
    let sel = parse_selector(selector)?;
    Ok(scope.select(&sel).map(element_text).collect())
}

pub(crate) fn select_first_attr(
    scope: ElementRef<'_>,
    selector: &str,
    attr: &str,
) -> Result<Option<String>, AdapterError> {
    Ok(select_first(scope, selector)?
        .and_then(|n| n.value().attr(attr))
        .map(str::to_string))
}

/// Element children of `scope` (not deeper descendants) matching `selector`.
pub(crate) fn direct_children<'a>(scope: ElementRef<'a>, selector: &str) -> Result<Vec<ElementRef<'a>>, AdapterError> {
    let sel = parse_selector(selector)?;
    Ok(scope
        .children()
        .filter_map(ElementRef::wrap)
        .filter(|child| sel.matches(child))
        .collect())
}

//! Upwork: login flow, job-feed tiles and the freelancer profile page.

use chrono::NaiveDate;
use jobscan_core::{
    EmploymentEntry, ExtractionPolicy, Headline, Identity, JobDraft, LoginFailure, ProfileDraft,
};
use jobscan_storage::Locator;
use regex::Regex;
use scraper::{ElementRef, Html};
use tracing::{info, warn};

use crate::{
    absolute_url, direct_children, element_text, parse_selector, select_all_texts, select_first,
    select_first_attr, select_first_text, text_or_none, AdapterError, LoginFlow, LoginLocators,
    SiteAdapter,
};

pub const SITE_ID: &str = "upwork";
pub const BASE_URL: &str = "https://www.upwork.com/";

pub const CHALLENGE_TITLE: &str = "Just a moment...";

pub const BANNERS: &[(&str, LoginFailure)] = &[
    ("Username is incorrect.", LoginFailure::UsernameIncorrect),
    (
        "Due to technical difficulties we are unable to process your request.",
        LoginFailure::TechnicalDifficulties,
    ),
    ("You need to reset your security question", LoginFailure::SecurityQuestionReset),
];

const JOB_LIST: &str = r#"div[data-test="job-tile-list"]"#;
const PROFILE_ROOT: &str = "div[data-qa-profile-viewer-uid]";
const PROFILE_UID_ATTR: &str = "data-qa-profile-viewer-uid";
const PROFILE_URL_PATTERN: &str = r#"profileUrl:"([^"]+)""#;

/// Separators stripped from the local-time line: the en dash as served
/// (mis-decoded through cp1252) and the en dash itself.
const LOCAL_TIME_ARTIFACTS: &[&str] = &["\u{e2}\u{20ac}\u{201c}", "\u{2013}"];

/// Top-level cards of the profile page, in page order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileSection {
    Identity,
    Headline,
    Mixed,
    Testimonials,
    Certifications,
    EmploymentHistory,
    Experiences,
}

impl ProfileSection {
    pub fn position(self) -> usize {
        match self {
            Self::Identity => 0,
            Self::Headline => 1,
            Self::Mixed => 2,
            Self::Testimonials => 3,
            Self::Certifications => 4,
            Self::EmploymentHistory => 5,
            Self::Experiences => 6,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::Headline => "headline",
            Self::Mixed => "mixed",
            Self::Testimonials => "testimonials",
            Self::Certifications => "certifications",
            Self::EmploymentHistory => "employment-history",
            Self::Experiences => "experiences",
        }
    }
}

/// Positional assumptions about the markup. A layout change on the site should
/// only need an edit here.
mod layout {
    use super::*;

    pub(super) fn job_tiles(container: ElementRef<'_>) -> Result<Vec<ElementRef<'_>>, AdapterError> {
        direct_children(container, "section")
    }

    /// Upper (title, link) and lower (everything else) halves of a tile.
    pub(super) fn tile_regions(tile: ElementRef<'_>) -> Result<Option<(ElementRef<'_>, ElementRef<'_>)>, AdapterError> {
        let halves = direct_children(tile, "div")?;
        Ok(match halves.as_slice() {
            [upper, lower, ..] => Some((*upper, *lower)),
            _ => None,
        })
    }

    pub(super) fn outer_sections(root: ElementRef<'_>) -> Result<Vec<ElementRef<'_>>, AdapterError> {
        direct_children(root, "div.profile-outer-card")
    }

    pub(super) fn section<'a>(
        sections: &[ElementRef<'a>],
        which: ProfileSection,
        policy: ExtractionPolicy,
    ) -> Result<Option<ElementRef<'a>>, AdapterError> {
        match sections.get(which.position()) {
            Some(section) => Ok(Some(*section)),
            None if policy == ExtractionPolicy::Strict => Err(AdapterError::MissingProfileSection {
                section: which.label(),
                position: which.position(),
                found: sections.len(),
            }),
            None => {
                warn!(
                    section = which.label(),
                    found = sections.len(),
                    "profile section missing, skipping"
                );
                Ok(None)
            }
        }
    }

    /// The headline card nests its blocks as direct `section` children; the
    /// first holds role, rate and overview.
    pub(super) fn headline_block(card: ElementRef<'_>) -> Result<Option<ElementRef<'_>>, AdapterError> {
        Ok(direct_children(card, "section")?.into_iter().next())
    }

    /// Element holding the `<start> - <end>` period of the heading's position:
    /// the third child of the heading's great-grandparent.
    pub(super) fn employment_period(heading: ElementRef<'_>) -> Option<ElementRef<'_>> {
        let mut node = heading;
        for _ in 0..3 {
            node = node.parent().and_then(ElementRef::wrap)?;
        }
        node.children().filter_map(ElementRef::wrap).nth(2)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UpworkAdapter;

pub fn upwork_adapter() -> UpworkAdapter {
    UpworkAdapter
}

impl UpworkAdapter {
    fn parse_tile(&self, tile: ElementRef<'_>) -> Result<Option<JobDraft>, AdapterError> {
        let Some((upper, lower)) = layout::tile_regions(tile)? else {
            warn!("job tile without upper and lower regions, skipping");
            return Ok(None);
        };

        let data_test = |name: &str| select_first_text(lower, &format!(r#"[data-test="{name}"]"#));

        let rating = match select_first(lower, r#"[data-test="js-feedback"]"#)? {
            Some(feedback) => select_first_text(feedback, "span.sr-only")?,
            None => None,
        };

        Ok(Some(JobDraft {
            title: select_first_text(upper, ".job-tile-title")?,
            link: select_first_attr(upper, "a", "href")?.map(|href| absolute_url(BASE_URL, &href)),
            job_type: data_test("job-type")?,
            posted_on: data_test("posted-on")?,
            workload: data_test("workload")?,
            budget: data_test("budget")?,
            duration: data_test("duration")?,
            contractor_tier: data_test("contractor-tier")?,
            tier_label: data_test("tier-label")?,
            description: data_test("job-description-text")?,
            verification_status: data_test("verification-status")?,
            skills: select_all_texts(lower, r#"[data-test="attr-item"]"#)?,
            rating,
            spendings: data_test("client-spendings")?,
            country: data_test("client-country")?,
        }))
    }

    fn parse_identity(&self, card: ElementRef<'_>) -> Result<Identity, AdapterError> {
        let Some(container) = select_first(card, "div.identity-container")? else {
            warn!("identity container not found");
            return Ok(Identity::default());
        };

        let local_time = select_first_text(container, "div.time")?
            .map(|raw| {
                let mut cleaned = raw.replace(" local time", "");
                for artifact in LOCAL_TIME_ARTIFACTS {
                    cleaned = cleaned.replace(artifact, "");
                }
                cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
            })
            .unwrap_or_default();

        Ok(Identity {
            name: select_first_text(container, r#"[itemprop="name"]"#)?.unwrap_or_default(),
            picture_url: select_first_attr(card, "img", "src")?.unwrap_or_default(),
            locality: select_first_text(container, r#"[itemprop="locality"]"#)?.unwrap_or_default(),
            country: select_first_text(container, r#"[itemprop="country-name"]"#)?.unwrap_or_default(),
            local_time,
        })
    }

    fn parse_headline(&self, card: ElementRef<'_>) -> Result<Headline, AdapterError> {
        let Some(block) = layout::headline_block(card)? else {
            return Ok(Headline::default());
        };
        Ok(Headline {
            role: select_first_text(block, "h2")?.unwrap_or_default(),
            hourly_rate: select_first_text(block, r#"[role="presentation"]"#)?.unwrap_or_default(),
            overview: select_first_text(block, r#"span[role="text-body"]"#)?.unwrap_or_default(),
        })
    }

    fn parse_employment(
        &self,
        card: ElementRef<'_>,
        policy: ExtractionPolicy,
    ) -> Result<Vec<EmploymentEntry>, AdapterError> {
        let headings = parse_selector("h4")?;
        let mut history = Vec::new();

        for heading in card.select(&headings) {
            let text = element_text(heading);
            let Some((role, employer)) = text.split_once('|') else {
                if policy == ExtractionPolicy::Strict {
                    return Err(AdapterError::MalformedEmploymentHeading { heading: text });
                }
                warn!(heading = %text, "employment heading without role/employer separator, skipping");
                continue;
            };

            let mut entry = EmploymentEntry {
                role: role.trim().to_string(),
                employer: employer.trim().to_string(),
                ..Default::default()
            };

            let period = layout::employment_period(heading).and_then(|el| text_or_none(element_text(el)));
            match period.as_deref().and_then(|p| p.split_once('-')) {
                Some((start, end)) => {
                    entry.initial_period = start.trim().to_string();
                    entry.end_period = end.trim().to_string();
                }
                None => warn!(employer = %entry.employer, period = ?period, "employment period not found"),
            }
            history.push(entry);
        }

        Ok(history)
    }
}

impl SiteAdapter for UpworkAdapter {
    fn site_id(&self) -> &'static str {
        SITE_ID
    }

    fn base_url(&self) -> &'static str {
        BASE_URL
    }

    fn login_flow(&self) -> LoginFlow {
        LoginFlow {
            login_url: format!("{BASE_URL}ab/account-security/login"),
            locators: LoginLocators {
                username_field: Locator::id("login_username"),
                username_submit: Locator::xpath(r#"//button[text()="Continue with Email"]"#),
                password_field: Locator::xpath(r#"//input[@name="login[password]"]"#),
                password_submit: Locator::xpath(r#"//button[text()="Log in"]"#),
                secret_answer_probe: Locator::xpath(r#"//button[text()="Continue"]"#),
                secret_answer_field: Locator::id("login_answer"),
            },
            challenge_title: CHALLENGE_TITLE,
            login_title_marker: "Login",
            banners: BANNERS,
        }
    }

    fn job_tiles(&self) -> Locator {
        Locator::css(format!("{JOB_LIST} > section"))
    }

    fn profile_ready(&self) -> Locator {
        Locator::class_name("profile-outer-card")
    }

    fn parse_listing(&self, html: &str) -> Result<Vec<JobDraft>, AdapterError> {
        let document = Html::parse_document(html);
        let container_sel = parse_selector(JOB_LIST)?;
        let Some(container) = document.select(&container_sel).next() else {
            warn!("job tile list not found in page");
            return Ok(Vec::new());
        };

        let tiles = layout::job_tiles(container)?;
        info!(count = tiles.len(), "captured job tiles");

        let mut drafts = Vec::with_capacity(tiles.len());
        for tile in tiles {
            if let Some(draft) = self.parse_tile(tile)? {
                drafts.push(draft);
            }
        }
        Ok(drafts)
    }

    fn find_profile_url(&self, html: &str) -> Result<Option<String>, AdapterError> {
        info!("discovering profile url in page source");
        let pattern = Regex::new(PROFILE_URL_PATTERN).map_err(|e| AdapterError::Message(e.to_string()))?;
        let Some(raw) = pattern.captures(html).and_then(|c| c.get(1)).map(|m| m.as_str()) else {
            info!("profile url not found");
            return Ok(None);
        };

        // The value sits in a JS string literal, so `/` arrives as `\u002F`.
        let url = serde_json::from_str::<String>(&format!("\"{raw}\"")).unwrap_or_else(|_| raw.to_string());
        info!(url = %url, "profile url found");
        Ok(text_or_none(url))
    }

    fn parse_profile(
        &self,
        html: &str,
        policy: ExtractionPolicy,
        today: NaiveDate,
    ) -> Result<ProfileDraft, AdapterError> {
        let document = Html::parse_document(html);
        let root_sel = parse_selector(PROFILE_ROOT)?;
        let Some(root) = document.select(&root_sel).next() else {
            warn!("profile container not found");
            return Ok(ProfileDraft::default());
        };

        let account = root.value().attr(PROFILE_UID_ATTR).unwrap_or_default();
        let mut draft = ProfileDraft::new(account);

        let sections = layout::outer_sections(root)?;
        info!(count = sections.len(), account, "detected profile sections");

        if let Some(card) = layout::section(&sections, ProfileSection::Identity, policy)? {
            draft.set_identity(self.parse_identity(card)?);
        }
        if let Some(card) = layout::section(&sections, ProfileSection::Headline, policy)? {
            draft.set_headline(self.parse_headline(card)?);
        }
        if let Some(card) = layout::section(&sections, ProfileSection::EmploymentHistory, policy)? {
            let history = self.parse_employment(card, policy)?;
            info!(entries = history.len(), "parsed employment history");
            draft.set_employment_history(history, today);
        }

        Ok(draft)
    }
}

//! Core domain model for jobscan: scraped job/profile records, their builders,
//! employment-history analysis and shape validation.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod employment;
pub mod validation;

pub use employment::{
    derive_employment_facts, parse_period, EmploymentDerivedFacts, EmploymentEntry,
    EmploymentStatus,
};
pub use validation::ValidationError;

pub const CRATE_NAME: &str = "jobscan-core";

/// Account credentials for one marketplace login.
///
/// Backups are consumed in order by the username-rotation strategy.
#[derive(Clone, PartialEq, Eq, Default, Deserialize)]
pub struct Credentials {
    pub username: String,
    #[serde(default)]
    pub username_backup_one: Option<String>,
    #[serde(default)]
    pub username_backup_two: Option<String>,
    pub password: String,
    #[serde(default)]
    pub secret_answer: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("username_backup_one", &self.username_backup_one)
            .field("username_backup_two", &self.username_backup_two)
            .field("password", &"<redacted>")
            .field("secret_answer", &"<redacted>")
            .finish()
    }
}

/// Named failure kinds recognised from error banners on the login page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LoginFailure {
    UsernameIncorrect,
    TechnicalDifficulties,
    SecurityQuestionReset,
}

/// What the extractors do when markup does not have the expected shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExtractionPolicy {
    /// Log and skip the offending fragment.
    #[default]
    Lenient,
    /// Propagate an error.
    Strict,
}

impl FromStr for ExtractionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lenient" => Ok(Self::Lenient),
            "strict" => Ok(Self::Strict),
            other => Err(format!("unknown extraction policy `{other}`")),
        }
    }
}

/// Blast radius of a validation failure during export assembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ValidationPolicy {
    #[default]
    WholeBatch,
    PerRecord,
}

impl FromStr for ValidationPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "batch" | "whole-batch" => Ok(Self::WholeBatch),
            "per-record" | "record" => Ok(Self::PerRecord),
            other => Err(format!("unknown validation policy `{other}`")),
        }
    }
}

/// Job tile fields as found in the markup. `None` means the fragment was absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobDraft {
    pub title: Option<String>,
    pub link: Option<String>,
    pub job_type: Option<String>,
    pub posted_on: Option<String>,
    pub workload: Option<String>,
    pub budget: Option<String>,
    pub duration: Option<String>,
    pub contractor_tier: Option<String>,
    pub tier_label: Option<String>,
    pub description: Option<String>,
    pub verification_status: Option<String>,
    pub skills: Vec<String>,
    pub rating: Option<String>,
    pub spendings: Option<String>,
    pub country: Option<String>,
}

impl JobDraft {
    /// Fill every absent field with an empty value. Never fails.
    pub fn normalize(self) -> JobRecord {
        JobRecord {
            title: self.title.unwrap_or_default(),
            link: self.link.unwrap_or_default(),
            job_type: self.job_type.unwrap_or_default(),
            posted_on: self.posted_on.unwrap_or_default(),
            workload: self.workload.unwrap_or_default(),
            budget: self.budget.unwrap_or_default(),
            duration: self.duration.unwrap_or_default(),
            contractor_tier: self.contractor_tier.unwrap_or_default(),
            tier_label: self.tier_label.unwrap_or_default(),
            description: self.description.unwrap_or_default(),
            verification_status: self.verification_status.unwrap_or_default(),
            skills: self.skills,
            rating: self.rating.unwrap_or_default(),
            spendings: self.spendings.unwrap_or_default(),
            country: self.country.unwrap_or_default(),
        }
    }

    pub fn build(self) -> Result<JobRecord, ValidationError> {
        let record = self.normalize();
        record.validate()?;
        Ok(record)
    }
}

/// Normalized job listing, ready for export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub title: String,
    pub link: String,
    pub job_type: String,
    pub posted_on: String,
    pub workload: String,
    pub budget: String,
    pub duration: String,
    pub contractor_tier: String,
    pub tier_label: String,
    pub description: String,
    pub verification_status: String,
    pub skills: Vec<String>,
    pub rating: String,
    pub spendings: String,
    pub country: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    pub name: String,
    pub picture_url: String,
    pub locality: String,
    pub country: String,
    pub local_time: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headline {
    pub role: String,
    pub hourly_rate: String,
    pub overview: String,
}

/// Profile under construction. Extraction steps fill it in order
/// (identity, headline, employment history) before it is built.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileDraft {
    pub account: Option<String>,
    pub identity: Identity,
    pub headline: Headline,
    pub employment_history: Vec<EmploymentEntry>,
    pub employment: EmploymentDerivedFacts,
}

impl ProfileDraft {
    pub fn new(account: impl Into<String>) -> Self {
        Self {
            account: Some(account.into()),
            ..Default::default()
        }
    }

    pub fn set_identity(&mut self, identity: Identity) {
        self.identity = identity;
    }

    pub fn set_headline(&mut self, headline: Headline) {
        self.headline = headline;
    }

    /// Store the history and derive status, employer, hire and termination dates
    /// relative to `today`.
    pub fn set_employment_history(&mut self, history: Vec<EmploymentEntry>, today: NaiveDate) {
        self.employment = derive_employment_facts(&history, today);
        self.employment_history = history;
    }

    /// True when no profile container was found.
    pub fn is_empty(&self) -> bool {
        self.account.as_deref().map_or(true, str::is_empty)
    }

    pub fn normalize(self) -> ProfileRecord {
        let mut metadata = BTreeMap::new();
        for (key, value) in [
            ("country", self.identity.country),
            ("local_time", self.identity.local_time),
            ("hourly_rate", self.headline.hourly_rate),
            ("overview", self.headline.overview),
        ] {
            if !value.is_empty() {
                metadata.insert(key.to_string(), value);
            }
        }

        ProfileRecord {
            id: Uuid::new_v4(),
            account: self.account.unwrap_or_default(),
            address: Address {
                city: self.identity.locality,
                ..Default::default()
            },
            first_name: String::new(),
            last_name: String::new(),
            full_name: self.identity.name,
            birth_date: String::new(),
            email: String::new(),
            phone_number: String::new(),
            picture_url: self.identity.picture_url,
            employment_status: self.employment.employment_status,
            employment_type: String::new(),
            job_title: self.headline.role,
            ssn: String::new(),
            marital_status: String::new(),
            gender: String::new(),
            hire_date: self.employment.employment_hire_date,
            termination_date: self.employment.employment_termination_date,
            termination_reason: None,
            employer: self.employment.employer,
            base_pay: BasePay::default(),
            pay_cycle: String::new(),
            platform_ids: PlatformIds::default(),
            created_at: Utc::now(),
            updated_at: None,
            metadata,
        }
    }

    pub fn build(self) -> Result<ProfileRecord, ValidationError> {
        let record = self.normalize();
        record.validate()?;
        Ok(record)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub city: String,
    pub line1: String,
    pub line2: String,
    pub postal_code: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasePay {
    pub amount: String,
    pub period: String,
    pub currency: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformIds {
    pub employee_id: String,
    pub position_id: String,
    pub platform_user_id: String,
}

/// Normalized freelancer profile, ready for export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileRecord {
    pub id: Uuid,
    pub account: String,
    pub address: Address,
    pub first_name: String,
    pub last_name: String,
    pub full_name: String,
    pub birth_date: String,
    pub email: String,
    pub phone_number: String,
    pub picture_url: String,
    pub employment_status: Option<EmploymentStatus>,
    pub employment_type: String,
    pub job_title: String,
    pub ssn: String,
    pub marital_status: String,
    pub gender: String,
    pub hire_date: Option<String>,
    pub termination_date: Option<String>,
    pub termination_reason: Option<String>,
    pub employer: Option<String>,
    pub base_pay: BasePay,
    pub pay_cycle: String,
    pub platform_ids: PlatformIds,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub metadata: BTreeMap<String, String>,
}

/// Combined document written to `<site>.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanExport {
    pub jobs: Vec<JobRecord>,
    pub profile: Option<ProfileRecord>,
}

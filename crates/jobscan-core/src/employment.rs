//! Employment status inference from a scraped work history.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// End-period marker of an ongoing position, matched case-insensitively.
pub const PRESENT_MARKER: &str = "present";

/// One position from the employment-history section.
/// Periods are free text such as `January 2023`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmploymentEntry {
    pub role: String,
    pub employer: String,
    pub initial_period: String,
    pub end_period: String,
}

impl EmploymentEntry {
    pub fn is_ongoing(&self) -> bool {
        self.end_period.to_lowercase().contains(PRESENT_MARKER)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmploymentStatus {
    Active,
    Inactive,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmploymentDerivedFacts {
    pub employment_status: Option<EmploymentStatus>,
    pub employer: Option<String>,
    pub employment_hire_date: Option<String>,
    pub employment_termination_date: Option<String>,
}

/// Parse a month-year period (`January 2023`) to the first day of that month.
pub fn parse_period(period: &str) -> Option<NaiveDate> {
    let period = period.trim();
    if period.is_empty() {
        return None;
    }
    NaiveDate::parse_from_str(&format!("1 {period}"), "%d %B %Y").ok()
}

fn iso_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub fn derive_employment_facts(history: &[EmploymentEntry], today: NaiveDate) -> EmploymentDerivedFacts {
    let mut facts = EmploymentDerivedFacts::default();
    if history.is_empty() {
        return facts;
    }

    match history.iter().find(|entry| entry.is_ongoing()) {
        Some(current) => {
            facts.employment_status = Some(EmploymentStatus::Active);
            facts.employer = Some(current.employer.clone());
            facts.employment_hire_date = match parse_period(&current.initial_period) {
                Some(date) => Some(iso_date(date)),
                None => {
                    warn!(period = %current.initial_period, "unrecognised hire period in job history");
                    None
                }
            };
        }
        None => facts.employment_status = Some(EmploymentStatus::Inactive),
    }

    if facts.employment_status != Some(EmploymentStatus::Active) {
        facts.employment_termination_date = last_ended(history, today).map(|(_, date)| iso_date(date));
    }

    facts
}

/// Entry whose end period lies closest to `today`, in either direction.
/// Unparseable end periods are left out of the comparison.
pub fn last_ended(history: &[EmploymentEntry], today: NaiveDate) -> Option<(&EmploymentEntry, NaiveDate)> {
    history
        .iter()
        .filter_map(|entry| match parse_period(&entry.end_period) {
            Some(date) => Some((entry, date)),
            None => {
                warn!(period = %entry.end_period, employer = %entry.employer, "date unrecognizable in job history");
                None
            }
        })
        .min_by_key(|(_, date)| (today - *date).num_days().abs())
}

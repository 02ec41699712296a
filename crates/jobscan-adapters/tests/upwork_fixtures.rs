use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use jobscan_adapters::{adapter_for_site, SiteAdapter};
use jobscan_core::{EmploymentStatus, ExtractionPolicy, JobRecord, ProfileRecord};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct Golden {
    profile_url: String,
    jobs: Vec<JobRecord>,
    profile: GoldenProfile,
}

#[derive(Debug, PartialEq, Deserialize)]
struct GoldenProfile {
    account: String,
    full_name: String,
    picture_url: String,
    city: String,
    job_title: String,
    employment_status: Option<EmploymentStatus>,
    employer: Option<String>,
    hire_date: Option<String>,
    termination_date: Option<String>,
    metadata: BTreeMap<String, String>,
}

impl From<&ProfileRecord> for GoldenProfile {
    fn from(record: &ProfileRecord) -> Self {
        Self {
            account: record.account.clone(),
            full_name: record.full_name.clone(),
            picture_url: record.picture_url.clone(),
            city: record.address.city.clone(),
            job_title: record.job_title.clone(),
            employment_status: record.employment_status,
            employer: record.employer.clone(),
            hire_date: record.hire_date.clone(),
            termination_date: record.termination_date.clone(),
            metadata: record.metadata.clone(),
        }
    }
}

fn sample_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../..")
        .join("fixtures")
        .join("upwork")
        .join("sample")
}

fn read_fixture(name: &str) -> String {
    fs::read_to_string(sample_dir().join(name)).expect("read fixture")
}

fn golden() -> Golden {
    serde_json::from_str(&read_fixture("snapshot.json")).expect("parse snapshot")
}

fn adapter() -> Box<dyn SiteAdapter> {
    adapter_for_site("upwork").expect("upwork adapter")
}

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 16).expect("date")
}

#[test]
fn golden_json_snapshot_test_upwork_jobs() {
    let drafts = adapter().parse_listing(&read_fixture("jobs_page.html")).unwrap();
    assert!(drafts.len() > 1);

    let jobs: Vec<JobRecord> = drafts
        .into_iter()
        .map(|d| d.build().expect("job validates"))
        .collect();
    assert_eq!(jobs, golden().jobs);
}

#[test]
fn profile_url_is_discovered_on_feed_page() {
    let url = adapter()
        .find_profile_url(&read_fixture("jobs_page.html"))
        .unwrap();
    assert_eq!(url, Some(golden().profile_url));
}

#[test]
fn golden_json_snapshot_test_upwork_profile() {
    for policy in [ExtractionPolicy::Lenient, ExtractionPolicy::Strict] {
        let draft = adapter()
            .parse_profile(&read_fixture("profile_page.html"), policy, today())
            .unwrap();
        assert_eq!(draft.employment_history.len(), 2);
        assert_eq!(draft.employment_history[1].initial_period, "January 2021");
        assert_eq!(draft.employment_history[1].end_period, "January 2023");

        let record = draft.build().expect("profile validates");
        assert_eq!(record.account, "1640798106421293056");
        assert_eq!(GoldenProfile::from(&record), golden().profile);
    }
}

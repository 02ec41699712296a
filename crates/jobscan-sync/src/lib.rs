//! Scan orchestration: configuration, login, job feed and profile scraping,
//! and export assembly.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use chrono::Utc;
use jobscan_adapters::{AdapterError, SiteAdapter};
use jobscan_core::{
    Credentials, ExtractionPolicy, JobDraft, ProfileDraft, ScanExport, ValidationError, ValidationPolicy,
};
use jobscan_storage::{
    scroll_feed, BrowserError, BrowserSession, LoadError, NoPacer, Pacer, PageLoader, RandomPacer, SnapshotStore,
};
use thiserror::Error;
use tracing::{error, info, warn};

pub mod login;

pub use login::{LoginAttemptState, LoginStateMachine, LoginStep, MAX_LOGIN_ATTEMPTS};

pub const CRATE_NAME: &str = "jobscan-sync";

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("{url} unreachable after {attempts} attempts")]
    SiteUnreachable { url: String, attempts: usize },
    #[error("{url} did not load within {timeout_secs}s (diagnostic: {diagnostic:?})")]
    PageLoadTimeout {
        url: String,
        timeout_secs: u64,
        diagnostic: Option<PathBuf>,
    },
    #[error("blocked by a bot-check interstitial")]
    BlockedByChallenge,
    #[error("login failed: {0}")]
    LoginFailed(String),
    #[error(transparent)]
    Adapter(#[from] AdapterError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Browser(#[from] BrowserError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<LoadError> for ScanError {
    fn from(err: LoadError) -> Self {
        match err {
            LoadError::Unreachable { url, attempts } => Self::SiteUnreachable { url, attempts },
            LoadError::Blocked { .. } => Self::BlockedByChallenge,
            LoadError::Timeout {
                url,
                timeout,
                diagnostic,
            } => Self::PageLoadTimeout {
                url,
                timeout_secs: timeout.as_secs(),
                diagnostic,
            },
            LoadError::Browser(err) => Self::Browser(err),
        }
    }
}

/// Per-field credential overrides taken from the environment.
#[derive(Debug, Clone, Default)]
pub struct CredentialOverrides {
    pub username: Option<String>,
    pub username_backup_one: Option<String>,
    pub username_backup_two: Option<String>,
    pub password: Option<String>,
    pub secret_answer: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub credentials_path: PathBuf,
    pub credential_overrides: CredentialOverrides,
    pub snapshot_dir: PathBuf,
    pub export_dir: PathBuf,
    pub diagnostics_dir: PathBuf,
    pub log_dir: PathBuf,
    pub element_timeout: Duration,
    pub page_load_timeout: Duration,
    pub page_load_attempts: usize,
    pub extraction_policy: ExtractionPolicy,
    pub validation_policy: ValidationPolicy,
    pub headless: bool,
    pub human_pacing: bool,
    /// Values rejected while reading the configuration. Reported by
    /// [`ScanConfig::report_ignored`] once logging is up.
    pub ignored: Vec<IgnoredSetting>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

/// An environment value that could not be used; the default applies instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IgnoredSetting {
    pub key: &'static str,
    pub value: String,
    pub reason: String,
}

fn flag(key: &'static str, value: Option<String>, default: bool, ignored: &mut Vec<IgnoredSetting>) -> bool {
    let Some(value) = value else {
        return default;
    };
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => {
            ignored.push(IgnoredSetting {
                key,
                reason: format!("expected true or false, using {default}"),
                value,
            });
            default
        }
    }
}

fn policy<T: std::str::FromStr<Err = String> + Default>(
    key: &'static str,
    value: Option<String>,
    ignored: &mut Vec<IgnoredSetting>,
) -> T {
    let Some(value) = value else {
        return T::default();
    };
    match value.parse::<T>() {
        Ok(policy) => policy,
        Err(reason) => {
            ignored.push(IgnoredSetting { key, value, reason });
            T::default()
        }
    }
}

impl ScanConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let path = |key: &str, default: &str| PathBuf::from(lookup(key).unwrap_or_else(|| default.to_string()));
        let secs = |key: &str, default: u64| {
            Duration::from_secs(lookup(key).and_then(|v| v.trim().parse().ok()).unwrap_or(default))
        };

        let mut ignored = Vec::new();
        let extraction_policy = policy(
            "JOBSCAN_EXTRACTION_POLICY",
            lookup("JOBSCAN_EXTRACTION_POLICY"),
            &mut ignored,
        );
        let validation_policy = policy(
            "JOBSCAN_VALIDATION_POLICY",
            lookup("JOBSCAN_VALIDATION_POLICY"),
            &mut ignored,
        );
        let headless = flag("JOBSCAN_HEADLESS", lookup("JOBSCAN_HEADLESS"), true, &mut ignored);
        let human_pacing = flag("JOBSCAN_HUMAN_PACING", lookup("JOBSCAN_HUMAN_PACING"), true, &mut ignored);

        Self {
            credentials_path: path("JOBSCAN_CREDENTIALS", "credentials.yaml"),
            credential_overrides: CredentialOverrides {
                username: lookup("JOBSCAN_USERNAME"),
                username_backup_one: lookup("JOBSCAN_USERNAME_BACKUP_ONE"),
                username_backup_two: lookup("JOBSCAN_USERNAME_BACKUP_TWO"),
                password: lookup("JOBSCAN_PASSWORD"),
                secret_answer: lookup("JOBSCAN_SECRET_ANSWER"),
            },
            snapshot_dir: path("JOBSCAN_SNAPSHOT_DIR", "./files"),
            export_dir: path("JOBSCAN_EXPORT_DIR", "."),
            diagnostics_dir: path("JOBSCAN_DIAGNOSTICS_DIR", "./diagnostics"),
            log_dir: path("JOBSCAN_LOG_DIR", "./logs"),
            element_timeout: secs("JOBSCAN_ELEMENT_TIMEOUT_SECS", 30),
            page_load_timeout: secs("JOBSCAN_PAGE_LOAD_TIMEOUT_SECS", 60),
            page_load_attempts: lookup("JOBSCAN_PAGE_LOAD_ATTEMPTS")
                .and_then(|v| v.trim().parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(4),
            extraction_policy,
            validation_policy,
            headless,
            human_pacing,
            ignored,
        }
    }

    /// Log every rejected configuration value.
    pub fn report_ignored(&self) {
        for setting in &self.ignored {
            warn!(
                key = setting.key,
                value = %setting.value,
                reason = %setting.reason,
                "ignoring invalid setting, using default"
            );
        }
    }

    pub fn page_loader(&self) -> PageLoader {
        PageLoader {
            attempts: self.page_load_attempts,
            timeout: self.page_load_timeout,
            diagnostics_dir: self.diagnostics_dir.clone(),
            challenge_title: None,
        }
    }

    pub fn pacer(&self) -> Box<dyn Pacer> {
        if self.human_pacing {
            Box::new(RandomPacer)
        } else {
            Box::new(NoPacer)
        }
    }

    /// Credentials from the YAML file (when present) with environment overrides
    /// applied on top.
    pub fn load_credentials(&self) -> anyhow::Result<Credentials> {
        let mut credentials = if self.credentials_path.exists() {
            let text = fs::read_to_string(&self.credentials_path)
                .with_context(|| format!("reading {}", self.credentials_path.display()))?;
            serde_yaml::from_str::<Credentials>(&text)
                .with_context(|| format!("parsing {}", self.credentials_path.display()))?
        } else {
            info!(path = %self.credentials_path.display(), "credentials file not found, using environment only");
            Credentials::default()
        };

        let overrides = self.credential_overrides.clone();
        if let Some(v) = overrides.username {
            credentials.username = v;
        }
        if let Some(v) = overrides.username_backup_one {
            credentials.username_backup_one = Some(v);
        }
        if let Some(v) = overrides.username_backup_two {
            credentials.username_backup_two = Some(v);
        }
        if let Some(v) = overrides.password {
            credentials.password = v;
        }
        if let Some(v) = overrides.secret_answer {
            credentials.secret_answer = v;
        }

        if credentials.username.trim().is_empty() || credentials.password.is_empty() {
            bail!(
                "username and password are required (set them in {} or JOBSCAN_USERNAME / JOBSCAN_PASSWORD)",
                self.credentials_path.display()
            );
        }
        Ok(credentials)
    }
}

/// Whatever one run managed to scrape, before validation.
#[derive(Debug, Clone, Default)]
pub struct ScanOutcome {
    pub jobs: Vec<JobDraft>,
    pub profile: Option<ProfileDraft>,
}

impl ScanOutcome {
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty() && self.profile.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedRecord {
    /// `job #<index>` or `profile`.
    pub record: String,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct AssembledExport {
    pub export: ScanExport,
    pub dropped: Vec<DroppedRecord>,
}

/// Validate scraped drafts into an export document.
pub fn assemble_export(outcome: ScanOutcome, policy: ValidationPolicy) -> Result<AssembledExport, ValidationError> {
    let mut jobs = Vec::with_capacity(outcome.jobs.len());
    let mut dropped = Vec::new();

    for (index, draft) in outcome.jobs.into_iter().enumerate() {
        match draft.build() {
            Ok(job) => jobs.push(job),
            Err(source) if policy == ValidationPolicy::WholeBatch => {
                return Err(ValidationError::Job {
                    index,
                    source: Box::new(source),
                })
            }
            Err(source) => {
                warn!(index, error = %source, "dropping invalid job record");
                dropped.push(DroppedRecord {
                    record: format!("job #{index}"),
                    reason: source.to_string(),
                });
            }
        }
    }

    let profile = match outcome.profile.map(ProfileDraft::build) {
        None => None,
        Some(Ok(profile)) => Some(profile),
        Some(Err(err)) if policy == ValidationPolicy::WholeBatch => return Err(err),
        Some(Err(err)) => {
            warn!(error = %err, "dropping invalid profile record");
            dropped.push(DroppedRecord {
                record: "profile".to_string(),
                reason: err.to_string(),
            });
            None
        }
    };

    if !dropped.is_empty() {
        warn!(dropped = dropped.len(), kept = jobs.len(), "records dropped during validation");
    }
    Ok(AssembledExport {
        export: ScanExport { jobs, profile },
        dropped,
    })
}

/// One login-and-scrape run against one site over one browser session.
pub struct ScanPipeline<S: BrowserSession> {
    config: ScanConfig,
    adapter: Box<dyn SiteAdapter>,
    session: S,
    pacer: Box<dyn Pacer>,
    snapshots: SnapshotStore,
}

impl<S: BrowserSession> ScanPipeline<S> {
    pub fn new(config: ScanConfig, adapter: Box<dyn SiteAdapter>, session: S) -> Self {
        let snapshots = SnapshotStore::new(config.snapshot_dir.clone());
        let pacer = config.pacer();
        Self {
            config,
            adapter,
            session,
            pacer,
            snapshots,
        }
    }

    pub fn with_pacer(mut self, pacer: Box<dyn Pacer>) -> Self {
        self.pacer = pacer;
        self
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    /// Run the scan. The browser session is closed on every return path.
    pub fn run(&mut self, credentials: &Credentials) -> Result<ScanOutcome, ScanError> {
        let site = self.adapter.site_id();
        info!(site, "scan started");
        let result = self.scan(credentials);
        if let Err(err) = self.session.close() {
            warn!(site, error = %err, "closing browser session failed");
        }
        match &result {
            Ok(outcome) => info!(
                site,
                jobs = outcome.jobs.len(),
                profile = outcome.profile.is_some(),
                "scan finished"
            ),
            Err(err) => error!(site, error = %err, "scan failed"),
        }
        result
    }

    fn scan(&mut self, credentials: &Credentials) -> Result<ScanOutcome, ScanError> {
        let site = self.adapter.site_id();
        let loader = self
            .config
            .page_loader()
            .with_challenge_title(self.adapter.login_flow().challenge_title);

        let machine = LoginStateMachine::new(
            self.adapter.login_flow(),
            credentials,
            &loader,
            self.pacer.as_ref(),
            self.config.element_timeout,
        );
        if !machine.login(&mut self.session)? {
            error!(site, "login did not complete, nothing scraped");
            return Ok(ScanOutcome::default());
        }

        scroll_feed(&mut self.session, self.pacer.as_ref())?;
        let tiles = self.session.find_all(&self.adapter.job_tiles())?;
        info!(site, count = tiles.len(), "job tiles rendered");

        let feed = self.session.page_source()?;
        self.snapshots.store_html(site, "jobs_page", &feed)?;
        let jobs = self.adapter.parse_listing(&feed)?;
        info!(site, jobs = jobs.len(), "scraped job feed");

        let Some(profile_url) = self.adapter.find_profile_url(&feed)? else {
            warn!(site, "profile url not found, exporting jobs only");
            return Ok(ScanOutcome { jobs, profile: None });
        };

        loader.load(
            &mut self.session,
            self.pacer.as_ref(),
            &profile_url,
            &self.adapter.profile_ready(),
        )?;
        let page = self.session.page_source()?;
        self.snapshots.store_html(site, "profile_page", &page)?;

        let today = Utc::now().date_naive();
        let profile = self
            .adapter
            .parse_profile(&page, self.config.extraction_policy, today)?;
        let profile = if profile.is_empty() {
            warn!(site, url = %profile_url, "profile page had no profile container");
            None
        } else {
            Some(profile)
        };

        Ok(ScanOutcome { jobs, profile })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    fn job(link: &str) -> JobDraft {
        JobDraft {
            title: Some("Scraper".into()),
            link: Some(link.into()),
            ..Default::default()
        }
    }

    #[test]
    fn config_defaults() {
        let config = ScanConfig::default();
        assert_eq!(config.credentials_path, PathBuf::from("credentials.yaml"));
        assert_eq!(config.snapshot_dir, PathBuf::from("./files"));
        assert_eq!(config.element_timeout, Duration::from_secs(30));
        assert_eq!(config.page_load_attempts, 4);
        assert_eq!(config.extraction_policy, ExtractionPolicy::Lenient);
        assert_eq!(config.validation_policy, ValidationPolicy::WholeBatch);
        assert!(config.headless);
        assert!(config.human_pacing);
        assert!(config.ignored.is_empty());
    }

    #[test]
    fn config_reads_overrides() {
        let config = ScanConfig::from_lookup(lookup(&[
            ("JOBSCAN_PAGE_LOAD_TIMEOUT_SECS", "5"),
            ("JOBSCAN_PAGE_LOAD_ATTEMPTS", "0"),
            ("JOBSCAN_EXTRACTION_POLICY", "strict"),
            ("JOBSCAN_VALIDATION_POLICY", "per-record"),
            ("JOBSCAN_HEADLESS", "false"),
            ("JOBSCAN_HUMAN_PACING", "bogus"),
        ]));
        assert_eq!(config.page_loader().timeout, Duration::from_secs(5));
        assert_eq!(config.page_load_attempts, 4);
        assert_eq!(config.extraction_policy, ExtractionPolicy::Strict);
        assert_eq!(config.validation_policy, ValidationPolicy::PerRecord);
        assert!(!config.headless);
        assert!(config.human_pacing);
        let keys: Vec<_> = config.ignored.iter().map(|i| i.key).collect();
        assert_eq!(keys, vec!["JOBSCAN_HUMAN_PACING"]);
    }

    #[test]
    fn rejected_policy_is_kept_for_reporting() {
        let config = ScanConfig::from_lookup(lookup(&[("JOBSCAN_VALIDATION_POLICY", "bogus")]));
        assert_eq!(config.validation_policy, ValidationPolicy::WholeBatch);
        assert_eq!(
            config.ignored,
            vec![IgnoredSetting {
                key: "JOBSCAN_VALIDATION_POLICY",
                value: "bogus".into(),
                reason: "unknown validation policy `bogus`".into(),
            }]
        );
        config.report_ignored();
    }

    #[test]
    fn credentials_merge_file_and_environment() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("credentials.yaml");
        fs::write(
            &path,
            "username: a@example.com\nusername_backup_one: b@example.com\npassword: file-secret\nsecret_answer: Rex\n",
        )
        .expect("write credentials");

        let config = ScanConfig::from_lookup(lookup(&[
            ("JOBSCAN_CREDENTIALS", path.to_str().expect("utf8 path")),
            ("JOBSCAN_PASSWORD", "env-secret"),
        ]));
        let creds = config.load_credentials().expect("credentials");
        assert_eq!(creds.username, "a@example.com");
        assert_eq!(creds.username_backup_one.as_deref(), Some("b@example.com"));
        assert_eq!(creds.username_backup_two, None);
        assert_eq!(creds.password, "env-secret");
        assert!(!format!("{creds:?}").contains("env-secret"));
    }

    #[test]
    fn credentials_require_username_and_password() {
        let config = ScanConfig::from_lookup(lookup(&[
            ("JOBSCAN_CREDENTIALS", "/nonexistent/credentials.yaml"),
            ("JOBSCAN_USERNAME", "a@example.com"),
        ]));
        assert!(config.load_credentials().is_err());
    }

    #[test]
    fn whole_batch_fails_on_first_invalid_job() {
        let outcome = ScanOutcome {
            jobs: vec![job("https://www.upwork.com/jobs/1"), job("/jobs/2"), job("")],
            profile: None,
        };
        let err = assemble_export(outcome, ValidationPolicy::WholeBatch).unwrap_err();
        assert!(matches!(err, ValidationError::Job { index: 1, .. }));
    }

    #[test]
    fn per_record_drops_invalid_jobs_and_keeps_the_rest() {
        let outcome = ScanOutcome {
            jobs: vec![job("https://www.upwork.com/jobs/1"), job(""), job("https://www.upwork.com/jobs/3")],
            profile: Some(ProfileDraft::default()),
        };
        let assembled = assemble_export(outcome, ValidationPolicy::PerRecord).unwrap();
        assert_eq!(assembled.export.jobs.len(), 2);
        assert_eq!(assembled.export.profile, None);
        let records: Vec<_> = assembled.dropped.iter().map(|d| d.record.as_str()).collect();
        assert_eq!(records, vec!["job #1", "profile"]);
    }

    #[test]
    fn load_errors_map_to_scan_errors() {
        let err: ScanError = LoadError::Timeout {
            url: "https://www.upwork.com/".into(),
            timeout: Duration::from_secs(60),
            diagnostic: None,
        }
        .into();
        assert!(matches!(err, ScanError::PageLoadTimeout { timeout_secs: 60, .. }));
    }
}

use std::fs;
use std::path::{Path, PathBuf};

use jobscan_adapters::{adapter_for_site, upwork_adapter, SiteAdapter};
use jobscan_core::{Credentials, ScanExport, ValidationPolicy};
use jobscan_storage::testing::{Action, ScriptedPage, ScriptedSession};
use jobscan_storage::{export_json, load_export, NoPacer, SnapshotStore};
use jobscan_sync::{assemble_export, ScanConfig, ScanError, ScanPipeline};

const PROFILE_URL: &str = "https://www.upwork.com/freelancers/~011cfba3bd0cf44f8d";

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

fn credentials() -> Credentials {
    Credentials {
        username: "primary@example.com".into(),
        username_backup_one: Some("backup1@example.com".into()),
        username_backup_two: None,
        password: "hunter2".into(),
        secret_answer: "Rex".into(),
    }
}

fn config(root: &Path) -> ScanConfig {
    let snapshot_dir = root.join("files");
    let diagnostics_dir = root.join("diagnostics");
    ScanConfig {
        snapshot_dir,
        diagnostics_dir,
        export_dir: root.to_path_buf(),
        human_pacing: false,
        ..ScanConfig::default()
    }
}

/// Login form, then the job feed after "Log in", then the profile page.
fn marketplace(feed_source: String) -> ScriptedSession {
    let flow = upwork_adapter().login_flow();
    ScriptedSession::new()
        .with_page(&flow.login_url, ScriptedPage::new("Upwork Login", "<form></form>"))
        .missing(flow.locators.secret_answer_probe.clone())
        .on_click(
            flow.locators.password_submit.clone(),
            [ScriptedPage::new("Find Work - Upwork", feed_source)],
        )
        .with_page(PROFILE_URL, ScriptedPage::new("Jane Doe - Upwork", read_fixture("profile_page.html")))
}

fn pipeline(root: &Path, session: ScriptedSession) -> ScanPipeline<ScriptedSession> {
    let adapter: Box<dyn SiteAdapter> = adapter_for_site("upwork").expect("upwork adapter");
    ScanPipeline::new(config(root), adapter, session).with_pacer(Box::new(NoPacer))
}

#[test]
fn full_scan_exports_jobs_and_profile() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut pipeline = pipeline(dir.path(), marketplace(read_fixture("jobs_page.html")));

    let outcome = pipeline.run(&credentials()).expect("scan");
    assert!(pipeline.session().is_closed());
    assert!(pipeline
        .session()
        .actions()
        .iter()
        .any(|a| matches!(a, Action::Scrolled(_))));
    assert_eq!(pipeline.session().navigations().last().map(String::as_str), Some(PROFILE_URL));

    let store = SnapshotStore::new(dir.path().join("files"));
    for phase in ["jobs_page", "profile_page"] {
        let path = store.snapshot_path("upwork", phase);
        assert!(path.exists(), "missing snapshot {}", path.display());
    }

    let assembled = assemble_export(outcome, ValidationPolicy::WholeBatch).expect("valid export");
    assert!(assembled.dropped.is_empty());
    assert!(assembled.export.jobs.len() > 1);
    let profile = assembled.export.profile.as_ref().expect("profile");
    assert_eq!(profile.account, "1640798106421293056");

    let path = export_json(dir.path(), "upwork", &assembled.export).expect("export");
    assert_eq!(path, dir.path().join("upwork.json"));
    let back: ScanExport = load_export(&path).expect("load export");
    assert_eq!(back, assembled.export);
}

#[test]
fn missing_profile_url_still_exports_jobs() {
    let dir = tempfile::tempdir().expect("tempdir");
    let feed = read_fixture("jobs_page.html").replace("profileUrl", "profileLink");
    let mut pipeline = pipeline(dir.path(), marketplace(feed));

    let outcome = pipeline.run(&credentials()).expect("scan");
    assert!(outcome.profile.is_none());
    assert!(outcome.jobs.len() > 1);
    assert!(pipeline.session().is_closed());
}

#[test]
fn challenge_page_aborts_and_releases_browser() {
    let dir = tempfile::tempdir().expect("tempdir");
    let flow = upwork_adapter().login_flow();
    let session = ScriptedSession::new().with_page(&flow.login_url, ScriptedPage::new("Just a moment...", ""));
    let mut pipeline = pipeline(dir.path(), session);

    assert!(matches!(pipeline.run(&credentials()), Err(ScanError::BlockedByChallenge)));
    assert_eq!(pipeline.session().close_count(), 1);
}

#[test]
fn challenge_page_without_login_form_is_blocked_not_timed_out() {
    let dir = tempfile::tempdir().expect("tempdir");
    let flow = upwork_adapter().login_flow();
    let session = ScriptedSession::new()
        .with_page(&flow.login_url, ScriptedPage::new("Just a moment...", "<html>checking</html>"))
        .missing(flow.locators.username_field.clone());
    let mut pipeline = pipeline(dir.path(), session);

    assert!(matches!(pipeline.run(&credentials()), Err(ScanError::BlockedByChallenge)));
    assert_eq!(pipeline.session().close_count(), 1);
    assert!(!dir.path().join("diagnostics").exists());
}

#[test]
fn profile_page_timeout_writes_diagnostic() {
    let dir = tempfile::tempdir().expect("tempdir");
    let session = marketplace(read_fixture("jobs_page.html")).missing(upwork_adapter().profile_ready());
    let mut pipeline = pipeline(dir.path(), session);

    match pipeline.run(&credentials()) {
        Err(ScanError::PageLoadTimeout { url, diagnostic, .. }) => {
            assert_eq!(url, PROFILE_URL);
            let path = diagnostic.expect("diagnostic");
            assert!(path.starts_with(dir.path().join("diagnostics")));
        }
        other => panic!("unexpected result: {other:?}"),
    }
    assert!(pipeline.session().is_closed());
}

#[test]
fn failed_login_yields_nothing_to_export() {
    let dir = tempfile::tempdir().expect("tempdir");
    let flow = upwork_adapter().login_flow();
    let session = marketplace(read_fixture("jobs_page.html")).failing(flow.locators.username_submit.clone());
    let mut pipeline = pipeline(dir.path(), session);

    let outcome = pipeline.run(&credentials()).expect("scan");
    assert!(outcome.is_empty());
    assert!(!dir.path().join("files").exists());
}

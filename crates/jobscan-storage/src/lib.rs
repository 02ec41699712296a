//! Browser session plumbing, raw page snapshots and JSON export for jobscan.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::info;

pub mod browser;
pub mod pacing;

#[cfg(feature = "chrome")]
pub mod chrome;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use browser::{scroll_feed, BrowserError, BrowserSession, LoadError, Locator, PageLoader};
pub use pacing::{NoPacer, Pacer, PauseWindow, RandomPacer};

pub const CRATE_NAME: &str = "jobscan-storage";

/// Byte-order mark written ahead of every JSON export.
pub const UTF8_BOM: &str = "\u{feff}";

#[derive(Debug, Clone)]
pub struct StoredSnapshot {
    pub content_hash: String,
    pub path: PathBuf,
    pub byte_size: usize,
}

/// Raw HTML of fetched pages, one file per site and phase.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    root: PathBuf,
}

impl SnapshotStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sha256_hex(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }

    pub fn snapshot_path(&self, site: &str, phase: &str) -> PathBuf {
        self.root.join(format!("{site}_{phase}.html"))
    }

    /// Write `html` to `<root>/<site>_<phase>.html`, replacing the previous run's copy.
    pub fn store_html(&self, site: &str, phase: &str, html: &str) -> anyhow::Result<StoredSnapshot> {
        let path = self.snapshot_path(site, phase);
        write_atomically(&path, html.as_bytes())?;

        let stored = StoredSnapshot {
            content_hash: Self::sha256_hex(html.as_bytes()),
            path,
            byte_size: html.len(),
        };
        info!(
            site,
            phase,
            path = %stored.path.display(),
            bytes = stored.byte_size,
            hash = %stored.content_hash,
            "stored page snapshot"
        );
        Ok(stored)
    }
}

fn write_atomically(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)
        .with_context(|| format!("creating directory {}", parent.display()))?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp_path = parent.join(format!(".{file_name}.{}.tmp", std::process::id()));

    let mut file = fs::File::create(&temp_path)
        .with_context(|| format!("opening temp file {}", temp_path.display()))?;
    file.write_all(bytes)
        .with_context(|| format!("writing temp file {}", temp_path.display()))?;
    file.flush()
        .with_context(|| format!("flushing temp file {}", temp_path.display()))?;
    drop(file);

    if let Err(err) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(err).with_context(|| {
            format!("renaming {} -> {}", temp_path.display(), path.display())
        });
    }
    Ok(())
}

pub fn export_path(dir: &Path, site: &str) -> PathBuf {
    dir.join(format!("{site}.json"))
}

/// Write `value` as 2-space indented JSON to `<dir>/<site>.json`, prefixed with a
/// UTF-8 byte-order mark. Non-ASCII text is kept verbatim.
pub fn export_json<T: Serialize>(dir: &Path, site: &str, value: &T) -> anyhow::Result<PathBuf> {
    let body = serde_json::to_string_pretty(value)
        .with_context(|| format!("serializing {site} export"))?;
    let path = export_path(dir, site);
    write_atomically(&path, format!("{UTF8_BOM}{body}").as_bytes())?;
    info!(site, path = %path.display(), "exported scan results");
    Ok(path)
}

/// Read an export back, tolerating the leading byte-order mark.
pub fn load_export<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading export {}", path.display()))?;
    serde_json::from_str(text.trim_start_matches(UTF8_BOM))
        .with_context(|| format!("parsing export {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::tempdir;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Row {
        title: String,
        skills: Vec<String>,
    }

    #[test]
    fn snapshot_hashing_is_stable() {
        let hash = SnapshotStore::sha256_hex(b"hello world");
        assert_eq!(
            hash,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn snapshots_overwrite_previous_run() {
        let dir = tempdir().expect("tempdir");
        let store = SnapshotStore::new(dir.path().join("files"));

        let first = store.store_html("upwork", "jobs", "<html>old</html>").expect("first");
        let second = store.store_html("upwork", "jobs", "<html>new!</html>").expect("second");

        assert_eq!(first.path, second.path);
        assert_eq!(second.path, dir.path().join("files").join("upwork_jobs.html"));
        assert_ne!(first.content_hash, second.content_hash);
        assert_eq!(second.byte_size, 17);
        assert_eq!(fs::read_to_string(&second.path).expect("read"), "<html>new!</html>");

        let leftovers: Vec<_> = fs::read_dir(store.root())
            .expect("read dir")
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn export_writes_bom_and_pretty_json() {
        let dir = tempdir().expect("tempdir");
        let rows = vec![Row {
            title: "Traducción técnica".into(),
            skills: vec!["Español".into()],
        }];

        let path = export_json(dir.path(), "upwork", &rows).expect("export");
        assert_eq!(path, dir.path().join("upwork.json"));

        let bytes = fs::read(&path).expect("read");
        assert_eq!(&bytes[..3], &[0xEF, 0xBB, 0xBF]);

        let text = String::from_utf8(bytes).expect("utf8");
        assert!(text.contains("\n  {\n    \"title\": \"Traducción técnica\""));

        let back: Vec<Row> = load_export(&path).expect("load");
        assert_eq!(back, rows);
    }
}

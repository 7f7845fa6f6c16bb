use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::browser::BrowserDriver;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Discover,
    Submit,
}

impl Phase {
    fn as_str(&self) -> &'static str {
        match self {
            Phase::Discover => "discover",
            Phase::Submit => "submit",
        }
    }
}

/// Identifies one run's snapshot directory and phase.
#[derive(Debug, Clone, Copy)]
pub struct SnapshotKey<'a> {
    pub job_id: &'a str,
    pub run_id: &'a str,
    pub phase: Phase,
}

/// Debug artifacts (page source and screenshot) for every step of every
/// run, under `<root>/<job_id>/<run_id>/`. Old runs are kept.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    root: PathBuf,
}

impl SnapshotStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn run_dir(&self, job_id: &str, run_id: &str) -> PathBuf {
        self.root.join(job_id).join(run_id)
    }

    /// Writes the given page source and a screenshot if the driver can take
    /// one. Returns the HTML path. Failures are logged, never fatal.
    pub async fn capture(
        &self,
        browser: &dyn BrowserDriver,
        key: SnapshotKey<'_>,
        step: usize,
        tag: &str,
        html: &str,
    ) -> Option<PathBuf> {
        let dir = self.run_dir(key.job_id, key.run_id);
        if let Err(e) = tokio::fs::create_dir_all(&dir).await {
            warn!("Could not create snapshot dir {}: {e}", dir.display());
            return None;
        }
        let stem = format!("{}-step{:02}-{}", key.phase.as_str(), step, tag);
        let html_path = dir.join(format!("{stem}.html"));
        if let Err(e) = tokio::fs::write(&html_path, html).await {
            warn!("Could not write snapshot {}: {e}", html_path.display());
            return None;
        }

        match browser.screenshot().await {
            Ok(Some(png)) => write_png(&dir.join(format!("{stem}.png")), &png).await,
            Ok(None) => {}
            Err(e) => debug!("Screenshot unavailable for {stem}: {e}"),
        }
        Some(html_path)
    }
}

async fn write_png(path: &Path, png: &[u8]) {
    if let Err(e) = tokio::fs::write(path, png).await {
        warn!("Could not write screenshot {}: {e}", path.display());
    }
}

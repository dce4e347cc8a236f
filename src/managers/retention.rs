//! Age-based pruning of backup directories

use crate::config::RetentionPolicy;
use crate::error::Result;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

const SECS_PER_DAY: u64 = 86_400;

/// What a sweep removed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub deleted: Vec<PathBuf>,
    pub kept: usize,
}

pub struct RetentionSweeper {
    policy: RetentionPolicy,
}

impl RetentionSweeper {
    pub fn new(policy: RetentionPolicy) -> Self {
        Self { policy }
    }

    /// Delete every directory under `root` last modified before
    /// `now - days`. Plain files are never touched; `keep_latest` newest
    /// directories survive regardless of age.
    pub fn sweep(&self, root: &Path, now: SystemTime) -> Result<SweepReport> {
        if !root.is_dir() {
            debug!("Retention root {:?} does not exist, nothing to sweep", root);
            return Ok(SweepReport::default());
        }

        let cutoff = now
            .checked_sub(Duration::from_secs(u64::from(self.policy.days) * SECS_PER_DAY))
            .unwrap_or(SystemTime::UNIX_EPOCH);

        let mut dirs: Vec<(PathBuf, SystemTime)> = Vec::new();
        for entry in fs::read_dir(root)? {
            let entry = entry?;
            let metadata = entry.metadata()?;
            if !metadata.is_dir() {
                continue;
            }
            dirs.push((entry.path(), metadata.modified()?));
        }

        // Newest first
        dirs.sort_by(|a, b| b.1.cmp(&a.1));

        let mut report = SweepReport::default();
        for (index, (path, modified)) in dirs.into_iter().enumerate() {
            if index < self.policy.keep_latest || modified >= cutoff {
                report.kept += 1;
                continue;
            }
            match fs::remove_dir_all(&path) {
                Ok(()) => {
                    debug!("Removed expired backup {:?}", path);
                    report.deleted.push(path);
                }
                Err(e) => {
                    warn!("Failed to remove expired backup {:?}: {}", path, e);
                    return Err(e.into());
                }
            }
        }

        info!(
            "Retention ({} days): removed {} backup(s), kept {}",
            self.policy.days,
            report.deleted.len(),
            report.kept
        );
        Ok(report)
    }
}

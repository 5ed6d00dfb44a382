//! Session directory cleanup for logout teardown.
//!
//! Deletes each directory tree bottom-up. Files get a bounded retry with fixed
//! backoff (the transport may still hold handles for a moment); anything that
//! stays locked is logged and skipped. Cleanup never fails as a whole.

use std::path::{Path, PathBuf};

use parley_core::retry::{best_effort, RetryPolicy};
use walkdir::WalkDir;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanupReport {
    pub removed_files: usize,
    pub skipped_files: usize,
    pub removed_dirs: usize,
    pub skipped_dirs: usize,
}

pub async fn remove_session_dirs(dirs: &[PathBuf], policy: RetryPolicy) -> CleanupReport {
    let mut report = CleanupReport::default();
    for dir in dirs {
        remove_tree(dir, policy, &mut report).await;
    }
    report
}

async fn remove_tree(root: &Path, policy: RetryPolicy, report: &mut CleanupReport) {
    if !tokio::fs::try_exists(root).await.unwrap_or(false) {
        tracing::debug!(path = %root.display(), "Session directory absent, nothing to remove");
        return;
    }

    let walk_root = root.to_path_buf();
    let entries = match tokio::task::spawn_blocking(move || collect_entries(&walk_root)).await {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(path = %root.display(), error = %e, "Session directory walk aborted");
            return;
        }
    };

    remove_entries(entries, policy, report).await;
}

/// Remove entries in order. A failure is counted and logged; later entries
/// are still attempted.
pub async fn remove_entries(entries: Vec<(PathBuf, bool)>, policy: RetryPolicy, report: &mut CleanupReport) {
    for (path, is_dir) in entries {
        if is_dir {
            match tokio::fs::remove_dir(&path).await {
                Ok(()) => report.removed_dirs += 1,
                Err(e) => {
                    report.skipped_dirs += 1;
                    tracing::warn!(path = %path.display(), error = %e, "Skipping directory");
                }
            }
            continue;
        }

        let operation = format!("remove {}", path.display());
        match best_effort(&operation, policy, || tokio::fs::remove_file(&path)).await {
            Some(()) => report.removed_files += 1,
            None => report.skipped_files += 1,
        }
    }
}

/// Children before parents, so directories are empty by the time we reach them.
fn collect_entries(root: &Path) -> Vec<(PathBuf, bool)> {
    WalkDir::new(root)
        .contents_first(true)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(e) => Some((e.path().to_path_buf(), e.file_type().is_dir())),
            Err(err) => {
                tracing::warn!(error = %err, "Unreadable entry in session directory");
                None
            }
        })
        .collect()
}

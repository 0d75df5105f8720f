use std::{fmt, time::Duration};

use serde::Serialize;

use crate::{directory::Directory, error::Error, remote::RemoteEntry};

/// Why a directory's backup did not complete.
#[derive(Debug)]
pub enum Failure {
    Archive(Error),
    Upload(Error),
    Cancelled,
    Crashed,
}

impl Failure {
    pub fn kind(&self) -> &'static str {
        match self {
            Failure::Archive(_) => "archive",
            Failure::Upload(_) => "upload",
            Failure::Cancelled => "cancelled",
            Failure::Crashed => "crashed",
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Failure::Archive(err) => write!(f, "archive failed: {err}"),
            Failure::Upload(err) => write!(f, "upload failed: {err}"),
            Failure::Cancelled => f.write_str("cancelled"),
            Failure::Crashed => f.write_str("crashed"),
        }
    }
}

#[derive(Debug)]
pub struct Backup {
    pub entry: RemoteEntry,
    pub size: u64,
    pub cleanup: Cleanup,
}

#[derive(Debug)]
pub enum Cleanup {
    Disabled,
    /// The run was cancelled after uploading.
    Skipped,
    Completed(CleanupReport),
}

impl Cleanup {
    pub fn deleted(&self) -> &[RemoteEntry] {
        match self {
            Cleanup::Completed(report) => &report.deleted,
            _ => &[],
        }
    }

    pub fn warnings(&self) -> &[CleanupWarning] {
        match self {
            Cleanup::Completed(report) => &report.warnings,
            _ => &[],
        }
    }
}

#[derive(Debug, Default)]
pub struct CleanupReport {
    pub deleted: Vec<RemoteEntry>,
    pub warnings: Vec<CleanupWarning>,
}

#[derive(Debug)]
pub enum CleanupWarning {
    List(Error),
    Delete { entry: RemoteEntry, error: Error },
}

impl fmt::Display for CleanupWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CleanupWarning::List(err) => write!(f, "failed to list previous backups: {err}"),
            CleanupWarning::Delete { entry, error } => {
                write!(f, "failed to delete {}: {error}", entry.name)
            }
        }
    }
}

#[derive(Debug)]
pub struct BackupOutcome {
    pub directory: Directory,
    pub result: Result<Backup, Failure>,
}

impl BackupOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

#[derive(Debug)]
pub struct RunReport {
    pub outcomes: Vec<BackupOutcome>,
    pub elapsed: Duration,
}

impl RunReport {
    /// Cleanup warnings don't count as failures.
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(BackupOutcome::is_success)
    }

    pub fn stats(&self) -> RunStats {
        let mut stats = RunStats {
            elapsed_ms: self.elapsed.as_millis().try_into().unwrap_or(u64::MAX),
            ..RunStats::default()
        };

        for outcome in &self.outcomes {
            match &outcome.result {
                Ok(backup) => {
                    stats.archives_uploaded += 1;
                    stats.bytes_uploaded += backup.size;
                    stats.entries_deleted += backup.cleanup.deleted().len() as u64;
                    stats.warnings += backup.cleanup.warnings().len() as u64;
                }
                Err(_) => stats.failures += 1,
            }
        }

        stats
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    pub archives_uploaded: u64,
    pub bytes_uploaded: u64,
    pub entries_deleted: u64,
    pub failures: u64,
    pub warnings: u64,
    pub elapsed_ms: u64,
}

impl RunStats {
    pub fn elapsed(&self) -> Duration {
        Duration::from_millis(self.elapsed_ms)
    }
}

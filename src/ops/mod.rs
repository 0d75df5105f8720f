mod outcome;
mod unit;

use std::{sync::Arc, time::Duration};

use log::error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{
    archive::Archiver,
    config::{DEFAULT_DELETE_TIMEOUT, DEFAULT_UPLOAD_TIMEOUT},
    credential::CredentialStore,
    directory::Directory,
    error::Result,
    remote::SharedStore,
    task::BoundedJoinSet,
};

pub use self::{
    outcome::{
        Backup, BackupOutcome, Cleanup, CleanupReport, CleanupWarning, Failure, RunReport,
        RunStats,
    },
    unit::{BackupUnit, Stage},
};

pub const DEFAULT_JOBS: usize = 4;

#[derive(Clone, Debug)]
pub struct RunOptions {
    /// Delete older remote entries after each upload
    pub cleanup: bool,
    pub jobs: usize,
    pub upload_timeout: Duration,
    pub delete_timeout: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        RunOptions {
            cleanup: true,
            jobs: DEFAULT_JOBS,
            upload_timeout: DEFAULT_UPLOAD_TIMEOUT,
            delete_timeout: DEFAULT_DELETE_TIMEOUT,
        }
    }
}

/// Everything the units of one run share.
#[derive(Debug)]
pub struct BackupState {
    pub options: RunOptions,
    pub archiver: Archiver,
    pub store: SharedStore,
    pub credentials: Arc<CredentialStore>,
    pub cancel: CancellationToken,
}

pub struct Orchestrator {
    state: Arc<BackupState>,
}

impl Orchestrator {
    pub fn new(state: BackupState) -> Self {
        Orchestrator {
            state: Arc::new(state),
        }
    }

    /// Backs up every directory and returns one outcome per directory, in
    /// input order. Fails only if no credential is available, in which case
    /// nothing is dispatched.
    pub async fn run(&self, directories: Vec<Directory>) -> Result<RunReport> {
        let start = Instant::now();
        self.state.credentials.obtain().await?;

        let jobs = self.state.options.jobs.min(directories.len());
        let mut tasks = BoundedJoinSet::new(jobs);
        for (index, directory) in directories.iter().enumerate() {
            let unit = BackupUnit::new(self.state.clone(), directory.clone());
            tasks.spawn(async move { (index, unit.execute().await) }).await?;
        }

        let mut slots = directories.iter().map(|_| None).collect::<Vec<_>>();
        while let Some(result) = tasks.join_next().await {
            match result {
                Ok((index, outcome)) => slots[index] = Some(outcome),
                Err(err) => error!("backup task crashed: {err}"),
            }
        }

        let outcomes = directories
            .into_iter()
            .zip(slots)
            .map(|(directory, slot)| {
                slot.unwrap_or_else(|| BackupOutcome {
                    directory,
                    result: Err(Failure::Crashed),
                })
            })
            .collect();

        Ok(RunReport {
            outcomes,
            elapsed: start.elapsed(),
        })
    }
}

use std::{future::Future, sync::Arc, time::Duration};

use clap::builder::styling::AnsiColor;
use log::{debug, info, warn};
use tokio::time::timeout;

use crate::{
    archive::ArchiveFile,
    directory::Directory,
    error::{Error, Result},
    format::{format_path, format_size, format_time},
    remote::{RemoteEntry, RemoteStore},
    retention,
};

use super::{
    outcome::{Backup, BackupOutcome, Cleanup, CleanupReport, CleanupWarning, Failure},
    BackupState,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Pending,
    Archiving,
    Uploading,
    CleaningUp,
    Done,
    Failed,
}

/// Backs up a single directory: archive, upload, then optionally delete the
/// older remote entries. Failures never leave this directory's unit.
pub struct BackupUnit {
    state: Arc<BackupState>,
    directory: Directory,
    stage: Stage,
}

impl BackupUnit {
    pub fn new(state: Arc<BackupState>, directory: Directory) -> Self {
        BackupUnit {
            state,
            directory,
            stage: Stage::Pending,
        }
    }

    pub async fn execute(mut self) -> BackupOutcome {
        let result = self.run().await;
        match &result {
            Ok(_) => self.enter(Stage::Done),
            Err(failure) => {
                self.enter(Stage::Failed);
                warn!("{}: {failure}", self.directory);
            }
        }

        BackupOutcome {
            directory: self.directory,
            result,
        }
    }

    fn enter(&mut self, stage: Stage) {
        debug!("{}: {:?} -> {stage:?}", self.directory, self.stage);
        self.stage = stage;
    }

    async fn run(&mut self) -> std::result::Result<Backup, Failure> {
        if self.state.cancel.is_cancelled() {
            return Err(Failure::Cancelled);
        }

        self.enter(Stage::Archiving);
        let archive = match self
            .state
            .archiver
            .archive(&self.directory, &self.state.cancel)
            .await
        {
            Ok(archive) => archive,
            Err(Error::Interrupted) => return Err(Failure::Cancelled),
            Err(err) => return Err(Failure::Archive(err)),
        };

        let style = AnsiColor::Green.on_default();
        info!(
            "{style}archived{style:#} {} ({})",
            self.directory,
            format_size(archive.size)
        );

        let result = self.upload_and_clean(&archive).await;

        let path = archive.path.clone();
        if let Err(err) = archive.remove().await {
            warn!("failed to remove archive {}: {err}", format_path(&path));
        }

        result
    }

    async fn upload_and_clean(
        &mut self,
        archive: &ArchiveFile,
    ) -> std::result::Result<Backup, Failure> {
        if self.state.cancel.is_cancelled() {
            return Err(Failure::Cancelled);
        }

        self.enter(Stage::Uploading);
        let store = &self.state.store;
        let directory = &self.directory;
        let upload_timeout = self.state.options.upload_timeout;
        let entry = self
            .authorized(move |token| async move {
                with_timeout(upload_timeout, store.upload(archive, directory, &token)).await
            })
            .await
            .map_err(Failure::Upload)?;

        let style = AnsiColor::Blue.on_default();
        info!("{style}uploaded{style:#} {}", entry.name);

        let cleanup = if !self.state.options.cleanup {
            Cleanup::Disabled
        } else if self.state.cancel.is_cancelled() {
            warn!("{}: skipping cleanup after cancellation", self.directory);
            Cleanup::Skipped
        } else {
            self.enter(Stage::CleaningUp);
            Cleanup::Completed(self.clean(&entry).await)
        };

        Ok(Backup {
            entry,
            size: archive.size,
            cleanup,
        })
    }

    async fn clean(&self, just_created: &RemoteEntry) -> CleanupReport {
        let mut report = CleanupReport::default();
        let store = &self.state.store;
        let directory = &self.directory;
        let delete_timeout = self.state.options.delete_timeout;

        let listed = self
            .authorized(move |token| async move {
                with_timeout(delete_timeout, store.list(directory, &token)).await
            })
            .await;
        let entries = match listed {
            Ok(entries) => entries,
            Err(err) => {
                let warning = CleanupWarning::List(err);
                warn!("{}: {warning}", self.directory);
                report.warnings.push(warning);
                return report;
            }
        };

        let style = AnsiColor::Red.on_default();
        for entry in retention::select(entries, just_created) {
            let id = entry.id.as_str();
            let deleted = self
                .authorized(move |token| async move {
                    with_timeout(delete_timeout, store.delete(id, &token)).await
                })
                .await;

            match deleted {
                Ok(()) => {
                    info!(
                        "{style}deleted{style:#} {} (from {})",
                        entry.name,
                        format_time(&entry.created)
                    );
                    report.deleted.push(entry);
                }
                Err(error) => {
                    let warning = CleanupWarning::Delete { entry, error };
                    warn!("{}: {warning}", self.directory);
                    report.warnings.push(warning);
                }
            }
        }

        report
    }

    /// Runs `operation` with the current access token. If the remote side
    /// rejects it, the token is refreshed once and the operation retried.
    async fn authorized<T, F, Fut>(&self, operation: F) -> Result<T>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let credentials = &self.state.credentials;
        let token = credentials.access().await?;
        match operation(token.clone()).await {
            Err(Error::AuthExpired) => {
                debug!("{}: access token rejected, refreshing", self.directory);
                let token = credentials.refresh_stale(&token).await?;
                operation(token).await
            }
            result => result,
        }
    }
}

async fn with_timeout<T>(limit: Duration, future: impl Future<Output = Result<T>>) -> Result<T> {
    timeout(limit, future)
        .await
        .unwrap_or_else(|_| Err(Error::Timeout(limit)))
}

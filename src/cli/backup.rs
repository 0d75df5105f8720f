use std::{process, sync::Arc};

use async_stream::stream;
use clap::builder::styling::AnsiColor;
use log::{error, log, warn, Level};
use tokio::signal;
use tokio_stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::{
    archive::Archiver,
    config::Config,
    credential::{CredentialStore, GoogleOAuth},
    directory::resolve_directories,
    error::Result,
    format::{format_elapsed, format_size},
    ops::{BackupState, Orchestrator, RunOptions, RunReport},
    remote::DriveStore,
};

use super::{
    args::{BackupArgs, StatsType},
    print_stat, print_stats_json, EXIT_INTERRUPTED,
};

pub async fn main(args: BackupArgs, config: &Config) -> Result<RunReport> {
    let folders = if args.folders.is_empty() {
        &config.folders_for_backup
    } else {
        &args.folders
    };
    let directories = resolve_directories(folders)?;

    let defaults = RunOptions::default();
    let options = RunOptions {
        cleanup: !args.no_backup_clean,
        jobs: args.jobs.or(config.jobs).unwrap_or(defaults.jobs),
        upload_timeout: config.upload_timeout(),
        delete_timeout: config.delete_timeout(),
    };

    let credentials =
        CredentialStore::open(config.token_path()?, Arc::new(GoogleOAuth::new()?)).await?;
    let store = DriveStore::new(config.google_drive_backup_folder_id.clone())?;
    let archiver = Archiver::new(
        config.temp_dir(),
        &config.exclude_folder_names,
        config.compression_level(),
    );

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        let signals = Box::pin(stream! {
            while signal::ctrl_c().await.is_ok() {
                yield ();
            }
        });
        if handle_interrupts(signals, interrupt).await {
            process::exit(EXIT_INTERRUPTED.into());
        }
    });

    let orchestrator = Orchestrator::new(BackupState {
        options,
        archiver,
        store: Arc::new(store),
        credentials: Arc::new(credentials),
        cancel,
    });
    let report = orchestrator.run(directories).await?;

    print_summary(&report);
    match args.stats {
        Some(StatsType::Basic) => {
            let stats = report.stats();
            print_stat("archives uploaded", stats.archives_uploaded);
            print_stat("bytes uploaded", format_size(stats.bytes_uploaded));
            print_stat("backups deleted", stats.entries_deleted);
            print_stat("failures", stats.failures);
            print_stat("warnings", stats.warnings);
            print_stat("elapsed time", format_elapsed(stats.elapsed()));
        }
        Some(StatsType::Json) => print_stats_json(&report.stats())?,
        None => {}
    }

    Ok(report)
}

/// Cancels the run on the first signal. Returns `true` once a second signal
/// arrives, when the caller should stop without waiting for uploads.
async fn handle_interrupts<S>(mut signals: S, cancel: CancellationToken) -> bool
where
    S: Stream<Item = ()> + Unpin,
{
    if signals.next().await.is_none() {
        return false;
    }
    warn!("interrupted; letting uploads in progress finish (interrupt again to quit now)");
    cancel.cancel();

    if signals.next().await.is_none() {
        return false;
    }
    error!("interrupted again; quitting");
    true
}

fn print_summary(report: &RunReport) {
    for (level, line) in summary_lines(report) {
        log!(level, "{line}");
    }
}

/// One line per directory plus its cleanup warnings. Failures are logged as
/// errors so `-q` still shows them.
fn summary_lines(report: &RunReport) -> Vec<(Level, String)> {
    let mut lines = vec![];
    for outcome in &report.outcomes {
        match &outcome.result {
            Ok(backup) => {
                let style = AnsiColor::Green.on_default();
                let deleted = backup.cleanup.deleted().len();
                lines.push((
                    Level::Info,
                    format!(
                        "{style}ok{style:#} {} -> {} ({}, {deleted} older deleted)",
                        outcome.directory,
                        backup.entry.name,
                        format_size(backup.size),
                    ),
                ));
                for warning in backup.cleanup.warnings() {
                    lines.push((Level::Warn, format!("{}: {warning}", outcome.directory)));
                }
            }
            Err(failure) => {
                lines.push((
                    Level::Error,
                    format!(
                        "{} failed ({}): {failure}",
                        outcome.directory,
                        failure.kind()
                    ),
                ));
            }
        }
    }
    lines
}

mod args;
mod backup;
mod parse;
mod token;

use std::{fmt::Display, path::Path, process::ExitCode};

use clap::{
    builder::{styling::AnsiColor, Styles},
    ColorChoice, Parser,
};
use env_logger::WriteStyle;
use log::{error, warn, LevelFilter};
use serde::Serialize;

use crate::{
    config::Config,
    error::{Error, Result},
    logger,
};

use self::args::{BackupArgs, GlobalArgs, LoggerArgs};

/// All directories were backed up.
const EXIT_SUCCESS: u8 = 0;
/// At least one directory failed.
const EXIT_BACKUP_FAILED: u8 = 1;
const EXIT_AUTH: u8 = 2;
const EXIT_FATAL: u8 = 3;
/// Interrupted twice; uploads in progress were abandoned.
const EXIT_INTERRUPTED: u8 = 130;

/// Back up folders to Google Drive
#[derive(Parser, Debug)]
#[command(name = "run-backup", version, about, long_about = None, styles = cli_styles())]
struct Cli {
    /// Run the authorization flow and save a new token instead of backing up
    #[arg(long, conflicts_with_all = ["folders", "no_backup_clean", "jobs", "stats"])]
    fetch_token: bool,

    #[command(flatten)]
    backup: BackupArgs,

    #[command(flatten)]
    global: GlobalArgs,
}

pub async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = Config::load(cli.global.config.as_deref());
    let log_file = config
        .as_ref()
        .ok()
        .and_then(|config| config.log_file.as_deref());
    if let Err(err) = init_logger(&cli.global.logger, log_file) {
        warn!("not writing a log file: {err}");
    }

    let result = match config {
        Ok(config) => run(cli, &config).await,
        Err(err) => Err(err),
    };
    let status = match result {
        Ok(status) => status,
        Err(err) => {
            error!("{err}");
            exit_status(&err)
        }
    };
    ExitCode::from(status)
}

async fn run(cli: Cli, config: &Config) -> Result<u8> {
    if cli.fetch_token {
        token::main(config).await?;
        return Ok(EXIT_SUCCESS);
    }

    let report = backup::main(cli.backup, config).await?;
    Ok(if report.is_success() {
        EXIT_SUCCESS
    } else {
        EXIT_BACKUP_FAILED
    })
}

fn exit_status(err: &Error) -> u8 {
    match err {
        Error::AuthRequired(_) | Error::AuthFlowFailed(_) => EXIT_AUTH,
        _ => EXIT_FATAL,
    }
}

fn init_logger(args: &LoggerArgs, log_file: Option<&Path>) -> Result<()> {
    let level = log_level_from_args(args.verbose, args.quiet);
    let style = match args.color {
        ColorChoice::Auto => WriteStyle::Auto,
        ColorChoice::Always => WriteStyle::Always,
        ColorChoice::Never => WriteStyle::Never,
    };
    logger::init(level, style, log_file)
}

fn log_level_from_args(verbose: u8, quiet: u8) -> LevelFilter {
    let verbosity = i16::from(verbose) - i16::from(quiet);
    match verbosity {
        ..=-2 => LevelFilter::Error,
        -1 => LevelFilter::Warn,
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

fn cli_styles() -> Styles {
    Styles::styled()
        .header(AnsiColor::BrightMagenta.on_default())
        .usage(AnsiColor::BrightMagenta.on_default())
        .literal(AnsiColor::BrightBlue.on_default())
        .placeholder(AnsiColor::BrightCyan.on_default())
}

fn print_stat<T: Display>(name: &str, value: T) {
    let style = AnsiColor::Cyan.on_default();
    println!("{style}{name}:{style:#} {value}");
}

fn print_stats_json<T: Serialize>(stats: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(stats)?;
    println!("{json}");
    Ok(())
}

use std::{ops::RangeInclusive, path::PathBuf};

use clap::{ArgAction, Args, ColorChoice, ValueEnum};

use super::parse::parse_range_inclusive;

const JOB_COUNT_RANGE: RangeInclusive<usize> = 1..=64;

fn parse_job_count(s: &str) -> Result<usize, String> {
    parse_range_inclusive(s, JOB_COUNT_RANGE)
}

#[derive(Args, Debug)]
pub struct BackupArgs {
    /// Folders to back up (overrides the config file)
    #[arg(short = 'f', long, value_name = "PATH", num_args = 1..)]
    pub folders: Vec<PathBuf>,

    /// Keep older backups on Drive instead of deleting them
    #[arg(long, default_value_t = false)]
    pub no_backup_clean: bool,

    /// Number of folders to back up at once
    #[arg(short = 'j', long, value_name = "NUM", value_parser = parse_job_count)]
    pub jobs: Option<usize>,

    /// Print stats after completion
    #[arg(long, value_name = "FORMAT")]
    pub stats: Option<StatsType>,
}

#[derive(Args, Debug)]
pub struct GlobalArgs {
    /// Config file (default: $GDRIVE_BACKUP_CONFIG or the user config dir)
    #[arg(short = 'c', long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub logger: LoggerArgs,
}

#[derive(Args, Debug)]
pub struct LoggerArgs {
    /// When to use color in output
    #[arg(long, value_name = "WHEN", default_value_t = ColorChoice::Auto)]
    pub color: ColorChoice,

    /// Print more output
    #[arg(short, long, action = ArgAction::Count, group = "verbosity")]
    pub verbose: u8,

    /// Print less output
    #[arg(short, long, action = ArgAction::Count, group = "verbosity")]
    pub quiet: u8,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum StatsType {
    Basic,
    Json,
}

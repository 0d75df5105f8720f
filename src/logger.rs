use std::{
    fs::{self, File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
};

use chrono::Local;
use env_logger::{fmt::Formatter, Builder, Logger, Target, WriteStyle};
use log::{Level, LevelFilter, Log, Metadata, Record};

use crate::error::{Error, Result};

/// A log file at least this large is moved aside to `<name>.1` on startup.
pub const MAX_LOG_FILE_SIZE: u64 = 20 * 1024 * 1024;

/// Installs the global logger. Console output follows `level`; the optional
/// log file always records at least info. If the log file cannot be opened,
/// console logging is still installed and the error is returned.
pub fn init(level: LevelFilter, style: WriteStyle, log_file: Option<&Path>) -> Result<()> {
    let console = console_builder(level).write_style(style).build();
    let (file, opened) = match log_file.map(|path| open_log_file(path, MAX_LOG_FILE_SIZE)) {
        Some(Ok(file)) => (Some(file_logger(file, level)), Ok(())),
        Some(Err(err)) => (None, Err(err)),
        None => (None, Ok(())),
    };

    let logger = Tee { console, file };
    log::set_max_level(logger.max_level());
    log::set_boxed_logger(Box::new(logger)).map_err(Error::other)?;
    opened
}

fn console_builder(level: LevelFilter) -> Builder {
    let mut builder = Builder::new();
    builder.format(format).filter_level(level);
    quiet_http(&mut builder);
    builder
}

fn file_logger(file: File, level: LevelFilter) -> Logger {
    let mut builder = Builder::new();
    builder
        .format(file_format)
        .filter_level(level.max(LevelFilter::Info))
        .write_style(WriteStyle::Never)
        .target(Target::Pipe(Box::new(file)));
    quiet_http(&mut builder);
    builder.build()
}

fn quiet_http(builder: &mut Builder) {
    builder
        .filter_module("reqwest", LevelFilter::Warn)
        .filter_module("hyper_util", LevelFilter::Warn);
}

/// Opens `path` for appending, first moving it to `<path>.1` if it has
/// reached `max_size`. Only one rotated file is kept.
fn open_log_file(path: &Path, max_size: u64) -> Result<File> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    match fs::metadata(path) {
        Ok(metadata) if metadata.len() >= max_size => fs::rename(path, rotated_path(path))?,
        Ok(_) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => return Err(err.into()),
    }

    Ok(OpenOptions::new().create(true).append(true).open(path)?)
}

fn rotated_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".1");
    PathBuf::from(name)
}

/// Sends every record to the console and, if configured, to the log file,
/// each with its own filter.
struct Tee {
    console: Logger,
    file: Option<Logger>,
}

impl Tee {
    fn max_level(&self) -> LevelFilter {
        let file = self.file.as_ref().map_or(LevelFilter::Off, Logger::filter);
        self.console.filter().max(file)
    }
}

impl Log for Tee {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.console.enabled(metadata)
            || self.file.as_ref().is_some_and(|file| file.enabled(metadata))
    }

    fn log(&self, record: &Record) {
        self.console.log(record);
        if let Some(file) = &self.file {
            file.log(record);
        }
    }

    fn flush(&self) {
        self.console.flush();
        if let Some(file) = &self.file {
            file.flush();
        }
    }
}

fn format(f: &mut Formatter, record: &Record) -> io::Result<()> {
    let args = record.args();
    let level = record.level();
    if let Some(prefix) = level_prefix(level) {
        let style = f.default_level_style(level);
        writeln!(f, "{style}{prefix}{style:#}{args}")
    } else {
        writeln!(f, "{args}")
    }
}

fn file_format(f: &mut Formatter, record: &Record) -> io::Result<()> {
    let time = Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
    writeln!(f, "{time} {:<5} {}", record.level(), record.args())
}

fn level_prefix(level: Level) -> Option<&'static str> {
    match level {
        Level::Info => None,
        Level::Debug => Some("debug: "),
        Level::Trace => Some("trace: "),
        Level::Warn => Some("warning: "),
        Level::Error => Some("error: "),
    }
}

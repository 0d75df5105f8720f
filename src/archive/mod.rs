
use std::{
    ffi::OsString,
    fs::{self, File, OpenOptions},
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use log::warn;
use tokio::task::spawn_blocking;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use crate::{
    directory::Directory,
    error::{Error, Result},
    format::format_path,
};

pub const ARCHIVE_EXTENSION: &str = "tar.zst";

const MAX_NAME_ATTEMPTS: usize = 100;

/// A compressed archive of one directory, waiting in the temp dir to be
/// uploaded. The file is deleted when this is dropped, so a unit that panics
/// or is aborted mid-upload leaves nothing behind.
#[derive(Debug)]
pub struct ArchiveFile {
    pub path: PathBuf,
    pub directory: String,
    pub created: DateTime<Utc>,
    pub size: u64,
    pub md5: String,
    removed: bool,
}

impl ArchiveFile {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub async fn remove(mut self) -> Result<()> {
        let result = tokio::fs::remove_file(&self.path).await;
        self.removed = true;
        result?;
        Ok(())
    }
}

impl Drop for ArchiveFile {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => warn!("failed to remove archive {}: {err}", format_path(&self.path)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Archiver {
    temp_dir: PathBuf,
    excludes: Vec<OsString>,
    compression_level: i32,
}

impl Archiver {
    pub fn new<S, I>(temp_dir: PathBuf, excludes: I, compression_level: i32) -> Self
    where
        S: Into<OsString>,
        I: IntoIterator<Item = S>,
    {
        Archiver {
            temp_dir,
            excludes: excludes.into_iter().map(Into::into).collect(),
            compression_level,
        }
    }

    /// Archives `directory` into a new file in the temp dir. Nothing is left
    /// behind on failure, including cancellation.
    pub async fn archive(
        &self,
        directory: &Directory,
        cancel: &CancellationToken,
    ) -> Result<ArchiveFile> {
        let archiver = self.clone();
        let directory = directory.clone();
        let cancel = cancel.clone();
        spawn_blocking(move || archiver.create(&directory, &cancel)).await?
    }

    fn create(&self, directory: &Directory, cancel: &CancellationToken) -> Result<ArchiveFile> {
        let source = directory.path();
        match fs::metadata(source) {
            Ok(metadata) if metadata.is_dir() => {}
            Ok(_) => return Err(Error::FileIsNotDirectory(source.to_owned())),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(Error::DirectoryDoesNotExist(source.to_owned()));
            }
            Err(err) => return Err(err.into()),
        }

        let created = Utc::now();
        let (path, file) = create_unique(&self.temp_dir, directory.identity(), &created)?;

        match self.write_entries(file, directory, &path, cancel) {
            Ok((size, md5)) => Ok(ArchiveFile {
                path,
                directory: directory.identity().to_owned(),
                created,
                size,
                md5,
                removed: false,
            }),
            Err(err) => {
                if let Err(remove_err) = fs::remove_file(&path) {
                    warn!(
                        "failed to remove partial archive {}: {remove_err}",
                        format_path(&path)
                    );
                }
                Err(err)
            }
        }
    }

    fn write_entries(
        &self,
        file: File,
        directory: &Directory,
        target: &Path,
        cancel: &CancellationToken,
    ) -> Result<(u64, String)> {
        let source = directory.path();
        let root = Path::new(directory.identity());

        let writer = HashingWriter::new(BufWriter::new(file));
        let encoder = zstd::Encoder::new(writer, self.compression_level)?;
        let mut builder = tar::Builder::new(encoder);
        builder.follow_symlinks(false);

        let walker = WalkDir::new(source)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || !self.is_excluded(entry));

        for entry in walker {
            if cancel.is_cancelled() {
                return Err(Error::Interrupted);
            }

            let entry = match entry {
                Ok(entry) => entry,
                Err(err) if is_not_found(err.io_error()) => {
                    warn!("skipping vanished file: {err}");
                    continue;
                }
                Err(err) => return Err(err.into()),
            };

            let path = entry.path();
            if path == target {
                continue;
            }

            let file_type = entry.file_type();
            if !(file_type.is_dir() || file_type.is_file() || file_type.is_symlink()) {
                warn!("skipping special file {}", format_path(path));
                continue;
            }

            let name = root.join(path.strip_prefix(source)?);
            match builder.append_path_with_name(path, &name) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    warn!("skipping vanished file {}", format_path(path));
                }
                Err(err) => return Err(err.into()),
            }
        }

        let encoder = builder.into_inner()?;
        let writer = encoder.finish()?;
        let (buffered, size, md5) = writer.finish();
        let file = buffered.into_inner().map_err(io::IntoInnerError::into_error)?;
        file.sync_all()?;
        Ok((size, md5))
    }

    fn is_excluded(&self, entry: &walkdir::DirEntry) -> bool {
        entry.file_type().is_dir() && self.excludes.iter().any(|name| name == entry.file_name())
    }
}

pub fn archive_name(identity: &str, created: &DateTime<Utc>) -> String {
    let timestamp = created.format("%Y%m%d_%H-%M-%S%.3f");
    format!("{identity}_{timestamp}.{ARCHIVE_EXTENSION}")
}

fn create_unique(
    temp_dir: &Path,
    identity: &str,
    created: &DateTime<Utc>,
) -> Result<(PathBuf, File)> {
    let name = archive_name(identity, created);
    let stem = name.trim_end_matches(&format!(".{ARCHIVE_EXTENSION}"));
    let mut path = temp_dir.join(&name);

    for attempt in 1..=MAX_NAME_ATTEMPTS {
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((path, file)),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                path = temp_dir.join(format!("{stem}-{attempt}.{ARCHIVE_EXTENSION}"));
            }
            Err(err) => return Err(err.into()),
        }
    }

    Err(Error::FileAlreadyExists(path))
}

fn is_not_found(error: Option<&io::Error>) -> bool {
    error.is_some_and(|err| err.kind() == io::ErrorKind::NotFound)
}

struct HashingWriter<W> {
    inner: W,
    context: md5::Context,
    written: u64,
}

impl<W: Write> HashingWriter<W> {
    fn new(inner: W) -> Self {
        HashingWriter {
            inner,
            context: md5::Context::new(),
            written: 0,
        }
    }

    fn finish(self) -> (W, u64, String) {
        let digest = self.context.compute();
        (self.inner, self.written, format!("{digest:x}"))
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let count = self.inner.write(buf)?;
        self.context.consume(&buf[..count]);
        self.written += count as u64;
        Ok(count)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

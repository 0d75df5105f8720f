use std::{
    collections::{hash_map::Entry, HashMap},
    env,
    fmt,
    path::{Path, PathBuf},
};

use crate::{
    error::{Error, Result},
    format::format_path,
};

const ROOT_IDENTITY: &str = "root";

/// A local folder designated for backup, tagged with the identity its remote
/// entries are stored under.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Directory {
    path: PathBuf,
    identity: String,
}

impl Directory {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let path = if path.is_absolute() {
            path.to_owned()
        } else {
            env::current_dir()?.join(path)
        };
        let identity = identity_for(&path);
        Ok(Directory { path, identity })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }
}

impl fmt::Display for Directory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_path(&self.path))
    }
}

fn identity_for(path: &Path) -> String {
    let Some(name) = path.file_name() else {
        return ROOT_IDENTITY.to_owned();
    };

    name.to_string_lossy()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Builds the run's directory set: identical paths collapse into one, and two
/// different paths sharing an identity are rejected.
pub fn resolve_directories<P, I>(paths: I) -> Result<Vec<Directory>>
where
    P: AsRef<Path>,
    I: IntoIterator<Item = P>,
{
    let mut directories: Vec<Directory> = vec![];
    let mut identities: HashMap<String, PathBuf> = HashMap::new();

    for path in paths {
        let directory = Directory::new(path)?;
        match identities.entry(directory.identity.clone()) {
            Entry::Occupied(entry) if entry.get() == &directory.path => {}
            Entry::Occupied(entry) => {
                return Err(Error::DuplicateIdentity {
                    identity: directory.identity,
                    first: entry.get().clone(),
                    second: directory.path,
                });
            }
            Entry::Vacant(entry) => {
                entry.insert(directory.path.clone());
                directories.push(directory);
            }
        }
    }

    if directories.is_empty() {
        return Err(Error::NoDirectories);
    }

    Ok(directories)
}

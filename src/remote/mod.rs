mod drive;

use std::{fmt::Debug, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{archive::ArchiveFile, directory::Directory, error::Result};

pub use drive::DriveStore;

/// Application property every uploaded archive is tagged with.
pub const DIRECTORY_PROPERTY: &str = "backup_dir";

pub type SharedStore = Arc<dyn RemoteStore>;

/// A stored backup archive on the remote side.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteEntry {
    pub id: String,
    pub name: String,
    pub directory: String,
    pub created: DateTime<Utc>,
}

/// Remote operations the backup pipeline needs. Every call takes the bearer
/// token to use; a rejected token surfaces as `Error::AuthExpired`.
#[async_trait]
pub trait RemoteStore: Debug + Send + Sync {
    async fn upload(
        &self,
        archive: &ArchiveFile,
        directory: &Directory,
        token: &str,
    ) -> Result<RemoteEntry>;

    /// Entries tagged with `directory`'s identity, in no particular order.
    async fn list(&self, directory: &Directory, token: &str) -> Result<Vec<RemoteEntry>>;

    async fn delete(&self, id: &str, token: &str) -> Result<()>;
}

//! Test doubles for the credential and remote store seams.

use std::{
    collections::HashSet,
    path::Path,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use tokio::{sync::Barrier, time::sleep};

use crate::{
    archive::ArchiveFile,
    credential::{Authorizer, ClientSecrets, Credential, CredentialStore},
    directory::Directory,
    error::{Error, Result},
    remote::{RemoteEntry, RemoteStore},
};

pub fn credential(token: &str, expires_in_secs: i64) -> Credential {
    Credential {
        access_token: token.to_owned(),
        refresh_token: Some("refresh".to_owned()),
        expires_at: Some(Utc::now() + TimeDelta::seconds(expires_in_secs)),
        token_uri: "https://example.test/token".to_owned(),
        client_id: "client".to_owned(),
        client_secret: "secret".to_owned(),
        scope: None,
    }
}

pub fn write_credential(path: &Path, credential: &Credential) {
    std::fs::write(path, serde_json::to_vec(credential).unwrap()).unwrap();
}

pub async fn credential_store(
    path: &Path,
    credential: Option<&Credential>,
    authorizer: Arc<FakeAuthorizer>,
) -> CredentialStore {
    if let Some(credential) = credential {
        write_credential(path, credential);
    }
    CredentialStore::open(path.to_owned(), authorizer)
        .await
        .unwrap()
}

pub fn time(seconds: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + seconds, 0).unwrap()
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum RefreshMode {
    #[default]
    Succeed,
    Fail,
    /// The token endpoint never answers.
    Hang,
}

#[derive(Debug, Default)]
pub struct FakeAuthorizer {
    refreshes: AtomicUsize,
    mode: RefreshMode,
}

impl FakeAuthorizer {
    pub fn new() -> Arc<Self> {
        Arc::new(FakeAuthorizer::default())
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(FakeAuthorizer {
            mode: RefreshMode::Fail,
            ..FakeAuthorizer::default()
        })
    }

    pub fn hanging() -> Arc<Self> {
        Arc::new(FakeAuthorizer {
            mode: RefreshMode::Hang,
            ..FakeAuthorizer::default()
        })
    }

    pub fn refreshes(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Authorizer for FakeAuthorizer {
    fn authorization_url(&self, client: &ClientSecrets) -> Result<String> {
        Ok(format!("https://example.test/auth?client_id={}", client.client_id))
    }

    async fn exchange_code(&self, client: &ClientSecrets, code: &str) -> Result<Credential> {
        Ok(Credential {
            access_token: format!("exchanged-{code}"),
            client_id: client.client_id.clone(),
            client_secret: client.client_secret.clone(),
            ..credential("", 3600)
        })
    }

    async fn refresh(&self, stale: &Credential) -> Result<Credential> {
        let count = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
        sleep(Duration::from_millis(20)).await;
        match self.mode {
            RefreshMode::Succeed => {}
            RefreshMode::Fail => {
                return Err(Error::Remote {
                    status: 400,
                    message: "refresh refused".to_owned(),
                });
            }
            RefreshMode::Hang => std::future::pending::<()>().await,
        }
        Ok(Credential {
            access_token: format!("fresh-{count}"),
            expires_at: Some(Utc::now() + TimeDelta::hours(1)),
            ..stale.clone()
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    Upload { directory: String, token: String },
    List { directory: String },
    Delete { id: String },
}

/// An in-memory `RemoteStore` that records every call.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<Vec<RemoteEntry>>,
    calls: Mutex<Vec<Call>>,
    next_id: AtomicUsize,
    rejected_tokens: HashSet<String>,
    barrier: Option<Barrier>,
    failing_uploads: HashSet<String>,
    crashing_uploads: HashSet<String>,
    failing_deletes: bool,
    upload_delay: Option<Duration>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    pub fn with_entry(self, id: &str, directory: &str, created: DateTime<Utc>) -> Self {
        self.entries.lock().unwrap().push(RemoteEntry {
            id: id.to_owned(),
            name: format!("{directory}_{id}.tar.zst"),
            directory: directory.to_owned(),
            created,
        });
        self
    }

    /// Uploads with `token` fail with `AuthExpired`.
    pub fn reject_token(mut self, token: &str) -> Self {
        self.rejected_tokens.insert(token.to_owned());
        self
    }

    /// Holds uploads with a rejected token until `count` of them arrive.
    pub fn with_barrier(mut self, count: usize) -> Self {
        self.barrier = Some(Barrier::new(count));
        self
    }

    pub fn fail_uploads_for(mut self, directory: &str) -> Self {
        self.failing_uploads.insert(directory.to_owned());
        self
    }

    /// Uploads for `directory` panic.
    pub fn crash_uploads_for(mut self, directory: &str) -> Self {
        self.crashing_uploads.insert(directory.to_owned());
        self
    }

    pub fn fail_deletes(mut self) -> Self {
        self.failing_deletes = true;
        self
    }

    pub fn stall_uploads(mut self, delay: Duration) -> Self {
        self.upload_delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls concerning `directory`. Entry ids start with the directory name.
    pub fn calls_for(&self, directory: &str) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|call| match call {
                Call::Upload { directory: d, .. } | Call::List { directory: d } => d == directory,
                Call::Delete { id } => id.starts_with(directory),
            })
            .collect()
    }

    pub fn uploads(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|call| matches!(call, Call::Upload { .. }))
            .collect()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Delete { id } => Some(id),
                _ => None,
            })
            .collect()
    }

    pub fn entries(&self) -> Vec<RemoteEntry> {
        self.entries.lock().unwrap().clone()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn upload(
        &self,
        archive: &ArchiveFile,
        directory: &Directory,
        token: &str,
    ) -> Result<RemoteEntry> {
        self.record(Call::Upload {
            directory: directory.identity().to_owned(),
            token: token.to_owned(),
        });

        if self.rejected_tokens.contains(token) {
            if let Some(barrier) = &self.barrier {
                barrier.wait().await;
            }
            return Err(Error::AuthExpired);
        }

        if let Some(delay) = self.upload_delay {
            sleep(delay).await;
        }

        assert!(
            !self.crashing_uploads.contains(directory.identity()),
            "upload crashed"
        );

        if self.failing_uploads.contains(directory.identity()) {
            return Err(Error::Remote {
                status: 403,
                message: "storage quota exceeded".to_owned(),
            });
        }

        assert!(archive.path.is_file(), "archive must exist while uploading");

        let id = format!(
            "{}-new-{}",
            directory.identity(),
            self.next_id.fetch_add(1, Ordering::SeqCst)
        );
        let entry = RemoteEntry {
            id,
            name: archive.file_name(),
            directory: directory.identity().to_owned(),
            created: Utc::now(),
        };
        self.entries.lock().unwrap().push(entry.clone());
        Ok(entry)
    }

    async fn list(&self, directory: &Directory, _token: &str) -> Result<Vec<RemoteEntry>> {
        self.record(Call::List {
            directory: directory.identity().to_owned(),
        });
        Ok(self
            .entries
            .lock()
            .unwrap()
            .iter()
            .filter(|entry| entry.directory == directory.identity())
            .cloned()
            .collect())
    }

    async fn delete(&self, id: &str, _token: &str) -> Result<()> {
        self.record(Call::Delete { id: id.to_owned() });
        if self.failing_deletes {
            return Err(Error::Remote {
                status: 500,
                message: "backend error".to_owned(),
            });
        }
        self.entries.lock().unwrap().retain(|entry| entry.id != id);
        Ok(())
    }
}

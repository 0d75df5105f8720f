mod oauth;
#[cfg(test)]
mod tests;

use std::{
    fmt,
    io::{self, BufRead, Write},
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use chrono::{DateTime, TimeDelta, Utc};
use log::{debug, info, warn};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tokio::{fs, io::AsyncWriteExt, sync::Mutex, time::timeout};

use crate::{
    error::{Error, Result},
    format::format_path,
};

pub use oauth::{Authorizer, GoogleOAuth};

/// Tokens this close to expiry are refreshed before use.
const REFRESH_MARGIN_SECS: i64 = 60;

/// Upper bound on one refresh, which runs while every other caller waits.
pub const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(90);

const REDACTED: &str = "<redacted>";

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    pub token_uri: String,
    pub client_id: String,
    pub client_secret: String,
    #[serde(default)]
    pub scope: Option<String>,
}

impl Credential {
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        self.expires_at
            .is_some_and(|expires_at| expires_at - TimeDelta::seconds(REFRESH_MARGIN_SECS) <= now)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &REDACTED)
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| REDACTED))
            .field("expires_at", &self.expires_at)
            .field("token_uri", &self.token_uri)
            .field("client_id", &self.client_id)
            .field("client_secret", &REDACTED)
            .field("scope", &self.scope)
            .finish()
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct ClientSecrets {
    pub client_id: String,
    pub client_secret: String,
}

impl fmt::Debug for ClientSecrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSecrets")
            .field("client_id", &self.client_id)
            .field("client_secret", &REDACTED)
            .finish()
    }
}

/// Owns the persisted OAuth token. All workers share one store; refreshes
/// happen under its lock, so concurrent callers wait on a single refresh.
#[derive(Debug)]
pub struct CredentialStore {
    path: PathBuf,
    authorizer: Arc<dyn Authorizer>,
    credential: Mutex<Option<Credential>>,
    refresh_timeout: Duration,
}

impl CredentialStore {
    pub async fn open(path: PathBuf, authorizer: Arc<dyn Authorizer>) -> Result<Self> {
        let credential = load(&path).await?;
        Ok(CredentialStore {
            path,
            authorizer,
            credential: Mutex::new(credential),
            refresh_timeout: DEFAULT_REFRESH_TIMEOUT,
        })
    }

    #[must_use]
    pub fn with_refresh_timeout(mut self, refresh_timeout: Duration) -> Self {
        self.refresh_timeout = refresh_timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns a valid access token, refreshing it if needed. Any failure is
    /// reported as `AuthRequired`; this never prompts.
    pub async fn obtain(&self) -> Result<String> {
        self.access().await.map_err(|err| match err {
            Error::AuthRequired(_) => err,
            err => Error::AuthRequired(format!("token refresh failed: {err}")),
        })
    }

    /// Like [`obtain`](Self::obtain) but passes refresh errors through
    /// unchanged.
    pub async fn access(&self) -> Result<String> {
        let mut slot = self.credential.lock().await;
        match slot.as_ref() {
            Some(credential) if !credential.is_stale(Utc::now()) => {
                Ok(credential.access_token.clone())
            }
            _ => self.refresh_locked(&mut slot).await,
        }
    }

    /// Called after the remote side rejected `stale`. Refreshes unless another
    /// caller already replaced that token.
    pub async fn refresh_stale(&self, stale: &str) -> Result<String> {
        let mut slot = self.credential.lock().await;
        match slot.as_ref() {
            Some(credential)
                if credential.access_token != stale && !credential.is_stale(Utc::now()) =>
            {
                Ok(credential.access_token.clone())
            }
            _ => self.refresh_locked(&mut slot).await,
        }
    }

    async fn refresh_locked(&self, slot: &mut Option<Credential>) -> Result<String> {
        let Some(credential) = slot.as_ref() else {
            return Err(Error::AuthRequired(format!(
                "no token at {}",
                format_path(&self.path)
            )));
        };

        if credential.refresh_token.is_none() {
            return Err(Error::AuthRequired(
                "token expired and has no refresh token".to_owned(),
            ));
        }

        debug!("refreshing access token");
        let refreshed = timeout(self.refresh_timeout, self.authorizer.refresh(credential))
            .await
            .map_err(|_| Error::Timeout(self.refresh_timeout))??;
        persist(&self.path, &refreshed).await?;

        let token = refreshed.access_token.clone();
        *slot = Some(refreshed);
        Ok(token)
    }

    /// Runs the consent flow on `input`/`output`, asking for the client id
    /// and secret when `client` is `None`, then persists the new credential.
    pub async fn interactive_fetch<R: BufRead, W: Write>(
        &self,
        client: Option<ClientSecrets>,
        mut input: R,
        mut output: W,
    ) -> Result<Credential> {
        let client = match client {
            Some(client) => client,
            None => {
                writeln!(output, "Only \"Desktop app\" OAuth clients are supported.")?;
                ClientSecrets {
                    client_id: ask(&mut input, &mut output, "Google client ID")?,
                    client_secret: ask(&mut input, &mut output, "Google client secret")?,
                }
            }
        };

        let url = self.authorizer.authorization_url(&client)?;
        writeln!(output, "Open this URL and authorize access:\n\n    {url}\n")?;
        writeln!(
            output,
            "Your browser will then land on a page that fails to load; copy its address."
        )?;
        let reply = ask(
            &mut input,
            &mut output,
            "authorization code or redirected URL",
        )?;
        let code = extract_code(&reply)?;

        let credential = self
            .authorizer
            .exchange_code(&client, &code)
            .await
            .map_err(|err| match err {
                Error::AuthFlowFailed(_) => err,
                err => Error::AuthFlowFailed(err.to_string()),
            })?;

        persist(&self.path, &credential).await?;
        *self.credential.lock().await = Some(credential.clone());
        info!("saved token to {}", format_path(&self.path));
        Ok(credential)
    }
}

fn ask<R: BufRead, W: Write>(input: &mut R, output: &mut W, what: &str) -> Result<String> {
    write!(output, "Enter {what}: ")?;
    output.flush()?;

    let mut line = String::new();
    input.read_line(&mut line)?;
    let answer = line.trim();
    if answer.is_empty() {
        return Err(Error::AuthFlowFailed(format!("no {what} given")));
    }
    Ok(answer.to_owned())
}

/// Accepts either a bare authorization code or the full redirect URL.
fn extract_code(reply: &str) -> Result<String> {
    let Ok(url) = Url::parse(reply) else {
        return Ok(reply.to_owned());
    };

    let mut code = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "error" => {
                return Err(Error::AuthFlowFailed(format!(
                    "authorization denied: {value}"
                )));
            }
            _ => {}
        }
    }

    code.ok_or_else(|| Error::AuthFlowFailed("redirect URL has no `code` parameter".to_owned()))
}

async fn load(path: &Path) -> Result<Option<Credential>> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };

    match serde_json::from_slice(&bytes) {
        Ok(credential) => Ok(Some(credential)),
        Err(err) => {
            warn!("ignoring unreadable token {}: {err}", format_path(path));
            Ok(None)
        }
    }
}

/// Writes `credential` next to `path` and renames it into place, so readers
/// never see a partial file.
async fn persist(path: &Path, credential: &Credential) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(credential)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let temp_path = temp_path(path);
    let result = write_private(&temp_path, &bytes).await;
    if let Err(err) = result {
        let _ = fs::remove_file(&temp_path).await;
        return Err(err);
    }

    fs::rename(&temp_path, path).await?;
    Ok(())
}

async fn write_private(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options.open(path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.tmp"))
}

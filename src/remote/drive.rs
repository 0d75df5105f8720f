use std::{collections::HashMap, future::Future, pin::pin, time::Duration};

use async_stream::try_stream;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use rand::Rng;
use reqwest::{
    header::{CONTENT_LENGTH, LOCATION},
    Body, Client, RequestBuilder, Response, StatusCode,
};
use serde::{Deserialize, Serialize};
use tokio::{fs::File, time::sleep};
use tokio_stream::{Stream, StreamExt};

use crate::{
    archive::ArchiveFile,
    directory::Directory,
    error::{Error, Result},
    format::format_elapsed,
};

use super::{RemoteEntry, RemoteStore, DIRECTORY_PROPERTY};

const FILES_URL: &str = "https://www.googleapis.com/drive/v3/files";
const UPLOAD_URL: &str = "https://www.googleapis.com/upload/drive/v3/files";

const ARCHIVE_MIME_TYPE: &str = "application/zstd";
const ENTRY_FIELDS: &str = "id, name, createdTime, md5Checksum, appProperties";
const LIST_FIELDS: &str = "nextPageToken, files(id, name, createdTime, appProperties)";
const PAGE_SIZE: &str = "1000";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_ATTEMPTS: u32 = 5;

#[derive(Debug)]
pub struct DriveStore {
    client: Client,
    folder_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    id: String,
    name: String,
    created_time: DateTime<Utc>,
    md5_checksum: Option<String>,
    #[serde(default)]
    app_properties: HashMap<String, String>,
}

impl DriveFile {
    fn into_entry(self, fallback_directory: &str) -> RemoteEntry {
        let directory = self
            .app_properties
            .get(DIRECTORY_PROPERTY)
            .cloned()
            .unwrap_or_else(|| fallback_directory.to_owned());
        RemoteEntry {
            id: self.id,
            name: self.name,
            directory,
            created: self.created_time,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
    next_page_token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FileMetadata<'a> {
    name: &'a str,
    mime_type: &'static str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    parents: Vec<&'a str>,
    app_properties: HashMap<&'static str, &'a str>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

impl DriveStore {
    pub fn new(folder_id: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(DriveStore { client, folder_id })
    }

    fn list_query(&self, directory: &Directory) -> String {
        let identity = escape_query_value(directory.identity());
        let mut query = format!(
            "appProperties has {{ key='{DIRECTORY_PROPERTY}' and value='{identity}' }} and trashed = false"
        );
        if let Some(folder_id) = &self.folder_id {
            let folder_id = escape_query_value(folder_id);
            query.push_str(&format!(" and '{folder_id}' in parents"));
        }
        query
    }

    fn pages<'a>(
        &'a self,
        query: String,
        token: &'a str,
    ) -> impl Stream<Item = Result<Vec<DriveFile>>> + 'a {
        try_stream! {
            let client = &self.client;
            let mut page_token: Option<String> = None;

            loop {
                let query = query.as_str();
                let current_page = page_token.as_deref();
                let response = send_with_backoff(move || async move {
                    let mut request = client
                        .get(FILES_URL)
                        .bearer_auth(token)
                        .query(&[
                            ("q", query),
                            ("fields", LIST_FIELDS),
                            ("pageSize", PAGE_SIZE),
                            ("spaces", "drive"),
                        ]);
                    if let Some(current_page) = current_page {
                        request = request.query(&[("pageToken", current_page)]);
                    }
                    Ok(request)
                })
                .await?;

                let page: FileList = response.json().await?;
                yield page.files;

                match page.next_page_token {
                    Some(next) => page_token = Some(next),
                    None => break,
                }
            }
        }
    }
}

#[async_trait]
impl RemoteStore for DriveStore {
    async fn upload(
        &self,
        archive: &ArchiveFile,
        directory: &Directory,
        token: &str,
    ) -> Result<RemoteEntry> {
        let client = &self.client;
        let name = archive.file_name();
        let metadata = FileMetadata {
            name: &name,
            mime_type: ARCHIVE_MIME_TYPE,
            parents: self.folder_id.iter().map(String::as_str).collect(),
            app_properties: HashMap::from([(DIRECTORY_PROPERTY, directory.identity())]),
        };
        let metadata = &metadata;
        let size = archive.size;

        let session = send_with_backoff(move || async move {
            Ok(client
                .post(UPLOAD_URL)
                .bearer_auth(token)
                .query(&[("uploadType", "resumable"), ("fields", ENTRY_FIELDS)])
                .header("X-Upload-Content-Type", ARCHIVE_MIME_TYPE)
                .header("X-Upload-Content-Length", size)
                .json(metadata))
        })
        .await?;

        let location = session
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| Error::Remote {
                status: session.status().as_u16(),
                message: "upload session has no location".to_owned(),
            })?
            .to_owned();

        let location = location.as_str();
        let path = archive.path.as_path();
        let response = send_with_backoff(move || async move {
            let file = File::open(path).await?;
            Ok(client
                .put(location)
                .bearer_auth(token)
                .header(CONTENT_LENGTH, size)
                .body(Body::from(file)))
        })
        .await?;

        let file: DriveFile = response.json().await?;
        if let Some(actual) = &file.md5_checksum {
            if *actual != archive.md5 {
                let error = Error::ChecksumMismatch {
                    name: file.name.clone(),
                    actual: actual.clone(),
                    expected: archive.md5.clone(),
                };
                if let Err(err) = self.delete(&file.id, token).await {
                    warn!("failed to remove corrupt upload {}: {err}", file.name);
                }
                return Err(error);
            }
        }

        Ok(file.into_entry(directory.identity()))
    }

    async fn list(&self, directory: &Directory, token: &str) -> Result<Vec<RemoteEntry>> {
        let query = self.list_query(directory);
        let mut pages = pin!(self.pages(query, token));
        let mut entries = vec![];

        while let Some(files) = pages.try_next().await? {
            entries.extend(
                files
                    .into_iter()
                    .map(|file| file.into_entry(directory.identity())),
            );
        }

        Ok(entries)
    }

    async fn delete(&self, id: &str, token: &str) -> Result<()> {
        let client = &self.client;
        let result = send_with_backoff(move || async move {
            Ok(client.delete(format!("{FILES_URL}/{id}")).bearer_auth(token))
        })
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(Error::Remote { status, .. }) if status == StatusCode::NOT_FOUND.as_u16() => {
                debug!("{id} was already gone");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}

/// Sends the request built by `build`, retrying transient failures with
/// exponential backoff. `build` runs once per attempt since request bodies
/// can't be replayed.
async fn send_with_backoff<F, Fut>(build: F) -> Result<Response>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<RequestBuilder>>,
{
    let mut attempt = 0;
    loop {
        let error = match build().await?.send().await {
            Ok(response) if response.status().is_success() => return Ok(response),
            Ok(response) => status_error(response).await,
            Err(err) if err.is_timeout() => Error::Timeout(CONNECT_TIMEOUT),
            Err(err) => err.into(),
        };

        attempt += 1;
        if !error.is_retryable() || attempt >= MAX_ATTEMPTS {
            return Err(error);
        }

        let delay = backoff_delay(attempt);
        debug!(
            "{error}; retrying in {} (attempt {attempt} of {MAX_ATTEMPTS})",
            format_elapsed(delay)
        );
        sleep(delay).await;
    }
}

async fn status_error(response: Response) -> Error {
    let status = response.status();
    if status == StatusCode::UNAUTHORIZED {
        return Error::AuthExpired;
    }

    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&text)
        .map(|body| body.error.message)
        .unwrap_or(text);
    Error::Remote {
        status: status.as_u16(),
        message,
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    let base = Duration::from_secs(1 << (attempt - 1).min(6));
    let jitter = Duration::from_millis(rand::rng().random_range(0..1000));
    base + jitter
}

fn escape_query_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

use std::{io::Cursor, sync::Arc, time::Duration};

use chrono::{TimeDelta, Utc};
use tempfile::TempDir;

use crate::{
    error::Error,
    testing::{credential, credential_store, FakeAuthorizer},
};

use super::{extract_code, ClientSecrets, Credential, CredentialStore};

fn read_persisted(store: &CredentialStore) -> Credential {
    serde_json::from_slice(&std::fs::read(store.path()).unwrap()).unwrap()
}

fn only_token_file(dir: &TempDir) -> bool {
    let names = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name())
        .collect::<Vec<_>>();
    names == ["token.json"]
}

#[test]
fn staleness_includes_margin() {
    let now = Utc::now();
    let mut credential = credential("a", 0);

    credential.expires_at = Some(now + TimeDelta::seconds(30));
    assert!(credential.is_stale(now));

    credential.expires_at = Some(now + TimeDelta::seconds(120));
    assert!(!credential.is_stale(now));

    credential.expires_at = None;
    assert!(!credential.is_stale(now));
}

#[test]
fn debug_output_hides_secrets() {
    let credential = Credential {
        access_token: "ya29.live-token".to_owned(),
        refresh_token: Some("1//refresh-token".to_owned()),
        client_secret: "GOCSPX-secret".to_owned(),
        ..credential("", 3600)
    };
    let client = ClientSecrets {
        client_id: "client".to_owned(),
        client_secret: "GOCSPX-secret".to_owned(),
    };

    for debug in [
        format!("{credential:?}"),
        format!("{credential:#?}"),
        format!("{client:?}"),
        format!("{:?}", Some(&credential)),
    ] {
        assert!(!debug.contains("ya29.live-token"), "{debug}");
        assert!(!debug.contains("1//refresh-token"), "{debug}");
        assert!(!debug.contains("GOCSPX-secret"), "{debug}");
        assert!(debug.contains("client"), "{debug}");
    }

    assert!(format!("{credential:?}").contains("https://example.test/token"));
}

#[tokio::test]
async fn missing_file_requires_auth() {
    let dir = TempDir::new().unwrap();
    let authorizer = FakeAuthorizer::new();
    let store = credential_store(&dir.path().join("token.json"), None, authorizer.clone()).await;

    assert!(matches!(store.obtain().await, Err(Error::AuthRequired(_))));
    assert_eq!(authorizer.refreshes(), 0);
}

#[tokio::test]
async fn unreadable_file_requires_auth() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("token.json");
    std::fs::write(&path, "{ not json").unwrap();

    let store = CredentialStore::open(path, FakeAuthorizer::new())
        .await
        .unwrap();
    assert!(matches!(store.obtain().await, Err(Error::AuthRequired(_))));
}

#[tokio::test]
async fn fresh_credential_is_used_as_is() {
    let dir = TempDir::new().unwrap();
    let authorizer = FakeAuthorizer::new();
    let current = credential("current", 3600);
    let store =
        credential_store(&dir.path().join("token.json"), Some(&current), authorizer.clone()).await;

    assert_eq!(store.obtain().await.unwrap(), "current");
    assert_eq!(authorizer.refreshes(), 0);
}

#[tokio::test]
async fn stale_credential_is_refreshed_and_persisted() {
    let dir = TempDir::new().unwrap();
    let authorizer = FakeAuthorizer::new();
    let stale = credential("stale", 10);
    let store =
        credential_store(&dir.path().join("token.json"), Some(&stale), authorizer.clone()).await;

    assert_eq!(store.obtain().await.unwrap(), "fresh-1");
    assert_eq!(authorizer.refreshes(), 1);

    let persisted = read_persisted(&store);
    assert_eq!(persisted.access_token, "fresh-1");
    assert_eq!(persisted.refresh_token, stale.refresh_token);
    assert!(only_token_file(&dir));

    assert_eq!(store.obtain().await.unwrap(), "fresh-1");
    assert_eq!(authorizer.refreshes(), 1);
}

#[cfg(unix)]
#[tokio::test]
async fn persisted_credential_is_private() {
    use std::os::unix::fs::PermissionsExt;

    let dir = TempDir::new().unwrap();
    let store = credential_store(
        &dir.path().join("token.json"),
        Some(&credential("stale", -10)),
        FakeAuthorizer::new(),
    )
    .await;
    store.obtain().await.unwrap();

    let mode = std::fs::metadata(store.path()).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o600);
}

#[tokio::test]
async fn stale_credential_without_refresh_token_requires_auth() {
    let dir = TempDir::new().unwrap();
    let authorizer = FakeAuthorizer::new();
    let stale = Credential {
        refresh_token: None,
        ..credential("stale", -10)
    };
    let store =
        credential_store(&dir.path().join("token.json"), Some(&stale), authorizer.clone()).await;

    assert!(matches!(store.obtain().await, Err(Error::AuthRequired(_))));
    assert_eq!(authorizer.refreshes(), 0);
}

#[tokio::test]
async fn failed_refresh_requires_auth() {
    let dir = TempDir::new().unwrap();
    let stale = credential("stale", -10);
    let store = credential_store(
        &dir.path().join("token.json"),
        Some(&stale),
        FakeAuthorizer::failing(),
    )
    .await;

    assert!(matches!(store.obtain().await, Err(Error::AuthRequired(_))));
    assert!(matches!(store.access().await, Err(Error::Remote { .. })));
    assert_eq!(read_persisted(&store), stale);
}

#[tokio::test]
async fn unanswered_refresh_times_out() {
    let dir = TempDir::new().unwrap();
    let stale = credential("stale", 10);
    let limit = Duration::from_millis(100);
    let store = credential_store(
        &dir.path().join("token.json"),
        Some(&stale),
        FakeAuthorizer::hanging(),
    )
    .await
    .with_refresh_timeout(limit);

    let started = std::time::Instant::now();
    assert!(matches!(store.obtain().await, Err(Error::AuthRequired(_))));
    assert!(matches!(store.access().await, Err(Error::Timeout(d)) if d == limit));
    assert!(matches!(
        store.refresh_stale("stale").await,
        Err(Error::Timeout(_))
    ));
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(read_persisted(&store), stale);
}

#[tokio::test]
async fn concurrent_callers_share_one_refresh() {
    let dir = TempDir::new().unwrap();
    let authorizer = FakeAuthorizer::new();
    let store = Arc::new(
        credential_store(
            &dir.path().join("token.json"),
            Some(&credential("stale", -10)),
            authorizer.clone(),
        )
        .await,
    );

    let tasks = (0..3)
        .map(|_| {
            let store = store.clone();
            tokio::spawn(async move { store.access().await.unwrap() })
        })
        .collect::<Vec<_>>();

    for task in tasks {
        assert_eq!(task.await.unwrap(), "fresh-1");
    }
    assert_eq!(authorizer.refreshes(), 1);
}

#[tokio::test]
async fn rejected_token_is_refreshed_once() {
    let dir = TempDir::new().unwrap();
    let authorizer = FakeAuthorizer::new();
    let store = Arc::new(
        credential_store(
            &dir.path().join("token.json"),
            Some(&credential("revoked", 3600)),
            authorizer.clone(),
        )
        .await,
    );

    let tasks = (0..3)
        .map(|_| {
            let store = store.clone();
            tokio::spawn(async move { store.refresh_stale("revoked").await.unwrap() })
        })
        .collect::<Vec<_>>();

    for task in tasks {
        assert_eq!(task.await.unwrap(), "fresh-1");
    }
    assert_eq!(authorizer.refreshes(), 1);
    assert_eq!(store.access().await.unwrap(), "fresh-1");
}

#[tokio::test]
async fn interactive_fetch_asks_for_client_and_accepts_redirect_url() {
    let dir = TempDir::new().unwrap();
    let store = credential_store(&dir.path().join("token.json"), None, FakeAuthorizer::new()).await;

    let input = Cursor::new("my-client\nmy-secret\nhttp://localhost/?code=4%2Fabc&scope=drive\n");
    let mut output = vec![];
    let credential = store
        .interactive_fetch(None, input, &mut output)
        .await
        .unwrap();

    assert_eq!(credential.access_token, "exchanged-4/abc");
    assert_eq!(credential.client_id, "my-client");
    assert_eq!(credential.client_secret, "my-secret");
    assert_eq!(read_persisted(&store), credential);
    assert_eq!(store.obtain().await.unwrap(), "exchanged-4/abc");

    let output = String::from_utf8(output).unwrap();
    assert!(output.contains("https://example.test/auth?client_id=my-client"));
}

#[tokio::test]
async fn interactive_fetch_with_configured_client_reads_bare_code() {
    let dir = TempDir::new().unwrap();
    let store = credential_store(
        &dir.path().join("token.json"),
        Some(&credential("old", 3600)),
        FakeAuthorizer::new(),
    )
    .await;

    let client = ClientSecrets {
        client_id: "configured".to_owned(),
        client_secret: "shh".to_owned(),
    };
    let credential = store
        .interactive_fetch(Some(client), Cursor::new("  raw-code \n"), vec![])
        .await
        .unwrap();

    assert_eq!(credential.access_token, "exchanged-raw-code");
    assert_eq!(credential.client_id, "configured");
    assert_eq!(store.obtain().await.unwrap(), "exchanged-raw-code");
}

#[tokio::test]
async fn interactive_fetch_fails_on_empty_input() {
    let dir = TempDir::new().unwrap();
    let store = credential_store(&dir.path().join("token.json"), None, FakeAuthorizer::new()).await;

    let result = store.interactive_fetch(None, Cursor::new(""), vec![]).await;
    assert!(matches!(result, Err(Error::AuthFlowFailed(_))));
    assert!(!store.path().exists());
}

#[test]
fn denied_consent_is_reported() {
    assert!(matches!(
        extract_code("http://localhost/?error=access_denied"),
        Err(Error::AuthFlowFailed(_))
    ));
    assert!(matches!(
        extract_code("http://localhost/?state=x"),
        Err(Error::AuthFlowFailed(_))
    ));
    assert_eq!(extract_code("4/xyz").unwrap(), "4/xyz");
}

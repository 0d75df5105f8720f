use std::{fmt::Debug, time::Duration};

use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use reqwest::{Client, Response, Url};
use serde::Deserialize;

use crate::error::{Error, Result};

use super::{ClientSecrets, Credential};

pub const AUTH_URL: &str = "https://accounts.google.com/o/oauth2/auth";
pub const TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
pub const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive";
pub const REDIRECT_URI: &str = "http://localhost";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// The token endpoint side of an OAuth2 provider.
#[async_trait]
pub trait Authorizer: Debug + Send + Sync {
    /// URL the user opens to grant access.
    fn authorization_url(&self, client: &ClientSecrets) -> Result<String>;

    async fn exchange_code(&self, client: &ClientSecrets, code: &str) -> Result<Credential>;

    /// Returns `credential` with a new access token and expiry.
    async fn refresh(&self, credential: &Credential) -> Result<Credential>;
}

#[derive(Debug)]
pub struct GoogleOAuth {
    client: Client,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<i64>,
    refresh_token: Option<String>,
    scope: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenError {
    error: String,
    error_description: Option<String>,
}

impl TokenError {
    fn describe(&self) -> String {
        match &self.error_description {
            Some(description) => format!("{} ({description})", self.error),
            None => self.error.clone(),
        }
    }
}

impl GoogleOAuth {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(GoogleOAuth { client })
    }
}

#[async_trait]
impl Authorizer for GoogleOAuth {
    fn authorization_url(&self, client: &ClientSecrets) -> Result<String> {
        let url = Url::parse_with_params(
            AUTH_URL,
            &[
                ("client_id", client.client_id.as_str()),
                ("redirect_uri", REDIRECT_URI),
                ("response_type", "code"),
                ("scope", DRIVE_SCOPE),
                ("access_type", "offline"),
                ("prompt", "consent"),
            ],
        )
        .map_err(|err| Error::AuthFlowFailed(err.to_string()))?;
        Ok(url.into())
    }

    async fn exchange_code(&self, client: &ClientSecrets, code: &str) -> Result<Credential> {
        let response = self
            .client
            .post(TOKEN_URI)
            .form(&[
                ("code", code),
                ("client_id", client.client_id.as_str()),
                ("client_secret", client.client_secret.as_str()),
                ("redirect_uri", REDIRECT_URI),
                ("grant_type", "authorization_code"),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let error = token_error(response).await;
            return Err(Error::AuthFlowFailed(error.describe()));
        }

        let token: TokenResponse = response.json().await?;
        Ok(Credential {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_at: expiry(token.expires_in),
            token_uri: TOKEN_URI.to_owned(),
            client_id: client.client_id.clone(),
            client_secret: client.client_secret.clone(),
            scope: token.scope,
        })
    }

    async fn refresh(&self, credential: &Credential) -> Result<Credential> {
        let Some(refresh_token) = &credential.refresh_token else {
            return Err(Error::AuthRequired("token has no refresh token".to_owned()));
        };

        let response = self
            .client
            .post(&credential.token_uri)
            .form(&[
                ("client_id", credential.client_id.as_str()),
                ("client_secret", credential.client_secret.as_str()),
                ("refresh_token", refresh_token.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error = token_error(response).await;
            if error.error == "invalid_grant" || error.error == "invalid_client" {
                return Err(Error::AuthRequired(format!(
                    "refresh rejected: {}",
                    error.describe()
                )));
            }
            return Err(Error::Remote {
                status: status.as_u16(),
                message: error.describe(),
            });
        }

        let token: TokenResponse = response.json().await?;
        Ok(Credential {
            access_token: token.access_token,
            refresh_token: token.refresh_token.or_else(|| credential.refresh_token.clone()),
            expires_at: expiry(token.expires_in),
            scope: token.scope.or_else(|| credential.scope.clone()),
            ..credential.clone()
        })
    }
}

async fn token_error(response: Response) -> TokenError {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    serde_json::from_str(&text).unwrap_or(TokenError {
        error: format!("status {}", status.as_u16()),
        error_description: (!text.is_empty()).then_some(text),
    })
}

fn expiry(expires_in: Option<i64>) -> Option<chrono::DateTime<Utc>> {
    expires_in.map(|seconds| Utc::now() + TimeDelta::seconds(seconds))
}

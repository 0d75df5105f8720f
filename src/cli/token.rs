use std::{io, sync::Arc};

use crate::{
    config::Config,
    credential::{ClientSecrets, CredentialStore, GoogleOAuth},
    error::Result,
};

pub async fn main(config: &Config) -> Result<()> {
    let store = CredentialStore::open(config.token_path()?, Arc::new(GoogleOAuth::new()?)).await?;

    let client = match (&config.client_id, &config.client_secret) {
        (Some(client_id), Some(client_secret)) => Some(ClientSecrets {
            client_id: client_id.clone(),
            client_secret: client_secret.clone(),
        }),
        _ => None,
    };

    store
        .interactive_fetch(client, io::stdin().lock(), io::stderr())
        .await?;
    Ok(())
}

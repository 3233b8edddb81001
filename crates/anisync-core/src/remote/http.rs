use super::RemoteStore;
use crate::error::RemoteError;
use anisync_models::{AccountId, DocumentPatch, UserDocument};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// REST document service client.
///
/// `GET`, `PUT` and `PATCH` on `{base_url}/user_data/{account}`; the transport
/// timeout is the only timeout applied to remote calls.
#[derive(Clone)]
pub struct HttpRemoteStore {
    client: Arc<Client>,
    base_url: String,
    api_token: Option<String>,
}

impl HttpRemoteStore {
    pub fn new(base_url: &str, api_token: Option<String>, timeout: Duration) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("anisync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RemoteError::Transient(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client: Arc::new(client),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token,
        })
    }

    fn document_url(&self, account: &AccountId) -> String {
        format!("{}/user_data/{}", self.base_url, urlencoding::encode(account.as_str()))
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.api_token {
            Some(ref token) => request.bearer_auth(token),
            None => request,
        }
    }
}

async fn check_status(response: Response) -> Result<Response, RemoteError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(RemoteError::from_status(status.as_u16(), format!("{}: {}", status, body.trim())))
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn get_document(&self, account: &AccountId) -> Result<Option<UserDocument>, RemoteError> {
        let url = self.document_url(account);
        debug!("GET {}", url);
        let response = self.authorize(self.client.get(&url)).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = check_status(response).await?;
        let document = response.json::<UserDocument>().await?;
        Ok(Some(document))
    }

    async fn create_document(&self, account: &AccountId, document: &UserDocument) -> Result<(), RemoteError> {
        let url = self.document_url(account);
        debug!("PUT {}", url);
        let response = self.authorize(self.client.put(&url)).json(document).send().await?;
        check_status(response).await?;
        Ok(())
    }

    async fn update_fields(&self, account: &AccountId, patch: &DocumentPatch) -> Result<(), RemoteError> {
        let url = self.document_url(account);
        debug!("PATCH {}", url);
        let response = self.authorize(self.client.patch(&url)).json(patch).send().await?;
        check_status(response).await?;
        Ok(())
    }
}

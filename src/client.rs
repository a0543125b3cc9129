// src/client.rs

use crate::catalog::ProductRecord;
use crate::config::ClientConfig;
use crate::store_db::{PdfMetadata, PdfMetadataInput, StoredProduct};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("backend returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("no store selected; run `use-store <code>` or set STORE_COUNTS_STORE")]
    MissingStoreContext,
}

/// Per-item failure reported by `POST /api/products/sync`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemErrorReport {
    pub index: usize,
    pub error: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncResponse {
    pub message: String,
    pub count: usize,
    #[serde(default)]
    pub errors: Vec<ItemErrorReport>,
}

#[derive(Serialize)]
struct SyncRequest<'a> {
    products: &'a [ProductRecord],
}

/// The two calls the sync gateway needs from the backend.
#[async_trait]
pub trait CatalogBackend: Send + Sync {
    /// Store code sent as `X-Store-Code`, if one is selected.
    fn store_code(&self) -> Option<&str>;

    async fn sync_products(&self, products: &[ProductRecord]) -> Result<SyncResponse, ClientError>;

    async fn save_pdf_metadata(
        &self,
        metadata: &PdfMetadataInput,
    ) -> Result<PdfMetadata, ClientError>;
}

/// HTTP client for the REST backend.
pub struct BackendClient {
    http: Client,
    base_url: String,
    session_token: Option<String>,
    store_code: Option<String>,
}

impl BackendClient {
    pub fn new(
        base_url: impl Into<String>,
        session_token: Option<String>,
        store_code: Option<String>,
    ) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            session_token,
            store_code,
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(
            config.base_url.clone(),
            config.session_token.clone(),
            config.store_code.clone(),
        )
    }

    pub fn with_store_code(mut self, store_code: Option<String>) -> Self {
        if store_code.is_some() {
            self.store_code = store_code;
        }
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.session_token {
            Some(token) => builder.header("Authorization", format!("Bearer {token}")),
            None => builder,
        }
    }

    fn store_scoped(&self, builder: RequestBuilder) -> Result<RequestBuilder, ClientError> {
        let code = self.store_code.as_deref().ok_or(ClientError::MissingStoreContext)?;
        Ok(self.authorized(builder).header("X-Store-Code", code))
    }

    /// Turn a non-2xx response into `ClientError::Status`, taking the message
    /// from the JSON body when there is one.
    async fn check(response: Response) -> Result<Response, ClientError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
            .unwrap_or(body);
        warn!(status = %status, message = %message, "Backend request failed");
        Err(ClientError::Status {
            status: status.as_u16(),
            message,
        })
    }

    /// Whether the backend answers on `/` at all.
    pub async fn is_reachable(&self) -> bool {
        match self
            .http
            .get(self.url("/"))
            .timeout(Duration::from_secs(3))
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => true,
            Ok(resp) => {
                warn!(status = %resp.status(), "Backend returned non-OK status");
                false
            }
            Err(e) => {
                warn!(error = %e, "Backend not reachable");
                false
            }
        }
    }

    pub async fn fetch_products(&self) -> Result<Vec<StoredProduct>, ClientError> {
        let response = self
            .authorized(self.http.get(self.url("/api/products")))
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    pub async fn fetch_pdf_metadata(&self) -> Result<Option<PdfMetadata>, ClientError> {
        let response = self
            .store_scoped(self.http.get(self.url("/api/pdf-metadata")))?
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }
}

#[async_trait]
impl CatalogBackend for BackendClient {
    fn store_code(&self) -> Option<&str> {
        self.store_code.as_deref()
    }

    async fn sync_products(&self, products: &[ProductRecord]) -> Result<SyncResponse, ClientError> {
        info!(count = products.len(), "Syncing products to backend");
        let mut request = self.authorized(self.http.post(self.url("/api/products/sync")));
        if let Some(code) = &self.store_code {
            request = request.header("X-Store-Code", code);
        }
        let response = request.json(&SyncRequest { products }).send().await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn save_pdf_metadata(
        &self,
        metadata: &PdfMetadataInput,
    ) -> Result<PdfMetadata, ClientError> {
        info!(file_name = ?metadata.file_name, "Saving PDF metadata to backend");
        let response = self
            .store_scoped(self.http.post(self.url("/api/pdf-metadata")))?
            .json(metadata)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ProductGroup;
    use crate::server::test_support::{login, seed_store, spawn_backend, test_state};
    use crate::store_db::{GlobalRole, StoreRole};

    async fn backend() -> (String, String) {
        let state = test_state();
        let token = login(&state, "m@example.com", GlobalRole::Manager).await;
        seed_store(&state, "2475", true, Some(("m@example.com", StoreRole::Manager))).await;
        (spawn_backend(&state).await, token)
    }

    fn record() -> ProductRecord {
        ProductRecord {
            product_number: "P10002".to_string(),
            product_name: "Chicken, Orange Dark Battered K-".to_string(),
            unit: "LB".to_string(),
            w38: "20.09".to_string(),
            w39: "20.41".to_string(),
            w40: "18.42".to_string(),
            w41: "18.59".to_string(),
            conversion: "40".to_string(),
            group: ProductGroup::Wif,
        }
    }

    #[tokio::test]
    async fn test_client_round_trip() {
        let (base_url, token) = backend().await;
        let client = BackendClient::new(format!("{base_url}/"), Some(token), Some("2475".into()));

        assert!(client.is_reachable().await);

        let synced = client.sync_products(&[record()]).await.unwrap();
        assert_eq!(synced.count, 1);
        assert!(synced.errors.is_empty());

        let products = client.fetch_products().await.unwrap();
        assert_eq!(products.len(), 1);
        assert_eq!(products[0].record, record());

        assert!(client.fetch_pdf_metadata().await.unwrap().is_none());
        let stored = client
            .save_pdf_metadata(&PdfMetadataInput {
                page_count: Some(2),
                file_name: Some("week41.pdf".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(stored.page_count, 2);
        assert_eq!(client.fetch_pdf_metadata().await.unwrap(), Some(stored));
    }

    #[tokio::test]
    async fn test_status_errors_carry_backend_message() {
        let (base_url, token) = backend().await;
        let client = BackendClient::new(base_url, Some(token), Some("9999".into()));
        let err = client.fetch_pdf_metadata().await.unwrap_err();
        match err {
            ClientError::Status { status, message } => {
                assert_eq!(status, 404);
                assert_eq!(message, "Store not found");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_missing_store_code_fails_before_sending() {
        let client = BackendClient::new("http://127.0.0.1:9", None, None);
        let err = client
            .save_pdf_metadata(&PdfMetadataInput::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::MissingStoreContext));
    }
}

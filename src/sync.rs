use crate::catalog::ProductRecord;
use crate::client::{CatalogBackend, ClientError, ItemErrorReport};
use crate::store_db::{PdfMetadata, PdfMetadataInput};
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("no store selected; run `use-store <code>` or pass --store")]
    MissingStoreContext,

    #[error("product sync failed, nothing was saved: {0}")]
    ProductsFailed(#[source] ClientError),

    /// Products are stored but the metadata record is not. `pending` can be
    /// handed to `SyncGateway::retry_metadata`.
    #[error("{products_synced} products saved, but PDF metadata was not: {source}")]
    MetadataFailed {
        products_synced: usize,
        item_errors: Vec<ItemErrorReport>,
        pending: PdfMetadataInput,
        #[source]
        source: ClientError,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncReport {
    pub products_synced: usize,
    pub item_errors: Vec<ItemErrorReport>,
    pub metadata: PdfMetadata,
}

/// Two-step persistence of one upload: the product batch, then the PDF
/// metadata for the selected store.
pub struct SyncGateway<'a> {
    backend: &'a dyn CatalogBackend,
}

impl<'a> SyncGateway<'a> {
    pub fn new(backend: &'a dyn CatalogBackend) -> Self {
        Self { backend }
    }

    pub async fn sync(
        &self,
        products: &[ProductRecord],
        metadata: PdfMetadataInput,
    ) -> Result<SyncReport, SyncError> {
        let Some(store) = self.backend.store_code() else {
            warn!("Sync requested without a store code");
            return Err(SyncError::MissingStoreContext);
        };

        // the backend rejects an empty batch, so a sheet without products
        // only records its metadata
        let (products_synced, item_errors) = if products.is_empty() {
            info!(store = %store, "No products to sync, saving metadata only");
            (0, Vec::new())
        } else {
            let response = self
                .backend
                .sync_products(products)
                .await
                .map_err(SyncError::ProductsFailed)?;
            if !response.errors.is_empty() {
                warn!(
                    store = %store,
                    rejected = response.errors.len(),
                    "Backend rejected some products"
                );
            }
            (response.count, response.errors)
        };

        let metadata = match self.backend.save_pdf_metadata(&metadata).await {
            Ok(stored) => stored,
            Err(source) => {
                error!(
                    store = %store,
                    products_synced,
                    error = %source,
                    "Products saved but PDF metadata was not"
                );
                return Err(SyncError::MetadataFailed {
                    products_synced,
                    item_errors,
                    pending: metadata,
                    source,
                });
            }
        };

        info!(store = %store, products_synced, "Sync complete");
        Ok(SyncReport {
            products_synced,
            item_errors,
            metadata,
        })
    }

    /// Re-run only the metadata step after `SyncError::MetadataFailed`.
    pub async fn retry_metadata(&self, pending: &PdfMetadataInput) -> Result<PdfMetadata, SyncError> {
        if self.backend.store_code().is_none() {
            return Err(SyncError::MissingStoreContext);
        }
        self.backend
            .save_pdf_metadata(pending)
            .await
            .map_err(|source| SyncError::MetadataFailed {
                products_synced: 0,
                item_errors: Vec::new(),
                pending: pending.clone(),
                source,
            })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::catalog::ProductGroup;
    use crate::client::SyncResponse;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// In-memory backend that records calls and fails on demand.
    #[derive(Default)]
    pub(crate) struct MockBackend {
        pub store_code: Option<String>,
        pub fail_products: bool,
        /// Number of metadata calls that fail before one succeeds.
        pub metadata_failures: AtomicUsize,
        pub product_calls: AtomicUsize,
        pub metadata_calls: AtomicUsize,
        pub saved: Mutex<Vec<ProductRecord>>,
    }

    impl MockBackend {
        pub(crate) fn for_store(code: &str) -> Self {
            Self {
                store_code: Some(code.to_string()),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl CatalogBackend for MockBackend {
        fn store_code(&self) -> Option<&str> {
            self.store_code.as_deref()
        }

        async fn sync_products(
            &self,
            products: &[ProductRecord],
        ) -> Result<SyncResponse, ClientError> {
            self.product_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_products {
                return Err(ClientError::Status {
                    status: 500,
                    message: "Failed to sync products".to_string(),
                });
            }
            self.saved.lock().unwrap().extend_from_slice(products);
            Ok(SyncResponse {
                message: "Products synced successfully".to_string(),
                count: products.len(),
                errors: Vec::new(),
            })
        }

        async fn save_pdf_metadata(
            &self,
            metadata: &PdfMetadataInput,
        ) -> Result<PdfMetadata, ClientError> {
            self.metadata_calls.fetch_add(1, Ordering::SeqCst);
            let remaining = self.metadata_failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.metadata_failures.store(remaining - 1, Ordering::SeqCst);
                return Err(ClientError::Status {
                    status: 503,
                    message: "unavailable".to_string(),
                });
            }
            Ok(PdfMetadata {
                id: "meta-1".to_string(),
                store_id: "store-1".to_string(),
                page_count: metadata.page_count.unwrap_or(0),
                title: metadata.title.clone(),
                file_name: metadata.file_name.clone(),
                metadata: metadata.metadata.clone().unwrap_or_default(),
                created_at: "2025-01-01T00:00:00.000Z".to_string(),
                updated_at: None,
            })
        }
    }

    fn record(number: &str) -> ProductRecord {
        ProductRecord {
            product_number: number.to_string(),
            product_name: "Test".to_string(),
            unit: "CS".to_string(),
            w38: "1".to_string(),
            w39: "1".to_string(),
            w40: "1".to_string(),
            w41: "1".to_string(),
            conversion: String::new(),
            group: ProductGroup::Others,
        }
    }

    fn input() -> PdfMetadataInput {
        PdfMetadataInput {
            page_count: Some(3),
            file_name: Some("week41.pdf".to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_missing_store_makes_no_calls() {
        let backend = MockBackend::default();
        let err = SyncGateway::new(&backend)
            .sync(&[record("P1")], input())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::MissingStoreContext));
        assert_eq!(backend.product_calls.load(Ordering::SeqCst), 0);
        assert_eq!(backend.metadata_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_successful_sync() {
        let backend = MockBackend::for_store("2475");
        let report = SyncGateway::new(&backend)
            .sync(&[record("P1"), record("P2")], input())
            .await
            .unwrap();
        assert_eq!(report.products_synced, 2);
        assert!(report.item_errors.is_empty());
        assert_eq!(report.metadata.page_count, 3);
        assert_eq!(backend.saved.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_product_failure_skips_metadata() {
        let backend = MockBackend {
            fail_products: true,
            ..MockBackend::for_store("2475")
        };
        let err = SyncGateway::new(&backend)
            .sync(&[record("P1")], input())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::ProductsFailed(_)));
        assert_eq!(backend.metadata_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_metadata_failure_is_recoverable() {
        let backend = MockBackend {
            metadata_failures: AtomicUsize::new(1),
            ..MockBackend::for_store("2475")
        };
        let gateway = SyncGateway::new(&backend);
        let err = gateway.sync(&[record("P1")], input()).await.unwrap_err();

        let SyncError::MetadataFailed {
            products_synced,
            pending,
            ..
        } = err
        else {
            panic!("expected MetadataFailed, got {err}");
        };
        assert_eq!(products_synced, 1);
        assert_eq!(pending, input());

        let stored = gateway.retry_metadata(&pending).await.unwrap();
        assert_eq!(stored.file_name.as_deref(), Some("week41.pdf"));
        assert_eq!(backend.product_calls.load(Ordering::SeqCst), 1);
        assert_eq!(backend.metadata_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_empty_batch_saves_metadata_only() {
        let backend = MockBackend::for_store("2475");
        let report = SyncGateway::new(&backend).sync(&[], input()).await.unwrap();
        assert_eq!(report.products_synced, 0);
        assert_eq!(backend.product_calls.load(Ordering::SeqCst), 0);
        assert_eq!(backend.metadata_calls.load(Ordering::SeqCst), 1);
    }
}

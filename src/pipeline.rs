// src/pipeline.rs

use crate::anomaly::AnomalySummary;
use crate::catalog::{ClassificationTables, ProductRecord, parse_product_rows};
use crate::client::CatalogBackend;
use crate::pdf_extract::{ExtractError, ParsedPdf, extract_document};
use crate::store_db::PdfMetadataInput;
use crate::sync::{SyncError, SyncGateway, SyncReport};
use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Progress of one upload, published on a watch channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum JobStatus {
    Reading,
    Parsing { rows: usize },
    Classifying { products: usize },
    Saving { products: usize },
    Done { products: usize, anomalies: AnomalySummary },
    Failed { message: String },
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error("extraction task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error(transparent)]
    Sync(#[from] SyncError),
}

/// Classified products of one document, ready to sync.
#[derive(Debug, Clone)]
pub struct PreparedBatch {
    pub products: Vec<ProductRecord>,
    /// Raw rows the parser could not read.
    pub skipped: Vec<String>,
    pub anomalies: AnomalySummary,
    pub metadata: PdfMetadataInput,
}

pub fn prepare_batch(parsed: &ParsedPdf, tables: &ClassificationTables) -> PreparedBatch {
    let rows = parse_product_rows(&parsed.rows);
    let products = tables.classify_all(rows.products);
    let anomalies = AnomalySummary::from_products(&products);

    PreparedBatch {
        products,
        skipped: rows.skipped,
        anomalies,
        metadata: PdfMetadataInput {
            page_count: i64::try_from(parsed.page_count).ok(),
            title: parsed.title(),
            file_name: None,
            metadata: (!parsed.metadata.is_empty()).then(|| Value::Object(parsed.metadata.clone())),
        },
    }
}

fn publish(status_tx: &watch::Sender<JobStatus>, status: JobStatus) {
    match &status {
        JobStatus::Failed { message } => error!(message = %message, "Upload failed"),
        other => info!(status = ?other, "Upload status"),
    }
    status_tx.send_replace(status);
}

/// Read, extract, classify and sync one PDF. Every transition is published on
/// `status_tx`; the final state is `Done` or `Failed`. A metadata-only failure
/// is retried up to `metadata_retries` times; products are never resent.
pub async fn run_upload(
    path: &Path,
    tables: &ClassificationTables,
    backend: &dyn CatalogBackend,
    status_tx: &watch::Sender<JobStatus>,
    metadata_retries: usize,
) -> Result<(PreparedBatch, SyncReport), PipelineError> {
    let result = upload(path, tables, backend, status_tx, metadata_retries).await;
    match &result {
        Ok((batch, report)) => publish(
            status_tx,
            JobStatus::Done {
                products: report.products_synced,
                anomalies: batch.anomalies,
            },
        ),
        Err(e) => publish(status_tx, JobStatus::Failed { message: e.to_string() }),
    }
    result
}

async fn upload(
    path: &Path,
    tables: &ClassificationTables,
    backend: &dyn CatalogBackend,
    status_tx: &watch::Sender<JobStatus>,
    metadata_retries: usize,
) -> Result<(PreparedBatch, SyncReport), PipelineError> {
    publish(status_tx, JobStatus::Reading);
    let bytes = tokio::fs::read(path).await.map_err(|source| PipelineError::Read {
        path: path.display().to_string(),
        source,
    })?;

    // the buffer moves into the task and is dropped there
    let parsed = tokio::task::spawn_blocking(move || extract_document(&bytes)).await??;
    publish(status_tx, JobStatus::Parsing { rows: parsed.rows.len() });

    let mut batch = prepare_batch(&parsed, tables);
    batch.metadata.file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned());
    publish(
        status_tx,
        JobStatus::Classifying {
            products: batch.products.len(),
        },
    );

    publish(
        status_tx,
        JobStatus::Saving {
            products: batch.products.len(),
        },
    );
    let gateway = SyncGateway::new(backend);
    let mut outcome = gateway.sync(&batch.products, batch.metadata.clone()).await;
    for attempt in 1..=metadata_retries {
        let Err(SyncError::MetadataFailed {
            products_synced,
            item_errors,
            pending,
            source,
        }) = outcome
        else {
            break;
        };
        warn!(attempt, products_synced, error = %source, "Retrying PDF metadata");
        outcome = match gateway.retry_metadata(&pending).await {
            Ok(metadata) => Ok(SyncReport {
                products_synced,
                item_errors,
                metadata,
            }),
            Err(SyncError::MetadataFailed { source, .. }) => Err(SyncError::MetadataFailed {
                products_synced,
                item_errors,
                pending,
                source,
            }),
            Err(other) => Err(other),
        };
    }

    Ok((batch, outcome?))
}

use super::auth::StoreContext;
use super::{AppResult, AppState, audit};
use crate::store_db::{AuditEntry, PdfMetadata, PdfMetadataInput};
use axum::{Json, extract::State};
use serde_json::json;
use tracing::info;

pub async fn current_metadata(
    State(state): State<AppState>,
    ctx: StoreContext,
) -> AppResult<Json<Option<PdfMetadata>>> {
    let metadata = state.db.lock().await.pdf_metadata_for_store(&ctx.store.id)?;
    Ok(Json(metadata))
}

/// Replace the store's metadata record. The delete and insert share one
/// transaction, under the connection lock.
pub async fn replace_metadata(
    State(state): State<AppState>,
    ctx: StoreContext,
    Json(input): Json<PdfMetadataInput>,
) -> AppResult<Json<PdfMetadata>> {
    let mut db = state.db.lock().await;
    let stored = db.replace_pdf_metadata(&ctx.store.id, &input)?;
    audit(&db, &AuditEntry {
        store_id: Some(&ctx.store.id),
        user_id: &ctx.user.id,
        action: "replace",
        entity: "PdfMetadata",
        entity_id: Some(&stored.id),
        payload: Some(json!({ "fileName": stored.file_name, "pageCount": stored.page_count })),
    });

    info!(
        store = %ctx.store.code,
        user_id = %ctx.user.id,
        role = ?ctx.role,
        page_count = stored.page_count,
        "PDF metadata stored"
    );
    Ok(Json(stored))
}

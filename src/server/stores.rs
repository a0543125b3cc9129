use super::auth::CurrentUser;
use super::{AppError, AppResult, AppState, audit};
use crate::store_db::{AuditEntry, GlobalRole, Store, StoreChanges, StoreRole};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use rusqlite::ErrorCode;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;
use validator::Validate;

const DEFAULT_PAGE_SIZE: u32 = 20;
const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Deserialize)]
pub struct ListParams {
    page: Option<u32>,
    limit: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    total: u64,
    per_page: u32,
    current_page: u32,
    last_page: u64,
}

#[derive(Debug, Serialize)]
pub struct StorePage {
    meta: Pagination,
    data: Vec<Store>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateStore {
    #[validate(length(min = 1, max = 50))]
    code: String,
    #[validate(length(min = 2, max = 255))]
    name: String,
    #[validate(length(max = 100))]
    timezone: Option<String>,
    is_active: Option<bool>,
}

#[derive(Debug, Deserialize, Serialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStore {
    #[validate(length(min = 1, max = 50))]
    code: Option<String>,
    #[validate(length(min = 2, max = 255))]
    name: Option<String>,
    #[validate(length(max = 100))]
    timezone: Option<String>,
    is_active: Option<bool>,
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(e, rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::ConstraintViolation)
}

pub async fn list_stores(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(params): Query<ListParams>,
) -> AppResult<Json<StorePage>> {
    let page = params.page.unwrap_or(1).max(1);
    let limit = params
        .limit
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);

    let visible_to = (!user.is_admin()).then_some(user.id.as_str());
    let (data, total) = state.db.lock().await.list_stores(visible_to, page, limit)?;

    Ok(Json(StorePage {
        meta: Pagination {
            total,
            per_page: limit,
            current_page: page,
            last_page: total.div_ceil(u64::from(limit)).max(1),
        },
        data,
    }))
}

pub async fn get_store(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> AppResult<Json<Store>> {
    let db = state.db.lock().await;
    let store = db
        .get_store(&id)?
        .ok_or_else(|| AppError::not_found("Store not found"))?;

    if !user.is_admin() && db.store_role(&user.id, &store.id)?.is_none() {
        return Err(AppError::forbidden("Access denied"));
    }
    Ok(Json(store))
}

pub async fn create_store(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(payload): Json<CreateStore>,
) -> AppResult<(StatusCode, Json<Store>)> {
    if !matches!(user.role, GlobalRole::Admin | GlobalRole::Manager) {
        return Err(AppError::forbidden(
            "Only managers and admins can create stores",
        ));
    }
    payload.validate()?;

    let db = state.db.lock().await;
    let store = db
        .create_store(
            &payload.code,
            &payload.name,
            payload.timezone.as_deref(),
            payload.is_active.unwrap_or(true),
        )
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::Conflict("Store code already exists".to_string())
            } else {
                AppError::Database(e)
            }
        })?;

    let grant = if user.is_admin() {
        StoreRole::Admin
    } else {
        StoreRole::Manager
    };
    db.grant_store_access(&user.id, &store.id, grant)?;
    audit(&db, &AuditEntry {
        store_id: Some(&store.id),
        user_id: &user.id,
        action: "create",
        entity: "Store",
        entity_id: Some(&store.id),
        payload: None,
    });
    drop(db);

    state.cache.invalidate(&store.code).await;
    info!(store = %store.code, user_id = %user.id, "Store created via API");
    Ok((StatusCode::CREATED, Json(store)))
}

pub async fn update_store(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
    Json(payload): Json<UpdateStore>,
) -> AppResult<Json<Store>> {
    let db = state.db.lock().await;
    let existing = db
        .get_store(&id)?
        .ok_or_else(|| AppError::not_found("Store not found"))?;

    let can_update = user.is_admin()
        || db
            .store_role(&user.id, &existing.id)?
            .is_some_and(|role| role.can_manage());
    if !can_update {
        return Err(AppError::forbidden("Only manager or admin can update store"));
    }
    payload.validate()?;

    let changes = StoreChanges {
        code: payload.code.clone(),
        name: payload.name.clone(),
        timezone: payload.timezone.clone(),
        is_active: payload.is_active,
    };
    let updated = db
        .update_store(&existing.id, &changes)
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::Conflict("Store code already exists".to_string())
            } else {
                AppError::Database(e)
            }
        })?
        .ok_or_else(|| AppError::not_found("Store not found"))?;

    audit(&db, &AuditEntry {
        store_id: Some(&updated.id),
        user_id: &user.id,
        action: "update",
        entity: "Store",
        entity_id: Some(&updated.id),
        payload: serde_json::to_value(&payload).ok(),
    });
    drop(db);

    // the old and the new code may both be cached
    state.cache.invalidate(&existing.code).await;
    state.cache.invalidate(&updated.code).await;
    info!(store = %updated.code, user_id = %user.id, "Store updated via API");
    Ok(Json(updated))
}

pub async fn delete_store(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> AppResult<Json<Value>> {
    let db = state.db.lock().await;
    let store = db
        .get_store(&id)?
        .ok_or_else(|| AppError::not_found("Store not found"))?;

    if !user.is_admin() {
        return Err(AppError::forbidden("Only admin can delete store"));
    }

    db.delete_store(&store.id)?;
    audit(&db, &AuditEntry {
        store_id: Some(&store.id),
        user_id: &user.id,
        action: "delete",
        entity: "Store",
        entity_id: Some(&store.id),
        payload: Some(json!({ "code": store.code })),
    });
    drop(db);

    state.cache.invalidate_by_store_id(&store.id).await;
    info!(store = %store.code, user_id = %user.id, "Store deleted via API");
    Ok(Json(json!({ "message": "Store deleted successfully" })))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use crate::store_db::{GlobalRole, StoreRole};
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    #[tokio::test]
    async fn test_create_store_permissions_and_grant() {
        let state = test_state();
        let associate = login(&state, "a@example.com", GlobalRole::Associate).await;
        let manager = login(&state, "m@example.com", GlobalRole::Manager).await;
        let app = test_app(&state);
        let body = json!({ "code": "2475", "name": "Downtown" });

        let (status, _, resp) = send(
            &app,
            request(Method::POST, "/api/stores", Some(&associate), None, Some(body.clone())),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(resp["message"], "Only managers and admins can create stores");

        let (status, _, store) = send(
            &app,
            request(Method::POST, "/api/stores", Some(&manager), None, Some(body.clone())),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(store["timezone"], "America/Los_Angeles");
        assert_eq!(store["isActive"], true);

        let db = state.db.lock().await;
        let user = db.get_user_by_email("m@example.com").unwrap().unwrap();
        let store_id = store["id"].as_str().unwrap();
        assert_eq!(
            db.store_role(&user.id, store_id).unwrap(),
            Some(StoreRole::Manager)
        );
        assert_eq!(
            db.audit_actions().unwrap(),
            vec![("create".to_string(), "Store".to_string())]
        );
        drop(db);

        let (status, _, resp) = send(
            &app,
            request(Method::POST, "/api/stores", Some(&manager), None, Some(body)),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(resp["message"], "Store code already exists");
    }

    #[tokio::test]
    async fn test_create_store_validation() {
        let state = test_state();
        let admin = login(&state, "root@example.com", GlobalRole::Admin).await;
        let app = test_app(&state);

        let long_code = "9".repeat(51);
        for body in [
            json!({ "code": "", "name": "Downtown" }),
            json!({ "code": long_code, "name": "Downtown" }),
            json!({ "code": "1", "name": "D" }),
            json!({ "code": "1", "name": "Downtown", "timezone": "x".repeat(101) }),
        ] {
            let (status, _, resp) = send(
                &app,
                request(Method::POST, "/api/stores", Some(&admin), None, Some(body)),
            )
            .await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(resp["message"], "Validation failed");
        }
    }

    #[tokio::test]
    async fn test_list_is_filtered_for_non_admins() {
        let state = test_state();
        let admin = login(&state, "root@example.com", GlobalRole::Admin).await;
        let associate = login(&state, "a@example.com", GlobalRole::Associate).await;
        seed_store(&state, "1", true, Some(("a@example.com", StoreRole::Associate))).await;
        seed_store(&state, "2", true, None).await;
        seed_store(&state, "3", true, None).await;
        let app = test_app(&state);

        let (_, _, all) = send(
            &app,
            request(Method::GET, "/api/stores?page=1&limit=2", Some(&admin), None, None),
        )
        .await;
        assert_eq!(all["meta"]["total"], 3);
        assert_eq!(all["meta"]["lastPage"], 2);
        assert_eq!(all["data"].as_array().unwrap().len(), 2);

        let (_, _, mine) = send(
            &app,
            request(Method::GET, "/api/stores", Some(&associate), None, None),
        )
        .await;
        assert_eq!(mine["meta"]["total"], 1);
        assert_eq!(mine["meta"]["perPage"], 20);
        assert_eq!(mine["data"][0]["code"], "1");
    }

    #[tokio::test]
    async fn test_get_store_access() {
        let state = test_state();
        let associate = login(&state, "a@example.com", GlobalRole::Associate).await;
        let mine = seed_store(&state, "1", true, Some(("a@example.com", StoreRole::Associate))).await;
        let other = seed_store(&state, "2", true, None).await;
        let app = test_app(&state);

        let (status, _, body) = send(
            &app,
            request(Method::GET, &format!("/api/stores/{}", mine.id), Some(&associate), None, None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["code"], "1");

        let (status, _, _) = send(
            &app,
            request(Method::GET, &format!("/api/stores/{}", other.id), Some(&associate), None, None),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _, _) = send(
            &app,
            request(Method::GET, "/api/stores/nope", Some(&associate), None, None),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_update_invalidates_cached_store() {
        let state = test_state();
        let manager = login(&state, "m@example.com", GlobalRole::Manager).await;
        let associate = login(&state, "a@example.com", GlobalRole::Associate).await;
        let store = seed_store(&state, "2475", true, Some(("m@example.com", StoreRole::Manager))).await;
        {
            let db = state.db.lock().await;
            let user = db.get_user_by_email("a@example.com").unwrap().unwrap();
            db.grant_store_access(&user.id, &store.id, StoreRole::Associate)
                .unwrap();
        }
        let app = test_app(&state);
        let uri = format!("/api/stores/{}", store.id);

        // warm the cache through the store context
        let (status, _, _) = send(
            &app,
            request(Method::GET, "/api/pdf-metadata", Some(&manager), Some("2475"), None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _, resp) = send(
            &app,
            request(Method::PUT, &uri, Some(&associate), None, Some(json!({ "isActive": false }))),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(resp["message"], "Only manager or admin can update store");

        let (status, _, updated) = send(
            &app,
            request(Method::PUT, &uri, Some(&manager), None, Some(json!({ "isActive": false }))),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["isActive"], false);
        assert_eq!(updated["name"], "Test Store");

        let (status, _, resp) = send(
            &app,
            request(Method::GET, "/api/pdf-metadata", Some(&manager), Some("2475"), None),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(resp["message"], "Store is inactive");
    }

    #[tokio::test]
    async fn test_delete_store() {
        let state = test_state();
        let admin = login(&state, "root@example.com", GlobalRole::Admin).await;
        let manager = login(&state, "m@example.com", GlobalRole::Manager).await;
        let store = seed_store(&state, "2475", true, Some(("m@example.com", StoreRole::Admin))).await;
        let app = test_app(&state);
        let uri = format!("/api/stores/{}", store.id);

        let (status, _, resp) = send(&app, request(Method::DELETE, &uri, Some(&manager), None, None)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(resp["message"], "Only admin can delete store");

        let (status, _, resp) = send(&app, request(Method::DELETE, &uri, Some(&admin), None, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(resp["message"], "Store deleted successfully");

        let (status, _, resp) = send(
            &app,
            request(Method::GET, "/api/pdf-metadata", Some(&admin), Some("2475"), None),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(resp["message"], "Store not found");
    }
}

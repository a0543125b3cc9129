use super::auth::CurrentUser;
use super::{AppError, AppResult, AppState, audit};
use crate::catalog::{ClassificationTables, ProductGroup, ProductRecord};
use crate::store_db::{AuditEntry, StoredProduct};
use axum::{
    Json,
    extract::{Path, State},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, warn};

pub async fn list_products(
    State(state): State<AppState>,
    _user: CurrentUser,
) -> AppResult<Json<Vec<StoredProduct>>> {
    let products = state.db.lock().await.list_products()?;
    Ok(Json(products))
}

pub async fn get_product(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<Json<StoredProduct>> {
    state
        .db
        .lock()
        .await
        .get_product(&id)?
        .map(Json)
        .ok_or_else(|| AppError::not_found("Product not found"))
}

/// One entry of a sync batch. Everything but the product number is lenient,
/// like the count sheet itself.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SyncItem {
    #[serde(default)]
    product_number: Option<String>,
    #[serde(default)]
    product_name: Option<String>,
    #[serde(default)]
    unit: Option<String>,
    #[serde(default)]
    w38: Option<String>,
    #[serde(default)]
    w39: Option<String>,
    #[serde(default)]
    w40: Option<String>,
    #[serde(default)]
    w41: Option<String>,
    #[serde(default)]
    conversion: Option<String>,
    #[serde(default)]
    group: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ItemError {
    pub index: usize,
    pub error: String,
    pub data: Value,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn week(value: Option<String>) -> String {
    non_empty(value).unwrap_or_else(|| "0".to_string())
}

/// Turn one raw item into a record, filling a missing conversion or group
/// from the server's tables.
fn item_to_record(raw: &Value, tables: &ClassificationTables) -> Result<ProductRecord, String> {
    let item: SyncItem = serde_json::from_value(raw.clone()).map_err(|e| e.to_string())?;
    let product_number = non_empty(item.product_number).ok_or("Missing productNumber")?;

    let group = match non_empty(item.group) {
        Some(name) => name.parse::<ProductGroup>()?,
        None => tables.group_for(&product_number),
    };
    let conversion = non_empty(item.conversion)
        .or_else(|| tables.conversion_for(&product_number).map(str::to_string))
        .unwrap_or_default();

    Ok(ProductRecord {
        product_name: item.product_name.unwrap_or_default().trim().to_string(),
        unit: item.unit.unwrap_or_default(),
        w38: week(item.w38),
        w39: week(item.w39),
        w40: week(item.w40),
        w41: week(item.w41),
        conversion,
        group,
        product_number,
    })
}

pub async fn sync_products(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(body): Json<Value>,
) -> AppResult<Json<Value>> {
    let Some(items) = body.get("products").and_then(Value::as_array) else {
        return Err(AppError::bad_request("Products must be an array"));
    };
    if items.is_empty() {
        return Err(AppError::bad_request("Products array is empty"));
    }

    let db = state.db.lock().await;
    let mut count = 0usize;
    let mut errors: Vec<ItemError> = Vec::new();

    for (index, raw) in items.iter().enumerate() {
        let result = item_to_record(raw, &state.tables)
            .and_then(|record| db.upsert_product(&record).map_err(|e| e.to_string()));
        match result {
            Ok(_) => count += 1,
            Err(error) => {
                warn!(index, error = %error, "Skipping product in sync batch");
                errors.push(ItemError {
                    index,
                    error,
                    data: raw.clone(),
                });
            }
        }
    }

    audit(&db, &AuditEntry {
        store_id: None,
        user_id: &user.id,
        action: "sync",
        entity: "Product",
        entity_id: None,
        payload: Some(json!({ "count": count, "errors": errors.len() })),
    });
    drop(db);

    info!(count, errors = errors.len(), "Product sync completed");

    let mut response = json!({
        "message": "Products synced successfully",
        "count": count,
    });
    if !errors.is_empty() {
        response["errors"] = json!(errors);
    }
    Ok(Json(response))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use crate::store_db::GlobalRole;
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    #[tokio::test]
    async fn test_sync_validates_batch_shape() {
        let state = test_state();
        let token = login(&state, "a@example.com", GlobalRole::Associate).await;
        let app = test_app(&state);

        for body in [json!({}), json!({ "products": "P1" }), json!({ "products": {} })] {
            let (status, _, resp) = send(
                &app,
                request(Method::POST, "/api/products/sync", Some(&token), None, Some(body)),
            )
            .await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(resp["message"], "Products must be an array");
        }

        let (status, _, resp) = send(
            &app,
            request(
                Method::POST,
                "/api/products/sync",
                Some(&token),
                None,
                Some(json!({ "products": [] })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(resp["message"], "Products array is empty");
    }

    #[tokio::test]
    async fn test_sync_upserts_and_reports_item_errors() {
        let state = test_state();
        let token = login(&state, "a@example.com", GlobalRole::Associate).await;
        let app = test_app(&state);

        let batch = json!({ "products": [
            {
                "productNumber": "P10002",
                "productName": "Chicken, Orange Dark Battered K-",
                "unit": "LB",
                "w38": "20.09", "w39": "20.41", "w40": "18.42", "w41": "18.59",
                "conversion": "40",
                "group": "WIF"
            },
            { "productName": "No number", "unit": "CS" },
            { "productNumber": "P5007", "unit": "LB", "w38": "1" },
            { "productNumber": "P1", "group": "Desserts" },
            "not an object"
        ]});
        let (status, _, resp) = send(
            &app,
            request(Method::POST, "/api/products/sync", Some(&token), None, Some(batch)),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(resp["message"], "Products synced successfully");
        assert_eq!(resp["count"], 2);
        let errors = resp["errors"].as_array().unwrap();
        let indexes: Vec<_> = errors.iter().map(|e| e["index"].as_u64().unwrap()).collect();
        assert_eq!(indexes, vec![1, 3, 4]);
        assert_eq!(errors[0]["error"], "Missing productNumber");
        assert_eq!(errors[0]["data"]["productName"], "No number");

        // missing fields are filled in and classified server-side
        let (status, _, beef) = send(
            &app,
            request(Method::GET, "/api/products/P5007", Some(&token), None, None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(beef["group"], "WIF Beef");
        assert_eq!(beef["conversion"], "40");
        assert_eq!(beef["w39"], "0");
        assert_eq!(beef["productName"], "");
    }

    #[tokio::test]
    async fn test_resync_updates_existing_product() {
        let state = test_state();
        let token = login(&state, "a@example.com", GlobalRole::Associate).await;
        let app = test_app(&state);

        for w41 in ["1", "7"] {
            let body = json!({ "products": [
                { "productNumber": "P16032", "productName": "Shrimp", "unit": "CS",
                  "w38": "1", "w39": "1", "w40": "1", "w41": w41 }
            ]});
            send(
                &app,
                request(Method::POST, "/api/products/sync", Some(&token), None, Some(body)),
            )
            .await;
        }

        let (_, _, list) = send(
            &app,
            request(Method::GET, "/api/products", Some(&token), None, None),
        )
        .await;
        let list = list.as_array().unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0]["w41"], "7");
        assert_eq!(list[0]["group"], "Seafood");
        assert!(list[0]["id"].is_string());
        assert!(list[0]["createdAt"].is_string());

        let id = list[0]["id"].as_str().unwrap();
        let (status, _, by_id) = send(
            &app,
            request(Method::GET, &format!("/api/products/{id}"), Some(&token), None, None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(by_id["productNumber"], "P16032");
    }

    #[tokio::test]
    async fn test_audit_failure_does_not_fail_a_saved_sync() {
        let state = test_state();
        let token = login(&state, "a@example.com", GlobalRole::Associate).await;
        state.db.lock().await.drop_audit_log().unwrap();

        let body = json!({ "products": [
            { "productNumber": "P16032", "productName": "Shrimp", "unit": "CS",
              "w38": "1", "w39": "1", "w40": "1", "w41": "1" }
        ]});
        let (status, _, resp) = send(
            &test_app(&state),
            request(Method::POST, "/api/products/sync", Some(&token), None, Some(body)),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(resp["count"], 1);
        assert!(state.db.lock().await.get_product("P16032").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_unknown_product_is_404() {
        let state = test_state();
        let token = login(&state, "a@example.com", GlobalRole::Associate).await;
        let (status, _, resp) = send(
            &test_app(&state),
            request(Method::GET, "/api/products/P404", Some(&token), None, None),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(resp["message"], "Product not found");
    }
}

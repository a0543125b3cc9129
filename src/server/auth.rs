//! Session and store-context extractors

use super::AppState;
use super::error::AppError;
use crate::store_db::{Store, StoreRole, User};
use axum::{
    extract::FromRequestParts,
    http::{HeaderMap, header, request::Parts},
};
use tracing::{debug, warn};

pub const STORE_CODE_HEADER: &str = "x-store-code";

/// Session token from `Authorization: Bearer <token>`, else the `session`
/// cookie.
pub fn session_token(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());
    if let Some(token) = bearer {
        return Some(token.to_string());
    }

    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|h| h.to_str().ok())
        .flat_map(|h| h.split(';'))
        .filter_map(|pair| pair.trim().strip_prefix("session="))
        .find(|t| !t.is_empty())
        .map(str::to_string)
}

/// The user behind the request's session token.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        if let Some(user) = parts.extensions.get::<CurrentUser>() {
            return Ok(user.clone());
        }

        let Some(token) = session_token(&parts.headers) else {
            debug!(uri = %parts.uri, "Request without session");
            return Err(AppError::Unauthorized);
        };

        let user = state.db.lock().await.user_for_session(&token)?;
        let Some(user) = user else {
            warn!(uri = %parts.uri, "Unknown session token");
            return Err(AppError::Unauthorized);
        };

        let current = CurrentUser(user);
        parts.extensions.insert(current.clone());
        Ok(current)
    }
}

/// Store selected by the `X-Store-Code` header, resolved through the store
/// cache and checked for activity and access before any handler runs.
#[derive(Debug, Clone)]
pub struct StoreContext {
    pub user: User,
    pub store: Store,
    /// Per-store grant; `None` for global admins without an explicit grant.
    pub role: Option<StoreRole>,
}

impl FromRequestParts<AppState> for StoreContext {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let CurrentUser(user) = CurrentUser::from_request_parts(parts, state).await?;

        let code = parts
            .headers
            .get(STORE_CODE_HEADER)
            .and_then(|h| h.to_str().ok())
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| AppError::bad_request("X-Store-Code header is required"))?;

        let store = state
            .cache
            .get_or_fetch(code, move || async move {
                state.db.lock().await.get_store_by_code(code)
            })
            .await?
            .ok_or_else(|| AppError::not_found("Store not found"))?;

        if !store.is_active {
            return Err(AppError::forbidden("Store is inactive"));
        }

        let role = state.db.lock().await.store_role(&user.id, &store.id)?;
        if role.is_none() && !user.is_admin() {
            warn!(user_id = %user.id, store = %store.code, "Store access denied");
            return Err(AppError::forbidden("Access denied to this store"));
        }

        Ok(StoreContext { user, store, role })
    }
}

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use plaza_shared::errors::AppResult;
use plaza_shared::middleware::ApiPath;
use plaza_shared::types::api::ApiResponse;
use plaza_shared::types::auth::AuthUser;

use crate::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceStatus {
    pub user_id: i64,
    pub online: bool,
}

pub async fn get_presence(
    _auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    ApiPath(user_id): ApiPath<i64>,
) -> AppResult<Json<ApiResponse<PresenceStatus>>> {
    let online = state.sessions.is_online(user_id);
    Ok(Json(ApiResponse::ok(PresenceStatus { user_id, online })))
}

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use plaza_shared::errors::AppResult;
use plaza_shared::middleware::ApiPath;
use plaza_shared::types::api::ApiResponse;
use plaza_shared::types::auth::AuthUser;

use crate::models::{ConversationDetail, ConversationSummary, ResolvedConversation};
use crate::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnreadTotal {
    pub total_unread: u64,
}

/// GET /with/:userId - find or start the conversation with another user.
/// Answers 201 when the conversation was created by this call.
pub async fn get_or_create_with(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    ApiPath(other_id): ApiPath<i64>,
) -> AppResult<(StatusCode, Json<ApiResponse<ResolvedConversation>>)> {
    let resolved = state.chat.get_or_create(auth_user.id, other_id).await?;
    let status = if resolved.is_new { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(ApiResponse::ok(resolved))))
}

/// GET / - the caller's inbox.
pub async fn list_conversations(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<ApiResponse<Vec<ConversationSummary>>>> {
    let mut items = state.chat.list_for_user(auth_user.id).await?;
    for item in &mut items {
        item.other_user_online = item
            .other_user
            .as_ref()
            .is_some_and(|u| state.sessions.is_online(u.id));
    }
    Ok(Json(ApiResponse::ok(items)))
}

pub async fn get_conversation(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    ApiPath(conversation_id): ApiPath<i64>,
) -> AppResult<Json<ApiResponse<ConversationDetail>>> {
    let detail = state.chat.get_conversation(conversation_id, auth_user.id).await?;
    Ok(Json(ApiResponse::ok(detail)))
}

pub async fn unread_count(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<ApiResponse<UnreadTotal>>> {
    let total_unread = state.chat.unread_total(auth_user.id).await?;
    Ok(Json(ApiResponse::ok(UnreadTotal { total_unread })))
}

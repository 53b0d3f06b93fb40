use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use plaza_shared::errors::AppResult;
use plaza_shared::middleware::{ApiJson, ApiPath, ApiQuery};
use plaza_shared::types::api::ApiResponse;
use plaza_shared::types::auth::AuthUser;
use plaza_shared::types::pagination::PaginationParams;

use crate::models::{MessageWithSender, ReadReceipt};
use crate::socket::events::{room_name, ServerEvent};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    #[serde(default)]
    pub content: String,
}

/// GET /:id/messages?page&limit - one page of history, oldest first.
pub async fn list_messages(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    ApiPath(conversation_id): ApiPath<i64>,
    ApiQuery(params): ApiQuery<PaginationParams>,
) -> AppResult<Json<ApiResponse<Vec<MessageWithSender>>>> {
    let (items, pagination) = state
        .chat
        .list_by_conversation(conversation_id, auth_user.id, &params)
        .await?;
    Ok(Json(ApiResponse::paginated(items, pagination)))
}

/// POST /:id/messages - append and push to the conversation room.
pub async fn send_message(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    ApiPath(conversation_id): ApiPath<i64>,
    ApiJson(req): ApiJson<SendMessageRequest>,
) -> AppResult<(StatusCode, Json<ApiResponse<MessageWithSender>>)> {
    let message = state.chat.append(conversation_id, auth_user.id, &req.content).await?;

    let event = ServerEvent::NewMessage(message.clone());
    if let Err(e) = state.io.to(room_name(conversation_id)).emit(event.name(), &event) {
        tracing::warn!(conversation_id, error = %e, "failed to broadcast REST message");
    }

    Ok((StatusCode::CREATED, Json(ApiResponse::ok(message))))
}

/// PUT /:id/read
pub async fn mark_as_read(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    ApiPath(conversation_id): ApiPath<i64>,
) -> AppResult<Json<ApiResponse<ReadReceipt>>> {
    let receipt = state.chat.mark_read(conversation_id, auth_user.id).await?;
    Ok(Json(ApiResponse::ok_with_message(receipt, "conversation marked as read")))
}

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use plaza_shared::types::api::{HealthCheck, HealthResponse, HealthStatus};

use crate::AppState;

pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let database = match state.chat.ping().await {
        Ok(()) => HealthCheck { name: "database".into(), status: HealthStatus::Healthy, message: None },
        Err(e) => {
            tracing::warn!(error = %e, "database health check failed");
            HealthCheck {
                name: "database".into(),
                status: HealthStatus::Unhealthy,
                message: Some(e.public_message()),
            }
        }
    };

    Json(HealthResponse::healthy("plaza-chat", env!("CARGO_PKG_VERSION")).with_checks(vec![database]))
}

use std::sync::Arc;

use axum::routing::{get, put};
use axum::Router;
use serde_json::Value;
use socketioxide::extract::{SocketRef, TryData};
use socketioxide::SocketIo;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use plaza_shared::middleware::{metrics_middleware, AuthState};
use plaza_shared::types::auth::TokenVerifier;

pub mod config;
pub mod models;
pub mod presence;
pub mod routes;
pub mod schema;
pub mod service;
pub mod socket;
pub mod store;
pub mod telemetry;

use config::AppConfig;
use presence::SessionRegistry;
use service::ChatService;
use store::{ChatStore, UserDirectory};

pub struct AppState {
    pub config: AppConfig,
    pub chat: ChatService,
    pub sessions: SessionRegistry,
    pub verifier: TokenVerifier,
    /// Kept here so REST handlers can push into conversation rooms.
    pub io: SocketIo,
}

impl AuthState for AppState {
    fn token_verifier(&self) -> &TokenVerifier {
        &self.verifier
    }
}

/// Assemble the HTTP router and the socket.io namespace over the given stores.
pub fn build_app(
    config: AppConfig,
    store: Arc<dyn ChatStore>,
    users: Arc<dyn UserDirectory>,
) -> (Router, Arc<AppState>) {
    let (sio_layer, io) = SocketIo::builder().build_layer();

    let state = Arc::new(AppState {
        verifier: TokenVerifier::new(config.jwt_secret.clone()),
        config,
        chat: ChatService::new(store, users),
        sessions: SessionRegistry::new(),
        io: io.clone(),
    });

    io.ns("/", {
        let state = state.clone();
        move |socket: SocketRef, TryData::<Value>(auth)| {
            let state = state.clone();
            async move {
                socket::handlers::on_connect_with_state(socket, auth.ok(), state).await;
            }
        }
    });

    let conversations = Router::new()
        .route("/", get(routes::conversations::list_conversations))
        .route("/with/:user_id", get(routes::conversations::get_or_create_with))
        .route("/unread-count", get(routes::conversations::unread_count))
        .route("/:id", get(routes::conversations::get_conversation))
        .route(
            "/:id/messages",
            get(routes::messages::list_messages).post(routes::messages::send_message),
        )
        .route("/:id/read", put(routes::messages::mark_as_read));

    let app = Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/api/presence/:user_id", get(routes::presence::get_presence))
        .nest("/api/conversations", conversations)
        .layer(sio_layer)
        .layer(axum::middleware::from_fn(metrics_middleware))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());

    (app, state)
}

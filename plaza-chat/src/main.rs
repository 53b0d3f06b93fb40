use std::sync::Arc;

use axum::routing::get;
use axum::Router;

use plaza_chat::config::AppConfig;
use plaza_chat::store::pg::PgChatStore;
use plaza_shared::clients::db::create_pool;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    plaza_shared::middleware::init_tracing("plaza-chat");
    let metrics = plaza_shared::middleware::init_metrics()?;
    plaza_chat::telemetry::describe();

    let config = AppConfig::load()?;
    let port = config.port;

    let pool = create_pool(&config.database_url, config.db_pool_size)?;
    let store = Arc::new(PgChatStore::new(pool));

    let (app, _state) = plaza_chat::build_app(config, store.clone(), store);
    let app = app.merge(Router::new().route(
        "/metrics",
        get(move || {
            let metrics = metrics.clone();
            async move { metrics.render() }
        }),
    ));

    let addr = format!("0.0.0.0:{port}");
    tracing::info!(addr = %addr, "plaza-chat starting");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

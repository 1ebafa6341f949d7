mod config;
mod db;
mod frame;
mod geometry;
mod mask;
mod model;
mod registry;
mod routes;
mod services;
mod state;
mod store;
mod visibility;

use std::sync::Arc;

use store::{EntityStore, MemoryStore, PgStore};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = config::AppConfig::from_env();
    let port = config.port;

    let store: Arc<dyn EntityStore> = match config.database_url.as_deref() {
        Some(url) => {
            let pool = db::init_pool(url, config.db_max_connections)
                .await
                .expect("database init failed");
            Arc::new(PgStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set; maps live in memory and are lost on restart");
            Arc::new(MemoryStore::new())
        }
    };
    let state = state::AppState::new(store, config);

    // Spawn the debounced vision worker.
    let _vision = services::vision::spawn_vision_task(state.clone());

    let app = routes::app(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .expect("failed to bind");

    tracing::info!(%port, "tabletop listening");
    axum::serve(listener, app).await.expect("server failed");
}

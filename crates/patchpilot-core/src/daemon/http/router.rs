use crate::AgentService;
use axum::{Extension, Json, Router, routing::get};
use serde_json::{Value, json};
use std::sync::Arc;

use super::{HttpConfig, api, middleware, ws};

/// Gateway routes are served at the root and mirrored under `/api`.
pub fn build_router(service: Arc<AgentService>, config: &HttpConfig) -> Router {
    let cors = middleware::cors::build_cors_layer(config);

    Router::new()
        .route("/", get(identity))
        .route("/health", get(health_check))
        .route("/ws/{owner_id}", get(ws::updates::updates_handler))
        .merge(api::router())
        .nest("/api", api::router())
        .layer(cors)
        .layer(Extension(service))
}

async fn identity() -> Json<Value> {
    Json(json!({ "Hello": "IDE Agent" }))
}

async fn health_check() -> &'static str {
    "OK"
}

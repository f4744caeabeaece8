pub mod tasks;

use axum::Router;

/// Build the gateway API router
pub fn router() -> Router {
    tasks::router()
}

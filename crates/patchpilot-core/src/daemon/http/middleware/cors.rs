use crate::daemon::http::HttpConfig;
use axum::http::HeaderValue;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

pub fn build_cors_layer(config: &HttpConfig) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);

    if config.cors_origins.is_empty() || config.cors_origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();

    if origins.is_empty() {
        layer.allow_origin(Any)
    } else {
        layer.allow_origin(AllowOrigin::list(origins))
    }
}

#[cfg(test)]
mod tests {
    use axum::{Router, body::Body, http::Request, routing::get};
    use tower::ServiceExt;

    use super::*;

    async fn allow_origin_for(origins: &[&str], origin: &str) -> Option<String> {
        let config = HttpConfig {
            cors_origins: origins.iter().map(|o| o.to_string()).collect(),
            ..HttpConfig::default()
        };
        let app = Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(build_cors_layer(&config));
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/")
                    .header("Origin", origin)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        response
            .headers()
            .get("access-control-allow-origin")
            .map(|value| value.to_str().unwrap().to_string())
    }

    #[tokio::test]
    async fn wildcard_allows_any_origin() {
        assert_eq!(
            allow_origin_for(&["*"], "http://ide.example").await.as_deref(),
            Some("*")
        );
    }

    #[tokio::test]
    async fn explicit_list_only_echoes_listed_origins() {
        let listed = ["http://localhost:3000"];
        assert_eq!(
            allow_origin_for(&listed, "http://localhost:3000").await.as_deref(),
            Some("http://localhost:3000")
        );
        assert_eq!(allow_origin_for(&listed, "http://evil.example").await, None);
    }
}

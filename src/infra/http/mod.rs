//! HTTP edge: the discussion read path, write endpoints and cache purge.

mod error;
mod handlers;
mod middleware;
mod state;

pub use error::{ApiError, codes};
pub use handlers::X_CACHE;
pub use middleware::REQUEST_ID_HEADER;
pub use state::HttpState;

use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderName, HeaderValue, Method};
use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::warn;

use crate::config::CorsSettings;

use middleware::{log_responses, set_request_context};

pub fn build_router(state: HttpState, cors: &CorsSettings) -> Router {
    Router::new()
        .route("/discussions", get(handlers::get_discussions))
        .route("/discussions/comments", post(handlers::post_comment))
        .route("/discussions/replies", post(handlers::post_reply))
        .route("/discussions/reactions", post(handlers::post_reaction))
        .route("/cache/purge", post(handlers::purge_cache))
        .route("/healthz", get(handlers::healthz))
        .with_state(state)
        .layer(axum_middleware::from_fn(log_responses))
        .layer(axum_middleware::from_fn(set_request_context))
        .layer(cors_layer(cors))
}

/// Any origin unless an allow-list is configured.
fn cors_layer(settings: &CorsSettings) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .expose_headers([
            HeaderName::from_static(X_CACHE),
            HeaderName::from_static(REQUEST_ID_HEADER),
        ]);

    if settings.allowed_origins.is_empty() {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = settings
        .allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(origin = %origin, error = %err, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}

use std::time::Duration;

use axum::error_handling::HandleErrorLayer;
use axum::http::{header, Method};
use axum::{BoxError, Router};
use tower::timeout::error::Elapsed;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::AppState;

mod auth;
mod cookies;
mod error;
mod handlers;
pub mod json;
mod response;
mod routes;
mod validation;

pub use auth::{extract_token, AuthUser};
pub use error::{AppError, FieldError};
pub use response::ApiResponse;

pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(routes::health())
        .merge(routes::auth(state.clone()))
        .merge(routes::posts(state.clone()))
        .merge(routes::interactions(state.clone()))
        .with_state(state)
}

/// Request ids, tracing, a per-request deadline and CORS around the API.
pub fn with_middleware(router: Router, request_timeout: Duration) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    router.layer(
        ServiceBuilder::new()
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
            .layer(TraceLayer::new_for_http())
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(HandleErrorLayer::new(middleware_error))
            .timeout(request_timeout)
            .layer(cors),
    )
}

/// Renders failures raised by the middleware stack in the API error envelope.
async fn middleware_error(err: BoxError) -> AppError {
    if err.is::<Elapsed>() {
        tracing::warn!("request timed out");
        AppError::request_timeout("request timed out")
    } else {
        tracing::error!(error = %err, "middleware failure");
        AppError::internal("internal server error")
    }
}

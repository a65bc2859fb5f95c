use axum::middleware::from_fn_with_state;
use axum::{routing::get, routing::post, routing::put, Router};

use crate::http::auth::{optional_auth, require_auth};
use crate::http::handlers;
use crate::AppState;

pub fn health() -> Router<AppState> {
    Router::new().route("/health", get(handlers::health))
}

pub fn auth(state: AppState) -> Router<AppState> {
    let public = Router::new()
        .route("/auth/register", post(handlers::register))
        .route("/auth/verify", post(handlers::verify_email))
        .route("/auth/login", post(handlers::login))
        .route("/auth/refresh-token", post(handlers::refresh_token));

    let protected = Router::new()
        .route("/auth/logout", get(handlers::logout))
        .route("/auth/me", get(handlers::get_current_user))
        .route_layer(from_fn_with_state(state, require_auth));

    public.merge(protected)
}

pub fn posts(state: AppState) -> Router<AppState> {
    // Reads personalize `liked` when the caller is known.
    let reads = Router::new()
        .route("/posts", get(handlers::list_posts))
        .route("/post/:id", get(handlers::get_post))
        .route_layer(from_fn_with_state(state.clone(), optional_auth));

    let writes = Router::new()
        .route("/post", post(handlers::create_post))
        .route(
            "/post/:id",
            put(handlers::update_post).delete(handlers::delete_post),
        )
        .route_layer(from_fn_with_state(state, require_auth));

    reads.merge(writes)
}

pub fn interactions(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/interactions/like", post(handlers::like))
        .route("/interactions/unlike", post(handlers::unlike))
        .route("/interactions/comment", post(handlers::create_comment))
        .route(
            "/interactions/comment/:id",
            put(handlers::update_comment).delete(handlers::delete_comment),
        )
        .route("/interactions/post/like/:id", post(handlers::like_post))
        .route("/interactions/post/unlike/:id", post(handlers::unlike_post))
        .route("/interactions/comment/like/:id", post(handlers::like_comment))
        .route(
            "/interactions/comment/unlike/:id",
            post(handlers::unlike_comment),
        )
        .route_layer(from_fn_with_state(state, require_auth))
}

use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, Request, State};
use axum::Json;
use axum_extra::extract::cookie::CookieJar;
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use uuid::Uuid;
use validator::Validate;

use crate::app::auth::{AccountError, AuthService};
use crate::app::engagement::EngagementService;
use crate::app::posts::PostService;
use crate::app::tokens::{TokenError, TokenKind, TokenPair};
use crate::domain::engagement::{Comment, EntityType};
use crate::domain::post::{Post, PostWithComments};
use crate::domain::user::PublicUser;
use crate::http::json::{optional_json_body, ValidJson};
use crate::http::response::ApiResponse;
use crate::http::validation::{
    validate_email_address, validate_entity_type, validate_required, validate_uuid,
    validate_verification_code,
};
use crate::http::{cookies, AppError, AuthUser};
use crate::AppState;

const DEFAULT_PAGE_SIZE: i64 = 20;
const MAX_PAGE_SIZE: i64 = 100;

#[derive(Serialize)]
pub(crate) struct HealthResponse {
    status: &'static str,
}

#[derive(Deserialize)]
pub struct PaginationQuery {
    pub limit: Option<i64>,
    pub cursor: Option<String>,
}

#[derive(Serialize)]
pub struct ListResponse<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
}

fn parse_cursor(cursor: Option<String>) -> Result<Option<(OffsetDateTime, Uuid)>, AppError> {
    let Some(cursor) = cursor else {
        return Ok(None);
    };

    let mut parts = cursor.splitn(2, '/');
    let timestamp = parts
        .next()
        .ok_or_else(|| AppError::bad_request("invalid cursor"))?;
    let id = parts
        .next()
        .ok_or_else(|| AppError::bad_request("invalid cursor"))?;

    let timestamp = OffsetDateTime::parse(timestamp, &Rfc3339)
        .map_err(|_| AppError::bad_request("invalid cursor"))?;
    let id = Uuid::parse_str(id).map_err(|_| AppError::bad_request("invalid cursor"))?;

    Ok(Some((timestamp, id)))
}

fn encode_cursor(cursor: Option<(OffsetDateTime, Uuid)>) -> Option<String> {
    let (timestamp, id) = cursor?;
    let timestamp = timestamp.format(&Rfc3339).ok()?;
    Some(format!("{}/{}", timestamp, id))
}

fn parse_id(raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|_| AppError::bad_request("passed invalid id"))
}

fn auth_service(state: &AppState) -> AuthService {
    AuthService::new(
        state.db.clone(),
        state.tokens.clone(),
        state.mailer.clone(),
        state.mail_timeout,
    )
}

fn session_response(
    state: &AppState,
    jar: CookieJar,
    tokens: TokenPair,
    message: &str,
) -> (CookieJar, ApiResponse<AuthTokenResponse>) {
    let jar = cookies::set_session(
        jar,
        &tokens,
        state.tokens.ttl(TokenKind::Access),
        state.tokens.ttl(TokenKind::Refresh),
        state.cookie_secure,
    );
    let body = AuthTokenResponse {
        access_token: tokens.access.token,
        refresh_token: tokens.refresh.token,
        access_expires_at: tokens.access.expires_at,
        refresh_expires_at: tokens.refresh.expires_at,
    };
    (jar, ApiResponse::ok(body).with_message(message))
}

/// Client-caused account failures are logged as warnings; anything else is an internal
/// error whose cause stays in the logs.
fn account_error(state: &AppState, err: AccountError, action: &'static str) -> AppError {
    let secure = state.cookie_secure;
    match err {
        AccountError::AlreadyRegistered => {
            tracing::warn!(action, "user is already registered");
            AppError::conflict("user is already registered")
        }
        AccountError::InvalidCredentials => {
            tracing::warn!(action, "invalid email or password");
            AppError::unauthorized("invalid email or password")
        }
        AccountError::NotVerified => {
            tracing::warn!(action, "user is not verified");
            AppError::forbidden("user is not verified, please check your email")
        }
        AccountError::InvalidVerificationCode => {
            tracing::warn!(action, "invalid verification code");
            AppError::bad_request("invalid verification code")
        }
        AccountError::UserNotFound => {
            tracing::warn!(action, "token refers to a missing user");
            AppError::unauthorized("user not found").with_cleared_session(secure)
        }
        AccountError::RefreshRevoked => {
            tracing::warn!(action, "refresh token was already rotated or revoked");
            AppError::unauthorized("refresh token has been revoked, please login again")
                .with_cleared_session(secure)
        }
        AccountError::Token(TokenError::Expired) => {
            tracing::warn!(action, "refresh token expired");
            AppError::unauthorized("refresh token expired, please login again")
                .with_cleared_session(secure)
        }
        AccountError::Token(TokenError::Invalid) => {
            tracing::warn!(action, "invalid refresh token");
            AppError::unauthorized("invalid refresh token").with_cleared_session(secure)
        }
        AccountError::Store(err) => {
            tracing::error!(action, error = ?err, "account storage failure");
            AppError::from_sqlx(&err, "user")
        }
        err @ (AccountError::Token(TokenError::Signing(_))
        | AccountError::Mail(_)
        | AccountError::Internal(_)) => {
            tracing::error!(action, error = ?err, "account operation failed");
            AppError::internal("internal server error")
        }
    }
}

pub(crate) async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let status = match state.db.ping().await {
        Ok(()) => "ok",
        Err(err) => {
            tracing::warn!(error = ?err, "database ping failed");
            "degraded"
        }
    };

    Json(HealthResponse { status })
}

// ============================================================================
// Accounts
// ============================================================================

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(deny_unknown_fields, default)]
pub struct RegisterRequest {
    #[validate(custom(function = "validate_required"))]
    pub username: String,
    #[validate(custom(function = "validate_required"))]
    pub password: String,
    #[validate(custom(function = "validate_email_address"))]
    pub email: String,
}

pub async fn register(
    State(state): State<AppState>,
    ValidJson(payload): ValidJson<RegisterRequest>,
) -> Result<ApiResponse<()>, AppError> {
    let user = auth_service(&state)
        .register(payload.username.trim().to_string(), &payload.email, &payload.password)
        .await
        .map_err(|err| account_error(&state, err, "register"))?;

    tracing::info!(user_id = %user.id, "user registered, verification pending");
    Ok(ApiResponse::message(
        "user is registered, please verify your email",
    ))
}

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(deny_unknown_fields, default)]
pub struct VerifyEmailRequest {
    #[validate(custom(function = "validate_email_address"))]
    pub email: String,
    #[validate(custom(function = "validate_verification_code"))]
    pub code: String,
}

pub async fn verify_email(
    State(state): State<AppState>,
    ValidJson(payload): ValidJson<VerifyEmailRequest>,
) -> Result<ApiResponse<()>, AppError> {
    auth_service(&state)
        .verify_email(&payload.email, &payload.code)
        .await
        .map_err(|err| account_error(&state, err, "verify_email"))?;

    Ok(ApiResponse::message("email verified, you can now log in"))
}

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(deny_unknown_fields, default)]
pub struct LoginRequest {
    #[validate(custom(function = "validate_email_address"))]
    pub email: String,
    #[validate(custom(function = "validate_required"))]
    pub password: String,
}

#[derive(Serialize)]
pub struct AuthTokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(with = "time::serde::rfc3339")]
    pub access_expires_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub refresh_expires_at: OffsetDateTime,
}

pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    ValidJson(payload): ValidJson<LoginRequest>,
) -> Result<(CookieJar, ApiResponse<AuthTokenResponse>), AppError> {
    let tokens = auth_service(&state)
        .login(&payload.email, &payload.password)
        .await
        .map_err(|err| account_error(&state, err, "login"))?;

    Ok(session_response(&state, jar, tokens, "logged in successfully"))
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// The refresh token comes from its cookie, or from the body for clients without cookies.
pub async fn refresh_token(
    State(state): State<AppState>,
    jar: CookieJar,
    req: Request,
) -> Result<(CookieJar, ApiResponse<AuthTokenResponse>), AppError> {
    let from_cookie = jar
        .get(TokenKind::Refresh.cookie_name())
        .map(|cookie| cookie.value().trim().to_string())
        .filter(|token| !token.is_empty());

    let token = match from_cookie {
        Some(token) => token,
        None => {
            let payload: RefreshRequest = optional_json_body(req).await?;
            payload.refresh_token.trim().to_string()
        }
    };

    if token.is_empty() {
        tracing::warn!("missing refresh token");
        return Err(AppError::unauthorized("session expired, please login again"));
    }

    let tokens = auth_service(&state)
        .refresh(&token)
        .await
        .map_err(|err| account_error(&state, err, "refresh_token"))?;

    Ok(session_response(&state, jar, tokens, "tokens refreshed"))
}

pub async fn logout(
    State(state): State<AppState>,
    user: AuthUser,
    jar: CookieJar,
) -> Result<(CookieJar, ApiResponse<()>), AppError> {
    auth_service(&state)
        .logout(user.user_id)
        .await
        .map_err(|err| account_error(&state, err, "logout"))?;

    tracing::info!(user_id = %user.user_id, "user logged out");
    Ok((
        cookies::clear_session(jar, state.cookie_secure),
        ApiResponse::message("successfully logged out"),
    ))
}

pub async fn get_current_user(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<ApiResponse<PublicUser>, AppError> {
    let current = auth_service(&state)
        .get_current_user(user.user_id)
        .await
        .map_err(|err| account_error(&state, err, "get_current_user"))?;

    match current {
        Some(current) => Ok(ApiResponse::ok(PublicUser::from(current))),
        None => Err(AppError::unauthorized("user not found")
            .with_cleared_session(state.cookie_secure)),
    }
}

// ============================================================================
// Posts
// ============================================================================

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(deny_unknown_fields, default)]
pub struct PostRequest {
    #[validate(custom(function = "validate_required"))]
    pub title: String,
    #[validate(custom(function = "validate_required"))]
    pub content: String,
}

pub async fn create_post(
    State(state): State<AppState>,
    user: AuthUser,
    ValidJson(payload): ValidJson<PostRequest>,
) -> Result<ApiResponse<Post>, AppError> {
    let service = PostService::new(state.db.clone());
    let post = service
        .create_post(user.user_id, payload.title, payload.content)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, user_id = %user.user_id, "failed to create post");
            AppError::from_store(&err, "post")
        })?;

    Ok(ApiResponse::created(post).with_message("post created successfully"))
}

pub async fn get_post(
    State(state): State<AppState>,
    viewer: Option<AuthUser>,
    Path(id): Path<String>,
) -> Result<ApiResponse<PostWithComments>, AppError> {
    let post_id = parse_id(&id)?;
    let viewer_id = viewer.map(|viewer| viewer.user_id);

    let post = PostService::new(state.db.clone())
        .get_post(post_id, viewer_id)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, post_id = %post_id, "failed to get post");
            AppError::from_store(&err, "post")
        })?
        .ok_or_else(|| AppError::not_found("post not found"))?;

    let comments = EngagementService::new(state.db.clone())
        .list_comments(post_id, viewer_id)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, post_id = %post_id, "failed to list comments");
            AppError::from_store(&err, "comment")
        })?;

    Ok(ApiResponse::ok(PostWithComments { post, comments }))
}

pub async fn list_posts(
    State(state): State<AppState>,
    viewer: Option<AuthUser>,
    query: Result<Query<PaginationQuery>, QueryRejection>,
) -> Result<ApiResponse<ListResponse<Post>>, AppError> {
    let Query(query) = query.map_err(|rejection| {
        tracing::warn!(error = %rejection.body_text(), "invalid pagination query");
        AppError::bad_request("invalid query parameters")
    })?;
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE);
    if !(1..=MAX_PAGE_SIZE).contains(&limit) {
        return Err(AppError::bad_request(format!(
            "limit must be between 1 and {}",
            MAX_PAGE_SIZE
        )));
    }
    let cursor = parse_cursor(query.cursor)?;
    let viewer_id = viewer.map(|viewer| viewer.user_id);

    let mut items = PostService::new(state.db.clone())
        .list_posts(viewer_id, cursor, limit + 1)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, "failed to list posts");
            AppError::from_store(&err, "post")
        })?;

    let next_cursor = if items.len() as i64 > limit {
        items.pop();
        encode_cursor(items.last().map(|post| (post.created_at, post.id)))
    } else {
        None
    };

    Ok(ApiResponse::ok(ListResponse { items, next_cursor }))
}

/// Resolves the post and checks the caller owns it. `action` names the verb in the
/// forbidden message.
async fn ensure_post_owner(
    service: &PostService,
    post_id: Uuid,
    user_id: Uuid,
    action: &str,
) -> Result<(), AppError> {
    let author_id = service
        .find_author(post_id)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, post_id = %post_id, "failed to load post");
            AppError::from_store(&err, "post")
        })?
        .ok_or_else(|| AppError::not_found("post not found"))?;

    if author_id != user_id {
        tracing::warn!(post_id = %post_id, user_id = %user_id, action, "caller does not own post");
        return Err(AppError::forbidden(format!("you cannot {} this post", action)));
    }
    Ok(())
}

pub async fn update_post(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    ValidJson(payload): ValidJson<PostRequest>,
) -> Result<ApiResponse<Post>, AppError> {
    let post_id = parse_id(&id)?;
    let service = PostService::new(state.db.clone());
    ensure_post_owner(&service, post_id, user.user_id, "update").await?;

    let post = service
        .update_post(post_id, user.user_id, payload.title, payload.content)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, post_id = %post_id, "failed to update post");
            AppError::from_store(&err, "post")
        })?
        .ok_or_else(|| AppError::not_found("post not found"))?;

    Ok(ApiResponse::ok(post).with_message("post updated successfully"))
}

pub async fn delete_post(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<ApiResponse<()>, AppError> {
    let post_id = parse_id(&id)?;
    let service = PostService::new(state.db.clone());
    ensure_post_owner(&service, post_id, user.user_id, "delete").await?;

    let deleted = service
        .delete_post(post_id, user.user_id)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, post_id = %post_id, "failed to delete post");
            AppError::from_store(&err, "post")
        })?;

    if !deleted {
        return Err(AppError::not_found("post not found"));
    }
    Ok(ApiResponse::message("post deleted"))
}

// ============================================================================
// Interactions
// ============================================================================

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(deny_unknown_fields, default)]
pub struct CommentRequest {
    #[validate(custom(function = "validate_uuid"))]
    pub post_id: String,
    #[validate(custom(function = "validate_required"))]
    pub content: String,
}

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(deny_unknown_fields, default)]
pub struct DeleteCommentRequest {
    #[validate(custom(function = "validate_uuid"))]
    pub post_id: String,
}

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(deny_unknown_fields, default)]
pub struct LikeRequest {
    #[validate(custom(function = "validate_uuid"))]
    pub entity_id: String,
    #[validate(custom(function = "validate_entity_type"))]
    pub entity_type: String,
}

impl LikeRequest {
    fn target(&self) -> Result<(Uuid, EntityType), AppError> {
        let entity_id = parse_id(&self.entity_id)?;
        let entity_type = EntityType::from_db(&self.entity_type)
            .ok_or_else(|| AppError::bad_request("invalid entity type"))?;
        Ok((entity_id, entity_type))
    }
}

pub async fn create_comment(
    State(state): State<AppState>,
    user: AuthUser,
    ValidJson(payload): ValidJson<CommentRequest>,
) -> Result<ApiResponse<Comment>, AppError> {
    let post_id = parse_id(&payload.post_id)?;

    let comment = EngagementService::new(state.db.clone())
        .create_comment(user.user_id, post_id, payload.content)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, post_id = %post_id, "failed to create comment");
            AppError::from_store(&err, "comment")
        })?
        .ok_or_else(|| {
            tracing::warn!(post_id = %post_id, "comment on missing post");
            AppError::not_found("post does not exist")
        })?;

    Ok(ApiResponse::ok(comment).with_message("comment successfully created"))
}

pub async fn update_comment(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    ValidJson(payload): ValidJson<CommentRequest>,
) -> Result<ApiResponse<Comment>, AppError> {
    let comment_id = parse_id(&id)?;
    let post_id = parse_id(&payload.post_id)?;

    let comment = EngagementService::new(state.db.clone())
        .update_comment(comment_id, post_id, user.user_id, payload.content)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, comment_id = %comment_id, "failed to update comment");
            AppError::from_store(&err, "comment")
        })?
        .ok_or_else(|| AppError::not_found("comment not found"))?;

    Ok(ApiResponse::ok(comment).with_message("comment successfully updated"))
}

pub async fn delete_comment(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    ValidJson(payload): ValidJson<DeleteCommentRequest>,
) -> Result<ApiResponse<()>, AppError> {
    let comment_id = parse_id(&id)?;
    let post_id = parse_id(&payload.post_id)?;

    let deleted = EngagementService::new(state.db.clone())
        .delete_comment(comment_id, post_id, user.user_id)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, comment_id = %comment_id, "failed to delete comment");
            AppError::from_store(&err, "comment")
        })?;

    if !deleted {
        tracing::warn!(comment_id = %comment_id, user_id = %user.user_id, "delete of missing comment");
        return Err(AppError::not_found("comment not found"));
    }
    Ok(ApiResponse::message("comment successfully deleted"))
}

async fn like_entity(
    state: &AppState,
    user_id: Uuid,
    entity_id: Uuid,
    entity_type: EntityType,
) -> Result<ApiResponse<()>, AppError> {
    let like = EngagementService::new(state.db.clone())
        .like(user_id, entity_id, entity_type)
        .await
        .map_err(|err| {
            let mapped = AppError::from_store(&err, "like");
            if mapped.status().is_server_error() {
                tracing::error!(error = ?err, entity_id = %entity_id, "failed to like");
            } else {
                tracing::warn!(error = ?err, entity_id = %entity_id, "like rejected");
            }
            mapped
        })?;

    if like.is_none() {
        return Err(AppError::not_found(format!("{} does not exist", entity_type)));
    }
    Ok(ApiResponse::message("successfully liked"))
}

async fn unlike_entity(
    state: &AppState,
    user_id: Uuid,
    entity_id: Uuid,
    entity_type: EntityType,
) -> Result<ApiResponse<()>, AppError> {
    let removed = EngagementService::new(state.db.clone())
        .unlike(user_id, entity_id, entity_type)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, entity_id = %entity_id, "failed to unlike");
            AppError::from_store(&err, "like")
        })?;

    if !removed {
        return Err(AppError::not_found(format!("{} like does not exist", entity_type)));
    }
    Ok(ApiResponse::message("successfully unliked"))
}

pub async fn like(
    State(state): State<AppState>,
    user: AuthUser,
    ValidJson(payload): ValidJson<LikeRequest>,
) -> Result<ApiResponse<()>, AppError> {
    let (entity_id, entity_type) = payload.target()?;
    like_entity(&state, user.user_id, entity_id, entity_type).await
}

pub async fn unlike(
    State(state): State<AppState>,
    user: AuthUser,
    ValidJson(payload): ValidJson<LikeRequest>,
) -> Result<ApiResponse<()>, AppError> {
    let (entity_id, entity_type) = payload.target()?;
    unlike_entity(&state, user.user_id, entity_id, entity_type).await
}

pub async fn like_post(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<ApiResponse<()>, AppError> {
    like_entity(&state, user.user_id, parse_id(&id)?, EntityType::Post).await
}

pub async fn unlike_post(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<ApiResponse<()>, AppError> {
    unlike_entity(&state, user.user_id, parse_id(&id)?, EntityType::Post).await
}

pub async fn like_comment(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<ApiResponse<()>, AppError> {
    like_entity(&state, user.user_id, parse_id(&id)?, EntityType::Comment).await
}

pub async fn unlike_comment(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<ApiResponse<()>, AppError> {
    unlike_entity(&state, user.user_id, parse_id(&id)?, EntityType::Comment).await
}

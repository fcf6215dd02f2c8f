use axum::{
    extract::State,
    http::StatusCode,
    response::Redirect,
    routing::{get, post},
    Json, Router,
};
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{info, instrument, warn};

use crate::{
    auth::{
        dto::{
            AuthUrlResponse, CallbackQuery, LoginRequest, ProfileResponse, RegisterRequest,
            RegisterResponse, Response,
        },
        extractors::{AuthUser, JsonBody, QueryParams},
        jwt::TokenPair,
    },
    error::ServiceError,
    state::AppState,
};

pub const MIN_PASSWORD_LEN: usize = 8;

lazy_static! {
    static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
}

/// Simple email format validation.
pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/profile", get(profile))
}

pub fn google_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/google/login", get(google_login))
        .route("/auth/google/url", get(google_url))
        .route("/auth/google/callback", get(google_callback))
}

fn validate_email(email: &str) -> Result<(), ServiceError> {
    if !is_valid_email(email) {
        warn!(email, "invalid email");
        return Err(ServiceError::InvalidInput("invalid email".into()));
    }
    Ok(())
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    JsonBody(mut payload): JsonBody<RegisterRequest>,
) -> Result<(StatusCode, Json<Response<RegisterResponse>>), ServiceError> {
    payload.email = payload.email.trim().to_owned();
    validate_email(&payload.email)?;

    if payload.password.chars().count() < MIN_PASSWORD_LEN {
        warn!("password too short");
        return Err(ServiceError::InvalidInput(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    let name = payload.name.trim();
    if name.is_empty() {
        warn!("empty name");
        return Err(ServiceError::InvalidInput("name is required".into()));
    }

    let created = state
        .identity
        .register(&payload.email, &payload.password, name)
        .await?;
    Ok((StatusCode::CREATED, Json(Response::new(created))))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    JsonBody(mut payload): JsonBody<LoginRequest>,
) -> Result<Json<Response<TokenPair>>, ServiceError> {
    payload.email = payload.email.trim().to_owned();
    validate_email(&payload.email)?;

    let pair = state.identity.login(&payload.email, &payload.password).await?;
    Ok(Json(Response::new(pair)))
}

#[instrument(skip(state, claims), fields(user_id = %claims.sub))]
pub async fn profile(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
) -> Result<Json<Response<ProfileResponse>>, ServiceError> {
    let profile = state.identity.profile(&claims.email).await?;
    Ok(Json(Response::new(profile)))
}

#[instrument(skip(state))]
pub async fn google_login(State(state): State<AppState>) -> Redirect {
    Redirect::temporary(&state.oauth.get_auth_url())
}

#[instrument(skip(state))]
pub async fn google_url(State(state): State<AppState>) -> Json<Response<AuthUrlResponse>> {
    Json(Response::new(AuthUrlResponse {
        url: state.oauth.get_auth_url(),
    }))
}

#[instrument(skip(state, query))]
pub async fn google_callback(
    State(state): State<AppState>,
    QueryParams(query): QueryParams<CallbackQuery>,
) -> Result<Json<Response<TokenPair>>, ServiceError> {
    let code = query.code.unwrap_or_default();
    let pair = state.oauth.handle_callback(&code).await?;
    info!("oauth callback completed");
    Ok(Json(Response::new(pair)))
}

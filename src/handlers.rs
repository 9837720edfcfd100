use axum::http::header;
use serde::Serialize;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::{
    AppState,
    error::{ApiError, TokenFault},
    models::{
        AccessTokenResponse, LoginRequest, ROLE_USER, RegisterUserRequest, UserProfile,
    },
    response::Response,
    router::Call,
    tokens::TokenPair,
};

const MIN_PASSWORD_LEN: usize = 8;

// --- Public Handlers ---

/// health
///
/// [Public Route] Liveness probe for load balancers.
pub async fn health(_state: AppState, _call: Call) -> Result<Response, ApiError> {
    Ok(Response::ok(json!({ "status": "ok" })))
}

/// register_user
///
/// [Public Route] Creates a user with the default role. The password is hashed on a
/// blocking thread before it reaches the repository.
/// Returns 201, 409 for a taken email, 422 for invalid input.
pub async fn register_user(state: AppState, call: Call) -> Result<Response, ApiError> {
    let payload: RegisterUserRequest = call.request.json()?;
    let email = payload.email.trim().to_lowercase();

    if !email.contains('@') {
        return Err(ApiError::validation_field("email", "Must be a valid email address"));
    }
    if payload.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::validation_field(
            "password",
            format!("Must be at least {} characters", MIN_PASSWORD_LEN),
        ));
    }

    let hasher = state.hasher.clone();
    let password = payload.password;
    let password_hash = blocking(move || hasher.hash(&password)).await?;

    let user = state.repo.create_user(&email, &password_hash, ROLE_USER).await?;
    tracing::info!(user_id = %user.id, "registered user");

    Ok(Response::created(to_body(&UserProfile::from(user))?))
}

/// login
///
/// [Public Route] Verifies credentials and starts a session: the access token goes in
/// the body, the refresh token in the `<app>.refreshtoken` cookie.
pub async fn login(state: AppState, call: Call) -> Result<Response, ApiError> {
    let payload: LoginRequest = call.request.json()?;
    let email = payload.email.trim().to_lowercase();
    if email.is_empty() || payload.password.is_empty() {
        return Err(ApiError::validation("Email and password are required"));
    }

    let credentials = state.repo.find_user_by_email(&email).await?;

    let hasher = state.hasher.clone();
    let password = payload.password;
    let Some(credentials) = credentials else {
        // Unknown emails still pay for one bcrypt round, like a wrong password.
        blocking(move || hasher.hash(&password)).await?;
        return Err(ApiError::InvalidCredentials);
    };
    let stored_hash = credentials.password_hash;
    let verified = blocking(move || hasher.verify(&password, &stored_hash)).await?;
    if !verified {
        tracing::info!(user_id = %credentials.user.id, "login rejected");
        return Err(ApiError::InvalidCredentials);
    }

    let pair = state.tokens.issue(credentials.user.id).await?;
    token_response(&state, &pair)
}

/// refresh_session
///
/// [Public Route] Exchanges the refresh cookie for a new access token and a rotated
/// refresh cookie. The presented refresh token is dead afterwards.
pub async fn refresh_session(state: AppState, call: Call) -> Result<Response, ApiError> {
    let value = call
        .request
        .cookie(state.cookies.cookie_name())
        .ok_or(ApiError::InvalidToken(TokenFault::Missing))?;

    let token = state.cookies.decode(value)?;
    let pair = state.tokens.refresh(&token).await?;
    token_response(&state, &pair)
}

/// logout
///
/// [Public Route] Revokes the refresh token, if one was sent, and tells the browser
/// to drop the cookie. 204 on success; an unreadable cookie is a 401 that still
/// clears it.
pub async fn logout(state: AppState, call: Call) -> Result<Response, ApiError> {
    let expired = state.cookies.expired().to_header_value()?;

    if let Some(value) = call.request.cookie(state.cookies.cookie_name()) {
        match state.cookies.decode(value) {
            Ok(token) => state.tokens.revoke(&token).await?,
            Err(err) => {
                return Ok(err.to_response().with_header(header::SET_COOKIE, expired));
            }
        }
    }

    Ok(Response::no_content().with_header(header::SET_COOKIE, expired))
}

// --- Authenticated Handlers ---

/// get_me
///
/// [Authenticated Route] Profile of the caller resolved from the access token.
pub async fn get_me(state: AppState, call: Call) -> Result<Response, ApiError> {
    let caller = call.caller()?;
    let user = state
        .repo
        .get_user(caller.subject)
        .await?
        .ok_or_else(|| ApiError::NotFound("User no longer exists".to_string()))?;

    Ok(Response::ok(to_body(&UserProfile::from(user))?))
}

// --- Admin Handlers ---

/// get_user
///
/// [Admin Route] Any user's profile by id.
pub async fn get_user(state: AppState, call: Call) -> Result<Response, ApiError> {
    let raw_id = call.param("id").unwrap_or_default();
    let id = Uuid::parse_str(raw_id)
        .map_err(|_| ApiError::validation_field("id", format!("Invalid UUID format: {}", raw_id)))?;

    let user = state
        .repo
        .get_user(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("User {} not found", id)))?;

    Ok(Response::ok(to_body(&UserProfile::from(user))?))
}

// --- Helpers ---

fn token_response(state: &AppState, pair: &TokenPair) -> Result<Response, ApiError> {
    let body = AccessTokenResponse {
        access_token: pair.access.value.clone(),
        token_type: "Bearer".to_string(),
        expires_in: state.tokens.access_ttl_secs(),
    };
    let cookie = state.cookies.encode(&pair.refresh).to_header_value()?;

    Ok(Response::ok(to_body(&body)?).with_header(header::SET_COOKIE, cookie))
}

fn to_body<T: Serialize>(value: &T) -> Result<Value, ApiError> {
    serde_json::to_value(value)
        .map_err(|e| ApiError::Unexpected(format!("response serialization failed: {}", e)))
}

/// Runs CPU-heavy password work off the async executor.
async fn blocking<T, F>(work: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| ApiError::PasswordHashing(format!("hashing task failed: {}", e)))?
}

use axum::http::Method;

use crate::{
    error::ApiError,
    handlers,
    router::{AuthLevel, Router},
};

/// Public Routes
///
/// No token is checked. The refresh and logout endpoints authenticate themselves
/// through the refresh cookie instead of an access token.
pub fn register(router: &mut Router) -> Result<(), ApiError> {
    // GET /health
    router.register(Method::GET, "/health", AuthLevel::Public, handlers::health)?;
    // POST /register
    router.register(Method::POST, "/register", AuthLevel::Public, handlers::register_user)?;
    // POST /auth/login
    // Sets the refresh cookie and returns the first access token.
    router.register(Method::POST, "/auth/login", AuthLevel::Public, handlers::login)?;
    // POST /auth/refresh
    // The only place an expired access token gets replaced.
    router.register(
        Method::POST,
        "/auth/refresh",
        AuthLevel::Public,
        handlers::refresh_session,
    )?;
    // POST /auth/logout
    router.register(Method::POST, "/auth/logout", AuthLevel::Public, handlers::logout)?;
    Ok(())
}

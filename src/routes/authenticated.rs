use axum::http::Method;

use crate::{
    error::ApiError,
    handlers,
    router::{AuthLevel, Router},
};

/// Authenticated Routes
///
/// Every handler here can rely on `Call::caller` being present.
pub fn register(router: &mut Router) -> Result<(), ApiError> {
    // GET /me
    router.register(Method::GET, "/me", AuthLevel::User, handlers::get_me)?;
    Ok(())
}

use axum::http::Method;

use crate::{
    error::ApiError,
    handlers,
    router::{AuthLevel, Router},
};

/// Admin Routes
///
/// The router resolves the caller's role before these handlers run; a non-admin
/// token is answered with 403 and the handler never executes.
pub fn register(router: &mut Router) -> Result<(), ApiError> {
    // GET /admin/users/:id
    router.register(Method::GET, "/admin/users/:id", AuthLevel::Admin, handlers::get_user)?;
    Ok(())
}

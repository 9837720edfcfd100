//! Route Registration Index
//!
//! Routes are grouped by the auth level they require, one module per level, so a
//! route's exposure is decided by where it is registered rather than inside its handler.

use crate::{AppState, error::ApiError, router::Router};

/// Routes open to anonymous clients: health, registration and the session endpoints.
pub mod public;

/// Routes that need a valid access token.
pub mod authenticated;

/// Routes that need an access token belonging to an admin.
pub mod admin;

/// build_router
///
/// Registers every route group. Called once at startup; a duplicate or malformed
/// pattern aborts startup instead of surfacing at request time.
pub fn build_router(state: AppState) -> Result<Router, ApiError> {
    let mut router = Router::new(state);
    public::register(&mut router)?;
    authenticated::register(&mut router)?;
    admin::register(&mut router)?;

    for (method, pattern, auth) in router.routes() {
        tracing::debug!(%method, pattern, ?auth, "registered route");
    }
    Ok(router)
}

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::HeaderName,
    response::{IntoResponse, Response as HttpResponse},
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{Level, Span};

// --- Module Structure ---

// Response/error model.
pub mod error;
pub mod response;

// Request parsing, token lifecycle and the refresh cookie.
pub mod cookie;
pub mod request;
pub mod tokens;

// Dispatch and the routes registered on it.
pub mod router;
pub mod routes;

// Collaborators and plumbing.
pub mod config;
pub mod handlers;
pub mod models;
pub mod password;
pub mod repository;

// --- Public Re-exports ---

pub use config::AppConfig;
pub use cookie::{CookieCodec, RefreshTokenCookie};
pub use error::{ApiError, TokenFault};
pub use password::{BcryptHasher, HasherState, PasswordHasher};
pub use repository::{InMemoryRepository, PostgresRepository, Repository, RepositoryState};
pub use request::Request;
pub use response::{Response, ResponseCode};
pub use router::{AuthLevel, Call, Caller, Router};
pub use tokens::{TokenPair, TokenService};

/// Upper bound on request bodies read by the HTTP bridge.
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// AppState
///
/// Every collaborator a handler or the router needs, assembled by the process
/// bootstrap and passed in explicitly. Cloning is cheap; all members are shared handles.
#[derive(Clone)]
pub struct AppState {
    /// Persistence: users and the refresh-token store.
    pub repo: RepositoryState,
    pub tokens: TokenService,
    pub cookies: CookieCodec,
    pub hasher: HasherState,
    pub config: AppConfig,
}

impl AppState {
    pub fn new(config: AppConfig, repo: RepositoryState, hasher: HasherState) -> Self {
        let tokens = TokenService::new(
            &config.jwt_secret,
            config.access_token_ttl_minutes,
            repo.clone(),
        );
        let cookies = CookieCodec::new(&config.app_name, tokens.clone());
        Self {
            repo,
            tokens,
            cookies,
            hasher,
            config,
        }
    }
}

/// create_app
///
/// Puts the dispatch `Router` behind axum. Every request falls through to
/// `dispatch_http`, so path matching and auth are owned entirely by `Router`;
/// axum only contributes the tower layers for request ids, tracing and CORS.
pub fn create_app(router: Router) -> axum::Router {
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    let x_request_id = HeaderName::from_static("x-request-id");

    axum::Router::new()
        .fallback(dispatch_http)
        .with_state(Arc::new(router))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(trace_span_logger)
                        .on_response(
                            DefaultOnResponse::new()
                                .level(Level::INFO)
                                .latency_unit(tower_http::LatencyUnit::Millis),
                        ),
                )
                .layer(PropagateRequestIdLayer::new(x_request_id)),
        )
        .layer(cors)
}

/// dispatch_http
///
/// Converts the axum request into a `Request` and hands it to `Router::dispatch`.
/// An unreadable body or undecodable path is answered through the same error model.
async fn dispatch_http(
    State(router): State<Arc<Router>>,
    request: axum::extract::Request,
) -> HttpResponse {
    let (parts, body) = request.into_parts();

    let bytes = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::debug!(error = %e, "failed to read request body");
            return ApiError::BadRequest("Request body could not be read".to_string())
                .to_response()
                .into_response();
        }
    };

    match Request::parse(parts.method, parts.uri.path(), parts.headers, bytes) {
        Ok(request) => router.dispatch(request).await.into_response(),
        Err(err) => err.to_response().into_response(),
    }
}

/// trace_span_logger
///
/// Span per request carrying method, URI and the `x-request-id` set above, so every
/// log line of one request can be correlated.
fn trace_span_logger(request: &axum::http::Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");

    tracing::info_span!(
        "http_request",
        method = ?request.method(),
        uri = ?request.uri(),
        req_id = %request_id,
    )
}

use std::{future::Future, pin::Pin, sync::Arc};

use axum::http::Method;
use tracing::Instrument;
use uuid::Uuid;

use crate::{
    AppState,
    error::{ApiError, TokenFault},
    request::Request,
    response::Response,
};

/// AuthLevel
///
/// What a route demands of its caller before the handler runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthLevel {
    /// No token needed.
    Public,
    /// A valid access token.
    User,
    /// A valid access token whose subject has the admin role.
    Admin,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Wildcard(String),
}

/// Pattern
///
/// A route path such as `/items/:id`: literal segments plus single-segment
/// wildcards. Multi-segment wildcards are not supported.
#[derive(Debug, Clone)]
pub struct Pattern {
    raw: String,
    segments: Vec<Segment>,
}

impl Pattern {
    pub fn parse(raw: &str) -> Result<Self, ApiError> {
        let invalid = |reason: &str| ApiError::InvalidPattern {
            pattern: raw.to_string(),
            reason: reason.to_string(),
        };

        let mut segments = Vec::new();
        for part in raw.split('/').filter(|part| !part.is_empty()) {
            match part.strip_prefix(':') {
                Some("") => return Err(invalid("wildcard segment has no name")),
                Some(name) => {
                    let taken = segments
                        .iter()
                        .any(|s| matches!(s, Segment::Wildcard(n) if n == name));
                    if taken {
                        return Err(invalid("wildcard name used twice"));
                    }
                    segments.push(Segment::Wildcard(name.to_string()));
                }
                None => segments.push(Segment::Literal(part.to_string())),
            }
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    fn literal_count(&self) -> usize {
        self.segments
            .iter()
            .filter(|s| matches!(s, Segment::Literal(_)))
            .count()
    }

    /// Two patterns are the same route if they only differ in wildcard names.
    fn same_shape(&self, other: &Pattern) -> bool {
        self.segments.len() == other.segments.len()
            && self
                .segments
                .iter()
                .zip(&other.segments)
                .all(|pair| match pair {
                    (Segment::Literal(a), Segment::Literal(b)) => a == b,
                    (Segment::Wildcard(_), Segment::Wildcard(_)) => true,
                    _ => false,
                })
    }

    fn matches(&self, path: &[String]) -> Option<PathParams> {
        if self.segments.len() != path.len() {
            return None;
        }
        let mut params = PathParams::default();
        for (segment, value) in self.segments.iter().zip(path) {
            match segment {
                Segment::Literal(literal) if literal == value => {}
                Segment::Literal(_) => return None,
                Segment::Wildcard(_) if value.is_empty() => return None,
                Segment::Wildcard(name) => params.0.push((name.clone(), value.clone())),
            }
        }
        Some(params)
    }
}

/// Values bound by a pattern's wildcards, in path order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathParams(Vec<(String, String)>);

impl PathParams {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

/// The authenticated identity resolved for a non-public route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub subject: Uuid,
    pub level: AuthLevel,
}

/// Call
///
/// Everything a handler receives: the request, the wildcard bindings and, for
/// `User`/`Admin` routes, the caller.
#[derive(Debug, Clone)]
pub struct Call {
    pub request: Request,
    pub params: PathParams,
    pub caller: Option<Caller>,
}

impl Call {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name)
    }

    /// The caller of an authenticated route. Public routes have none.
    pub fn caller(&self) -> Result<&Caller, ApiError> {
        self.caller
            .as_ref()
            .ok_or(ApiError::InvalidToken(TokenFault::Missing))
    }
}

type HandlerFuture = Pin<Box<dyn Future<Output = Result<Response, ApiError>> + Send>>;
type Handler = Arc<dyn Fn(AppState, Call) -> HandlerFuture + Send + Sync>;

struct Route {
    method: Method,
    pattern: Pattern,
    auth: AuthLevel,
    handler: Handler,
}

/// Router
///
/// The route table and the dispatch boundary. Routes are registered during startup
/// and only read afterwards, so a built `Router` is shared behind an `Arc` with no
/// locking. `dispatch` never fails: every outcome, including handler panics,
/// becomes a `Response`.
pub struct Router {
    routes: Vec<Route>,
    state: AppState,
}

impl Router {
    pub fn new(state: AppState) -> Self {
        Self {
            routes: Vec::new(),
            state,
        }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// register
    ///
    /// Adds a route. Fails here, not at request time, when the pattern is invalid or
    /// an identical (method, pattern) is already registered.
    pub fn register<F, Fut>(
        &mut self,
        method: Method,
        pattern: &str,
        auth: AuthLevel,
        handler: F,
    ) -> Result<(), ApiError>
    where
        F: Fn(AppState, Call) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Response, ApiError>> + Send + 'static,
    {
        let pattern = Pattern::parse(pattern)?;

        let duplicate = self
            .routes
            .iter()
            .any(|route| route.method == method && route.pattern.same_shape(&pattern));
        if duplicate {
            return Err(ApiError::DuplicateRoute {
                method: method.to_string(),
                pattern: pattern.as_str().to_string(),
            });
        }

        let handler: Handler = Arc::new(move |state: AppState, call: Call| -> HandlerFuture {
            Box::pin(handler(state, call))
        });
        self.routes.push(Route {
            method,
            pattern,
            auth,
            handler,
        });
        Ok(())
    }

    /// Registered routes as (method, pattern, auth level), in registration order.
    pub fn routes(&self) -> impl Iterator<Item = (&Method, &str, AuthLevel)> {
        self.routes
            .iter()
            .map(|route| (&route.method, route.pattern.as_str(), route.auth))
    }

    /// dispatch
    ///
    /// 1. Find the most specific route for the method and path (404 if none).
    /// 2. Enforce its auth level (401/403) without touching the handler.
    /// 3. Run the handler on its own task so a panic is contained and reported as 500.
    /// 4. Forward the handler's Response, or translate its error.
    pub async fn dispatch(&self, request: Request) -> Response {
        let Some((route, params)) = self.find(&request) else {
            tracing::debug!(method = %request.method(), path = %request.path(), "no route matched");
            return ApiError::Routing(format!("{} {}", request.method(), request.path()))
                .to_response();
        };

        let caller = match self.authenticate(route.auth, &request).await {
            Ok(caller) => caller,
            Err(err) => {
                tracing::debug!(
                    pattern = route.pattern.as_str(),
                    error = %err,
                    "request rejected by auth check"
                );
                return err.to_response();
            }
        };

        let call = Call {
            request,
            params,
            caller,
        };
        let future = (route.handler)(self.state.clone(), call);

        match tokio::spawn(future.in_current_span()).await {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => err.to_response(),
            Err(join_error) => {
                let detail = if join_error.is_panic() {
                    "handler panicked".to_string()
                } else {
                    join_error.to_string()
                };
                ApiError::Unexpected(detail).to_response()
            }
        }
    }

    /// find
    ///
    /// Among routes matching method and path, the one with the most literal segments
    /// wins; equal specificity falls back to registration order.
    fn find(&self, request: &Request) -> Option<(&Route, PathParams)> {
        let mut best: Option<(&Route, PathParams, usize)> = None;

        for route in self.routes.iter().filter(|r| &r.method == request.method()) {
            let Some(params) = route.pattern.matches(request.segments()) else {
                continue;
            };
            let specificity = route.pattern.literal_count();
            let better = best
                .as_ref()
                .is_none_or(|(_, _, current)| specificity > *current);
            if better {
                best = Some((route, params, specificity));
            }
        }

        best.map(|(route, params, _)| (route, params))
    }

    /// authenticate
    ///
    /// Side-effect free: an expired access token is rejected, never refreshed here.
    async fn authenticate(
        &self,
        level: AuthLevel,
        request: &Request,
    ) -> Result<Option<Caller>, ApiError> {
        if level == AuthLevel::Public {
            return Ok(None);
        }

        let token = request
            .bearer_token()
            .ok_or(ApiError::InvalidToken(TokenFault::Missing))?;
        let subject = self.state.tokens.verify_access(token)?;

        if level == AuthLevel::Admin {
            let user = self
                .state
                .repo
                .get_user(subject)
                .await?
                .ok_or(ApiError::InvalidToken(TokenFault::UnknownSubject))?;
            if !user.is_admin() {
                return Err(ApiError::Forbidden {
                    required: AuthLevel::Admin,
                });
            }
        }

        Ok(Some(Caller { subject, level }))
    }
}

use axum::{
    Json,
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::IntoResponse,
};
use serde_json::Value;

use crate::error::ApiError;

/// ResponseCode
///
/// The exhaustive set of status codes this API produces. Anything else is refused
/// at the call site that tries to set it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseCode {
    Ok,
    Created,
    NoContent,
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict,
    UnprocessableEntity,
    InternalServerError,
}

impl ResponseCode {
    pub const ALL: [ResponseCode; 10] = [
        ResponseCode::Ok,
        ResponseCode::Created,
        ResponseCode::NoContent,
        ResponseCode::BadRequest,
        ResponseCode::Unauthorized,
        ResponseCode::Forbidden,
        ResponseCode::NotFound,
        ResponseCode::Conflict,
        ResponseCode::UnprocessableEntity,
        ResponseCode::InternalServerError,
    ];

    pub fn as_u16(self) -> u16 {
        match self {
            ResponseCode::Ok => 200,
            ResponseCode::Created => 201,
            ResponseCode::NoContent => 204,
            ResponseCode::BadRequest => 400,
            ResponseCode::Unauthorized => 401,
            ResponseCode::Forbidden => 403,
            ResponseCode::NotFound => 404,
            ResponseCode::Conflict => 409,
            ResponseCode::UnprocessableEntity => 422,
            ResponseCode::InternalServerError => 500,
        }
    }

    fn status(self) -> StatusCode {
        match self {
            ResponseCode::Ok => StatusCode::OK,
            ResponseCode::Created => StatusCode::CREATED,
            ResponseCode::NoContent => StatusCode::NO_CONTENT,
            ResponseCode::BadRequest => StatusCode::BAD_REQUEST,
            ResponseCode::Unauthorized => StatusCode::UNAUTHORIZED,
            ResponseCode::Forbidden => StatusCode::FORBIDDEN,
            ResponseCode::NotFound => StatusCode::NOT_FOUND,
            ResponseCode::Conflict => StatusCode::CONFLICT,
            ResponseCode::UnprocessableEntity => StatusCode::UNPROCESSABLE_ENTITY,
            ResponseCode::InternalServerError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl TryFrom<u16> for ResponseCode {
    type Error = ApiError;

    fn try_from(code: u16) -> Result<Self, Self::Error> {
        ResponseCode::ALL
            .into_iter()
            .find(|candidate| candidate.as_u16() == code)
            .ok_or(ApiError::UnsupportedResponseCode(code))
    }
}

/// Response
///
/// What every handler returns and what `Router::dispatch` always produces.
/// A 204 never carries a body; the constructors and `set_code` keep that true.
#[derive(Debug, Clone)]
pub struct Response {
    code: ResponseCode,
    headers: HeaderMap,
    body: Option<Value>,
}

impl Response {
    /// Empty response with the given code.
    pub fn new(code: ResponseCode) -> Self {
        Self {
            code,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    /// Validating constructor for raw status codes.
    pub fn try_new(code: u16) -> Result<Self, ApiError> {
        Ok(Self::new(ResponseCode::try_from(code)?))
    }

    pub fn with_body(code: ResponseCode, body: Value) -> Self {
        let body = (code != ResponseCode::NoContent).then_some(body);
        Self {
            code,
            headers: HeaderMap::new(),
            body,
        }
    }

    pub fn ok(body: Value) -> Self {
        Self::with_body(ResponseCode::Ok, body)
    }

    pub fn created(body: Value) -> Self {
        Self::with_body(ResponseCode::Created, body)
    }

    /// no_content
    ///
    /// Successful operation with nothing to return: fixed 204, empty body.
    pub fn no_content() -> Self {
        Self::new(ResponseCode::NoContent)
    }

    pub fn code(&self) -> ResponseCode {
        self.code
    }

    pub fn status(&self) -> u16 {
        self.code.as_u16()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> Option<&Value> {
        self.body.as_ref()
    }

    /// set_code
    ///
    /// Fails fast with `UnsupportedResponseCode` for a code outside the supported set.
    /// On failure the current code is left as it was.
    pub fn set_code(&mut self, code: u16) -> Result<(), ApiError> {
        let code = ResponseCode::try_from(code)?;
        self.code = code;
        if code == ResponseCode::NoContent {
            self.body = None;
        }
        Ok(())
    }

    pub fn set_body(&mut self, body: Value) {
        if self.code != ResponseCode::NoContent {
            self.body = Some(body);
        }
    }

    /// Appends a header. Multi-valued headers such as `set-cookie` accumulate.
    pub fn append_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers.append(name, value);
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.append_header(name, value);
        self
    }
}

impl IntoResponse for Response {
    fn into_response(self) -> axum::response::Response {
        let status = self.code.status();
        match self.body {
            Some(body) => (status, self.headers, Json(body)).into_response(),
            None => (status, self.headers).into_response(),
        }
    }
}

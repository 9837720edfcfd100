use std::fmt;

use axum::http::HeaderValue;

use crate::{
    error::{ApiError, TokenFault},
    tokens::{REFRESH_TOKEN_TTL_SECS, RefreshToken, TokenService},
};

/// RefreshTokenCookie
///
/// The cookie carrying a refresh token. Attributes are fixed by `CookieCodec`;
/// the value is opaque to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshTokenCookie {
    pub name: String,
    pub value: String,
    pub max_age: i64,
    pub path: String,
    pub http_only: bool,
    pub secure: bool,
}

impl RefreshTokenCookie {
    /// Renders the `Set-Cookie` header value.
    pub fn to_header_value(&self) -> Result<HeaderValue, ApiError> {
        HeaderValue::from_str(&self.to_string())
            .map_err(|_| ApiError::Unexpected("refresh cookie is not a valid header value".into()))
    }
}

impl fmt::Display for RefreshTokenCookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}={}; Max-Age={}; Path={}",
            self.name, self.value, self.max_age, self.path
        )?;
        if self.http_only {
            write!(f, "; HttpOnly")?;
        }
        if self.secure {
            write!(f, "; Secure")?;
        }
        Ok(())
    }
}

/// CookieCodec
///
/// Moves refresh tokens in and out of the `<app>.refreshtoken` cookie.
#[derive(Clone)]
pub struct CookieCodec {
    name: String,
    tokens: TokenService,
}

impl CookieCodec {
    pub fn new(app_name: &str, tokens: TokenService) -> Self {
        Self {
            name: format!("{}.refreshtoken", app_name),
            tokens,
        }
    }

    pub fn cookie_name(&self) -> &str {
        &self.name
    }

    /// encode
    ///
    /// Wraps the token value with the fixed attributes:
    /// `Max-Age=2592000; Path=/; HttpOnly; Secure`.
    pub fn encode(&self, token: &RefreshToken) -> RefreshTokenCookie {
        self.cookie(token.value.clone(), REFRESH_TOKEN_TTL_SECS)
    }

    /// A cookie that tells the browser to drop the refresh token.
    pub fn expired(&self) -> RefreshTokenCookie {
        self.cookie(String::new(), 0)
    }

    fn cookie(&self, value: String, max_age: i64) -> RefreshTokenCookie {
        RefreshTokenCookie {
            name: self.name.clone(),
            value,
            max_age,
            path: "/".to_string(),
            http_only: true,
            secure: true,
        }
    }

    /// decode
    ///
    /// Turns a cookie value back into a refresh token. Every structural problem is
    /// reported as `InvalidToken` so the router answers 401, never 500.
    pub fn decode(&self, value: &str) -> Result<RefreshToken, ApiError> {
        let value = value.trim().trim_matches('"');
        if value.is_empty() {
            return Err(ApiError::InvalidToken(TokenFault::Missing));
        }
        let structurally_valid = value.split('.').count() == 3
            && value
                .split('.')
                .all(|part| !part.is_empty() && part.bytes().all(is_base64url));
        if !structurally_valid {
            return Err(ApiError::InvalidToken(TokenFault::Malformed));
        }

        self.tokens.decode_refresh(value).map_err(|e| match e {
            ApiError::InvalidToken(fault) => ApiError::InvalidToken(fault),
            other => {
                tracing::debug!(error = %other, "refresh cookie failed to decode");
                ApiError::InvalidToken(TokenFault::Malformed)
            }
        })
    }
}

fn is_base64url(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_'
}

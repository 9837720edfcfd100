use std::collections::HashMap;

use axum::{
    body::Bytes,
    http::{HeaderMap, Method, header},
};
use serde::de::DeserializeOwned;

use crate::error::ApiError;

/// Request
///
/// The normalized, read-only view of an incoming HTTP request that the router
/// matches and handlers consume. Built once per request by `Request::parse`.
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    segments: Vec<String>,
    headers: HeaderMap,
    body: Bytes,
    cookies: HashMap<String, String>,
}

impl Request {
    /// parse
    ///
    /// Splits `raw_path` on `/`, dropping empty segments (so leading, trailing and
    /// repeated slashes all collapse), and percent-decodes each segment on its own
    /// so an encoded `%2F` stays inside its segment.
    ///
    /// Fails with `ApiError::Routing` when a segment holds a broken percent escape
    /// or decodes to bytes that are not UTF-8.
    pub fn parse(
        method: Method,
        raw_path: &str,
        headers: HeaderMap,
        body: Bytes,
    ) -> Result<Self, ApiError> {
        let segments = raw_path
            .split('/')
            .filter(|segment| !segment.is_empty())
            .map(decode_segment)
            .collect::<Result<Vec<_>, _>>()?;

        let cookies = parse_cookies(&headers);

        Ok(Self {
            method,
            segments,
            headers,
            body,
            cookies,
        })
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// The normalized path, `/` joined, for logging.
    pub fn path(&self) -> String {
        format!("/{}", self.segments.join("/"))
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    /// Token from an `Authorization: Bearer <token>` header, if one is present.
    /// The scheme name is matched case-insensitively.
    pub fn bearer_token(&self) -> Option<&str> {
        let (scheme, token) = self
            .header(header::AUTHORIZATION.as_str())?
            .trim_start()
            .split_once(' ')?;
        let token = token.trim();
        (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
    }

    /// Deserializes the JSON body. A missing or malformed body is a validation failure.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        if self.body.is_empty() {
            return Err(ApiError::validation("Request body is required"));
        }
        serde_json::from_slice(&self.body)
            .map_err(|e| ApiError::validation(format!("Malformed JSON body: {}", e)))
    }
}

fn decode_segment(raw: &str) -> Result<String, ApiError> {
    // urlencoding passes stray '%' through untouched, so broken escapes are caught here.
    let bytes = raw.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let escape_ok = bytes.len() > i + 2
                && bytes[i + 1].is_ascii_hexdigit()
                && bytes[i + 2].is_ascii_hexdigit();
            if !escape_ok {
                return Err(ApiError::Routing(format!(
                    "invalid percent-encoding in path segment '{}'",
                    raw
                )));
            }
            i += 3;
        } else {
            i += 1;
        }
    }

    urlencoding::decode(raw)
        .map(|decoded| decoded.into_owned())
        .map_err(|_| ApiError::Routing(format!("path segment '{}' is not valid UTF-8", raw)))
}

/// A repeated cookie name keeps its first value: user agents send the cookie with
/// the most specific path first.
fn parse_cookies(headers: &HeaderMap) -> HashMap<String, String> {
    let mut cookies = HashMap::new();
    let pairs = headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='));

    for (name, value) in pairs {
        let name = name.trim();
        if !name.is_empty() {
            cookies
                .entry(name.to_string())
                .or_insert_with(|| value.trim().to_string());
        }
    }
    cookies
}

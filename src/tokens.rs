use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::{ApiError, TokenFault},
    models::RefreshTokenRecord,
    repository::RepositoryState,
};

/// Refresh tokens live for 30 days; the cookie's Max-Age is derived from this.
pub const REFRESH_TOKEN_TTL_SECS: i64 = 30 * 24 * 60 * 60;

/// How often the server sweeps expired refresh token records.
pub const REFRESH_PURGE_INTERVAL_SECS: u64 = 60 * 60;

/// TokenKind
///
/// Embedded in every token so an access token can never be replayed as a refresh
/// token or the other way round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// Claims
///
/// The signed JWT payload shared by both token kinds. `jti` is only set on refresh
/// tokens, where it is the id of the server-side record.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (sub): the user id.
    pub sub: Uuid,
    /// Issued At (iat), seconds since the epoch.
    pub iat: i64,
    /// Expiration Time (exp), seconds since the epoch.
    pub exp: i64,
    pub kind: TokenKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<Uuid>,
}

#[derive(Debug, Clone)]
pub struct AccessToken {
    pub subject: Uuid,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// The encoded, signed token as sent to the client.
    pub value: String,
}

#[derive(Debug, Clone)]
pub struct RefreshToken {
    pub subject: Uuid,
    pub token_id: Uuid,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub value: String,
}

#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access: AccessToken,
    pub refresh: RefreshToken,
}

/// TokenService
///
/// Issues, verifies, refreshes and revokes tokens. Access verification is a pure
/// function of the token and the signing secret. Refresh and revocation go through
/// the repository, which owns the only mutable state.
#[derive(Clone)]
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_ttl: Duration,
    store: RepositoryState,
}

impl TokenService {
    pub fn new(secret: &str, access_ttl_minutes: i64, store: RepositoryState) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            access_ttl: Duration::minutes(access_ttl_minutes),
            store,
        }
    }

    /// Access token lifetime in seconds, reported to clients as `expires_in`.
    pub fn access_ttl_secs(&self) -> i64 {
        self.access_ttl.num_seconds()
    }

    // --- Issuing ---

    /// issue
    ///
    /// Called on successful login. Mints an access/refresh pair for `subject` and
    /// stores the refresh token's record so it can later be rotated or revoked.
    pub async fn issue(&self, subject: Uuid) -> Result<TokenPair, ApiError> {
        self.issue_at(subject, Utc::now()).await
    }

    pub async fn issue_at(&self, subject: Uuid, now: DateTime<Utc>) -> Result<TokenPair, ApiError> {
        let access = self.sign_access(subject, now)?;
        let refresh = self.sign_refresh(subject, now)?;
        self.store.store_refresh_token(record_for(&refresh)).await?;

        tracing::info!(%subject, token_id = %refresh.token_id, "issued token pair");
        Ok(TokenPair { access, refresh })
    }

    fn sign_access(&self, subject: Uuid, now: DateTime<Utc>) -> Result<AccessToken, ApiError> {
        let expires_at = now + self.access_ttl;
        let claims = Claims {
            sub: subject,
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            kind: TokenKind::Access,
            jti: None,
        };
        Ok(AccessToken {
            subject,
            issued_at: now,
            expires_at,
            value: self.sign(&claims)?,
        })
    }

    fn sign_refresh(&self, subject: Uuid, now: DateTime<Utc>) -> Result<RefreshToken, ApiError> {
        let token_id = Uuid::new_v4();
        let expires_at = now + Duration::seconds(REFRESH_TOKEN_TTL_SECS);
        let claims = Claims {
            sub: subject,
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            kind: TokenKind::Refresh,
            jti: Some(token_id),
        };
        Ok(RefreshToken {
            subject,
            token_id,
            issued_at: now,
            expires_at,
            value: self.sign(&claims)?,
        })
    }

    fn sign(&self, claims: &Claims) -> Result<String, ApiError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .map_err(|e| ApiError::Unexpected(format!("token signing failed: {}", e)))
    }

    // --- Verification ---

    /// verify_access
    ///
    /// Returns the subject of a valid, unexpired access token. Performs no I/O.
    pub fn verify_access(&self, token: &str) -> Result<Uuid, ApiError> {
        self.verify_access_at(token, Utc::now())
    }

    pub fn verify_access_at(&self, token: &str, now: DateTime<Utc>) -> Result<Uuid, ApiError> {
        let claims = self.decode_claims(token, TokenKind::Access)?;
        if now.timestamp() >= claims.exp {
            return Err(ApiError::InvalidToken(TokenFault::Expired));
        }
        Ok(claims.sub)
    }

    /// decode_refresh
    ///
    /// Checks signature and kind of a refresh token value and rebuilds the token.
    /// Expiry and revocation are left to `refresh` so logout still accepts old tokens.
    pub fn decode_refresh(&self, value: &str) -> Result<RefreshToken, ApiError> {
        let claims = self.decode_claims(value, TokenKind::Refresh)?;
        let token_id = claims
            .jti
            .ok_or(ApiError::InvalidToken(TokenFault::Malformed))?;

        Ok(RefreshToken {
            subject: claims.sub,
            token_id,
            issued_at: timestamp(claims.iat)?,
            expires_at: timestamp(claims.exp)?,
            value: value.to_string(),
        })
    }

    fn decode_claims(&self, token: &str, expected: TokenKind) -> Result<Claims, ApiError> {
        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is compared against an explicit `now` by the callers.
        validation.validate_exp = false;
        validation.set_required_spec_claims(&["exp", "sub"]);

        let data = decode::<Claims>(token, &self.decoding_key, &validation).map_err(|e| {
            let fault = match e.kind() {
                ErrorKind::InvalidSignature => TokenFault::BadSignature,
                _ => TokenFault::Malformed,
            };
            ApiError::InvalidToken(fault)
        })?;

        if data.claims.kind != expected {
            return Err(ApiError::InvalidToken(TokenFault::WrongKind));
        }
        Ok(data.claims)
    }

    // --- Refresh & Revocation ---

    /// refresh
    ///
    /// Exchanges a refresh token for a new pair, rotating its id: the old id is
    /// invalidated and the new one stored in a single repository transaction.
    /// A failed refresh is reported immediately and never retried.
    pub async fn refresh(&self, token: &RefreshToken) -> Result<TokenPair, ApiError> {
        self.refresh_at(token, Utc::now()).await
    }

    pub async fn refresh_at(
        &self,
        token: &RefreshToken,
        now: DateTime<Utc>,
    ) -> Result<TokenPair, ApiError> {
        if now >= token.expires_at {
            return Err(ApiError::InvalidToken(TokenFault::Expired));
        }

        let access = self.sign_access(token.subject, now)?;
        let refresh = self.sign_refresh(token.subject, now)?;

        let rotated = self
            .store
            .rotate_refresh_token(token.token_id, record_for(&refresh))
            .await?;

        if !rotated {
            match self.store.lookup_refresh_token(token.token_id).await? {
                Some(_) => tracing::warn!(
                    subject = %token.subject,
                    token_id = %token.token_id,
                    "refresh token reused after rotation or revocation"
                ),
                None => tracing::warn!(
                    token_id = %token.token_id,
                    "unknown or logged out refresh token presented"
                ),
            }
            return Err(ApiError::InvalidToken(TokenFault::Revoked));
        }

        tracing::info!(
            subject = %token.subject,
            old_token_id = %token.token_id,
            new_token_id = %refresh.token_id,
            "rotated refresh token"
        );
        Ok(TokenPair { access, refresh })
    }

    /// Deletes a refresh token's record (logout). Revoking an already dead token is not an error.
    pub async fn revoke(&self, token: &RefreshToken) -> Result<(), ApiError> {
        let revoked = self.store.invalidate_refresh_token(token.token_id).await?;
        tracing::info!(subject = %token.subject, token_id = %token.token_id, revoked, "revoked refresh token");
        Ok(())
    }

    /// purge_expired
    ///
    /// Drops every refresh record that has expired, including rotated ones kept for
    /// reuse detection. Run periodically by the server.
    pub async fn purge_expired(&self) -> Result<u64, ApiError> {
        self.purge_expired_at(Utc::now()).await
    }

    pub async fn purge_expired_at(&self, now: DateTime<Utc>) -> Result<u64, ApiError> {
        let purged = self.store.purge_expired_refresh_tokens(now).await?;
        if purged > 0 {
            tracing::info!(purged, "purged expired refresh tokens");
        }
        Ok(purged)
    }
}

fn record_for(token: &RefreshToken) -> RefreshTokenRecord {
    RefreshTokenRecord {
        id: token.token_id,
        subject: token.subject,
        issued_at: token.issued_at,
        expires_at: token.expires_at,
        revoked_at: None,
    }
}

fn timestamp(secs: i64) -> Result<DateTime<Utc>, ApiError> {
    DateTime::from_timestamp(secs, 0).ok_or(ApiError::InvalidToken(TokenFault::Malformed))
}

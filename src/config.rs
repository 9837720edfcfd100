use std::env;

/// AppConfig
///
/// Immutable configuration loaded once at startup and handed to `AppState`.
/// Nothing reads the environment after this point.
#[derive(Clone, Debug)]
pub struct AppConfig {
    // Runtime environment marker. Controls fail-fast behavior and log format.
    pub env: Env,
    // Postgres connection string. Optional locally, where an in-memory store stands in.
    pub db_url: Option<String>,
    // HMAC secret used to sign and verify both token kinds.
    pub jwt_secret: String,
    // Prefix of the refresh token cookie: `<app_name>.refreshtoken`.
    pub app_name: String,
    pub access_token_ttl_minutes: i64,
    pub bcrypt_cost: u32,
    pub bind_addr: String,
}

/// Env
///
/// Local runs get pretty logs and fallback secrets; production insists on real ones.
#[derive(Clone, PartialEq, Debug)]
pub enum Env {
    Local,
    Production,
}

pub const DEFAULT_APP_NAME: &str = "gatekeeper";
pub const DEFAULT_ACCESS_TOKEN_TTL_MINUTES: i64 = 15;
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";
const LOCAL_JWT_SECRET: &str = "super-secure-test-secret-value-local";
// bcrypt's lowest accepted work factor; only ever used for tests.
const TEST_BCRYPT_COST: u32 = 4;

impl Default for AppConfig {
    /// default
    ///
    /// Non-panicking configuration for tests: no database, a fixed secret and the
    /// cheapest bcrypt cost.
    fn default() -> Self {
        Self {
            env: Env::Local,
            db_url: None,
            jwt_secret: LOCAL_JWT_SECRET.to_string(),
            app_name: DEFAULT_APP_NAME.to_string(),
            access_token_ttl_minutes: DEFAULT_ACCESS_TOKEN_TTL_MINUTES,
            bcrypt_cost: TEST_BCRYPT_COST,
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
        }
    }
}

impl AppConfig {
    /// load
    ///
    /// Reads the configuration from environment variables, following the **fail-fast**
    /// principle.
    ///
    /// # Panics
    /// Panics in `Env::Production` when `JWT_SECRET` or `DATABASE_URL` is missing, so the
    /// service never starts with a guessable signing key or without its token store.
    pub fn load() -> Self {
        let env = match env::var("APP_ENV").as_deref() {
            Ok("production") => Env::Production,
            _ => Env::Local,
        };

        let (jwt_secret, db_url) = match env {
            Env::Production => (
                env::var("JWT_SECRET").expect("FATAL: JWT_SECRET must be set in production."),
                Some(
                    env::var("DATABASE_URL")
                        .expect("FATAL: DATABASE_URL must be set in production."),
                ),
            ),
            Env::Local => (
                env::var("JWT_SECRET").unwrap_or_else(|_| LOCAL_JWT_SECRET.to_string()),
                env::var("DATABASE_URL").ok(),
            ),
        };

        Self {
            env,
            db_url,
            jwt_secret,
            app_name: env::var("APP_NAME").unwrap_or_else(|_| DEFAULT_APP_NAME.to_string()),
            access_token_ttl_minutes: parsed_var(
                "ACCESS_TOKEN_TTL_MINUTES",
                DEFAULT_ACCESS_TOKEN_TTL_MINUTES,
            ),
            bcrypt_cost: parsed_var("BCRYPT_COST", bcrypt::DEFAULT_COST),
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string()),
        }
    }
}

fn parsed_var<T: std::str::FromStr>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(variable = name, value = %raw, "unparseable value, using default");
            default
        }),
        Err(_) => default,
    }
}

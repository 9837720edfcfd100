use std::sync::Arc;

use crate::error::ApiError;

/// PasswordHasher
///
/// Opaque password hashing capability. Handlers only hash and verify; which
/// algorithm sits behind it is the implementation's business.
pub trait PasswordHasher: Send + Sync {
    fn hash(&self, password: &str) -> Result<String, ApiError>;
    fn verify(&self, password: &str, hash: &str) -> Result<bool, ApiError>;
}

pub type HasherState = Arc<dyn PasswordHasher>;

/// bcrypt with a configurable work factor. Tests run with the minimum cost of 4.
#[derive(Debug, Clone)]
pub struct BcryptHasher {
    cost: u32,
}

impl BcryptHasher {
    pub fn new(cost: u32) -> Self {
        Self { cost }
    }
}

impl PasswordHasher for BcryptHasher {
    fn hash(&self, password: &str) -> Result<String, ApiError> {
        Ok(bcrypt::hash(password, self.cost)?)
    }

    fn verify(&self, password: &str, hash: &str) -> Result<bool, ApiError> {
        Ok(bcrypt::verify(password, hash)?)
    }
}

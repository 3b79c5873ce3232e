//! Token models

/// Owner and expiry of a stored token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRecord {
    pub username: String,
    /// Epoch seconds; 0 once the token has been expired
    pub expiration: i64,
}

impl TokenRecord {
    /// Whether the token is usable at `now` (epoch seconds)
    pub fn is_valid_at(&self, now: i64) -> bool {
        !self.username.is_empty() && self.expiration >= now
    }
}

/// Result of a successful token validation: the user and their rotated token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub username: String,
    pub token: String,
}

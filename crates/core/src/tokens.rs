//! Session token lifecycle
//!
//! Tokens are 16 random bytes rendered as 32 lowercase hex characters. A
//! token moves through `Issued -> Active -> Renewed | Expired -> Purged`:
//! every successful validation issues a replacement and spends the
//! presented token, and a periodic sweep deletes rows whose expiration has
//! passed.

use std::time::Duration;

use rand::rngs::OsRng;
use rand::RngCore;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use crate::config::TokenConfig;
use crate::credentials;
use crate::error::{Error, Result};
use crate::knowledge::KnowledgeBase;
use crate::models::Session;

/// Random bytes per token
pub const TOKEN_BYTES: usize = 16;

/// Length of the hex-encoded token
pub const TOKEN_LEN: usize = TOKEN_BYTES * 2;

type Entropy = fn(&mut [u8]) -> std::result::Result<(), rand::Error>;

fn os_entropy(dest: &mut [u8]) -> std::result::Result<(), rand::Error> {
    OsRng.try_fill_bytes(dest)
}

/// Current wall-clock time in epoch seconds
pub fn now_epoch() -> i64 {
    chrono::Utc::now().timestamp()
}

fn is_well_formed(token: &str) -> bool {
    token.len() == TOKEN_LEN && token.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Issues, validates and rotates session tokens
#[derive(Clone)]
pub struct TokenService {
    kb: KnowledgeBase,
    config: TokenConfig,
    entropy: Entropy,
}

impl TokenService {
    pub fn new(kb: KnowledgeBase, config: TokenConfig) -> Self {
        Self {
            kb,
            config,
            entropy: os_entropy,
        }
    }

    #[cfg(test)]
    fn with_entropy(kb: KnowledgeBase, config: TokenConfig, entropy: Entropy) -> Self {
        Self {
            kb,
            config,
            entropy,
        }
    }

    pub fn knowledge_base(&self) -> &KnowledgeBase {
        &self.kb
    }

    pub fn config(&self) -> TokenConfig {
        self.config
    }

    /// Generate a fresh random token
    pub fn generate(&self) -> Result<String> {
        let mut bytes = [0u8; TOKEN_BYTES];
        (self.entropy)(&mut bytes).map_err(|e| Error::Randomness(e.to_string()))?;

        Ok(hex::encode(bytes))
    }

    /// Check credentials and issue a token
    #[instrument(skip(self, password))]
    pub async fn login(&self, username: &str, password: &str) -> Result<String> {
        if password.is_empty() {
            return Err(Error::Authentication("Missing password".into()));
        }

        let hash = self
            .kb
            .get_hash(username)
            .await
            .ok_or_else(|| Error::NotFound(format!("User '{}'", username)))?;

        // Argon2 is CPU-bound, verify on the blocking pool
        let password = password.to_owned();
        tokio::task::spawn_blocking(move || credentials::verify_password(&password, &hash))
            .await
            .map_err(|e| Error::Hashing(e.to_string()))??;

        let token = self.issue(username).await?;
        info!("User logged in");
        Ok(token)
    }

    /// Issue a token for `username` expiring one TTL from now
    pub async fn issue(&self, username: &str) -> Result<String> {
        self.issue_at(username, now_epoch()).await
    }

    pub async fn issue_at(&self, username: &str, now: i64) -> Result<String> {
        self.issue_until(username, self.expiration_from(now)).await
    }

    fn expiration_from(&self, now: i64) -> i64 {
        let ttl = i64::try_from(self.config.ttl_secs).unwrap_or(i64::MAX);
        now.saturating_add(ttl)
    }

    #[instrument(skip(self))]
    async fn issue_until(&self, username: &str, expiration: i64) -> Result<String> {
        let token = self.generate()?;

        if !self.kb.add_token(username, &token, expiration).await {
            return Err(Error::StorageFailed("add_token"));
        }
        debug!(expiration, "Token issued");
        Ok(token)
    }

    /// Validate `token` and rotate it
    pub async fn validate(&self, token: &str) -> Result<Session> {
        self.validate_at(token, now_epoch()).await
    }

    /// Validate `token` against `now` and rotate it.
    ///
    /// On success the presented token is spent and the returned session
    /// carries its replacement. A token can be rotated at most once, even
    /// when several callers present it at the same time.
    #[instrument(skip_all)]
    pub async fn validate_at(&self, token: &str, now: i64) -> Result<Session> {
        if !is_well_formed(token) {
            debug!("Malformed token");
            return Err(Error::AuthInvalid);
        }

        let record = self.kb.get_user(token).await.ok_or(Error::AuthInvalid)?;
        if !record.is_valid_at(now) {
            debug!(expiration = record.expiration, now, "Token expired");
            return Err(Error::AuthInvalid);
        }

        // A renewal always outlives the token it replaces
        let expiration = self
            .expiration_from(now)
            .max(record.expiration.saturating_add(1));
        let renewed = self.issue_until(&record.username, expiration).await?;

        if !self.kb.claim_token(token, now).await {
            // Lost a race with another rotation, or storage refused the write.
            // Either way the replacement must not outlive this call.
            self.kb.expire_token(&renewed).await;
            return match self.kb.get_user(token).await {
                Some(current) if current.is_valid_at(now) => {
                    Err(Error::StorageFailed("expire_token"))
                }
                _ => Err(Error::AuthInvalid),
            };
        }

        debug!(username = %record.username, "Token rotated");
        Ok(Session {
            username: record.username,
            token: renewed,
        })
    }

    /// Spend `token` without issuing a replacement
    pub async fn revoke(&self, token: &str) -> Result<()> {
        if self.kb.expire_token(token).await {
            Ok(())
        } else {
            Err(Error::StorageFailed("expire_token"))
        }
    }
}

/// Periodically delete expired tokens until `shutdown` fires.
///
/// The first sweep runs one `interval` after spawning.
pub fn spawn_purge_sweep(
    kb: KnowledgeBase,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let Some(start) = Instant::now().checked_add(interval) else {
            error!(
                interval_secs = interval.as_secs(),
                "Purge interval out of range, sweep disabled"
            );
            return;
        };
        let mut ticker = interval_at(start, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_secs = interval.as_secs(), "Token purge sweep started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if !kb.purge_tokens(now_epoch()).await {
                        warn!("Purge sweep failed, retrying next tick");
                    }
                }
                _ = shutdown.recv() => {
                    debug!("Token purge sweep shutting down");
                    break;
                }
            }
        }
    })
}

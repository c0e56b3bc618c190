//! Warden Nonce - replay protection
//!
//! A nonce tracker remembers, per `(agent, request)`, the single nonce it
//! expects next. The first sighting of a pair always succeeds and mints a
//! fresh nonce; every later sighting must present exactly the expected value
//! and is answered with a new one. A replayed message carries a stale nonce
//! and is refused.
//!
//! Nonces are independent of the signature chain: they travel outside the
//! signed digest so they can roll hop by hop without re-signing the workflow.

#![deny(unsafe_code)]

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;
use tracing::{debug, warn};
use warden_types::EntityId;

/// Default retention for tracked nonces.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

const NONCE_BYTES: usize = 32;

/// Errors from the nonce tracker itself (never a rejection).
#[derive(Debug, Error)]
pub enum NonceError {
    #[error("nonce store lock poisoned")]
    LockPoisoned,
}

/// Replay-protection capability.
pub trait NonceTracker: Send + Sync {
    /// Validate `supplied` for `(agent, request_id)`.
    ///
    /// Returns the newly minted nonce on success and `None` on rejection.
    fn validate_nonce(
        &self,
        agent: &EntityId,
        request_id: &str,
        supplied: &str,
    ) -> Result<Option<String>, NonceError>;

    /// How long a minted nonce is remembered. A pair unseen for longer is
    /// treated as a first sighting again, so callers must refuse requests
    /// authorised further back than this.
    fn retention(&self) -> Duration;
}

/// Fresh 256-bit nonce, hex encoded.
pub fn generate_nonce() -> String {
    let mut bytes = [0u8; NONCE_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

struct TrackedNonce {
    expected: String,
    issued_at: Instant,
}

/// Mutex-guarded in-memory tracker.
///
/// The whole read-validate-regenerate-write sequence runs under one lock, so
/// two concurrent first sightings of the same pair cannot both succeed.
/// Expiry is measured on the monotonic clock; moving the wall clock backwards
/// cannot revive an expired entry or extend a live one.
pub struct InMemoryNonceTracker {
    retention: Duration,
    entries: Mutex<HashMap<(EntityId, String), TrackedNonce>>,
}

impl InMemoryNonceTracker {
    pub fn new(retention: Duration) -> Self {
        Self {
            retention,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Number of pairs currently tracked (after purging).
    pub fn tracked(&self) -> Result<usize, NonceError> {
        let mut entries = self.entries.lock().map_err(|_| NonceError::LockPoisoned)?;
        purge_expired(&mut entries, self.retention);
        Ok(entries.len())
    }
}

impl Default for InMemoryNonceTracker {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION)
    }
}

fn purge_expired(entries: &mut HashMap<(EntityId, String), TrackedNonce>, retention: Duration) {
    let before = entries.len();
    entries.retain(|_, tracked| tracked.issued_at.elapsed() < retention);
    let purged = before - entries.len();
    if purged > 0 {
        debug!(purged, "Purged expired nonces");
    }
}

impl NonceTracker for InMemoryNonceTracker {
    fn validate_nonce(
        &self,
        agent: &EntityId,
        request_id: &str,
        supplied: &str,
    ) -> Result<Option<String>, NonceError> {
        let mut entries = self.entries.lock().map_err(|_| NonceError::LockPoisoned)?;
        purge_expired(&mut entries, self.retention);

        let key = (*agent, request_id.to_string());
        if let Some(tracked) = entries.get(&key) {
            if tracked.expected != supplied {
                warn!(agent = %agent, request_id, "Nonce rejected");
                return Ok(None);
            }
        }

        let fresh = generate_nonce();
        entries.insert(
            key,
            TrackedNonce {
                expected: fresh.clone(),
                issued_at: Instant::now(),
            },
        );
        Ok(Some(fresh))
    }

    fn retention(&self) -> Duration {
        self.retention
    }
}

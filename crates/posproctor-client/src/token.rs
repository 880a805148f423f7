//! Session-token cache.
//!
//! Commanders hold a small number of concurrent sessions and expire idle
//! ones after about twenty minutes, so a token is reused across cycles
//! until its TTL passes or a poll against that target fails.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

struct CachedToken {
    token: String,
    inserted_at: Instant,
}

/// TTL-bounded map of `address:username` → session token.
///
/// The lock is held only for a single map operation; the network
/// exchange that produces a token runs outside it.
pub struct TokenCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, CachedToken>>,
}

impl TokenCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Cached token for `key`, dropping it if expired.
    pub fn get(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.inserted_at.elapsed() < self.ttl => Some(entry.token.clone()),
            Some(_) => {
                entries.remove(key);
                debug!(%key, "cached session token expired");
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, key: &str, token: String) {
        self.entries.lock().insert(
            key.to_string(),
            CachedToken {
                token,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Forget the token for `key` so the next poll re-authenticates.
    pub fn invalidate(&self, key: &str) {
        if self.entries.lock().remove(key).is_some() {
            debug!(%key, "session token invalidated");
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

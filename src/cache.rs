//! Domain Address Cache
//!
//! This module provides a thread-safe map from domain name to address with
//! per-entry expiry. The cache lets resolution results be shared between
//! probing workers without repeating lookups.
//!
//! Entries are stamped with a monotonic clock, so adjustments to the wall
//! clock never shorten or extend a lifetime. A lookup that finds an expired
//! entry removes it and reports a miss; `sweep` removes every expired entry
//! in one pass.
//!
//! # Usage
//!
//! ```rust
//! # use std::time::Duration;
//! # use inquest::cache::DomainsCache;
//! let cache = DomainsCache::new(Duration::from_secs(60));
//!
//! cache.insert("example.com", "93.184.216.34").unwrap();
//!
//! if let Some(address) = cache.lookup("example.com") {
//!     // Use cached address
//! }
//! ```

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use derive_more::{Display, Error};

#[derive(Debug, Display, Error)]
pub enum CacheError {
    #[display(fmt = "cache lock poisoned")]
    PoisonedLock,
}

type Result<T> = std::result::Result<T, CacheError>;

/// A cached address and the instant it stops being valid
#[derive(Clone, Debug)]
pub struct CacheEntry {
    pub address: String,
    pub expires_at: Instant,
}

/// Map from domain name to address with a fixed time-to-live
///
/// Every operation takes an exclusive lock over the whole map for its
/// duration, which keeps the cache safe under concurrent callers. The TTL
/// is set at construction and never changes afterwards.
pub struct DomainsCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    ttl: Duration,
}

impl DomainsCache {
    pub fn new(ttl: Duration) -> DomainsCache {
        DomainsCache {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Record an address for a name, replacing any prior entry
    pub fn insert(&self, name: &str, address: &str) -> Result<()> {
        let mut entries = self.entries.lock().map_err(|_| CacheError::PoisonedLock)?;

        entries.insert(
            name.to_string(),
            CacheEntry {
                address: address.to_string(),
                expires_at: Instant::now() + self.ttl,
            },
        );

        Ok(())
    }

    /// Return the cached address for a name if it has not expired
    ///
    /// An expired entry is removed on the spot and reported as a miss. The
    /// returned address is a copy; the cache keeps ownership of its storage.
    pub fn lookup(&self, name: &str) -> Option<String> {
        let mut entries = match self.entries.lock() {
            Ok(x) => x,
            Err(_) => return None,
        };

        match entries.get(name) {
            Some(entry) if Instant::now() < entry.expires_at => Some(entry.address.clone()),
            Some(_) => {
                entries.remove(name);
                None
            }
            None => None,
        }
    }

    /// Remove every expired entry, returning how many were dropped
    pub fn sweep(&self) -> Result<usize> {
        let mut entries = self.entries.lock().map_err(|_| CacheError::PoisonedLock)?;

        let now = Instant::now();
        let before = entries.len();
        entries.retain(|_, entry| now < entry.expires_at);

        Ok(before - entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

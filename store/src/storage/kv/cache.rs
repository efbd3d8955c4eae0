//! In-memory index of known service names
//!
//! Filled once from the service index keys when the store opens and kept
//! current by every write, so listing services never touches the disk.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

/// Service name -> expiry in Unix seconds (`0` = never)
#[derive(Debug, Default)]
pub struct ServiceCache {
    services: RwLock<HashMap<String, u64>>,
}

impl ServiceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a write for `service`. The entry lives as long as its latest
    /// expiry.
    pub fn put_service(&self, service: &str, expires_at: u64) {
        let mut services = self.services.write().unwrap_or_else(PoisonError::into_inner);
        match services.get_mut(service) {
            Some(current) => {
                if *current != 0 && (expires_at == 0 || expires_at > *current) {
                    *current = expires_at;
                }
            }
            None => {
                services.insert(service.to_string(), expires_at);
            }
        }
    }

    /// Live service names, sorted. Expired entries found along the way are
    /// evicted.
    pub fn services(&self, now_secs: u64) -> Vec<String> {
        let (mut live, stale) = {
            let services = self.services.read().unwrap_or_else(PoisonError::into_inner);
            let mut live = Vec::with_capacity(services.len());
            let mut stale = false;
            for (name, &expires_at) in services.iter() {
                if expires_at == 0 || expires_at > now_secs {
                    live.push(name.clone());
                } else {
                    stale = true;
                }
            }
            (live, stale)
        };

        if stale {
            self.evict_expired(now_secs);
        }

        live.sort();
        live
    }

    /// Drop entries whose expiry has passed; returns how many were dropped.
    pub fn evict_expired(&self, now_secs: u64) -> usize {
        let mut services = self.services.write().unwrap_or_else(PoisonError::into_inner);
        let before = services.len();
        services.retain(|_, expires_at| *expires_at == 0 || *expires_at > now_secs);
        before - services.len()
    }

    pub fn len(&self) -> usize {
        self.services.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

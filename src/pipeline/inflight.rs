//! In-flight guard.
//!
//! Rejects a second concurrent attempt for the same key. A key is the
//! intent fingerprint while preparing and the pending id while submitting.
//! Tickets release their entry on drop, including on error and task
//! cancellation. Entries older than the abandon window are treated as
//! left behind by a lost task and may be taken over.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, Copy)]
struct Holder {
    token: u64,
    since: Instant,
}

#[derive(Debug, Clone)]
pub struct InFlightGuard {
    entries: Arc<DashMap<String, Holder>>,
    next_token: Arc<AtomicU64>,
    abandon_after: Duration,
}

impl InFlightGuard {
    pub fn new(abandon_after: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            next_token: Arc::new(AtomicU64::new(1)),
            abandon_after,
        }
    }

    /// Claim `key`, or fail with `AlreadyInFlight` if a live claim exists.
    pub fn acquire(&self, key: impl Into<String>) -> Result<InFlightTicket> {
        let key = key.into();
        let holder = Holder {
            token: self.next_token.fetch_add(1, Ordering::Relaxed),
            since: Instant::now(),
        };

        match self.entries.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                let age = occupied.get().since.elapsed();
                if age < self.abandon_after {
                    return Err(PipelineError::AlreadyInFlight(key));
                }
                tracing::warn!(key = %key, age_secs = age.as_secs(), "Replacing abandoned in-flight entry");
                occupied.insert(holder);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(holder);
            }
        }

        Ok(InFlightTicket {
            entries: self.entries.clone(),
            key,
            token: holder.token,
        })
    }

    pub fn is_in_flight(&self, key: &str) -> bool {
        self.entries
            .get(key)
            .is_some_and(|h| h.since.elapsed() < self.abandon_after)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Claim on one key, released on drop.
#[derive(Debug)]
pub struct InFlightTicket {
    entries: Arc<DashMap<String, Holder>>,
    key: String,
    token: u64,
}

impl InFlightTicket {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for InFlightTicket {
    fn drop(&mut self) {
        // A replaced (abandoned) claim must not evict its successor.
        self.entries.remove_if(&self.key, |_, h| h.token == self.token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_claim_rejected_until_drop() {
        let guard = InFlightGuard::new(Duration::from_secs(120));
        let ticket = guard.acquire("intent:a").unwrap();

        let err = guard.acquire("intent:a").unwrap_err();
        assert!(matches!(err, PipelineError::AlreadyInFlight(ref k) if k == "intent:a"));
        assert!(guard.acquire("intent:b").is_ok());

        drop(ticket);
        assert!(!guard.is_in_flight("intent:a"));
        assert!(guard.acquire("intent:a").is_ok());
    }

    #[test]
    fn test_abandoned_entry_is_replaced() {
        let guard = InFlightGuard::new(Duration::ZERO);
        let stale = guard.acquire("pending:1").unwrap();
        let fresh = guard.acquire("pending:1").unwrap();

        // The stale ticket's drop must leave the fresh claim in place.
        drop(stale);
        assert_eq!(guard.len(), 1);
        drop(fresh);
        assert!(guard.is_empty());
    }

    #[tokio::test]
    async fn test_released_when_task_is_cancelled() {
        let guard = InFlightGuard::new(Duration::from_secs(120));
        let g = guard.clone();
        let handle = tokio::spawn(async move {
            let _ticket = g.acquire("intent:x").unwrap();
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });

        tokio::task::yield_now().await;
        while !guard.is_in_flight("intent:x") {
            tokio::task::yield_now().await;
        }
        handle.abort();
        let _ = handle.await;
        assert!(guard.is_empty());
    }
}

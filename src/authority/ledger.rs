//! Pending transaction ledger.
//!
//! One entry per pending id. Each entry sits behind its own async mutex so
//! concurrent submits of the same id serialize and the second one observes
//! the first one's receipt instead of broadcasting again.
//!
//! Entries expire: a prepared transaction nobody broadcast is dropped after
//! `unsubmitted_ttl`, a broadcast one after `receipt_ttl`. Expired entries
//! are swept on write, at most once per `sweep_interval`.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::blockchain::types::Pubkey;
use crate::config::LedgerConfig;
use crate::pipeline::types::{PendingId, SubmitReceipt};

/// What is known about one pending id.
#[derive(Debug, Clone)]
pub struct PendingEntry {
    /// Wallet the transaction was prepared for, when prepared by this ledger's owner.
    pub wallet: Option<Pubkey>,
    /// Message bytes every signature must cover.
    pub message: Option<Vec<u8>>,
    /// Intent kind, for history records.
    pub kind: &'static str,
    /// Set once the first broadcast was sent, whatever its outcome.
    pub broadcast_attempted: bool,
    pub receipt: Option<SubmitReceipt>,
    pub created_at: Instant,
}

impl PendingEntry {
    pub fn new(kind: &'static str) -> Self {
        Self {
            wallet: None,
            message: None,
            kind,
            broadcast_attempted: false,
            receipt: None,
            created_at: Instant::now(),
        }
    }

    pub fn prepared(kind: &'static str, wallet: Pubkey, message: Vec<u8>) -> Self {
        Self {
            wallet: Some(wallet),
            message: Some(message),
            ..Self::new(kind)
        }
    }
}

impl PendingEntry {
    fn expired(&self, retention: &Retention, now: Instant) -> bool {
        let ttl = if self.broadcast_attempted {
            retention.receipt_ttl
        } else {
            retention.unsubmitted_ttl
        };
        now.duration_since(self.created_at) >= ttl
    }
}

pub type EntryHandle = Arc<Mutex<PendingEntry>>;

/// How long ledger entries are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retention {
    pub unsubmitted_ttl: Duration,
    pub receipt_ttl: Duration,
    pub sweep_interval: Duration,
}

impl Retention {
    pub fn from_config(config: &LedgerConfig) -> Self {
        Self {
            unsubmitted_ttl: Duration::from_secs(config.unsubmitted_ttl_secs),
            receipt_ttl: Duration::from_secs(config.receipt_ttl_secs),
            sweep_interval: Duration::from_secs(config.sweep_interval_secs),
        }
    }
}

impl Default for Retention {
    fn default() -> Self {
        Self::from_config(&LedgerConfig::default())
    }
}

#[derive(Debug)]
pub struct PendingLedger {
    entries: DashMap<PendingId, EntryHandle>,
    retention: Retention,
    last_sweep: std::sync::Mutex<Instant>,
}

impl Default for PendingLedger {
    fn default() -> Self {
        Self::with_retention(Retention::default())
    }
}

impl PendingLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retention(retention: Retention) -> Self {
        Self {
            entries: DashMap::new(),
            retention,
            last_sweep: std::sync::Mutex::new(Instant::now()),
        }
    }

    pub fn retention(&self) -> Retention {
        self.retention
    }

    /// Register a prepared transaction under a new id.
    pub fn insert(&self, id: PendingId, entry: PendingEntry) {
        self.sweep_if_due();
        self.entries.insert(id, Arc::new(Mutex::new(entry)));
    }

    pub fn get(&self, id: &PendingId) -> Option<EntryHandle> {
        self.entries.get(id).map(|r| r.value().clone())
    }

    /// Existing entry for `id`, or a new one created with `kind`.
    pub fn get_or_create(&self, id: &PendingId, kind: &'static str) -> EntryHandle {
        self.sweep_if_due();
        self.entries
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(PendingEntry::new(kind))))
            .value()
            .clone()
    }

    /// Drop every expired entry now. Returns how many were dropped.
    pub fn prune(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, handle| match handle.try_lock() {
            Ok(entry) => !entry.expired(&self.retention, now),
            // Locked means a submit is running on it.
            Err(_) => true,
        });
        let pruned = before - self.entries.len();
        if pruned > 0 {
            tracing::debug!(pruned, remaining = self.entries.len(), "Pruned pending ledger");
        }
        pruned
    }

    fn sweep_if_due(&self) {
        let now = Instant::now();
        {
            let Ok(mut last) = self.last_sweep.lock() else {
                return;
            };
            if now.duration_since(*last) < self.retention.sweep_interval {
                return;
            }
            *last = now;
        }
        self.prune();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

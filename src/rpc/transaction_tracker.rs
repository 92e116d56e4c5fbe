//! Retransmission tracking keyed by (xid, client address).
//!
//! Clients retry calls they believe lost; processing a retry twice would
//! re-run a possibly non-idempotent handler. The tracker remembers recently
//! seen transactions for a retention period so duplicates are dropped
//! without a reply (the client keeps retrying until the original reply
//! arrives or its own timeout fires).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

/// Tracks in-flight and recently completed transactions.
pub struct TransactionTracker {
    retention_period: Duration,
    transactions: Mutex<HashMap<(u32, SocketAddr), TransactionState>>,
}

impl TransactionTracker {
    /// Creates a tracker that remembers completed transactions for
    /// `retention_period`.
    pub fn new(retention_period: Duration) -> Self {
        Self {
            retention_period,
            transactions: Mutex::new(HashMap::new()),
        }
    }

    /// Returns true when (xid, client) was already seen; otherwise records
    /// it as in progress and returns false.
    pub fn is_retransmission(&self, xid: u32, client_addr: SocketAddr) -> bool {
        let mut transactions = self
            .transactions
            .lock()
            .expect("transaction table lock poisoned");
        housekeeping(&mut transactions, self.retention_period);
        if let std::collections::hash_map::Entry::Vacant(e) =
            transactions.entry((xid, client_addr))
        {
            e.insert(TransactionState::InProgress);
            false
        } else {
            true
        }
    }

    /// Moves a transaction from in-progress to completed, starting its
    /// retention clock.
    pub fn mark_processed(&self, xid: u32, client_addr: SocketAddr) {
        let completion_time = SystemTime::now();
        let mut transactions = self
            .transactions
            .lock()
            .expect("transaction table lock poisoned");
        if let Some(tx) = transactions.get_mut(&(xid, client_addr)) {
            *tx = TransactionState::Completed(completion_time);
        }
    }
}

/// Drops completed transactions older than the retention period. In-progress
/// entries are kept regardless of age so a duplicate of a still-running call
/// is never dispatched twice.
fn housekeeping(
    transactions: &mut HashMap<(u32, SocketAddr), TransactionState>,
    max_age: Duration,
) {
    let cutoff = SystemTime::now() - max_age;
    transactions.retain(|_, v| match v {
        TransactionState::InProgress => true,
        TransactionState::Completed(completion_time) => *completion_time >= cutoff,
    });
}

enum TransactionState {
    InProgress,
    Completed(SystemTime),
}

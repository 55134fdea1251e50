//! Demand-driven interest tracking. Each observer (a list view, a detail
//! screen) holds a token and declares the metrics it currently renders; the
//! acquisition layer polls the union across tokens, never more.

use std::collections::{BTreeSet, HashMap};

use tokio::sync::watch;
use tracing::debug;

use crate::catalog::MetricId;

/// Opaque handle for one observer's declared interest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InterestToken(u64);

#[derive(Debug)]
pub struct InterestRegistry {
    tokens: HashMap<u64, BTreeSet<MetricId>>,
    next_token: u64,
    effective_tx: watch::Sender<BTreeSet<MetricId>>,
}

impl InterestRegistry {
    pub fn new() -> Self {
        let (effective_tx, _) = watch::channel(BTreeSet::new());
        Self {
            tokens: HashMap::new(),
            next_token: 0,
            effective_tx,
        }
    }

    /// Allocates a token with an empty interest set.
    pub fn register(&mut self) -> InterestToken {
        let id = self.next_token;
        self.next_token += 1;
        self.tokens.insert(id, BTreeSet::new());
        InterestToken(id)
    }

    /// Atomically replaces the token's interest set.
    ///
    /// An empty set is ignored: scrolling views report transient empty
    /// visible sets, and honoring those would thrash the acquisition
    /// subscription. True disinterest is signalled with [`clear`].
    ///
    /// [`clear`]: InterestRegistry::clear
    pub fn replace(&mut self, token: InterestToken, metrics: BTreeSet<MetricId>) {
        if metrics.is_empty() {
            debug!(token = token.0, "ignoring transient empty interest set");
            return;
        }
        let Some(slot) = self.tokens.get_mut(&token.0) else {
            debug!(token = token.0, "replace on unknown token");
            return;
        };
        if *slot == metrics {
            return;
        }
        *slot = metrics;
        self.publish();
    }

    /// Removes the token's contribution entirely (observer teardown).
    pub fn clear(&mut self, token: InterestToken) {
        if self.tokens.remove(&token.0).is_some() {
            self.publish();
        } else {
            debug!(token = token.0, "clear on unknown token");
        }
    }

    /// Union across all live tokens.
    pub fn effective_set(&self) -> BTreeSet<MetricId> {
        self.tokens.values().flatten().cloned().collect()
    }

    /// Receiver for effective-set changes; notified once per distinct set.
    pub fn subscribe(&self) -> watch::Receiver<BTreeSet<MetricId>> {
        self.effective_tx.subscribe()
    }

    fn publish(&self) {
        let set = self.effective_set();
        self.effective_tx.send_if_modified(|current| {
            if *current == set {
                false
            } else {
                *current = set;
                true
            }
        });
    }
}

impl Default for InterestRegistry {
    fn default() -> Self {
        Self::new()
    }
}

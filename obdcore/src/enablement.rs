//! Persisted, ordered enablement of catalog metrics. Enabled entries form
//! the prefix of the entry list in display order; disabled entries have no
//! meaningful position. Every mutation is persisted best-effort.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Range;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::catalog::{MetricCatalog, MetricDefinition, MetricId};
use crate::persist::KvStore;

/// Persist keys, stable across releases.
pub const ENABLED_FLAGS_KEY: &str = "enabled_by_metric";
pub const ENABLED_ORDER_KEY: &str = "enabled_order";

#[derive(Debug, Clone)]
struct Entry {
    id: MetricId,
    enabled: bool,
}

pub struct EnablementStore {
    catalog: Arc<MetricCatalog>,
    entries: Vec<Entry>,
    store: Arc<dyn KvStore>,
    enabled_tx: watch::Sender<BTreeSet<MetricId>>,
}

impl EnablementStore {
    /// Builds the store from catalog defaults, then overlays the persisted
    /// enabled-flag map and enabled-order list. Unknown persisted ids are
    /// ignored; catalog metrics missing from the persisted data keep their
    /// defaults, so a catalog that gains metrics between runs stays valid.
    pub fn load(catalog: Arc<MetricCatalog>, store: Arc<dyn KvStore>) -> Self {
        let mut entries: Vec<Entry> = catalog
            .definitions()
            .iter()
            .map(|d| Entry {
                id: d.id.clone(),
                enabled: d.default_enabled,
            })
            .collect();

        if let Some(bytes) = store.get(ENABLED_FLAGS_KEY) {
            match serde_json::from_slice::<HashMap<MetricId, bool>>(&bytes) {
                Ok(saved) => {
                    for entry in &mut entries {
                        if let Some(&enabled) = saved.get(&entry.id) {
                            entry.enabled = enabled;
                        }
                    }
                }
                Err(err) => warn!(error = %err, "ignoring malformed enabled-flag map"),
            }
        }

        if let Some(bytes) = store.get(ENABLED_ORDER_KEY) {
            match serde_json::from_slice::<Vec<MetricId>>(&bytes) {
                Ok(order) => {
                    let index: HashMap<&MetricId, usize> =
                        order.iter().enumerate().map(|(i, id)| (id, i)).collect();
                    let (mut enabled, disabled): (Vec<Entry>, Vec<Entry>) =
                        entries.into_iter().partition(|e| e.enabled);
                    // Stable sort: saved ids take their saved positions, ids
                    // not in the saved order go after, keeping their relative
                    // catalog order.
                    enabled.sort_by_key(|e| index.get(&e.id).copied().unwrap_or(usize::MAX));
                    entries = enabled.into_iter().chain(disabled).collect();
                }
                Err(err) => warn!(error = %err, "ignoring malformed enabled-order list"),
            }
        }

        let (enabled_tx, _) = watch::channel(Self::enabled_set_of(&entries));
        Self {
            catalog,
            entries,
            store,
            enabled_tx,
        }
    }

    /// Marks a metric enabled or disabled. Enabling appends to the end of
    /// the enabled ordering; disabling removes it from the ordering.
    pub fn set_enabled(&mut self, id: &MetricId, enabled: bool) {
        let Some(pos) = self.entries.iter().position(|e| &e.id == id) else {
            debug!(%id, "set_enabled for metric not in catalog");
            return;
        };
        if self.entries[pos].enabled == enabled {
            return;
        }
        let mut entry = self.entries.remove(pos);
        entry.enabled = enabled;
        if enabled {
            let end_of_enabled = self.enabled_len();
            self.entries.insert(end_of_enabled, entry);
        } else {
            self.entries.push(entry);
        }
        self.after_mutation();
    }

    pub fn toggle(&mut self, id: &MetricId) {
        let Some(entry) = self.entries.iter().find(|e| &e.id == id) else {
            debug!(%id, "toggle for metric not in catalog");
            return;
        };
        let target = !entry.enabled;
        self.set_enabled(id, target);
    }

    /// Moves the contiguous range `src` of currently-enabled entries to
    /// `dest`, where `dest` is an insertion offset in the pre-removal enabled
    /// ordering. Disabled entries are unaffected.
    pub fn move_enabled(&mut self, src: Range<usize>, dest: usize) {
        let n = self.enabled_len();
        if src.start >= src.end || src.end > n || dest > n {
            debug!(?src, dest, enabled = n, "move_enabled out of bounds");
            return;
        }
        if dest >= src.start && dest <= src.end {
            return;
        }

        let disabled = self.entries.split_off(n);
        let mut enabled = std::mem::take(&mut self.entries);

        let moved: Vec<Entry> = enabled.drain(src.clone()).collect();
        let insert_at = if dest > src.end {
            dest - moved.len()
        } else {
            dest
        };
        for (i, entry) in moved.into_iter().enumerate() {
            enabled.insert(insert_at + i, entry);
        }

        enabled.extend(disabled);
        self.entries = enabled;
        self.after_mutation();
    }

    /// Enabled metrics in current display order. Recomputed on demand; the
    /// backing list is bounded by the catalog size.
    pub fn enabled_metrics(&self) -> Vec<&MetricDefinition> {
        self.entries
            .iter()
            .filter(|e| e.enabled)
            .filter_map(|e| self.catalog.get(&e.id))
            .collect()
    }

    pub fn enabled_ids(&self) -> Vec<MetricId> {
        self.entries
            .iter()
            .filter(|e| e.enabled)
            .map(|e| e.id.clone())
            .collect()
    }

    pub fn is_enabled(&self, id: &MetricId) -> bool {
        self.entries.iter().any(|e| &e.id == id && e.enabled)
    }

    /// Receiver for enabled-set changes, deduplicated so an order-only change
    /// does not retrigger acquisition.
    pub fn subscribe(&self) -> watch::Receiver<BTreeSet<MetricId>> {
        self.enabled_tx.subscribe()
    }

    fn enabled_len(&self) -> usize {
        self.entries.iter().filter(|e| e.enabled).count()
    }

    fn enabled_set_of(entries: &[Entry]) -> BTreeSet<MetricId> {
        entries
            .iter()
            .filter(|e| e.enabled)
            .map(|e| e.id.clone())
            .collect()
    }

    fn after_mutation(&mut self) {
        self.persist();
        let set = Self::enabled_set_of(&self.entries);
        self.enabled_tx.send_if_modified(|current| {
            if *current == set {
                false
            } else {
                *current = set;
                true
            }
        });
    }

    /// Best-effort persistence: a failed write is logged and the in-memory
    /// state stays authoritative for the running session.
    fn persist(&self) {
        let flags: BTreeMap<&MetricId, bool> =
            self.entries.iter().map(|e| (&e.id, e.enabled)).collect();
        match serde_json::to_vec(&flags) {
            Ok(bytes) => {
                if let Err(err) = self.store.set(ENABLED_FLAGS_KEY, &bytes) {
                    warn!(error = %err, "failed to persist enabled flags");
                }
            }
            Err(err) => warn!(error = %err, "failed to encode enabled flags"),
        }

        let order: Vec<&MetricId> = self
            .entries
            .iter()
            .filter(|e| e.enabled)
            .map(|e| &e.id)
            .collect();
        match serde_json::to_vec(&order) {
            Ok(bytes) => {
                if let Err(err) = self.store.set(ENABLED_ORDER_KEY, &bytes) {
                    warn!(error = %err, "failed to persist enabled order");
                }
            }
            Err(err) => warn!(error = %err, "failed to encode enabled order"),
        }
    }
}

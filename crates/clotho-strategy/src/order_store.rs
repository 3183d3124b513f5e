//! Locally tracked orders.
//!
//! Three independent books map a price level to the exchange order id
//! resting there: the main ladder, the stop ladder (keyed by trigger price)
//! and position-closing orders. Entries are added only after a placement is
//! acknowledged and removed only after a cancel is acknowledged or
//! reconciliation finds the order gone.

use std::collections::HashSet;

use clotho_core::Price;
use dashmap::DashMap;
use rust_decimal::Decimal;

/// Which tracked book an entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackedKind {
    Main,
    Stop,
    Position,
}

impl TrackedKind {
    pub const ALL: [TrackedKind; 3] = [TrackedKind::Main, TrackedKind::Stop, TrackedKind::Position];

    /// Metric/log label.
    pub fn label(&self) -> &'static str {
        match self {
            TrackedKind::Main => "main",
            TrackedKind::Stop => "stop",
            TrackedKind::Position => "position",
        }
    }
}

/// True when two prices sit within half a step of each other.
pub fn is_near(a: Price, b: Price, step: Decimal) -> bool {
    a.distance(b) <= step / Decimal::TWO
}

/// Entry captured by [`OrderStore::snapshot`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedEntry {
    pub kind: TrackedKind,
    pub price: Price,
    pub order_id: String,
}

/// Outcome of a reconciliation prune.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub main: u64,
    pub stop: u64,
    pub position: u64,
}

impl PruneReport {
    pub fn total(&self) -> u64 {
        self.main + self.stop + self.position
    }

    fn bump(&mut self, kind: TrackedKind) {
        match kind {
            TrackedKind::Main => self.main += 1,
            TrackedKind::Stop => self.stop += 1,
            TrackedKind::Position => self.position += 1,
        }
    }

    pub fn count(&self, kind: TrackedKind) -> u64 {
        match kind {
            TrackedKind::Main => self.main,
            TrackedKind::Stop => self.stop,
            TrackedKind::Position => self.position,
        }
    }
}

/// Concurrent price-level → order-id books.
///
/// Every operation is atomic per entry; nothing is ordered across books.
#[derive(Debug, Default)]
pub struct OrderStore {
    main: DashMap<Price, String>,
    stop: DashMap<Price, String>,
    position: DashMap<Price, String>,
}

impl OrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn book(&self, kind: TrackedKind) -> &DashMap<Price, String> {
        match kind {
            TrackedKind::Main => &self.main,
            TrackedKind::Stop => &self.stop,
            TrackedKind::Position => &self.position,
        }
    }

    /// Tracks `order_id` at `price`, returning the id it replaced.
    pub fn insert(&self, kind: TrackedKind, price: Price, order_id: impl Into<String>) -> Option<String> {
        self.book(kind).insert(price, order_id.into())
    }

    pub fn remove(&self, kind: TrackedKind, price: Price) -> Option<String> {
        self.book(kind).remove(&price).map(|(_, id)| id)
    }

    /// Removes the entry only if it still maps to `order_id`.
    pub fn remove_if_id(&self, kind: TrackedKind, price: Price, order_id: &str) -> bool {
        self.book(kind)
            .remove_if(&price, |_, id| id == order_id)
            .is_some()
    }

    pub fn get(&self, kind: TrackedKind, price: Price) -> Option<String> {
        self.book(kind).get(&price).map(|id| id.value().clone())
    }

    pub fn min_price(&self, kind: TrackedKind) -> Option<Price> {
        self.book(kind).iter().map(|e| *e.key()).min()
    }

    pub fn max_price(&self, kind: TrackedKind) -> Option<Price> {
        self.book(kind).iter().map(|e| *e.key()).max()
    }

    /// Near-order check run before every placement.
    pub fn has_near(&self, kind: TrackedKind, price: Price, step: Decimal) -> bool {
        self.book(kind)
            .iter()
            .any(|e| is_near(*e.key(), price, step))
    }

    /// Entry whose key is closest to `price`; ties go to the lower key.
    pub fn nearest(&self, kind: TrackedKind, price: Price) -> Option<(Price, String)> {
        self.entries(kind)
            .into_iter()
            .min_by_key(|(key, _)| key.distance(price))
    }

    /// Entries sorted by price ascending.
    pub fn entries(&self, kind: TrackedKind) -> Vec<(Price, String)> {
        let mut entries: Vec<_> = self
            .book(kind)
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        entries.sort_by_key(|(price, _)| *price);
        entries
    }

    pub fn len(&self, kind: TrackedKind) -> usize {
        self.book(kind).len()
    }

    pub fn is_empty(&self, kind: TrackedKind) -> bool {
        self.book(kind).is_empty()
    }

    pub fn total_len(&self) -> usize {
        TrackedKind::ALL.iter().map(|k| self.len(*k)).sum()
    }

    /// Every tracked entry across the three books.
    pub fn snapshot(&self) -> Vec<TrackedEntry> {
        TrackedKind::ALL
            .iter()
            .flat_map(|kind| {
                self.entries(*kind)
                    .into_iter()
                    .map(move |(price, order_id)| TrackedEntry {
                        kind: *kind,
                        price,
                        order_id,
                    })
            })
            .collect()
    }

    /// Drops snapshot entries whose id is not in `live`.
    ///
    /// Entries added or replaced after the snapshot was taken are left alone,
    /// so a placement racing with the remote listing is never pruned.
    pub fn prune_missing(&self, snapshot: &[TrackedEntry], live: &HashSet<String>) -> PruneReport {
        let mut report = PruneReport::default();
        for entry in snapshot {
            if live.contains(&entry.order_id) {
                continue;
            }
            if self.remove_if_id(entry.kind, entry.price, &entry.order_id) {
                report.bump(entry.kind);
            }
        }
        report
    }

    pub fn clear(&self, kind: TrackedKind) {
        self.book(kind).clear();
    }

    pub fn clear_all(&self) {
        for kind in TrackedKind::ALL {
            self.clear(kind);
        }
    }
}

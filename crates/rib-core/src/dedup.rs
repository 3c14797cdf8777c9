//! Watermark-based dedup of fetched item sets.
//!
//! Listings do not come back in id order, so the new watermark is the maximum
//! decoded id of the whole set, and "new" means strictly above the previous
//! watermark. The watermark never decreases, so an id is surfaced at most once.

use crate::domain::{Item, Source};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reconciliation {
    /// Items above the previous watermark, in listing order.
    pub new_items: Vec<Item>,
    pub watermark: u64,
}

/// Compare a fetched set against `source`'s watermark.
///
/// The first reconciliation for a source only seeds the watermark: the
/// initial snapshot is history, not news.
pub fn reconcile(source: &Source, items: Vec<Item>) -> Reconciliation {
    let max_seen = items
        .iter()
        .map(|i| i.numeric_id)
        .max()
        .unwrap_or(source.high_water_mark);
    let watermark = source.high_water_mark.max(max_seen);

    if !source.is_seeded() {
        return Reconciliation {
            new_items: Vec::new(),
            watermark,
        };
    }

    let new_items = items
        .into_iter()
        .filter(|i| i.numeric_id > source.high_water_mark)
        .collect();

    Reconciliation {
        new_items,
        watermark,
    }
}

use anyhow::Result;
use image::RgbImage;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

use crate::item::ItemId;
use crate::raster;
use crate::store::ItemStore;

/// Per-item view kept by the scanner.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemClass {
    /// Listed but never inspected.
    Unseen,
    /// Original missing, empty, or not yet decodable.
    Pending,
    /// Original present and decodable.
    Ready,
    /// Derived artifact exists. Terminal.
    Done,
    /// Processing failed. Terminal; never retried.
    Skipped,
}

impl ItemClass {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Skipped)
    }
}

/// Result of inspecting one item.
#[derive(Debug)]
pub enum Inspection {
    Pending,
    Ready(RgbImage),
    Done,
    Skipped,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ScanCounts {
    pub unseen: usize,
    pub pending: usize,
    pub ready: usize,
    pub done: usize,
    pub skipped: usize,
}

/// Consumer-side view of the shared store.
///
/// The newest identifier in the store is never admitted: the capture stage
/// may still be writing into it. Admitted identifiers stay in the scan set
/// until they reach `Done` or `Skipped`, and terminal classes never change.
pub struct QueueScanner {
    items: BTreeMap<ItemId, ItemClass>,
    failures: HashMap<ItemId, u32>,
    decode_retry_limit: u32,
}

impl QueueScanner {
    pub fn new(decode_retry_limit: u32) -> Self {
        Self {
            items: BTreeMap::new(),
            failures: HashMap::new(),
            decode_retry_limit: decode_retry_limit.max(1),
        }
    }

    /// Admit identifiers that appeared since the last refresh. Returns how
    /// many were added.
    pub fn refresh(&mut self, store: &dyn ItemStore) -> Result<usize> {
        let mut ids = store.list_items()?;
        ids.pop();
        let mut added = 0;
        for id in ids {
            if !self.items.contains_key(&id) {
                log::debug!("scanner: admitted {}", id);
                self.items.insert(id, ItemClass::Unseen);
                added += 1;
            }
        }
        Ok(added)
    }

    /// Non-terminal identifiers, oldest first.
    pub fn candidates(&self) -> Vec<ItemId> {
        self.items
            .iter()
            .filter(|(_, class)| !class.is_terminal())
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn class_of(&self, id: &ItemId) -> Option<ItemClass> {
        self.items.get(id).copied()
    }

    /// Classify one admitted item against the store's current state.
    ///
    /// Store errors and undecodable originals count as failed attempts; after
    /// `decode_retry_limit` of them in a row the item is skipped.
    pub fn inspect(&mut self, store: &dyn ItemStore, id: &ItemId) -> Inspection {
        match self.class_of(id) {
            Some(ItemClass::Done) => return Inspection::Done,
            Some(ItemClass::Skipped) => return Inspection::Skipped,
            _ => {}
        }

        match observe(store, id) {
            Ok(Observed::Derived) => {
                self.failures.remove(id);
                self.set(id, ItemClass::Done);
                Inspection::Done
            }
            Ok(Observed::Absent) => {
                self.failures.remove(id);
                self.set(id, ItemClass::Pending);
                Inspection::Pending
            }
            Ok(Observed::Frame(frame)) => {
                self.failures.remove(id);
                self.set(id, ItemClass::Ready);
                Inspection::Ready(frame)
            }
            Err(e) => self.record_failure(id, e),
        }
    }

    fn record_failure(&mut self, id: &ItemId, err: anyhow::Error) -> Inspection {
        let failures = self.failures.entry(id.clone()).or_insert(0);
        *failures += 1;
        if *failures >= self.decode_retry_limit {
            log::warn!(
                "item {} still unreadable after {} attempts, skipping: {:#}",
                id,
                failures,
                err
            );
            self.mark_skipped(id);
            Inspection::Skipped
        } else {
            log::debug!("item {} not readable yet: {:#}", id, err);
            self.set(id, ItemClass::Pending);
            Inspection::Pending
        }
    }

    pub fn mark_done(&mut self, id: &ItemId) {
        self.set(id, ItemClass::Done);
    }

    pub fn mark_skipped(&mut self, id: &ItemId) {
        self.failures.remove(id);
        self.set(id, ItemClass::Skipped);
    }

    pub fn counts(&self) -> ScanCounts {
        let mut counts = ScanCounts::default();
        for class in self.items.values() {
            match class {
                ItemClass::Unseen => counts.unseen += 1,
                ItemClass::Pending => counts.pending += 1,
                ItemClass::Ready => counts.ready += 1,
                ItemClass::Done => counts.done += 1,
                ItemClass::Skipped => counts.skipped += 1,
            }
        }
        counts
    }

    fn set(&mut self, id: &ItemId, class: ItemClass) {
        let entry = self.items.entry(id.clone()).or_insert(ItemClass::Unseen);
        if entry.is_terminal() {
            return;
        }
        *entry = class;
    }
}

enum Observed {
    Derived,
    /// Original missing or still empty.
    Absent,
    Frame(RgbImage),
}

fn observe(store: &dyn ItemStore, id: &ItemId) -> Result<Observed> {
    if store.derived_len(id)?.is_some() {
        return Ok(Observed::Derived);
    }
    match store.original_len(id)? {
        None | Some(0) => return Ok(Observed::Absent),
        Some(_) => {}
    }
    let bytes = store.read_original(id)?;
    Ok(Observed::Frame(raster::decode(&bytes)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use image::Rgb;

    fn id(n: u32) -> ItemId {
        ItemId::parse(&format!("2026-01-01_00-00-{:02}.000000", n)).unwrap()
    }

    fn jpeg() -> Vec<u8> {
        raster::encode_jpeg(&RgbImage::from_pixel(8, 8, Rgb([200, 200, 200])), 90).unwrap()
    }

    fn committed(store: &InMemoryStore, n: u32) -> ItemId {
        let item = id(n);
        store.create_item(&item).unwrap();
        store.write_original(&item, &jpeg()).unwrap();
        item
    }

    #[test]
    fn newest_item_is_never_admitted() {
        let store = InMemoryStore::new();
        let a = committed(&store, 1);
        let b = committed(&store, 2);

        let mut scanner = QueueScanner::new(3);
        assert_eq!(scanner.refresh(&store).unwrap(), 1);
        assert_eq!(scanner.candidates(), vec![a]);
        assert_eq!(scanner.class_of(&b), None);

        // Once something newer exists, b becomes eligible.
        committed(&store, 3);
        assert_eq!(scanner.refresh(&store).unwrap(), 1);
        assert_eq!(scanner.class_of(&b), Some(ItemClass::Unseen));
    }

    #[test]
    fn empty_original_stays_pending_until_written() {
        let store = InMemoryStore::new();
        let a = id(1);
        store.create_item(&a).unwrap();
        committed(&store, 2);

        let mut scanner = QueueScanner::new(3);
        scanner.refresh(&store).unwrap();
        assert!(matches!(scanner.inspect(&store, &a), Inspection::Pending));

        store.set_original_in_progress(&a, &[]).unwrap();
        for _ in 0..10 {
            assert!(matches!(scanner.inspect(&store, &a), Inspection::Pending));
        }
        assert_eq!(scanner.class_of(&a), Some(ItemClass::Pending));

        store.set_original_in_progress(&a, &jpeg()).unwrap();
        assert!(matches!(scanner.inspect(&store, &a), Inspection::Ready(_)));
    }

    #[test]
    fn undecodable_original_is_skipped_after_retry_limit() {
        let store = InMemoryStore::new();
        let a = id(1);
        store.create_item(&a).unwrap();
        store.write_original(&a, b"half a jpeg").unwrap();
        committed(&store, 2);

        let mut scanner = QueueScanner::new(2);
        scanner.refresh(&store).unwrap();
        assert!(matches!(scanner.inspect(&store, &a), Inspection::Pending));
        assert!(matches!(scanner.inspect(&store, &a), Inspection::Skipped));
        assert!(scanner.candidates().is_empty());
    }

    #[test]
    fn terminal_classes_are_never_revisited() {
        let store = InMemoryStore::new();
        let a = committed(&store, 1);
        let b = committed(&store, 2);
        committed(&store, 3);

        let mut scanner = QueueScanner::new(3);
        scanner.refresh(&store).unwrap();
        scanner.mark_skipped(&a);
        store.write_derived(&b, b"masked").unwrap();
        assert!(matches!(scanner.inspect(&store, &b), Inspection::Done));

        for _ in 0..3 {
            scanner.refresh(&store).unwrap();
            assert!(scanner.candidates().is_empty());
            assert!(matches!(scanner.inspect(&store, &a), Inspection::Skipped));
            assert!(matches!(scanner.inspect(&store, &b), Inspection::Done));
        }
        // Marking a terminal item again does not change its class.
        scanner.mark_done(&a);
        assert_eq!(scanner.class_of(&a), Some(ItemClass::Skipped));
        assert_eq!(
            scanner.counts(),
            ScanCounts {
                done: 1,
                skipped: 1,
                ..ScanCounts::default()
            }
        );
    }
}

use anyhow::Result;
use serde::Serialize;

use crate::item::ItemId;
use crate::store::ItemStore;

/// Snapshot of the shared store, by observable Item state.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StoreStatus {
    pub items: usize,
    /// Created, nothing written yet (or a capture in progress).
    pub empty: usize,
    /// Waiting for compression.
    pub original_only: usize,
    /// Masked, original not yet reclaimed.
    pub both: usize,
    /// Fully processed.
    pub derived_only: usize,
    pub total_bytes: u64,
    pub newest: Option<ItemId>,
}

impl StoreStatus {
    pub fn collect(store: &dyn ItemStore) -> Result<Self> {
        let ids = store.list_items()?;
        let mut status = StoreStatus {
            items: ids.len(),
            total_bytes: store.total_bytes()?,
            newest: ids.last().cloned(),
            ..StoreStatus::default()
        };
        for id in &ids {
            let original = store.original_len(id)?.is_some();
            let derived = store.derived_len(id)?.is_some();
            match (original, derived) {
                (false, false) => status.empty += 1,
                (true, false) => status.original_only += 1,
                (true, true) => status.both += 1,
                (false, true) => status.derived_only += 1,
            }
        }
        Ok(status)
    }

    pub fn summary(&self) -> String {
        format!(
            "{} items ({} pending, {} masked, {} empty), {} bytes",
            self.items,
            self.original_only,
            self.derived_only + self.both,
            self.empty,
            self.total_bytes
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    fn id(n: u32) -> ItemId {
        ItemId::parse(&format!("2026-03-01_12-00-{:02}.000000", n)).unwrap()
    }

    #[test]
    fn counts_items_by_state() {
        let store = InMemoryStore::new();
        store.create_item(&id(1)).unwrap();
        store.write_original(&id(1), b"orig").unwrap();
        store.write_derived(&id(1), b"mask").unwrap();
        store.remove_original(&id(1)).unwrap();

        store.create_item(&id(2)).unwrap();
        store.write_original(&id(2), b"orig").unwrap();
        store.write_derived(&id(2), b"mask").unwrap();

        store.create_item(&id(3)).unwrap();
        store.write_original(&id(3), b"original").unwrap();

        store.create_item(&id(4)).unwrap();

        let status = StoreStatus::collect(&store).unwrap();
        assert_eq!(
            status,
            StoreStatus {
                items: 4,
                empty: 1,
                original_only: 1,
                both: 1,
                derived_only: 1,
                total_bytes: 4 + 4 + 4 + 8,
                newest: Some(id(4)),
            }
        );

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["newest"], "2026-03-01_12-00-04.000000");
        assert_eq!(json["derived_only"], 1);
    }
}

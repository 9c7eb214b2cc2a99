//! Item identity and layout inside the shared store.
//!
//! One Item is one directory named by a UTC timestamp with microsecond
//! resolution. The format is fixed width, so string order is capture order.

use anyhow::{anyhow, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use std::fmt;

/// File name of the captured frame inside an Item directory.
pub const ORIGINAL_FILE: &str = "frame.jpg";

/// File name of the masked frame written by the compression stage.
pub const DERIVED_FILE: &str = "masked.jpg";

const ID_FORMAT: &str = "%Y-%m-%d_%H-%M-%S%.6f";

/// Timestamp-derived Item identifier.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    /// Parse a store entry name. Anything that is not a well-formed,
    /// fixed-width identifier is rejected.
    pub fn parse(name: &str) -> Result<Self> {
        let parsed = NaiveDateTime::parse_from_str(name, ID_FORMAT)
            .map_err(|e| anyhow!("'{}' is not an item id: {}", name, e))?;
        if parsed.format(ID_FORMAT).to_string() != name {
            return Err(anyhow!("'{}' is not a canonical item id", name));
        }
        Ok(Self(name.to_string()))
    }

    fn from_micros(micros: i64) -> Result<Self> {
        let at = DateTime::<Utc>::from_timestamp_micros(micros)
            .ok_or_else(|| anyhow!("timestamp {}us out of range", micros))?;
        Ok(Self(at.naive_utc().format(ID_FORMAT).to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Issues strictly increasing identifiers for one capture stage.
///
/// Two captures inside the same microsecond (or a clock step backwards)
/// would otherwise collide; the generator bumps by one microsecond instead.
#[derive(Debug, Default)]
pub struct ItemIdGenerator {
    last_micros: Option<i64>,
}

impl ItemIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&mut self) -> Result<ItemId> {
        self.next_at(Utc::now())
    }

    pub fn next_at(&mut self, now: DateTime<Utc>) -> Result<ItemId> {
        let mut micros = now.timestamp_micros();
        if let Some(last) = self.last_micros {
            if micros <= last {
                micros = last + 1;
            }
        }
        let id = ItemId::from_micros(micros)?;
        self.last_micros = Some(micros);
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn ids_are_fixed_width_and_parse_back() {
        let mut ids = ItemIdGenerator::new();
        let at = Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap();
        let id = ids.next_at(at).unwrap();
        assert_eq!(id.as_str(), "2026-03-04_05-06-07.000000");
        assert_eq!(ItemId::parse(id.as_str()).unwrap(), id);
    }

    #[test]
    fn same_instant_bumps_by_one_microsecond() {
        let mut ids = ItemIdGenerator::new();
        let at = Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap();
        let a = ids.next_at(at).unwrap();
        let b = ids.next_at(at).unwrap();
        assert_eq!(b.as_str(), "2026-03-04_05-06-07.000001");
        assert!(a < b);

        // A clock stepping backwards still yields increasing ids.
        let earlier = Utc.with_ymd_and_hms(2026, 3, 4, 5, 0, 0).unwrap();
        let c = ids.next_at(earlier).unwrap();
        assert!(b < c);
    }

    #[test]
    fn rejects_foreign_entries() {
        assert!(ItemId::parse("lost+found").is_err());
        assert!(ItemId::parse("2026-03-04_05-06-07").is_err());
        assert!(ItemId::parse("2026-03-04_05-06-07.1").is_err());
    }
}

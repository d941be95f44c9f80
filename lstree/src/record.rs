//! Geo-tagged records stored in the index.

use std::fmt;

use crate::disk_tree::tree_constants::{ID_FIELD_SIZE, TIMESTAMP_FIELD_SIZE};

/// Scalar sort key produced by the Hilbert mapping
pub type HilbertKey = u64;

/// A geo-tagged record ordered by its Hilbert key.
///
/// Records are immutable once built. The identifier and timestamp are bounded
/// strings: anything longer than the fixed on-page field is truncated at a
/// character boundary so the record always fits its slot.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    id: String,
    lon: f32,
    lat: f32,
    timestamp: String,
    hilbert: HilbertKey,
    disabled: bool,
}

impl Record {
    pub fn new(id: &str, lon: f32, lat: f32, timestamp: &str, hilbert: HilbertKey) -> Self {
        Self {
            id: bounded(id, ID_FIELD_SIZE - 1),
            lon,
            lat,
            timestamp: bounded(timestamp, TIMESTAMP_FIELD_SIZE - 1),
            hilbert,
            disabled: false,
        }
    }

    /// Returns a copy of this record carrying the given tombstone flag.
    pub fn with_disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn lon(&self) -> f32 {
        self.lon
    }

    pub fn lat(&self) -> f32 {
        self.lat
    }

    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    pub fn hilbert(&self) -> HilbertKey {
        self.hilbert
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// True if both records carry the same key and identifier.
    pub fn same_entry(&self, other: &Record) -> bool {
        self.hilbert == other.hilbert && self.id == other.id
    }

    pub(crate) fn entry_key(&self) -> (HilbertKey, String) {
        (self.hilbert, self.id.clone())
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}, {}) @ {} [h={}]",
            self.id, self.lat, self.lon, self.timestamp, self.hilbert
        )
    }
}

fn bounded(value: &str, max_bytes: usize) -> String {
    if value.len() <= max_bytes {
        return value.to_string();
    }
    let mut end = max_bytes;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    value[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_accessors() {
        let r = Record::new("u1", -73.9, 40.7, "2008-10-23 02:53:04", 42);
        assert_eq!(r.id(), "u1");
        assert_eq!(r.hilbert(), 42);
        assert_eq!(r.timestamp(), "2008-10-23 02:53:04");
        assert!(!r.is_disabled());
        assert!(r.clone().with_disabled(true).is_disabled());
    }

    #[test]
    fn test_long_fields_are_truncated() {
        let long_id = "x".repeat(40);
        let r = Record::new(&long_id, 0.0, 0.0, &"t".repeat(60), 1);
        assert_eq!(r.id().len(), ID_FIELD_SIZE - 1);
        assert_eq!(r.timestamp().len(), TIMESTAMP_FIELD_SIZE - 1);
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        let id = "é".repeat(20); // 40 bytes
        let r = Record::new(&id, 0.0, 0.0, "", 1);
        assert!(r.id().len() <= ID_FIELD_SIZE - 1);
        assert!(r.id().chars().all(|c| c == 'é'));
    }

    #[test]
    fn test_same_entry() {
        let a = Record::new("a", 1.0, 2.0, "t1", 7);
        let b = Record::new("a", 3.0, 4.0, "t2", 7);
        let c = Record::new("c", 1.0, 2.0, "t1", 7);
        assert!(a.same_entry(&b));
        assert!(!a.same_entry(&c));
    }
}

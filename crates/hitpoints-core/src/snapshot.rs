//! Point-in-time counter copies and the archive unit handed to storage.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::key::HitKey;

/// File/object name every archive record is stored under.
pub const ARCHIVE_FILE_NAME: &str = "hits.json";

/// Immutable mapping `HitKey -> count` captured at one instant.
///
/// Serializes as a plain JSON object (`{"<key>": <count>, ...}`) with keys in
/// sorted order, so archives and checkpoints are byte-stable for equal input.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CounterSnapshot {
    hits: BTreeMap<HitKey, u64>,
}

impl CounterSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn get(&self, key: &str) -> Option<u64> {
        self.hits.get(key).copied()
    }

    /// Sum of all counts.
    pub fn total(&self) -> u64 {
        self.hits.values().fold(0u64, |acc, v| acc.saturating_add(*v))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&HitKey, u64)> {
        self.hits.iter().map(|(k, v)| (k, *v))
    }

    pub fn into_inner(self) -> BTreeMap<HitKey, u64> {
        self.hits
    }
}

impl FromIterator<(HitKey, u64)> for CounterSnapshot {
    /// Zero counts are dropped; repeated keys are summed.
    fn from_iter<I: IntoIterator<Item = (HitKey, u64)>>(iter: I) -> Self {
        let mut hits = BTreeMap::new();
        for (k, v) in iter {
            if v == 0 {
                continue;
            }
            let slot: &mut u64 = hits.entry(k).or_insert(0);
            *slot = slot.saturating_add(v);
        }
        Self { hits }
    }
}

impl IntoIterator for CounterSnapshot {
    type Item = (HitKey, u64);
    type IntoIter = std::collections::btree_map::IntoIter<HitKey, u64>;

    fn into_iter(self) -> Self::IntoIter {
        self.hits.into_iter()
    }
}

/// Unit handed to a storage adapter.
///
/// Wire shape: `{"timestamp": "<RFC3339 UTC>", "hits": {"<key>": <count>}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveRecord {
    pub timestamp: DateTime<Utc>,
    pub hits: CounterSnapshot,
}

impl ArchiveRecord {
    /// Stamp `hits` with the current UTC time.
    pub fn new(hits: CounterSnapshot) -> Self {
        Self::at(Utc::now(), hits)
    }

    pub fn at(timestamp: DateTime<Utc>, hits: CounterSnapshot) -> Self {
        Self { timestamp, hits }
    }

    /// `YYYY/MM/DD/HH/MM/SS` of the timestamp, zero padded.
    pub fn partition_path(&self) -> String {
        self.timestamp.format("%Y/%m/%d/%H/%M/%S").to_string()
    }

    /// `<partition_path>/hits.json`, the object key used by blob-like stores.
    pub fn object_key(&self) -> String {
        format!("{}/{}", self.partition_path(), ARCHIVE_FILE_NAME)
    }

    pub fn to_json_vec(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use chrono::TimeZone;

    use super::*;

    fn snap(pairs: &[(&str, u64)]) -> CounterSnapshot {
        pairs.iter().map(|(k, v)| (HitKey::from(*k), *v)).collect()
    }

    #[test]
    fn from_iter_sums_duplicates_and_skips_zero() {
        let s = snap(&[("A", 2), ("B", 0), ("A", 1)]);
        assert_eq!(s.get("A"), Some(3));
        assert_eq!(s.get("B"), None);
        assert_eq!(s.len(), 1);
        assert_eq!(s.total(), 3);
    }

    #[test]
    fn record_serializes_to_wire_shape() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 7, 9, 5, 2).unwrap();
        let rec = ArchiveRecord::at(ts, snap(&[("B", 1), ("A", 3)]));
        let json = String::from_utf8(rec.to_json_vec().unwrap()).unwrap();
        assert_eq!(json, r#"{"timestamp":"2024-03-07T09:05:02Z","hits":{"A":3,"B":1}}"#);
    }

    #[test]
    fn partition_path_is_zero_padded_utc() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 7, 9, 5, 2).unwrap();
        let rec = ArchiveRecord::at(ts, CounterSnapshot::new());
        assert_eq!(rec.partition_path(), "2024/03/07/09/05/02");
        assert_eq!(rec.object_key(), "2024/03/07/09/05/02/hits.json");
    }

    #[test]
    fn record_parses_back() {
        let raw = r#"{"timestamp":"2024-03-07T09:05:02.250Z","hits":{"https://ex.com/a":4}}"#;
        let rec: ArchiveRecord = serde_json::from_str(raw).unwrap();
        assert_eq!(rec.hits.get("https://ex.com/a"), Some(4));
        assert_eq!(rec.partition_path(), "2024/03/07/09/05/02");
    }
}

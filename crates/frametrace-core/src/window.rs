use crate::types::Bucket;
use std::collections::BTreeMap;

/// Events from different buckets that share one timestamp.
///
/// Each bucket has one payload slot. Setting an occupied slot replaces
/// the previous payload and leaves a note on the record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeRecord {
    timestamp: u64,
    note: String,
    slots: [Option<String>; Bucket::COUNT],
}

impl MergeRecord {
    pub fn new(timestamp: u64) -> Self {
        Self {
            timestamp,
            note: String::new(),
            slots: Default::default(),
        }
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn note(&self) -> &str {
        &self.note
    }

    pub fn get(&self, bucket: Bucket) -> Option<&str> {
        self.slots[bucket.index()].as_deref()
    }

    /// Store a payload and return the payload it replaced, if any.
    pub fn set(&mut self, bucket: Bucket, payload: String) -> Option<String> {
        let previous = self.slots[bucket.index()].replace(payload);
        if previous.is_some() {
            if !self.note.is_empty() {
                self.note.push(' ');
            }
            self.note.push_str("overwrote:");
            self.note.push_str(bucket.name());
        }
        previous
    }

    /// The slot contents in report column order, empty slots as `""`.
    pub fn columns(&self) -> impl Iterator<Item = &str> + '_ {
        self.slots.iter().map(|slot| slot.as_deref().unwrap_or(""))
    }
}

/// All records whose timestamps fall into `[start, start + window size)`,
/// keyed by their offset from `start`.
#[derive(Debug, Clone, Default)]
pub struct Window {
    start: u64,
    records: BTreeMap<u64, MergeRecord>,
}

impl Window {
    pub fn new(start: u64) -> Self {
        Self {
            start,
            records: BTreeMap::new(),
        }
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }

    /// Put a payload into the record at `start + offset`, creating the
    /// record if needed. Returns the replaced payload, if any.
    pub fn upsert(&mut self, offset: u64, bucket: Bucket, payload: String) -> Option<String> {
        let timestamp = self.start + offset;
        self.records
            .entry(offset)
            .or_insert_with(|| MergeRecord::new(timestamp))
            .set(bucket, payload)
    }

    /// Records ordered by offset.
    pub fn records(&self) -> impl Iterator<Item = (u64, &MergeRecord)> + '_ {
        self.records.iter().map(|(&offset, record)| (offset, record))
    }

    pub fn into_records(self) -> Vec<(u64, MergeRecord)> {
        self.records.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_new_is_empty() {
        let record = MergeRecord::new(120);
        assert_eq!(record.timestamp(), 120);
        assert_eq!(record.note(), "");
        assert!(record.columns().all(str::is_empty));
    }

    #[test]
    fn test_record_set_distinct_buckets() {
        let mut record = MergeRecord::new(100);
        assert!(record.set(Bucket::Consumer, "I->X".into()).is_none());
        assert!(record.set(Bucket::Producer, "P:X".into()).is_none());

        let columns: Vec<_> = record.columns().collect();
        assert_eq!(columns, ["I->X", "", "", "", "P:X"]);
        assert_eq!(record.note(), "");
    }

    #[test]
    fn test_record_last_write_wins() {
        let mut record = MergeRecord::new(100);
        record.set(Bucket::Buffer, "push A".into());
        let previous = record.set(Bucket::Buffer, "pop B".into());

        assert_eq!(previous.as_deref(), Some("push A"));
        assert_eq!(record.get(Bucket::Buffer), Some("pop B"));
        assert_eq!(record.note(), "overwrote:buffer");
    }

    #[test]
    fn test_window_upsert_orders_by_offset() {
        let mut window = Window::new(100);
        window.upsert(4, Bucket::Buffer, "pop Y".into());
        window.upsert(0, Bucket::Consumer, "I->X".into());
        window.upsert(1, Bucket::Producer, "P:X".into());

        let timestamps: Vec<_> = window
            .records()
            .map(|(offset, record)| (offset, record.timestamp()))
            .collect();
        assert_eq!(timestamps, [(0, 100), (1, 101), (4, 104)]);
        assert_eq!(window.len(), 3);
        assert_eq!(window.start(), 100);
    }

    #[test]
    fn test_window_upsert_merges_same_offset() {
        let mut window = Window::new(40);
        window.upsert(7, Bucket::Consumer, "I->X".into());
        window.upsert(7, Bucket::ProducerDaemon, "->X".into());

        assert_eq!(window.len(), 1);
        let (offset, record) = window.records().next().unwrap();
        assert_eq!(offset, 7);
        assert_eq!(record.get(Bucket::Consumer), Some("I->X"));
        assert_eq!(record.get(Bucket::ProducerDaemon), Some("->X"));
    }
}

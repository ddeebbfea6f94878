#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use nibandh_contracts::conflict::ConflictKey;
use nibandh_contracts::record::{
    ConflictProbe, DistrictCode, IndexRecord, MasterRecord, RawCapture, RecordId, SroCode,
};
use nibandh_contracts::{ContractViolation, UtcTimeMs};

#[derive(Debug, Clone, PartialEq)]
pub enum StorageError {
    NotFound {
        collection: &'static str,
        id: RecordId,
    },
    ContractViolation(ContractViolation),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound { collection, id } => {
                write!(f, "record {} not found in {collection}", id.0)
            }
            Self::ContractViolation(v) => write!(f, "contract violation: {v}"),
        }
    }
}

impl std::error::Error for StorageError {}

impl From<ContractViolation> for StorageError {
    fn from(value: ContractViolation) -> Self {
        Self::ContractViolation(value)
    }
}

/// Exact-match filter over the Master collection, AND-combined.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MasterFilter {
    pub district: Option<DistrictCode>,
    pub sro: Option<SroCode>,
    pub synced: Option<bool>,
}

impl MasterFilter {
    fn matches(&self, record: &MasterRecord) -> bool {
        self.district
            .as_ref()
            .map(|d| record.district == *d)
            .unwrap_or(true)
            && self.sro.as_ref().map(|s| record.sro == *s).unwrap_or(true)
            && self.synced.map(|s| record.synced == s).unwrap_or(true)
    }
}

/// Exact-match filter over the Index collection, AND-combined. The
/// conflict-key clause is served by the secondary index, not a scan.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexFilter {
    pub conflict_key: Option<ConflictKey>,
    pub synced: Option<bool>,
}

impl IndexFilter {
    fn matches(&self, record: &IndexRecord) -> bool {
        self.conflict_key
            .as_ref()
            .map(|k| ConflictKey::of_index_record(record) == *k)
            .unwrap_or(true)
            && self.synced.map(|s| record.synced == s).unwrap_or(true)
    }
}

/// The four-collection local record store. Each collection assigns
/// monotonically increasing ids; listing follows insertion order (ids are
/// assigned in insertion order, and the row maps iterate by id).
#[derive(Debug, Default)]
pub struct RecordStore {
    raw_rows: BTreeMap<u64, RawCapture>,
    master_rows: BTreeMap<u64, MasterRecord>,
    index_rows: BTreeMap<u64, IndexRecord>,
    probe_rows: BTreeMap<u64, ConflictProbe>,
    conflict_index: BTreeMap<ConflictKey, Vec<RecordId>>,
    next_raw_id: u64,
    next_master_id: u64,
    next_index_id: u64,
    next_probe_id: u64,
}

impl RecordStore {
    pub fn new_in_memory() -> Self {
        Self::default()
    }

    // ---- Raw (plaintext staging) ----

    pub fn add_raw(&mut self, record: RawCapture) -> Result<RecordId, StorageError> {
        self.next_raw_id += 1;
        let id = RecordId(self.next_raw_id);
        self.raw_rows.insert(id.0, record);
        Ok(id)
    }

    pub fn raw_rows(&self) -> impl Iterator<Item = (RecordId, &RawCapture)> {
        self.raw_rows.iter().map(|(id, r)| (RecordId(*id), r))
    }

    pub fn raw_count(&self) -> usize {
        self.raw_rows.len()
    }

    pub fn clear_raw(&mut self) -> Result<(), StorageError> {
        self.raw_rows.clear();
        Ok(())
    }

    // ---- Master (encrypted archive rows) ----

    pub fn add_master(&mut self, record: MasterRecord) -> Result<RecordId, StorageError> {
        self.next_master_id += 1;
        let id = RecordId(self.next_master_id);
        self.master_rows.insert(id.0, record);
        Ok(id)
    }

    pub fn master_rows(&self) -> impl Iterator<Item = (RecordId, &MasterRecord)> {
        self.master_rows.iter().map(|(id, r)| (RecordId(*id), r))
    }

    pub fn master_rows_filtered(
        &self,
        filter: &MasterFilter,
    ) -> Vec<(RecordId, &MasterRecord)> {
        self.master_rows()
            .filter(|(_, r)| filter.matches(r))
            .collect()
    }

    pub fn master_row(&self, id: RecordId) -> Option<&MasterRecord> {
        self.master_rows.get(&id.0)
    }

    pub fn mark_master_synced(
        &mut self,
        id: RecordId,
        now: UtcTimeMs,
    ) -> Result<(), StorageError> {
        let record = self.master_rows.get_mut(&id.0).ok_or(StorageError::NotFound {
            collection: "master",
            id,
        })?;
        record.synced = true;
        record.synced_at = Some(now);
        Ok(())
    }

    pub fn clear_master(&mut self) -> Result<(), StorageError> {
        self.master_rows.clear();
        Ok(())
    }

    // ---- Index (conflict projection) ----

    pub fn add_index(&mut self, record: IndexRecord) -> Result<RecordId, StorageError> {
        self.next_index_id += 1;
        let id = RecordId(self.next_index_id);
        let key = ConflictKey::of_index_record(&record);
        self.index_rows.insert(id.0, record);
        self.conflict_index.entry(key).or_default().push(id);
        Ok(id)
    }

    pub fn index_rows(&self) -> impl Iterator<Item = (RecordId, &IndexRecord)> {
        self.index_rows.iter().map(|(id, r)| (RecordId(*id), r))
    }

    pub fn index_rows_filtered(&self, filter: &IndexFilter) -> Vec<(RecordId, &IndexRecord)> {
        match &filter.conflict_key {
            // Conflict-key lookups go through the secondary index; this
            // path sits on the user-facing rejection flow.
            Some(key) => self
                .index_rows_for_key(key)
                .into_iter()
                .filter(|(_, r)| filter.synced.map(|s| r.synced == s).unwrap_or(true))
                .collect(),
            None => self
                .index_rows()
                .filter(|(_, r)| filter.matches(r))
                .collect(),
        }
    }

    /// Records in one conflict-key equivalence class, in insertion order.
    pub fn index_rows_for_key(&self, key: &ConflictKey) -> Vec<(RecordId, &IndexRecord)> {
        let Some(ids) = self.conflict_index.get(key) else {
            return Vec::new();
        };
        ids.iter()
            .filter_map(|id| self.index_rows.get(&id.0).map(|r| (*id, r)))
            .collect()
    }

    pub fn mark_index_synced(
        &mut self,
        id: RecordId,
        now: UtcTimeMs,
    ) -> Result<(), StorageError> {
        let record = self.index_rows.get_mut(&id.0).ok_or(StorageError::NotFound {
            collection: "index",
            id,
        })?;
        record.synced = true;
        record.synced_at = Some(now);
        Ok(())
    }

    pub fn clear_index(&mut self) -> Result<(), StorageError> {
        self.index_rows.clear();
        self.conflict_index.clear();
        Ok(())
    }

    // ---- Probe (conflict-check audit trail) ----

    pub fn add_probe(&mut self, record: ConflictProbe) -> Result<RecordId, StorageError> {
        self.next_probe_id += 1;
        let id = RecordId(self.next_probe_id);
        self.probe_rows.insert(id.0, record);
        Ok(id)
    }

    pub fn probe_rows(&self) -> impl Iterator<Item = (RecordId, &ConflictProbe)> {
        self.probe_rows.iter().map(|(id, r)| (RecordId(*id), r))
    }

    pub fn clear_probes(&mut self) -> Result<(), StorageError> {
        self.probe_rows.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nibandh_contracts::record::{
        BookNo, CapturedRecord, CipherText, DeedNo, OperatorId, PageRange, RequestTag, SessionId,
        VolumeNo, VolumeYear,
    };

    fn capture(book: &str, start: u32, end: u32) -> CapturedRecord {
        CapturedRecord::v1(
            DistrictCode::new("D1").unwrap(),
            SroCode::new("S1").unwrap(),
            OperatorId::new("op_7").unwrap(),
            VolumeYear::new("2024").unwrap(),
            VolumeNo::new("7").unwrap(),
            BookNo::new(book).unwrap(),
            Some(DeedNo::new("deed_42").unwrap()),
            PageRange::new(start, end).unwrap(),
            UtcTimeMs(1_000),
            RequestTag::Save,
            "https://portal.example/volume/7",
        )
        .unwrap()
    }

    fn index_record(book: &str, start: u32, end: u32) -> IndexRecord {
        IndexRecord::from_capture(&capture(book, start, end), RecordId(1), UtcTimeMs(1_000))
    }

    fn master_record() -> MasterRecord {
        MasterRecord::from_capture(
            &capture("1", 10, 20),
            SessionId::new("sess_1").unwrap(),
            CipherText("AAAA".to_string()),
            UtcTimeMs(1_000),
        )
    }

    #[test]
    fn at_store_01_ids_are_monotonic_per_collection() {
        let mut store = RecordStore::new_in_memory();
        let a = store.add_index(index_record("1", 1, 2)).unwrap();
        let b = store.add_index(index_record("1", 3, 4)).unwrap();
        assert!(b.0 > a.0);
        // Independent counter per collection.
        let m = store.add_master(master_record()).unwrap();
        assert_eq!(m.0, 1);
    }

    #[test]
    fn at_store_02_listing_follows_insertion_order() {
        let mut store = RecordStore::new_in_memory();
        for start in [30, 10, 20] {
            store.add_index(index_record("1", start, start + 5)).unwrap();
        }
        let starts: Vec<u32> = store
            .index_rows()
            .map(|(_, r)| r.page_range.start_page)
            .collect();
        assert_eq!(starts, vec![30, 10, 20]);
    }

    #[test]
    fn at_store_03_conflict_key_lookup_scopes_to_class() {
        let mut store = RecordStore::new_in_memory();
        store.add_index(index_record("1", 10, 20)).unwrap();
        store.add_index(index_record("2", 10, 20)).unwrap();
        let key = ConflictKey::of_capture(&capture("1", 1, 1));
        let hits = store.index_rows_for_key(&key);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].1.book_no.as_str(), "1");
    }

    #[test]
    fn at_store_04_mark_synced_requires_existing_row() {
        let mut store = RecordStore::new_in_memory();
        let id = store.add_master(master_record()).unwrap();
        store.mark_master_synced(id, UtcTimeMs(2_000)).unwrap();
        let row = store.master_row(id).unwrap();
        assert!(row.synced);
        assert_eq!(row.synced_at, Some(UtcTimeMs(2_000)));

        let missing = store.mark_index_synced(RecordId(99), UtcTimeMs(2_000));
        assert!(matches!(missing, Err(StorageError::NotFound { .. })));
    }

    #[test]
    fn at_store_05_filters_and_combine() {
        let mut store = RecordStore::new_in_memory();
        let a = store.add_index(index_record("1", 1, 2)).unwrap();
        store.add_index(index_record("1", 3, 4)).unwrap();
        store.mark_index_synced(a, UtcTimeMs(5)).unwrap();

        let pending = store.index_rows_filtered(&IndexFilter {
            synced: Some(false),
            ..IndexFilter::default()
        });
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].1.page_range.start_page, 3);

        let keyed_pending = store.index_rows_filtered(&IndexFilter {
            conflict_key: Some(ConflictKey::of_capture(&capture("1", 1, 1))),
            synced: Some(true),
        });
        assert_eq!(keyed_pending.len(), 1);
        assert_eq!(keyed_pending[0].0, a);
    }

    #[test]
    fn at_store_06_clear_raw_empties_staging_only() {
        let mut store = RecordStore::new_in_memory();
        store
            .add_raw(RawCapture {
                session_id: SessionId::new("sess_raw").unwrap(),
                record: capture("1", 10, 20),
                staged_at: UtcTimeMs(1),
            })
            .unwrap();
        store.add_master(master_record()).unwrap();
        store.clear_raw().unwrap();
        assert_eq!(store.raw_count(), 0);
        assert_eq!(store.master_rows().count(), 1);
    }
}

#![forbid(unsafe_code)]

use nibandh_contracts::wire::{IndexWireRecord, MasterWireRecord};
use nibandh_contracts::UtcTimeMs;
use nibandh_engines::gateway::{GatewayError, RegistryGateway};
use nibandh_store::{IndexFilter, MasterFilter, RecordStore, StorageError};

#[derive(Debug)]
pub enum SyncError {
    Gateway(GatewayError),
    Storage(StorageError),
}

impl std::fmt::Display for SyncError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Gateway(e) => write!(f, "sync push failed: {e}"),
            Self::Storage(e) => write!(f, "sync bookkeeping failed: {e}"),
        }
    }
}

impl std::error::Error for SyncError {}

impl From<GatewayError> for SyncError {
    fn from(value: GatewayError) -> Self {
        Self::Gateway(value)
    }
}

impl From<StorageError> for SyncError {
    fn from(value: StorageError) -> Self {
        Self::Storage(value)
    }
}

/// One successful push. `pushed` is the archive's count of appended rows;
/// `marked` is how many local rows flipped to synced, always the full
/// pending batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub pushed: u32,
    pub marked: usize,
    pub commit_ref: Option<String>,
}

impl SyncReport {
    fn empty() -> Self {
        Self {
            pushed: 0,
            marked: 0,
            commit_ref: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CollectionCounters {
    pub total: usize,
    pub pending: usize,
    pub synced: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncStatus {
    pub index: CollectionCounters,
    pub master: CollectionCounters,
}

/// Both collections attempted back to back; a failure on one never skips
/// the other.
#[derive(Debug)]
pub struct RetryReport {
    pub index: Result<SyncReport, SyncError>,
    pub master: Result<SyncReport, SyncError>,
}

impl RetryReport {
    pub fn fully_synced(&self) -> bool {
        self.index.is_ok() && self.master.is_ok()
    }
}

/// Pushes pending Index and Master rows to the archive. A row is marked
/// synced only after the archive acknowledged the batch that carried it.
pub struct SyncManager {
    gateway: RegistryGateway,
}

impl SyncManager {
    pub fn new(gateway: RegistryGateway) -> Self {
        Self { gateway }
    }

    pub fn sync_index(
        &self,
        store: &mut RecordStore,
        now: UtcTimeMs,
    ) -> Result<SyncReport, SyncError> {
        let pending: Vec<_> = store
            .index_rows_filtered(&IndexFilter {
                synced: Some(false),
                ..IndexFilter::default()
            })
            .into_iter()
            .map(|(id, record)| (id, IndexWireRecord::from_index_record(record)))
            .collect();
        if pending.is_empty() {
            return Ok(SyncReport::empty());
        }

        let (ids, records): (Vec<_>, Vec<_>) = pending.into_iter().unzip();
        let ack = self.gateway.push_index(records, now)?;

        let mut marked = 0;
        for id in ids {
            store.mark_index_synced(id, now)?;
            marked += 1;
        }
        Ok(SyncReport {
            pushed: ack.synced,
            marked,
            commit_ref: Some(ack.commit_ref),
        })
    }

    pub fn sync_master(
        &self,
        store: &mut RecordStore,
        now: UtcTimeMs,
    ) -> Result<SyncReport, SyncError> {
        let pending: Vec<_> = store
            .master_rows_filtered(&MasterFilter {
                synced: Some(false),
                ..MasterFilter::default()
            })
            .into_iter()
            .map(|(id, record)| (id, MasterWireRecord::from_master_record(record)))
            .collect();
        if pending.is_empty() {
            return Ok(SyncReport::empty());
        }

        let (ids, records): (Vec<_>, Vec<_>) = pending.into_iter().unzip();
        let ack = self.gateway.push_master(records, now)?;

        let mut marked = 0;
        for id in ids {
            store.mark_master_synced(id, now)?;
            marked += 1;
        }
        Ok(SyncReport {
            pushed: ack.synced,
            marked,
            commit_ref: Some(ack.commit_ref),
        })
    }

    pub fn retry(&self, store: &mut RecordStore, now: UtcTimeMs) -> RetryReport {
        RetryReport {
            index: self.sync_index(store, now),
            master: self.sync_master(store, now),
        }
    }

    pub fn status(&self, store: &RecordStore) -> SyncStatus {
        let mut status = SyncStatus::default();
        for (_, record) in store.index_rows() {
            status.index.total += 1;
            if record.synced {
                status.index.synced += 1;
            } else {
                status.index.pending += 1;
            }
        }
        for (_, record) in store.master_rows() {
            status.master.total += 1;
            if record.synced {
                status.master.synced += 1;
            } else {
                status.master.pending += 1;
            }
        }
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nibandh_contracts::record::{
        BookNo, CapturedRecord, CipherText, DistrictCode, IndexRecord, MasterRecord, OperatorId,
        PageRange, RecordId, RequestTag, SessionId, SroCode, VolumeNo, VolumeYear,
    };
    use nibandh_engines::archive::{ArchiveService, ArchiveStore};
    use nibandh_engines::encryption::{KeyAuthority, SymmetricKey};

    const DAY_MS: u64 = 86_400_000;

    fn capture_record(start: u32, end: u32) -> CapturedRecord {
        CapturedRecord::v1(
            DistrictCode::new("D1").unwrap(),
            SroCode::new("S1").unwrap(),
            OperatorId::new("op_7").unwrap(),
            VolumeYear::new("2024").unwrap(),
            VolumeNo::new("7").unwrap(),
            BookNo::new("1").unwrap(),
            None,
            PageRange::new(start, end).unwrap(),
            UtcTimeMs(1_000),
            RequestTag::Save,
            "https://portal.example/volume/7",
        )
        .unwrap()
    }

    fn seed_store(starts: &[u32]) -> RecordStore {
        let mut store = RecordStore::new_in_memory();
        for (i, start) in starts.iter().enumerate() {
            let record = capture_record(*start, *start + 5);
            let master_id = store
                .add_master(MasterRecord::from_capture(
                    &record,
                    SessionId::new(format!("sess_{i}")).unwrap(),
                    CipherText("AAAA".to_string()),
                    UtcTimeMs(1_000),
                ))
                .unwrap();
            store
                .add_index(IndexRecord::from_capture(&record, master_id, UtcTimeMs(1_000)))
                .unwrap();
        }
        store
    }

    fn in_process_gateway() -> RegistryGateway {
        RegistryGateway::in_process(ArchiveService::new(
            "archive",
            KeyAuthority::new("secret").unwrap(),
            ArchiveStore::new(SymmetricKey::generate()),
        ))
    }

    #[test]
    fn at_sync_01_successful_push_marks_every_pending_row() {
        let manager = SyncManager::new(in_process_gateway());
        let mut store = seed_store(&[10, 30, 50]);
        let now = UtcTimeMs(DAY_MS * 20_000);

        let report = manager.sync_index(&mut store, now).unwrap();
        assert_eq!(report.pushed, 3);
        assert_eq!(report.marked, 3);
        assert!(report.commit_ref.is_some());

        let status = manager.status(&store);
        assert_eq!(status.index.pending, 0);
        assert_eq!(status.index.synced, 3);
        // Master untouched by an index push.
        assert_eq!(status.master.pending, 3);

        // Idempotent: a second pass with nothing new pushes nothing.
        let again = manager.sync_index(&mut store, now.plus_ms(1)).unwrap();
        assert_eq!(again, SyncReport::empty());
    }

    #[test]
    fn at_sync_02_failed_push_marks_nothing() {
        let manager = SyncManager::new(RegistryGateway::AlwaysFail {
            message: "archive down".to_string(),
        });
        let mut store = seed_store(&[10, 30]);
        let now = UtcTimeMs(DAY_MS * 20_000);

        assert!(matches!(
            manager.sync_master(&mut store, now),
            Err(SyncError::Gateway(_))
        ));
        let status = manager.status(&store);
        assert_eq!(status.master.pending, 2);
        assert_eq!(status.master.synced, 0);
    }

    #[test]
    fn at_sync_03_empty_pending_set_skips_the_network() {
        // AlwaysFail would error on any push; an empty pending set must
        // not reach it.
        let manager = SyncManager::new(RegistryGateway::AlwaysFail {
            message: "archive down".to_string(),
        });
        let mut store = RecordStore::new_in_memory();
        let report = manager.sync_index(&mut store, UtcTimeMs(DAY_MS * 20_000)).unwrap();
        assert_eq!(report, SyncReport::empty());
    }

    #[test]
    fn at_sync_04_second_sync_pushes_only_new_rows() {
        let manager = SyncManager::new(in_process_gateway());
        let mut store = seed_store(&[10]);
        let now = UtcTimeMs(DAY_MS * 20_000);
        manager.sync_index(&mut store, now).unwrap();

        let record = capture_record(100, 105);
        store
            .add_index(IndexRecord::from_capture(&record, RecordId(99), now))
            .unwrap();
        let report = manager.sync_index(&mut store, now.plus_ms(1)).unwrap();
        assert_eq!(report.marked, 1);
    }

    #[test]
    fn at_sync_05_retry_attempts_both_collections() {
        let manager = SyncManager::new(in_process_gateway());
        let mut store = seed_store(&[10, 30]);
        let now = UtcTimeMs(DAY_MS * 20_000);

        let report = manager.retry(&mut store, now);
        assert!(report.fully_synced());
        let status = manager.status(&store);
        assert_eq!(status.index.pending, 0);
        assert_eq!(status.master.pending, 0);

        let failing = SyncManager::new(RegistryGateway::AlwaysFail {
            message: "down".to_string(),
        });
        let mut store = seed_store(&[10]);
        let report = failing.retry(&mut store, now);
        // Both legs ran and both failed independently.
        assert!(report.index.is_err());
        assert!(report.master.is_err());
    }
}

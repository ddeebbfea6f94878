#![forbid(unsafe_code)]

use std::collections::{BTreeMap, HashMap};

use nibandh_contracts::wire::{
    ArchiveMasterRow, ConflictQueryParams, ConflictQueryResponse, GatewayRequest, GatewayResponse,
    HealthCheckResponse, IndexWireRecord, MasterWireRecord, SyncAck,
};
use nibandh_contracts::UtcTimeMs;

use crate::encryption::{
    digest_hex, encrypt_payload, CryptoError, IssuedKey, KeyAuthority, SymmetricKey,
};

#[derive(Debug)]
pub enum ArchiveError {
    BadRequest(&'static str),
    Crypto(CryptoError),
    Encode(serde_json::Error),
}

impl std::fmt::Display for ArchiveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BadRequest(reason) => write!(f, "bad request: {reason}"),
            Self::Crypto(err) => write!(f, "archive crypto failure: {err}"),
            Self::Encode(err) => write!(f, "archive encode failure: {err}"),
        }
    }
}

impl std::error::Error for ArchiveError {}

impl From<CryptoError> for ArchiveError {
    fn from(value: CryptoError) -> Self {
        Self::Crypto(value)
    }
}

impl From<serde_json::Error> for ArchiveError {
    fn from(value: serde_json::Error) -> Self {
        Self::Encode(value)
    }
}

/// The remote append-only store: one partition per calendar day per kind,
/// fully rewritten on each append (read-modify-append-write, as the
/// original's per-day repository files were).
#[derive(Debug)]
pub struct ArchiveStore {
    master_key: SymmetricKey,
    master_partitions: BTreeMap<String, Vec<ArchiveMasterRow>>,
    index_partitions: BTreeMap<String, Vec<IndexWireRecord>>,
}

impl ArchiveStore {
    pub fn new(master_key: SymmetricKey) -> Self {
        Self {
            master_key,
            master_partitions: BTreeMap::new(),
            index_partitions: BTreeMap::new(),
        }
    }

    /// Appends to the day's master partition. No dedup: the master log is
    /// an audit trail keyed only by session id. Each submitted record is
    /// re-encrypted under the authority master key before persisting
    /// (double encryption: the payload inside is already session-key
    /// ciphertext).
    pub fn append_master(
        &mut self,
        records: &[MasterWireRecord],
        now: UtcTimeMs,
    ) -> Result<SyncAck, ArchiveError> {
        let mut rows = Vec::with_capacity(records.len());
        for record in records {
            let serialized = serde_json::to_vec(record)?;
            let sealed = encrypt_payload(&serialized, &self.master_key)?;
            rows.push(ArchiveMasterRow {
                session_id: record.session_id.clone(),
                data: sealed.0,
                timestamp: record.timestamp,
            });
        }

        let partition = self.master_partitions.entry(now.date_key()).or_default();
        partition.extend(rows);
        let commit_ref = partition_commit_ref(partition)?;
        Ok(SyncAck {
            success: true,
            synced: records.len() as u32,
            commit_ref,
            timestamp: now,
        })
    }

    /// Appends to the day's index partition, then dedups the whole
    /// partition by the composite key, keeping the last writer per key in
    /// first-seen order.
    pub fn append_index(
        &mut self,
        records: &[IndexWireRecord],
        now: UtcTimeMs,
    ) -> Result<SyncAck, ArchiveError> {
        let partition = self.index_partitions.entry(now.date_key()).or_default();
        partition.extend(records.iter().cloned());

        let mut deduped: Vec<IndexWireRecord> = Vec::with_capacity(partition.len());
        let mut position_by_key: HashMap<String, usize> = HashMap::new();
        for row in partition.drain(..) {
            match position_by_key.get(&row.dedup_key()) {
                Some(&pos) => deduped[pos] = row,
                None => {
                    position_by_key.insert(row.dedup_key(), deduped.len());
                    deduped.push(row);
                }
            }
        }
        *partition = deduped;

        let commit_ref = partition_commit_ref(partition)?;
        Ok(SyncAck {
            success: true,
            synced: records.len() as u32,
            commit_ref,
            timestamp: now,
        })
    }

    /// Oracle read path: today's index partition, else the most recent
    /// previous partition by lexicographic date order; then the same
    /// conflict-key filter and overlap predicate as the local checker.
    pub fn query_conflict(
        &self,
        params: &ConflictQueryParams,
        now: UtcTimeMs,
    ) -> Result<ConflictQueryResponse, ArchiveError> {
        if !params.has_required_fields() {
            return Err(ArchiveError::BadRequest("missing required parameters"));
        }
        let claim_range = params
            .page_range()
            .map_err(|_| ArchiveError::BadRequest("invalid page range"))?;

        let Some(partition) = self.readable_index_partition(&now.date_key()) else {
            return Ok(ConflictQueryResponse {
                conflict: false,
                conflicting_record: None,
            });
        };

        for row in partition {
            if !params.matches_key(row) {
                continue;
            }
            let Ok(candidate_range) = row.page_range() else {
                continue;
            };
            if nibandh_contracts::conflict::ranges_overlap(claim_range, candidate_range) {
                return Ok(ConflictQueryResponse {
                    conflict: true,
                    conflicting_record: Some(row.clone()),
                });
            }
        }
        Ok(ConflictQueryResponse {
            conflict: false,
            conflicting_record: None,
        })
    }

    fn readable_index_partition(&self, today: &str) -> Option<&Vec<IndexWireRecord>> {
        if let Some(partition) = self.index_partitions.get(today) {
            return Some(partition);
        }
        self.index_partitions
            .range(..today.to_string())
            .next_back()
            .map(|(_, partition)| partition)
    }

    pub fn master_partition(&self, date_key: &str) -> Option<&Vec<ArchiveMasterRow>> {
        self.master_partitions.get(date_key)
    }

    pub fn index_partition(&self, date_key: &str) -> Option<&Vec<IndexWireRecord>> {
        self.index_partitions.get(date_key)
    }
}

fn partition_commit_ref<T: serde::Serialize>(partition: &[T]) -> Result<String, ArchiveError> {
    Ok(digest_hex(&serde_json::to_vec(partition)?))
}

/// The remote authority as one dispatchable service: key issuance, both
/// push operations, the conflict oracle, and the liveness probe. Backs
/// the in-process gateway runtime and the HTTP adapter.
#[derive(Debug)]
pub struct ArchiveService {
    server_name: String,
    authority: KeyAuthority,
    archive: ArchiveStore,
    conflict_query_count: u64,
}

impl ArchiveService {
    pub fn new(server_name: impl Into<String>, authority: KeyAuthority, archive: ArchiveStore) -> Self {
        Self {
            server_name: server_name.into(),
            authority,
            archive,
            conflict_query_count: 0,
        }
    }

    pub fn health_check(&self, now: UtcTimeMs) -> HealthCheckResponse {
        HealthCheckResponse {
            status: "ok".to_string(),
            server: self.server_name.clone(),
            timestamp: now,
        }
    }

    pub fn request_key(&self) -> IssuedKey {
        self.authority.issue_key()
    }

    pub fn sync_master(
        &mut self,
        records: &[MasterWireRecord],
        now: UtcTimeMs,
    ) -> Result<SyncAck, ArchiveError> {
        self.archive.append_master(records, now)
    }

    pub fn sync_index(
        &mut self,
        records: &[IndexWireRecord],
        now: UtcTimeMs,
    ) -> Result<SyncAck, ArchiveError> {
        self.archive.append_index(records, now)
    }

    pub fn check_conflict(
        &mut self,
        params: &ConflictQueryParams,
        now: UtcTimeMs,
    ) -> Result<ConflictQueryResponse, ArchiveError> {
        self.conflict_query_count += 1;
        self.archive.query_conflict(params, now)
    }

    /// Number of conflict-oracle queries served. Used to assert that the
    /// local index short-circuits remote lookups.
    pub fn conflict_query_count(&self) -> u64 {
        self.conflict_query_count
    }

    pub fn archive(&self) -> &ArchiveStore {
        &self.archive
    }

    pub fn handle(
        &mut self,
        request: &GatewayRequest,
        now: UtcTimeMs,
    ) -> Result<GatewayResponse, ArchiveError> {
        match request {
            GatewayRequest::HealthCheck => Ok(GatewayResponse::Health(self.health_check(now))),
            GatewayRequest::RequestKey => {
                let issued = self.request_key();
                Ok(GatewayResponse::Key(
                    nibandh_contracts::wire::RequestKeyResponse {
                        encryption_key: issued.encryption_key,
                        session_id: issued.session_token,
                    },
                ))
            }
            GatewayRequest::SyncMaster { records } => {
                Ok(GatewayResponse::Sync(self.sync_master(records, now)?))
            }
            GatewayRequest::SyncIndex { records } => {
                Ok(GatewayResponse::Sync(self.sync_index(records, now)?))
            }
            GatewayRequest::CheckConflict { params } => {
                Ok(GatewayResponse::Conflict(self.check_conflict(params, now)?))
            }
        }
    }
}

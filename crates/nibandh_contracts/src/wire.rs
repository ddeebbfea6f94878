#![forbid(unsafe_code)]

use crate::conflict::{ConflictKey, PageRangeClaim};
use crate::record::{IndexRecord, MasterRecord, PageRange};
use crate::{ContractViolation, UtcTimeMs};

/// One gateway call. The transport is a single POST channel; the `action`
/// discriminator selects the verb, matching the original JSON protocol.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "action")]
pub enum GatewayRequest {
    #[serde(rename = "HEALTH_CHECK")]
    HealthCheck,
    #[serde(rename = "REQUEST_KEY")]
    RequestKey,
    #[serde(rename = "SYNC_MASTER")]
    SyncMaster { records: Vec<MasterWireRecord> },
    #[serde(rename = "SYNC_INDEX")]
    SyncIndex { records: Vec<IndexWireRecord> },
    #[serde(rename = "CHECK_CONFLICT")]
    CheckConflict { params: ConflictQueryParams },
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckResponse {
    pub status: String,
    pub server: String,
    pub timestamp: UtcTimeMs,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestKeyResponse {
    pub encryption_key: String,
    pub session_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncAck {
    pub success: bool,
    pub synced: u32,
    pub commit_ref: String,
    pub timestamp: UtcTimeMs,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictQueryResponse {
    pub conflict: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conflicting_record: Option<IndexWireRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct GatewayErrorResponse {
    pub error: String,
}

/// Union of the per-action success bodies. Serialized untagged: the caller
/// knows which action it issued, matching the original's bare-object
/// responses.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(untagged)]
pub enum GatewayResponse {
    Health(HealthCheckResponse),
    Key(RequestKeyResponse),
    Sync(SyncAck),
    Conflict(ConflictQueryResponse),
}

/// Master push row: the payload is already session-key encrypted; the
/// archive re-encrypts it under the authority master key before persisting.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasterWireRecord {
    pub session_id: String,
    pub encrypted_data: String,
    pub district: String,
    pub sro: String,
    pub volume_year: String,
    pub volume_no: String,
    pub book_no: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deed_no: Option<String>,
    pub request_type: String,
    pub timestamp: UtcTimeMs,
}

impl MasterWireRecord {
    pub fn from_master_record(record: &MasterRecord) -> Self {
        Self {
            session_id: record.session_id.as_str().to_string(),
            encrypted_data: record.encrypted_payload.0.clone(),
            district: record.district.as_str().to_string(),
            sro: record.sro.as_str().to_string(),
            volume_year: record.volume_year.as_str().to_string(),
            volume_no: record.volume_no.as_str().to_string(),
            book_no: record.book_no.as_str().to_string(),
            deed_no: record.deed_no.as_ref().map(|d| d.as_str().to_string()),
            request_type: record.request_tag.as_str().to_string(),
            timestamp: record.created_at,
        }
    }
}

/// Index push row: internal ids stripped, only the fields the remote index
/// needs for conflict checks.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexWireRecord {
    pub district: String,
    pub sro: String,
    pub volume_year: String,
    pub volume_no: String,
    pub book_no: String,
    pub start_page: u32,
    pub end_page: u32,
    pub user_id: String,
    pub timestamp: UtcTimeMs,
}

impl IndexWireRecord {
    pub fn from_index_record(record: &IndexRecord) -> Self {
        Self {
            district: record.district.as_str().to_string(),
            sro: record.sro.as_str().to_string(),
            volume_year: record.volume_year.as_str().to_string(),
            volume_no: record.volume_no.as_str().to_string(),
            book_no: record.book_no.as_str().to_string(),
            start_page: record.page_range.start_page,
            end_page: record.page_range.end_page,
            user_id: record.operator_id.as_str().to_string(),
            timestamp: record.created_at,
        }
    }

    /// Composite dedup key for the remote index partition. Deliberately
    /// excludes book number, mirroring the archive's historical layout.
    pub fn dedup_key(&self) -> String {
        format!(
            "{}-{}-{}-{}-{}-{}",
            self.district, self.sro, self.volume_year, self.volume_no, self.start_page,
            self.end_page
        )
    }

    pub fn page_range(&self) -> Result<PageRange, ContractViolation> {
        PageRange::new(self.start_page, self.end_page)
    }
}

/// Server-side filter parameters for `CHECK_CONFLICT`. Page bounds are
/// validated before a claim ever reaches the wire.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictQueryParams {
    pub district: String,
    pub sro: String,
    pub volume_year: String,
    pub volume_no: String,
    pub book_no: String,
    pub start_page: u32,
    pub end_page: u32,
}

impl ConflictQueryParams {
    pub fn from_claim(claim: &PageRangeClaim, range: PageRange) -> Self {
        Self {
            district: claim.key.district.as_str().to_string(),
            sro: claim.key.sro.as_str().to_string(),
            volume_year: claim.key.volume_year.as_str().to_string(),
            volume_no: claim.key.volume_no.as_str().to_string(),
            book_no: claim.key.book_no.as_str().to_string(),
            start_page: range.start_page,
            end_page: range.end_page,
        }
    }

    pub fn matches_key(&self, record: &IndexWireRecord) -> bool {
        record.district == self.district
            && record.sro == self.sro
            && record.volume_year == self.volume_year
            && record.volume_no == self.volume_no
            && record.book_no == self.book_no
    }

    pub fn page_range(&self) -> Result<PageRange, ContractViolation> {
        PageRange::new(self.start_page, self.end_page)
    }

    pub fn has_required_fields(&self) -> bool {
        !self.district.is_empty()
            && !self.sro.is_empty()
            && !self.volume_year.is_empty()
            && !self.volume_no.is_empty()
            && !self.book_no.is_empty()
            && self.start_page > 0
            && self.end_page > 0
    }
}

/// Row shape of the master archive partition after the authority-key
/// re-encryption pass.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveMasterRow {
    pub session_id: String,
    pub data: String,
    pub timestamp: UtcTimeMs,
}

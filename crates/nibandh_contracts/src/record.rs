#![forbid(unsafe_code)]

use crate::{ContractViolation, SchemaVersion, UtcTimeMs, Validate};

pub const RECORD_CONTRACT_VERSION: SchemaVersion = SchemaVersion(1);

macro_rules! bounded_code {
    ($name:ident, $field:literal, $max:expr) => {
        #[derive(
            Debug,
            Clone,
            PartialEq,
            Eq,
            PartialOrd,
            Ord,
            Hash,
            serde::Serialize,
            serde::Deserialize,
        )]
        pub struct $name(String);

        impl $name {
            pub fn new(raw: impl Into<String>) -> Result<Self, ContractViolation> {
                let raw = raw.into();
                if raw.trim().is_empty() {
                    return Err(ContractViolation::InvalidValue {
                        field: $field,
                        reason: "must not be empty",
                    });
                }
                if raw.len() > $max {
                    return Err(ContractViolation::InvalidValue {
                        field: $field,
                        reason: "exceeds maximum length",
                    });
                }
                Ok(Self(raw))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }
    };
}

bounded_code!(DistrictCode, "district", 64);
bounded_code!(SroCode, "sro", 64);
bounded_code!(OperatorId, "operator_id", 64);
bounded_code!(VolumeYear, "volume_year", 8);
bounded_code!(VolumeNo, "volume_no", 16);
bounded_code!(BookNo, "book_no", 16);
bounded_code!(DeedNo, "deed_no", 32);

/// Opaque workflow correlation token. Not a security boundary.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(raw: impl Into<String>) -> Result<Self, ContractViolation> {
        let raw = raw.into();
        if raw.trim().is_empty() || raw.len() > 64 {
            return Err(ContractViolation::InvalidValue {
                field: "session_id",
                reason: "must be non-empty and <= 64 chars",
            });
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Store-assigned identifier, monotonically increasing per collection.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct RecordId(pub u64);

impl Validate for RecordId {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.0 == 0 {
            return Err(ContractViolation::InvalidValue {
                field: "record_id",
                reason: "must be > 0",
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestTag {
    Save,
    Create,
}

impl RequestTag {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestTag::Save => "save",
            RequestTag::Create => "create",
        }
    }
}

/// Inclusive page interval. Both bounds are positive and start <= end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct PageRange {
    pub start_page: u32,
    pub end_page: u32,
}

impl PageRange {
    pub fn new(start_page: u32, end_page: u32) -> Result<Self, ContractViolation> {
        let range = Self {
            start_page,
            end_page,
        };
        range.validate()?;
        Ok(range)
    }

    /// Parses the raw scraped strings. Non-numeric input is an
    /// `InvalidRange` violation, not a panic.
    pub fn parse(start_raw: &str, end_raw: &str) -> Result<Self, ContractViolation> {
        let start_page =
            start_raw
                .trim()
                .parse::<u32>()
                .map_err(|_| ContractViolation::InvalidRange {
                    field: "start_page",
                    reason: "must be numeric",
                })?;
        let end_page = end_raw
            .trim()
            .parse::<u32>()
            .map_err(|_| ContractViolation::InvalidRange {
                field: "end_page",
                reason: "must be numeric",
            })?;
        Self::new(start_page, end_page)
    }
}

impl Validate for PageRange {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.start_page == 0 || self.end_page == 0 {
            return Err(ContractViolation::InvalidRange {
                field: "page_range",
                reason: "page numbers must be positive",
            });
        }
        if self.start_page > self.end_page {
            return Err(ContractViolation::InvalidRange {
                field: "page_range",
                reason: "start page cannot be greater than end page",
            });
        }
        Ok(())
    }
}

/// Record produced by the portal extractor. Immutable once constructed.
/// Serialized form is the encryption payload for the master archive.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CapturedRecord {
    pub schema_version: SchemaVersion,
    pub district: DistrictCode,
    pub sro: SroCode,
    pub operator_id: OperatorId,
    pub volume_year: VolumeYear,
    pub volume_no: VolumeNo,
    pub book_no: BookNo,
    pub deed_no: Option<DeedNo>,
    pub page_range: PageRange,
    pub captured_at: UtcTimeMs,
    pub request_tag: RequestTag,
    pub origin_url: String,
}

impl CapturedRecord {
    #[allow(clippy::too_many_arguments)]
    pub fn v1(
        district: DistrictCode,
        sro: SroCode,
        operator_id: OperatorId,
        volume_year: VolumeYear,
        volume_no: VolumeNo,
        book_no: BookNo,
        deed_no: Option<DeedNo>,
        page_range: PageRange,
        captured_at: UtcTimeMs,
        request_tag: RequestTag,
        origin_url: impl Into<String>,
    ) -> Result<Self, ContractViolation> {
        let record = Self {
            schema_version: RECORD_CONTRACT_VERSION,
            district,
            sro,
            operator_id,
            volume_year,
            volume_no,
            book_no,
            deed_no,
            page_range,
            captured_at,
            request_tag,
            origin_url: origin_url.into(),
        };
        record.validate()?;
        Ok(record)
    }
}

impl Validate for CapturedRecord {
    fn validate(&self) -> Result<(), ContractViolation> {
        self.page_range.validate()?;
        if self.origin_url.trim().is_empty() {
            return Err(ContractViolation::InvalidValue {
                field: "origin_url",
                reason: "must not be empty",
            });
        }
        Ok(())
    }
}

/// Plaintext staging row. Lives only for the span of one capture workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCapture {
    pub session_id: SessionId,
    pub record: CapturedRecord,
    pub staged_at: UtcTimeMs,
}

/// Base64 AES-256-GCM ciphertext (nonce prepended).
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CipherText(pub String);

/// Encrypted archive row plus the unencrypted context needed for
/// query and audit without decryption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MasterRecord {
    pub session_id: SessionId,
    pub encrypted_payload: CipherText,
    pub district: DistrictCode,
    pub sro: SroCode,
    pub volume_year: VolumeYear,
    pub volume_no: VolumeNo,
    pub book_no: BookNo,
    pub deed_no: Option<DeedNo>,
    pub request_tag: RequestTag,
    pub synced: bool,
    pub created_at: UtcTimeMs,
    pub synced_at: Option<UtcTimeMs>,
}

impl MasterRecord {
    pub fn from_capture(
        record: &CapturedRecord,
        session_id: SessionId,
        encrypted_payload: CipherText,
        created_at: UtcTimeMs,
    ) -> Self {
        Self {
            session_id,
            encrypted_payload,
            district: record.district.clone(),
            sro: record.sro.clone(),
            volume_year: record.volume_year.clone(),
            volume_no: record.volume_no.clone(),
            book_no: record.book_no.clone(),
            deed_no: record.deed_no.clone(),
            request_tag: record.request_tag,
            synced: false,
            created_at,
            synced_at: None,
        }
    }
}

/// Lightweight projection used for conflict detection and index sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexRecord {
    pub master_record_id: RecordId,
    pub district: DistrictCode,
    pub sro: SroCode,
    pub volume_year: VolumeYear,
    pub volume_no: VolumeNo,
    pub book_no: BookNo,
    pub deed_no: Option<DeedNo>,
    pub page_range: PageRange,
    pub operator_id: OperatorId,
    pub request_tag: RequestTag,
    pub synced: bool,
    pub created_at: UtcTimeMs,
    pub synced_at: Option<UtcTimeMs>,
}

impl IndexRecord {
    pub fn from_capture(
        record: &CapturedRecord,
        master_record_id: RecordId,
        created_at: UtcTimeMs,
    ) -> Self {
        Self {
            master_record_id,
            district: record.district.clone(),
            sro: record.sro.clone(),
            volume_year: record.volume_year.clone(),
            volume_no: record.volume_no.clone(),
            book_no: record.book_no.clone(),
            deed_no: record.deed_no.clone(),
            page_range: record.page_range,
            operator_id: record.operator_id.clone(),
            request_tag: record.request_tag,
            synced: false,
            created_at,
            synced_at: None,
        }
    }
}

/// Forensic audit row written before each conflict lookup. Never read back
/// by core logic. Carries the claimant's identity alongside the key and the
/// raw page bounds as submitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictProbe {
    pub district: DistrictCode,
    pub sro: SroCode,
    pub volume_year: VolumeYear,
    pub volume_no: VolumeNo,
    pub book_no: BookNo,
    pub start_page_raw: String,
    pub end_page_raw: String,
    pub operator_id: OperatorId,
    pub deed_no: Option<DeedNo>,
    pub request_tag: Option<RequestTag>,
    pub checked_at: UtcTimeMs,
}

#![forbid(unsafe_code)]

use crate::record::{
    BookNo, CapturedRecord, DeedNo, DistrictCode, IndexRecord, OperatorId, PageRange, RequestTag,
    SroCode, VolumeNo, VolumeYear,
};
use crate::{ContractViolation, UtcTimeMs};

/// Conflict-key equivalence class: page ranges are only compared between
/// records that agree on every one of these fields.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConflictKey {
    pub district: DistrictCode,
    pub sro: SroCode,
    pub volume_year: VolumeYear,
    pub volume_no: VolumeNo,
    pub book_no: BookNo,
}

impl ConflictKey {
    pub fn of_index_record(record: &IndexRecord) -> Self {
        Self {
            district: record.district.clone(),
            sro: record.sro.clone(),
            volume_year: record.volume_year.clone(),
            volume_no: record.volume_no.clone(),
            book_no: record.book_no.clone(),
        }
    }

    pub fn of_capture(record: &CapturedRecord) -> Self {
        Self {
            district: record.district.clone(),
            sro: record.sro.clone(),
            volume_year: record.volume_year.clone(),
            volume_no: record.volume_no.clone(),
            book_no: record.book_no.clone(),
        }
    }
}

/// A page-range claim submitted for conflict checking. Page bounds stay raw
/// until `validated_range()` so that the probe can record exactly what the
/// caller submitted, numeric or not. The claimant travels with the claim so
/// the audit trail of check attempts names who asked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRangeClaim {
    pub key: ConflictKey,
    pub start_page_raw: String,
    pub end_page_raw: String,
    pub claimant: OperatorId,
    pub deed_no: Option<DeedNo>,
    pub request_tag: Option<RequestTag>,
    pub claimed_at: UtcTimeMs,
}

impl PageRangeClaim {
    pub fn new(
        key: ConflictKey,
        start_page_raw: impl Into<String>,
        end_page_raw: impl Into<String>,
        claimant: OperatorId,
        claimed_at: UtcTimeMs,
    ) -> Self {
        Self {
            key,
            start_page_raw: start_page_raw.into(),
            end_page_raw: end_page_raw.into(),
            claimant,
            deed_no: None,
            request_tag: None,
            claimed_at,
        }
    }

    /// A claim for the pages a captured record covers, carrying the
    /// record's full submitter context.
    pub fn of_capture(record: &CapturedRecord, claimed_at: UtcTimeMs) -> Self {
        Self {
            key: ConflictKey::of_capture(record),
            start_page_raw: record.page_range.start_page.to_string(),
            end_page_raw: record.page_range.end_page.to_string(),
            claimant: record.operator_id.clone(),
            deed_no: record.deed_no.clone(),
            request_tag: Some(record.request_tag),
            claimed_at,
        }
    }

    pub fn validated_range(&self) -> Result<PageRange, ContractViolation> {
        PageRange::parse(&self.start_page_raw, &self.end_page_raw)
    }
}

/// True iff the inclusive integer intervals intersect: the claim starts
/// inside the candidate, ends inside it, or fully contains it.
pub fn ranges_overlap(claim: PageRange, candidate: PageRange) -> bool {
    let starts_inside =
        claim.start_page >= candidate.start_page && claim.start_page <= candidate.end_page;
    let ends_inside =
        claim.end_page >= candidate.start_page && claim.end_page <= candidate.end_page;
    let contains =
        claim.start_page <= candidate.start_page && claim.end_page >= candidate.end_page;
    starts_inside || ends_inside || contains
}

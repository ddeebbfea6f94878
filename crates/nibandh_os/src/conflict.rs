#![forbid(unsafe_code)]

use nibandh_contracts::conflict::{ranges_overlap, PageRangeClaim};
use nibandh_contracts::record::ConflictProbe;
use nibandh_contracts::wire::{ConflictQueryParams, IndexWireRecord};
use nibandh_contracts::{ContractViolation, UtcTimeMs};
use nibandh_engines::gateway::{GatewayError, RegistryGateway};
use nibandh_store::RecordStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictSource {
    Local,
    Remote,
}

#[derive(Debug)]
pub enum ConflictError {
    InvalidRange(ContractViolation),
    Gateway(GatewayError),
}

impl std::fmt::Display for ConflictError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidRange(e) => write!(f, "claim rejected: {e}"),
            Self::Gateway(e) => write!(f, "remote check unavailable: {e}"),
        }
    }
}

impl std::error::Error for ConflictError {}

/// Result of one conflict check. A check never raises: bad claims and
/// unreachable archives both land in `error`, with `conflict` false, so
/// the caller branches on fields rather than catching. A transport error
/// deliberately reads as no-conflict (fail open, availability over
/// completeness).
#[derive(Debug)]
pub struct ConflictOutcome {
    pub conflict: bool,
    pub source: Option<ConflictSource>,
    pub conflicting_record: Option<IndexWireRecord>,
    pub error: Option<ConflictError>,
}

impl ConflictOutcome {
    fn clear() -> Self {
        Self {
            conflict: false,
            source: None,
            conflicting_record: None,
            error: None,
        }
    }

    fn hit(source: ConflictSource, record: Option<IndexWireRecord>) -> Self {
        Self {
            conflict: true,
            source: Some(source),
            conflicting_record: record,
            error: None,
        }
    }

    fn failed(error: ConflictError) -> Self {
        Self {
            conflict: false,
            source: None,
            conflicting_record: None,
            error: Some(error),
        }
    }
}

/// Answers "has this page range already been claimed" against the local
/// index first, then the remote oracle. A local hit short-circuits the
/// remote call.
pub struct ConflictChecker {
    gateway: RegistryGateway,
}

impl ConflictChecker {
    pub fn new(gateway: RegistryGateway) -> Self {
        Self { gateway }
    }

    pub fn check(
        &self,
        store: &mut RecordStore,
        claim: &PageRangeClaim,
        now: UtcTimeMs,
    ) -> ConflictOutcome {
        // Audit row first, raw bounds included, numeric or not. A failed
        // audit write never blocks the check.
        let _ = store.add_probe(ConflictProbe {
            district: claim.key.district.clone(),
            sro: claim.key.sro.clone(),
            volume_year: claim.key.volume_year.clone(),
            volume_no: claim.key.volume_no.clone(),
            book_no: claim.key.book_no.clone(),
            start_page_raw: claim.start_page_raw.clone(),
            end_page_raw: claim.end_page_raw.clone(),
            operator_id: claim.claimant.clone(),
            deed_no: claim.deed_no.clone(),
            request_tag: claim.request_tag,
            checked_at: now,
        });

        let range = match claim.validated_range() {
            Ok(range) => range,
            Err(violation) => {
                return ConflictOutcome::failed(ConflictError::InvalidRange(violation));
            }
        };

        for (_, record) in store.index_rows_for_key(&claim.key) {
            if ranges_overlap(range, record.page_range) {
                return ConflictOutcome::hit(
                    ConflictSource::Local,
                    Some(IndexWireRecord::from_index_record(record)),
                );
            }
        }

        let params = ConflictQueryParams::from_claim(claim, range);
        match self.gateway.query_conflict(params, now) {
            Ok(response) if response.conflict => {
                ConflictOutcome::hit(ConflictSource::Remote, response.conflicting_record)
            }
            Ok(_) => ConflictOutcome::clear(),
            Err(err) => ConflictOutcome::failed(ConflictError::Gateway(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use nibandh_contracts::conflict::ConflictKey;
    use nibandh_contracts::record::{
        BookNo, CapturedRecord, DistrictCode, IndexRecord, OperatorId, PageRange, RecordId,
        RequestTag, SroCode, VolumeNo, VolumeYear,
    };
    use nibandh_engines::archive::{ArchiveService, ArchiveStore};
    use nibandh_engines::encryption::{KeyAuthority, SymmetricKey};

    const DAY_MS: u64 = 86_400_000;

    fn capture_record(book: &str, start: u32, end: u32) -> CapturedRecord {
        CapturedRecord::v1(
            DistrictCode::new("D1").unwrap(),
            SroCode::new("S1").unwrap(),
            OperatorId::new("op_7").unwrap(),
            VolumeYear::new("2024").unwrap(),
            VolumeNo::new("7").unwrap(),
            BookNo::new(book).unwrap(),
            None,
            PageRange::new(start, end).unwrap(),
            UtcTimeMs(1_000),
            RequestTag::Save,
            "https://portal.example/volume/7",
        )
        .unwrap()
    }

    fn claim(book: &str, start: &str, end: &str, now: UtcTimeMs) -> PageRangeClaim {
        PageRangeClaim::new(
            ConflictKey::of_capture(&capture_record(book, 1, 1)),
            start,
            end,
            OperatorId::new("op_7").unwrap(),
            now,
        )
    }

    fn archive_service() -> Arc<Mutex<ArchiveService>> {
        Arc::new(Mutex::new(ArchiveService::new(
            "archive",
            KeyAuthority::new("secret").unwrap(),
            ArchiveStore::new(SymmetricKey::generate()),
        )))
    }

    #[test]
    fn at_check_01_local_hit_short_circuits_remote() {
        let service = archive_service();
        let checker = ConflictChecker::new(RegistryGateway::InProcess(service.clone()));
        let mut store = RecordStore::new_in_memory();
        let now = UtcTimeMs(DAY_MS * 20_000);

        store
            .add_index(IndexRecord::from_capture(
                &capture_record("1", 10, 20),
                RecordId(1),
                now,
            ))
            .unwrap();

        let outcome = checker.check(&mut store, &claim("1", "15", "25", now), now);
        assert!(outcome.conflict);
        assert_eq!(outcome.source, Some(ConflictSource::Local));
        assert_eq!(outcome.conflicting_record.as_ref().unwrap().start_page, 10);
        // No remote round trip happened.
        assert_eq!(service.lock().unwrap().conflict_query_count(), 0);
    }

    #[test]
    fn at_check_02_book_no_scopes_the_local_check() {
        let checker = ConflictChecker::new(RegistryGateway::InProcess(archive_service()));
        let mut store = RecordStore::new_in_memory();
        let now = UtcTimeMs(DAY_MS * 20_000);

        store
            .add_index(IndexRecord::from_capture(
                &capture_record("2", 10, 20),
                RecordId(1),
                now,
            ))
            .unwrap();

        // Same pages, different book: not a conflict.
        let outcome = checker.check(&mut store, &claim("1", "10", "20", now), now);
        assert!(!outcome.conflict);
        assert!(outcome.error.is_none());
    }

    #[test]
    fn at_check_03_remote_hit_is_reported_with_source() {
        let service = archive_service();
        let now = UtcTimeMs(DAY_MS * 20_000);
        service
            .lock()
            .unwrap()
            .sync_index(
                &[IndexWireRecord {
                    district: "D1".into(),
                    sro: "S1".into(),
                    volume_year: "2024".into(),
                    volume_no: "7".into(),
                    book_no: "1".into(),
                    start_page: 10,
                    end_page: 20,
                    user_id: "other_op".into(),
                    timestamp: now,
                }],
                now,
            )
            .unwrap();

        let checker = ConflictChecker::new(RegistryGateway::InProcess(service.clone()));
        let mut store = RecordStore::new_in_memory();
        let outcome = checker.check(&mut store, &claim("1", "12", "14", now), now);
        assert!(outcome.conflict);
        assert_eq!(outcome.source, Some(ConflictSource::Remote));
        assert_eq!(
            outcome.conflicting_record.as_ref().unwrap().user_id,
            "other_op"
        );
        assert_eq!(service.lock().unwrap().conflict_query_count(), 1);
    }

    #[test]
    fn at_check_04_transport_failure_fails_open() {
        let checker = ConflictChecker::new(RegistryGateway::AlwaysFail {
            message: "archive down".to_string(),
        });
        let mut store = RecordStore::new_in_memory();
        let now = UtcTimeMs(DAY_MS * 20_000);

        let outcome = checker.check(&mut store, &claim("1", "10", "20", now), now);
        assert!(!outcome.conflict);
        assert!(matches!(outcome.error, Some(ConflictError::Gateway(_))));
    }

    #[test]
    fn at_check_05_invalid_bounds_skip_lookup_but_probe_is_recorded() {
        let service = archive_service();
        let checker = ConflictChecker::new(RegistryGateway::InProcess(service.clone()));
        let mut store = RecordStore::new_in_memory();
        let now = UtcTimeMs(DAY_MS * 20_000);

        let outcome = checker.check(&mut store, &claim("1", "ten", "20", now), now);
        assert!(!outcome.conflict);
        assert!(matches!(outcome.error, Some(ConflictError::InvalidRange(_))));
        // The lookup never ran.
        assert_eq!(service.lock().unwrap().conflict_query_count(), 0);
        // The audit trail keeps exactly what was submitted, and who
        // submitted it.
        let probes: Vec<_> = store.probe_rows().collect();
        assert_eq!(probes.len(), 1);
        assert_eq!(probes[0].1.start_page_raw, "ten");
        assert_eq!(probes[0].1.operator_id.as_str(), "op_7");
        assert!(probes[0].1.deed_no.is_none());
    }
}

#![forbid(unsafe_code)]

use nibandh_contracts::record::{
    CapturedRecord, IndexRecord, MasterRecord, RawCapture, RecordId, RequestTag, SessionId,
};
use nibandh_contracts::{ContractViolation, UtcTimeMs};
use nibandh_engines::encryption::{encrypt_record, new_session_id, CryptoError, SymmetricKey};
use nibandh_engines::gateway::{GatewayError, RegistryGateway};
use nibandh_store::{RecordStore, StorageError};

#[derive(Debug)]
pub enum CaptureError {
    Gateway(GatewayError),
    Crypto(CryptoError),
    Storage(StorageError),
    Contract(ContractViolation),
}

impl std::fmt::Display for CaptureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Gateway(e) => write!(f, "capture failed at key request: {e}"),
            Self::Crypto(e) => write!(f, "capture failed at encryption: {e}"),
            Self::Storage(e) => write!(f, "capture failed at persistence: {e}"),
            Self::Contract(e) => write!(f, "capture rejected: {e}"),
        }
    }
}

impl std::error::Error for CaptureError {}

impl From<GatewayError> for CaptureError {
    fn from(value: GatewayError) -> Self {
        Self::Gateway(value)
    }
}

impl From<CryptoError> for CaptureError {
    fn from(value: CryptoError) -> Self {
        Self::Crypto(value)
    }
}

impl From<StorageError> for CaptureError {
    fn from(value: StorageError) -> Self {
        Self::Storage(value)
    }
}

impl From<ContractViolation> for CaptureError {
    fn from(value: ContractViolation) -> Self {
        Self::Contract(value)
    }
}

/// Result of one capture workflow. `cleanup_error` is reported separately
/// because the plaintext staging row is cleared even when the workflow
/// fails partway.
#[derive(Debug)]
pub struct CaptureOutcome {
    pub master_record_id: Option<RecordId>,
    pub index_record_id: Option<RecordId>,
    pub session_id: Option<SessionId>,
    pub request_tag: Option<RequestTag>,
    pub error: Option<CaptureError>,
    pub cleanup_error: Option<StorageError>,
}

impl CaptureOutcome {
    pub fn success(&self) -> bool {
        self.error.is_none() && self.master_record_id.is_some()
    }
}

/// Drives the capture pipeline: stage the plaintext record, obtain a
/// session encryption key from the gateway, encrypt, project the Master
/// and Index rows, then drop the plaintext staging row.
pub struct CaptureRuntime {
    gateway: RegistryGateway,
}

impl CaptureRuntime {
    pub fn new(gateway: RegistryGateway) -> Self {
        Self { gateway }
    }

    pub fn capture(
        &self,
        store: &mut RecordStore,
        record: CapturedRecord,
        now: UtcTimeMs,
    ) -> CaptureOutcome {
        // The staging row is keyed by a locally minted session because the
        // authority token does not exist until after the key request; the
        // row is cleared before the workflow returns, so the two ids never
        // coexist past this function.
        let staging_session = new_session_id();
        if let Err(err) = store.add_raw(RawCapture {
            session_id: staging_session,
            record: record.clone(),
            staged_at: now,
        }) {
            return CaptureOutcome {
                master_record_id: None,
                index_record_id: None,
                session_id: None,
                request_tag: None,
                error: Some(err.into()),
                cleanup_error: None,
            };
        }

        let result = self.encrypt_and_project(store, &record, now);
        // The staging row holds plaintext and must not outlive the
        // workflow, success or not.
        let cleanup_error = store.clear_raw().err();

        match result {
            Ok((master_id, index_id, session_id)) => CaptureOutcome {
                master_record_id: Some(master_id),
                index_record_id: Some(index_id),
                session_id: Some(session_id),
                // Callers branch save/create on the tag of what was stored.
                request_tag: Some(record.request_tag),
                error: None,
                cleanup_error,
            },
            Err(err) => CaptureOutcome {
                master_record_id: None,
                index_record_id: None,
                session_id: None,
                request_tag: None,
                error: Some(err),
                cleanup_error,
            },
        }
    }

    fn encrypt_and_project(
        &self,
        store: &mut RecordStore,
        record: &CapturedRecord,
        now: UtcTimeMs,
    ) -> Result<(RecordId, RecordId, SessionId), CaptureError> {
        let issued = self.gateway.issue_key()?;
        let key = SymmetricKey::from_hex(&issued.encryption_key)?;
        let session_id = SessionId::new(issued.session_id)?;

        let payload = encrypt_record(record, &key)?;
        let master =
            MasterRecord::from_capture(record, session_id.clone(), payload, now);
        let master_id = store.add_master(master)?;

        let index = IndexRecord::from_capture(record, master_id, now);
        let index_id = store.add_index(index)?;

        Ok((master_id, index_id, session_id))
    }
}

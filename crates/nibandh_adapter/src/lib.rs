#![forbid(unsafe_code)]

//! HTTP surface over the archive service: one POST channel dispatched on
//! the `action` discriminator, plus a liveness probe.

use std::env;

use nibandh_contracts::wire::{GatewayRequest, GatewayResponse, HealthCheckResponse};
use nibandh_contracts::UtcTimeMs;
use nibandh_engines::archive::{ArchiveError, ArchiveService, ArchiveStore};
use nibandh_engines::encryption::{KeyAuthority, SymmetricKey};

pub const SERVER_NAME_DEFAULT: &str = "nibandh-archive";

/// How a failed dispatch maps onto the HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    BadRequest(String),
    Internal(String),
}

impl DispatchError {
    pub fn reason(&self) -> &str {
        match self {
            Self::BadRequest(reason) | Self::Internal(reason) => reason,
        }
    }
}

impl From<ArchiveError> for DispatchError {
    fn from(value: ArchiveError) -> Self {
        match value {
            ArchiveError::BadRequest(reason) => Self::BadRequest(reason.to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}

/// Owns the archive service behind the HTTP adapter. All clock reads
/// happen here so the service itself stays deterministic.
pub struct ArchiveAdapterRuntime {
    service: ArchiveService,
}

impl ArchiveAdapterRuntime {
    pub fn new(service: ArchiveService) -> Self {
        Self { service }
    }

    /// Production construction: authority secret and archive master key
    /// both come from the environment and are both mandatory.
    pub fn default_from_env() -> Result<Self, String> {
        let authority = KeyAuthority::from_env().map_err(|e| e.to_string())?;
        let master_key_hex = env::var("NIBANDH_MASTER_KEY")
            .map_err(|_| "NIBANDH_MASTER_KEY is not configured".to_string())?;
        let master_key = SymmetricKey::from_hex(master_key_hex.trim())
            .map_err(|e| format!("NIBANDH_MASTER_KEY is invalid: {e}"))?;
        let server_name =
            env::var("NIBANDH_SERVER_NAME").unwrap_or_else(|_| SERVER_NAME_DEFAULT.to_string());
        Ok(Self::new(ArchiveService::new(
            server_name,
            authority,
            ArchiveStore::new(master_key),
        )))
    }

    pub fn dispatch(&mut self, request: &GatewayRequest) -> Result<GatewayResponse, DispatchError> {
        let now = UtcTimeMs::now();
        Ok(self.service.handle(request, now)?)
    }

    pub fn health(&self) -> HealthCheckResponse {
        self.service.health_check(UtcTimeMs::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nibandh_contracts::wire::ConflictQueryParams;

    fn runtime() -> ArchiveAdapterRuntime {
        ArchiveAdapterRuntime::new(ArchiveService::new(
            "archive-test",
            KeyAuthority::new("secret").unwrap(),
            ArchiveStore::new(SymmetricKey::generate()),
        ))
    }

    #[test]
    fn at_adapter_01_dispatch_routes_on_action() {
        let mut runtime = runtime();
        let response = runtime.dispatch(&GatewayRequest::RequestKey).unwrap();
        assert!(matches!(response, GatewayResponse::Key(_)));
        assert_eq!(runtime.health().server, "archive-test");
    }

    #[test]
    fn at_adapter_02_invalid_params_map_to_bad_request() {
        let mut runtime = runtime();
        let err = runtime
            .dispatch(&GatewayRequest::CheckConflict {
                params: ConflictQueryParams {
                    district: String::new(),
                    sro: "S1".into(),
                    volume_year: "2024".into(),
                    volume_no: "7".into(),
                    book_no: "1".into(),
                    start_page: 1,
                    end_page: 2,
                },
            })
            .unwrap_err();
        assert!(matches!(err, DispatchError::BadRequest(_)));
    }
}

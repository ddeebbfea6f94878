#![forbid(unsafe_code)]

use std::env;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use nibandh_contracts::wire::{
    ConflictQueryParams, ConflictQueryResponse, GatewayRequest, HealthCheckResponse,
    IndexWireRecord, MasterWireRecord, RequestKeyResponse, SyncAck,
};
use nibandh_contracts::UtcTimeMs;
use serde::de::DeserializeOwned;

use crate::archive::{ArchiveError, ArchiveService};

pub const GATEWAY_CONNECT_TIMEOUT_MS_DEFAULT: u64 = 3_000;
pub const GATEWAY_REQUEST_TIMEOUT_MS_DEFAULT: u64 = 10_000;

#[derive(Debug)]
pub enum GatewayError {
    Configuration(String),
    Http { status: u16, message: String },
    Transport(String),
    Encode(String),
    Decode(String),
}

impl std::fmt::Display for GatewayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Configuration(reason) => write!(f, "gateway configuration error: {reason}"),
            Self::Http { status, message } => {
                write!(f, "gateway call failed with http status {status}: {message}")
            }
            Self::Transport(reason) => write!(f, "gateway transport error: {reason}"),
            Self::Encode(reason) => write!(f, "gateway payload encode failed: {reason}"),
            Self::Decode(reason) => write!(f, "gateway response decode failed: {reason}"),
        }
    }
}

impl std::error::Error for GatewayError {}

impl From<ArchiveError> for GatewayError {
    fn from(value: ArchiveError) -> Self {
        match value {
            ArchiveError::BadRequest(reason) => GatewayError::Http {
                status: 400,
                message: reason.to_string(),
            },
            other => GatewayError::Transport(other.to_string()),
        }
    }
}

/// Endpoint set for the HTTP gateway. One URL per remote role, mirroring
/// the original's three-server deployment; a single-process deployment may
/// point all three at the same address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayHttpConfig {
    pub master_url: String,
    pub index_url: String,
    pub conflict_url: String,
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
}

impl GatewayHttpConfig {
    pub fn from_env() -> Result<Self, GatewayError> {
        let master_url = required_url_from_env("NIBANDH_MASTER_URL")?;
        let index_url = optional_url_from_env("NIBANDH_INDEX_URL").unwrap_or_else(|| master_url.clone());
        let conflict_url =
            optional_url_from_env("NIBANDH_CONFLICT_URL").unwrap_or_else(|| master_url.clone());
        Ok(Self {
            master_url,
            index_url,
            conflict_url,
            connect_timeout_ms: timeout_from_env(
                "NIBANDH_GATEWAY_CONNECT_TIMEOUT_MS",
                GATEWAY_CONNECT_TIMEOUT_MS_DEFAULT,
            ),
            request_timeout_ms: timeout_from_env(
                "NIBANDH_GATEWAY_REQUEST_TIMEOUT_MS",
                GATEWAY_REQUEST_TIMEOUT_MS_DEFAULT,
            ),
        })
    }
}

fn required_url_from_env(name: &'static str) -> Result<String, GatewayError> {
    optional_url_from_env(name)
        .ok_or_else(|| GatewayError::Configuration(format!("{name} is not set")))
}

fn optional_url_from_env(name: &str) -> Option<String> {
    env::var(name).ok().and_then(|v| {
        let trimmed = v.trim().to_string();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed)
        }
    })
}

fn timeout_from_env(name: &str, default_ms: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|v| (100..=120_000).contains(v))
        .unwrap_or(default_ms)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerHealth {
    Online,
    Error,
    Offline,
}

impl ServerHealth {
    pub fn as_str(self) -> &'static str {
        match self {
            ServerHealth::Online => "online",
            ServerHealth::Error => "error",
            ServerHealth::Offline => "offline",
        }
    }
}

/// Remote gateway client. `Http` is the production runtime; `InProcess`
/// serves tests and single-process deployments against an owned archive
/// service; `AlwaysFail` induces transport failures in tests.
#[derive(Debug, Clone)]
pub enum RegistryGateway {
    Http(GatewayHttpConfig),
    InProcess(Arc<Mutex<ArchiveService>>),
    AlwaysFail { message: String },
}

impl RegistryGateway {
    pub fn in_process(service: ArchiveService) -> Self {
        Self::InProcess(Arc::new(Mutex::new(service)))
    }

    #[cfg(test)]
    pub fn always_fail_for_tests(message: &str) -> Self {
        Self::AlwaysFail {
            message: message.to_string(),
        }
    }

    pub fn issue_key(&self) -> Result<RequestKeyResponse, GatewayError> {
        match self {
            Self::Http(config) => post_json(
                config,
                &config.master_url,
                &GatewayRequest::RequestKey,
            ),
            Self::InProcess(service) => {
                let service = lock_service(service)?;
                let issued = service.request_key();
                Ok(RequestKeyResponse {
                    encryption_key: issued.encryption_key,
                    session_id: issued.session_token,
                })
            }
            Self::AlwaysFail { message } => Err(GatewayError::Transport(message.clone())),
        }
    }

    pub fn push_master(
        &self,
        records: Vec<MasterWireRecord>,
        now: UtcTimeMs,
    ) -> Result<SyncAck, GatewayError> {
        match self {
            Self::Http(config) => post_json(
                config,
                &config.master_url,
                &GatewayRequest::SyncMaster { records },
            ),
            Self::InProcess(service) => {
                let mut service = lock_service(service)?;
                Ok(service.sync_master(&records, now)?)
            }
            Self::AlwaysFail { message } => Err(GatewayError::Transport(message.clone())),
        }
    }

    pub fn push_index(
        &self,
        records: Vec<IndexWireRecord>,
        now: UtcTimeMs,
    ) -> Result<SyncAck, GatewayError> {
        match self {
            Self::Http(config) => post_json(
                config,
                &config.index_url,
                &GatewayRequest::SyncIndex { records },
            ),
            Self::InProcess(service) => {
                let mut service = lock_service(service)?;
                Ok(service.sync_index(&records, now)?)
            }
            Self::AlwaysFail { message } => Err(GatewayError::Transport(message.clone())),
        }
    }

    pub fn query_conflict(
        &self,
        params: ConflictQueryParams,
        now: UtcTimeMs,
    ) -> Result<ConflictQueryResponse, GatewayError> {
        match self {
            Self::Http(config) => post_json(
                config,
                &config.conflict_url,
                &GatewayRequest::CheckConflict { params },
            ),
            Self::InProcess(service) => {
                let mut service = lock_service(service)?;
                Ok(service.check_conflict(&params, now)?)
            }
            Self::AlwaysFail { message } => Err(GatewayError::Transport(message.clone())),
        }
    }

    /// Liveness fan-out across every configured endpoint.
    pub fn check_health(&self, now: UtcTimeMs) -> Vec<(String, ServerHealth)> {
        match self {
            Self::Http(config) => {
                let mut probes = vec![("master".to_string(), config.master_url.clone())];
                if config.index_url != config.master_url {
                    probes.push(("index".to_string(), config.index_url.clone()));
                }
                if config.conflict_url != config.master_url
                    && config.conflict_url != config.index_url
                {
                    probes.push(("conflict".to_string(), config.conflict_url.clone()));
                }
                probes
                    .into_iter()
                    .map(|(name, url)| {
                        let health = match post_json::<HealthCheckResponse>(
                            config,
                            &url,
                            &GatewayRequest::HealthCheck,
                        ) {
                            Ok(resp) if resp.status == "ok" => ServerHealth::Online,
                            Ok(_) | Err(GatewayError::Http { .. }) => ServerHealth::Error,
                            Err(_) => ServerHealth::Offline,
                        };
                        (name, health)
                    })
                    .collect()
            }
            Self::InProcess(service) => match lock_service(service) {
                Ok(service) => {
                    let health = service.health_check(now);
                    vec![(health.server, ServerHealth::Online)]
                }
                Err(_) => vec![("archive".to_string(), ServerHealth::Error)],
            },
            Self::AlwaysFail { .. } => vec![("archive".to_string(), ServerHealth::Offline)],
        }
    }
}

fn lock_service(
    service: &Arc<Mutex<ArchiveService>>,
) -> Result<std::sync::MutexGuard<'_, ArchiveService>, GatewayError> {
    service
        .lock()
        .map_err(|_| GatewayError::Transport("archive service lock poisoned".to_string()))
}

fn post_json<T: DeserializeOwned>(
    config: &GatewayHttpConfig,
    url: &str,
    request: &GatewayRequest,
) -> Result<T, GatewayError> {
    let payload =
        serde_json::to_string(request).map_err(|err| GatewayError::Encode(err.to_string()))?;
    let agent = ureq::AgentBuilder::new()
        .timeout_connect(Duration::from_millis(config.connect_timeout_ms))
        .timeout_read(Duration::from_millis(config.request_timeout_ms))
        .timeout_write(Duration::from_millis(config.request_timeout_ms))
        .build();
    match agent
        .post(url)
        .set("content-type", "application/json")
        .send_string(&payload)
    {
        Ok(resp) => resp
            .into_json::<T>()
            .map_err(|err| GatewayError::Decode(err.to_string())),
        Err(ureq::Error::Status(status, resp)) => {
            let message = resp.into_string().unwrap_or_default();
            Err(GatewayError::Http { status, message })
        }
        Err(ureq::Error::Transport(err)) => Err(GatewayError::Transport(err.to_string())),
    }
}

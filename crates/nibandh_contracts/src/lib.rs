#![forbid(unsafe_code)]

pub mod common;
pub mod conflict;
pub mod record;
pub mod wire;

pub use common::{ContractViolation, SchemaVersion, UtcTimeMs, Validate};

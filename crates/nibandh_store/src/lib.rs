#![forbid(unsafe_code)]

pub mod store;

pub use store::{IndexFilter, MasterFilter, RecordStore, StorageError};

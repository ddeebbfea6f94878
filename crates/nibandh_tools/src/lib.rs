#![forbid(unsafe_code)]

pub mod sync_cli;

#![forbid(unsafe_code)]

pub mod archive;
pub mod encryption;
pub mod gateway;

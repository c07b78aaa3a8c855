//! Shared pieces of the postrider binary: configuration loading and the
//! file-backed pool store.

pub mod config;
pub mod store;

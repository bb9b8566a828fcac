//! Core library for the config protector daemon.
//!
//! Everything that touches the protected file or its backups lives here:
//! integrity classification, the snapshot store with rotation, the
//! table-driven truncation policy, the atomic-write primitive shared by every
//! writer, and the durable line-oriented log that external dashboards tail.

pub mod atomic;
pub mod backup;
pub mod error;
pub mod integrity;
pub mod log;
pub mod paths;
pub mod settings;
pub mod truncate;

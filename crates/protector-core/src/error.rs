//! Error taxonomy for corrective actions.
//!
//! `Parse` routes a cycle into recovery, `NoValidBackup` routes recovery into
//! quarantine, `Verification` is an invariant violation that is logged and
//! never crashes the daemon. Plain I/O failures abandon the current cycle;
//! the next trigger retries.

#[derive(Debug, thiserror::Error)]
pub enum ProtectError {
    #[error("document is not well-formed JSON: {0}")]
    Parse(String),
    #[error("no valid snapshot available for recovery")]
    NoValidBackup,
    #[error("rewritten target failed re-parse verification: {0}")]
    Verification(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

//! Failure taxonomy for the backup pipeline.
//!
//! Only the hard-failure stages appear here. Upload and retention problems
//! are tolerated by contract: they are logged where they happen and never
//! surface as a run failure.

#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    #[error("database unreachable: {0}")]
    Unreachable(String),

    #[error("dump failed: {0}")]
    Dump(String),

    #[error("compression failed: {0}")]
    Compress(String),

    #[error("archive staging failed: {0}")]
    Io(#[from] std::io::Error),
}

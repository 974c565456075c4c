use thiserror::Error;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("invalid partition date {value}: {reason}")]
    DateParse { value: String, reason: String },
    #[error("listing failed for {prefix}: {reason}")]
    Listing { prefix: String, reason: String },
    #[error("archive failed for {prefix}: {reason}")]
    ArchiveFailed { prefix: String, reason: String },
    #[error("delete failed for {prefix}: {reason}")]
    DeleteFailed { prefix: String, reason: String },
    #[error("ledger write failed for {key} in {path}: {reason}")]
    LedgerWrite {
        path: String,
        key: String,
        reason: String,
    },
    #[error("invalid path key: {0}")]
    InvalidPathKey(String),
    #[error("ledger lease already held: {0}")]
    LeaseHeld(String),
    #[error("config invalid or unreadable: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarnCode {
    LedgerWriteFailed,
    DeleteFailed,
    ArchiveFailed,
    ListingFailed,
    DateParse,
    LedgerLineMalformed,
    InvalidPartition,
}

impl WarnCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LedgerWriteFailed => "LEDGER_WRITE_FAILED",
            Self::DeleteFailed => "DELETE_FAILED",
            Self::ArchiveFailed => "ARCHIVE_FAILED",
            Self::ListingFailed => "LISTING_FAILED",
            Self::DateParse => "DATE_PARSE",
            Self::LedgerLineMalformed => "LEDGER_LINE_MALFORMED",
            Self::InvalidPartition => "INVALID_PARTITION",
        }
    }
}

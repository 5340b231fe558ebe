//! Error types for the Wax engine

use thiserror::Error;

pub type Result<T> = std::result::Result<T, WaxError>;

/// Which header page (or both) failed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderPage {
    A,
    B,
    Both,
}

impl std::fmt::Display for HeaderPage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HeaderPage::A => write!(f, "A"),
            HeaderPage::B => write!(f, "B"),
            HeaderPage::Both => write!(f, "both"),
        }
    }
}

#[derive(Error, Debug)]
pub enum WaxError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("io: {0}")]
    IoMsg(String),

    #[error("corrupted_header: page {0} failed validation")]
    CorruptedHeader(HeaderPage),

    #[error("invalid_footer: {0}")]
    InvalidFooter(String),

    #[error("invalid_toc: {0}")]
    InvalidToc(String),

    #[error("invalid_segment: {kind}: {reason}")]
    InvalidSegment { kind: &'static str, reason: String },

    #[error("wal_torn: replay stopped at seq {0}")]
    WalTorn(u64),

    #[error("encoding_error: {0}")]
    Encoding(String),

    #[error("locked: another process owns the exclusive lock")]
    Locked,

    #[error("cancelled")]
    Cancelled,
}

impl WaxError {
    /// Convenience constructor for string-typed io failures.
    pub fn io(reason: impl Into<String>) -> Self {
        WaxError::IoMsg(reason.into())
    }

    /// Stable machine-parsable error code.
    pub fn code(&self) -> &'static str {
        match self {
            WaxError::Io(_) | WaxError::IoMsg(_) => "IO",
            WaxError::CorruptedHeader(_) => "CORRUPTED_HEADER",
            WaxError::InvalidFooter(_) => "INVALID_FOOTER",
            WaxError::InvalidToc(_) => "INVALID_TOC",
            WaxError::InvalidSegment { .. } => "INVALID_SEGMENT",
            WaxError::WalTorn(_) => "WAL_TORN",
            WaxError::Encoding(_) => "ENCODING_ERROR",
            WaxError::Locked => "LOCKED",
            WaxError::Cancelled => "CANCELLED",
        }
    }

    /// Whether the error signals on-disk corruption (as opposed to a
    /// transient or caller-side failure).
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            WaxError::CorruptedHeader(_)
                | WaxError::InvalidFooter(_)
                | WaxError::InvalidToc(_)
                | WaxError::InvalidSegment { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_stable() {
        assert_eq!(WaxError::Locked.code(), "LOCKED");
        assert_eq!(WaxError::WalTorn(7).code(), "WAL_TORN");
        assert_eq!(
            WaxError::InvalidToc("hash mismatch".into()).code(),
            "INVALID_TOC"
        );
    }

    #[test]
    fn test_messages_carry_prefix() {
        let err = WaxError::InvalidFooter("no candidate within 32 MiB".into());
        assert!(err.to_string().starts_with("invalid_footer:"));

        let err = WaxError::CorruptedHeader(HeaderPage::Both);
        assert!(err.to_string().contains("both"));
    }

    #[test]
    fn test_corruption_classification() {
        assert!(WaxError::InvalidToc("x".into()).is_corruption());
        assert!(!WaxError::Locked.is_corruption());
        assert!(!WaxError::io("disk full").is_corruption());
    }
}

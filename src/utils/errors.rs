use thiserror::Error;

use crate::types::{DocumentId, PageId};

#[derive(Debug, Error)]
pub enum DbError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("stream does not contain a database (magic mismatch)")]
    NotADatabase,

    #[error("database truncated: {0} bytes is shorter than the mandatory metadata pages")]
    TruncatedDatabase(u64),

    #[error("page {0} failed CRC validation")]
    CorruptPage(PageId),

    #[error("page chain loops back through page {0}")]
    ChainLoop(PageId),

    #[error("document already indexed: {0}")]
    DuplicateDocument(DocumentId),

    #[error("refusing to write an empty document")]
    EmptyPayload,

    #[error("document exceeds the maximum chain length of 65536 pages")]
    DocumentTooLarge,

    #[error("underlying stream rejected a write (read-only)")]
    ReadOnlyStream,

    #[error("root metadata link yields no valid page")]
    DamagedMetadata,

    #[error("invalid page id: {0}")]
    InvalidPageId(PageId),

    #[error("invalid document id: {0}")]
    InvalidDocumentId(DocumentId),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("path index is full")]
    PathIndexFull,
}

impl DbError {
    /// Translate a write failure from the host stream. Streams that refuse
    /// writes signal `PermissionDenied`, which the engine surfaces as
    /// `ReadOnlyStream`.
    #[must_use]
    pub(crate) fn from_write(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::PermissionDenied {
            Self::ReadOnlyStream
        } else {
            Self::Io(err)
        }
    }

    /// True for the corruption family a reader may recover from by falling
    /// back to the previous link revision.
    #[must_use]
    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::CorruptPage(_) | Self::ChainLoop(_))
    }
}

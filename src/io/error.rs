//! Errors that can occur when interacting with visibility stores.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
/// All the errors that can occur reading from or writing to a store.
pub enum IOError {
    /// A generic filesystem error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The store's metadata header could not be encoded or decoded.
    #[error("bad metadata header: {0}")]
    Json(#[from] serde_json::Error),

    /// Refusing to clobber an existing file.
    #[error("attempted to create {path}, which already exists. Use overwrite to proceed")]
    ExistingFile {
        /// The offending path.
        path: PathBuf,
    },

    /// The file is not a recognisable store.
    #[error("{path} is not a valid visibility store: {reason}")]
    InvalidStore {
        /// The offending path.
        path: PathBuf,
        /// What was wrong with it.
        reason: String,
    },

    /// A chunk's shape does not match the selection it is written to.
    #[error("chunk shape {received} does not match the resolved selection shape {expected}")]
    BadChunkShape {
        /// Shape the selection resolves to.
        expected: String,
        /// Shape the chunk actually has.
        received: String,
    },

    /// A chunk's axis values disagree with the store's.
    #[error("chunk metadata does not match the store: {reason}")]
    MetadataMismatch {
        /// What disagreed.
        reason: String,
    },

    /// Bulk I/O was requested on a metadata-only object.
    #[error("object has no bulk arrays to write")]
    MetadataOnly,

    /// The store was used after being finalized.
    #[error("store has been finalized; no further writes are possible")]
    Finalized,
}

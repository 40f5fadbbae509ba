//! Error types for KarstDB.

use thiserror::Error;

/// Result type alias using KarstError.
pub type Result<T> = std::result::Result<T, KarstError>;

/// Errors that can occur in KarstDB operations.
#[derive(Debug, Error)]
pub enum KarstError {
    // I/O and file errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("File already exists: {0}")]
    FileExists(String),

    #[error("Page {page_num} does not exist in file {file_id}")]
    PageNotFound { file_id: u32, page_num: u32 },

    // Buffer pool errors
    #[error("Buffer pool full, unable to allocate frame")]
    BufferPoolFull,

    // Heap file errors
    #[error("Page full, unable to insert record")]
    PageFull,

    #[error("Record not found: {0}")]
    RecordNotFound(String),

    #[error("End of file reached")]
    EndOfFile,

    // Index errors
    #[error("Index metadata mismatch: {0}")]
    BadIndexInfo(String),

    #[error("Unsupported attribute type: {0}")]
    UnsupportedType(String),

    // Scan errors
    #[error("Invalid scan operators")]
    BadOpcodes,

    #[error("Invalid scan range: low bound exceeds high bound")]
    BadScanRange,

    #[error("No key found in the scan range")]
    NoSuchKey,

    #[error("No scan has been initialized")]
    ScanNotInitialized,

    #[error("Scan has reached the end of the range")]
    ScanCompleted,

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

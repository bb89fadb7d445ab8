//! Error types for the latch persistence engine.

use thiserror::Error;

/// The main error type for all latch operations.
///
/// This enum covers the error conditions that can occur from table creation
/// through runtime reads, writes, and shutdown.
#[derive(Error, Debug)]
pub enum LatchError {
    /// Error in the record table (open, I/O, capacity).
    #[error("table error: {0}")]
    Table(#[from] TableError),

    /// Error preparing or repairing the storage directory tree.
    #[error("layout error: {0}")]
    Layout(#[from] LayoutError),

    /// Failed to serialize a stored value to its record form.
    #[error("failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Errors that can occur in the memory-mapped record table.
#[derive(Error, Debug)]
pub enum TableError {
    /// Failed to read or open the table file.
    #[error("failed to read table '{path}': {source}")]
    ReadFailed {
        /// The table file path.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to create or write the table file.
    #[error("failed to write table '{path}': {source}")]
    WriteFailed {
        /// The table file path.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to sync the table file to disk.
    #[error("failed to sync table '{path}' to disk: {source}")]
    SyncFailed {
        /// The table file path.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Memory mapping failed.
    #[error("memory mapping failed for table '{path}': {source}")]
    MemoryMap {
        /// The table file path.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The table file exists but is structurally invalid.
    ///
    /// Returned instead of silently discarding existing data; callers may
    /// quarantine the file and reopen fresh (see
    /// [`StorageLayout::quarantine`](crate::layout::StorageLayout::quarantine)).
    #[error("table '{path}' is corrupted: {reason}")]
    Corrupted {
        /// The table file path.
        path: String,
        /// Description of the corruption.
        reason: String,
    },

    /// The declared capacity parameters produce an unusable geometry.
    #[error("invalid table geometry: {reason}")]
    InvalidGeometry {
        /// Why the parameters were rejected.
        reason: String,
    },

    /// A key plus its record does not fit the fixed slot payload.
    ///
    /// The slot payload is sized from the average key size declared at open
    /// time; this is the documented limit for oversized entries.
    #[error("record for key '{key}' needs {needed} bytes, slot capacity is {capacity}")]
    RecordTooLarge {
        /// The key that was being stored.
        key: String,
        /// Bytes required for key + record.
        needed: usize,
        /// Payload bytes available per slot.
        capacity: usize,
    },

    /// The table has no free slot for a new key.
    #[error("table is full ({capacity} entries)")]
    TableFull {
        /// The maximum number of entries.
        capacity: u64,
    },
}

/// Errors that can occur while managing the storage directory tree.
#[derive(Error, Debug)]
pub enum LayoutError {
    /// A directory in the storage tree could not be created or accessed.
    #[error("failed to create storage directory '{path}': {source}")]
    CreateFailed {
        /// The directory that could not be created.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A corrupt file could not be moved into the backup directory.
    #[error("failed to quarantine '{path}': {source}")]
    QuarantineFailed {
        /// The file that could not be moved.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Type alias for `Result<T, LatchError>`.
pub type Result<T> = std::result::Result<T, LatchError>;

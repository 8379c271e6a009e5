/*!
 *! # BLite
 *! BLite is an embeddable single-file document database. This crate is the
 *! storage kernel: the paged file format, the write-ahead log and its
 *! committed-write index, the slotted page / overflow-chain record layout,
 *! the B-tree secondary-index engine, and the MVCC-style transaction
 *! manager that ties them together.
 *!
 *! Everything above this layer — BSON object mapping, query planning,
 *! filters, vector/spatial indexes, schema registries — is a collaborator
 *! that depends on this crate without being part of it.
 */

#![allow(dead_code)]
#![allow(clippy::too_many_arguments)]

use std::fmt;

#[macro_use]
mod utils;
pub mod config;
pub mod engine;
pub mod key;

pub use config::{EngineConfig, FsyncPolicy};

pub type Result<T> = std::result::Result<T, Error>;

/// The error taxonomy surfaced at the kernel boundary (spec §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Wrong magic, mismatched page size, unsupported version. Fatal at open.
    IncompatibleFile,
    /// Non-tail CRC mismatch or record truncation in the WAL. Fatal at open.
    WalCorrupt,
    /// A structural invariant was violated mid-operation on a page.
    PageCorrupt,
    /// A structural invariant was violated mid-operation on a B-tree page.
    IndexCorrupt,
    /// Insert into a unique index hit an existing key.
    DuplicateKey,
    /// Read of a deallocated page or missing slot.
    NotFound,
    /// Allocation failed because the file reached a configured hard cap.
    OutOfSpace,
    /// A commit failed; the transaction was rolled back automatically.
    TransactionAborted,
    /// A cancellation signal fired at an async suspension point.
    Cancelled,
    /// A cursor operation was attempted while positioned past-the-end.
    InvalidState,
    /// Anything else (config validation, I/O, UTF-8, ...).
    Other,
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: String,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn new(kind: ErrorKind, message: impl fmt::Display) -> Self {
        Error {
            kind,
            message: message.to_string(),
        }
    }

    pub(crate) fn incompatible_file(message: impl fmt::Display) -> Self {
        Self::new(ErrorKind::IncompatibleFile, message)
    }

    pub(crate) fn wal_corrupt(message: impl fmt::Display) -> Self {
        Self::new(ErrorKind::WalCorrupt, message)
    }

    pub(crate) fn page_corrupt(message: impl fmt::Display) -> Self {
        Self::new(ErrorKind::PageCorrupt, message)
    }

    pub(crate) fn index_corrupt(message: impl fmt::Display) -> Self {
        Self::new(ErrorKind::IndexCorrupt, message)
    }

    pub(crate) fn duplicate_key(index: &str, key: &key::IndexKey) -> Self {
        Self::new(
            ErrorKind::DuplicateKey,
            format!("duplicate key in index {index}: {key:?}"),
        )
    }

    pub(crate) fn not_found(message: impl fmt::Display) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub(crate) fn out_of_space(message: impl fmt::Display) -> Self {
        Self::new(ErrorKind::OutOfSpace, message)
    }

    pub(crate) fn transaction_aborted(message: impl fmt::Display) -> Self {
        Self::new(ErrorKind::TransactionAborted, message)
    }

    pub(crate) fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "operation cancelled")
    }

    pub(crate) fn invalid_state(message: impl fmt::Display) -> Self {
        Self::new(ErrorKind::InvalidState, message)
    }

    pub(crate) fn other(message: impl fmt::Display) -> Self {
        Self::new(ErrorKind::Other, message)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::new(ErrorKind::Other, err)
    }
}

impl From<std::string::FromUtf8Error> for Error {
    fn from(err: std::string::FromUtf8Error) -> Self {
        Error::new(ErrorKind::Other, err)
    }
}

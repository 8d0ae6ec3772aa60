//! Error types that can be emitted from this library

use miette::Diagnostic;
use thiserror::Error;

/// Error type for library
#[derive(Error, Diagnostic, Debug)]
pub enum Error {
    /// Transparent wrapper for [`std::io::Error`]
    #[error(transparent)]
    IOError(#[from] std::io::Error),

    /// Transparent wrapper for [`binrw::Error`]
    #[error(transparent)]
    BinRWError(#[from] binrw::Error),

    /// file is an invalid rez archive
    #[error("file is an invalid rez archive")]
    InvalidArchive,

    /// unable to find requested resource
    #[error("unable to find requested resource")]
    ResourceNotFound(#[from] ResourceNotFoundError),

    /// no decompressor logged for a codec slot
    #[error("no decompressor logged for codec slot {0}")]
    MissingCodec(u8),

    /// the decoder reported a malformed compressed stream
    #[error("compressed data is corrupt")]
    Corrupt,

    /// the entry has no archive data and no external file
    #[error("resource {0} has no backing data")]
    NoBackingData(u32),

    /// the handle memory manager failed an allocation
    #[error("handle allocation of {0} bytes failed")]
    OutOfMemory(usize),

    /// the caller's buffer was smaller than the resource
    #[error("buffer of {buffer} bytes is too small, resource is {needed} bytes")]
    Truncated {
        /// Size of the resource in bytes
        needed: usize,
        /// Size of the caller's buffer in bytes
        buffer: usize,
    },
}

/// Error type to provide further information when a resource has not been found
#[derive(Error, Diagnostic, Debug)]
#[error("unable to find requested resource")]
pub enum ResourceNotFoundError {
    /// with number {0}
    #[error("with number {0}")]
    Number(u32),
}

/// Generic result type with crate's Error as its error variant
pub type Result<T> = core::result::Result<T, Error>;

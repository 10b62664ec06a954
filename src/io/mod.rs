//! Reading and writing visibility stores.
//!
//! The traits here are the streaming contract: a reader can surface a
//! metadata-only dataset describing a store's full shape, then serve any
//! selection of it; a writer accepts chunks addressed by the same selection
//! descriptors, in any order, against a store whose metadata was fixed at
//! creation.

pub mod binfile;
pub mod error;

pub use binfile::BinFile;
pub use error::IOError;

use crate::{dataset::UVData, selection::SelDescriptor, UVDataError};

/// A source of visibility data that supports partial reads.
pub trait VisRead {
    /// The store's full metadata, with no bulk arrays.
    ///
    /// # Errors
    ///
    /// Can error for format-specific reasons.
    fn read_metadata(&mut self) -> Result<UVData, UVDataError>;

    /// Read the subset a descriptor selects, as a self-consistent dataset.
    ///
    /// # Errors
    ///
    /// Selection errors from resolving `desc` against the store's
    /// metadata, or I/O errors.
    fn read_part(&mut self, desc: &SelDescriptor) -> Result<UVData, UVDataError>;
}

/// A sink for visibility data that supports out-of-order partial writes.
pub trait VisWrite {
    /// Write a chunk's bulk arrays to the region a descriptor selects.
    ///
    /// # Errors
    ///
    /// Selection errors from resolving `desc`, shape mismatches between
    /// the chunk and the resolved region, or I/O errors.
    fn write_part(&mut self, chunk: &UVData, desc: &SelDescriptor) -> Result<(), UVDataError>;

    /// Flush everything and close the store for writing.
    ///
    /// # Errors
    ///
    /// I/O errors from the final flush.
    fn finalize(&mut self) -> Result<(), UVDataError>;
}

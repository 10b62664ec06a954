//! The crate's error type, aggregating the per-engine errors.

use thiserror::Error;

use crate::{
    concat::ConcatError, io::error::IOError, redundancy::RedundancyError,
    selection::SelectionError,
};

#[derive(Error, Debug)]
/// Anything that can go wrong manipulating a dataset.
pub enum UVDataError {
    /// An error resolving or applying a selection.
    #[error(transparent)]
    Selection(#[from] SelectionError),

    /// An error combining two datasets.
    #[error(transparent)]
    Concat(#[from] ConcatError),

    /// An error grouping baselines by redundancy.
    #[error(transparent)]
    Redundancy(#[from] RedundancyError),

    /// An error reading or writing a store.
    #[error(transparent)]
    Io(#[from] IOError),

    /// An array does not have its expected shape.
    #[error("bad array shape supplied to argument {argument} of {function}. expected {expected}, received {received}")]
    BadArrayShape {
        /// The argument with the bad shape.
        argument: String,
        /// The function it was supplied to.
        function: String,
        /// The expected shape.
        expected: String,
        /// The shape actually received.
        received: String,
    },

    /// A metadata field is inconsistent with the arrays it describes.
    #[error("invalid metadata in {field}: {reason}")]
    InvalidMetadata {
        /// The offending field.
        field: String,
        /// How it is inconsistent.
        reason: String,
    },

    /// The telescope has more antennas than the baseline encoding supports.
    #[error("the baseline encoding supports at most 2048 antennas, got {nants}")]
    TooManyAntennas {
        /// The offending antenna count.
        nants: usize,
    },

    /// A polarization name or code is not recognised.
    #[error("unrecognised polarization {pol}")]
    UnknownPolarization {
        /// The offending name or code.
        pol: String,
    },
}

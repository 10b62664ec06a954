#![warn(missing_docs)]
#![warn(clippy::missing_safety_doc)]
#![warn(clippy::missing_errors_doc)]

//! uvdata is a library for manipulating radio-interferometric visibility
//! datasets in memory: selecting subsets of the baseline-time, frequency and
//! polarization axes, combining datasets, grouping redundant baselines, and
//! reading or writing stores in independently-addressable chunks.
//!
//! # Examples
//!
//! Here's an example of building a selection descriptor for the first 32
//! channels of the XX polarization:
//!
//! ```rust
//! use uvdata::{pol_str_to_num, AxisSelection, SelDescriptor};
//!
//! let desc = SelDescriptor {
//!     freq_chans: Some(AxisSelection::Range { start: 0, end: 32 }),
//!     polarizations: Some(vec![pol_str_to_num("xx").unwrap()]),
//!     ..SelDescriptor::default()
//! };
//! assert_eq!(desc.polarizations, Some(vec![-5]));
//!
//! // descriptors are serializable, so they can be logged and replayed
//! let json = serde_json::to_string(&desc).unwrap();
//! assert_eq!(serde_json::from_str::<SelDescriptor>(&json).unwrap(), desc);
//! ```
//!
//! The same descriptor drives [`UVData::select`] against an in-memory
//! dataset and [`io::VisRead::read_part`] / [`io::VisWrite::write_part`]
//! against a store on disk.
//!
//! # Details
//!
//! Angles, positions and array types come from [`Marlu`], whose `ndarray`
//! re-export is in turn re-exported here.
//!
//! [`Marlu`]: https://github.com/MWATelescope/Marlu

pub mod ant_str;
pub mod concat;
pub mod dataset;
mod error;
pub mod io;
pub mod redundancy;
pub mod selection;
pub mod types;

#[cfg(test)]
pub(crate) mod test_common;

pub use concat::{check_compatibility, ConcatAxis, ConcatError};
pub use dataset::{UVData, UVMeta, UVMetaBuilder};
pub use error::UVDataError;
pub use io::{BinFile, IOError, VisRead, VisWrite};
pub use redundancy::{
    cluster_vectors, redundant_groups_from_antpos, RedundancyError, RedundantGroups,
};
pub use selection::{
    resolve_axis, resolve_selection, AxisSelection, ResolvedSelection, SelDescriptor,
    SelectionError,
};
pub use types::{
    antnums_to_baseline, baseline_to_antnums, pol_num_to_str, pol_str_to_num, PhaseType, MAX_ANTS,
};

pub use marlu;
pub use marlu::ndarray;

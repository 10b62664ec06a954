//! The in-memory dataset: axis-correlated bulk arrays plus consistent
//! metadata.
//!
//! A [`UVData`] holds one visibility dataset: per-row (baseline-time) arrays,
//! per-frequency and per-polarization arrays, the antenna table, and the bulk
//! `(nblts, nfreqs, npols)` data/flag/nsample cubes. The bulk arrays are
//! optional so that a metadata-only load (or a store that has been
//! initialized but not read) is representable; every count scalar always
//! reflects the *full* intended shape.

use std::collections::HashSet;

use derive_builder::Builder;
use itertools::Itertools;
use marlu::{
    ndarray::Array3,
    Complex, LatLngHeight, XyzGeodetic, UVW,
};

use crate::{
    types::{antnums_to_baseline, PhaseType},
    UVDataError,
};

/// Scalar and object metadata shared by every operation on a dataset.
///
/// Counts are authoritative: bulk arrays must match them exactly, which is
/// what lets a metadata-only object describe a store's full shape before any
/// bulk array exists in memory.
#[derive(Builder, Debug, Clone)]
#[builder(default)]
pub struct UVMeta {
    /// Number of distinct times.
    pub ntimes: usize,
    /// Number of distinct baselines.
    pub nbls: usize,
    /// Number of baseline-times (rows). Not necessarily `ntimes * nbls`:
    /// baselines need not all share every time.
    pub nblts: usize,
    /// Number of spectral windows.
    pub nspws: usize,
    /// Number of frequency channels.
    pub nfreqs: usize,
    /// Number of polarizations.
    pub npols: usize,
    /// Number of antennas with data present.
    pub nants_data: usize,
    /// Number of antennas in the array; may exceed `nants_data`.
    pub nants_telescope: usize,
    /// Name of the telescope.
    pub telescope_name: String,
    /// Receiver or backend.
    pub instrument: String,
    /// Source or field observed.
    pub object_name: String,
    /// Visibility units, e.g. "uncalib", "Jy".
    pub vis_units: String,
    /// Free-text provenance.
    pub history: String,
    /// Length of an integration in seconds.
    pub integration_time: f64,
    /// Width of a frequency channel in Hz.
    pub channel_width: f64,
    /// Instrument location.
    pub array_pos: LatLngHeight,
    /// Phase state of the data.
    pub phase: PhaseType,
}

impl Default for UVMeta {
    fn default() -> Self {
        Self {
            ntimes: 0,
            nbls: 0,
            nblts: 0,
            nspws: 0,
            nfreqs: 0,
            npols: 0,
            nants_data: 0,
            nants_telescope: 0,
            telescope_name: String::new(),
            instrument: String::new(),
            object_name: String::new(),
            vis_units: String::new(),
            history: String::new(),
            integration_time: 0.,
            channel_width: 0.,
            array_pos: LatLngHeight {
                longitude_rad: 0.,
                latitude_rad: 0.,
                height_metres: 0.,
            },
            phase: PhaseType::Drift,
        }
    }
}

/// A visibility dataset: metadata, axis arrays and (optionally) bulk arrays.
///
/// Constructed empty (or via a format driver), then mutated in place or
/// copied by the selection, concatenation and redundancy operations.
#[derive(Debug, Default, Clone)]
pub struct UVData {
    /// Scalar/object metadata.
    pub meta: UVMeta,
    /// Time stamp of each row, Julian Date.
    pub time_array: Vec<f64>,
    /// First antenna *index* (into the antenna table) of each row.
    pub ant_1_array: Vec<usize>,
    /// Second antenna index of each row.
    pub ant_2_array: Vec<usize>,
    /// Baseline index of each row; a pure function of the antenna pair,
    /// recomputed by [`UVData::recompute_baselines`], never ground truth.
    pub baseline_array: Vec<u64>,
    /// Baseline vector of each row, metres.
    pub uvw_array: Vec<UVW>,
    /// Frequency of each channel, Hz.
    pub freq_array: Vec<f64>,
    /// Spectral-window membership of each channel.
    pub spw_array: Vec<usize>,
    /// AIPS polarization code of each polarization.
    pub polarization_array: Vec<i32>,
    /// Antenna numbers, length `nants_telescope`.
    pub antenna_numbers: Vec<usize>,
    /// Antenna names, length `nants_telescope`.
    pub antenna_names: Vec<String>,
    /// Antenna positions, length `nants_telescope`.
    pub antenna_positions: Vec<XyzGeodetic>,
    /// Primary complex data, shape `(nblts, nfreqs, npols)`; `None` when
    /// metadata-only.
    pub data: Option<Array3<Complex<f32>>>,
    /// Flags, same shape as `data`; `true` is flagged.
    pub flags: Option<Array3<bool>>,
    /// Sample-count weights, same shape as `data`.
    pub nsamples: Option<Array3<f32>>,
}

impl UVData {
    /// The expected shape of each bulk array.
    pub fn bulk_shape(&self) -> (usize, usize, usize) {
        (self.meta.nblts, self.meta.nfreqs, self.meta.npols)
    }

    /// True when no bulk arrays are present.
    pub fn is_metadata_only(&self) -> bool {
        self.data.is_none() && self.flags.is_none() && self.nsamples.is_none()
    }

    /// Position of antenna number `num` in the antenna table.
    pub fn ant_index(&self, num: usize) -> Option<usize> {
        self.antenna_numbers.iter().position(|&n| n == num)
    }

    /// Antenna numbers with at least one row of data, ascending.
    pub fn ants_with_data(&self) -> Vec<usize> {
        self.ant_1_array
            .iter()
            .chain(self.ant_2_array.iter())
            .map(|&idx| self.antenna_numbers[idx])
            .unique()
            .sorted()
            .collect()
    }

    /// Recompute `baseline_array` from the antenna-pair arrays.
    ///
    /// # Errors
    ///
    /// Returns [`UVDataError::TooManyAntennas`] when the telescope has more
    /// antennas than the encoding supports.
    pub fn recompute_baselines(&mut self) -> Result<(), UVDataError> {
        let nants = self.meta.nants_telescope;
        let mut baselines = Vec::with_capacity(self.ant_1_array.len());
        for (&a1, &a2) in self.ant_1_array.iter().zip(self.ant_2_array.iter()) {
            let n1 = self.antenna_numbers[a1];
            let n2 = self.antenna_numbers[a2];
            baselines.push(antnums_to_baseline(n1, n2, nants, false)?);
        }
        self.baseline_array = baselines;
        Ok(())
    }

    /// Recompute every derived count scalar from the axis arrays.
    pub fn sync_counts(&mut self) {
        self.meta.nblts = self.time_array.len();
        self.meta.ntimes = self
            .time_array
            .iter()
            .map(|t| t.to_bits())
            .unique()
            .count();
        self.meta.nbls = self.baseline_array.iter().unique().count();
        self.meta.nfreqs = self.freq_array.len();
        self.meta.npols = self.polarization_array.len();
        self.meta.nspws = self.spw_array.iter().unique().count();
        self.meta.nants_data = self
            .ant_1_array
            .iter()
            .chain(self.ant_2_array.iter())
            .unique()
            .count();
        self.meta.nants_telescope = self.antenna_numbers.len();
    }

    /// Validate the cross-array invariants.
    ///
    /// # Errors
    ///
    /// Returns [`UVDataError::InvalidMetadata`] naming the first violated
    /// field, or [`UVDataError::BadArrayShape`] for bulk-array shape
    /// mismatches.
    pub fn check(&self) -> Result<(), UVDataError> {
        let meta = &self.meta;
        for (name, len, expected) in [
            ("time_array", self.time_array.len(), meta.nblts),
            ("ant_1_array", self.ant_1_array.len(), meta.nblts),
            ("ant_2_array", self.ant_2_array.len(), meta.nblts),
            ("baseline_array", self.baseline_array.len(), meta.nblts),
            ("uvw_array", self.uvw_array.len(), meta.nblts),
            ("freq_array", self.freq_array.len(), meta.nfreqs),
            ("spw_array", self.spw_array.len(), meta.nfreqs),
            (
                "polarization_array",
                self.polarization_array.len(),
                meta.npols,
            ),
            (
                "antenna_numbers",
                self.antenna_numbers.len(),
                meta.nants_telescope,
            ),
            (
                "antenna_names",
                self.antenna_names.len(),
                meta.nants_telescope,
            ),
            (
                "antenna_positions",
                self.antenna_positions.len(),
                meta.nants_telescope,
            ),
        ] {
            if len != expected {
                return Err(UVDataError::InvalidMetadata {
                    field: name.to_string(),
                    reason: format!("length {} does not match count {}", len, expected),
                });
            }
        }

        let shape = self.bulk_shape();
        for (name, dim) in [
            ("data", self.data.as_ref().map(|a| a.dim())),
            ("flags", self.flags.as_ref().map(|a| a.dim())),
            ("nsamples", self.nsamples.as_ref().map(|a| a.dim())),
        ] {
            if let Some(dim) = dim {
                if dim != shape {
                    return Err(UVDataError::BadArrayShape {
                        argument: name.to_string(),
                        function: "UVData::check".to_string(),
                        expected: format!("{:?}", shape),
                        received: format!("{:?}", dim),
                    });
                }
            }
        }

        // every row must reference antennas present in the table
        let nants = self.antenna_numbers.len();
        if let Some(&bad) = self
            .ant_1_array
            .iter()
            .chain(self.ant_2_array.iter())
            .find(|&&idx| idx >= nants)
        {
            return Err(UVDataError::InvalidMetadata {
                field: "ant_1_array/ant_2_array".to_string(),
                reason: format!(
                    "antenna index {} out of range for a {}-antenna table",
                    bad, nants
                ),
            });
        }

        // polarization codes must be unique and recognised
        let mut seen = HashSet::new();
        for &pol in &self.polarization_array {
            if !(-8..=4).contains(&pol) || pol == 0 {
                return Err(UVDataError::InvalidMetadata {
                    field: "polarization_array".to_string(),
                    reason: format!("unrecognised polarization code {}", pol),
                });
            }
            if !seen.insert(pol) {
                return Err(UVDataError::InvalidMetadata {
                    field: "polarization_array".to_string(),
                    reason: format!("duplicate polarization code {}", pol),
                });
            }
        }

        // the baseline index is derived; verify it was not left stale
        for (row, (&bl, (&a1, &a2))) in self
            .baseline_array
            .iter()
            .zip(self.ant_1_array.iter().zip(self.ant_2_array.iter()))
            .enumerate()
        {
            let n1 = self.antenna_numbers[a1];
            let n2 = self.antenna_numbers[a2];
            let expected = antnums_to_baseline(n1, n2, meta.nants_telescope, false)?;
            if bl != expected {
                return Err(UVDataError::InvalidMetadata {
                    field: "baseline_array".to_string(),
                    reason: format!(
                        "row {}: baseline {} does not encode antenna pair ({}, {})",
                        row, bl, n1, n2
                    ),
                });
            }
        }

        let unique_bls = self.baseline_array.iter().unique().count();
        if meta.nbls != unique_bls {
            return Err(UVDataError::InvalidMetadata {
                field: "nbls".to_string(),
                reason: format!(
                    "count {} does not match {} unique baselines",
                    meta.nbls, unique_bls
                ),
            });
        }

        Ok(())
    }

    /// Append a sentence to the history, matching the provenance style of the
    /// format drivers.
    pub fn append_history(&mut self, sentence: &str) {
        if !self.meta.history.is_empty() && !self.meta.history.ends_with(' ') {
            self.meta.history.push(' ');
        }
        self.meta.history.push_str(sentence);
    }
}

#[cfg(test)]
mod tests {
    use crate::test_common::synthetic_uvdata;

    use super::*;

    #[test]
    fn test_check_passes_on_synthetic() {
        let uvd = synthetic_uvdata();
        uvd.check().unwrap();
    }

    #[test]
    fn test_check_catches_count_mismatch() {
        let mut uvd = synthetic_uvdata();
        uvd.meta.nfreqs += 1;
        let err = uvd.check().unwrap_err();
        assert!(matches!(err, UVDataError::InvalidMetadata { ref field, .. } if field == "freq_array"));
    }

    #[test]
    fn test_check_catches_stale_baseline() {
        let mut uvd = synthetic_uvdata();
        uvd.baseline_array[0] += 1;
        let err = uvd.check().unwrap_err();
        assert!(matches!(err, UVDataError::InvalidMetadata { ref field, .. } if field == "baseline_array"));
    }

    #[test]
    fn test_check_catches_bad_bulk_shape() {
        let mut uvd = synthetic_uvdata();
        uvd.data = Some(Array3::default((1, 1, 1)));
        assert!(matches!(
            uvd.check().unwrap_err(),
            UVDataError::BadArrayShape { .. }
        ));
    }

    #[test]
    fn test_sync_counts() {
        let mut uvd = synthetic_uvdata();
        let (nblts, nfreqs, npols) = uvd.bulk_shape();
        uvd.meta.nblts = 0;
        uvd.meta.nfreqs = 0;
        uvd.meta.npols = 0;
        uvd.sync_counts();
        assert_eq!(uvd.bulk_shape(), (nblts, nfreqs, npols));
        assert_eq!(uvd.meta.ntimes * uvd.meta.nbls, uvd.meta.nblts);
    }

    #[test]
    fn test_check_catches_stale_nbls() {
        let mut uvd = synthetic_uvdata();
        uvd.meta.nbls = 0;
        let err = uvd.check().unwrap_err();
        assert!(matches!(err, UVDataError::InvalidMetadata { ref field, .. } if field == "nbls"));
    }

    #[test]
    fn test_ants_with_data() {
        let uvd = synthetic_uvdata();
        assert_eq!(uvd.ants_with_data(), uvd.antenna_numbers);
    }
}

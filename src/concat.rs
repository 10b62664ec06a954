//! Combining two datasets: the strict, general `add` and the fast
//! single-axis `fast_concat`.
//!
//! `add` forms the sorted union of the two objects along every extended
//! axis, verifies that any overlapping cells carry equal data, and rejects
//! combinations whose union grid would contain cells covered by neither
//! operand. `fast_concat` appends along exactly one axis with no overlap
//! detection and no re-sorting, for the common case of stitching adjacent
//! time or frequency blocks produced by a partial read.

use std::collections::HashMap;

use itertools::Itertools;
use log::warn;
use marlu::{ndarray::Array3, Complex, XyzGeodetic};
use thiserror::Error;

use crate::{dataset::UVData, UVDataError};

/// Relative tolerance for scalar metadata comparison.
const META_RTOL: f64 = 1e-5;
/// Absolute tolerance for antenna positions, metres.
const ANT_POS_ATOL: f64 = 1e-3;
/// Tolerance for matching phase centres, radians.
const PHASE_ATOL: f64 = 1e-9;
/// Tolerance for matching row times, seconds.
const TIME_ATOL_S: f64 = 1e-3;
/// Tolerance for matching channel frequencies, Hz.
const FREQ_ATOL_HZ: f64 = 1e-3;
/// Relative tolerance for overlapping visibility values.
const DATA_RTOL: f32 = 1e-6;

#[derive(Error, Debug)]
/// Errors from combining two datasets.
pub enum ConcatError {
    /// The two objects describe different observations or instruments.
    #[error("objects cannot be combined; mismatched: {}", .mismatched.join(", "))]
    IncompatibleObjects {
        /// The metadata fields that disagree.
        mismatched: Vec<String>,
    },

    /// Overlapping cells carry different data.
    #[error(
        "objects overlap on the {axis} axis but the overlapping data differ \
         (first difference at row {row}, channel {chan}, polarization {pol})"
    )]
    OverlapMismatch {
        /// The axis on which the overlap was detected.
        axis: String,
        /// Row of the first differing cell.
        row: usize,
        /// Channel of the first differing cell.
        chan: usize,
        /// Polarization of the first differing cell.
        pol: usize,
    },

    /// The union grid would contain cells covered by neither object.
    #[error(
        "objects extend different axes ({axis_a} and {axis_b}); the combined \
         grid would contain cells covered by neither"
    )]
    RaggedCombination {
        /// An axis extended only by the first object.
        axis_a: String,
        /// An axis extended only by the second object.
        axis_b: String,
    },

    /// The non-concatenated axes disagree.
    #[error("cannot concatenate along the {axis} axis: {reason}")]
    AxisConflict {
        /// The requested concatenation axis.
        axis: String,
        /// What disagreed on the other axes.
        reason: String,
    },
}

/// The axis along which [`UVData::fast_concat`] appends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConcatAxis {
    /// The baseline-time (row) axis.
    Blt,
    /// The frequency-channel axis.
    Freq,
    /// The polarization axis.
    Pol,
}

impl std::fmt::Display for ConcatAxis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConcatAxis::Blt => write!(f, "blt"),
            ConcatAxis::Freq => write!(f, "freq"),
            ConcatAxis::Pol => write!(f, "pol"),
        }
    }
}

fn rel_close(a: f64, b: f64) -> bool {
    (a - b).abs() <= META_RTOL * a.abs().max(b.abs()).max(f64::MIN_POSITIVE)
}

fn vis_close(a: Complex<f32>, b: Complex<f32>) -> bool {
    let scale = a.norm().max(b.norm()).max(1.0);
    (a - b).norm() <= DATA_RTOL * scale
}

// times are matched to the millisecond, well below any integration time
fn row_key(time: f64, baseline: u64) -> (i64, u64) {
    ((time * 86_400_000.0).round() as i64, baseline)
}

fn chan_key(freq: f64) -> i64 {
    (freq / FREQ_ATOL_HZ).round() as i64
}

/// Verify that two datasets describe the same observation closely enough to
/// be combined.
///
/// Scalar floats are compared to a relative tolerance, antenna positions to
/// an absolute tolerance in metres, and phase centres in radians. Histories
/// are never compared; they are concatenated by the combine operations.
/// With `strict` false, `object_name` and `instrument` mismatches are
/// downgraded to warnings.
///
/// # Errors
///
/// [`ConcatError::IncompatibleObjects`] naming every field that disagrees.
pub fn check_compatibility(a: &UVData, b: &UVData, strict: bool) -> Result<(), ConcatError> {
    let mut mismatched = Vec::new();
    let mut soft = Vec::new();

    if a.meta.telescope_name != b.meta.telescope_name {
        mismatched.push("telescope_name".to_string());
    }
    if a.meta.vis_units != b.meta.vis_units {
        mismatched.push("vis_units".to_string());
    }
    if a.meta.object_name != b.meta.object_name {
        soft.push("object_name".to_string());
    }
    if a.meta.instrument != b.meta.instrument {
        soft.push("instrument".to_string());
    }
    if !rel_close(a.meta.integration_time, b.meta.integration_time) {
        mismatched.push("integration_time".to_string());
    }
    if !rel_close(a.meta.channel_width, b.meta.channel_width) {
        mismatched.push("channel_width".to_string());
    }
    let (pa, pb) = (&a.meta.array_pos, &b.meta.array_pos);
    if (pa.longitude_rad - pb.longitude_rad).abs() > PHASE_ATOL
        || (pa.latitude_rad - pb.latitude_rad).abs() > PHASE_ATOL
        || (pa.height_metres - pb.height_metres).abs() > ANT_POS_ATOL
    {
        mismatched.push("array_pos".to_string());
    }
    if !a.meta.phase.matches(&b.meta.phase, PHASE_ATOL) {
        mismatched.push("phase".to_string());
    }
    if a.is_metadata_only() != b.is_metadata_only() {
        mismatched.push("data presence".to_string());
    }

    // shared antennas must agree on name and position
    for (i, &num) in a.antenna_numbers.iter().enumerate() {
        if let Some(j) = b.ant_index(num) {
            if a.antenna_names[i] != b.antenna_names[j] {
                mismatched.push("antenna_names".to_string());
                break;
            }
            let (xa, xb) = (&a.antenna_positions[i], &b.antenna_positions[j]);
            if (xa.x - xb.x).abs() > ANT_POS_ATOL
                || (xa.y - xb.y).abs() > ANT_POS_ATOL
                || (xa.z - xb.z).abs() > ANT_POS_ATOL
            {
                mismatched.push("antenna_positions".to_string());
                break;
            }
        }
    }

    if strict {
        mismatched.extend(soft);
    } else if !soft.is_empty() {
        warn!("combining objects with mismatched {}", soft.join(", "));
    }

    if mismatched.is_empty() {
        Ok(())
    } else {
        Err(ConcatError::IncompatibleObjects { mismatched })
    }
}

/// The merged antenna table and a remapping of `b`'s table indices into it.
struct MergedAnts {
    numbers: Vec<usize>,
    names: Vec<String>,
    positions: Vec<XyzGeodetic>,
    b_remap: Vec<usize>,
}

fn merge_antenna_tables(a: &UVData, b: &UVData) -> MergedAnts {
    let mut numbers = a.antenna_numbers.clone();
    let mut names = a.antenna_names.clone();
    let mut positions = a.antenna_positions.clone();
    let mut b_remap = Vec::with_capacity(b.antenna_numbers.len());
    for (j, &num) in b.antenna_numbers.iter().enumerate() {
        match a.ant_index(num) {
            Some(i) => b_remap.push(i),
            None => {
                b_remap.push(numbers.len());
                numbers.push(num);
                names.push(b.antenna_names[j].clone());
                positions.push(b.antenna_positions[j]);
            }
        }
    }
    MergedAnts {
        numbers,
        names,
        positions,
        b_remap,
    }
}

fn combine_histories(a: &mut UVData, b: &UVData, sentence: &str) {
    a.append_history(sentence);
    if !b.meta.history.is_empty() && !a.meta.history.contains(&b.meta.history) {
        a.append_history(&b.meta.history.clone());
    }
}

impl UVData {
    /// Combine two datasets into a new object, forming the sorted union
    /// along every extended axis.
    ///
    /// Rows are keyed by (time, baseline), channels by frequency and
    /// polarizations by code. Cells present in both objects must carry
    /// equal data, flags and sample counts; cells the union grid contains
    /// but neither object covers make the combination invalid.
    ///
    /// # Errors
    ///
    /// See [`ConcatError`]; also propagates invariant failures from
    /// rebuilding the result.
    pub fn add(&self, other: &UVData, strict: bool) -> Result<UVData, UVDataError> {
        check_compatibility(self, other, strict).map_err(UVDataError::Concat)?;

        let ants = merge_antenna_tables(self, other);

        // classify each axis of `other` against `self`
        let a_rows: HashMap<(i64, u64), usize> = self
            .time_array
            .iter()
            .zip(self.baseline_array.iter())
            .enumerate()
            .map(|(i, (&t, &bl))| (row_key(t, bl), i))
            .collect();
        let a_chans: HashMap<i64, usize> = self
            .freq_array
            .iter()
            .enumerate()
            .map(|(i, &f)| (chan_key(f), i))
            .collect();
        let a_pols: HashMap<i32, usize> = self
            .polarization_array
            .iter()
            .enumerate()
            .map(|(i, &p)| (p, i))
            .collect();

        let b_only_rows: Vec<usize> = (0..other.time_array.len())
            .filter(|&j| {
                !a_rows.contains_key(&row_key(other.time_array[j], other.baseline_array[j]))
            })
            .collect();
        let b_only_chans: Vec<usize> = (0..other.freq_array.len())
            .filter(|&j| !a_chans.contains_key(&chan_key(other.freq_array[j])))
            .collect();
        let b_only_pols: Vec<usize> = (0..other.polarization_array.len())
            .filter(|&j| !a_pols.contains_key(&other.polarization_array[j]))
            .collect();

        // the union grid is only valid if at most one axis is extended in
        // each direction; otherwise corner cells are covered by neither
        let b_row_set: std::collections::HashSet<(i64, u64)> = other
            .time_array
            .iter()
            .zip(other.baseline_array.iter())
            .map(|(&t, &bl)| row_key(t, bl))
            .collect();
        let b_chan_set: std::collections::HashSet<i64> =
            other.freq_array.iter().map(|&f| chan_key(f)).collect();
        let b_pol_set: std::collections::HashSet<i32> =
            other.polarization_array.iter().copied().collect();
        let a_only = [
            a_rows.keys().any(|k| !b_row_set.contains(k)),
            a_chans.keys().any(|k| !b_chan_set.contains(k)),
            a_pols.keys().any(|k| !b_pol_set.contains(k)),
        ];
        let b_only = [
            !b_only_rows.is_empty(),
            !b_only_chans.is_empty(),
            !b_only_pols.is_empty(),
        ];
        let axis_names = ["blt", "freq", "pol"];
        for i in 0..3 {
            for j in 0..3 {
                if i != j && a_only[i] && b_only[j] {
                    return Err(UVDataError::Concat(ConcatError::RaggedCombination {
                        axis_a: axis_names[i].to_string(),
                        axis_b: axis_names[j].to_string(),
                    }));
                }
            }
        }

        // merged row axis, sorted by (time, baseline)
        enum Src {
            A(usize),
            B(usize),
        }
        let mut rows: Vec<((i64, u64), Src)> = self
            .time_array
            .iter()
            .zip(self.baseline_array.iter())
            .enumerate()
            .map(|(i, (&t, &bl))| (row_key(t, bl), Src::A(i)))
            .collect();
        rows.extend(b_only_rows.iter().map(|&j| {
            (
                row_key(other.time_array[j], other.baseline_array[j]),
                Src::B(j),
            )
        }));
        rows.sort_by_key(|(key, _)| *key);

        // merged frequency axis, ascending
        let mut chans: Vec<(i64, Src)> = self
            .freq_array
            .iter()
            .enumerate()
            .map(|(i, &f)| (chan_key(f), Src::A(i)))
            .collect();
        chans.extend(b_only_chans.iter().map(|&j| (chan_key(other.freq_array[j]), Src::B(j))));
        chans.sort_by_key(|(key, _)| *key);

        // merged polarization axis: existing order, new codes appended
        let mut pols: Vec<Src> = (0..self.polarization_array.len()).map(Src::A).collect();
        pols.extend(b_only_pols.iter().map(|&j| Src::B(j)));

        let mut out = UVData {
            meta: self.meta.clone(),
            antenna_numbers: ants.numbers,
            antenna_names: ants.names,
            antenna_positions: ants.positions,
            ..UVData::default()
        };
        for (_, src) in &rows {
            match *src {
                Src::A(i) => {
                    out.time_array.push(self.time_array[i]);
                    out.ant_1_array.push(self.ant_1_array[i]);
                    out.ant_2_array.push(self.ant_2_array[i]);
                    out.uvw_array.push(self.uvw_array[i]);
                }
                Src::B(j) => {
                    out.time_array.push(other.time_array[j]);
                    out.ant_1_array.push(ants.b_remap[other.ant_1_array[j]]);
                    out.ant_2_array.push(ants.b_remap[other.ant_2_array[j]]);
                    out.uvw_array.push(other.uvw_array[j]);
                }
            }
        }
        for (_, src) in &chans {
            match *src {
                Src::A(i) => {
                    out.freq_array.push(self.freq_array[i]);
                    out.spw_array.push(self.spw_array[i]);
                }
                Src::B(j) => {
                    out.freq_array.push(other.freq_array[j]);
                    out.spw_array.push(other.spw_array[j]);
                }
            }
        }
        for src in &pols {
            match *src {
                Src::A(i) => out.polarization_array.push(self.polarization_array[i]),
                Src::B(j) => out.polarization_array.push(other.polarization_array[j]),
            }
        }

        // where each of `other`'s entries lands in the merged axes
        let out_rows: HashMap<(i64, u64), usize> = rows
            .iter()
            .enumerate()
            .map(|(idx, (key, _))| (*key, idx))
            .collect();
        let out_chans: HashMap<i64, usize> = chans
            .iter()
            .enumerate()
            .map(|(idx, (key, _))| (*key, idx))
            .collect();
        let out_pols: HashMap<i32, usize> = out
            .polarization_array
            .iter()
            .enumerate()
            .map(|(idx, &p)| (p, idx))
            .collect();

        if !self.is_metadata_only() {
            let shape = (rows.len(), chans.len(), out.polarization_array.len());
            let mut data = Array3::<Complex<f32>>::zeros(shape);
            let mut flags = Array3::<bool>::from_elem(shape, true);
            let mut nsamples = Array3::<f32>::zeros(shape);

            let scatter = |dst_data: &mut Array3<Complex<f32>>,
                           dst_flags: &mut Array3<bool>,
                           dst_ns: &mut Array3<f32>,
                           uvd: &UVData| {
                let (d, fl, ns) = (&uvd.data, &uvd.flags, &uvd.nsamples);
                for (i, (&t, &bl)) in uvd.time_array.iter().zip(uvd.baseline_array.iter()).enumerate() {
                    let oi = out_rows[&row_key(t, bl)];
                    for (j, &f) in uvd.freq_array.iter().enumerate() {
                        let oj = out_chans[&chan_key(f)];
                        for (k, &p) in uvd.polarization_array.iter().enumerate() {
                            let ok = out_pols[&p];
                            if let Some(d) = d {
                                dst_data[(oi, oj, ok)] = d[(i, j, k)];
                            }
                            if let Some(fl) = fl {
                                dst_flags[(oi, oj, ok)] = fl[(i, j, k)];
                            }
                            if let Some(ns) = ns {
                                dst_ns[(oi, oj, ok)] = ns[(i, j, k)];
                            }
                        }
                    }
                }
            };
            scatter(&mut data, &mut flags, &mut nsamples, self);

            // cells of `other` already covered by `self` must agree
            for (i, (&t, &bl)) in other
                .time_array
                .iter()
                .zip(other.baseline_array.iter())
                .enumerate()
            {
                let rk = row_key(t, bl);
                let row_shared = a_rows.contains_key(&rk);
                for (j, &f) in other.freq_array.iter().enumerate() {
                    let ck = chan_key(f);
                    let chan_shared = a_chans.contains_key(&ck);
                    for (k, &p) in other.polarization_array.iter().enumerate() {
                        if !(row_shared && chan_shared && a_pols.contains_key(&p)) {
                            continue;
                        }
                        let cell = (out_rows[&rk], out_chans[&ck], out_pols[&p]);
                        let equal = match (&self.data, &other.data) {
                            (Some(_), Some(bd)) => vis_close(data[cell], bd[(i, j, k)]),
                            _ => true,
                        } && match (&self.flags, &other.flags) {
                            (Some(_), Some(bf)) => flags[cell] == bf[(i, j, k)],
                            _ => true,
                        } && match (&self.nsamples, &other.nsamples) {
                            (Some(_), Some(bn)) => {
                                (nsamples[cell] - bn[(i, j, k)]).abs() <= DATA_RTOL
                            }
                            _ => true,
                        };
                        if !equal {
                            let axis = if b_only[0] || a_only[0] {
                                "blt"
                            } else if b_only[1] || a_only[1] {
                                "freq"
                            } else {
                                "pol"
                            };
                            return Err(UVDataError::Concat(ConcatError::OverlapMismatch {
                                axis: axis.to_string(),
                                row: cell.0,
                                chan: cell.1,
                                pol: cell.2,
                            }));
                        }
                    }
                }
            }
            scatter(&mut data, &mut flags, &mut nsamples, other);

            out.data = self.data.as_ref().map(|_| data);
            out.flags = self.flags.as_ref().map(|_| flags);
            out.nsamples = self.nsamples.as_ref().map(|_| nsamples);
        }

        let extended: Vec<&str> = axis_names
            .iter()
            .zip(b_only.iter())
            .filter(|(_, &e)| e)
            .map(|(&n, _)| n)
            .collect();
        combine_histories(
            &mut out,
            other,
            &format!(
                " Combined data along the [{}] axis using uvdata.",
                extended.join(", ")
            ),
        );

        out.recompute_baselines()?;
        out.sync_counts();
        Ok(out)
    }

    /// In-place variant of [`UVData::add`].
    ///
    /// # Errors
    ///
    /// As [`UVData::add`]; the receiver is untouched on failure.
    pub fn add_in_place(&mut self, other: &UVData, strict: bool) -> Result<(), UVDataError> {
        *self = self.add(other, strict)?;
        Ok(())
    }

    /// Append `other` along a single axis without overlap detection or
    /// re-sorting.
    ///
    /// Only cheap checks are performed: the two axes not being concatenated
    /// must match (within the usual value tolerances, in the same order), and
    /// the operands must agree on phase category and bulk-array presence.
    /// Everything else is trusted, which is the point: this is the path for
    /// stitching already-ordered, known-disjoint shards. Duplicate or
    /// unsorted values on the concatenated axis only produce a warning.
    ///
    /// # Errors
    ///
    /// [`ConcatError::AxisConflict`] when a non-concatenated axis differs,
    /// [`ConcatError::IncompatibleObjects`] when the cheap checks fail.
    pub fn fast_concat(&self, other: &UVData, axis: ConcatAxis) -> Result<UVData, UVDataError> {
        let mut mismatched = Vec::new();
        if self.meta.phase.is_phased() != other.meta.phase.is_phased() {
            mismatched.push("phase".to_string());
        }
        if self.is_metadata_only() != other.is_metadata_only() {
            mismatched.push("data presence".to_string());
        }
        if !mismatched.is_empty() {
            return Err(UVDataError::Concat(ConcatError::IncompatibleObjects {
                mismatched,
            }));
        }

        let conflict = |reason: String| {
            UVDataError::Concat(ConcatError::AxisConflict {
                axis: axis.to_string(),
                reason,
            })
        };
        let rows_match = self.time_array.len() == other.time_array.len()
            && self
                .time_array
                .iter()
                .zip(self.baseline_array.iter())
                .zip(other.time_array.iter().zip(other.baseline_array.iter()))
                .all(|((&ta, &bla), (&tb, &blb))| {
                    (ta - tb).abs() * 86400.0 <= TIME_ATOL_S && bla == blb
                });
        let chans_match = self.freq_array.len() == other.freq_array.len()
            && self
                .freq_array
                .iter()
                .zip(other.freq_array.iter())
                .all(|(&fa, &fb)| (fa - fb).abs() <= FREQ_ATOL_HZ);
        let pols_match = self.polarization_array == other.polarization_array;

        match axis {
            ConcatAxis::Blt => {
                if !chans_match {
                    return Err(conflict("frequency axes differ".to_string()));
                }
                if !pols_match {
                    return Err(conflict("polarization axes differ".to_string()));
                }
            }
            ConcatAxis::Freq => {
                if !rows_match {
                    return Err(conflict("baseline-time axes differ".to_string()));
                }
                if !pols_match {
                    return Err(conflict("polarization axes differ".to_string()));
                }
            }
            ConcatAxis::Pol => {
                if !rows_match {
                    return Err(conflict("baseline-time axes differ".to_string()));
                }
                if !chans_match {
                    return Err(conflict("frequency axes differ".to_string()));
                }
            }
        }

        let ants = merge_antenna_tables(self, other);
        let mut out = self.clone();
        out.antenna_numbers = ants.numbers;
        out.antenna_names = ants.names;
        out.antenna_positions = ants.positions;

        match axis {
            ConcatAxis::Blt => {
                out.time_array.extend_from_slice(&other.time_array);
                out.uvw_array.extend_from_slice(&other.uvw_array);
                out.ant_1_array
                    .extend(other.ant_1_array.iter().map(|&i| ants.b_remap[i]));
                out.ant_2_array
                    .extend(other.ant_2_array.iter().map(|&i| ants.b_remap[i]));
            }
            ConcatAxis::Freq => {
                out.freq_array.extend_from_slice(&other.freq_array);
                out.spw_array.extend_from_slice(&other.spw_array);
                if !out
                    .freq_array
                    .windows(2)
                    .all(|w| w[0] < w[1])
                {
                    warn!("concatenated frequency axis is not strictly ascending");
                }
            }
            ConcatAxis::Pol => {
                out.polarization_array
                    .extend_from_slice(&other.polarization_array);
                if out.polarization_array.iter().unique().count() != out.polarization_array.len() {
                    warn!("concatenated polarization axis contains duplicate codes");
                }
            }
        }

        if !self.is_metadata_only() {
            let (na, nb) = (self.bulk_shape(), other.bulk_shape());
            let shape = match axis {
                ConcatAxis::Blt => (na.0 + nb.0, na.1, na.2),
                ConcatAxis::Freq => (na.0, na.1 + nb.1, na.2),
                ConcatAxis::Pol => (na.0, na.1, na.2 + nb.2),
            };
            let split = match axis {
                ConcatAxis::Blt => na.0,
                ConcatAxis::Freq => na.1,
                ConcatAxis::Pol => na.2,
            };
            fn append<T: Clone + Default>(
                a: &Array3<T>,
                b: &Array3<T>,
                shape: (usize, usize, usize),
                axis: ConcatAxis,
                split: usize,
            ) -> Array3<T> {
                Array3::from_shape_fn(shape, |(i, j, k)| match axis {
                    ConcatAxis::Blt if i >= split => b[(i - split, j, k)].clone(),
                    ConcatAxis::Freq if j >= split => b[(i, j - split, k)].clone(),
                    ConcatAxis::Pol if k >= split => b[(i, j, k - split)].clone(),
                    _ => a[(i, j, k)].clone(),
                })
            }
            out.data = match (&self.data, &other.data) {
                (Some(a), Some(b)) => Some(append(a, b, shape, axis, split)),
                _ => None,
            };
            out.flags = match (&self.flags, &other.flags) {
                (Some(a), Some(b)) => Some(append(a, b, shape, axis, split)),
                _ => None,
            };
            out.nsamples = match (&self.nsamples, &other.nsamples) {
                (Some(a), Some(b)) => Some(append(a, b, shape, axis, split)),
                _ => None,
            };
        }

        combine_histories(
            &mut out,
            other,
            &format!(" Combined data along the [{}] axis using uvdata.", axis),
        );
        out.recompute_baselines()?;
        out.sync_counts();
        Ok(out)
    }

    /// In-place variant of [`UVData::fast_concat`].
    ///
    /// # Errors
    ///
    /// As [`UVData::fast_concat`]; the receiver is untouched on failure.
    pub fn fast_concat_in_place(
        &mut self,
        other: &UVData,
        axis: ConcatAxis,
    ) -> Result<(), UVDataError> {
        *self = self.fast_concat(other, axis)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;
    use crate::{
        selection::SelDescriptor,
        test_common::{synthetic_uvdata, synthetic_uvdata_large},
    };

    #[test]
    fn test_add_freq_halves_round_trips() {
        let uvd = synthetic_uvdata_large();
        let lo = uvd.select(&SelDescriptor::freq_range(0, 32)).unwrap();
        let hi = uvd.select(&SelDescriptor::freq_range(32, 64)).unwrap();
        let back = lo.add(&hi, false).unwrap();
        back.check().unwrap();
        assert_eq!(back.bulk_shape(), uvd.bulk_shape());
        assert_eq!(back.meta.nbls, uvd.meta.nbls);
        assert_eq!(back.meta.ntimes, uvd.meta.ntimes);
        assert_eq!(back.freq_array, uvd.freq_array);
        assert_eq!(back.baseline_array, uvd.baseline_array);
        assert_abs_diff_eq!(back.data.as_ref().unwrap(), uvd.data.as_ref().unwrap());
        assert_eq!(back.flags, uvd.flags);
        assert_abs_diff_eq!(
            back.nsamples.as_ref().unwrap(),
            uvd.nsamples.as_ref().unwrap()
        );
    }

    #[test]
    fn test_fast_concat_matches_add_on_freq() {
        let uvd = synthetic_uvdata_large();
        let lo = uvd.select(&SelDescriptor::freq_range(0, 32)).unwrap();
        let hi = uvd.select(&SelDescriptor::freq_range(32, 64)).unwrap();
        let added = lo.add(&hi, false).unwrap();
        let fast = lo.fast_concat(&hi, ConcatAxis::Freq).unwrap();
        fast.check().unwrap();
        assert_eq!(fast.freq_array, added.freq_array);
        assert_eq!(fast.baseline_array, added.baseline_array);
        assert_eq!(fast.polarization_array, added.polarization_array);
        assert_abs_diff_eq!(fast.data.as_ref().unwrap(), added.data.as_ref().unwrap());
        assert_eq!(fast.flags, added.flags);
    }

    #[test]
    fn test_add_overlap_equal_is_ok() {
        let uvd = synthetic_uvdata_large();
        // [0, 40) and [24, 64) overlap on [24, 40) with identical data
        let lo = uvd.select(&SelDescriptor::freq_range(0, 40)).unwrap();
        let hi = uvd.select(&SelDescriptor::freq_range(24, 64)).unwrap();
        let back = lo.add(&hi, false).unwrap();
        back.check().unwrap();
        assert_eq!(back.meta.nfreqs, 64);
        assert_abs_diff_eq!(back.data.as_ref().unwrap(), uvd.data.as_ref().unwrap());
    }

    #[test]
    fn test_add_overlap_mismatch_rejected() {
        let uvd = synthetic_uvdata_large();
        let lo = uvd.select(&SelDescriptor::freq_range(0, 40)).unwrap();
        let mut hi = uvd.select(&SelDescriptor::freq_range(24, 64)).unwrap();
        if let Some(data) = &mut hi.data {
            data[(0, 0, 0)] += Complex::new(10.0, 0.0);
        }
        assert!(matches!(
            lo.add(&hi, false).unwrap_err(),
            UVDataError::Concat(ConcatError::OverlapMismatch { .. })
        ));
    }

    #[test]
    fn test_add_ragged_combination_rejected() {
        let uvd = synthetic_uvdata_large();
        // lo keeps all pols but half the channels; hi keeps the other
        // channels and drops a pol, leaving corner cells uncovered
        let lo = uvd.select(&SelDescriptor::freq_range(0, 32)).unwrap();
        let hi = uvd
            .select(&SelDescriptor {
                freq_chans: Some(crate::selection::AxisSelection::Range { start: 32, end: 64 }),
                polarizations: Some(vec![-5, -6]),
                ..SelDescriptor::default()
            })
            .unwrap();
        assert!(matches!(
            lo.add(&hi, false).unwrap_err(),
            UVDataError::Concat(ConcatError::RaggedCombination { .. })
        ));
    }

    #[test]
    fn test_add_rejects_moved_antenna() {
        let a = synthetic_uvdata();
        let mut b = synthetic_uvdata();
        b.antenna_positions[0].x += 1.0;
        let err = a.add(&b, false).unwrap_err();
        match err {
            UVDataError::Concat(ConcatError::IncompatibleObjects { mismatched }) => {
                assert!(mismatched.iter().any(|f| f == "antenna_positions"));
            }
            other => panic!("expected IncompatibleObjects, got {other:?}"),
        }
    }

    #[test]
    fn test_add_rejects_different_telescope() {
        let a = synthetic_uvdata();
        let mut b = synthetic_uvdata();
        b.meta.telescope_name = "elsewhere".to_string();
        assert!(matches!(
            a.add(&b, false).unwrap_err(),
            UVDataError::Concat(ConcatError::IncompatibleObjects { .. })
        ));
    }

    #[test]
    fn test_strictness_gates_object_name() {
        let a = synthetic_uvdata();
        let mut b = synthetic_uvdata();
        b.meta.object_name = "another field".to_string();
        // tolerated when not strict, rejected when strict
        assert!(a.add(&b, false).is_ok());
        assert!(matches!(
            a.add(&b, true).unwrap_err(),
            UVDataError::Concat(ConcatError::IncompatibleObjects { .. })
        ));
    }

    #[test]
    fn test_fast_concat_axis_conflict() {
        let uvd = synthetic_uvdata_large();
        let lo = uvd.select(&SelDescriptor::freq_range(0, 32)).unwrap();
        let hi = uvd.select(&SelDescriptor::freq_range(32, 64)).unwrap();
        // appending along blt with different frequency axes is invalid
        assert!(matches!(
            lo.fast_concat(&hi, ConcatAxis::Blt).unwrap_err(),
            UVDataError::Concat(ConcatError::AxisConflict { .. })
        ));
    }

    #[test]
    fn test_add_identical_objects_is_identity() {
        let uvd = synthetic_uvdata();
        let back = uvd.add(&uvd, false).unwrap();
        back.check().unwrap();
        assert_eq!(back.bulk_shape(), uvd.bulk_shape());
        assert_abs_diff_eq!(back.data.as_ref().unwrap(), uvd.data.as_ref().unwrap());
    }

    #[test]
    fn test_add_merges_histories() {
        let mut a = synthetic_uvdata();
        let mut b = synthetic_uvdata();
        a.meta.history = "first half.".to_string();
        b.meta.history = "second half.".to_string();
        let out = a.add(&b, false).unwrap();
        assert!(out.meta.history.contains("first half."));
        assert!(out.meta.history.contains("second half."));
        assert!(out.meta.history.contains("Combined data along"));
    }
}

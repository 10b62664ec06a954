//! Selecting a subset of a dataset using index lists, ranges, value lists
//! with tolerances, and the antenna-pair/polarization grammar.
//!
//! Datasets can sometimes be too large to fit in memory. The same
//! [`SelDescriptor`] used here drives the partial I/O layer, so a selection
//! can be resolved against a metadata-only object and used to read or write
//! a store in independently-addressable chunks.
//!
//! Resolution and application are separate steps: [`resolve_selection`]
//! turns a descriptor into concrete row/channel/polarization index sets
//! without touching the dataset, and the gather in
//! [`UVData::select_in_place`] only runs once resolution has fully
//! succeeded, so a failed selection leaves the receiver in its pre-call
//! state.

use std::collections::HashSet;

use itertools::Itertools;
use log::warn;
use marlu::ndarray::Array3;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    ant_str::{eval_ant_str, parse_ant_str},
    dataset::UVData,
    UVDataError,
};

/// Default absolute tolerance for matching times, in days (1 ms).
pub const DEFAULT_TIME_ATOL: f64 = 1e-3 / 86400.0;
/// Default absolute tolerance for matching frequencies, in Hz.
pub const DEFAULT_FREQ_ATOL: f64 = 1e-3;

#[derive(Error, Debug)]
/// Errors from resolving or applying a selection.
pub enum SelectionError {
    /// A requested value does not exist on the axis.
    #[error("axis {axis}: requested value {value} not found")]
    ValueNotFound {
        /// The axis being resolved.
        axis: String,
        /// The offending value.
        value: String,
    },

    /// A requested value matches more than one bin within the tolerance.
    #[error(
        "axis {axis}: value {value} matches more than one bin within tolerance {atol}"
    )]
    AmbiguousValue {
        /// The axis being resolved.
        axis: String,
        /// The offending value.
        value: String,
        /// The tolerance in use.
        atol: f64,
    },

    /// An explicit index is out of range.
    #[error("axis {axis}: index {index} out of range for axis length {len}")]
    IndexOutOfRange {
        /// The axis being resolved.
        axis: String,
        /// The offending index.
        index: usize,
        /// The axis length.
        len: usize,
    },

    /// An explicit index list contains a duplicate.
    #[error("axis {axis}: duplicate index {index}")]
    DuplicateIndex {
        /// The axis being resolved.
        axis: String,
        /// The duplicated index.
        index: usize,
    },

    /// Two specifiers for the same axis disagree.
    #[error("axis {axis}: conflicting specifiers: {reason}")]
    ConflictingSpec {
        /// The axis being resolved.
        axis: String,
        /// What disagreed.
        reason: String,
    },

    /// The antenna-pair string could not be parsed.
    #[error("could not parse ant_str {ant_str:?}: {reason}")]
    BadAntStr {
        /// The full selection string.
        ant_str: String,
        /// What went wrong.
        reason: String,
    },

    /// A negated grammar token had nothing to subtract from.
    #[error("negated token {token} has nothing to subtract from")]
    NegationFirst {
        /// The offending token.
        token: String,
    },
}

/// A selection specifier over one axis. This is half of the structural type
/// that crosses the core boundary (§ external interfaces): it is
/// serializable so descriptors can be logged and replayed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AxisSelection {
    /// Explicit indices; caller order is preserved verbatim, which makes
    /// reordering-via-selection possible.
    Indices(Vec<usize>),
    /// Explicit values, each matched to the nearest bin within `atol`.
    Values {
        /// The requested values.
        values: Vec<f64>,
        /// Absolute tolerance for matching.
        atol: f64,
    },
    /// A half-open index range.
    Range {
        /// First index, inclusive.
        start: usize,
        /// One past the last index.
        end: usize,
    },
}

/// The per-axis selection descriptor shared by the selection engine, the
/// partial I/O layer and format drivers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SelDescriptor {
    /// Direct row (baseline-time) selection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blt_inds: Option<AxisSelection>,
    /// Keep rows touching any of these antenna numbers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub antenna_nums: Option<Vec<usize>>,
    /// Keep rows matching any of these antenna-number pairs, either order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bls: Option<Vec<(usize, usize)>>,
    /// An antenna-pair/polarization grammar string (see [`crate::ant_str`]).
    /// May not be combined with `antenna_nums` or `bls`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ant_str: Option<String>,
    /// Time selection: values with tolerance, or indices into the ascending
    /// unique-time list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub times: Option<AxisSelection>,
    /// Channel-index selection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub freq_chans: Option<AxisSelection>,
    /// Frequency-value selection; if `freq_chans` is also given the two must
    /// resolve to the same channel set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequencies: Option<AxisSelection>,
    /// Polarization codes to keep, in the given order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub polarizations: Option<Vec<i32>>,
}

impl SelDescriptor {
    /// A descriptor selecting the half-open channel range `[start, end)`.
    pub fn freq_range(start: usize, end: usize) -> Self {
        Self {
            freq_chans: Some(AxisSelection::Range { start, end }),
            ..Self::default()
        }
    }
}

/// Resolve one axis specifier to an ordered, duplicate-free index list.
///
/// `values` are the physical values along the axis (used only by the
/// `Values` variant). `Indices` preserves caller order verbatim; `Values`
/// and `Range` results are in ascending original-array order.
///
/// # Errors
///
/// See [`SelectionError`].
pub fn resolve_axis(
    values: &[f64],
    sel: &AxisSelection,
    axis: &str,
) -> Result<Vec<usize>, SelectionError> {
    let len = values.len();
    match sel {
        AxisSelection::Indices(idxs) => {
            let mut seen = HashSet::new();
            for &idx in idxs {
                if idx >= len {
                    return Err(SelectionError::IndexOutOfRange {
                        axis: axis.to_string(),
                        index: idx,
                        len,
                    });
                }
                if !seen.insert(idx) {
                    return Err(SelectionError::DuplicateIndex {
                        axis: axis.to_string(),
                        index: idx,
                    });
                }
            }
            Ok(idxs.clone())
        }
        AxisSelection::Range { start, end } => {
            if *end > len || start > end {
                return Err(SelectionError::IndexOutOfRange {
                    axis: axis.to_string(),
                    index: *end,
                    len,
                });
            }
            Ok((*start..*end).collect())
        }
        AxisSelection::Values {
            values: wanted,
            atol,
        } => {
            let mut out = Vec::new();
            for &w in wanted {
                let matches: Vec<usize> = values
                    .iter()
                    .enumerate()
                    .filter(|(_, &v)| (v - w).abs() <= *atol)
                    .map(|(i, _)| i)
                    .collect();
                match matches.len() {
                    0 => {
                        return Err(SelectionError::ValueNotFound {
                            axis: axis.to_string(),
                            value: w.to_string(),
                        })
                    }
                    1 => out.push(matches[0]),
                    _ => {
                        return Err(SelectionError::AmbiguousValue {
                            axis: axis.to_string(),
                            value: w.to_string(),
                            atol: *atol,
                        })
                    }
                }
            }
            Ok(out.into_iter().unique().sorted().collect())
        }
    }
}

/// Concrete index sets produced by resolving a [`SelDescriptor`] against one
/// dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSelection {
    /// Row (baseline-time) indices, in gather order.
    pub rows: Vec<usize>,
    /// Channel indices, in gather order.
    pub chans: Vec<usize>,
    /// Polarization indices, in gather order.
    pub pols: Vec<usize>,
}

impl ResolvedSelection {
    /// The identity selection for a dataset of the given shape.
    pub fn full(nblts: usize, nfreqs: usize, npols: usize) -> Self {
        Self {
            rows: (0..nblts).collect(),
            chans: (0..nfreqs).collect(),
            pols: (0..npols).collect(),
        }
    }

    /// The shape of the bulk arrays this selection gathers.
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.rows.len(), self.chans.len(), self.pols.len())
    }
}

/// Resolve every axis of a descriptor against a dataset, without mutating
/// anything.
///
/// Per-axis filters (`blt_inds`, `times`) are applied first; antenna-based
/// criteria then intersect the remaining rows, preserving the row gather
/// order established by `blt_inds` (or ascending original order otherwise).
///
/// # Errors
///
/// See [`SelectionError`].
pub fn resolve_selection(
    uvd: &UVData,
    desc: &SelDescriptor,
) -> Result<ResolvedSelection, SelectionError> {
    // polarization axis
    let mut pol_idxs: Vec<usize> = (0..uvd.polarization_array.len()).collect();
    if let Some(wanted) = &desc.polarizations {
        let mut idxs = Vec::with_capacity(wanted.len());
        for &code in wanted {
            match uvd.polarization_array.iter().position(|&p| p == code) {
                Some(idx) => idxs.push(idx),
                None => {
                    return Err(SelectionError::ValueNotFound {
                        axis: "polarization".to_string(),
                        value: code.to_string(),
                    })
                }
            }
        }
        pol_idxs = idxs.into_iter().unique().collect();
    }

    // frequency axis; explicit channels and values must agree when both given
    let chan_sel = desc
        .freq_chans
        .as_ref()
        .map(|sel| resolve_axis(&uvd.freq_array, sel, "freq"))
        .transpose()?;
    let value_sel = desc
        .frequencies
        .as_ref()
        .map(|sel| resolve_axis(&uvd.freq_array, sel, "freq"))
        .transpose()?;
    let chans = match (chan_sel, value_sel) {
        (Some(by_chan), Some(by_value)) => {
            let a: HashSet<usize> = by_chan.iter().copied().collect();
            let b: HashSet<usize> = by_value.iter().copied().collect();
            if a != b {
                return Err(SelectionError::ConflictingSpec {
                    axis: "freq".to_string(),
                    reason: "freq_chans and frequencies resolve to different channels"
                        .to_string(),
                });
            }
            by_chan
        }
        (Some(by_chan), None) => by_chan,
        (None, Some(by_value)) => by_value,
        (None, None) => (0..uvd.freq_array.len()).collect(),
    };

    // row axis: direct indices first, value/antenna predicates after
    let mut rows: Vec<usize> = match &desc.blt_inds {
        Some(sel) => resolve_axis(&uvd.time_array, sel, "blt")?,
        None => (0..uvd.time_array.len()).collect(),
    };

    if let Some(sel) = &desc.times {
        let unique_times: Vec<f64> = uvd
            .time_array
            .iter()
            .copied()
            .sorted_by(f64::total_cmp)
            .dedup()
            .collect();
        let keep_times: Vec<f64> = resolve_axis(&unique_times, sel, "time")?
            .into_iter()
            .map(|i| unique_times[i])
            .collect();
        let atol = match sel {
            AxisSelection::Values { atol, .. } => *atol,
            _ => DEFAULT_TIME_ATOL,
        };
        rows.retain(|&r| {
            keep_times
                .iter()
                .any(|&t| (uvd.time_array[r] - t).abs() <= atol)
        });
    }

    if desc.ant_str.is_some() && (desc.antenna_nums.is_some() || desc.bls.is_some()) {
        return Err(SelectionError::ConflictingSpec {
            axis: "blt".to_string(),
            reason: "ant_str may not be combined with antenna_nums or bls".to_string(),
        });
    }

    let mut pair_filter: Option<HashSet<(usize, usize)>> = None;
    let norm = |a: usize, b: usize| if a <= b { (a, b) } else { (b, a) };

    if let Some(ants) = &desc.antenna_nums {
        let with_data: HashSet<usize> = uvd.ants_with_data().into_iter().collect();
        for &ant in ants {
            if !with_data.contains(&ant) {
                return Err(SelectionError::ValueNotFound {
                    axis: "antenna".to_string(),
                    value: ant.to_string(),
                });
            }
        }
        let wanted: HashSet<usize> = ants.iter().copied().collect();
        rows.retain(|&r| {
            wanted.contains(&uvd.antenna_numbers[uvd.ant_1_array[r]])
                || wanted.contains(&uvd.antenna_numbers[uvd.ant_2_array[r]])
        });
    }

    if let Some(bls) = &desc.bls {
        let present: HashSet<(usize, usize)> = uvd
            .ant_1_array
            .iter()
            .zip(uvd.ant_2_array.iter())
            .map(|(&a1, &a2)| norm(uvd.antenna_numbers[a1], uvd.antenna_numbers[a2]))
            .collect();
        let mut wanted = HashSet::new();
        for &(a, b) in bls {
            let pair = norm(a, b);
            if !present.contains(&pair) {
                return Err(SelectionError::ValueNotFound {
                    axis: "baseline".to_string(),
                    value: format!("({}, {})", a, b),
                });
            }
            wanted.insert(pair);
        }
        pair_filter = Some(wanted);
    }

    let mut pol_restriction: Option<Vec<i32>> = None;
    if let Some(ant_str) = &desc.ant_str {
        let tokens = parse_ant_str(ant_str)?;
        let sel = eval_ant_str(&tokens, uvd, true)?;
        if let Some(pairs) = sel.pairs {
            pair_filter = Some(pairs.into_iter().map(|(a, b)| norm(a, b)).collect());
        }
        pol_restriction = sel.pols;
    }

    if let Some(wanted) = pair_filter {
        rows.retain(|&r| {
            wanted.contains(&norm(
                uvd.antenna_numbers[uvd.ant_1_array[r]],
                uvd.antenna_numbers[uvd.ant_2_array[r]],
            ))
        });
    }

    if let Some(restrict) = pol_restriction {
        pol_idxs.retain(|&i| restrict.contains(&uvd.polarization_array[i]));
    }

    if rows.is_empty() || chans.is_empty() || pol_idxs.is_empty() {
        warn!(
            "selection resolves to an empty axis (rows: {}, chans: {}, pols: {})",
            rows.len(),
            chans.len(),
            pol_idxs.len()
        );
    }

    Ok(ResolvedSelection {
        rows,
        chans,
        pols: pol_idxs,
    })
}

fn gather<T: Clone>(src: &[T], idxs: &[usize]) -> Vec<T> {
    idxs.iter().map(|&i| src[i].clone()).collect()
}

impl UVData {
    /// Apply an already-resolved selection: gather every linked array, prune
    /// the antenna table to referenced entries, and recompute the derived
    /// counts and baseline indices.
    ///
    /// # Errors
    ///
    /// Returns [`UVDataError::TooManyAntennas`] if baseline recomputation
    /// fails (which cannot happen for a dataset that passed
    /// [`UVData::check`]).
    pub fn apply_selection(&mut self, resolved: &ResolvedSelection) -> Result<(), UVDataError> {
        let ResolvedSelection { rows, chans, pols } = resolved;

        self.time_array = gather(&self.time_array, rows);
        self.ant_1_array = gather(&self.ant_1_array, rows);
        self.ant_2_array = gather(&self.ant_2_array, rows);
        self.uvw_array = gather(&self.uvw_array, rows);
        self.freq_array = gather(&self.freq_array, chans);
        self.spw_array = gather(&self.spw_array, chans);
        self.polarization_array = gather(&self.polarization_array, pols);

        let shape = (rows.len(), chans.len(), pols.len());
        if let Some(data) = self.data.take() {
            self.data = Some(Array3::from_shape_fn(shape, |(i, j, k)| {
                data[(rows[i], chans[j], pols[k])]
            }));
        }
        if let Some(flags) = self.flags.take() {
            self.flags = Some(Array3::from_shape_fn(shape, |(i, j, k)| {
                flags[(rows[i], chans[j], pols[k])]
            }));
        }
        if let Some(nsamples) = self.nsamples.take() {
            self.nsamples = Some(Array3::from_shape_fn(shape, |(i, j, k)| {
                nsamples[(rows[i], chans[j], pols[k])]
            }));
        }

        // prune antenna tables to referenced entries only
        let referenced: Vec<usize> = self
            .ant_1_array
            .iter()
            .chain(self.ant_2_array.iter())
            .copied()
            .unique()
            .sorted()
            .collect();
        let remap: Vec<Option<usize>> = {
            let mut m = vec![None; self.antenna_numbers.len()];
            for (new, &old) in referenced.iter().enumerate() {
                m[old] = Some(new);
            }
            m
        };
        self.antenna_numbers = gather(&self.antenna_numbers, &referenced);
        self.antenna_names = gather(&self.antenna_names, &referenced);
        self.antenna_positions = gather(&self.antenna_positions, &referenced);
        for idx in self.ant_1_array.iter_mut().chain(self.ant_2_array.iter_mut()) {
            // every retained row index appears in the referenced list
            *idx = remap[*idx].unwrap_or(0);
        }

        self.recompute_baselines()?;
        self.sync_counts();
        Ok(())
    }

    /// Select a subset in place. The receiver is untouched if resolution
    /// fails.
    ///
    /// # Errors
    ///
    /// See [`SelectionError`].
    pub fn select_in_place(&mut self, desc: &SelDescriptor) -> Result<(), UVDataError> {
        let resolved = resolve_selection(self, desc)?;
        self.apply_selection(&resolved)?;
        self.append_history(" Downselected data using uvdata.");
        Ok(())
    }

    /// Select a subset into a new object. The source is never aliased: the
    /// result owns deep copies of every retained array.
    ///
    /// # Errors
    ///
    /// See [`SelectionError`].
    pub fn select(&self, desc: &SelDescriptor) -> Result<UVData, UVDataError> {
        let mut out = self.clone();
        out.select_in_place(desc)?;
        Ok(out)
    }
}

//! Polarization codes, baseline index encoding and phase state.
//!
//! Polarization integers follow AIPS Memo 117: pseudo-Stokes 1:4 (I,Q,U,V);
//! circular -1:-4 (RR,LL,RL,LR); linear -5:-8 (XX,YY,XY,YX).

use std::collections::HashMap;

use lazy_static::lazy_static;
use log::warn;
use marlu::RADec;

use crate::UVDataError;

/// The largest antenna count representable by the baseline encoding.
pub const MAX_ANTS: usize = 2048;

lazy_static! {
    /// Upper-case polarization name to AIPS code.
    pub static ref POL_STR_TO_NUM: HashMap<&'static str, i32> = {
        let mut m = HashMap::new();
        m.insert("PI", 1);
        m.insert("PQ", 2);
        m.insert("PU", 3);
        m.insert("PV", 4);
        m.insert("I", 1);
        m.insert("Q", 2);
        m.insert("U", 3);
        m.insert("V", 4);
        m.insert("RR", -1);
        m.insert("LL", -2);
        m.insert("RL", -3);
        m.insert("LR", -4);
        m.insert("XX", -5);
        m.insert("YY", -6);
        m.insert("XY", -7);
        m.insert("YX", -8);
        m
    };
    /// AIPS code to canonical polarization name.
    pub static ref POL_NUM_TO_STR: HashMap<i32, &'static str> = {
        let mut m = HashMap::new();
        m.insert(1, "pI");
        m.insert(2, "pQ");
        m.insert(3, "pU");
        m.insert(4, "pV");
        m.insert(-1, "rr");
        m.insert(-2, "ll");
        m.insert(-3, "rl");
        m.insert(-4, "lr");
        m.insert(-5, "xx");
        m.insert(-6, "yy");
        m.insert(-7, "xy");
        m.insert(-8, "yx");
        m
    };
}

/// Convert a polarization name (case-insensitive, e.g. `"xx"`, `"pI"`) to its
/// AIPS integer code.
///
/// # Errors
///
/// Returns [`UVDataError::UnknownPolarization`] for unrecognised names.
pub fn pol_str_to_num(pol: &str) -> Result<i32, UVDataError> {
    POL_STR_TO_NUM
        .get(pol.to_uppercase().as_str())
        .copied()
        .ok_or_else(|| UVDataError::UnknownPolarization {
            pol: pol.to_string(),
        })
}

/// Convert an AIPS polarization code to its canonical name.
///
/// # Errors
///
/// Returns [`UVDataError::UnknownPolarization`] for codes outside -8..=4.
pub fn pol_num_to_str(pol: i32) -> Result<&'static str, UVDataError> {
    POL_NUM_TO_STR
        .get(&pol)
        .copied()
        .ok_or_else(|| UVDataError::UnknownPolarization {
            pol: pol.to_string(),
        })
}

/// Encode an antenna pair as a single baseline index.
///
/// Uses the 2048-antenna convention `2048 * (ant2 + 1) + (ant1 + 1) + 2^16`.
/// With `attempt256`, the legacy 256-antenna convention
/// `256 * (ant2 + 1) + (ant1 + 1)` is used instead when both antenna numbers
/// fit, falling back (with a warning) to the 2048 convention when they don't.
///
/// # Errors
///
/// Returns [`UVDataError::TooManyAntennas`] when `nants_telescope` exceeds
/// [`MAX_ANTS`].
pub fn antnums_to_baseline(
    ant1: usize,
    ant2: usize,
    nants_telescope: usize,
    attempt256: bool,
) -> Result<u64, UVDataError> {
    if nants_telescope > MAX_ANTS {
        return Err(UVDataError::TooManyAntennas {
            nants: nants_telescope,
        });
    }
    if attempt256 {
        if ant1 < 255 && ant2 < 255 {
            return Ok(256 * (ant2 as u64 + 1) + (ant1 as u64 + 1));
        }
        warn!(
            "antnums_to_baseline: antenna numbers ({}, {}) too large for the \
             256 convention, using 2048 baseline indexing",
            ant1, ant2
        );
    }
    Ok(2048 * (ant2 as u64 + 1) + (ant1 as u64 + 1) + 65536)
}

/// Decode a baseline index into its antenna pair, handling both the 2048 and
/// the legacy 256 conventions.
pub fn baseline_to_antnums(baseline: u64) -> (usize, usize) {
    if baseline > 65536 {
        // the ant1 term wraps to 0 for the last antenna number (2047)
        let rem = (baseline - 65536) % 2048;
        let ant1 = if rem == 0 { 2047 } else { rem - 1 };
        let ant2 = (baseline - 65536 - (ant1 + 1)) / 2048 - 1;
        (ant1 as usize, ant2 as usize)
    } else {
        let rem = baseline % 256;
        let ant1 = if rem == 0 { 255 } else { rem - 1 };
        let ant2 = (baseline - (ant1 + 1)) / 256 - 1;
        (ant1 as usize, ant2 as usize)
    }
}

/// Whether a dataset's data are referenced to a fixed sky direction
/// ("phased") or to local zenith at each time ("drift").
#[derive(Debug, Clone, Copy)]
pub enum PhaseType {
    /// Data are referenced to zenith at each integration.
    Drift,
    /// Data are phased to a fixed direction.
    Phased {
        /// The phase centre.
        centre: RADec,
        /// Epoch year of the phase centre coordinates (e.g. 2000.0).
        epoch: f64,
    },
}

impl Default for PhaseType {
    fn default() -> Self {
        Self::Drift
    }
}

impl PhaseType {
    /// True when both states are in the same phase category, and for phased
    /// datasets the centres and epochs agree to within `tol_rad` radians.
    pub fn matches(&self, other: &Self, tol_rad: f64) -> bool {
        match (self, other) {
            (Self::Drift, Self::Drift) => true,
            (
                Self::Phased {
                    centre: a,
                    epoch: ea,
                },
                Self::Phased {
                    centre: b,
                    epoch: eb,
                },
            ) => {
                (a.ra - b.ra).abs() <= tol_rad
                    && (a.dec - b.dec).abs() <= tol_rad
                    && (ea - eb).abs() <= f64::EPSILON
            }
            _ => false,
        }
    }

    /// True for the phased category.
    pub fn is_phased(&self) -> bool {
        matches!(self, Self::Phased { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pol_str_round_trip() {
        for (name, num) in [("xx", -5), ("YX", -8), ("rr", -1), ("pI", 1), ("v", 4)] {
            assert_eq!(pol_str_to_num(name).unwrap(), num);
        }
        assert_eq!(pol_num_to_str(-5).unwrap(), "xx");
        assert_eq!(pol_num_to_str(1).unwrap(), "pI");
        assert!(pol_str_to_num("zz").is_err());
        assert!(pol_num_to_str(9).is_err());
    }

    #[test]
    fn test_baseline_encoding_2048() {
        let bl = antnums_to_baseline(0, 0, 128, false).unwrap();
        assert_eq!(bl, 2048 + 1 + 65536);
        assert_eq!(baseline_to_antnums(bl), (0, 0));

        let bl = antnums_to_baseline(3, 7, 128, false).unwrap();
        assert_eq!(baseline_to_antnums(bl), (3, 7));

        // largest representable antenna 1 number; the modulo term is zero here
        let bl = antnums_to_baseline(2047, 0, 2048, false).unwrap();
        assert_eq!(baseline_to_antnums(bl), (2047, 0));
        let bl = antnums_to_baseline(2047, 2047, 2048, false).unwrap();
        assert_eq!(baseline_to_antnums(bl), (2047, 2047));
    }

    #[test]
    fn test_baseline_encoding_256() {
        let bl = antnums_to_baseline(1, 2, 128, true).unwrap();
        assert_eq!(bl, 256 * 3 + 2);
        assert_eq!(baseline_to_antnums(bl), (1, 2));

        // falls back to 2048 when antenna numbers don't fit
        let bl = antnums_to_baseline(300, 2, 512, true).unwrap();
        assert!(bl > 65536);
        assert_eq!(baseline_to_antnums(bl), (300, 2));

        // legacy index with antenna 1 number 255 decodes without wrapping
        assert_eq!(baseline_to_antnums(256 * 3 + 256), (255, 2));
    }

    #[test]
    fn test_too_many_antennas() {
        assert!(matches!(
            antnums_to_baseline(0, 1, 4096, false),
            Err(UVDataError::TooManyAntennas { nants: 4096 })
        ));
    }

    #[test]
    fn test_phase_type_matches() {
        let tol = 1e-9;
        assert!(PhaseType::Drift.matches(&PhaseType::Drift, tol));
        let phased = PhaseType::Phased {
            centre: RADec::from_degrees(0.0, -27.0),
            epoch: 2000.0,
        };
        assert!(!phased.matches(&PhaseType::Drift, tol));
        assert!(phased.matches(&phased, tol));
    }
}

//! Synthetic datasets shared across the unit tests.

use marlu::{ndarray::Array3, Complex, LatLngHeight, XyzGeodetic, UVW};

use crate::dataset::{UVData, UVMetaBuilder};

/// Build a dataset over `nants` antennas and `ntimes` integrations with
/// every antenna pair (autocorrelations included) present at every time.
///
/// Antennas are numbered from zero and placed on a line along x at 10 m
/// spacing, so the layout has genuinely redundant baselines. Rows are
/// ordered time-major with baseline indices ascending within each time,
/// and every bulk cell carries a distinct, exactly-representable value.
fn synthetic(nants: usize, ntimes: usize, nfreqs: usize) -> UVData {
    let antenna_numbers: Vec<usize> = (0..nants).collect();
    let antenna_names: Vec<String> = (0..nants).map(|i| format!("SYN{i:03}")).collect();
    let antenna_positions: Vec<XyzGeodetic> = (0..nants)
        .map(|i| XyzGeodetic {
            x: i as f64 * 10.0,
            y: 0.0,
            z: 0.0,
        })
        .collect();

    // ascending baseline-index order within a time
    let mut pairs = Vec::new();
    for a2 in 0..nants {
        for a1 in 0..=a2 {
            pairs.push((a1, a2));
        }
    }

    let mut time_array = Vec::new();
    let mut ant_1_array = Vec::new();
    let mut ant_2_array = Vec::new();
    let mut uvw_array = Vec::new();
    for t in 0..ntimes {
        let jd = 2458000.0 + t as f64 * 2.0 / 86400.0;
        for &(a1, a2) in &pairs {
            time_array.push(jd);
            ant_1_array.push(a1);
            ant_2_array.push(a2);
            uvw_array.push(UVW {
                u: antenna_positions[a2].x - antenna_positions[a1].x,
                v: antenna_positions[a2].y - antenna_positions[a1].y,
                w: antenna_positions[a2].z - antenna_positions[a1].z,
            });
        }
    }

    let freq_array: Vec<f64> = (0..nfreqs).map(|i| 100e6 + i as f64 * 40e3).collect();
    let spw_array = vec![0; nfreqs];
    let polarization_array = vec![-5, -6, -7, -8];

    let nblts = time_array.len();
    let npols = polarization_array.len();
    let shape = (nblts, nfreqs, npols);
    let data = Array3::from_shape_fn(shape, |(i, j, k)| {
        let cell = (i * nfreqs + j) * npols + k;
        Complex::new(cell as f32, -(cell as f32) / 2.0)
    });
    let flags = Array3::from_shape_fn(shape, |(i, j, k)| (i + j + k) % 7 == 0);
    let nsamples = Array3::from_shape_fn(shape, |(_, j, _)| 1.0 + (j % 3) as f32);

    let meta = UVMetaBuilder::default()
        .telescope_name("SYNTH".to_string())
        .instrument("synth correlator".to_string())
        .object_name("zenith".to_string())
        .vis_units("uncalib".to_string())
        .integration_time(2.0)
        .channel_width(40e3)
        .array_pos(LatLngHeight::new_mwa())
        .build()
        .unwrap();

    let mut uvd = UVData {
        meta,
        time_array,
        ant_1_array,
        ant_2_array,
        baseline_array: Vec::new(),
        uvw_array,
        freq_array,
        spw_array,
        polarization_array,
        antenna_numbers,
        antenna_names,
        antenna_positions,
        data: Some(data),
        flags: Some(flags),
        nsamples: Some(nsamples),
    };
    uvd.recompute_baselines().unwrap();
    uvd.sync_counts();
    uvd.check().unwrap();
    uvd
}

/// A small dataset: 4 antennas, 10 baselines, 2 times, 4 channels, 4 pols.
pub fn synthetic_uvdata() -> UVData {
    synthetic(4, 2, 4)
}

/// A dataset with the shape `(1360, 64, 4)`: 16 antennas (136 baselines),
/// 10 times, 64 channels, 4 pols.
pub fn synthetic_uvdata_large() -> UVData {
    synthetic(16, 10, 64)
}

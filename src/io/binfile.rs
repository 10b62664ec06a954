//! A flat binary visibility store with independently-addressable cells.
//!
//! The layout is a magic tag, a little-endian length-prefixed JSON metadata
//! header describing the full shape of the store, then one fixed-stride
//! record per `(row, channel, polarization)` cell: `re: f32`, `im: f32`,
//! `flag: u8`, `nsample: f32`. Fixed strides are what make partial reads
//! and writes addressable by the selection resolver: any chunk of the grid
//! can be touched without deserializing the rest.
//!
//! A store is created fully allocated, zeroed and flagged, so that
//! non-overlapping chunks can be written in any order and a partially
//! written store is still a valid (if flagged) dataset.

use std::{
    fs::{File, OpenOptions},
    io::{BufWriter, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use log::{trace, warn};
use marlu::{ndarray::Array3, Complex, LatLngHeight, RADec, XyzGeodetic, UVW};
use serde::{Deserialize, Serialize};

use super::{error::IOError, VisRead, VisWrite};
use crate::{
    dataset::{UVData, UVMeta},
    selection::{
        resolve_selection, ResolvedSelection, SelDescriptor, DEFAULT_FREQ_ATOL, DEFAULT_TIME_ATOL,
    },
    types::PhaseType,
    UVDataError,
};

const MAGIC: &[u8; 8] = b"UVBIN\x00\x00\x01";
/// Bytes per cell: re, im, flag, nsample.
const CELL_BYTES: u64 = 4 + 4 + 1 + 4;

/// Serialized form of the phase state.
#[derive(Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum PhaseHeader {
    Drift,
    Phased { ra_rad: f64, dec_rad: f64, epoch: f64 },
}

/// The JSON metadata header. Plain types only, so the wire format is
/// independent of in-memory representations.
#[derive(Serialize, Deserialize)]
struct Header {
    telescope_name: String,
    instrument: String,
    object_name: String,
    vis_units: String,
    history: String,
    integration_time: f64,
    channel_width: f64,
    // longitude and latitude in radians, height in metres
    array_pos: [f64; 3],
    phase: PhaseHeader,
    time_array: Vec<f64>,
    // antenna numbers per row, not table indices
    ant_1_numbers: Vec<usize>,
    ant_2_numbers: Vec<usize>,
    uvw_array: Vec<[f64; 3]>,
    freq_array: Vec<f64>,
    spw_array: Vec<usize>,
    polarization_array: Vec<i32>,
    antenna_numbers: Vec<usize>,
    antenna_names: Vec<String>,
    antenna_positions: Vec<[f64; 3]>,
}

impl Header {
    fn from_uvdata(uvd: &UVData) -> Self {
        Self {
            telescope_name: uvd.meta.telescope_name.clone(),
            instrument: uvd.meta.instrument.clone(),
            object_name: uvd.meta.object_name.clone(),
            vis_units: uvd.meta.vis_units.clone(),
            history: uvd.meta.history.clone(),
            integration_time: uvd.meta.integration_time,
            channel_width: uvd.meta.channel_width,
            array_pos: [
                uvd.meta.array_pos.longitude_rad,
                uvd.meta.array_pos.latitude_rad,
                uvd.meta.array_pos.height_metres,
            ],
            phase: match &uvd.meta.phase {
                PhaseType::Drift => PhaseHeader::Drift,
                PhaseType::Phased { centre, epoch } => PhaseHeader::Phased {
                    ra_rad: centre.ra,
                    dec_rad: centre.dec,
                    epoch: *epoch,
                },
            },
            time_array: uvd.time_array.clone(),
            ant_1_numbers: uvd
                .ant_1_array
                .iter()
                .map(|&i| uvd.antenna_numbers[i])
                .collect(),
            ant_2_numbers: uvd
                .ant_2_array
                .iter()
                .map(|&i| uvd.antenna_numbers[i])
                .collect(),
            uvw_array: uvd.uvw_array.iter().map(|x| [x.u, x.v, x.w]).collect(),
            freq_array: uvd.freq_array.clone(),
            spw_array: uvd.spw_array.clone(),
            polarization_array: uvd.polarization_array.clone(),
            antenna_numbers: uvd.antenna_numbers.clone(),
            antenna_names: uvd.antenna_names.clone(),
            antenna_positions: uvd
                .antenna_positions
                .iter()
                .map(|p| [p.x, p.y, p.z])
                .collect(),
        }
    }

    fn into_uvdata(self, path: &Path) -> Result<UVData, IOError> {
        let ant_index = |num: usize| {
            self.antenna_numbers
                .iter()
                .position(|&n| n == num)
                .ok_or_else(|| IOError::InvalidStore {
                    path: path.to_path_buf(),
                    reason: format!("row references antenna {num} missing from the table"),
                })
        };
        let ant_1_array = self
            .ant_1_numbers
            .iter()
            .map(|&n| ant_index(n))
            .collect::<Result<Vec<usize>, IOError>>()?;
        let ant_2_array = self
            .ant_2_numbers
            .iter()
            .map(|&n| ant_index(n))
            .collect::<Result<Vec<usize>, IOError>>()?;

        let mut uvd = UVData {
            meta: UVMeta {
                telescope_name: self.telescope_name,
                instrument: self.instrument,
                object_name: self.object_name,
                vis_units: self.vis_units,
                history: self.history,
                integration_time: self.integration_time,
                channel_width: self.channel_width,
                array_pos: LatLngHeight {
                    longitude_rad: self.array_pos[0],
                    latitude_rad: self.array_pos[1],
                    height_metres: self.array_pos[2],
                },
                phase: match self.phase {
                    PhaseHeader::Drift => PhaseType::Drift,
                    PhaseHeader::Phased {
                        ra_rad,
                        dec_rad,
                        epoch,
                    } => PhaseType::Phased {
                        centre: RADec {
                            ra: ra_rad,
                            dec: dec_rad,
                        },
                        epoch,
                    },
                },
                ..UVMeta::default()
            },
            time_array: self.time_array,
            ant_1_array,
            ant_2_array,
            baseline_array: Vec::new(),
            uvw_array: self
                .uvw_array
                .iter()
                .map(|&[u, v, w]| UVW { u, v, w })
                .collect(),
            freq_array: self.freq_array,
            spw_array: self.spw_array,
            polarization_array: self.polarization_array,
            antenna_numbers: self.antenna_numbers,
            antenna_names: self.antenna_names,
            antenna_positions: self
                .antenna_positions
                .iter()
                .map(|&[x, y, z]| XyzGeodetic { x, y, z })
                .collect(),
            data: None,
            flags: None,
            nsamples: None,
        };
        uvd.recompute_baselines()
            .map_err(|e| IOError::InvalidStore {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        uvd.sync_counts();
        Ok(uvd)
    }
}

/// An open binary visibility store.
///
/// Holds a metadata-only [`UVData`] describing the store's full shape;
/// selections for partial reads and writes are resolved against it.
pub struct BinFile {
    path: PathBuf,
    file: File,
    meta: UVData,
    data_start: u64,
    finalized: bool,
}

impl BinFile {
    /// Create a store at `path` shaped like `uvd`, fully allocated with
    /// zeroed data and every cell flagged. `uvd` may be metadata-only; any
    /// bulk arrays it carries are *not* written (use [`BinFile::write_part`]
    /// or [`BinFile::write`]).
    ///
    /// # Errors
    ///
    /// [`IOError::ExistingFile`] when `path` exists and `overwrite` is
    /// false, or any filesystem error.
    pub fn create<P: AsRef<Path>>(path: P, uvd: &UVData, overwrite: bool) -> Result<Self, IOError> {
        let path = path.as_ref();
        if path.exists() && !overwrite {
            return Err(IOError::ExistingFile {
                path: path.to_path_buf(),
            });
        }
        trace!("creating visibility store at {:?}", path);

        let header = serde_json::to_vec(&Header::from_uvdata(uvd))?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(MAGIC)?;
        writer.write_u64::<LittleEndian>(header.len() as u64)?;
        writer.write_all(&header)?;

        let (nblts, nfreqs, npols) = uvd.bulk_shape();
        let ncells = (nblts * nfreqs * npols) as u64;
        // zeroed data and nsamples, flag byte set
        let cell = {
            let mut c = [0u8; CELL_BYTES as usize];
            c[8] = 1;
            c
        };
        for _ in 0..ncells {
            writer.write_all(&cell)?;
        }
        writer.flush()?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;

        let mut meta = uvd.clone();
        meta.data = None;
        meta.flags = None;
        meta.nsamples = None;

        let data_start = (MAGIC.len() + 8 + header.len()) as u64;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            meta,
            data_start,
            finalized: false,
        })
    }

    /// Open an existing store.
    ///
    /// # Errors
    ///
    /// [`IOError::InvalidStore`] when `path` is not a store, or any
    /// filesystem error.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, IOError> {
        let path = path.as_ref();
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;
        let invalid = |reason: &str| IOError::InvalidStore {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        };

        let mut magic = [0u8; 8];
        file.read_exact(&mut magic)
            .map_err(|_| invalid("file too short for the magic tag"))?;
        if &magic != MAGIC {
            return Err(invalid("bad magic tag"));
        }
        let mut len_bytes = [0u8; 8];
        file.read_exact(&mut len_bytes)?;
        let header_len = LittleEndian::read_u64(&len_bytes) as usize;
        let mut header_bytes = vec![0u8; header_len];
        file.read_exact(&mut header_bytes)
            .map_err(|_| invalid("file too short for its metadata header"))?;
        let header: Header = serde_json::from_slice(&header_bytes)?;
        let meta = header.into_uvdata(path)?;

        let data_start = (MAGIC.len() + 8 + header_len) as u64;
        let (nblts, nfreqs, npols) = meta.bulk_shape();
        let expected = data_start + (nblts * nfreqs * npols) as u64 * CELL_BYTES;
        if file.metadata()?.len() < expected {
            return Err(invalid("file too short for its declared shape"));
        }

        Ok(Self {
            path: path.to_path_buf(),
            file,
            meta,
            data_start,
            finalized: false,
        })
    }

    /// The metadata-only dataset describing the store's full shape.
    pub fn meta(&self) -> &UVData {
        &self.meta
    }

    fn cell_offset(&self, row: usize, chan: usize, pol: usize) -> u64 {
        let (_, nfreqs, npols) = self.meta.bulk_shape();
        self.data_start + ((row * nfreqs + chan) * npols + pol) as u64 * CELL_BYTES
    }

    fn resolve(&self, desc: &SelDescriptor) -> Result<ResolvedSelection, UVDataError> {
        Ok(resolve_selection(&self.meta, desc)?)
    }

    /// A chunk with the right shape can still describe the wrong cells;
    /// every axis value must agree with the store's value at the index it
    /// would land on.
    fn check_chunk_axes(
        &self,
        chunk: &UVData,
        resolved: &ResolvedSelection,
    ) -> Result<(), UVDataError> {
        let mismatch = |reason: String| UVDataError::Io(IOError::MetadataMismatch { reason });
        if chunk.time_array.len() != resolved.rows.len()
            || chunk.baseline_array.len() != resolved.rows.len()
            || chunk.freq_array.len() != resolved.chans.len()
            || chunk.polarization_array.len() != resolved.pols.len()
        {
            return Err(mismatch(
                "chunk axis array lengths do not match the selection".to_string(),
            ));
        }
        for (i, &row) in resolved.rows.iter().enumerate() {
            if (chunk.time_array[i] - self.meta.time_array[row]).abs() > DEFAULT_TIME_ATOL {
                return Err(mismatch(format!(
                    "chunk row {} has time {}, store row {} has {}",
                    i, chunk.time_array[i], row, self.meta.time_array[row]
                )));
            }
            if chunk.baseline_array[i] != self.meta.baseline_array[row] {
                return Err(mismatch(format!(
                    "chunk row {} has baseline {}, store row {} has {}",
                    i, chunk.baseline_array[i], row, self.meta.baseline_array[row]
                )));
            }
        }
        for (j, &chan) in resolved.chans.iter().enumerate() {
            if (chunk.freq_array[j] - self.meta.freq_array[chan]).abs() > DEFAULT_FREQ_ATOL {
                return Err(mismatch(format!(
                    "chunk channel {} has frequency {}, store channel {} has {}",
                    j, chunk.freq_array[j], chan, self.meta.freq_array[chan]
                )));
            }
        }
        for (k, &pol) in resolved.pols.iter().enumerate() {
            if chunk.polarization_array[k] != self.meta.polarization_array[pol] {
                return Err(mismatch(format!(
                    "chunk polarization {} is {}, store polarization {} is {}",
                    k, chunk.polarization_array[k], pol, self.meta.polarization_array[pol]
                )));
            }
        }
        Ok(())
    }

    /// Read the cells a descriptor selects, returning a self-consistent
    /// dataset with the gathered metadata and bulk arrays.
    ///
    /// # Errors
    ///
    /// Selection errors from resolving `desc`, or any filesystem error.
    pub fn read_part(&mut self, desc: &SelDescriptor) -> Result<UVData, UVDataError> {
        let resolved = self.resolve(desc)?;
        let mut out = self.meta.clone();
        out.apply_selection(&resolved)?;

        let (_, nfreqs, npols) = self.meta.bulk_shape();
        let shape = resolved.shape();
        let mut data = Array3::<Complex<f32>>::zeros(shape);
        let mut flags = Array3::<bool>::from_elem(shape, false);
        let mut nsamples = Array3::<f32>::zeros(shape);

        let io_err = |e: std::io::Error| UVDataError::Io(IOError::Io(e));
        let mut row_buf = vec![0u8; nfreqs * npols * CELL_BYTES as usize];
        for (i, &row) in resolved.rows.iter().enumerate() {
            self.file
                .seek(SeekFrom::Start(self.cell_offset(row, 0, 0)))
                .map_err(io_err)?;
            self.file.read_exact(&mut row_buf).map_err(io_err)?;
            for (j, &chan) in resolved.chans.iter().enumerate() {
                for (k, &pol) in resolved.pols.iter().enumerate() {
                    let at = (chan * npols + pol) * CELL_BYTES as usize;
                    let cell = &row_buf[at..at + CELL_BYTES as usize];
                    data[(i, j, k)] = Complex::new(
                        LittleEndian::read_f32(&cell[0..4]),
                        LittleEndian::read_f32(&cell[4..8]),
                    );
                    flags[(i, j, k)] = cell[8] != 0;
                    nsamples[(i, j, k)] = LittleEndian::read_f32(&cell[9..13]);
                }
            }
        }

        out.data = Some(data);
        out.flags = Some(flags);
        out.nsamples = Some(nsamples);
        Ok(out)
    }

    /// Read the entire store.
    ///
    /// # Errors
    ///
    /// As [`BinFile::read_part`].
    pub fn read(&mut self) -> Result<UVData, UVDataError> {
        self.read_part(&SelDescriptor::default())
    }

    /// Write a chunk's bulk arrays to the cells a descriptor selects.
    ///
    /// The chunk must carry all three bulk arrays, their shape must match
    /// what `desc` resolves to against the store, and the chunk's axis
    /// values must agree with the store's at the resolved indices;
    /// metadata headers are written at creation and never touched here,
    /// which is what lets disjoint chunks land in any order.
    ///
    /// # Errors
    ///
    /// [`IOError::BadChunkShape`], [`IOError::MetadataMismatch`],
    /// [`IOError::MetadataOnly`], [`IOError::Finalized`], selection
    /// errors from resolving `desc`, or any filesystem error.
    pub fn write_part(&mut self, chunk: &UVData, desc: &SelDescriptor) -> Result<(), UVDataError> {
        if self.finalized {
            return Err(UVDataError::Io(IOError::Finalized));
        }
        let resolved = self.resolve(desc)?;
        let (data, flags, nsamples) = match (&chunk.data, &chunk.flags, &chunk.nsamples) {
            (Some(d), Some(f), Some(n)) => (d, f, n),
            _ => return Err(UVDataError::Io(IOError::MetadataOnly)),
        };
        if data.dim() != resolved.shape() {
            return Err(UVDataError::Io(IOError::BadChunkShape {
                expected: format!("{:?}", resolved.shape()),
                received: format!("{:?}", data.dim()),
            }));
        }
        self.check_chunk_axes(chunk, &resolved)?;

        let io_err = |e: std::io::Error| UVDataError::Io(IOError::Io(e));
        let mut cell = [0u8; CELL_BYTES as usize];
        for (i, &row) in resolved.rows.iter().enumerate() {
            for (j, &chan) in resolved.chans.iter().enumerate() {
                // polarizations of one channel are contiguous when the
                // selection keeps them all
                for (k, &pol) in resolved.pols.iter().enumerate() {
                    let v = data[(i, j, k)];
                    LittleEndian::write_f32(&mut cell[0..4], v.re);
                    LittleEndian::write_f32(&mut cell[4..8], v.im);
                    cell[8] = u8::from(flags[(i, j, k)]);
                    LittleEndian::write_f32(&mut cell[9..13], nsamples[(i, j, k)]);
                    self.file
                        .seek(SeekFrom::Start(self.cell_offset(row, chan, pol)))
                        .map_err(io_err)?;
                    self.file.write_all(&cell).map_err(io_err)?;
                }
            }
        }
        Ok(())
    }

    /// Flush everything to disk and close the store for writing.
    ///
    /// # Errors
    ///
    /// Any filesystem error.
    pub fn finalize(&mut self) -> Result<(), IOError> {
        self.file.flush()?;
        self.file.sync_all()?;
        self.finalized = true;
        trace!("finalized visibility store at {:?}", self.path);
        Ok(())
    }

    /// Create a store at `path` and write the whole of `uvd` to it.
    ///
    /// # Errors
    ///
    /// As [`BinFile::create`] and [`BinFile::write_part`]; additionally
    /// [`IOError::MetadataOnly`] when `uvd` has no bulk arrays.
    pub fn write<P: AsRef<Path>>(
        path: P,
        uvd: &UVData,
        overwrite: bool,
    ) -> Result<(), UVDataError> {
        let mut store = Self::create(path, uvd, overwrite).map_err(UVDataError::Io)?;
        store.write_part(uvd, &SelDescriptor::default())?;
        store.finalize().map_err(UVDataError::Io)?;
        Ok(())
    }
}

impl Drop for BinFile {
    fn drop(&mut self) {
        if !self.finalized {
            if let Err(e) = self.file.flush().and_then(|_| self.file.sync_all()) {
                warn!("dropping unfinalized store {:?}: {}", self.path, e);
            }
        }
    }
}

impl VisRead for BinFile {
    fn read_metadata(&mut self) -> Result<UVData, UVDataError> {
        Ok(self.meta.clone())
    }

    fn read_part(&mut self, desc: &SelDescriptor) -> Result<UVData, UVDataError> {
        BinFile::read_part(self, desc)
    }
}

impl VisWrite for BinFile {
    fn write_part(&mut self, chunk: &UVData, desc: &SelDescriptor) -> Result<(), UVDataError> {
        BinFile::write_part(self, chunk, desc)
    }

    fn finalize(&mut self) -> Result<(), UVDataError> {
        BinFile::finalize(self).map_err(UVDataError::Io)
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use tempfile::tempdir;

    use super::*;
    use crate::test_common::{synthetic_uvdata, synthetic_uvdata_large};

    #[test]
    fn test_write_read_round_trip() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("vis.uvbin");
        let uvd = synthetic_uvdata();
        BinFile::write(&path, &uvd, false).unwrap();

        let mut store = BinFile::open(&path).unwrap();
        let back = store.read().unwrap();
        back.check().unwrap();
        assert_eq!(back.bulk_shape(), uvd.bulk_shape());
        assert_eq!(back.baseline_array, uvd.baseline_array);
        assert_eq!(back.polarization_array, uvd.polarization_array);
        assert_abs_diff_eq!(back.data.as_ref().unwrap(), uvd.data.as_ref().unwrap());
        assert_eq!(back.flags, uvd.flags);
        assert_abs_diff_eq!(
            back.nsamples.as_ref().unwrap(),
            uvd.nsamples.as_ref().unwrap()
        );
    }

    #[test]
    fn test_create_refuses_existing() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("vis.uvbin");
        let uvd = synthetic_uvdata();
        BinFile::write(&path, &uvd, false).unwrap();
        assert!(matches!(
            BinFile::create(&path, &uvd, false),
            Err(IOError::ExistingFile { .. })
        ));
        // and overwrites on request
        BinFile::create(&path, &uvd, true).unwrap();
    }

    #[test]
    fn test_open_rejects_garbage() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("not_a_store");
        std::fs::write(&path, b"certainly not a visibility store").unwrap();
        assert!(matches!(
            BinFile::open(&path),
            Err(IOError::InvalidStore { .. })
        ));
    }

    #[test]
    fn test_metadata_only_round_trip() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("vis.uvbin");
        let uvd = synthetic_uvdata();
        {
            let mut store = BinFile::create(&path, &uvd, false).unwrap();
            store.finalize().unwrap();
        }
        let mut store = BinFile::open(&path).unwrap();
        let meta = store.read_metadata().unwrap();
        assert!(meta.is_metadata_only());
        assert_eq!(meta.bulk_shape(), uvd.bulk_shape());
        assert_eq!(meta.freq_array, uvd.freq_array);
        meta.check().unwrap();

        // an unwritten store reads back zeroed and fully flagged
        let back = store.read().unwrap();
        assert!(back.flags.as_ref().unwrap().iter().all(|&f| f));
        assert!(back
            .data
            .as_ref()
            .unwrap()
            .iter()
            .all(|v| v.re == 0.0 && v.im == 0.0));
    }

    #[test]
    fn test_partial_writes_reassemble_bit_identical() {
        let tmp = tempdir().unwrap();
        let whole_path = tmp.path().join("whole.uvbin");
        let parts_path = tmp.path().join("parts.uvbin");
        let uvd = synthetic_uvdata_large();

        BinFile::write(&whole_path, &uvd, false).unwrap();

        // write the same store in two frequency chunks
        let lo = uvd.select(&SelDescriptor::freq_range(0, 32)).unwrap();
        let hi = uvd.select(&SelDescriptor::freq_range(32, 64)).unwrap();
        let mut store = BinFile::create(&parts_path, &uvd, false).unwrap();
        store
            .write_part(&hi, &SelDescriptor::freq_range(32, 64))
            .unwrap();
        store
            .write_part(&lo, &SelDescriptor::freq_range(0, 32))
            .unwrap();
        store.finalize().unwrap();
        drop(store);

        let whole_bytes = std::fs::read(&whole_path).unwrap();
        let parts_bytes = std::fs::read(&parts_path).unwrap();
        assert_eq!(whole_bytes, parts_bytes);
    }

    #[test]
    fn test_partial_read_matches_select() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("vis.uvbin");
        let uvd = synthetic_uvdata_large();
        BinFile::write(&path, &uvd, false).unwrap();

        let desc = SelDescriptor::freq_range(16, 48);
        let expected = uvd.select(&desc).unwrap();
        let mut store = BinFile::open(&path).unwrap();
        let got = store.read_part(&desc).unwrap();
        got.check().unwrap();
        assert_eq!(got.freq_array, expected.freq_array);
        assert_abs_diff_eq!(
            got.data.as_ref().unwrap(),
            expected.data.as_ref().unwrap()
        );
        assert_eq!(got.flags, expected.flags);
    }

    #[test]
    fn test_write_part_shape_mismatch() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("vis.uvbin");
        let uvd = synthetic_uvdata_large();
        let mut store = BinFile::create(&path, &uvd, false).unwrap();
        let lo = uvd.select(&SelDescriptor::freq_range(0, 32)).unwrap();
        assert!(matches!(
            store.write_part(&lo, &SelDescriptor::freq_range(0, 16)),
            Err(UVDataError::Io(IOError::BadChunkShape { .. }))
        ));
    }

    #[test]
    fn test_write_part_wrong_channels_rejected() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("vis.uvbin");
        let uvd = synthetic_uvdata_large();
        let mut store = BinFile::create(&path, &uvd, false).unwrap();
        // right shape, wrong channels: the chunk would land on cells it
        // does not describe
        let lo = uvd.select(&SelDescriptor::freq_range(0, 32)).unwrap();
        assert!(matches!(
            store.write_part(&lo, &SelDescriptor::freq_range(32, 64)),
            Err(UVDataError::Io(IOError::MetadataMismatch { .. }))
        ));
        // and the matching descriptor still goes through
        store
            .write_part(&lo, &SelDescriptor::freq_range(0, 32))
            .unwrap();
    }

    #[test]
    fn test_write_after_finalize_fails() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("vis.uvbin");
        let uvd = synthetic_uvdata();
        let mut store = BinFile::create(&path, &uvd, false).unwrap();
        store.finalize().unwrap();
        assert!(matches!(
            store.write_part(&uvd, &SelDescriptor::default()),
            Err(UVDataError::Io(IOError::Finalized))
        ));
    }
}

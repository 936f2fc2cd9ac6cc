//! Flat vector store and DVIX snapshot format.
//!
//! The store is append-only: `add` assigns the next position and there is no
//! in-place delete (reclamation happens through an engine-level rebuild).
//! Search is a brute-force squared-Euclidean scan, parallelized with rayon
//! once the corpus is large enough for the fan-out to pay off.
//!
//! Snapshot format (little-endian):
//!
//! Header:
//!   Magic: "DVIX" (4 bytes)
//!   Version: u16
//!   Dimension: u32
//!   Count: u32
//!   HeaderCRC32: u32 (CRC32 of header bytes before this field)
//!
//! Vector slab:
//!   Count × Dimension × 4 bytes of f32, contiguous.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use anyhow::{bail, Context, Result};
use rayon::prelude::*;
use thiserror::Error;

pub const DVIX_MAGIC: [u8; 4] = *b"DVIX";
pub const DVIX_VERSION: u16 = 1;

/// Minimum vector count for parallel search. Below this the rayon task
/// overhead outweighs the scan itself.
const PARALLEL_THRESHOLD: usize = 10_000;

/// Set DOCDEX_PARALLEL_SEARCH=0 to force the sequential scan.
static PARALLEL_SEARCH_ENABLED: once_cell::sync::Lazy<bool> =
    once_cell::sync::Lazy::new(|| {
        dotenvy::var("DOCDEX_PARALLEL_SEARCH")
            .map(|v| v != "0" && v.to_lowercase() != "false")
            .unwrap_or(true)
    });

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VectorStoreError {
    #[error("vector dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
}

/// Append-only flat index over fixed-dimension f32 vectors.
#[derive(Debug, Clone)]
pub struct VectorStore {
    dimension: usize,
    /// Row-major vector slab, `count * dimension` long.
    data: Vec<f32>,
}

impl VectorStore {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            data: Vec::new(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        if self.dimension == 0 {
            0
        } else {
            self.data.len() / self.dimension
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Append a vector, returning its assigned position (the prior count).
    pub fn add(&mut self, vector: &[f32]) -> Result<usize, VectorStoreError> {
        if vector.len() != self.dimension {
            return Err(VectorStoreError::DimensionMismatch {
                expected: self.dimension,
                got: vector.len(),
            });
        }
        let position = self.len();
        self.data.extend_from_slice(vector);
        Ok(position)
    }

    fn row(&self, position: usize) -> &[f32] {
        let start = position * self.dimension;
        &self.data[start..start + self.dimension]
    }

    /// Brute-force k-nearest-neighbor search by ascending squared-L2
    /// distance. `k` is clamped to the current count; an empty store yields
    /// an empty result.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<(usize, f32)>, VectorStoreError> {
        if query.len() != self.dimension {
            return Err(VectorStoreError::DimensionMismatch {
                expected: self.dimension,
                got: query.len(),
            });
        }
        let count = self.len();
        let k = k.min(count);
        if k == 0 {
            return Ok(Vec::new());
        }

        let heap = if count >= PARALLEL_THRESHOLD && *PARALLEL_SEARCH_ENABLED {
            (0..count)
                .into_par_iter()
                .fold(
                    || BinaryHeap::with_capacity(k + 1),
                    |mut heap, position| {
                        push_bounded(
                            &mut heap,
                            ScoredEntry {
                                distance: squared_l2(self.row(position), query),
                                position,
                            },
                            k,
                        );
                        heap
                    },
                )
                .reduce(
                    || BinaryHeap::with_capacity(k + 1),
                    |mut a, b| {
                        for entry in b {
                            push_bounded(&mut a, entry, k);
                        }
                        a
                    },
                )
        } else {
            let mut heap = BinaryHeap::with_capacity(k + 1);
            for position in 0..count {
                push_bounded(
                    &mut heap,
                    ScoredEntry {
                        distance: squared_l2(self.row(position), query),
                        position,
                    },
                    k,
                );
            }
            heap
        };

        Ok(heap
            .into_sorted_vec()
            .into_iter()
            .map(|entry| (entry.position, entry.distance))
            .collect())
    }

    // ---------------------------------------------------------------------
    // DVIX snapshot
    // ---------------------------------------------------------------------

    /// Write the store to `path` atomically (temp file + rename).
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create snapshot dir {}", parent.display()))?;
        }
        let tmp = path.with_extension("dvix.tmp");
        {
            let file = File::create(&tmp)
                .with_context(|| format!("create snapshot {}", tmp.display()))?;
            let mut writer = BufWriter::new(file);

            let mut header = Vec::with_capacity(14);
            header.extend_from_slice(&DVIX_MAGIC);
            header.extend_from_slice(&DVIX_VERSION.to_le_bytes());
            header.extend_from_slice(&(self.dimension as u32).to_le_bytes());
            header.extend_from_slice(&(self.len() as u32).to_le_bytes());

            let mut hasher = crc32fast::Hasher::new();
            hasher.update(&header);
            let crc = hasher.finalize();

            writer.write_all(&header)?;
            writer.write_all(&crc.to_le_bytes())?;
            for value in &self.data {
                writer.write_all(&value.to_le_bytes())?;
            }
            writer.flush()?;
        }
        std::fs::rename(&tmp, path)
            .with_context(|| format!("rename snapshot into place at {}", path.display()))?;
        Ok(())
    }

    /// Load a snapshot, validating magic, version, CRC, and slab length.
    pub fn load(path: &Path) -> Result<Self> {
        let file =
            File::open(path).with_context(|| format!("open snapshot {}", path.display()))?;
        let file_len = file.metadata().context("stat snapshot")?.len();
        let mut reader = BufReader::new(file);

        let mut header = [0u8; 14];
        reader.read_exact(&mut header).context("read DVIX header")?;
        if header[0..4] != DVIX_MAGIC {
            bail!("invalid DVIX magic: {:?}", &header[0..4]);
        }
        let version = u16::from_le_bytes([header[4], header[5]]);
        if version != DVIX_VERSION {
            bail!("unsupported DVIX version: {version}");
        }
        let dimension =
            u32::from_le_bytes([header[6], header[7], header[8], header[9]]) as usize;
        let count =
            u32::from_le_bytes([header[10], header[11], header[12], header[13]]) as usize;
        if dimension == 0 {
            bail!("DVIX header has zero dimension");
        }

        let mut crc_bytes = [0u8; 4];
        reader.read_exact(&mut crc_bytes).context("read DVIX CRC")?;
        let expected_crc = u32::from_le_bytes(crc_bytes);
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&header);
        let actual_crc = hasher.finalize();
        if actual_crc != expected_crc {
            bail!("DVIX header CRC mismatch: expected {expected_crc:08x}, got {actual_crc:08x}");
        }

        // The header fields size the allocation, so they are checked against
        // the file itself before any memory is reserved: a forged count and
        // dimension must not wrap the product or demand a slab the file
        // cannot contain.
        let slab_len = (count as u64)
            .checked_mul(dimension as u64)
            .and_then(|n| n.checked_mul(4))
            .filter(|n| *n == file_len.saturating_sub(18))
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "DVIX header claims {count} x {dimension} vectors, which does not fit a {file_len}-byte file"
                )
            })?;

        let mut slab = vec![0u8; slab_len as usize];
        reader
            .read_exact(&mut slab)
            .context("read DVIX vector slab")?;

        let data = slab
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        Ok(Self { dimension, data })
    }
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Max-heap entry ordered by distance so the worst candidate pops first.
#[derive(Debug, Clone, Copy)]
struct ScoredEntry {
    distance: f32,
    position: usize,
}

impl PartialEq for ScoredEntry {
    fn eq(&self, other: &Self) -> bool {
        self.distance == other.distance && self.position == other.position
    }
}

impl Eq for ScoredEntry {}

impl PartialOrd for ScoredEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScoredEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .partial_cmp(&other.distance)
            .unwrap_or(Ordering::Equal)
            .then(self.position.cmp(&other.position))
    }
}

fn push_bounded(heap: &mut BinaryHeap<ScoredEntry>, entry: ScoredEntry, k: usize) {
    heap.push(entry);
    if heap.len() > k {
        heap.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_returns_prior_count_as_position() {
        let mut store = VectorStore::new(3);
        assert_eq!(store.add(&[1.0, 0.0, 0.0]).unwrap(), 0);
        assert_eq!(store.add(&[0.0, 1.0, 0.0]).unwrap(), 1);
        assert_eq!(store.add(&[0.0, 0.0, 1.0]).unwrap(), 2);
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn add_rejects_wrong_dimension_without_mutating() {
        let mut store = VectorStore::new(3);
        store.add(&[1.0, 2.0, 3.0]).unwrap();
        let err = store.add(&[1.0, 2.0]).unwrap_err();
        assert_eq!(
            err,
            VectorStoreError::DimensionMismatch {
                expected: 3,
                got: 2
            }
        );
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn empty_store_search_returns_empty() {
        let store = VectorStore::new(4);
        assert!(store.search(&[0.0; 4], 5).unwrap().is_empty());
    }

    #[test]
    fn search_orders_by_ascending_distance() {
        let mut store = VectorStore::new(2);
        store.add(&[0.0, 0.0]).unwrap();
        store.add(&[3.0, 0.0]).unwrap();
        store.add(&[1.0, 0.0]).unwrap();

        let results = store.search(&[0.0, 0.0], 3).unwrap();
        let positions: Vec<usize> = results.iter().map(|(p, _)| *p).collect();
        assert_eq!(positions, vec![0, 2, 1]);
        assert!(results.windows(2).all(|w| w[0].1 <= w[1].1));
    }

    #[test]
    fn k_is_clamped_to_count() {
        let mut store = VectorStore::new(2);
        store.add(&[1.0, 1.0]).unwrap();
        assert_eq!(store.search(&[0.0, 0.0], 10).unwrap().len(), 1);
    }

    #[test]
    fn query_dimension_mismatch_is_an_error() {
        let store = VectorStore::new(4);
        assert!(store.search(&[0.0; 3], 1).is_err());
    }

    #[test]
    fn snapshot_roundtrip() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("index.dvix");

        let mut store = VectorStore::new(3);
        store.add(&[1.0, 2.0, 3.0]).unwrap();
        store.add(&[-1.0, 0.5, 0.25]).unwrap();
        store.save(&path).unwrap();

        let loaded = VectorStore::load(&path).unwrap();
        assert_eq!(loaded.dimension(), 3);
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.row(1), &[-1.0, 0.5, 0.25]);
    }

    #[test]
    fn corrupt_header_is_rejected() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("index.dvix");

        let mut store = VectorStore::new(2);
        store.add(&[1.0, 2.0]).unwrap();
        store.save(&path).unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        bytes[6] ^= 0xff; // flip a dimension byte, CRC no longer matches
        std::fs::write(&path, bytes).unwrap();

        assert!(VectorStore::load(&path).is_err());
    }

    #[test]
    fn forged_header_cannot_demand_a_huge_allocation() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("index.dvix");

        // A header whose CRC checks out but whose count and dimension size
        // a slab the file cannot hold (and whose product wraps u64 * 4).
        let mut header = Vec::new();
        header.extend_from_slice(&DVIX_MAGIC);
        header.extend_from_slice(&DVIX_VERSION.to_le_bytes());
        header.extend_from_slice(&u32::MAX.to_le_bytes());
        header.extend_from_slice(&u32::MAX.to_le_bytes());
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&header);
        let crc = hasher.finalize();

        let mut bytes = header;
        bytes.extend_from_slice(&crc.to_le_bytes());
        bytes.extend_from_slice(&[0u8; 8]);
        std::fs::write(&path, bytes).unwrap();

        assert!(VectorStore::load(&path).is_err());
    }

    #[test]
    fn header_demanding_more_vectors_than_the_file_holds_is_rejected() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("index.dvix");

        let mut store = VectorStore::new(2);
        store.add(&[1.0, 2.0]).unwrap();
        store.save(&path).unwrap();

        // Inflate the count past the slab actually written; the header CRC
        // must be re-signed so only the length check can catch it.
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[10..14].copy_from_slice(&1_000_000u32.to_le_bytes());
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&bytes[..14]);
        let crc = hasher.finalize();
        bytes[14..18].copy_from_slice(&crc.to_le_bytes());
        std::fs::write(&path, bytes).unwrap();

        assert!(VectorStore::load(&path).is_err());
    }

    #[test]
    fn truncated_slab_is_rejected() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("index.dvix");

        let mut store = VectorStore::new(2);
        store.add(&[1.0, 2.0]).unwrap();
        store.add(&[3.0, 4.0]).unwrap();
        store.save(&path).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 3]).unwrap();

        assert!(VectorStore::load(&path).is_err());
    }
}

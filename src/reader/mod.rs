//! Streaming readers over libsvm/libffm/csv text files, a binary cache, or
//! a caller-supplied in-memory Batch (spec.md §4.C).

pub mod cache;
pub mod fingerprint;
pub mod splitter;

use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::data::Batch;
use crate::error::FormatError;
use crate::parser::{self, FileShape};

pub use splitter::split_file;

/// Polymorphic over one trait, per spec.md §4.C "Variants".
pub trait Reader {
    /// Fill `out` with the next sample batch, returning `false` once the
    /// epoch is exhausted.
    fn next_batch(&mut self, out: &mut Batch) -> bool;

    /// Return the cursor to the start (re-shuffling for `InMemoryReader`).
    fn reset(&mut self);
}

/// Sniff format/separator and the two file fingerprints (spec.md §4.C).
fn open_shape_and_hashes(path: &Path) -> Result<(FileShape, u64, u64), FormatError> {
    let file = File::open(path).map_err(|e| FormatError::CorruptCache(e.to_string()))?;
    let mut reader = std::io::BufReader::new(file);
    let mut first_line = String::new();
    std::io::BufRead::read_line(&mut reader, &mut first_line).map_err(|e| FormatError::CorruptCache(e.to_string()))?;
    let first_line = first_line.trim_end_matches(['\n', '\r']);
    let shape = parser::detect_shape(first_line)?;
    let (h1, h2) = fingerprint::hash_file(path).map_err(|e| FormatError::CorruptCache(e.to_string()))?;
    Ok((shape, h1, h2))
}

fn cache_path(source: &Path) -> PathBuf {
    let mut s = source.as_os_str().to_owned();
    s.push(".bin");
    PathBuf::from(s)
}

/// Check the cache's two fingerprints against the source file without
/// fully reading it, per spec.md §4.C's "double check" (fast hash_1 check
/// first, authoritative hash_2 check on actual load).
fn cache_is_fresh(source: &Path) -> bool {
    let Ok((_, h1, h2)) = open_shape_and_hashes(source) else {
        return false;
    };
    let bin = cache_path(source);
    if !bin.exists() {
        return false;
    }
    let Ok(mut f) = File::open(&bin) else { return false };
    let mut buf = [0u8; 16];
    if f.read_exact(&mut buf).is_err() {
        return false;
    }
    let cached_h1 = u64::from_ne_bytes(buf[0..8].try_into().unwrap());
    let cached_h2 = u64::from_ne_bytes(buf[8..16].try_into().unwrap());
    cached_h1 == h1 && cached_h2 == h2
}

/// Load the whole file into a `Batch`, going through the binary cache
/// when its fingerprints are still fresh, and rewriting the cache
/// otherwise (spec.md §4.C "Binary cache").
pub fn load_full(path: &Path, has_label_override: Option<bool>, normalize: bool) -> Result<Batch, FormatError> {
    if cache_is_fresh(path) {
        log::info!("binary cache hit for {}", path.display());
        return cache::deserialize(&cache_path(path));
    }
    log::info!("binary cache miss for {}, parsing text", path.display());

    let (shape, h1, h2) = open_shape_and_hashes(path)?;
    let has_label = has_label_override.unwrap_or(shape.has_label);
    let bytes = fs::read(path).map_err(|e| FormatError::CorruptCache(e.to_string()))?;

    let mut batch = Batch::new();
    parser::parse_block(&bytes, shape, has_label, &mut batch);
    batch.compute_norm(normalize);
    batch.set_hash(h1, h2);

    if let Err(e) = cache::serialize(&batch, &cache_path(path)) {
        log::warn!("could not write binary cache for {}: {e}", path.display());
    }
    Ok(batch)
}

/// Loads the whole file once, then serves shuffled mini-batches from a
/// fixed pre-allocated index permutation (spec.md §4.C variant 1).
pub struct InMemoryReader {
    batch: Batch,
    order: Vec<usize>,
    cursor: usize,
    batch_size: usize,
    shuffle: bool,
    rng: SmallRng,
}

impl InMemoryReader {
    pub fn open(path: &Path, has_label: Option<bool>, normalize: bool, batch_size: usize, seed: u64) -> Result<Self, FormatError> {
        let batch = load_full(path, has_label, normalize)?;
        Ok(Self::from_batch(batch, batch_size, seed))
    }

    pub fn from_batch(batch: Batch, batch_size: usize, seed: u64) -> Self {
        let order: Vec<usize> = (0..batch.rows.len()).collect();
        let mut reader = Self {
            batch,
            order,
            cursor: 0,
            batch_size: batch_size.max(1),
            shuffle: true,
            rng: SmallRng::seed_from_u64(seed),
        };
        reader.reshuffle();
        reader
    }

    pub fn set_shuffle(&mut self, shuffle: bool) {
        self.shuffle = shuffle;
    }

    fn reshuffle(&mut self) {
        if self.shuffle {
            self.order.shuffle(&mut self.rng);
        }
    }

    pub fn source(&self) -> &Batch {
        &self.batch
    }
}

impl Reader for InMemoryReader {
    fn next_batch(&mut self, out: &mut Batch) -> bool {
        if self.cursor >= self.order.len() {
            return false;
        }
        let end = (self.cursor + self.batch_size).min(self.order.len());
        out.reset(0, self.batch.has_label);
        out.hash_value_1 = self.batch.hash_value_1;
        out.hash_value_2 = self.batch.hash_value_2;
        for &idx in &self.order[self.cursor..end] {
            out.rows.push(self.batch.rows[idx].clone());
            out.y.push(self.batch.y[idx]);
            out.norm.push(self.batch.norm[idx]);
            out.row_length += 1;
        }
        self.cursor = end;
        true
    }

    fn reset(&mut self) {
        self.cursor = 0;
        self.reshuffle();
    }
}

/// Streams fixed-size blocks off disk, parsing each into the sample batch
/// (spec.md §4.C variant 2). Shuffling is not supported.
pub struct OnDiskReader {
    file: File,
    path: PathBuf,
    shape: FileShape,
    has_label: bool,
    normalize: bool,
    block_bytes: usize,
    eof: bool,
}

impl OnDiskReader {
    pub fn open(path: &Path, block_mib: u32, has_label: Option<bool>, normalize: bool) -> Result<Self, FormatError> {
        let (shape, _, _) = open_shape_and_hashes(path)?;
        let has_label = has_label.unwrap_or(shape.has_label);
        let file = File::open(path).map_err(|e| FormatError::CorruptCache(e.to_string()))?;
        Ok(Self {
            file,
            path: path.to_owned(),
            shape,
            has_label,
            normalize,
            block_bytes: block_mib as usize * 1024 * 1024,
            eof: false,
        })
    }
}

impl Reader for OnDiskReader {
    fn next_batch(&mut self, out: &mut Batch) -> bool {
        if self.eof {
            return false;
        }
        let mut block = vec![0u8; self.block_bytes];
        let mut filled = 0usize;
        while filled < block.len() {
            match self.file.read(&mut block[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(_) => break,
            }
        }
        if filled == 0 {
            self.eof = true;
            return false;
        }
        if filled == block.len() {
            // Scan back to the last newline and rewind the file pointer
            // past it, trimming the block to a line boundary (spec.md §4.C).
            let mut idx = filled;
            while idx > 0 && block[idx - 1] != b'\n' {
                idx -= 1;
            }
            let rewind = (filled - idx) as i64;
            if rewind > 0 {
                let _ = self.file.seek(SeekFrom::Current(-rewind));
            }
            filled = idx;
        }
        out.reset(0, self.has_label);
        parser::parse_block(&block[..filled], self.shape, self.has_label, out);
        out.compute_norm(self.normalize);
        true
    }

    fn reset(&mut self) {
        let _ = self.file.seek(SeekFrom::Start(0));
        self.eof = false;
    }
}

/// Wraps a caller-supplied Batch (used by language bindings); otherwise
/// behaves like [`InMemoryReader`] (spec.md §4.C variant 3).
pub struct FromMatrixReader {
    inner: InMemoryReader,
}

impl FromMatrixReader {
    pub fn new(batch: Batch, batch_size: usize, seed: u64) -> Self {
        Self {
            inner: InMemoryReader::from_batch(batch, batch_size, seed),
        }
    }
}

impl Reader for FromMatrixReader {
    fn next_batch(&mut self, out: &mut Batch) -> bool {
        self.inner.next_batch(out)
    }

    fn reset(&mut self) {
        self.inner.reset();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;

    fn write_libsvm(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        let mut f = File::create(&path).unwrap();
        writeln!(f, "+1 1:1 2:1").unwrap();
        writeln!(f, "-1 3:1").unwrap();
        writeln!(f, "+1 1:1").unwrap();
        path
    }

    #[test]
    fn in_memory_reader_serves_all_rows_across_batches() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_libsvm(dir.path(), "train.txt");
        let mut reader = InMemoryReader::open(&path, None, true, 2, 42).unwrap();
        reader.set_shuffle(false);
        reader.reset();

        let mut total = 0;
        let mut out = Batch::new();
        while reader.next_batch(&mut out) {
            total += out.rows.len();
        }
        assert_eq!(total, 3);
    }

    #[test]
    fn on_disk_reader_reset_rewinds_to_start() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_libsvm(dir.path(), "train.txt");
        let mut reader = OnDiskReader::open(&path, 500, None, true).unwrap();
        let mut out = Batch::new();
        let mut first_pass = 0;
        while reader.next_batch(&mut out) {
            first_pass += out.rows.len();
        }
        reader.reset();
        let mut second_pass = 0;
        while reader.next_batch(&mut out) {
            second_pass += out.rows.len();
        }
        assert_eq!(first_pass, second_pass);
    }

    #[test]
    fn binary_cache_round_trips_through_load_full() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_libsvm(dir.path(), "train.txt");
        let first = load_full(&path, None, true).unwrap();
        assert!(cache_path(&path).exists());
        let second = load_full(&path, None, true).unwrap();
        assert_eq!(first.y, second.y);
        assert_eq!(first.hash_value_1, second.hash_value_1);
        assert_eq!(first.hash_value_2, second.hash_value_2);
    }
}

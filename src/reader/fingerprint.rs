//! File fingerprint rolling hash (spec.md §4.C), mirrored exactly from
//! `original_source/src/base/file_util.h::HashFile`.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};

use crate::HASH_CHUNK_SIZE;

const MAGIC_SEED: u64 = 90359;

#[inline]
fn step(magic: u64, x: u64) -> u64 {
    ((magic.wrapping_add(x)).wrapping_mul(magic.wrapping_add(x).wrapping_add(1)) >> 1).wrapping_add(x)
}

/// Roll the fingerprint over one chunk of bytes.
fn hash_chunk(magic: u64, chunk: &[u8]) -> u64 {
    let mut magic = magic;
    let mut i = 0usize;
    while i + 8 <= chunk.len() {
        let word = u64::from_le_bytes(chunk[i..i + 8].try_into().unwrap());
        magic = step(magic, word);
        i += 8;
    }
    while i < chunk.len() {
        magic = step(magic, chunk[i] as u64);
        i += 1;
    }
    magic
}

/// Compute `hash_1` (first chunk only) and `hash_2` (whole file) in one
/// pass over the file.
pub fn hash_file(path: &std::path::Path) -> std::io::Result<(u64, u64)> {
    let mut file = File::open(path)?;
    let mut magic = MAGIC_SEED;
    let mut buf = vec![0u8; HASH_CHUNK_SIZE];
    let mut hash_1 = None;

    loop {
        let n = read_fill(&mut file, &mut buf)?;
        if n == 0 {
            break;
        }
        magic = hash_chunk(magic, &buf[..n]);
        if hash_1.is_none() {
            hash_1 = Some(magic);
        }
        if n < buf.len() {
            break;
        }
    }
    let hash_1 = hash_1.unwrap_or(MAGIC_SEED);
    Ok((hash_1, magic))
}

/// Read until `buf` is full or EOF, returning the number of bytes read.
fn read_fill(file: &mut File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        let n = file.read(&mut buf[total..])?;
        if n == 0 {
            break;
        }
        total += n;
    }
    Ok(total)
}

/// Re-derive `hash_1` alone (used for the fast binary-cache check before
/// committing to the full-file hash).
pub fn hash_file_first_chunk(path: &std::path::Path) -> std::io::Result<u64> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(0))?;
    let mut buf = vec![0u8; HASH_CHUNK_SIZE];
    let n = read_fill(&mut file, &mut buf)?;
    Ok(hash_chunk(MAGIC_SEED, &buf[..n]))
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;

    #[test]
    fn hash_is_pure_function_of_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, b"hello world\n").unwrap();
        let (h1a, h2a) = hash_file(&path).unwrap();
        let (h1b, h2b) = hash_file(&path).unwrap();
        assert_eq!((h1a, h2a), (h1b, h2b));
    }

    #[test]
    fn changing_a_byte_changes_hash_2() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, b"hello world\n").unwrap();
        let (_, h2_before) = hash_file(&path).unwrap();

        let mut f = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        f.seek(SeekFrom::Start(0)).unwrap();
        f.write_all(b"Hello world\n").unwrap();
        drop(f);

        let (_, h2_after) = hash_file(&path).unwrap();
        assert_ne!(h2_before, h2_after);
    }

    #[test]
    fn first_chunk_hash_matches_hash_1() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, vec![7u8; 123]).unwrap();
        let (h1, _) = hash_file(&path).unwrap();
        let h1_direct = hash_file_first_chunk(&path).unwrap();
        assert_eq!(h1, h1_direct);
    }
}

//! K-way, line-aligned file splitter for the CV harness (spec.md §4.C).
//!
//! Memory-maps the source file and writes `k` contiguous parts, each sized
//! `ceil(N/k)` bytes but trimmed back to the nearest preceding newline;
//! the residue carries into the next part, so concatenating the parts in
//! order reproduces the original file byte-for-byte.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use memmap2::Mmap;

pub fn split_file(path: &Path, k: u32) -> io::Result<Vec<PathBuf>> {
    let file = fs::File::open(path)?;
    let mmap = unsafe { Mmap::map(&file)? };
    let total = mmap.len();
    let target_chunk = total.div_ceil(k as usize).max(1);

    let mut outputs = Vec::with_capacity(k as usize);
    let mut start = 0usize;
    for fold in 0..k {
        let out_path = part_path(path, fold);
        if fold == k - 1 {
            write_part(&out_path, &mmap[start..total])?;
            outputs.push(out_path);
            start = total;
            continue;
        }

        let mut end = (start + target_chunk).min(total);
        // Walk back to the nearest preceding newline so the split is
        // line-aligned; the byte range [start, end) then ends in '\n'
        // (or the part is empty if no newline exists before `end`).
        while end > start && mmap[end - 1] != b'\n' {
            end -= 1;
        }
        write_part(&out_path, &mmap[start..end])?;
        outputs.push(out_path);
        start = end;
    }
    Ok(outputs)
}

fn part_path(source: &Path, fold: u32) -> PathBuf {
    let mut s = source.as_os_str().to_owned();
    s.push(format!("_{fold}"));
    PathBuf::from(s)
}

fn write_part(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut f = fs::File::create(path)?;
    f.write_all(bytes)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parts_concatenate_back_to_original() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.txt");
        let content = "line one\nline two\nline three\nline four\nline five\n";
        std::fs::write(&path, content).unwrap();

        let parts = split_file(&path, 3).unwrap();
        assert_eq!(parts.len(), 3);

        let mut reassembled = Vec::new();
        for (i, p) in parts.iter().enumerate() {
            let bytes = std::fs::read(p).unwrap();
            if i != parts.len() - 1 {
                assert!(bytes.is_empty() || bytes.last() == Some(&b'\n'));
            }
            reassembled.extend_from_slice(&bytes);
        }
        assert_eq!(reassembled, content.as_bytes());
    }

    #[test]
    fn works_when_k_exceeds_line_count() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.txt");
        std::fs::write(&path, "one\ntwo\n").unwrap();
        let parts = split_file(&path, 5).unwrap();
        let mut reassembled = Vec::new();
        for p in &parts {
            reassembled.extend_from_slice(&std::fs::read(p).unwrap());
        }
        assert_eq!(reassembled, b"one\ntwo\n");
    }
}

//! Binary Batch cache layout (spec.md §6):
//!
//! ```text
//! u64 hash_1
//! u64 hash_2
//! u32 row_length
//! for each row: length-prefixed Node sequence (usize, then row_length * sizeof(Node))
//! length-prefixed f32 vector Y
//! length-prefixed f32 vector norm
//! bool has_label
//! u32 pos
//! ```

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use bytemuck::{Pod, Zeroable};

use crate::data::{Batch, Node};
use crate::error::FormatError;

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct RawNode {
    field_id: u32,
    feat_id: u32,
    value: f32,
}

impl From<Node> for RawNode {
    fn from(n: Node) -> Self {
        Self {
            field_id: n.field_id,
            feat_id: n.feat_id,
            value: n.value,
        }
    }
}

impl From<RawNode> for Node {
    fn from(n: RawNode) -> Self {
        Node::new(n.field_id, n.feat_id, n.value)
    }
}

fn write_usize_prefixed<W: Write>(w: &mut W, bytes: &[u8]) -> io::Result<()> {
    w.write_all(&(bytes.len() as u64).to_ne_bytes())?;
    w.write_all(bytes)
}

fn read_usize_prefixed<R: Read>(r: &mut R) -> io::Result<Vec<u8>> {
    let mut len_buf = [0u8; 8];
    r.read_exact(&mut len_buf)?;
    let len = u64::from_ne_bytes(len_buf) as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

pub fn serialize(batch: &Batch, path: &Path) -> io::Result<()> {
    let file = File::create(path)?;
    let mut w = BufWriter::new(file);
    w.write_all(&batch.hash_value_1.to_ne_bytes())?;
    w.write_all(&batch.hash_value_2.to_ne_bytes())?;
    w.write_all(&batch.row_length.to_ne_bytes())?;

    for row in &batch.rows {
        let raw: Vec<RawNode> = row.iter().copied().map(RawNode::from).collect();
        write_usize_prefixed(&mut w, bytemuck::cast_slice(&raw))?;
    }
    write_usize_prefixed(&mut w, bytemuck::cast_slice(&batch.y))?;
    write_usize_prefixed(&mut w, bytemuck::cast_slice(&batch.norm))?;
    w.write_all(&[batch.has_label as u8])?;
    w.write_all(&batch.pos.to_ne_bytes())?;
    w.flush()
}

pub fn deserialize(path: &Path) -> Result<Batch, FormatError> {
    let file = File::open(path).map_err(|e| FormatError::CorruptCache(e.to_string()))?;
    let mut r = BufReader::new(file);

    let read_u64 = |r: &mut BufReader<File>| -> Result<u64, FormatError> {
        let mut b = [0u8; 8];
        r.read_exact(&mut b).map_err(|e| FormatError::CorruptCache(e.to_string()))?;
        Ok(u64::from_ne_bytes(b))
    };
    let hash_value_1 = read_u64(&mut r)?;
    let hash_value_2 = read_u64(&mut r)?;

    let mut len_buf = [0u8; 4];
    r.read_exact(&mut len_buf)
        .map_err(|e| FormatError::CorruptCache(e.to_string()))?;
    let row_length = u32::from_ne_bytes(len_buf);

    let mut rows = Vec::with_capacity(row_length as usize);
    for _ in 0..row_length {
        let bytes = read_usize_prefixed(&mut r).map_err(|e| FormatError::CorruptCache(e.to_string()))?;
        if bytes.len() % std::mem::size_of::<RawNode>() != 0 {
            return Err(FormatError::CacheLengthMismatch);
        }
        let raw: &[RawNode] = bytemuck::cast_slice(&bytes);
        rows.push(raw.iter().copied().map(Node::from).collect());
    }

    let y_bytes = read_usize_prefixed(&mut r).map_err(|e| FormatError::CorruptCache(e.to_string()))?;
    let y: Vec<f32> = bytemuck::cast_slice(&y_bytes).to_vec();
    let norm_bytes = read_usize_prefixed(&mut r).map_err(|e| FormatError::CorruptCache(e.to_string()))?;
    let norm: Vec<f32> = bytemuck::cast_slice(&norm_bytes).to_vec();

    let mut flag = [0u8; 1];
    r.read_exact(&mut flag).map_err(|e| FormatError::CorruptCache(e.to_string()))?;
    let has_label = flag[0] != 0;

    let mut pos_buf = [0u8; 4];
    r.read_exact(&mut pos_buf)
        .map_err(|e| FormatError::CorruptCache(e.to_string()))?;
    let pos = u32::from_ne_bytes(pos_buf);

    Ok(Batch {
        row_length,
        rows,
        y,
        norm,
        has_label,
        pos,
        hash_value_1,
        hash_value_2,
    })
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample_batch() -> Batch {
        let mut b = Batch::new();
        b.reset(2, true);
        b.add_node(0, 1, 1.0, 0);
        b.add_node(0, 2, 2.0, 0);
        b.add_node(1, 3, 3.0, 0);
        b.set_label(0, 1.0);
        b.set_label(1, -1.0);
        b.compute_norm(true);
        b.set_hash(111, 222);
        b
    }

    #[test]
    fn roundtrips_every_field() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("batch.bin");
        let b = sample_batch();
        serialize(&b, &path).unwrap();
        let loaded = deserialize(&path).unwrap();

        assert_eq!(loaded.hash_value_1, b.hash_value_1);
        assert_eq!(loaded.hash_value_2, b.hash_value_2);
        assert_eq!(loaded.row_length, b.row_length);
        assert_eq!(loaded.has_label, b.has_label);
        assert_eq!(loaded.pos, b.pos);
        assert_eq!(loaded.y, b.y);
        assert_eq!(loaded.norm, b.norm);
        for (a, c) in loaded.rows.iter().zip(b.rows.iter()) {
            assert_eq!(a, c);
        }
    }
}

//! Model parameter store (spec.md §3/§4.D), grounded on
//! `original_source/src/data/model_parameters.{h,cc}` and the per-feature
//! block layout used by `original_source/src/score/fm_score*.cc`.
//!
//! Every logical parameter (bias, one linear weight, one latent factor) is
//! a block of `aux_size` contiguous sub-blocks: the value itself, then one
//! sub-block per optimiser accumulator. For scalar parameters (bias, `w`)
//! the sub-block size is 1, so this collapses to the familiar
//! `w[feat*aux_size + slot]` interleaving; for latent factors the
//! sub-block size is `k_aligned`, matching the SSE code's
//! `v[feat*align0 + slot*aligned_k + d]`.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use rand::rngs::SmallRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

use crate::align::{k_aligned, AlignedF32Vec};
use crate::error::FormatError;
use crate::hyper::{LossFunc, Optimizer, ScoreFunc};

/// Mean/stdev for Gaussian weight init (spec.md §3), mirroring
/// `kInitMean`/`kInitStdev` in `model_parameters.cc`.
const INIT_MEAN: f64 = 0.0;

#[derive(Debug, Clone)]
pub struct Model {
    pub score_func: ScoreFunc,
    pub loss_func: LossFunc,
    pub num_feat: u32,
    pub num_field: u32,
    pub k: u32,
    pub k_aligned: u32,
    pub aux_size: u32,
    pub scale: f32,

    pub bias: AlignedF32Vec,
    pub w: AlignedF32Vec,
    pub v: AlignedF32Vec,

    best_bias: Option<AlignedF32Vec>,
    best_w: Option<AlignedF32Vec>,
    best_v: Option<AlignedF32Vec>,
}

impl Model {
    /// Allocate and initialise a model per spec.md §3 "Initial values".
    pub fn initialize(
        score_func: ScoreFunc,
        loss_func: LossFunc,
        num_feat: u32,
        num_field: u32,
        k: u32,
        aux_size: u32,
        scale: f32,
        seed: u64,
    ) -> Self {
        let aligned = k_aligned(k);
        let w_len = num_feat as usize * aux_size as usize;
        let v_len = match score_func {
            ScoreFunc::Linear => 0,
            ScoreFunc::Fm => num_feat as usize * aligned as usize * aux_size as usize,
            ScoreFunc::Ffm => num_feat as usize * num_field as usize * aligned as usize * aux_size as usize,
        };

        let mut model = Self {
            score_func,
            loss_func,
            num_feat,
            num_field,
            k,
            k_aligned: aligned,
            aux_size,
            scale,
            bias: AlignedF32Vec::zeros(aux_size as usize),
            w: AlignedF32Vec::zeros(w_len),
            v: AlignedF32Vec::zeros(v_len),
            best_bias: None,
            best_w: None,
            best_v: None,
        };
        model.set_value(seed);
        model
    }

    fn w_unit_stride(&self) -> usize {
        self.aux_size as usize
    }

    fn v_unit_stride(&self) -> usize {
        self.k_aligned as usize * self.aux_size as usize
    }

    /// Offset of feature `feat`'s linear-weight block in `w`.
    pub fn w_offset(&self, feat: u32) -> usize {
        feat as usize * self.w_unit_stride()
    }

    /// Offset of feature `feat`'s latent block in `v` (FM).
    pub fn v_offset_fm(&self, feat: u32) -> usize {
        feat as usize * self.v_unit_stride()
    }

    /// Offset of the (feat, field) latent block in `v` (FFM): `v[feat]`
    /// holds one sub-block per field, indexed by the *other* side's field.
    pub fn v_offset_ffm(&self, feat: u32, field: u32) -> usize {
        (feat as usize * self.num_field as usize + field as usize) * self.v_unit_stride()
    }

    /// Re-initialise all parameters and aux state in place (spec.md §4.D
    /// `reset(gaussian)`, here always the random branch — the original's
    /// zero-reset branch has no remaining caller in the single-node path).
    pub fn reset(&mut self, seed: u64) {
        self.set_value(seed);
    }

    fn set_value(&mut self, seed: u64) {
        let mut rng = SmallRng::seed_from_u64(seed);
        let sigma = if self.k > 0 {
            (self.scale as f64) / (self.k as f64).sqrt()
        } else {
            0.0
        };
        let normal = Normal::new(INIT_MEAN, sigma.max(1e-12)).expect("sigma must be finite and positive");

        self.bias.as_mut_slice().fill(0.0);
        self.w.as_mut_slice().fill(0.0);
        self.v.as_mut_slice().fill(0.0);

        init_aux_slots(self.bias.as_mut_slice(), 1, self.aux_size);
        init_aux_slots(self.w.as_mut_slice(), 1, self.aux_size);

        if !self.v.is_empty() {
            let units = self.v.len() / self.v_unit_stride();
            for unit in 0..units {
                let base = unit * self.v_unit_stride();
                for d in 0..self.k as usize {
                    self.v[base + d] = normal.sample(&mut rng) as f32;
                }
                // tail lanes k..k_aligned stay zero (spec.md §3 invariant).
            }
            init_aux_slots(self.v.as_mut_slice(), self.k_aligned as usize, self.aux_size);
        }
    }

    /// Copy current parameters into the best-model snapshot (spec.md §4.D
    /// `set_best`, used by the trainer's early-stopping driver).
    pub fn set_best(&mut self) {
        self.best_bias = Some(self.bias.clone());
        self.best_w = Some(self.w.clone());
        self.best_v = Some(self.v.clone());
    }

    /// Restore the best-model snapshot (spec.md §4.D `shrink`).
    pub fn shrink(&mut self) {
        if let Some(b) = self.best_bias.take() {
            self.bias = b;
        }
        if let Some(w) = self.best_w.take() {
            self.w = w;
        }
        if let Some(v) = self.best_v.take() {
            self.v = v;
        }
    }

    fn score_func_token(&self) -> &'static str {
        match self.score_func {
            ScoreFunc::Linear => "linear",
            ScoreFunc::Fm => "fm",
            ScoreFunc::Ffm => "ffm",
        }
    }

    fn parse_score_func_token(token: &str) -> Result<ScoreFunc, FormatError> {
        match token {
            "linear" => Ok(ScoreFunc::Linear),
            "fm" => Ok(ScoreFunc::Fm),
            "ffm" => Ok(ScoreFunc::Ffm),
            other => Err(FormatError::UnknownScoreFunc(other.to_string())),
        }
    }

    /// Binary checkpoint layout (spec.md §6 "Binary model file layout").
    pub fn serialize(&self, path: &Path) -> io::Result<()> {
        let file = File::create(path)?;
        let mut w = BufWriter::new(file);
        writeln!(w, "{}", self.score_func_token())?;
        writeln!(w, "{}", self.aux_size)?;
        writeln!(w, "{}", self.num_feat)?;
        if matches!(self.score_func, ScoreFunc::Fm | ScoreFunc::Ffm) {
            writeln!(w, "{}", self.k)?;
        }
        if matches!(self.score_func, ScoreFunc::Ffm) {
            writeln!(w, "{}", self.num_field)?;
        }
        write_usize_prefixed(&mut w, bytemuck::cast_slice(self.bias.as_slice()))?;
        write_usize_prefixed(&mut w, bytemuck::cast_slice(self.w.as_slice()))?;
        if !self.v.is_empty() {
            write_usize_prefixed(&mut w, bytemuck::cast_slice(self.v.as_slice()))?;
        }
        w.flush()
    }

    /// Reads back a model serialised by [`Model::serialize`]. `loss_func`
    /// is not part of the on-disk format (mirroring the original, which
    /// never persists it either) and must be supplied by the caller, who
    /// already knows it from the active `HyperParam`; `aux_size` rides
    /// along in the header so `xlearn-predict`, which never sees a
    /// `HyperParam`, can reload a model on its own.
    pub fn deserialize(path: &Path, loss_func: LossFunc) -> Result<Self, FormatError> {
        let file = File::open(path).map_err(|e| FormatError::CorruptCache(e.to_string()))?;
        let mut r = BufReader::new(file);

        let score_func_line = read_line(&mut r)?;
        let score_func = Self::parse_score_func_token(score_func_line.trim())?;

        let aux_size: u32 = read_line(&mut r)?
            .trim()
            .parse()
            .map_err(|_| FormatError::TruncatedHeader)?;

        let num_feat: u32 = read_line(&mut r)?
            .trim()
            .parse()
            .map_err(|_| FormatError::TruncatedHeader)?;

        let (k, k_aligned_val) = if matches!(score_func, ScoreFunc::Fm | ScoreFunc::Ffm) {
            let k: u32 = read_line(&mut r)?.trim().parse().map_err(|_| FormatError::TruncatedHeader)?;
            (k, k_aligned(k))
        } else {
            (0, 0)
        };
        let num_field = if matches!(score_func, ScoreFunc::Ffm) {
            read_line(&mut r)?.trim().parse().map_err(|_| FormatError::TruncatedHeader)?
        } else {
            0
        };

        let bias_bytes = read_usize_prefixed(&mut r)?;
        let w_bytes = read_usize_prefixed(&mut r)?;
        let v_bytes = if matches!(score_func, ScoreFunc::Fm | ScoreFunc::Ffm) {
            read_usize_prefixed(&mut r)?
        } else {
            Vec::new()
        };

        Ok(Self {
            score_func,
            loss_func,
            num_feat,
            num_field,
            k,
            k_aligned: k_aligned_val,
            aux_size,
            scale: 0.0,
            bias: AlignedF32Vec::from_slice(bytemuck::cast_slice(&bias_bytes)),
            w: AlignedF32Vec::from_slice(bytemuck::cast_slice(&w_bytes)),
            v: AlignedF32Vec::from_slice(bytemuck::cast_slice(&v_bytes)),
            best_bias: None,
            best_w: None,
            best_v: None,
        })
    }

    /// Human-readable dump (spec.md §4.D `serialize_txt`).
    pub fn serialize_txt(&self, path: &Path) -> io::Result<()> {
        let file = File::create(path)?;
        let mut w = BufWriter::new(file);
        writeln!(w, "{}", self.bias[0])?;
        for feat in 0..self.num_feat {
            let off = self.w_offset(feat);
            writeln!(w, "{}", self.w[off])?;
        }
        match self.score_func {
            ScoreFunc::Linear => {}
            ScoreFunc::Fm => {
                for feat in 0..self.num_feat {
                    let base = self.v_offset_fm(feat);
                    let line: Vec<String> = (0..self.k as usize).map(|d| self.v[base + d].to_string()).collect();
                    writeln!(w, "{}", line.join(" "))?;
                }
            }
            ScoreFunc::Ffm => {
                for feat in 0..self.num_feat {
                    for field in 0..self.num_field {
                        let base = self.v_offset_ffm(feat, field);
                        let line: Vec<String> = (0..self.k as usize).map(|d| self.v[base + d].to_string()).collect();
                        writeln!(w, "{}", line.join(" "))?;
                    }
                }
            }
        }
        w.flush()
    }

    /// Dump just the parameter bytes (spec.md §4.D `serialize_to_vec`).
    pub fn serialize_to_vec(&self) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.bias.len() + self.w.len() + self.v.len());
        out.extend_from_slice(self.bias.as_slice());
        out.extend_from_slice(self.w.as_slice());
        out.extend_from_slice(self.v.as_slice());
        out
    }

    /// Restore parameters from bytes produced by [`Model::serialize_to_vec`].
    pub fn load_from_vec(&mut self, data: &[f32]) {
        let (bias, rest) = data.split_at(self.bias.len());
        let (w, v) = rest.split_at(self.w.len());
        self.bias.as_mut_slice().copy_from_slice(bias);
        self.w.as_mut_slice().copy_from_slice(w);
        if !v.is_empty() {
            self.v.as_mut_slice().copy_from_slice(v);
        }
    }
}

/// Set the optimiser-accumulator sub-block (slot 1 = AdaGrad's `n`, or
/// FTRL's `n`/`z` at slots 1/2) for every unit of size `blk` in `buf`.
/// AdaGrad's `n` starts at 1.0 to dodge a divide-by-zero on the first
/// step; FTRL's `n`/`z` both start at 0.0 (spec.md §3).
fn init_aux_slots(buf: &mut [f32], blk: usize, aux_size: u32) {
    if aux_size < 2 {
        return;
    }
    let stride = blk * aux_size as usize;
    let units = buf.len() / stride;
    let adagrad_init = aux_size == 2;
    for unit in 0..units {
        let base = unit * stride;
        if adagrad_init {
            for d in 0..blk {
                buf[base + blk + d] = 1.0;
            }
        }
        // FTRL's n/z slots (aux_size == 3) are left at the 0.0 fill above.
    }
}

fn write_usize_prefixed<W: Write>(w: &mut W, bytes: &[u8]) -> io::Result<()> {
    w.write_all(&bytes.len().to_ne_bytes())?;
    w.write_all(bytes)
}

fn read_usize_prefixed<R: Read>(r: &mut R) -> Result<Vec<u8>, FormatError> {
    let mut len_buf = [0u8; std::mem::size_of::<usize>()];
    r.read_exact(&mut len_buf).map_err(|e| FormatError::CorruptCache(e.to_string()))?;
    let len = usize::from_ne_bytes(len_buf);
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf).map_err(|e| FormatError::CorruptCache(e.to_string()))?;
    Ok(buf)
}

fn read_line<R: io::BufRead>(r: &mut R) -> Result<String, FormatError> {
    let mut line = String::new();
    let n = r.read_line(&mut line).map_err(|e| FormatError::CorruptCache(e.to_string()))?;
    if n == 0 {
        return Err(FormatError::TruncatedHeader);
    }
    Ok(line)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn bias_and_linear_have_no_nan_after_init() {
        let m = Model::initialize(ScoreFunc::Linear, LossFunc::CrossEntropy, 8, 0, 4, 1, 0.66, 7);
        assert!(m.bias.iter().all(|x| x.is_finite()));
        assert!(m.w.iter().all(|x| x.is_finite()));
        assert!(m.v.is_empty());
    }

    #[test]
    fn fm_tail_lanes_are_zero() {
        let m = Model::initialize(ScoreFunc::Fm, LossFunc::Squared, 4, 0, 3, 1, 0.66, 11);
        assert_eq!(m.k_aligned, 4);
        for feat in 0..4u32 {
            let base = m.v_offset_fm(feat);
            assert_eq!(m.v[base + 3], 0.0);
        }
    }

    #[test]
    fn adagrad_accumulator_starts_at_one() {
        let m = Model::initialize(ScoreFunc::Linear, LossFunc::CrossEntropy, 3, 0, 4, 2, 0.66, 5);
        for feat in 0..3u32 {
            let off = m.w_offset(feat);
            assert_eq!(m.w[off + 1], 1.0);
        }
        assert_eq!(m.bias[1], 1.0);
    }

    #[test]
    fn ftrl_accumulators_start_at_zero() {
        let m = Model::initialize(ScoreFunc::Fm, LossFunc::Squared, 2, 0, 4, 3, 0.66, 9);
        for feat in 0..2u32 {
            let base = m.v_offset_fm(feat);
            for d in 0..m.k_aligned as usize {
                assert_eq!(m.v[base + m.k_aligned as usize + d], 0.0);
                assert_eq!(m.v[base + 2 * m.k_aligned as usize + d], 0.0);
            }
        }
    }

    #[test]
    fn serialize_round_trips_ffm_model() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.bin");
        let m = Model::initialize(ScoreFunc::Ffm, LossFunc::CrossEntropy, 5, 3, 4, 2, 0.5, 42);
        m.serialize(&path).unwrap();
        let loaded = Model::deserialize(&path, LossFunc::CrossEntropy).unwrap();

        assert_eq!(loaded.score_func, m.score_func);
        assert_eq!(loaded.num_feat, m.num_feat);
        assert_eq!(loaded.num_field, m.num_field);
        assert_eq!(loaded.k, m.k);
        assert_eq!(loaded.bias.as_slice(), m.bias.as_slice());
        assert_eq!(loaded.w.as_slice(), m.w.as_slice());
        assert_eq!(loaded.v.as_slice(), m.v.as_slice());
    }

    #[test]
    fn set_best_then_shrink_restores_snapshot() {
        let mut m = Model::initialize(ScoreFunc::Linear, LossFunc::Squared, 4, 0, 4, 1, 0.66, 3);
        m.set_best();
        m.w.as_mut_slice()[0] = 999.0;
        m.shrink();
        assert_ne!(m.w[0], 999.0);
    }

    #[test]
    fn serialize_to_vec_round_trips_through_load_from_vec() {
        let mut m = Model::initialize(ScoreFunc::Fm, LossFunc::Squared, 3, 0, 4, 1, 0.66, 21);
        let snapshot = m.serialize_to_vec();
        m.w.as_mut_slice().fill(42.0);
        m.load_from_vec(&snapshot);
        assert_ne!(m.w[0], 42.0);
    }
}

//! xLearn: a training and inference engine for linear, factorization-machine
//! and field-aware factorization-machine models over sparse data.
//!
//! This crate is the core engine only: data pipeline, model store, score
//! kernels, loss, metrics and the training driver. CLI argument parsing,
//! logging sinks and process exit codes live in the `xlearn-cli` crate.

pub mod align;
pub mod data;
pub mod error;
pub mod fastmath;
pub mod hyper;
pub mod kernel;
pub mod loss;
pub mod metric;
pub mod model;
pub mod parser;
pub mod pool;
pub mod reader;
pub mod simd;
pub mod trainer;

pub use data::{Batch, Node, SparseRow};
pub use error::XLearnError;
pub use hyper::{HyperParam, LossFunc, MetricKind, Optimizer, ScoreFunc};
pub use model::Model;
pub use trainer::Trainer;

/// Max size of one line of text data (§4.B `kMaxLineSize`).
pub const MAX_LINE_SIZE: usize = 512 * 1024;

/// Chunk size used by the file fingerprint rolling hash (§4.C).
pub const HASH_CHUNK_SIZE: usize = 1000 * 1024;

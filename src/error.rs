//! Library error taxonomy (spec.md §7).
//!
//! Kernels and the block-level parser routines still abort on fatal
//! conditions (line too long, unrecognised file shape) mirroring the
//! original's `LOG(FATAL)` calls — only entry points return `Result`.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum XLearnError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Format(#[from] FormatError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Class 1: configuration error (invalid flag, missing file, conflicting
/// options). Reported with a one-line human message and a non-zero exit.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("training file not found: {0}")]
    MissingFile(PathBuf),

    #[error("validation file not found: {0}")]
    MissingValidationFile(PathBuf),

    #[error("output directory does not exist or is not writable: {0}")]
    UnwritableOutput(PathBuf),

    #[error("latent dimension k must be > 0, got {0}")]
    InvalidK(i64),

    #[error("learning rate must be > 0, got {0}")]
    InvalidLearningRate(f32),

    #[error("L2 lambda must be >= 0, got {0}")]
    InvalidLambda(f32),

    #[error("FTRL alpha/beta must be > 0 (alpha={alpha}, beta={beta})")]
    InvalidFtrlRate { alpha: f32, beta: f32 },

    #[error("max epochs must be > 0, got {0}")]
    InvalidEpochs(i64),

    #[error("cross-validation needs at least 2 folds, got {0}")]
    InvalidFolds(i64),

    #[error("block size must be > 0 MiB, got {0}")]
    InvalidBlockSize(i64),

    #[error("early-stop window must be >= 1, got {0}")]
    InvalidStopWindow(i64),

    #[error("unknown score/loss combination for -s {0}")]
    UnknownTaskCode(u8),

    #[error("unknown optimizer {0:?}, expected sgd|adagrad|ftrl")]
    UnknownOptimizer(String),

    #[error("unknown metric {0:?}")]
    UnknownMetric(String),

    #[error("cross-validation folds ({folds}) exceed the number of rows ({rows})")]
    TooFewRowsForFolds { folds: usize, rows: usize },
}

/// Class 2/3/4: format, resource and I/O errors that are fatal to the
/// current run but still get a message instead of an abort at the entry
/// point (e.g. a corrupt model file handed to `Model::deserialize`).
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("could not determine file format (separator/column shape not recognised)")]
    UnrecognisedShape,

    #[error("line exceeds the {0} byte limit")]
    LineTooLong(usize),

    #[error("unknown score_func token in model file: {0:?}")]
    UnknownScoreFunc(String),

    #[error("model file header is truncated or corrupt")]
    TruncatedHeader,

    #[error("binary cache length prefix does not match remaining file size")]
    CacheLengthMismatch,

    #[error("binary cache is corrupt: {0}")]
    CorruptCache(String),
}

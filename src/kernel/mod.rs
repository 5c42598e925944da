//! Score kernels: per-model-family score + gradient, dispatched on
//! `HyperParam::score_func` (spec.md §4.E).

pub mod ffm;
pub mod fm;
pub mod linear;
pub mod optim;

use crate::data::SparseRow;
use crate::hyper::HyperParam;
use crate::model::Model;

/// Common contract every score kernel presents (spec.md §4.E).
pub trait ScoreKernel {
    /// `Σ w·val + bias` plus whatever interaction term the family adds.
    fn calc_score(&self, row: &SparseRow, model: &Model, norm: f32) -> f32;

    /// Mutate `model` in place given `pg`, the scalar partial derivative of
    /// the loss with respect to the score (supplied by the active `Loss`).
    fn calc_grad(&self, row: &SparseRow, model: &mut Model, pg: f32, norm: f32, hyper: &HyperParam);
}

/// Pick the kernel matching `hyper.score_func`.
pub fn kernel_for(hyper: &HyperParam) -> Box<dyn ScoreKernel + Send + Sync> {
    match hyper.score_func {
        crate::hyper::ScoreFunc::Linear => Box::new(linear::LinearKernel),
        crate::hyper::ScoreFunc::Fm => Box::new(fm::FmKernel),
        crate::hyper::ScoreFunc::Ffm => Box::new(ffm::FfmKernel),
    }
}

//! Loss functions (spec.md §4.F), grounded on
//! `original_source/src/loss/{loss,cross_entropy_loss,squared_loss}.{h,cc}`.
//!
//! `predict` is free-standing rather than a trait method: the original's
//! `Loss::Predict` is never overridden by either subclass, so there is
//! nothing family-specific to dispatch on. `evaluate`/`calc_grad` share one
//! partitioned driver, parameterised by each family's per-row loss term and
//! partial gradient — the original hand-duplicates the thread-fan-out
//! boilerplate in `ce_evalute_thread`/`sq_evalute_thread` and
//! `ce_gradient_thread`/`sq_gradient_thread`; here it's written once.

use crate::data::Batch;
use crate::hyper::HyperParam;
use crate::kernel::ScoreKernel;
use crate::model::Model;
use crate::pool::WorkerPool;

pub trait Loss: Send + Sync {
    fn loss_type(&self) -> &'static str;

    /// Accumulate loss over `pred`/`label` (not a reset — callers call
    /// [`Loss::reset`] between independent evaluations).
    fn evaluate(&mut self, pred: &[f32], label: &[f32], pool: &WorkerPool);

    /// For each row, score it, derive the partial gradient, and update
    /// `model` in place through `kernel`. Also accumulates loss.
    fn calc_grad(&mut self, batch: &Batch, model: &mut Model, kernel: &dyn ScoreKernel, hyper: &HyperParam, pool: &WorkerPool);

    fn get_loss(&self) -> f32;
    fn reset(&mut self);
}

/// Score every row of `batch`, fanned across `pool` (spec.md §4.F: predict
/// is always parallel, regardless of `lock_free`).
pub fn predict(batch: &Batch, model: &Model, kernel: &dyn ScoreKernel, pool: &WorkerPool, out: &mut Vec<f32>) {
    out.clear();
    out.resize(batch.len(), 0.0);
    let rows = &batch.rows;
    let norm = &batch.norm;
    let out_ptr = SharedMutPtr(out.as_mut_ptr());
    pool.run_partitioned(batch.len(), |start, end| {
        for i in start..end {
            let score = kernel.calc_score(&rows[i], model, norm[i]);
            // SAFETY: partitions are disjoint row ranges; each index is
            // written by exactly one partition.
            unsafe { *out_ptr.0.add(i) = score };
        }
    });
}

/// Raw pointer wrapper letting disjoint-index writes cross the `rayon`
/// `Sync` boundary, the same HogWild-style aliasing spec.md §5 documents
/// for gradient updates, used here for predict's output buffer instead.
struct SharedMutPtr(*mut f32);
unsafe impl Sync for SharedMutPtr {}

/// Shares a `&mut Model` across partitions. Under `lock_free == true`
/// different partitions touch disjoint-ish coordinates but may race on a
/// shared feature — the documented, accepted HogWild race (spec.md §5).
#[derive(Clone, Copy)]
struct SharedModelPtr(*mut Model);
unsafe impl Sync for SharedModelPtr {}

fn calc_grad_shared(
    batch: &Batch,
    model: &mut Model,
    kernel: &dyn ScoreKernel,
    hyper: &HyperParam,
    pool: &WorkerPool,
    loss_term: impl Fn(f32, f32) -> f64 + Sync,
    partial_grad: impl Fn(f32, f32) -> f32 + Sync,
) -> (f64, u64) {
    let len = batch.len();
    if len == 0 {
        return (0.0, 0);
    }
    let model_ptr = SharedModelPtr(model as *mut Model);
    let rows = &batch.rows;
    let y = &batch.y;
    let norm = &batch.norm;

    let run_range = |start: usize, end: usize| -> f64 {
        // SAFETY: each partition owns a disjoint `[start, end)` row range;
        // `ScoreKernel::calc_grad` only ever touches coordinates addressed
        // by the row it's given.
        let model = unsafe { &mut *model_ptr.0 };
        let mut sum = 0.0f64;
        for i in start..end {
            let row = &rows[i];
            let pred = kernel.calc_score(row, model, norm[i]);
            sum += loss_term(pred, y[i]);
            let pg = partial_grad(pred, y[i]);
            kernel.calc_grad(row, model, pg, norm[i], hyper);
        }
        sum
    };

    let partials = if hyper.lock_free {
        pool.map_partitioned(len, run_range)
    } else {
        vec![run_range(0, len)]
    };
    (partials.into_iter().sum(), len as u64)
}

fn evaluate_shared(pred: &[f32], label: &[f32], pool: &WorkerPool, loss_term: impl Fn(f32, f32) -> f64 + Sync) -> (f64, u64) {
    assert_eq!(pred.len(), label.len());
    let partials = pool.map_partitioned(pred.len(), |start, end| {
        let mut sum = 0.0f64;
        for i in start..end {
            sum += loss_term(pred[i], label[i]);
        }
        sum
    });
    (partials.into_iter().sum(), pred.len() as u64)
}

fn sign(y: f32) -> f32 {
    if y > 0.0 {
        1.0
    } else {
        -1.0
    }
}

/// `log1p(exp(-y·pred))` with `y ∈ {-1, +1}` (spec.md §4.F).
#[derive(Debug, Default, Clone, Copy)]
pub struct CrossEntropyLoss {
    loss_sum: f64,
    total_example: u64,
}

impl CrossEntropyLoss {
    pub fn new() -> Self {
        Self::default()
    }

    fn term(pred: f32, label: f32) -> f64 {
        let y = sign(label);
        ((-y * pred) as f64).exp().ln_1p()
    }
}

impl Loss for CrossEntropyLoss {
    fn loss_type(&self) -> &'static str {
        "log_loss"
    }

    fn evaluate(&mut self, pred: &[f32], label: &[f32], pool: &WorkerPool) {
        let (sum, count) = evaluate_shared(pred, label, pool, Self::term);
        self.loss_sum += sum;
        self.total_example += count;
    }

    fn calc_grad(&mut self, batch: &Batch, model: &mut Model, kernel: &dyn ScoreKernel, hyper: &HyperParam, pool: &WorkerPool) {
        let (sum, count) = calc_grad_shared(batch, model, kernel, hyper, pool, Self::term, |pred, label| {
            let y = sign(label);
            -y / (1.0 + (y * pred).exp())
        });
        self.loss_sum += sum;
        self.total_example += count;
    }

    fn get_loss(&self) -> f32 {
        (self.loss_sum / self.total_example as f64) as f32
    }

    fn reset(&mut self) {
        self.loss_sum = 0.0;
        self.total_example = 0;
    }
}

/// `½(y - pred)²` (spec.md §4.F).
#[derive(Debug, Default, Clone, Copy)]
pub struct SquaredLoss {
    loss_sum: f64,
    total_example: u64,
}

impl SquaredLoss {
    pub fn new() -> Self {
        Self::default()
    }

    fn term(pred: f32, label: f32) -> f64 {
        let error = (label - pred) as f64;
        0.5 * error * error
    }
}

impl Loss for SquaredLoss {
    fn loss_type(&self) -> &'static str {
        "squared"
    }

    fn evaluate(&mut self, pred: &[f32], label: &[f32], pool: &WorkerPool) {
        let (sum, count) = evaluate_shared(pred, label, pool, Self::term);
        self.loss_sum += sum;
        self.total_example += count;
    }

    fn calc_grad(&mut self, batch: &Batch, model: &mut Model, kernel: &dyn ScoreKernel, hyper: &HyperParam, pool: &WorkerPool) {
        let (sum, count) = calc_grad_shared(batch, model, kernel, hyper, pool, Self::term, |pred, label| pred - label);
        self.loss_sum += sum;
        self.total_example += count;
    }

    fn get_loss(&self) -> f32 {
        (self.loss_sum / self.total_example as f64) as f32
    }

    fn reset(&mut self) {
        self.loss_sum = 0.0;
        self.total_example = 0;
    }
}

/// Build the loss matching `hyper.loss_func` (spec.md §4.F).
pub fn loss_for(hyper: &HyperParam) -> Box<dyn Loss> {
    match hyper.loss_func {
        crate::hyper::LossFunc::CrossEntropy => Box::new(CrossEntropyLoss::new()),
        crate::hyper::LossFunc::Squared => Box::new(SquaredLoss::new()),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::data::Node;
    use crate::hyper::ScoreFunc;
    use crate::kernel::linear::LinearKernel;

    fn one_row_batch(feat: u32, label: f32) -> Batch {
        let mut b = Batch::new();
        b.reset(1, true);
        b.add_node(0, feat, 1.0, 0);
        b.set_label(0, label);
        b.compute_norm(false);
        b
    }

    #[test]
    fn cross_entropy_loss_is_nonneg_and_decreases_loss_sum_toward_fit() {
        let mut model = Model::initialize(ScoreFunc::Linear, crate::hyper::LossFunc::CrossEntropy, 4, 0, 4, 1, 0.0, 1);
        let hyper = HyperParam::default();
        let pool = WorkerPool::new(1);
        let kernel = LinearKernel;
        let batch = one_row_batch(1, 1.0);

        let mut loss = CrossEntropyLoss::new();
        loss.calc_grad(&batch, &mut model, &kernel, &hyper, &pool);
        assert!(loss.get_loss() >= 0.0);
    }

    #[test]
    fn squared_loss_matches_hand_computed_value() {
        let model = Model::initialize(ScoreFunc::Linear, crate::hyper::LossFunc::Squared, 4, 0, 4, 1, 0.0, 1);
        let pool = WorkerPool::new(1);
        let kernel = LinearKernel;
        let batch = one_row_batch(1, 2.0);

        let mut pred = Vec::new();
        predict(&batch, &model, &kernel, &pool, &mut pred);
        let expected_pred = model.bias[0] + model.w[model.w_offset(1)];
        assert!((pred[0] - expected_pred).abs() < 1e-6);

        let mut loss = SquaredLoss::new();
        loss.evaluate(&pred, &batch.y, &pool);
        let expected_loss = 0.5 * (batch.y[0] - expected_pred).powi(2);
        assert!((loss.get_loss() - expected_loss).abs() < 1e-5);
    }

    #[test]
    fn reset_clears_accumulated_loss() {
        let mut loss = SquaredLoss::new();
        let pool = WorkerPool::new(1);
        loss.evaluate(&[1.0, 2.0], &[1.5, 1.5], &pool);
        assert!(loss.get_loss() > 0.0);
        loss.reset();
        assert_eq!(loss.total_example, 0);
    }

    #[test]
    fn single_thread_and_lock_free_grad_passes_both_converge() {
        // lock_free == true is documented to race on shared coordinates
        // (spec.md §5), so this only checks both modes produce a finite,
        // non-negative loss over several epochs — not bit-for-bit parity.
        let mut hyper = HyperParam::default();
        let kernel = LinearKernel;
        let pool = WorkerPool::new(4);

        let mut batch = Batch::new();
        batch.reset(8, true);
        for i in 0..8 {
            batch.add_node(i, (i % 4) as u32, 1.0, 0);
            batch.set_label(i, if i % 2 == 0 { 1.0 } else { -1.0 });
        }
        batch.compute_norm(false);

        for lock_free in [false, true] {
            hyper.lock_free = lock_free;
            let mut model = Model::initialize(ScoreFunc::Linear, crate::hyper::LossFunc::CrossEntropy, 4, 0, 4, 1, 0.0, 1);
            let mut loss = CrossEntropyLoss::new();
            for _ in 0..3 {
                loss.reset();
                loss.calc_grad(&batch, &mut model, &kernel, &hyper, &pool);
            }
            assert!(loss.get_loss().is_finite());
            assert!(loss.get_loss() >= 0.0);
        }
    }
}

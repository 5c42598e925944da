//! Field-aware factorization machine score kernel (spec.md §4.E), grounded
//! on `original_source/src/score/ffm_score*.cc`.
//!
//! Each pair of non-zeros `(i, j)` touches two distinct latent blocks,
//! `v[feat_i, field_j]` and `v[feat_j, field_i]`, read together and
//! written together from their *pre-update* values (matching the
//! original's two-register SSE update). Because the two blocks can sit
//! anywhere in the same buffer, this walks the factor axis one lane at a
//! time through `Model`'s `Index`/`IndexMut`, rather than borrowing two
//! overlapping `&mut [f32]` windows — correct and simple, at the cost of
//! not vectorising this one pairwise step (FM's single-block update in
//! `kernel::fm` still uses the 4-wide path).

use crate::data::SparseRow;
use crate::hyper::{HyperParam, Optimizer};
use crate::kernel::optim;
use crate::kernel::ScoreKernel;
use crate::model::Model;

pub struct FfmKernel;

impl ScoreKernel for FfmKernel {
    fn calc_score(&self, row: &SparseRow, model: &Model, norm: f32) -> f32 {
        let sqrt_norm = norm.sqrt();
        let mut sum_w = model.bias[0];
        for node in row {
            if node.feat_id >= model.num_feat {
                continue;
            }
            let off = model.w_offset(node.feat_id);
            sum_w += model.w[off] * node.value * sqrt_norm;
        }

        let k_aligned = model.k_aligned as usize;
        let mut sum_v = 0.0f32;
        for (i, a) in row.iter().enumerate() {
            if a.feat_id >= model.num_feat || a.field_id >= model.num_field {
                continue;
            }
            for b in &row[i + 1..] {
                if b.feat_id >= model.num_feat || b.field_id >= model.num_field {
                    continue;
                }
                let base1 = model.v_offset_ffm(a.feat_id, b.field_id);
                let base2 = model.v_offset_ffm(b.feat_id, a.field_id);
                let scale = a.value * b.value * norm;
                for d in 0..k_aligned {
                    sum_v += model.v[base1 + d] * model.v[base2 + d] * scale;
                }
            }
        }
        sum_w + sum_v
    }

    fn calc_grad(&self, row: &SparseRow, model: &mut Model, pg: f32, norm: f32, hyper: &HyperParam) {
        let sqrt_norm = norm.sqrt();

        for node in row {
            if node.feat_id >= model.num_feat {
                continue;
            }
            let off = model.w_offset(node.feat_id);
            let grad_term = pg * node.value * sqrt_norm;
            update_linear_slot(model, off, hyper, grad_term);
        }
        update_linear_slot(model, usize::MAX, hyper, pg); // sentinel handled below for bias

        let k_aligned = model.k_aligned as usize;
        for i in 0..row.len() {
            let a = row[i];
            if a.feat_id >= model.num_feat || a.field_id >= model.num_field {
                continue;
            }
            for j in (i + 1)..row.len() {
                let b = row[j];
                if b.feat_id >= model.num_feat || b.field_id >= model.num_field {
                    continue;
                }
                let base1 = model.v_offset_ffm(a.feat_id, b.field_id);
                let base2 = model.v_offset_ffm(b.feat_id, a.field_id);
                let scale = pg * a.value * b.value * norm;

                for d in 0..k_aligned {
                    let w1 = model.v[base1 + d];
                    let w2 = model.v[base2 + d];
                    let grad_term_1 = scale * w2;
                    let grad_term_2 = scale * w1;

                    match hyper.optimizer {
                        Optimizer::Sgd => {
                            let mut v1 = w1;
                            let mut v2 = w2;
                            optim::sgd_scalar(hyper.learning_rate, hyper.lambda, &mut v1, grad_term_1);
                            optim::sgd_scalar(hyper.learning_rate, hyper.lambda, &mut v2, grad_term_2);
                            model.v[base1 + d] = v1;
                            model.v[base2 + d] = v2;
                        }
                        Optimizer::AdaGrad => {
                            let mut v1 = w1;
                            let mut n1 = model.v[base1 + k_aligned + d];
                            optim::adagrad_scalar(hyper.learning_rate, hyper.lambda, &mut v1, &mut n1, grad_term_1, hyper.fast_math);
                            let mut v2 = w2;
                            let mut n2 = model.v[base2 + k_aligned + d];
                            optim::adagrad_scalar(hyper.learning_rate, hyper.lambda, &mut v2, &mut n2, grad_term_2, hyper.fast_math);
                            model.v[base1 + d] = v1;
                            model.v[base1 + k_aligned + d] = n1;
                            model.v[base2 + d] = v2;
                            model.v[base2 + k_aligned + d] = n2;
                        }
                        Optimizer::Ftrl => {
                            let mut v1 = w1;
                            let mut n1 = model.v[base1 + k_aligned + d];
                            let mut z1 = model.v[base1 + 2 * k_aligned + d];
                            optim::ftrl_scalar(
                                hyper.alpha,
                                hyper.beta,
                                hyper.lambda_1,
                                hyper.lambda_2,
                                &mut v1,
                                &mut n1,
                                &mut z1,
                                grad_term_1,
                            );
                            let mut v2 = w2;
                            let mut n2 = model.v[base2 + k_aligned + d];
                            let mut z2 = model.v[base2 + 2 * k_aligned + d];
                            optim::ftrl_scalar(
                                hyper.alpha,
                                hyper.beta,
                                hyper.lambda_1,
                                hyper.lambda_2,
                                &mut v2,
                                &mut n2,
                                &mut z2,
                                grad_term_2,
                            );
                            model.v[base1 + d] = v1;
                            model.v[base1 + k_aligned + d] = n1;
                            model.v[base1 + 2 * k_aligned + d] = z1;
                            model.v[base2 + d] = v2;
                            model.v[base2 + k_aligned + d] = n2;
                            model.v[base2 + 2 * k_aligned + d] = z2;
                        }
                    }
                }
            }
        }
    }
}

/// Apply one optimiser step to the bias (`off == usize::MAX`) or a linear
/// weight block at `off` (spec.md §4.E — identical across all three score
/// families).
fn update_linear_slot(model: &mut Model, off: usize, hyper: &HyperParam, grad_term: f32) {
    let is_bias = off == usize::MAX;
    let off = if is_bias { 0 } else { off };
    let buf: &mut [f32] = if is_bias { model.bias.as_mut_slice() } else { model.w.as_mut_slice() };
    match hyper.optimizer {
        Optimizer::Sgd => {
            let mut value = buf[off];
            optim::sgd_scalar(hyper.learning_rate, if is_bias { 0.0 } else { hyper.lambda }, &mut value, grad_term);
            buf[off] = value;
        }
        Optimizer::AdaGrad => {
            let mut value = buf[off];
            let mut n = buf[off + 1];
            optim::adagrad_scalar(
                hyper.learning_rate,
                if is_bias { 0.0 } else { hyper.lambda },
                &mut value,
                &mut n,
                grad_term,
                hyper.fast_math,
            );
            buf[off] = value;
            buf[off + 1] = n;
        }
        Optimizer::Ftrl => {
            let mut value = buf[off];
            let mut n = buf[off + 1];
            let mut z = buf[off + 2];
            optim::ftrl_scalar(hyper.alpha, hyper.beta, hyper.lambda_1, hyper.lambda_2, &mut value, &mut n, &mut z, grad_term);
            buf[off] = value;
            buf[off + 1] = n;
            buf[off + 2] = z;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::data::Node;
    use crate::hyper::{LossFunc, ScoreFunc};

    #[test]
    fn k1_one_hot_degree_two_matches_closed_form() {
        // spec.md §8 invariant 8: FFM with k=1 scores <v_{i,field_j}, v_{j,field_i}>.
        let mut model = Model::initialize(ScoreFunc::Ffm, LossFunc::CrossEntropy, 4, 2, 1, 1, 0.0, 1);
        model.w.as_mut_slice().fill(0.0);
        model.bias.as_mut_slice().fill(0.0);
        let base1 = model.v_offset_ffm(1, 1); // feat 1, field of the *other* node (1)
        let base2 = model.v_offset_ffm(2, 0); // feat 2, field of the *other* node (0)
        model.v.as_mut_slice()[base1] = 0.4;
        model.v.as_mut_slice()[base2] = 0.6;

        let row = vec![Node::new(0, 1, 1.0), Node::new(1, 2, 1.0)];
        let score = FfmKernel.calc_score(&row, &model, 1.0);
        assert!((score - 0.4 * 0.6).abs() < 1e-5);
    }

    #[test]
    fn unseen_field_does_not_panic() {
        let model = Model::initialize(ScoreFunc::Ffm, LossFunc::CrossEntropy, 4, 2, 4, 1, 0.0, 1);
        let row = vec![Node::new(9, 1, 1.0), Node::new(0, 2, 1.0)];
        let score = FfmKernel.calc_score(&row, &model, 1.0);
        assert_eq!(score, model.bias[0]);
    }
}

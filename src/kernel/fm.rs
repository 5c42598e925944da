//! Factorization machine score kernel (spec.md §4.E), grounded on
//! `original_source/src/score/fm_score*.cc`.
//!
//! `norm` is folded into the row exactly once, at the outer accumulator —
//! the redesigned fix for the original's double-count bug (see
//! `DESIGN.md`); the two original sources both multiply each pairwise
//! product by `norm` *and* each per-node contribution by `norm`, which
//! over-counts by a factor of `norm` for `norm != 1`.

use crate::data::SparseRow;
use crate::hyper::{HyperParam, Optimizer};
use crate::kernel::optim;
use crate::kernel::ScoreKernel;
use crate::model::Model;

pub struct FmKernel;

impl ScoreKernel for FmKernel {
    fn calc_score(&self, row: &SparseRow, model: &Model, norm: f32) -> f32 {
        let sqrt_norm = norm.sqrt();
        let mut linear = model.bias[0];
        for node in row {
            if node.feat_id >= model.num_feat {
                continue;
            }
            let off = model.w_offset(node.feat_id);
            linear += model.w[off] * node.value * sqrt_norm;
        }

        let k_aligned = model.k_aligned as usize;
        let mut s = vec![0f32; k_aligned];
        for node in row {
            if node.feat_id >= model.num_feat {
                continue;
            }
            let base = model.v_offset_fm(node.feat_id);
            let scale = node.value * sqrt_norm;
            for d in 0..k_aligned {
                s[d] += model.v[base + d] * scale;
            }
        }

        let mut quad = 0.0f32;
        for node in row {
            if node.feat_id >= model.num_feat {
                continue;
            }
            let base = model.v_offset_fm(node.feat_id);
            let scale = node.value * sqrt_norm;
            for d in 0..k_aligned {
                let wv = model.v[base + d] * scale;
                quad += wv * (s[d] - wv);
            }
        }

        linear + 0.5 * quad
    }

    fn calc_grad(&self, row: &SparseRow, model: &mut Model, pg: f32, norm: f32, hyper: &HyperParam) {
        let sqrt_norm = norm.sqrt();

        // linear term + bias, scalar (identical to LinearKernel).
        match hyper.optimizer {
            Optimizer::Sgd => {
                for node in row {
                    if node.feat_id >= model.num_feat {
                        continue;
                    }
                    let off = model.w_offset(node.feat_id);
                    let mut value = model.w[off];
                    optim::sgd_scalar(hyper.learning_rate, hyper.lambda, &mut value, pg * node.value * sqrt_norm);
                    model.w[off] = value;
                }
                let mut bias = model.bias[0];
                optim::sgd_scalar(hyper.learning_rate, 0.0, &mut bias, pg);
                model.bias[0] = bias;
            }
            Optimizer::AdaGrad => {
                for node in row {
                    if node.feat_id >= model.num_feat {
                        continue;
                    }
                    let off = model.w_offset(node.feat_id);
                    let (mut value, mut n) = (model.w[off], model.w[off + 1]);
                    optim::adagrad_scalar(
                        hyper.learning_rate,
                        hyper.lambda,
                        &mut value,
                        &mut n,
                        pg * node.value * sqrt_norm,
                        hyper.fast_math,
                    );
                    model.w[off] = value;
                    model.w[off + 1] = n;
                }
                let (mut bias, mut bias_n) = (model.bias[0], model.bias[1]);
                optim::adagrad_scalar(hyper.learning_rate, 0.0, &mut bias, &mut bias_n, pg, hyper.fast_math);
                model.bias[0] = bias;
                model.bias[1] = bias_n;
            }
            Optimizer::Ftrl => {
                for node in row {
                    if node.feat_id >= model.num_feat {
                        continue;
                    }
                    let off = model.w_offset(node.feat_id);
                    let (mut value, mut n, mut z) = (model.w[off], model.w[off + 1], model.w[off + 2]);
                    optim::ftrl_scalar(
                        hyper.alpha,
                        hyper.beta,
                        hyper.lambda_1,
                        hyper.lambda_2,
                        &mut value,
                        &mut n,
                        &mut z,
                        pg * node.value,
                    );
                    model.w[off] = value;
                    model.w[off + 1] = n;
                    model.w[off + 2] = z;
                }
                let (mut bias, mut bias_n, mut bias_z) = (model.bias[0], model.bias[1], model.bias[2]);
                optim::ftrl_scalar(hyper.alpha, hyper.beta, hyper.lambda_1, hyper.lambda_2, &mut bias, &mut bias_n, &mut bias_z, pg);
                model.bias[0] = bias;
                model.bias[1] = bias_n;
                model.bias[2] = bias_z;
            }
        }

        // latent factor, 4-wide SIMD over k_aligned.
        let k_aligned = model.k_aligned as usize;
        let mut s = vec![0f32; k_aligned];
        for node in row {
            if node.feat_id >= model.num_feat {
                continue;
            }
            let base = model.v_offset_fm(node.feat_id);
            let scale = node.value * norm;
            for d in 0..k_aligned {
                s[d] += model.v[base + d] * scale;
            }
        }

        for node in row {
            if node.feat_id >= model.num_feat {
                continue;
            }
            let base = model.v_offset_fm(node.feat_id);
            let scale = node.value * norm;
            let mut grad_term = vec![0f32; k_aligned];
            for d in 0..k_aligned {
                let wv = model.v[base + d] * scale;
                grad_term[d] = pg * node.value * (s[d] - wv);
            }
            let stride = k_aligned;
            match hyper.optimizer {
                Optimizer::Sgd => {
                    let value = &mut model.v.as_mut_slice()[base..base + stride];
                    optim::sgd_block(value, hyper.learning_rate, hyper.lambda, &grad_term);
                }
                Optimizer::AdaGrad => {
                    let (value, n) = model.v.as_mut_slice()[base..base + 2 * stride].split_at_mut(stride);
                    optim::adagrad_block(value, n, hyper.learning_rate, hyper.lambda, &grad_term, hyper.fast_math);
                }
                Optimizer::Ftrl => {
                    let (value, rest) = model.v.as_mut_slice()[base..base + 3 * stride].split_at_mut(stride);
                    let (n, z) = rest.split_at_mut(stride);
                    optim::ftrl_block(value, n, z, hyper.alpha, hyper.beta, hyper.lambda_1, hyper.lambda_2, &grad_term);
                }
            }
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
        // spec.md §8 invariant 8: FM with k=1, one-hot rows of degree 2
        // scores <v_i, v_j> (bias/linear zeroed for this check).
        let mut model = Model::initialize(ScoreFunc::Fm, LossFunc::Squared, 4, 0, 1, 1, 0.0, 1);
        model.w.as_mut_slice().fill(0.0);
        model.bias.as_mut_slice().fill(0.0);
        let off_a = model.v_offset_fm(1);
        let off_b = model.v_offset_fm(2);
        model.v.as_mut_slice()[off_a] = 0.3;
        model.v.as_mut_slice()[off_b] = 0.7;

        let row = vec![Node::new(0, 1, 1.0), Node::new(0, 2, 1.0)];
        let score = FmKernel.calc_score(&row, &model, 1.0);
        assert!((score - 0.3 * 0.7).abs() < 1e-5);
    }

    #[test]
    fn unseen_feature_does_not_panic() {
        let model = Model::initialize(ScoreFunc::Fm, LossFunc::Squared, 2, 0, 4, 1, 0.0, 1);
        let row = vec![Node::new(0, 50, 1.0)];
        let score = FmKernel.calc_score(&row, &model, 1.0);
        assert_eq!(score, model.bias[0]);
    }

    /// spec.md §9 Open Question 1 / §4.E: `norm` must be folded into the
    /// quadratic term exactly once. `norm == 1.0` can't distinguish a
    /// single fold from a double-count (`1.0 == 1.0^2`), so this pins the
    /// score at a non-unit `norm` against the closed-form pairwise value.
    #[test]
    fn score_with_nontrivial_norm_folds_norm_once() {
        let mut model = Model::initialize(ScoreFunc::Fm, LossFunc::Squared, 4, 0, 1, 1, 0.0, 1);
        model.w.as_mut_slice().fill(0.0);
        model.bias.as_mut_slice().fill(0.0);
        let off_a = model.v_offset_fm(1);
        let off_b = model.v_offset_fm(2);
        model.v.as_mut_slice()[off_a] = 0.3;
        model.v.as_mut_slice()[off_b] = 0.7;

        let row = vec![Node::new(0, 1, 1.0), Node::new(0, 2, 1.0)];
        let norm = 0.25f32;
        let score = FmKernel.calc_score(&row, &model, norm);
        // pairwise term is v_i * val_i * v_j * val_j, scaled by `norm`
        // exactly once -- not `norm^2`.
        let expected = 0.3 * 0.7 * norm;
        assert!((score - expected).abs() < 1e-5, "score={score} expected={expected}");
    }
}

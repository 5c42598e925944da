//! Linear (LR) score kernel (spec.md §4.E), grounded on
//! `original_source/src/score/linear_score*.cc`. Bias and every linear
//! weight are scalar — the original never vectorises this kernel, only
//! the latent factor loops in FM/FFM.

use crate::data::SparseRow;
use crate::hyper::{HyperParam, Optimizer};
use crate::kernel::optim;
use crate::kernel::ScoreKernel;
use crate::model::Model;

pub struct LinearKernel;

impl ScoreKernel for LinearKernel {
    fn calc_score(&self, row: &SparseRow, model: &Model, _norm: f32) -> f32 {
        let mut score = model.bias[0];
        for node in row {
            if node.feat_id >= model.num_feat {
                continue;
            }
            let off = model.w_offset(node.feat_id);
            score += model.w[off] * node.value;
        }
        score
    }

    fn calc_grad(&self, row: &SparseRow, model: &mut Model, pg: f32, norm: f32, hyper: &HyperParam) {
        let sqrt_norm = norm.sqrt();
        match hyper.optimizer {
            Optimizer::Sgd => {
                for node in row {
                    if node.feat_id >= model.num_feat {
                        continue;
                    }
                    let off = model.w_offset(node.feat_id);
                    let grad_term = pg * node.value * sqrt_norm;
                    let mut value = model.w[off];
                    optim::sgd_scalar(hyper.learning_rate, hyper.lambda, &mut value, grad_term);
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
                    let grad_term = pg * node.value * sqrt_norm;
                    let (mut value, mut n) = (model.w[off], model.w[off + 1]);
                    optim::adagrad_scalar(hyper.learning_rate, hyper.lambda, &mut value, &mut n, grad_term, hyper.fast_math);
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
                    let grad_term = pg * node.value;
                    let (mut value, mut n, mut z) = (model.w[off], model.w[off + 1], model.w[off + 2]);
                    optim::ftrl_scalar(hyper.alpha, hyper.beta, hyper.lambda_1, hyper.lambda_2, &mut value, &mut n, &mut z, grad_term);
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
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::data::Node;
    use crate::hyper::LossFunc;
    use crate::hyper::ScoreFunc;

    fn one_hot_row(feat: u32) -> SparseRow {
        vec![Node::new(0, feat, 1.0)]
    }

    #[test]
    fn score_is_bias_plus_dot_product() {
        let model = Model::initialize(ScoreFunc::Linear, LossFunc::CrossEntropy, 4, 0, 4, 1, 0.0, 1);
        let kernel = LinearKernel;
        let score = kernel.calc_score(&one_hot_row(2), &model, 1.0);
        assert_eq!(score, model.bias[0] + model.w[model.w_offset(2)]);
    }

    #[test]
    fn unseen_feature_is_skipped_not_fatal() {
        let model = Model::initialize(ScoreFunc::Linear, LossFunc::CrossEntropy, 2, 0, 4, 1, 0.0, 1);
        let kernel = LinearKernel;
        let score = kernel.calc_score(&one_hot_row(99), &model, 1.0);
        assert_eq!(score, model.bias[0]);
    }

    #[test]
    fn sgd_step_matches_closed_form() {
        let mut model = Model::initialize(ScoreFunc::Linear, LossFunc::Squared, 4, 0, 4, 1, 0.0, 1);
        let mut hyper = HyperParam::default();
        hyper.optimizer = Optimizer::Sgd;
        hyper.lambda = 0.01;
        hyper.learning_rate = 0.1;
        let row = one_hot_row(1);
        let off = model.w_offset(1);
        let w0 = model.w[off];
        let pg = 0.3;
        LinearKernel.calc_grad(&row, &mut model, pg, 1.0, &hyper);
        let expected = w0 - hyper.learning_rate * (hyper.lambda * w0 + pg * 1.0);
        assert!((model.w[off] - expected).abs() < 1e-6);
    }
}

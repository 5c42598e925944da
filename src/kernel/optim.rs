//! Per-coordinate SGD/AdaGrad/FTRL update rules shared by every score
//! kernel (spec.md §4.E), grounded on
//! `original_source/src/score/{linear,fm,ffm}_score*.cc`.
//!
//! Scalar variants update the bias and linear-weight terms (the original
//! never vectorises these); block variants update one `k_aligned`-wide
//! latent factor at a time, 4 lanes per step. Unlike the original's three
//! independent C++ translation units (one per score kernel, each hand
//! duplicating this math and carrying its own copy of the two known bugs
//! fixed here — see `DESIGN.md`), this is the single implementation every
//! kernel calls into.

use crate::fastmath::inv_sqrt;
use crate::simd::{load, store};

#[inline]
pub fn sgd_scalar(lr: f32, lambda: f32, value: &mut f32, grad_term: f32) {
    let g = lambda * *value + grad_term;
    *value -= lr * g;
}

#[inline]
pub fn adagrad_scalar(lr: f32, lambda: f32, value: &mut f32, n: &mut f32, grad_term: f32, fast_math: bool) {
    let g = lambda * *value + grad_term;
    *n += g * g;
    *value -= lr * g * inv_sqrt(*n, fast_math);
}

#[inline]
pub fn ftrl_scalar(alpha: f32, beta: f32, lambda1: f32, lambda2: f32, value: &mut f32, n: &mut f32, z: &mut f32, grad_term: f32) {
    let g = lambda2 * *value + grad_term;
    let old_n = *n;
    *n += g * g;
    let sigma = (n.sqrt() - old_n.sqrt()) / alpha;
    *z += g - sigma * *value;
    if z.abs() <= lambda1 {
        *value = 0.0;
    } else {
        let smooth_lr = 1.0 / ((beta + n.sqrt()) / alpha + lambda2);
        let shrunk_z = if *z < 0.0 { *z + lambda1 } else { *z - lambda1 };
        *value = -smooth_lr * shrunk_z;
    }
}

/// SGD over one `k_aligned`-wide latent block. `grad_term[d]` is
/// `pg · val · (s_d − v_d · val)` (FM) or the FFM symmetric counterpart,
/// precomputed by the caller; `λ·v_d` is added here.
pub fn sgd_block(value: &mut [f32], lr: f32, lambda: f32, grad_term: &[f32]) {
    let mut d = 0;
    while d < value.len() {
        let w = load(value, d);
        let g = load(grad_term, d) + load(value, d) * wide::f32x4::splat(lambda);
        store(value, d, w - g * wide::f32x4::splat(lr));
        d += 4;
    }
}

pub fn adagrad_block(value: &mut [f32], n: &mut [f32], lr: f32, lambda: f32, grad_term: &[f32], fast_math: bool) {
    let mut d = 0;
    while d < value.len() {
        let w = load(value, d);
        let g = load(grad_term, d) + w * wide::f32x4::splat(lambda);
        let new_n = load(n, d) + g * g;
        store(n, d, new_n);
        let rsqrt = if fast_math {
            new_n.to_array().map(|x| crate::fastmath::fast_inv_sqrt(x))
        } else {
            new_n.to_array().map(|x| 1.0 / x.sqrt())
        };
        let rsqrt = wide::f32x4::new(rsqrt);
        store(value, d, w - g * rsqrt * wide::f32x4::splat(lr));
        d += 4;
    }
}

pub fn ftrl_block(value: &mut [f32], n: &mut [f32], z: &mut [f32], alpha: f32, beta: f32, lambda1: f32, lambda2: f32, grad_term: &[f32]) {
    let mut d = 0;
    while d < value.len() {
        for lane in 0..4 {
            let idx = d + lane;
            ftrl_scalar(alpha, beta, lambda1, lambda2, &mut value[idx], &mut n[idx], &mut z[idx], grad_term[idx]);
        }
        d += 4;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn sgd_scalar_matches_closed_form_single_step() {
        // spec.md §8 invariant 9: w - eta*(2*lambda*w + pg*val)
        let mut w = 0.5f32;
        let lr = 0.1;
        let lambda = 0.01;
        let pg = 0.3;
        let val = 2.0;
        sgd_scalar(lr, 2.0 * lambda, &mut w, pg * val);
        let expected = 0.5 - lr * (2.0 * lambda * 0.5 + pg * val);
        assert!((w - expected).abs() < 1e-6);
    }

    #[test]
    fn adagrad_accumulator_only_grows() {
        let mut w = 0.0f32;
        let mut n = 1.0f32;
        adagrad_scalar(0.2, 0.0, &mut w, &mut n, 0.5, false);
        assert!(n > 1.0);
    }

    #[test]
    fn ftrl_zeroes_weight_inside_the_l1_ball() {
        let mut w = 5.0f32;
        let mut n = 0.0f32;
        let mut z = 0.0f32;
        ftrl_scalar(0.1, 1.0, 1000.0, 0.0, &mut w, &mut n, &mut z, 0.01);
        assert_eq!(w, 0.0);
    }

    #[test]
    fn sgd_block_matches_scalar_lane_by_lane() {
        let mut block = [0.1f32, 0.2, 0.3, 0.4];
        let mut scalar = block;
        let grad = [0.01f32, -0.02, 0.03, 0.0];
        sgd_block(&mut block, 0.1, 0.02, &grad);
        for i in 0..4 {
            sgd_scalar(0.1, 0.02, &mut scalar[i], grad[i]);
        }
        for i in 0..4 {
            assert!((block[i] - scalar[i]).abs() < 1e-6);
        }
    }
}

//! Optional fast-math paths, off by default (spec.md §9 REDESIGN FLAG).
//!
//! The original unconditionally used approximate `exp`/`log1p`/`sigmoid`
//! and the Quake inverse square root. Here they are opt-in via
//! [`crate::hyper::HyperParam::fast_math`]; the numerical tolerances in
//! spec.md §8 assume the standard-library math these default to.

/// Quake III `0x5f375a86` fast inverse square root, mirrored from
/// `original_source/src/base/math.h::InvSqrt`.
#[inline]
pub fn fast_inv_sqrt(x: f32) -> f32 {
    let i = x.to_bits();
    let i = 0x5f375a86 - (i >> 1);
    let y = f32::from_bits(i);
    // one Newton-Raphson iteration
    y * (1.5 - 0.5 * x * y * y)
}

#[inline]
pub fn inv_sqrt(x: f32, fast: bool) -> f32 {
    if fast {
        fast_inv_sqrt(x)
    } else {
        1.0 / x.sqrt()
    }
}

#[inline]
pub fn fast_sigmoid(x: f32) -> f32 {
    0.5 * (x / (1.0 + x.abs())) + 0.5
}

#[inline]
pub fn sigmoid(x: f32, fast: bool) -> f32 {
    if fast {
        fast_sigmoid(x)
    } else if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

#[inline]
pub fn log1p_exp(x: f32, fast: bool) -> f32 {
    // log(1 + exp(x)), numerically stable for large |x|.
    if fast {
        if x > 0.0 {
            x + (1.0 + (-x).exp()).ln()
        } else {
            (1.0 + x.exp()).ln()
        }
    } else {
        x.max(0.0) + (1.0 + (-x.abs()).exp()).ln()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fast_inv_sqrt_is_approximate() {
        let x = 4.0f32;
        let approx = fast_inv_sqrt(x);
        let exact = 1.0 / x.sqrt();
        assert!((approx - exact).abs() < 0.01, "approx={approx} exact={exact}");
    }

    #[test]
    fn exact_inv_sqrt_matches_stdlib() {
        assert!((inv_sqrt(9.0, false) - (1.0 / 3.0)).abs() < 1e-6);
    }

    #[test]
    fn log1p_exp_matches_stdlib_log1p() {
        for x in [-5.0f32, -0.5, 0.0, 0.5, 5.0] {
            let got = log1p_exp(x, false);
            let expected = (x.exp()).ln_1p();
            assert!((got - expected).abs() < 1e-4, "x={x} got={got} expected={expected}");
        }
    }
}

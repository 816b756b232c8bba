//! Activation functions.
//!
//! # Formulas
//!
//! - `sigmoid(x) = 1 / (1 + e^-x)`
//! - `gelu(x) = x * (1 + erf(x / sqrt(2))) / 2` ([`GeluApproximation::Exact`])
//! - `gelu(x) = x * sigmoid(1.702 * x)` ([`GeluApproximation::Fast`])
//! - `gelu(x) = 0.5 * x * (1 + tanh(sqrt(2 / pi) * (x + 0.044715 * x^3)))`
//!   ([`GeluApproximation::Tanh`])
//!
//! The three GELU forms saturate identically (to `x` for large positive
//! inputs, to `0` for large negative ones) and differ by less than `0.02`
//! on `|x| < 1`.
//!
//! # Reference
//!
//! [Gaussian Error Linear Units](https://arxiv.org/abs/1606.08415)

use crate::error::Result;
use candle_core::Tensor;

/// Which formulation of GELU to evaluate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GeluApproximation {
    /// Erf based. Uses [`erf`], which is itself an approximation.
    #[default]
    Exact,
    /// `x * sigmoid(1.702 * x)`, the "quick gelu" of CLIP.
    Fast,
    /// Tanh based.
    Tanh,
}

/// Logistic sigmoid, `1 / (1 + e^-x)`.
pub fn sigmoid(x: &Tensor) -> Result<Tensor> {
    let denom = x.neg()?.exp()?.affine(1.0, 1.0)?;
    Ok(denom.recip()?)
}

/// Error function.
///
/// This is the Abramowitz and Stegun 7.1.26 rational approximation, not an
/// exact evaluation. Maximum absolute error is about `1.5e-7`.
pub fn erf(x: &Tensor) -> Result<Tensor> {
    const A1: f64 = 0.254829592;
    const A2: f64 = -0.284496736;
    const A3: f64 = 1.421413741;
    const A4: f64 = -1.453152027;
    const A5: f64 = 1.061405429;
    const P: f64 = 0.3275911;

    let dtype = x.dtype();
    // -1, 0 or 1; keeps erf(0) exactly zero
    let sign = (x.gt(0.0)?.to_dtype(dtype)? - x.lt(0.0)?.to_dtype(dtype)?)?;
    let abs = x.abs()?;

    let t = abs.affine(P, 1.0)?.recip()?;
    let poly = t.affine(A5, A4)?;
    let poly = (poly * &t)?.affine(1.0, A3)?;
    let poly = (poly * &t)?.affine(1.0, A2)?;
    let poly = (poly * &t)?.affine(1.0, A1)?;
    let poly = (poly * &t)?;

    let gauss = abs.sqr()?.neg()?.exp()?;
    let y = (poly * gauss)?.affine(-1.0, 1.0)?;
    Ok((sign * y)?)
}

/// Gaussian error linear unit.
pub fn gelu(x: &Tensor, approximation: GeluApproximation) -> Result<Tensor> {
    match approximation {
        GeluApproximation::Exact => {
            let e = erf(&x.affine(std::f64::consts::FRAC_1_SQRT_2, 0.0)?)?;
            Ok((x * e.affine(0.5, 0.5)?)?)
        }
        GeluApproximation::Fast => {
            let s = sigmoid(&x.affine(1.702, 0.0)?)?;
            Ok((x * s)?)
        }
        GeluApproximation::Tanh => {
            let coeff = (2.0 / std::f64::consts::PI).sqrt();
            let cube = (x.sqr()? * x)?;
            let inner = (x + cube.affine(0.044715, 0.0)?)?.affine(coeff, 0.0)?;
            let gate = inner.tanh()?.affine(0.5, 0.5)?;
            Ok((x * gate)?)
        }
    }
}

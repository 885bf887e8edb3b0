//! Scalar tasks.

use crate::task::{self, Task};
use anyhow::{bail, Result};

pub fn square() -> impl Task<Input = f64, Config = (), Output = f64> {
    task::func(|x: f64| x * x)
}

/// Fails on negative input rather than producing NaN.
pub fn sqrt() -> impl Task<Input = f64, Config = (), Output = f64> {
    task::try_func(|x: f64| {
        if x < 0.0 {
            bail!("sqrt of negative number {}", x);
        }
        Ok(x.sqrt())
    })
}

/// `x` to the power given as config.
pub fn pow() -> impl Task<Input = f64, Config = f64, Output = f64> {
    task::config_func(|x: f64, p: &f64| Ok(x.powf(*p)))
}

pub fn add() -> impl Task<Input = task::Pair<f64>, Config = (), Output = f64> {
    task::reduce_func(|a: f64, b: f64| Ok(a + b))
}

/// Combines two partial p-norms into one: `(a^p + b^p)^(1/p)`.
///
/// Associative for any fixed `p > 0`, so a tree of these gives the p-norm
/// of the leaves.
pub fn norm_p() -> impl Task<Input = task::Pair<f64>, Config = f64, Output = f64> {
    task::reduce_config_func(|a: f64, b: f64, p: &f64| combine_norm(a, b, *p))
}

pub(crate) fn combine_norm(a: f64, b: f64, p: f64) -> Result<f64> {
    if p <= 0.0 {
        bail!("norm exponent must be positive, got {}", p);
    }
    Ok((a.abs().powf(p) + b.abs().powf(p)).powf(1.0 / p))
}

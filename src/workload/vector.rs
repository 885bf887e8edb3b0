//! Tasks over whole vectors.

use crate::task::{self, Task};
use anyhow::bail;

/// p-norm of one vector; the exponent is the config.
pub fn norm() -> impl Task<Input = Vec<f64>, Config = f64, Output = f64> {
    task::config_func(|v: Vec<f64>, p: &f64| {
        if *p <= 0.0 {
            bail!("norm exponent must be positive, got {}", p);
        }
        let sum: f64 = v.iter().map(|x| x.abs().powf(*p)).sum();
        Ok(sum.powf(1.0 / p))
    })
}

//! Sample tasks, and a demo that runs them.
//!
//! # Example
//!
//! ```
//! # use anyhow::Result;
//! use gridmap::{workload, ChunkOptions, Registry};
//! # fn main() -> Result<()> {
//! let mut registry = Registry::new();
//! workload::register_all(&mut registry, ChunkOptions::default())?;
//! assert!(registry.contains(workload::SQUARE));
//! # Ok(())
//! # }
//! ```

use crate::error::Result;
use crate::master::Master;
use crate::partition::ChunkOptions;
use crate::registry::Registry;
use tracing::info;

pub mod arith;
pub mod vector;

pub const SQUARE: &str = "square";
pub const SQUARE_CHUNKED: &str = "square-chunked";
pub const SQRT: &str = "sqrt";
pub const POW: &str = "pow";
pub const ADD: &str = "add";
pub const NORM_P: &str = "norm-p";
pub const VEC_NORM: &str = "vec-norm";

/// Registers every sample task.
///
/// `chunk` only matters on the master, where it decides how
/// `square-chunked` inputs are grouped.
pub fn register_all(registry: &mut Registry, chunk: ChunkOptions) -> Result<()> {
    registry.register(SQUARE, arith::square())?;
    registry.register_chunked(SQUARE_CHUNKED, arith::square(), chunk)?;
    registry.register(SQRT, arith::sqrt())?;
    registry.register(POW, arith::pow())?;
    registry.register(ADD, arith::add())?;
    registry.register(NORM_P, arith::norm_p())?;
    registry.register(VEC_NORM, vector::norm())?;
    Ok(())
}

/// Maps and reduces `1..=n` with the sample tasks and prints the results.
pub async fn run_demo(master: &Master, n: usize) -> anyhow::Result<()> {
    let x: Vec<f64> = (1..=n).map(|i| i as f64).collect();

    let squares: Vec<f64> = master.map(SQUARE, &x, &()).await?;
    println!("square: {:?}", squares);

    let chunked: Vec<f64> = master.map(SQUARE_CHUNKED, &x, &()).await?;
    println!("square (chunked): {:?}", chunked);

    let cubes: Vec<f64> = master.map(POW, &x, &3.0).await?;
    println!("pow 3: {:?}", cubes);

    let sum: f64 = master.reduce(ADD, x.clone(), &()).await?;
    println!("sum: {}", sum);

    let norm: f64 = master.reduce(NORM_P, x.clone(), &2.0).await?;
    let direct: f64 = master.call(VEC_NORM, x.clone(), &2.0).await?;
    println!("2-norm: {} (tree) {} (single call)", norm, direct);

    // One negative input fails only its own index.
    let mixed: Vec<f64> = x.iter().enumerate().map(|(i, v)| if i == 1 { -v } else { *v }).collect();
    let mut roots = Vec::new();
    if let Err(err) = master.map_into::<_, _, f64>(SQRT, &mut roots, &mixed, &()).await {
        info!(error = %err, "sqrt partially failed");
    }
    println!("sqrt: {:?}", roots);

    Ok(())
}

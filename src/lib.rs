//! Distributed map and reduce over a batch scheduler.
//!
//! The same executable runs as master and as worker. The master registers
//! its tasks, then asks a [`JobDriver`] to start one worker process per
//! input item. Every worker connects back over TCP, takes one item,
//! computes, and reports the output. Outputs come back in input order.
//!
//! ```no_run
//! use gridmap::{task, worker, cmd::worker::WorkerArgs, LocalDriver, Master, MasterConfig, Registry};
//! use clap::Parser;
//! use std::sync::Arc;
//!
//! #[derive(Parser)]
//! struct Cli {
//!     #[command(flatten)]
//!     worker: WorkerArgs,
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut registry = Registry::new();
//!     registry.register("square", task::func(|x: f64| x * x))?;
//!
//!     let cli = Cli::parse();
//!     if let Some(result) = worker::exec_if_worker(&registry, &cli.worker).await {
//!         result?;
//!         return Ok(());
//!     }
//!
//!     let master = Master::new(Arc::new(registry), Arc::new(LocalDriver::current_exe()?), MasterConfig::local());
//!     let y: Vec<f64> = master.map("square", &[1.0, 2.0, 3.0], &()).await?;
//!     assert_eq!(y, vec![1.0, 4.0, 9.0]);
//!     Ok(())
//! }
//! ```

pub mod cmd;
pub mod config;
pub mod error;
pub mod master;
pub mod partition;
pub mod reduce;
pub mod registry;
pub mod standalone;
pub mod task;
pub mod wire;
pub mod worker;
pub mod workload;

pub use config::MasterConfig;
pub use error::{Error, ProtocolError, Result};
pub use master::{JobDriver, JobSpec, LocalDriver, Master, PbsDriver, QsubDriver, Redirect};
pub use partition::ChunkOptions;
pub use registry::{Registry, TaskOptions};
pub use standalone::InProcessDriver;
pub use task::{Pair, Task};

//! Everything in one process: workers run as tokio tasks talking to the
//! master over loopback TCP.
//!
//! The wire protocol is exercised exactly as on a cluster, which makes
//! this the driver of choice for tests and for trying tasks out.

use crate::cmd::worker::WorkerArgs;
use crate::config::MasterConfig;
use crate::master::{JobDriver, JobSpec, Master};
use crate::registry::Registry;
use crate::worker::{self, Round};
use anyhow::{anyhow, bail};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::warn;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the sample computations
    Demo {
        /// Number of input elements
        #[arg(short, long, default_value_t = 8)]
        n: usize,
    },
    /// Apply a registered task to the given numbers
    Map {
        /// Name of the task
        #[arg(short, long)]
        task: String,

        #[clap(value_parser, last = true)]
        values: Vec<f64>,
    },
    /// Fold the given numbers with a registered pair task
    Reduce {
        /// Name of the task
        #[arg(short, long)]
        task: String,

        #[clap(value_parser, last = true)]
        values: Vec<f64>,
    },
}

/// Runs each requested worker as a task of the current runtime.
#[derive(Clone)]
pub struct InProcessDriver {
    registry: Arc<Registry>,
}

#[derive(Parser, Debug)]
struct WorkerCli {
    #[command(flatten)]
    worker: WorkerArgs,
}

impl InProcessDriver {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl JobDriver for InProcessDriver {
    async fn submit(&self, job: &JobSpec) -> anyhow::Result<()> {
        let cli = WorkerCli::try_parse_from(std::iter::once(job.name.as_str()).chain(job.args.iter().map(String::as_str)))?;
        let (Some(task), Some(addr)) = (cli.worker.task, cli.worker.addr) else {
            bail!("job {} is missing worker flags", job.name);
        };

        let mut workers = JoinSet::new();
        for _ in 0..job.worker_count {
            let registry = self.registry.clone();
            let task = task.clone();
            let addr = addr.clone();
            workers.spawn(async move { worker::run(&registry, &task, &addr).await });
        }

        let mut failed = 0;
        let mut first = None;
        while let Some(joined) = workers.join_next().await {
            let result = joined
                .map_err(anyhow::Error::from)
                .and_then(|r| r.map_err(anyhow::Error::from));
            match result {
                Ok(Round::Reported { .. }) | Ok(Round::NoWork) => {}
                Err(err) => {
                    warn!(job = %job.name, error = %err, "worker failed");
                    failed += 1;
                    first.get_or_insert(err);
                }
            }
        }
        match first {
            None => Ok(()),
            Some(err) => Err(anyhow!("{} of {} workers failed: {:#}", failed, job.worker_count, err)),
        }
    }
}

/// A master whose workers run inside this process.
pub fn local_master(registry: Registry) -> Master {
    let registry = Arc::new(registry);
    let driver = Arc::new(InProcessDriver::new(registry.clone()));
    Master::new(registry, driver, MasterConfig::local())
}

use clap::Parser;
use gridmap::cmd::master::{Args, DriverKind};
use gridmap::*;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("gridmap=info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();

    let mut registry = Registry::new();
    workload::register_all(&mut registry, args.chunk_options())?;

    // Started by the job driver: do one unit of work and exit.
    if let Some(result) = worker::exec_if_worker(&registry, &args.worker).await {
        result?;
        return Ok(());
    }

    let registry = Arc::new(registry);
    let driver: Arc<dyn JobDriver> = match args.driver {
        DriverKind::Local => Arc::new(LocalDriver::current_exe()?),
        DriverKind::Qsub => Arc::new(
            QsubDriver::current_exe()?
                .with_resources(args.resources.clone())
                .with_output(args.submit_output, args.submit_output),
        ),
        DriverKind::Pbs => Arc::new(
            PbsDriver::current_exe()?
                .with_resources(args.resources.clone())
                .with_output(args.submit_output, args.submit_output),
        ),
        DriverKind::Inproc => Arc::new(InProcessDriver::new(registry.clone())),
    };
    let master = Master::new(registry, driver, args.master_config());

    workload::run_demo(&master, args.n).await
}

use anyhow::Result;
use clap::Parser;
use gridmap::standalone::{local_master, Args, Commands};
use gridmap::*;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("gridmap=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();
    let mut registry = Registry::new();
    workload::register_all(&mut registry, ChunkOptions::new(1, 3))?;
    let master = local_master(registry);

    match args.command {
        Commands::Demo { n } => workload::run_demo(&master, n).await?,
        Commands::Map { task, values } => {
            let mut y: Vec<Option<f64>> = Vec::new();
            let result = master.map_into(&task, &mut y, &values, &()).await;
            for (x, y) in values.iter().zip(&y) {
                match y {
                    Some(y) => println!("{}\t{}", x, y),
                    None => println!("{}\t-", x),
                }
            }
            result?;
        }
        Commands::Reduce { task, values } => {
            let y: f64 = master.reduce(&task, values, &()).await?;
            println!("{}", y);
        }
    }
    Ok(())
}

use clap::Args;

pub const TASK_FLAG: &str = "--gridmap-task";
pub const ADDR_FLAG: &str = "--gridmap-addr";

/// Flags that turn a process into a worker.
///
/// The master passes these to every process it asks the job driver to
/// start; when they are absent the executable runs as the master.
#[derive(Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerArgs {
    /// Task to execute as a worker. Empty to execute as master.
    #[arg(long = "gridmap-task", value_name = "NAME")]
    pub task: Option<String>,
    /// Address of the master on the network
    #[arg(long = "gridmap-addr", value_name = "HOST:PORT")]
    pub addr: Option<String>,
}

impl WorkerArgs {
    pub fn new(task: impl Into<String>, addr: impl Into<String>) -> Self {
        Self {
            task: Some(task.into()),
            addr: Some(addr.into()),
        }
    }

    /// The flags as process arguments.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(task) = &self.task {
            args.push(TASK_FLAG.to_string());
            args.push(task.clone());
        }
        if let Some(addr) = &self.addr {
            args.push(ADDR_FLAG.to_string());
            args.push(addr.clone());
        }
        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser, Debug)]
    struct Cli {
        #[command(flatten)]
        worker: WorkerArgs,
    }

    #[test]
    fn to_args_parses_back() {
        let want = WorkerArgs::new("square", "10.0.0.7:4100");
        let mut argv = vec!["prog".to_string()];
        argv.extend(want.to_args());
        let cli = Cli::try_parse_from(argv).unwrap();
        assert_eq!(cli.worker, want);
    }

    #[test]
    fn absent_flags_mean_master() {
        let cli = Cli::try_parse_from(["prog"]).unwrap();
        assert_eq!(cli.worker, WorkerArgs::default());
        assert!(cli.worker.to_args().is_empty());
    }
}

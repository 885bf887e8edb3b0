use crate::cmd::worker::WorkerArgs;
use crate::config::MasterConfig;
use crate::master::Redirect;
use crate::partition::ChunkOptions;
use clap::{Parser, ValueEnum};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[command(flatten)]
    pub worker: WorkerArgs,
    /// How worker processes are started
    #[clap(long, value_enum, default_value_t = DriverKind::Local)]
    pub driver: DriverKind,
    /// Number of input elements for the demo computations
    #[clap(short, long, default_value_t = 8)]
    pub n: usize,
    /// [OPT] Address for the master to listen on
    #[clap(long, default_value = None)]
    pub bind: Option<String>,
    /// [OPT] Address handed to workers, if different from the bound one
    #[clap(long, default_value = None)]
    pub advertise: Option<String>,
    /// [OPT] Resource request for the scheduler (qsub -l, or raw qsub flags for pbs)
    #[clap(long, default_value = None)]
    pub resources: Option<String>,
    /// Where the submission command's own output goes
    #[clap(long, value_enum, default_value_t = Redirect::Inherit)]
    pub submit_output: Redirect,
    /// Minimum number of chunks for chunked tasks
    #[clap(long, default_value_t = 1)]
    pub min_groups: usize,
    /// Maximum items per chunk for chunked tasks
    #[clap(long, default_value_t = 3)]
    pub max_group_size: usize,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum DriverKind {
    /// Spawn worker processes on this machine
    Local,
    /// Submit an array job with SGE qsub
    Qsub,
    /// Submit an array job with PBS Pro qsub
    Pbs,
    /// Run workers as tasks inside the master process
    Inproc,
}

impl Args {
    /// Environment defaults overridden by the command line.
    pub fn master_config(&self) -> MasterConfig {
        let mut config = MasterConfig::from_env();
        if let Some(bind) = &self.bind {
            config.bind = bind.clone();
        }
        if let Some(addr) = &self.advertise {
            config.advertise = Some(addr.clone());
        }
        config
    }

    pub fn chunk_options(&self) -> ChunkOptions {
        ChunkOptions::new(self.min_groups, self.max_group_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_flags_coexist_with_master_flags() {
        let args = Args::try_parse_from([
            "gridmap",
            "--driver",
            "qsub",
            "--gridmap-task",
            "square",
            "--gridmap-addr",
            "node1:5000",
        ])
        .unwrap();
        assert_eq!(args.driver, DriverKind::Qsub);
        assert_eq!(args.worker.task.as_deref(), Some("square"));
        assert_eq!(args.n, 8);
    }

    #[test]
    fn pbs_driver_with_quiet_submission() {
        let args = Args::try_parse_from([
            "gridmap",
            "--driver",
            "pbs",
            "--resources",
            "-l select=1:ncpus=2",
            "--submit-output",
            "null",
        ])
        .unwrap();
        assert_eq!(args.driver, DriverKind::Pbs);
        assert_eq!(args.submit_output, Redirect::Null);
        assert_eq!(args.resources.as_deref(), Some("-l select=1:ncpus=2"));

        let args = Args::try_parse_from(["gridmap"]).unwrap();
        assert_eq!(args.submit_output, Redirect::Inherit);
    }

    #[test]
    fn bind_flag_overrides_config() {
        let args = Args::try_parse_from(["gridmap", "--bind", "127.0.0.1:7000"]).unwrap();
        assert_eq!(args.master_config().bind, "127.0.0.1:7000");
    }

    #[test]
    fn chunk_sizes_are_clamped() {
        let args = Args::try_parse_from(["gridmap", "--min-groups", "0", "--max-group-size", "5"]).unwrap();
        assert_eq!(args.chunk_options(), ChunkOptions::new(1, 5));
        assert_eq!(args.chunk_options().min_groups, 1);
    }
}

//! Job drivers: whatever starts the worker processes.
//!
//! The master only needs one thing from a driver: start at least
//! `worker_count` copies of the worker with the given arguments and
//! return once they have all exited. Per-item task failures never show
//! up here; they travel over the wire protocol.

use anyhow::{bail, Context};
use async_trait::async_trait;
use clap::ValueEnum;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{info, warn};

/// One batch of worker processes to run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobSpec {
    /// Job name shown by the scheduler.
    pub name: String,
    pub worker_count: usize,
    /// Scheduler resource request, passed through verbatim.
    pub resources: Option<String>,
    /// Keep each worker's stdout instead of discarding it.
    pub keep_stdout: bool,
    /// Keep each worker's stderr instead of discarding it.
    pub keep_stderr: bool,
    /// Arguments for each worker; they carry the task name and the
    /// master's address.
    pub args: Vec<String>,
}

#[async_trait]
pub trait JobDriver: Send + Sync {
    /// Starts the workers and blocks until all of them have exited.
    ///
    /// Returns an error only if the driver could not start or reports an
    /// external failure.
    async fn submit(&self, job: &JobSpec) -> anyhow::Result<()>;
}

/// Where the output of the submission command itself goes.
#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Redirect {
    /// Share this process's stream
    #[default]
    Inherit,
    /// Discard
    Null,
}

impl Redirect {
    fn stdio(self) -> Stdio {
        match self {
            Redirect::Inherit => Stdio::inherit(),
            Redirect::Null => Stdio::null(),
        }
    }
}

/// Runs a scheduler's submission command and waits for it.
async fn run_submission(program: &str, args: &[String], stdout: Redirect, stderr: Redirect) -> anyhow::Result<()> {
    info!("invoke: {} {}", program, args.join(" "));
    let status = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(stdout.stdio())
        .stderr(stderr.stdio())
        .status()
        .await
        .with_context(|| format!("start {}", program))?;
    if !status.success() {
        bail!("{} exited with {}", program, status);
    }
    Ok(())
}

/// Submits a Grid Engine array job and waits for it with `-sync y`.
#[derive(Debug, Clone)]
pub struct QsubDriver {
    program: String,
    executable: PathBuf,
    default_resources: Option<String>,
    stdout: Redirect,
    stderr: Redirect,
}

impl QsubDriver {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            program: "qsub".to_string(),
            executable: executable.into(),
            default_resources: None,
            stdout: Redirect::Inherit,
            stderr: Redirect::Inherit,
        }
    }

    /// Workers run the executable of the current process.
    pub fn current_exe() -> anyhow::Result<Self> {
        let exe = std::env::current_exe().context("locate current executable")?;
        Ok(Self::new(exe))
    }

    /// Use a different submission command (e.g. a wrapper script).
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Resource request for jobs whose task did not set one.
    pub fn with_resources(mut self, resources: Option<String>) -> Self {
        self.default_resources = resources;
        self
    }

    /// Where `qsub`'s own stdout and stderr go.
    pub fn with_output(mut self, stdout: Redirect, stderr: Redirect) -> Self {
        self.stdout = stdout;
        self.stderr = stderr;
        self
    }

    pub fn command_args(&self, job: &JobSpec) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "-N".into(),
            job.name.clone(),
            // Submitting a binary job.
            "-b".into(),
            "y".into(),
            // Wait for jobs to finish.
            "-sync".into(),
            "y".into(),
            "-cwd".into(),
            // Use same environment variables.
            "-V".into(),
            "-t".into(),
            format!("1-{}", job.worker_count),
        ];
        // Without -o/-e the scheduler writes one file per task into the cwd.
        if !job.keep_stdout {
            args.push("-o".into());
            args.push("/dev/null".into());
        }
        if !job.keep_stderr {
            args.push("-e".into());
            args.push("/dev/null".into());
        }
        if let Some(res) = job.resources.as_ref().or(self.default_resources.as_ref()) {
            if !res.is_empty() {
                args.push("-l".into());
                args.push(res.clone());
            }
        }
        args.push(self.executable.to_string_lossy().into_owned());
        args.extend(job.args.iter().cloned());
        args
    }
}

#[async_trait]
impl JobDriver for QsubDriver {
    async fn submit(&self, job: &JobSpec) -> anyhow::Result<()> {
        run_submission(&self.program, &self.command_args(job), self.stdout, self.stderr).await
    }
}

/// Submits a PBS Pro array job and waits for it with `-Wblock=true`.
///
/// Resource strings are extra `qsub` flags here (e.g. `-l select=1:mem=4gb`)
/// and are split on whitespace.
#[derive(Debug, Clone)]
pub struct PbsDriver {
    program: String,
    executable: PathBuf,
    default_resources: Option<String>,
    stdout: Redirect,
    stderr: Redirect,
}

impl PbsDriver {
    /// A relative `executable` is resolved against the working directory,
    /// since PBS starts jobs elsewhere.
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        let executable = executable.into();
        let executable = if executable.is_relative() {
            std::env::current_dir()
                .map(|wd| wd.join(&executable))
                .unwrap_or(executable)
        } else {
            executable
        };
        Self {
            program: "qsub".to_string(),
            executable,
            default_resources: None,
            stdout: Redirect::Inherit,
            stderr: Redirect::Inherit,
        }
    }

    pub fn current_exe() -> anyhow::Result<Self> {
        let exe = std::env::current_exe().context("locate current executable")?;
        Ok(Self::new(exe))
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_resources(mut self, resources: Option<String>) -> Self {
        self.default_resources = resources;
        self
    }

    pub fn with_output(mut self, stdout: Redirect, stderr: Redirect) -> Self {
        self.stdout = stdout;
        self.stderr = stderr;
        self
    }

    pub fn command_args(&self, job: &JobSpec) -> Vec<String> {
        let mut args: Vec<String> = vec!["-N".into(), job.name.clone()];
        // A one-element array is rejected; submit a plain job instead.
        if job.worker_count > 1 {
            args.push("-J".into());
            args.push(format!("1-{}", job.worker_count));
        }
        // Wait for all jobs to finish.
        args.push("-Wblock=true".into());
        // Use same environment variables.
        args.push("-V".into());
        let keep = match (job.keep_stdout, job.keep_stderr) {
            (true, true) => "n",
            (true, false) => "e",
            (false, true) => "o",
            (false, false) => "oe",
        };
        args.push("-k".into());
        args.push(keep.into());
        if let Some(res) = job.resources.as_ref().or(self.default_resources.as_ref()) {
            args.extend(res.split_whitespace().map(str::to_string));
        }
        args.push("--".into());
        args.push(self.executable.to_string_lossy().into_owned());
        args.extend(job.args.iter().cloned());
        args
    }
}

#[async_trait]
impl JobDriver for PbsDriver {
    async fn submit(&self, job: &JobSpec) -> anyhow::Result<()> {
        run_submission(&self.program, &self.command_args(job), self.stdout, self.stderr).await
    }
}

/// Spawns the workers as child processes on this machine.
#[derive(Debug, Clone)]
pub struct LocalDriver {
    executable: PathBuf,
}

impl LocalDriver {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
        }
    }

    pub fn current_exe() -> anyhow::Result<Self> {
        let exe = std::env::current_exe().context("locate current executable")?;
        Ok(Self::new(exe))
    }

    fn command(&self, job: &JobSpec) -> Command {
        let keep = |kept: bool| if kept { Stdio::inherit() } else { Stdio::null() };
        let mut cmd = Command::new(&self.executable);
        cmd.args(&job.args)
            .stdin(Stdio::null())
            .stdout(keep(job.keep_stdout))
            .stderr(keep(job.keep_stderr))
            // Workers already started must not outlive a failed submission.
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl JobDriver for LocalDriver {
    async fn submit(&self, job: &JobSpec) -> anyhow::Result<()> {
        info!(
            job = %job.name,
            workers = job.worker_count,
            "spawn {}",
            self.executable.display()
        );
        let mut children = Vec::with_capacity(job.worker_count);
        for _ in 0..job.worker_count {
            let child = self
                .command(job)
                .spawn()
                .with_context(|| format!("spawn {}", self.executable.display()))?;
            children.push(child);
        }

        let mut failed = 0;
        for mut child in children {
            let status = child.wait().await?;
            if !status.success() {
                warn!(job = %job.name, %status, "worker exited abnormally");
                failed += 1;
            }
        }
        if failed > 0 {
            bail!("{} of {} workers exited abnormally", failed, job.worker_count);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(resources: Option<&str>) -> JobSpec {
        JobSpec {
            name: "square-1a2b3c4d".to_string(),
            worker_count: 7,
            resources: resources.map(str::to_string),
            args: vec!["--gridmap-task".into(), "square".into()],
            ..JobSpec::default()
        }
    }

    #[test]
    fn qsub_array_job_arguments() {
        let driver = QsubDriver::new("/opt/bin/demo");
        assert_eq!(
            driver.command_args(&job(None)),
            vec![
                "-N", "square-1a2b3c4d", "-b", "y", "-sync", "y", "-cwd", "-V", "-t", "1-7",
                "-o", "/dev/null", "-e", "/dev/null", "/opt/bin/demo", "--gridmap-task", "square",
            ]
        );
    }

    #[test]
    fn qsub_keeps_requested_streams() {
        let driver = QsubDriver::new("demo");
        let args = driver.command_args(&JobSpec {
            keep_stdout: true,
            ..job(None)
        });
        assert!(!args.contains(&"-o".to_string()));
        let e = args.iter().position(|a| a == "-e").unwrap();
        assert_eq!(args[e + 1], "/dev/null");

        let args = driver.command_args(&JobSpec {
            keep_stdout: true,
            keep_stderr: true,
            ..job(None)
        });
        assert!(!args.iter().any(|a| a == "-o" || a == "-e"));
    }

    #[test]
    fn task_resources_win_over_default() {
        let driver = QsubDriver::new("demo").with_resources(Some("h_vmem=1G".into()));
        let args = driver.command_args(&job(Some("h_vmem=8G")));
        let l = args.iter().position(|a| a == "-l").unwrap();
        assert_eq!(args[l + 1], "h_vmem=8G");

        let args = driver.command_args(&job(None));
        let l = args.iter().position(|a| a == "-l").unwrap();
        assert_eq!(args[l + 1], "h_vmem=1G");
    }

    #[test]
    fn pbs_array_job_arguments() {
        let driver = PbsDriver::new("/opt/bin/demo");
        assert_eq!(
            driver.command_args(&job(Some("-l select=1:mem=4gb"))),
            vec![
                "-N", "square-1a2b3c4d", "-J", "1-7", "-Wblock=true", "-V", "-k", "oe", "-l",
                "select=1:mem=4gb", "--", "/opt/bin/demo", "--gridmap-task", "square",
            ]
        );
    }

    #[test]
    fn pbs_single_job_has_no_array_range() {
        let driver = PbsDriver::new("/opt/bin/demo");
        let args = driver.command_args(&JobSpec {
            worker_count: 1,
            ..job(None)
        });
        assert!(!args.contains(&"-J".to_string()), "{:?}", args);
        assert_eq!(&args[..3], &["-N", "square-1a2b3c4d", "-Wblock=true"]);
    }

    #[test]
    fn pbs_keep_flag_follows_streams() {
        let driver = PbsDriver::new("/opt/bin/demo");
        let keep = |stdout, stderr| {
            let args = driver.command_args(&JobSpec {
                keep_stdout: stdout,
                keep_stderr: stderr,
                ..job(None)
            });
            let k = args.iter().position(|a| a == "-k").unwrap();
            args[k + 1].clone()
        };
        assert_eq!(keep(true, true), "n");
        assert_eq!(keep(true, false), "e");
        assert_eq!(keep(false, true), "o");
        assert_eq!(keep(false, false), "oe");
    }

    #[test]
    fn pbs_executable_is_absolute() {
        let driver = PbsDriver::new("bin/demo");
        let args = driver.command_args(&job(None));
        let sep = args.iter().position(|a| a == "--").unwrap();
        let exe = PathBuf::from(&args[sep + 1]);
        assert!(exe.is_absolute(), "{}", exe.display());
        assert!(exe.ends_with("bin/demo"));
    }

    #[tokio::test]
    async fn missing_program_is_a_driver_error() {
        let driver = QsubDriver::new("demo")
            .with_program("/nonexistent/qsub")
            .with_output(Redirect::Null, Redirect::Null);
        assert!(driver.submit(&job(None)).await.is_err());

        let driver = PbsDriver::new("/opt/bin/demo").with_program("/nonexistent/qsub");
        assert!(driver.submit(&job(None)).await.is_err());
    }

    #[test]
    fn local_workers_die_with_the_driver() {
        let cmd = LocalDriver::new("demo").command(&job(None));
        assert!(cmd.get_kill_on_drop());
    }

    #[tokio::test]
    async fn local_spawn_failure_is_reported() {
        let driver = LocalDriver::new("/nonexistent/worker");
        let err = driver.submit(&job(None)).await.unwrap_err();
        assert!(err.to_string().starts_with("spawn /nonexistent/worker"), "{}", err);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn local_driver_reports_abnormal_exit() {
        let ok = LocalDriver::new("true");
        ok.submit(&JobSpec { args: vec![], ..job(None) }).await.unwrap();

        let bad = LocalDriver::new("false");
        let err = bad.submit(&JobSpec { args: vec![], ..job(None) }).await.unwrap_err();
        assert_eq!(err.to_string(), "7 of 7 workers exited abnormally");
    }
}

//! One map call on the network: listen, start the workers, hand out
//! indices, collect outputs until every index is accounted for.
//!
//! Connection handlers never touch the output slice. They decode what a
//! worker reports and pass it over a channel to the collecting loop,
//! which is the only writer.

use crate::cmd::worker::WorkerArgs;
use crate::config::MasterConfig;
use crate::error::{Error, ProtocolError, Result};
use crate::master::driver::{JobDriver, JobSpec};
use crate::registry::TaskOptions;
use crate::wire::{self, Reply, Request};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

/// Everything needed to run one batch of items.
pub(crate) struct Dispatch<'a> {
    pub id: Uuid,
    pub task: &'a str,
    pub inputs: Vec<Value>,
    pub config: Value,
    pub resources: Option<String>,
    pub keep_stdout: bool,
    pub keep_stderr: bool,
}

impl<'a> Dispatch<'a> {
    /// A new job with a fresh id.
    pub fn new(task: &'a str, inputs: Vec<Value>, config: Value, options: &TaskOptions) -> Self {
        Self {
            id: Uuid::new_v4(),
            task,
            inputs,
            config,
            resources: options.resources.clone(),
            keep_stdout: options.keep_stdout,
            keep_stderr: options.keep_stderr,
        }
    }

    /// Name handed to the scheduler, e.g. `square-9f86d081`.
    pub fn job_name(&self) -> String {
        let id = self.id.simple().to_string();
        format!("{}-{}", self.task, &id[..8])
    }
}

/// Failed indices of a finished dispatch.
#[derive(Debug, Default)]
pub(crate) struct Failures {
    pub by_index: BTreeMap<usize, String>,
    /// In arrival order.
    pub first: Option<String>,
}

impl Failures {
    pub fn record(&mut self, index: usize, message: String) {
        if self.first.is_none() {
            self.first = Some(message.clone());
        }
        self.by_index.insert(index, message);
    }

    pub fn into_error(self, total: usize) -> Option<Error> {
        if self.by_index.is_empty() {
            return None;
        }
        Some(Error::PartialFailure {
            failed: self.by_index.len(),
            total,
            first: self.first.unwrap_or_default(),
            failures: self.by_index,
        })
    }
}

struct Completion<O> {
    index: usize,
    result: std::result::Result<O, String>,
}

/// Read-only state shared by the connection handlers.
struct Shared {
    inputs: Vec<Value>,
    config: Value,
    next: AtomicUsize,
}

impl Shared {
    /// Claims the next index that has never been handed out.
    fn claim(&self) -> Option<usize> {
        let index = self.next.fetch_add(1, Ordering::Relaxed);
        (index < self.inputs.len()).then_some(index)
    }
}

struct Progress {
    accounted: Vec<bool>,
    remaining: usize,
    failures: Failures,
}

impl Progress {
    fn new(n: usize) -> Self {
        Self {
            accounted: vec![false; n],
            remaining: n,
            failures: Failures::default(),
        }
    }

    fn record<O>(&mut self, c: Completion<O>, output: &mut [Option<O>]) {
        if self.accounted[c.index] {
            warn!(error = %ProtocolError::DuplicateReport(c.index), "ignoring report");
            return;
        }
        self.accounted[c.index] = true;
        self.remaining -= 1;
        match c.result {
            Ok(y) => output[c.index] = Some(y),
            Err(msg) => {
                debug!(index = c.index, error = %msg, "task failed");
                self.failures.record(c.index, msg);
            }
        }
        debug!(index = c.index, remaining = self.remaining, "output received");
    }
}

/// Tasks that must not outlive the call.
struct AbortOnDrop(Vec<AbortHandle>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}

/// Binds the listening socket, retrying while the address is unavailable.
pub(crate) async fn listen(config: &MasterConfig) -> Result<TcpListener> {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match TcpListener::bind(&config.bind).await {
            Ok(listener) => return Ok(listener),
            Err(err) => {
                if config.bind_attempts.is_some_and(|max| attempt >= max) {
                    return Err(err.into());
                }
                warn!(bind = %config.bind, attempt, error = %err, "listen failed; try again");
                tokio::time::sleep(config.listen_backoff).await;
            }
        }
    }
}

/// Address workers should dial.
pub(crate) fn advertise_addr(config: &MasterConfig, local: SocketAddr) -> Result<String> {
    if let Some(addr) = &config.advertise {
        return Ok(addr.clone());
    }
    if local.ip().is_unspecified() {
        let host = hostname::get()?;
        return Ok(format!("{}:{}", host.to_string_lossy(), local.port()));
    }
    Ok(local.to_string())
}

/// Runs `job` to completion, writing each successful output into its
/// slot of `output`.
///
/// Returns the per-index failures once every index has been accounted
/// for, or [`Error::Driver`] if the driver fails first. In the latter
/// case slots already filled stay filled.
pub(crate) async fn run<O>(
    config: &MasterConfig,
    driver: Arc<dyn JobDriver>,
    job: Dispatch<'_>,
    output: &mut [Option<O>],
) -> Result<Failures>
where
    O: DeserializeOwned + Send + 'static,
{
    let n = job.inputs.len();
    debug_assert_eq!(output.len(), n);
    let span = tracing::info_span!("map", task = job.task, job = %job.job_name(), n);

    async move {
        let listener = listen(config).await?;
        let addr = advertise_addr(config, listener.local_addr()?)?;
        info!(%addr, "listening");

        let spec = JobSpec {
            name: job.job_name(),
            worker_count: n,
            resources: job.resources.clone(),
            keep_stdout: job.keep_stdout,
            keep_stderr: job.keep_stderr,
            args: WorkerArgs::new(job.task, addr).to_args(),
        };
        let shared = Arc::new(Shared {
            inputs: job.inputs,
            config: job.config,
            next: AtomicUsize::new(0),
        });

        let (done_tx, mut done_rx) = mpsc::channel::<Completion<O>>(n);
        let server = tokio::spawn(serve(listener, shared, done_tx.clone(), config.listen_backoff).in_current_span());
        let _guard = AbortOnDrop(vec![server.abort_handle()]);

        let mut driver_task = tokio::spawn(async move { driver.submit(&spec).await }.in_current_span());
        let mut driver_running = true;

        let mut progress = Progress::new(n);
        while progress.remaining > 0 {
            tokio::select! {
                biased;
                Some(c) = done_rx.recv() => progress.record(c, output),
                joined = &mut driver_task, if driver_running => {
                    driver_running = false;
                    let result = joined.map_err(anyhow::Error::from).and_then(|r| r);
                    match result {
                        Ok(()) => warn!(
                            outstanding = progress.remaining,
                            "workers exited with indices outstanding; waiting"
                        ),
                        Err(err) => {
                            while let Ok(c) = done_rx.try_recv() {
                                progress.record(c, output);
                            }
                            if progress.remaining > 0 {
                                error!(outstanding = progress.remaining, error = %format!("{:#}", err), "job driver failed");
                                return Err(Error::Driver(format!("{:#}", err)));
                            }
                            warn!(error = %format!("{:#}", err), "job driver failed after all outputs arrived");
                        }
                    }
                }
            }
        }
        // Keeps the completion channel open for the whole loop.
        drop(done_tx);

        info!(failed = progress.failures.by_index.len(), "all indices accounted for");
        Ok::<_, Error>(progress.failures)
    }
    .instrument(span)
    .await
}

async fn serve<O>(listener: TcpListener, shared: Arc<Shared>, done: mpsc::Sender<Completion<O>>, backoff: Duration)
where
    O: DeserializeOwned + Send + 'static,
{
    loop {
        match listener.accept().await {
            Ok((conn, peer)) => {
                let shared = shared.clone();
                let done = done.clone();
                tokio::spawn(
                    async move {
                        if let Err(err) = handle(conn, &shared, &done).await {
                            warn!(%peer, error = %err, "dropping connection");
                        }
                    }
                    .in_current_span(),
                );
            }
            Err(err) => {
                warn!(error = %err, "accept failed");
                tokio::time::sleep(backoff).await;
            }
        }
    }
}

async fn handle<O>(mut conn: TcpStream, shared: &Shared, done: &mpsc::Sender<Completion<O>>) -> std::result::Result<(), ProtocolError>
where
    O: DeserializeOwned,
{
    match wire::read_request(&mut conn).await? {
        Request::ReceiveInput => {
            let reply = match shared.claim() {
                Some(index) => {
                    debug!(index, "dispatch input");
                    Reply::Work {
                        index,
                        input: shared.inputs[index].clone(),
                        config: shared.config.clone(),
                    }
                }
                None => Reply::Exhausted,
            };
            wire::write_frame(&mut conn, &reply).await
        }
        Request::SendOutput(report) => {
            let len = shared.inputs.len();
            if report.index >= len {
                return Err(ProtocolError::IndexOutOfRange { index: report.index, len });
            }
            let result = match report.error {
                Some(msg) => Err(msg),
                None => serde_json::from_value::<O>(report.output.unwrap_or(Value::Null))
                    .map_err(|err| format!("decode output: {}", err)),
            };
            // Fails only once the call has returned already.
            let _ = done
                .send(Completion {
                    index: report.index,
                    result,
                })
                .await;
            wire::write_frame(&mut conn, &Reply::Ack).await
        }
    }
}

//! The worker side: one process, one unit of work.
//!
//! A worker connects to the master, asks for an input, computes, then
//! opens a fresh connection to report the output or the error. A failing
//! task is reported over the wire and the worker still exits cleanly; the
//! process exit status only reflects problems reaching the master.

use crate::cmd::worker::WorkerArgs;
use crate::error::{Error, ProtocolError, Result};
use crate::registry::Registry;
use crate::wire::{self, OutputReport, Reply, Request};
use serde_json::Value;
use std::any::Any;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// What a worker did in its single round trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Round {
    /// Computed `index` and reported it; `error` holds the task failure, if any.
    Reported { index: usize, error: Option<String> },
    /// The master had nothing left to hand out.
    NoWork,
}

/// An input handed out by the master.
#[derive(Debug, Clone)]
pub struct Work {
    pub index: usize,
    pub input: Value,
    pub config: Value,
}

/// Runs the worker if `args` name a task, returning `None` otherwise.
///
/// Call this at startup, after the registry is populated, so a single
/// executable can serve as both master and worker.
pub async fn exec_if_worker(registry: &Registry, args: &WorkerArgs) -> Option<anyhow::Result<Round>> {
    let task = args.task.as_deref()?;
    let result = match args.addr.as_deref() {
        Some(addr) => run(registry, task, addr).await.map_err(anyhow::Error::from),
        None => Err(anyhow::anyhow!("worker for `{}` started without a master address", task)),
    };
    Some(result)
}

/// Requests one input from the master at `addr`, computes the task
/// registered as `task_name`, and reports the result.
pub async fn run(registry: &Registry, task_name: &str, addr: &str) -> Result<Round> {
    let entry = registry.get(task_name)?;

    info!(task = task_name, %addr, "receive input");
    let Some(work) = receive_input(addr).await? else {
        info!(task = task_name, "no work left");
        return Ok(Round::NoWork);
    };
    let index = work.index;

    debug!(task = task_name, index, "call function");
    let task = entry.task().clone();
    let outcome = tokio::task::spawn_blocking(move || task.call(work.input, work.config)).await;
    let report = match outcome {
        Ok(Ok(output)) => OutputReport::success(index, output),
        // The input or config did not fit the task's types: the master and
        // this worker disagree on the task, so tag it apart from task errors.
        Ok(Err(err)) if err.is_protocol() => {
            warn!(task = task_name, index, error = %err, "protocol failure");
            OutputReport::failure(index, format!("protocol error: {}", err))
        }
        Ok(Err(err)) => {
            warn!(task = task_name, index, error = %err, "task failed");
            OutputReport::failure(index, err.to_string())
        }
        Err(join_err) => {
            let msg = match join_err.try_into_panic() {
                Ok(payload) => format!("task panicked: {}", panic_message(payload.as_ref())),
                Err(err) => format!("task did not complete: {}", err),
            };
            warn!(task = task_name, index, error = %msg, "task failed");
            OutputReport::failure(index, msg)
        }
    };
    let error = report.error.clone();

    info!(task = task_name, index, "send output");
    send_output(addr, report).await?;
    Ok(Round::Reported { index, error })
}

/// Asks for the next unclaimed index. `None` means every index has been
/// handed out already.
pub async fn receive_input(addr: &str) -> Result<Option<Work>> {
    let mut conn = TcpStream::connect(addr).await?;
    wire::write_request(&mut conn, Request::ReceiveInput).await?;
    match wire::read_frame::<_, Reply>(&mut conn).await? {
        Reply::Work { index, input, config } => Ok(Some(Work { index, input, config })),
        Reply::Exhausted => Ok(None),
        other => Err(Error::Protocol(ProtocolError::UnexpectedReply(format!("{:?}", other)))),
    }
}

/// Reports the outcome for one index and waits for the acknowledgement.
pub async fn send_output(addr: &str, report: OutputReport) -> Result<()> {
    let mut conn = TcpStream::connect(addr).await?;
    wire::write_request(&mut conn, Request::SendOutput(report)).await?;
    match wire::read_frame::<_, Reply>(&mut conn).await? {
        Reply::Ack => Ok(()),
        other => Err(Error::Protocol(ProtocolError::UnexpectedReply(format!("{:?}", other)))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task;
    use crate::wire::{read_request, write_frame};
    use serde_json::json;
    use tokio::net::TcpListener;

    /// Serves one recv and one send, returning the received report.
    async fn fake_master(listener: TcpListener, input: Value) -> OutputReport {
        let (mut conn, _) = listener.accept().await.unwrap();
        assert_eq!(read_request(&mut conn).await.unwrap(), Request::ReceiveInput);
        write_frame(
            &mut conn,
            &Reply::Work {
                index: 3,
                input,
                config: Value::Null,
            },
        )
        .await
        .unwrap();

        let (mut conn, _) = listener.accept().await.unwrap();
        let Request::SendOutput(report) = read_request(&mut conn).await.unwrap() else {
            panic!("expected send");
        };
        write_frame(&mut conn, &Reply::Ack).await.unwrap();
        report
    }

    fn registry() -> Registry {
        let mut registry = Registry::new();
        registry.register("square", task::func(|x: i64| x * x)).unwrap();
        registry
            .register(
                "non-negative",
                task::try_func(|x: i64| {
                    anyhow::ensure!(x >= 0, "negative input {}", x);
                    Ok(x)
                }),
            )
            .unwrap();
        registry
            .register(
                "explode",
                task::func(|x: i64| -> i64 {
                    if x > 0 {
                        panic!("too big: {}", x);
                    }
                    x
                }),
            )
            .unwrap();
        registry
    }

    #[tokio::test]
    async fn computes_and_reports() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let master = tokio::spawn(fake_master(listener, json!(12)));

        let round = run(&registry(), "square", &addr).await.unwrap();
        assert_eq!(round, Round::Reported { index: 3, error: None });
        assert_eq!(master.await.unwrap(), OutputReport::success(3, json!(144)));
    }

    #[tokio::test]
    async fn ill_typed_input_is_reported_not_fatal() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let master = tokio::spawn(fake_master(listener, json!("twelve")));

        let round = run(&registry(), "square", &addr).await.unwrap();
        let report = master.await.unwrap();
        assert!(report.output.is_none());
        let err = report.error.unwrap();
        assert!(err.starts_with("protocol error: decode input"), "{}", err);
        assert!(matches!(round, Round::Reported { index: 3, error: Some(_) }));
    }

    #[tokio::test]
    async fn task_error_is_not_tagged_as_protocol() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let master = tokio::spawn(fake_master(listener, json!(-2)));

        run(&registry(), "non-negative", &addr).await.unwrap();
        let report = master.await.unwrap();
        assert_eq!(report.error.as_deref(), Some("negative input -2"));
    }

    #[tokio::test]
    async fn panic_becomes_error_string() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let master = tokio::spawn(fake_master(listener, json!(5)));

        run(&registry(), "explode", &addr).await.unwrap();
        let report = master.await.unwrap();
        assert_eq!(report.error.as_deref(), Some("task panicked: too big: 5"));
    }

    #[tokio::test]
    async fn exhausted_master_means_no_work() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let master = tokio::spawn(async move {
            let (mut conn, _) = listener.accept().await.unwrap();
            read_request(&mut conn).await.unwrap();
            write_frame(&mut conn, &Reply::Exhausted).await.unwrap();
        });

        let round = run(&registry(), "square", &addr).await.unwrap();
        assert_eq!(round, Round::NoWork);
        master.await.unwrap();
    }

    #[tokio::test]
    async fn unknown_task_fails_before_connecting() {
        let err = run(&registry(), "cube", "127.0.0.1:1").await.unwrap_err();
        assert!(matches!(err, Error::TaskNotFound(_)));
    }

    #[tokio::test]
    async fn exec_if_worker_skips_master() {
        assert!(exec_if_worker(&registry(), &WorkerArgs::default()).await.is_none());
        let args = WorkerArgs {
            task: Some("square".to_string()),
            addr: None,
        };
        assert!(exec_if_worker(&registry(), &args).await.unwrap().is_err());
    }
}

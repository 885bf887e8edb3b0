//! Errors returned by the map/reduce entry points and the wire protocol.

use std::collections::BTreeMap;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// A call-level failure.
///
/// Per-index task failures never abort a map. They are collected and
/// surfaced together as [`Error::PartialFailure`] once every index has
/// been accounted for.
#[derive(Error, Debug)]
pub enum Error {
    #[error("task not found: `{0}`")]
    TaskNotFound(String),

    #[error("name already registered: `{0}`")]
    DuplicateTask(String),

    #[error("invalid task name `{0}`: use ASCII letters, digits, '-', '_' or '.'")]
    InvalidTaskName(String),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("task failed: {message}")]
    Task { message: String },

    /// The job driver could not start the workers or exited abnormally
    /// before every index was accounted for. Indices already reported
    /// keep their results.
    #[error("job driver failed: {0}")]
    Driver(String),

    #[error("tasks failed {failed}/{total}: {first}")]
    PartialFailure {
        failed: usize,
        total: usize,
        /// First failure observed, in arrival order.
        first: String,
        /// Original index to failure message.
        failures: BTreeMap<usize, String>,
    },

    #[error("reduce level {level}: {source}")]
    Reduce {
        level: usize,
        #[source]
        source: Box<Error>,
    },

    #[error("reduce of an empty input")]
    EmptyInput,

    #[error("encode value: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Failed indices and their messages, if this is a partial failure
    /// (possibly nested inside a reduce level).
    pub fn failures(&self) -> Option<&BTreeMap<usize, String>> {
        match self {
            Error::PartialFailure { failures, .. } => Some(failures),
            Error::Reduce { source, .. } => source.failures(),
            _ => None,
        }
    }
}

/// Something went wrong below the task level: a malformed frame, an
/// unknown request kind, a value that does not decode into the expected
/// type. Indicates a bug or a version mismatch, never a task problem.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("connection: {0}")]
    Io(#[from] std::io::Error),

    #[error("decode: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("unknown request type: `{0}`")]
    UnknownRequest(String),

    #[error("frame of {0} bytes exceeds the limit")]
    FrameTooLarge(usize),

    #[error("index {index} out of range for {len} items")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("index {0} was already reported")]
    DuplicateReport(usize),

    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),
}

//! The unit-of-work abstraction.
//!
//! A [`Task`] names its input, config and output types and computes one
//! output from one input. The associated types double as decode targets:
//! every value that crosses the wire is decoded into a fresh, independently
//! owned value of the known type, so no placeholder constructors are needed.
//!
//! Most tasks are built from plain functions:
//! ```
//! use gridmap::task::{self, Task};
//!
//! let square = task::func(|x: f64| x * x);
//! assert_eq!(square.compute(3.0, &()).unwrap(), 9.0);
//!
//! let add = task::reduce_func(|a: i64, b: i64| Ok(a + b));
//! assert_eq!(add.compute(task::Pair::new(2, 5), &()).unwrap(), 7);
//! ```

use anyhow::Context;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::marker::PhantomData;
use thiserror::Error;

/// Anything that can be sent to or received from a worker.
pub trait Payload: Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> Payload for T where T: Serialize + DeserializeOwned + Send + Sync + 'static {}

/// A computation that can run on a remote worker.
///
/// `compute` must be pure with respect to the framework: the same
/// `(input, config)` always gives the same result, and nothing from either
/// argument is retained after the call returns.
pub trait Task: Send + Sync + 'static {
    type Input: Payload;
    /// Shared by every item of one map call. Use `()` when there is none.
    type Config: Payload;
    type Output: Payload;

    fn compute(&self, input: Self::Input, config: &Self::Config) -> anyhow::Result<Self::Output>;
}

/// Task defined by a function of an input and a config.
pub struct FnTask<F, I, C, O> {
    f: F,
    _types: PhantomData<fn(I, &C) -> O>,
}

impl<F, I, C, O> FnTask<F, I, C, O>
where
    F: Fn(I, &C) -> anyhow::Result<O> + Send + Sync + 'static,
{
    pub fn new(f: F) -> Self {
        Self {
            f,
            _types: PhantomData,
        }
    }
}

impl<F, I, C, O> Task for FnTask<F, I, C, O>
where
    F: Fn(I, &C) -> anyhow::Result<O> + Send + Sync + 'static,
    I: Payload,
    C: Payload,
    O: Payload,
{
    type Input = I;
    type Config = C;
    type Output = O;

    fn compute(&self, input: I, config: &C) -> anyhow::Result<O> {
        (self.f)(input, config)
    }
}

/// Wraps an infallible single-argument function.
pub fn func<I, O>(f: impl Fn(I) -> O + Send + Sync + 'static) -> impl Task<Input = I, Config = (), Output = O>
where
    I: Payload,
    O: Payload,
{
    FnTask::new(move |x: I, _: &()| -> anyhow::Result<O> { Ok(f(x)) })
}

/// Wraps a single-argument function that may fail.
pub fn try_func<I, O>(
    f: impl Fn(I) -> anyhow::Result<O> + Send + Sync + 'static,
) -> impl Task<Input = I, Config = (), Output = O>
where
    I: Payload,
    O: Payload,
{
    FnTask::new(move |x: I, _: &()| f(x))
}

/// Wraps a function whose second argument is held constant for a whole map.
pub fn config_func<I, C, O>(
    f: impl Fn(I, &C) -> anyhow::Result<O> + Send + Sync + 'static,
) -> impl Task<Input = I, Config = C, Output = O>
where
    I: Payload,
    C: Payload,
    O: Payload,
{
    FnTask::new(f)
}

/// An ordered pair of same-typed values; the input of every reduce task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pair<T> {
    pub a: T,
    pub b: T,
}

impl<T> Pair<T> {
    pub fn new(a: T, b: T) -> Self {
        Self { a, b }
    }
}

/// Wraps a binary function for use with [`crate::Master::reduce`].
///
/// The function should be associative, since the reduction is evaluated
/// as a tree of pairs.
pub fn reduce_func<T>(
    f: impl Fn(T, T) -> anyhow::Result<T> + Send + Sync + 'static,
) -> impl Task<Input = Pair<T>, Config = (), Output = T>
where
    T: Payload,
{
    FnTask::new(move |p: Pair<T>, _: &()| f(p.a, p.b))
}

/// Like [`reduce_func`] with a constant third argument.
pub fn reduce_config_func<T, C>(
    f: impl Fn(T, T, &C) -> anyhow::Result<T> + Send + Sync + 'static,
) -> impl Task<Input = Pair<T>, Config = C, Output = T>
where
    T: Payload,
    C: Payload,
{
    FnTask::new(move |p: Pair<T>, c: &C| f(p.a, p.b, c))
}

/// Performs another task on every element of a sequence, in order.
///
/// Stops at the first element that fails; the error names its position
/// within the sequence.
pub struct ChunkTask<T> {
    inner: T,
}

impl<T: Task> ChunkTask<T> {
    pub fn new(inner: T) -> Self {
        Self { inner }
    }
}

impl<T: Task> Task for ChunkTask<T> {
    type Input = Vec<T::Input>;
    type Config = T::Config;
    type Output = Vec<T::Output>;

    fn compute(&self, input: Self::Input, config: &Self::Config) -> anyhow::Result<Self::Output> {
        let mut out = Vec::with_capacity(input.len());
        for (j, x) in input.into_iter().enumerate() {
            let y = self
                .inner
                .compute(x, config)
                .with_context(|| format!("element {}", j))?;
            out.push(y);
        }
        Ok(out)
    }
}

/// Why a type-erased call did not produce an output.
#[derive(Error, Debug)]
pub enum CallError {
    #[error("decode input: {0}")]
    DecodeInput(#[source] serde_json::Error),
    #[error("decode config: {0}")]
    DecodeConfig(#[source] serde_json::Error),
    #[error("{0:#}")]
    Task(anyhow::Error),
    #[error("encode output: {0}")]
    EncodeOutput(#[source] serde_json::Error),
}

impl CallError {
    /// True when the task never ran or its result could not be encoded,
    /// i.e. the failure lies in the exchange rather than the computation.
    pub fn is_protocol(&self) -> bool {
        !matches!(self, CallError::Task(_))
    }
}

/// A [`Task`] with its types erased to JSON values.
///
/// This is what the registry stores and what a worker runs; only the
/// coordinator, through the caller's generic parameters, knows the
/// concrete types.
pub trait DynTask: Send + Sync {
    fn call(&self, input: Value, config: Value) -> Result<Value, CallError>;
}

impl<T: Task> DynTask for T {
    fn call(&self, input: Value, config: Value) -> Result<Value, CallError> {
        let x: T::Input = serde_json::from_value(input).map_err(CallError::DecodeInput)?;
        let p: T::Config = serde_json::from_value(config).map_err(CallError::DecodeConfig)?;
        let y = self.compute(x, &p).map_err(CallError::Task)?;
        serde_json::to_value(y).map_err(CallError::EncodeOutput)
    }
}

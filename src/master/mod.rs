//! The master side of a computation.
//!
//! A [`Master`] owns the task registry, a [`JobDriver`] and its network
//! settings. Each call to [`Master::map`] (and each reduce level) is one
//! self-contained job: a fresh listener, a fresh batch of workers.

pub mod coordinator;
pub mod driver;


use crate::config::MasterConfig;
use crate::error::{Error, Result};
use crate::partition::{self, ChunkOptions};
use crate::registry::{Registry, TaskOptions};
use coordinator::{Dispatch, Failures};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::sync::Arc;

pub use driver::{JobDriver, JobSpec, LocalDriver, PbsDriver, QsubDriver, Redirect};

#[derive(Clone)]
pub struct Master {
    registry: Arc<Registry>,
    driver: Arc<dyn JobDriver>,
    config: MasterConfig,
}

impl Master {
    pub fn new(registry: Arc<Registry>, driver: Arc<dyn JobDriver>, config: MasterConfig) -> Self {
        Self {
            registry,
            driver,
            config,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn config(&self) -> &MasterConfig {
        &self.config
    }

    /// Applies the task registered as `name` to every element of `input`.
    ///
    /// Output `i` corresponds to input `i`. Any task failure makes the whole
    /// call fail with [`Error::PartialFailure`]; use [`Master::map_into`] to
    /// keep the outputs that did succeed.
    pub async fn map<I, C, O>(&self, name: &str, input: &[I], config: &C) -> Result<Vec<O>>
    where
        I: Serialize,
        C: Serialize + ?Sized,
        O: DeserializeOwned + Send + 'static,
    {
        let mut output = Vec::new();
        self.map_into(name, &mut output, input, config).await?;
        Ok(output.into_iter().flatten().collect())
    }

    /// Like [`Master::map`], but fills `output` slot by slot.
    ///
    /// `output` is resized to `input.len()`. On [`Error::PartialFailure`] or
    /// [`Error::Driver`], every slot whose index succeeded holds its value
    /// and the others are `None`.
    pub async fn map_into<I, C, O>(&self, name: &str, output: &mut Vec<Option<O>>, input: &[I], config: &C) -> Result<()>
    where
        I: Serialize,
        C: Serialize + ?Sized,
        O: DeserializeOwned + Send + 'static,
    {
        let entry = self.registry.get(name)?;
        let n = input.len();
        output.clear();
        output.resize_with(n, || None);
        if n == 0 {
            return Ok(());
        }

        let inputs = input
            .iter()
            .map(serde_json::to_value)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::Encode)?;
        let config = serde_json::to_value(config).map_err(Error::Encode)?;
        let options = entry.options();

        let failures = match entry.chunk() {
            None => {
                let job = Dispatch::new(name, inputs, config, options);
                coordinator::run(&self.config, self.driver.clone(), job, output).await?
            }
            Some(chunk) => self.map_chunked(name, chunk, output, inputs, config, options).await?,
        };

        failures.into_error(n).map_or(Ok(()), Err)
    }

    /// Sends the items as strided groups and scatters the group outputs
    /// back to their original positions.
    async fn map_chunked<O>(
        &self,
        name: &str,
        chunk: ChunkOptions,
        output: &mut [Option<O>],
        inputs: Vec<Value>,
        config: Value,
        options: &TaskOptions,
    ) -> Result<Failures>
    where
        O: DeserializeOwned + Send + 'static,
    {
        let n = inputs.len();
        let members = partition::split_indices(n, chunk.min_groups, chunk.max_group_size);
        let groups: Vec<Value> = partition::split(inputs, chunk.min_groups, chunk.max_group_size)
            .into_iter()
            .map(Value::Array)
            .collect();
        tracing::debug!(task = name, n, groups = groups.len(), "chunked");

        let job = Dispatch::new(name, groups, config, options);
        let mut group_output: Vec<Option<Vec<O>>> = (0..members.len()).map(|_| None).collect();
        let result = coordinator::run(&self.config, self.driver.clone(), job, &mut group_output).await;

        let mut group_failures = Failures::default();
        let mut slots = Vec::with_capacity(members.len());
        for (g, out) in group_output.into_iter().enumerate() {
            let expected = members[g].len();
            let mut group: Vec<Option<O>> = match out {
                Some(ys) if ys.len() == expected => ys.into_iter().map(Some).collect(),
                Some(ys) => {
                    group_failures.record(g, format!("chunk returned {} outputs for {} inputs", ys.len(), expected));
                    Vec::new()
                }
                None => Vec::new(),
            };
            group.resize_with(expected, || None);
            slots.push(group);
        }
        partition::merge_to(output, slots);

        // A failed group fails every item in it.
        let reported = result?;
        let mut failures = Failures {
            first: reported.first.or(group_failures.first),
            ..Failures::default()
        };
        for (g, message) in reported.by_index.into_iter().chain(group_failures.by_index) {
            for &i in &members[g] {
                failures.by_index.insert(i, message.clone());
            }
        }
        Ok(failures)
    }

    /// Runs the task registered as `name` on a single input.
    ///
    /// The failure of that one item comes back as [`Error::Task`].
    pub async fn call<I, C, O>(&self, name: &str, input: I, config: &C) -> Result<O>
    where
        I: Serialize,
        C: Serialize + ?Sized,
        O: DeserializeOwned + Send + 'static,
    {
        let mut output = Vec::new();
        match self.map_into(name, &mut output, std::slice::from_ref(&input), config).await {
            Ok(()) => output.pop().flatten().ok_or_else(|| Error::Task {
                message: "no output".to_string(),
            }),
            Err(Error::PartialFailure { first, .. }) => Err(Error::Task { message: first }),
            Err(err) => Err(err),
        }
    }
}

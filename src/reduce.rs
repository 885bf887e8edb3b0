//! Tree reduction built from repeated maps over pairs.

use crate::error::{Error, Result};
use crate::master::Master;
use crate::task::Pair;
use itertools::Itertools;
use serde::{de::DeserializeOwned, Serialize};
use tracing::info;

impl Master {
    /// Folds `x` into one value with the pair task registered as `name`.
    ///
    /// Each level pairs neighbours `(x[0], x[1]), (x[2], x[3]), ...` and maps
    /// the task over the pairs; an odd last element moves up a level
    /// unchanged. Adjacent elements are always combined in order, so an
    /// associative task gives the same result as a left fold.
    ///
    /// A failure at any level stops the reduction and is returned as
    /// [`Error::Reduce`] with that level.
    pub async fn reduce<T, C>(&self, name: &str, x: Vec<T>, config: &C) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        C: Serialize + ?Sized,
    {
        let mut x = x;
        let mut level = 0;
        while x.len() > 1 {
            info!(task = name, level, items = x.len(), "reduce level");
            x = self.halve(name, x, config).await.map_err(|err| Error::Reduce {
                level,
                source: Box::new(err),
            })?;
            level += 1;
        }
        x.pop().ok_or(Error::EmptyInput)
    }

    /// One reduce level: `n` items in, `ceil(n / 2)` items out.
    pub async fn halve<T, C>(&self, name: &str, x: Vec<T>, config: &C) -> Result<Vec<T>>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        C: Serialize + ?Sized,
    {
        let mut tuples = x.into_iter().tuples::<(T, T)>();
        let pairs: Vec<Pair<T>> = tuples.by_ref().map(|(a, b)| Pair::new(a, b)).collect();
        let carry = tuples.into_buffer().next();

        let mut y: Vec<T> = self.map(name, &pairs, config).await?;
        y.extend(carry);
        Ok(y)
    }
}

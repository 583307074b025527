use anyhow::Result;
use futures::future::join_all;

use crate::{Example, Prediction};

/// A prompt-driven program: one example in, one prediction out.
#[allow(async_fn_in_trait)]
pub trait Module: Send + Sync {
    async fn forward(&self, inputs: Example) -> Result<Prediction>;

    /// Runs [`forward`](Module::forward) over every input concurrently.
    /// Output order matches input order; the first error wins.
    async fn batch(&self, inputs: Vec<Example>) -> Result<Vec<Prediction>> {
        let futures: Vec<_> = inputs
            .into_iter()
            .map(|input| self.forward(input))
            .collect();

        join_all(futures).await.into_iter().collect()
    }
}

/// A module whose behaviour is steered by few-shot demos.
///
/// Optimizers only ever read and replace the demo list.
pub trait Optimizable {
    fn demos(&self) -> Vec<Example>;

    fn set_demos(&mut self, demos: Vec<Example>);
}

use anyhow::{Result, anyhow};
use futures::future::join_all;

use crate::{Example, Module, Prediction};

/// Scores a module's prediction against its example. Higher is better.
#[allow(async_fn_in_trait)]
pub trait Metric {
    async fn evaluate(&self, example: &Example, prediction: &Prediction) -> Result<f32>;
}

impl<F> Metric for F
where
    F: Fn(&Example, &Prediction) -> Result<f32>,
{
    async fn evaluate(&self, example: &Example, prediction: &Prediction) -> Result<f32> {
        self(example, prediction)
    }
}

/// Negative squared error between a predicted score and the human
/// `user_score` on the example.
pub fn mse_metric(example: &Example, predicted_score: f32) -> Result<f32> {
    let user_score = example
        .get_f32("user_score")
        .ok_or_else(|| anyhow!("example has no `user_score`"))?;
    Ok(-(predicted_score - user_score).powi(2))
}

/// [`mse_metric`] over the `score` field of a prediction.
#[derive(Debug, Clone, Copy, Default)]
pub struct MseMetric;

impl Metric for MseMetric {
    async fn evaluate(&self, example: &Example, prediction: &Prediction) -> Result<f32> {
        let predicted = prediction
            .get_f32("score")
            .ok_or_else(|| anyhow!("prediction has no numeric `score`"))?;
        mse_metric(example, predicted)
    }
}

/// Runs `module` on the inputs of every example and scores each prediction.
pub async fn evaluate_trainset<M, MT>(module: &M, trainset: &[Example], metric: &MT) -> Result<Vec<f32>>
where
    M: Module,
    MT: Metric,
{
    let predictions = module
        .batch(trainset.iter().map(Example::inputs).collect())
        .await?;

    let scores = join_all(
        trainset
            .iter()
            .zip(&predictions)
            .map(|(example, prediction)| metric.evaluate(example, prediction)),
    )
    .await;

    scores.into_iter().collect()
}

pub fn average_score(scores: &[f32]) -> f32 {
    if scores.is_empty() {
        return 0.0;
    }
    scores.iter().sum::<f32>() / scores.len() as f32
}

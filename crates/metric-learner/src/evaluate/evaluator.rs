use anyhow::Result;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::fmt;
use tracing::{info, warn};

use super::stats::{mean, pearson};
use crate::{Example, InstanceStore, LanguageModel, MetricModule};

/// Agreement between a metric module and the human scores it was checked against.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationReport {
    pub mse: f64,
    pub mae: f64,
    pub max_error: f64,
    /// Pearson correlation; 0 with fewer than two examples or no variance.
    pub correlation: f64,
    pub num_examples: usize,
    /// Examples where scoring failed and the default score was used.
    pub failed: usize,
}

impl fmt::Display for EvaluationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "examples:    {}", self.num_examples)?;
        writeln!(f, "mse:         {:.4}", self.mse)?;
        writeln!(f, "mae:         {:.4}", self.mae)?;
        writeln!(f, "max_error:   {:.4}", self.max_error)?;
        write!(f, "correlation: {:.4}", self.correlation)?;
        if self.failed > 0 {
            write!(f, "\nfailed:      {}", self.failed)?;
        }
        Ok(())
    }
}

/// Compares a [`MetricModule`]'s scores with the labeled instances of a store.
pub struct MetricEvaluator<'a, L: LanguageModel> {
    pub module: &'a MetricModule<L>,
    pub store: &'a InstanceStore,
    /// Maximum scoring calls in flight.
    pub concurrency: usize,
}

impl<'a, L: LanguageModel> MetricEvaluator<'a, L> {
    pub fn new(module: &'a MetricModule<L>, store: &'a InstanceStore) -> Self {
        Self {
            module,
            store,
            concurrency: 8,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Evaluates against every labeled instance in the store.
    /// `None` when nothing is labeled yet.
    pub async fn evaluate(&self) -> Result<Option<EvaluationReport>> {
        let dataset = self.store.labeled_dataset()?;
        if dataset.is_empty() {
            info!(metric = self.store.metric_name(), "no labeled data available for evaluation");
            return Ok(None);
        }
        Ok(self.evaluate_dataset(&dataset).await)
    }

    /// Scores each example once and compares with its `user_score`.
    /// Examples without a `user_score` are ignored.
    #[tracing::instrument(
        name = "metric_learner.evaluate",
        level = "debug",
        skip_all,
        fields(examples = dataset.len())
    )]
    pub async fn evaluate_dataset(&self, dataset: &[Example]) -> Option<EvaluationReport> {
        let pairs: Vec<(f64, f64, bool)> = stream::iter(dataset)
            .filter_map(|example| async move {
                let Some(user_score) = example.get_f32("user_score") else {
                    warn!("skipping example without user_score");
                    return None;
                };
                Some((example, user_score))
            })
            .map(|(example, user_score)| async move {
                let input = example.get_str("input").unwrap_or_default();
                let prediction = example.get_str("prediction").unwrap_or_default();
                let gold = example.get_str("gold");

                match self.module.score(&input, &prediction, gold.as_deref()).await {
                    Ok(score) => (score as f64, user_score as f64, false),
                    Err(err) => {
                        warn!(error = %err, "scoring failed, using default score");
                        (self.module.default_score as f64, user_score as f64, true)
                    }
                }
            })
            .buffered(self.concurrency.max(1))
            .collect()
            .await;

        if pairs.is_empty() {
            return None;
        }

        let model: Vec<f64> = pairs.iter().map(|(m, _, _)| *m).collect();
        let human: Vec<f64> = pairs.iter().map(|(_, h, _)| *h).collect();
        let errors: Vec<f64> = model.iter().zip(&human).map(|(m, h)| m - h).collect();
        let abs_errors: Vec<f64> = errors.iter().map(|e| e.abs()).collect();

        let report = EvaluationReport {
            mse: mean(&errors.iter().map(|e| e * e).collect::<Vec<_>>()),
            mae: mean(&abs_errors),
            max_error: abs_errors.iter().copied().fold(0.0, f64::max),
            correlation: pearson(&human, &model),
            num_examples: pairs.len(),
            failed: pairs.iter().filter(|(_, _, failed)| *failed).count(),
        };
        info!(
            mse = report.mse,
            correlation = report.correlation,
            num_examples = report.num_examples,
            "evaluation complete"
        );
        Some(report)
    }
}

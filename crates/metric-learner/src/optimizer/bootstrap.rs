use anyhow::{Result, bail};
use bon::Builder;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::Optimizer;
use crate::evaluate::Metric;
use crate::{Example, Module, Optimizable};

/// Few-shot demo selection by bootstrapping.
///
/// Each training example is run through the module (with the other labeled
/// examples as demos). Examples whose prediction passes the metric become
/// *bootstrapped* demos: the example merged with what the module predicted.
/// Leftover slots are filled with raw labeled examples.
///
/// # Hyperparameters
///
/// - **`max_bootstrapped_demos`** (default: 4): demos taken from passing runs.
/// - **`max_labeled_demos`** (default: 16): total demo budget, including
///   bootstrapped ones.
/// - **`max_rounds`** (default: 1): passes over the examples that have not
///   produced a demo yet. Only useful with a non-deterministic LM.
/// - **`metric_threshold`**: minimum metric score to pass. Unset means every
///   successfully scored run passes.
/// - **`max_errors`** (default: 10): module/metric failures tolerated before
///   compilation aborts and the module's previous demos are restored.
/// - **`seed`**: shuffles the trainset reproducibly.
///
/// ```ignore
/// let optimizer = BootstrapFewShot::builder().max_bootstrapped_demos(2).build();
/// optimizer.compile(&mut metric, trainset, &MseMetric).await?;
/// ```
#[derive(Builder, Debug, Clone)]
pub struct BootstrapFewShot {
    #[builder(default = 4)]
    pub max_bootstrapped_demos: usize,
    #[builder(default = 16)]
    pub max_labeled_demos: usize,
    #[builder(default = 1)]
    pub max_rounds: usize,
    pub metric_threshold: Option<f32>,
    #[builder(default = 10)]
    pub max_errors: usize,
    pub seed: Option<u64>,
}

impl Default for BootstrapFewShot {
    fn default() -> Self {
        BootstrapFewShot::builder().build()
    }
}

/// What a [`BootstrapFewShot::compile`] run did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BootstrapReport {
    /// Demos built from passing module runs.
    pub bootstrapped: usize,
    /// Raw labeled examples added to fill the demo budget.
    pub labeled: usize,
    /// Module runs attempted across all rounds.
    pub attempted: usize,
    /// Runs that errored (module or metric).
    pub failed: usize,
    /// Runs that completed but did not pass the metric.
    pub rejected: usize,
}

impl BootstrapFewShot {
    fn passes(&self, score: f32) -> bool {
        self.metric_threshold.is_none_or(|threshold| score >= threshold)
    }

    fn shuffled(&self, mut trainset: Vec<Example>) -> Vec<Example> {
        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        trainset.shuffle(&mut rng);
        trainset
    }

    async fn bootstrap<M, MT>(
        &self,
        module: &mut M,
        trainset: &[Example],
        metric: &MT,
        report: &mut BootstrapReport,
    ) -> Result<Vec<(usize, Example)>>
    where
        M: Module + Optimizable,
        MT: Metric,
    {
        let labeled_pool: Vec<Example> = trainset
            .iter()
            .take(self.max_labeled_demos)
            .cloned()
            .collect();
        let mut bootstrapped: Vec<(usize, Example)> = Vec::new();

        for round in 0..self.max_rounds.max(1) {
            for (idx, example) in trainset.iter().enumerate() {
                if bootstrapped.len() >= self.max_bootstrapped_demos {
                    return Ok(bootstrapped);
                }
                if bootstrapped.iter().any(|(used, _)| *used == idx) {
                    continue;
                }

                module.set_demos(
                    labeled_pool
                        .iter()
                        .filter(|demo| *demo != example)
                        .cloned()
                        .collect(),
                );

                report.attempted += 1;
                let outcome = match module.forward(example.inputs()).await {
                    Ok(prediction) => metric
                        .evaluate(example, &prediction)
                        .await
                        .map(|score| (prediction, score)),
                    Err(err) => Err(err),
                };

                match outcome {
                    Ok((prediction, score)) if self.passes(score) => {
                        let mut demo = example.clone();
                        for (key, value) in prediction.data {
                            if !demo.output_keys.contains(&key) {
                                demo.output_keys.push(key.clone());
                            }
                            demo.data.insert(key, value);
                        }
                        debug!(round, idx, score, "bootstrapped demo");
                        bootstrapped.push((idx, demo));
                    }
                    Ok((_, score)) => {
                        report.rejected += 1;
                        debug!(round, idx, score, "run did not pass metric");
                    }
                    Err(err) => {
                        report.failed += 1;
                        warn!(round, idx, error = %err, "bootstrap run failed");
                        if report.failed > self.max_errors {
                            bail!(
                                "bootstrapping aborted after {} errors; last error: {err}",
                                report.failed
                            );
                        }
                    }
                }
            }
        }

        Ok(bootstrapped)
    }
}

impl Optimizer for BootstrapFewShot {
    type Report = BootstrapReport;

    #[tracing::instrument(
        name = "metric_learner.optimizer.bootstrap",
        level = "debug",
        skip_all,
        fields(trainset = trainset.len())
    )]
    async fn compile<M, MT>(
        &self,
        module: &mut M,
        trainset: Vec<Example>,
        metric: &MT,
    ) -> Result<Self::Report>
    where
        M: Module + Optimizable,
        MT: Metric,
    {
        let mut report = BootstrapReport::default();
        if trainset.is_empty() {
            warn!("empty trainset; module left unchanged");
            return Ok(report);
        }

        let previous_demos = module.demos();
        let trainset = self.shuffled(trainset);

        let bootstrapped = match self.bootstrap(module, &trainset, metric, &mut report).await {
            Ok(bootstrapped) => bootstrapped,
            Err(err) => {
                module.set_demos(previous_demos);
                return Err(err);
            }
        };

        let slots = self.max_labeled_demos.saturating_sub(bootstrapped.len());
        let labeled: Vec<Example> = trainset
            .iter()
            .enumerate()
            .filter(|(idx, _)| !bootstrapped.iter().any(|(used, _)| used == idx))
            .map(|(_, example)| example.clone())
            .take(slots)
            .collect();

        report.bootstrapped = bootstrapped.len();
        report.labeled = labeled.len();

        let mut demos: Vec<Example> = bootstrapped.into_iter().map(|(_, demo)| demo).collect();
        demos.extend(labeled);
        module.set_demos(demos);

        info!(
            bootstrapped = report.bootstrapped,
            labeled = report.labeled,
            attempted = report.attempted,
            failed = report.failed,
            "bootstrap few-shot compile complete"
        );
        Ok(report)
    }
}

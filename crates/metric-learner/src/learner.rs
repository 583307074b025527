use anyhow::Result;
use bon::Builder;
use tracing::{debug, info};

use crate::evaluate::Metric;
use crate::optimizer::{BootstrapFewShot, BootstrapReport, Optimizer};
use crate::{Example, LanguageModel, MetricModule, Module, Optimizable, Prediction};

/// Uses a [`MetricModule`] as the objective for optimizing another program.
///
/// The program's answer for each training question is rated by the metric
/// module against the example's gold answer; [`BootstrapFewShot`] keeps the
/// runs the metric likes as demos.
#[derive(Builder)]
pub struct MetricLearner<P, L: LanguageModel> {
    pub program: P,
    pub metric_module: MetricModule<L>,
    /// Becomes the optimizer's `max_bootstrapped_demos`.
    #[builder(default = 5)]
    pub num_iterations: usize,
    /// Logs every scored example at info level.
    #[builder(default = false)]
    pub verbose: bool,
    #[builder(default = "question".to_string(), into)]
    pub question_field: String,
    #[builder(default = "answer".to_string(), into)]
    pub answer_field: String,
    /// Optimizer settings; `max_bootstrapped_demos` is overridden by `num_iterations`.
    pub optimizer: Option<BootstrapFewShot>,
}

/// [`Metric`] adapter that asks a metric module to rate a program's answer.
pub struct LearnedMetric<'a, L: LanguageModel> {
    pub metric_module: &'a MetricModule<L>,
    pub question_field: &'a str,
    pub answer_field: &'a str,
    pub verbose: bool,
}

impl<L: LanguageModel> Metric for LearnedMetric<'_, L> {
    async fn evaluate(&self, example: &Example, prediction: &Prediction) -> Result<f32> {
        let question = example.get_str(self.question_field).unwrap_or_default();
        let gold = example.get_str(self.answer_field);
        let predicted = match prediction.get_str(self.answer_field) {
            Some(answer) => answer,
            None => serde_json::to_string(&prediction.data)?,
        };

        let score = self
            .metric_module
            .score_or_default(&question, &predicted, gold.as_deref())
            .await;

        if self.verbose {
            info!(%question, %predicted, gold = gold.as_deref().unwrap_or(""), score, "scored prediction");
        } else {
            debug!(score, "scored prediction");
        }
        Ok(score)
    }
}

impl<P, L> MetricLearner<P, L>
where
    P: Module + Optimizable,
    L: LanguageModel,
{
    pub fn metric(&self) -> LearnedMetric<'_, L> {
        LearnedMetric {
            metric_module: &self.metric_module,
            question_field: &self.question_field,
            answer_field: &self.answer_field,
            verbose: self.verbose,
        }
    }

    pub fn optimizer(&self) -> BootstrapFewShot {
        let mut optimizer = self.optimizer.clone().unwrap_or_default();
        optimizer.max_bootstrapped_demos = self.num_iterations;
        optimizer
    }

    /// Optimizes `program` in place on `examples`.
    pub async fn optimize(&mut self, examples: Vec<Example>) -> Result<BootstrapReport> {
        let optimizer = self.optimizer();
        if self.verbose {
            info!(
                examples = examples.len(),
                num_iterations = self.num_iterations,
                "starting optimization"
            );
        }

        let metric = LearnedMetric {
            metric_module: &self.metric_module,
            question_field: &self.question_field,
            answer_field: &self.answer_field,
            verbose: self.verbose,
        };
        let report = optimizer.compile(&mut self.program, examples, &metric).await?;

        if self.verbose {
            info!(demos = self.program.demos().len(), "optimization complete");
        }
        Ok(report)
    }

    pub fn into_program(self) -> P {
        self.program
    }
}

//! Scoring modules against labeled data.
//!
//! [`Metric`] is what optimizers maximize: [`MseMetric`] rewards a metric
//! module whose score is close to the human `user_score`.
//! [`MetricEvaluator`] reports how well a metric module agrees with the
//! labeled instances of a store (MSE, MAE, max error, correlation).

pub mod evaluator;
pub mod metrics;
pub mod stats;

pub use evaluator::*;
pub use metrics::*;

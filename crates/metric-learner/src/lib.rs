//! Learn an LM-backed quality metric from human-corrected scores.
//!
//! A [`MetricModule`] asks a language model to rate a prediction between 0
//! and 1. Predictions and their scores are recorded per metric in an
//! [`InstanceStore`], a human corrects the scores (see [`label_instances`]),
//! and [`optimize_metric_module`] turns the corrected instances into
//! few-shot demonstrations. A learned metric can then drive the optimization
//! of another program through [`MetricLearner`].

pub mod core;
pub mod data;
pub mod evaluate;
pub mod labeling;
pub mod learner;
pub mod metric;
pub mod optimizer;
pub mod predictors;
pub mod utils;

pub use crate::core::*;
pub use data::*;
pub use evaluate::*;
pub use labeling::*;
pub use learner::*;
pub use metric::*;
pub use optimizer::*;
pub use predictors::*;
pub use utils::*;

/// Builds an [`Example`] from `"key": "input" | "output" => value` entries.
///
/// ```ignore
/// let example = example! {
///     "question": "input" => "What is 2 + 2?",
///     "answer": "output" => "4",
/// };
/// ```
#[macro_export]
macro_rules! example {
    { $($key:literal : $field_type:literal => $value:expr),* $(,)? } => {{
        use std::collections::HashMap;
        use $crate::data::example::Example;

        let mut input_keys = vec![];
        let mut output_keys = vec![];

        let mut fields = HashMap::new();
        $(
            if $field_type == "input" {
                input_keys.push($key.to_string());
            } else {
                output_keys.push($key.to_string());
            }

            fields.insert($key.to_string(), $value.to_string().into());
        )*

        Example::new(fields, input_keys, output_keys)
    }};
}

#[macro_export]
macro_rules! prediction {
    { $($key:literal => $value:expr),* $(,)? } => {{
        use std::collections::HashMap;
        use $crate::{LmUsage, Prediction};

        let mut fields = HashMap::new();
        $(
            fields.insert($key.to_string(), $value.to_string().into());
        )*

        Prediction::new(fields, LmUsage::default())
    }};
}

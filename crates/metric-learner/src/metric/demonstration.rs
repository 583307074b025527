use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::{Example, Instance};

/// A rated example shown to the LM ahead of the triple being scored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Demonstration {
    pub input: String,
    pub prediction: String,
    #[serde(default)]
    pub gold: Option<String>,
    pub score: f32,
}

impl Demonstration {
    pub fn new(
        input: impl Into<String>,
        prediction: impl Into<String>,
        gold: Option<String>,
        score: f32,
    ) -> Self {
        Self {
            input: input.into(),
            prediction: prediction.into(),
            gold: gold.filter(|g| !g.is_empty()),
            score,
        }
    }

    /// Reads `input`, `prediction`, `gold` and the rating from an example.
    ///
    /// The human `user_score` wins over a model `score`; an example with
    /// neither, or without input/prediction text, is not a demonstration.
    pub fn from_example(example: &Example) -> Option<Self> {
        let score = example
            .get_f32("user_score")
            .or_else(|| example.get_f32("score"))?;

        Some(Self::new(
            example.get_str("input")?,
            example.get_str("prediction")?,
            example.get_str("gold"),
            score,
        ))
    }

    pub fn to_example(&self) -> Example {
        let data = HashMap::from([
            ("input".to_string(), Value::from(self.input.clone())),
            ("prediction".to_string(), Value::from(self.prediction.clone())),
            (
                "gold".to_string(),
                self.gold.clone().map(Value::from).unwrap_or(Value::Null),
            ),
            ("user_score".to_string(), Value::from(self.score)),
        ]);
        Example::new(data, vec![], vec![]).with_inputs(&["input", "prediction", "gold"])
    }
}

impl TryFrom<&Instance> for Demonstration {
    type Error = anyhow::Error;

    fn try_from(instance: &Instance) -> Result<Self, Self::Error> {
        let score = instance
            .user_score
            .ok_or_else(|| anyhow::anyhow!("instance {} has no user score", instance.datetime))?;
        Ok(Self::new(
            instance.input.clone(),
            instance.prediction.clone(),
            instance.gold.clone(),
            score,
        ))
    }
}

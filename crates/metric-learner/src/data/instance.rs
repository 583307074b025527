use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::Example;

/// Timestamp layout used for `datetime`: ISO-8601, local time, microseconds.
pub const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

/// One recorded scoring event.
///
/// The JSON field names are the on-disk record format, so keep them stable.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Instance {
    pub input: String,
    pub prediction: String,
    pub gold: Option<String>,
    /// Score produced by the metric module when the instance was recorded.
    pub score: Option<f32>,
    /// Human correction; `None` until labeled.
    pub user_score: Option<f32>,
    pub datetime: String,
}

impl Instance {
    pub fn new(
        input: impl Into<String>,
        prediction: impl Into<String>,
        gold: Option<String>,
        score: Option<f32>,
    ) -> Self {
        Self {
            input: input.into(),
            prediction: prediction.into(),
            gold,
            score,
            user_score: None,
            datetime: format_datetime(&Local::now().naive_local()),
        }
    }

    pub fn is_labeled(&self) -> bool {
        self.user_score.is_some()
    }

    /// Training example for a labeled instance: inputs `input`, `prediction`
    /// and `gold`, label `user_score`. Unlabeled instances yield `None`.
    pub fn to_example(&self) -> Option<Example> {
        let user_score = self.user_score?;
        let data = HashMap::from([
            ("input".to_string(), Value::from(self.input.clone())),
            ("prediction".to_string(), Value::from(self.prediction.clone())),
            (
                "gold".to_string(),
                self.gold.clone().map(Value::from).unwrap_or(Value::Null),
            ),
            ("user_score".to_string(), Value::from(user_score)),
        ]);

        Some(Example::new(data, vec![], vec![]).with_inputs(&["input", "prediction", "gold"]))
    }

    /// File stem derived from the timestamp (`:` and `.` become `-`).
    pub fn file_stem(&self) -> String {
        file_stem_for(&self.datetime)
    }
}

pub(crate) fn format_datetime(datetime: &NaiveDateTime) -> String {
    datetime.format(DATETIME_FORMAT).to_string()
}

pub(crate) fn file_stem_for(datetime: &str) -> String {
    datetime.replace([':', '.'], "-")
}

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::LmUsage;

#[derive(Serialize, Deserialize, Default, Debug, Clone)]
pub struct Prediction {
    pub data: HashMap<String, Value>,
    pub lm_usage: LmUsage,
}

impl Prediction {
    pub fn new(data: HashMap<String, Value>, lm_usage: LmUsage) -> Self {
        Self { data, lm_usage }
    }

    pub fn get(&self, key: &str, default: Option<&str>) -> Value {
        self.data
            .get(key)
            .cloned()
            .unwrap_or_else(|| default.unwrap_or_default().into())
    }

    pub fn get_str(&self, key: &str) -> Option<String> {
        match self.data.get(key)? {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    pub fn get_f32(&self, key: &str) -> Option<f32> {
        match self.data.get(key)? {
            Value::Number(n) => n.as_f64().map(|v| v as f32),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn keys(&self) -> Vec<String> {
        self.data.keys().cloned().collect()
    }

    pub fn values(&self) -> Vec<Value> {
        self.data.values().cloned().collect()
    }

    pub fn set_lm_usage(&mut self, lm_usage: LmUsage) {
        self.lm_usage = lm_usage;
    }
}

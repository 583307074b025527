use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// A key/value training record with a designated set of input keys.
#[derive(Serialize, Deserialize, Default, Debug, Clone, PartialEq)]
pub struct Example {
    pub data: HashMap<String, Value>,
    pub input_keys: Vec<String>,
    pub output_keys: Vec<String>,
}

impl Example {
    /// Empty `output_keys` are inferred as every key that is not an input.
    pub fn new(
        data: HashMap<String, Value>,
        input_keys: Vec<String>,
        output_keys: Vec<String>,
    ) -> Self {
        let output_keys = if !output_keys.is_empty() {
            output_keys
        } else if !input_keys.is_empty() {
            data.keys()
                .filter(|key| !input_keys.contains(key))
                .cloned()
                .collect()
        } else {
            vec![]
        };

        Self {
            data,
            input_keys,
            output_keys,
        }
    }

    pub fn get(&self, key: &str, default: Option<&str>) -> Value {
        self.data
            .get(key)
            .cloned()
            .unwrap_or_else(|| default.unwrap_or_default().into())
    }

    /// String view of a field. Non-string values are rendered as JSON and
    /// `null`/missing fields yield `None`.
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

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.data.insert(key.into(), value.into());
    }

    /// Marks `keys` as inputs; every other key becomes an output.
    pub fn with_inputs<S: AsRef<str>>(mut self, keys: &[S]) -> Self {
        self.input_keys = keys.iter().map(|key| key.as_ref().to_string()).collect();
        self.output_keys = self
            .data
            .keys()
            .filter(|key| !self.input_keys.contains(key))
            .cloned()
            .collect();
        self
    }

    /// Only the input fields.
    pub fn inputs(&self) -> Example {
        Example {
            data: self
                .data
                .iter()
                .filter(|(key, _)| self.input_keys.contains(key))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            input_keys: self.input_keys.clone(),
            output_keys: vec![],
        }
    }

    /// Only the non-input fields.
    pub fn labels(&self) -> Example {
        Example {
            data: self
                .data
                .iter()
                .filter(|(key, _)| !self.input_keys.contains(key))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            input_keys: vec![],
            output_keys: self.output_keys.clone(),
        }
    }

    pub fn without(&self, keys: &[&str]) -> Self {
        let keep = |key: &String| !keys.contains(&key.as_str());
        Self {
            data: self
                .data
                .iter()
                .filter(|(key, _)| keep(key))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            input_keys: self.input_keys.iter().filter(|k| keep(k)).cloned().collect(),
            output_keys: self.output_keys.iter().filter(|k| keep(k)).cloned().collect(),
        }
    }
}

impl IntoIterator for Example {
    type Item = (String, Value);
    type IntoIter = std::collections::hash_map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.data.into_iter()
    }
}

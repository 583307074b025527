use anyhow::{Result, anyhow};
use bon::Builder;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::LazyLock;
use tracing::debug;

use super::Signature;
use crate::{Example, LanguageModel, Module, Optimizable, Prediction};

static SECTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\[ ## (\w+) ## \]\]").expect("section regex is valid"));

/// Single-call program: renders a [`Signature`] and its demos with
/// `[[ ## field ## ]]` section markers, then reads each output field back out
/// of the reply.
#[derive(Builder, Clone)]
pub struct Predict<L: LanguageModel> {
    pub lm: L,
    pub signature: Signature,
    #[builder(default)]
    pub demos: Vec<Example>,
}

fn push_sections(out: &mut String, fields: &[String], example: &Example) {
    for field in fields {
        let value = example.get_str(field).unwrap_or_default();
        out.push_str(&format!("[[ ## {field} ## ]]\n{value}\n\n"));
    }
}

impl<L: LanguageModel> Predict<L> {
    pub fn new(lm: L, signature: Signature) -> Self {
        Self::builder().lm(lm).signature(signature).build()
    }

    fn field_list(fields: &[String]) -> String {
        fields
            .iter()
            .enumerate()
            .map(|(i, field)| format!("{}. `{field}`\n", i + 1))
            .collect()
    }

    pub fn format_prompt(&self, inputs: &Example) -> String {
        let sig = &self.signature;
        let mut prompt = format!(
            "Your input fields are:\n{}\nYour output fields are:\n{}\n",
            Self::field_list(&sig.input_fields),
            Self::field_list(&sig.output_fields),
        );

        prompt.push_str(
            "All interactions will be structured in the following way, with the appropriate values filled in.\n\n",
        );
        for field in sig.input_fields.iter().chain(&sig.output_fields) {
            prompt.push_str(&format!("[[ ## {field} ## ]]\n{field}\n\n"));
        }
        prompt.push_str("[[ ## completed ## ]]\n\n");
        prompt.push_str(&format!(
            "In adhering to this structure, your objective is:\n\t{}\n\n",
            sig.objective()
        ));

        for demo in &self.demos {
            push_sections(&mut prompt, &sig.input_fields, demo);
            push_sections(&mut prompt, &sig.output_fields, demo);
            prompt.push_str("[[ ## completed ## ]]\n\n");
        }

        push_sections(&mut prompt, &sig.input_fields, inputs);

        let mut outputs = sig.output_fields.iter();
        if let Some(first) = outputs.next() {
            prompt.push_str(&format!(
                "Respond with the corresponding output fields, starting with the field `{first}`,"
            ));
        }
        for field in outputs {
            prompt.push_str(&format!(" then `{field}`,"));
        }
        prompt.push_str(" and then ending with the marker for `completed`.");
        prompt
    }

    /// Splits a reply into its `[[ ## field ## ]]` sections.
    pub fn parse_response(&self, response: &str) -> Result<HashMap<String, Value>> {
        let markers: Vec<_> = SECTION.captures_iter(response).collect();
        let mut sections = HashMap::new();
        for (idx, caps) in markers.iter().enumerate() {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let end = markers
                .get(idx + 1)
                .and_then(|next| next.get(0))
                .map_or(response.len(), |m| m.start());
            sections
                .entry(name.as_str().to_string())
                .or_insert_with(|| response[whole.end()..end].trim().to_string());
        }

        self.signature
            .output_fields
            .iter()
            .map(|field| {
                sections
                    .remove(field)
                    .map(|text| (field.clone(), Value::from(text)))
                    .ok_or_else(|| anyhow!("field `{field}` not found in response"))
            })
            .collect()
    }
}

impl<L: LanguageModel> Module for Predict<L> {
    #[tracing::instrument(
        name = "metric_learner.predict.forward",
        level = "debug",
        skip_all,
        fields(signature = %self.signature, demos = self.demos.len())
    )]
    async fn forward(&self, inputs: Example) -> Result<Prediction> {
        let prompt = self.format_prompt(&inputs);
        let response = self.lm.complete(&prompt).await?;
        let data = self.parse_response(&response.output)?;
        debug!(fields = data.len(), "prediction parsed");
        Ok(Prediction::new(data, response.usage))
    }
}

impl<L: LanguageModel> Optimizable for Predict<L> {
    fn demos(&self) -> Vec<Example> {
        self.demos.clone()
    }

    fn set_demos(&mut self, demos: Vec<Example>) {
        self.demos = demos;
    }
}

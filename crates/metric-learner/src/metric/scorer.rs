use anyhow::{Context, Result, anyhow, bail};
use bon::Builder;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use std::sync::LazyLock;
use tracing::{debug, warn};

use super::{Demonstration, PromptTemplate};
use crate::core::errors::{ParseError, ScoreError, TemplateError};
use crate::utils::telemetry::truncate;
use crate::{Example, LanguageModel, LmUsage, Module, Optimizable, Prediction};

/// Score used by [`MetricModule::score_or_default`] when scoring fails.
pub const DEFAULT_SCORE: f32 = 0.5;

const FINAL_INSTRUCTION: &str = "\n\nProvide only a number between 0 and 1 as your response.";

static NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-?\d+\.\d+|-?\d+").expect("number regex is valid"));

/// Extracts the first number in `response`, clamped into `[0, 1]`.
pub fn parse_score(response: &str) -> Result<f32, ParseError> {
    let text = NUMBER
        .find(response.trim())
        .ok_or(ParseError::NoNumber)?
        .as_str();
    let score: f32 = text.parse().map_err(|_| ParseError::InvalidNumber {
        text: text.to_string(),
    })?;
    Ok(score.clamp(0.0, 1.0))
}

/// Renders a score the way ratings appear in prompts and messages: whole
/// numbers keep one decimal (`1.0`, `0.0`), others print as-is (`0.75`).
pub fn format_score(score: f32) -> String {
    if score.is_finite() && score.fract() == 0.0 {
        format!("{score:.1}")
    } else {
        score.to_string()
    }
}

/// The persisted, learnable part of a [`MetricModule`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricState {
    pub template: PromptTemplate,
    #[serde(default)]
    pub demonstrations: Vec<Demonstration>,
    #[serde(default = "default_score")]
    pub default_score: f32,
}

fn default_score() -> f32 {
    DEFAULT_SCORE
}

impl Default for MetricState {
    fn default() -> Self {
        Self {
            template: PromptTemplate::default(),
            demonstrations: Vec::new(),
            default_score: DEFAULT_SCORE,
        }
    }
}

impl MetricState {
    /// Reads a state file written by [`MetricModule::save`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read metric state from {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("invalid metric state in {}", path.display()))
    }

    /// Human-readable dump of the template and demonstrations.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Prompt Template:\n{}\n", self.template);
        let _ = writeln!(out, "Demonstrations:");
        if self.demonstrations.is_empty() {
            out.push_str("  (none)\n");
        }
        for (idx, demo) in self.demonstrations.iter().enumerate() {
            let _ = writeln!(out, "  {}. Question: {}", idx + 1, demo.input);
            let _ = writeln!(out, "     Answer: {}", demo.prediction);
            if let Some(gold) = &demo.gold {
                let _ = writeln!(out, "     Correct answer: {gold}");
            }
            let _ = writeln!(out, "     Rating: {}", format_score(demo.score));
        }
        out
    }
}

/// An LM-backed scorer for (input, prediction, gold) triples.
///
/// The prompt is the rendered [`PromptTemplate`], preceded by any
/// demonstrations, followed by the gold answer and an instruction to reply
/// with a bare number. The first number in the reply is the score.
///
/// ```ignore
/// let metric = MetricModule::builder().lm(lm).build();
/// let score = metric.score("What is 2+2?", "4", Some("4")).await?;
/// ```
#[derive(Builder, Clone)]
pub struct MetricModule<L: LanguageModel> {
    pub lm: L,
    #[builder(default)]
    pub demonstrations: Vec<Demonstration>,
    #[builder(default)]
    pub template: PromptTemplate,
    /// Returned by [`score_or_default`](Self::score_or_default) on failure.
    #[builder(default = DEFAULT_SCORE)]
    pub default_score: f32,
}

impl<L: LanguageModel> MetricModule<L> {
    pub fn new(lm: L) -> Self {
        Self::builder().lm(lm).build()
    }

    pub fn with_template(lm: L, template: &str) -> Result<Self, TemplateError> {
        Ok(Self::builder()
            .lm(lm)
            .template(PromptTemplate::new(template)?)
            .build())
    }

    pub fn from_state(lm: L, state: MetricState) -> Self {
        Self {
            lm,
            demonstrations: state.demonstrations,
            template: state.template,
            default_score: state.default_score,
        }
    }

    pub fn state(&self) -> MetricState {
        MetricState {
            template: self.template.clone(),
            demonstrations: self.demonstrations.clone(),
            default_score: self.default_score,
        }
    }

    /// Writes template and demonstrations as pretty JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(&self.state())?)
            .with_context(|| format!("failed to write metric state to {}", path.display()))?;
        debug!(path = %path.display(), demos = self.demonstrations.len(), "metric state saved");
        Ok(())
    }

    pub fn load(lm: L, path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::from_state(lm, MetricState::load(path)?))
    }

    pub fn build_prompt(&self, input: &str, prediction: &str, gold: Option<&str>) -> String {
        let gold = gold.filter(|g| !g.is_empty());
        let mut prompt = String::new();

        if !self.demonstrations.is_empty() {
            prompt.push_str("Here are some examples of how to rate answers:\n\n");
            for demo in &self.demonstrations {
                let _ = writeln!(prompt, "Question: {}", demo.input);
                let _ = writeln!(prompt, "Answer: {}", demo.prediction);
                if let Some(demo_gold) = &demo.gold {
                    let _ = writeln!(prompt, "Correct answer: {demo_gold}");
                }
                let _ = write!(prompt, "Rating: {}\n\n", format_score(demo.score));
            }
            prompt.push_str("Now, rate the following answer:\n\n");
        }

        prompt.push_str(&self.template.render(input, prediction, gold));
        if let Some(gold) = gold {
            let _ = write!(prompt, " The correct answer is '{gold}'.");
        }
        prompt.push_str(FINAL_INSTRUCTION);
        prompt
    }

    async fn score_with_usage(
        &self,
        input: &str,
        prediction: &str,
        gold: Option<&str>,
    ) -> Result<(f32, LmUsage), ScoreError> {
        let prompt = self.build_prompt(input, prediction, gold);
        let response = self.lm.complete(&prompt).await?;

        match parse_score(&response.output) {
            Ok(score) => {
                debug!(score, "scored triple");
                Ok((score, response.usage))
            }
            Err(source) => Err(ScoreError::Parse {
                source,
                raw_response: response.output,
            }),
        }
    }

    /// Asks the LM to rate `prediction` for `input` and returns a score in `[0, 1]`.
    #[tracing::instrument(
        name = "metric_learner.metric.score",
        level = "debug",
        skip_all,
        fields(demos = self.demonstrations.len(), has_gold = gold.is_some())
    )]
    pub async fn score(
        &self,
        input: &str,
        prediction: &str,
        gold: Option<&str>,
    ) -> Result<f32, ScoreError> {
        self.score_with_usage(input, prediction, gold)
            .await
            .map(|(score, _)| score)
    }

    /// Like [`score`](Self::score), but any failure becomes `default_score`.
    pub async fn score_or_default(&self, input: &str, prediction: &str, gold: Option<&str>) -> f32 {
        match self.score(input, prediction, gold).await {
            Ok(score) => score,
            Err(err) => {
                warn!(
                    error = %err,
                    input = truncate(input, 60),
                    fallback = self.default_score,
                    "scoring failed, using default score"
                );
                self.default_score
            }
        }
    }

    /// Appends a rated example. The rating must lie in `[0, 1]`.
    pub fn add_demonstration(
        &mut self,
        input: &str,
        prediction: &str,
        gold: Option<&str>,
        score: f32,
    ) -> Result<()> {
        if !(0.0..=1.0).contains(&score) {
            bail!("demonstration score {score} is outside the valid range of 0-1");
        }
        self.demonstrations.push(Demonstration::new(
            input,
            prediction,
            gold.map(str::to_string),
            score,
        ));
        Ok(())
    }

    pub fn clear_demonstrations(&mut self) {
        self.demonstrations.clear();
    }

    /// Human-readable dump of what the metric has learned.
    pub fn learned_metric_fn(&self) -> String {
        self.state().describe()
    }
}

impl<L: LanguageModel> Module for MetricModule<L> {
    /// Reads `input`, `prediction` and optional `gold`; predicts `score`.
    async fn forward(&self, inputs: Example) -> Result<Prediction> {
        let input = inputs
            .get_str("input")
            .ok_or_else(|| anyhow!("example has no `input` field"))?;
        let prediction = inputs
            .get_str("prediction")
            .ok_or_else(|| anyhow!("example has no `prediction` field"))?;
        let gold = inputs.get_str("gold");

        let (score, usage) = self
            .score_with_usage(&input, &prediction, gold.as_deref())
            .await?;

        Ok(Prediction::new(
            HashMap::from([("score".to_string(), Value::from(score))]),
            usage,
        ))
    }
}

impl<L: LanguageModel> Optimizable for MetricModule<L> {
    fn demos(&self) -> Vec<Example> {
        self.demonstrations
            .iter()
            .map(Demonstration::to_example)
            .collect()
    }

    fn set_demos(&mut self, demos: Vec<Example>) {
        let total = demos.len();
        self.demonstrations = demos
            .iter()
            .filter_map(Demonstration::from_example)
            .collect();
        if self.demonstrations.len() < total {
            warn!(
                dropped = total - self.demonstrations.len(),
                "ignored demos without input, prediction or rating"
            );
        }
    }
}

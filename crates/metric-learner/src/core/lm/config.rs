use bon::Builder;
use std::time::Duration;

/// Tunable inference parameters applied to each [`LM`](super::LM) call.
///
/// Scoring wants repeatable numbers, so the defaults are greedy decoding and a
/// short completion budget.
#[derive(Clone, Debug, Builder)]
pub struct LMConfig {
    /// Model identifier sent to the provider.
    #[builder(default = "gpt-4o-mini".to_string(), into)]
    pub model: String,
    /// Sampling temperature.
    #[builder(default = 0.0)]
    pub temperature: f32,
    /// Maximum tokens requested for the completion.
    #[builder(default = 64)]
    pub max_tokens: u32,
    /// Optional deterministic seed when the provider supports it.
    pub seed: Option<i64>,
    /// Optional system message sent ahead of every prompt.
    #[builder(into)]
    pub system_prompt: Option<String>,
    /// Per-request timeout.
    #[builder(default = Duration::from_secs(60))]
    pub timeout: Duration,
    /// Retries for retryable failures (network, 429, 5xx, timeouts).
    #[builder(default = 2)]
    pub max_retries: u32,
}

impl Default for LMConfig {
    fn default() -> Self {
        LMConfig::builder().build()
    }
}

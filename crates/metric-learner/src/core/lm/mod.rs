pub mod config;
pub mod dummy;
pub mod usage;

pub use config::*;
pub use dummy::*;
pub use usage::*;

use anyhow::{Result, anyhow};
use bon::Builder;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::core::errors::LmError;
use crate::utils::telemetry::truncate;

/// A single completion returned by [`LanguageModel::complete`].
#[derive(Clone, Debug, Default)]
pub struct LmResponse {
    /// Assistant text chosen by the provider.
    pub output: String,
    /// Token usage reported by the provider for this call.
    pub usage: LmUsage,
}

/// Anything that can turn a prompt into text.
///
/// [`LM`] talks to an OpenAI-compatible endpoint; [`DummyLM`] replays
/// scripted replies in tests.
#[allow(async_fn_in_trait)]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<LmResponse, LmError>;
}

impl<L: LanguageModel> LanguageModel for Arc<L> {
    async fn complete(&self, prompt: &str) -> Result<LmResponse, LmError> {
        (**self).complete(prompt).await
    }
}

impl<L: LanguageModel> LanguageModel for &L {
    async fn complete(&self, prompt: &str) -> Result<LmResponse, LmError> {
        (**self).complete(prompt).await
    }
}

/// Base URL and API key variable for each supported `provider:` prefix.
fn provider_endpoint(provider: &str) -> Option<(&'static str, Option<&'static str>)> {
    match provider {
        "openai" => Some(("https://api.openai.com/v1", Some("OPENAI_API_KEY"))),
        "openrouter" => Some(("https://openrouter.ai/api/v1", Some("OPENROUTER_API_KEY"))),
        "groq" => Some(("https://api.groq.com/openai/v1", Some("GROQ_API_KEY"))),
        "together" => Some(("https://api.together.xyz/v1", Some("TOGETHER_API_KEY"))),
        "xai" => Some(("https://api.x.ai/v1", Some("XAI_API_KEY"))),
        "gemini" | "google" => Some((
            "https://generativelanguage.googleapis.com/v1beta/openai",
            Some("GEMINI_API_KEY"),
        )),
        "ollama" => Some(("http://localhost:11434/v1", None)),
        _ => None,
    }
}

/// OpenAI-compatible chat completions client.
///
/// Clones share the underlying HTTP connection pool.
#[derive(Builder, Clone)]
pub struct LM {
    /// Provider API credential.
    #[builder(into)]
    pub api_key: SecretString,
    /// Base URL for the OpenAI-compatible endpoint.
    #[builder(default = "https://api.openai.com/v1".to_string(), into)]
    pub base_url: String,
    /// Provider name used in logs and errors.
    #[builder(default = "openai".to_string(), into)]
    pub provider: String,
    /// Model inference settings applied to each call.
    #[builder(default)]
    pub config: LMConfig,
    #[builder(skip = reqwest::Client::new())]
    client: reqwest::Client,
}

impl std::fmt::Debug for LM {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LM")
            .field("base_url", &self.base_url)
            .field("provider", &self.provider)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<i64>,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<LmUsage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

impl LM {
    /// Builds a client from a `provider:model` string such as
    /// `openrouter:google/gemini-2.0-flash-001`.
    ///
    /// The API key falls back to the provider's environment variable
    /// (`OPENAI_API_KEY`, `OPENROUTER_API_KEY`, ...).
    pub fn from_model_string(model_str: &str, api_key: Option<&str>) -> Result<Self> {
        let (provider, model_id) = model_str.split_once(':').ok_or_else(|| {
            anyhow!("model string must be in format 'provider:model_name', got `{model_str}`")
        })?;
        let (base_url, env_var) = provider_endpoint(provider).ok_or_else(|| {
            anyhow!(
                "unsupported provider `{provider}`; supported providers are: openai, openrouter, groq, together, xai, gemini, ollama"
            )
        })?;

        let key = match (api_key, env_var) {
            (Some(key), _) => key.to_string(),
            (None, Some(var)) => std::env::var(var)
                .map_err(|_| anyhow!("{var} environment variable not set"))?,
            (None, None) => String::new(),
        };

        Ok(LM::builder()
            .api_key(key)
            .base_url(base_url)
            .provider(provider)
            .config(LMConfig::builder().model(model_id).build())
            .build())
    }

    /// Replaces the inference settings, keeping the endpoint and credentials.
    pub fn with_config(mut self, config: LMConfig) -> Self {
        self.config = config;
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    async fn send_once(&self, prompt: &str) -> Result<LmResponse, LmError> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = self.config.system_prompt.as_deref() {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: prompt,
        });

        let request = ChatCompletionRequest {
            model: &self.config.model,
            messages,
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            seed: self.config.seed,
        };

        let endpoint = self.endpoint();
        let mut http = self
            .client
            .post(&endpoint)
            .timeout(self.config.timeout)
            .json(&request);
        let key = self.api_key.expose_secret();
        if !key.is_empty() {
            http = http.bearer_auth(key);
        }

        let response = http.send().await.map_err(|source| {
            if source.is_timeout() {
                LmError::Timeout {
                    after: self.config.timeout,
                }
            } else {
                LmError::Network {
                    endpoint: endpoint.clone(),
                    source,
                }
            }
        })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(LmError::RateLimit { retry_after });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LmError::InvalidResponse {
                status: status.as_u16(),
                body,
            });
        }

        let body: ChatCompletionResponse =
            response.json().await.map_err(|err| LmError::Provider {
                provider: self.provider.clone(),
                message: format!("malformed completion payload: {err}"),
            })?;

        let output = body
            .choices
            .into_iter()
            .next()
            .ok_or(LmError::EmptyResponse)?
            .message
            .content
            .unwrap_or_default();

        Ok(LmResponse {
            output,
            usage: body.usage.unwrap_or_default(),
        })
    }
}

const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Exponential backoff from 500ms, capped at [`MAX_BACKOFF`].
fn backoff_for(attempt: u32) -> Duration {
    let millis = 2u64
        .saturating_pow(attempt.saturating_sub(1))
        .saturating_mul(500);
    Duration::from_millis(millis).min(MAX_BACKOFF)
}

impl LanguageModel for LM {
    #[tracing::instrument(
        name = "metric_learner.lm.complete",
        level = "debug",
        skip(self, prompt),
        fields(model = %self.config.model, prompt_len = prompt.len())
    )]
    async fn complete(&self, prompt: &str) -> Result<LmResponse, LmError> {
        let mut attempt = 0;
        loop {
            match self.send_once(prompt).await {
                Ok(response) => {
                    debug!(
                        total_tokens = response.usage.total_tokens,
                        output = truncate(&response.output, 80),
                        "completion received"
                    );
                    return Ok(response);
                }
                Err(err) if err.is_retryable() && attempt < self.config.max_retries => {
                    attempt += 1;
                    let backoff = match &err {
                        LmError::RateLimit {
                            retry_after: Some(after),
                        } => (*after).min(MAX_BACKOFF),
                        _ => backoff_for(attempt),
                    };
                    warn!(error = %err, attempt, ?backoff, "retrying LM call");
                    tokio::time::sleep(backoff).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    const COMPLETION: &str = r#"{"choices":[{"message":{"role":"assistant","content":"0.7"}}],"usage":{"prompt_tokens":12,"completion_tokens":1,"total_tokens":13}}"#;

    fn reply(status: &str, extra_headers: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n{extra_headers}\r\n{body}",
            body.len()
        )
    }

    /// Reads one request: headers, then `content-length` bytes of body.
    async fn read_request(stream: &mut TcpStream) -> std::io::Result<()> {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = stream.read(&mut chunk).await?;
            if n == 0 {
                return Ok(());
            }
            buf.extend_from_slice(&chunk[..n]);
            let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
                continue;
            };
            let head = String::from_utf8_lossy(&buf[..end]).to_lowercase();
            let body_len = head
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .and_then(|value| value.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= end + 4 + body_len {
                return Ok(());
            }
        }
    }

    /// Answers one connection per canned reply, then stops listening.
    async fn serve(replies: Vec<String>) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();

        tokio::spawn(async move {
            for reply in replies {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                let _ = read_request(&mut stream).await;
                counter.fetch_add(1, Ordering::SeqCst);
                let _ = stream.write_all(reply.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
        });

        (format!("http://{addr}"), hits)
    }

    fn local_lm(base_url: String, max_retries: u32, timeout: Duration) -> LM {
        LM::builder()
            .api_key("test-key".to_string())
            .base_url(base_url)
            .provider("local")
            .config(
                LMConfig::builder()
                    .model("test-model")
                    .max_retries(max_retries)
                    .timeout(timeout)
                    .build(),
            )
            .build()
    }

    #[tokio::test]
    async fn completion_text_and_usage_are_returned() {
        let (url, hits) = serve(vec![reply("200 OK", "", COMPLETION)]).await;
        let lm = local_lm(url, 0, Duration::from_secs(5));

        let response = lm.complete("rate this").await.unwrap();

        assert_eq!(response.output, "0.7");
        assert_eq!(response.usage.total_tokens, 13);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn too_many_requests_maps_to_rate_limit_with_retry_after() {
        let (url, _) = serve(vec![reply("429 Too Many Requests", "retry-after: 7\r\n", "{}")]).await;
        let lm = local_lm(url, 0, Duration::from_secs(5));

        let err = lm.complete("rate this").await.unwrap_err();

        assert!(
            matches!(err, LmError::RateLimit { retry_after: Some(after) } if after == Duration::from_secs(7)),
            "{err:?}"
        );
    }

    #[tokio::test]
    async fn rate_limit_is_retried_after_the_requested_delay() {
        let (url, hits) = serve(vec![
            reply("429 Too Many Requests", "retry-after: 0\r\n", "{}"),
            reply("200 OK", "", COMPLETION),
        ])
        .await;
        let lm = local_lm(url, 1, Duration::from_secs(5));

        let response = lm.complete("rate this").await.unwrap();

        assert_eq!(response.output, "0.7");
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn server_errors_are_retried() {
        let (url, hits) = serve(vec![
            reply("503 Service Unavailable", "", r#"{"error":"busy"}"#),
            reply("200 OK", "", COMPLETION),
        ])
        .await;
        let lm = local_lm(url, 2, Duration::from_secs(5));

        let response = lm.complete("rate this").await.unwrap();

        assert_eq!(response.output, "0.7");
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn client_errors_map_to_invalid_response_without_retry() {
        let (url, hits) = serve(vec![reply("401 Unauthorized", "", r#"{"error":"bad key"}"#)]).await;
        let lm = local_lm(url, 2, Duration::from_secs(5));

        let err = lm.complete("rate this").await.unwrap_err();

        match err {
            LmError::InvalidResponse { status, body } => {
                assert_eq!(status, 401);
                assert!(body.contains("bad key"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_choices_map_to_empty_response_without_retry() {
        let (url, hits) = serve(vec![reply("200 OK", "", r#"{"choices":[]}"#)]).await;
        let lm = local_lm(url, 2, Duration::from_secs(5));

        let err = lm.complete("rate this").await.unwrap_err();

        assert!(matches!(err, LmError::EmptyResponse), "{err:?}");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn slow_provider_maps_to_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((mut stream, _)) = listener.accept().await {
                let _ = read_request(&mut stream).await;
                tokio::time::sleep(Duration::from_secs(10)).await;
            }
        });
        let timeout = Duration::from_millis(200);
        let lm = local_lm(format!("http://{addr}"), 0, timeout);

        let err = lm.complete("rate this").await.unwrap_err();

        assert!(matches!(err, LmError::Timeout { after } if after == timeout), "{err:?}");
    }

    #[test]
    fn backoff_doubles_and_saturates() {
        assert_eq!(backoff_for(1), Duration::from_millis(500));
        assert_eq!(backoff_for(2), Duration::from_millis(1000));
        assert_eq!(backoff_for(3), Duration::from_millis(2000));
        assert_eq!(backoff_for(60), MAX_BACKOFF);
        assert_eq!(backoff_for(u32::MAX), MAX_BACKOFF);
    }

    #[test]
    fn model_string_resolves_provider_endpoint() {
        let lm = LM::from_model_string("openrouter:google/gemini-2.0-flash-001", Some("key"))
            .unwrap();

        assert_eq!(lm.base_url, "https://openrouter.ai/api/v1");
        assert_eq!(lm.provider, "openrouter");
        assert_eq!(lm.config.model, "google/gemini-2.0-flash-001");
        assert_eq!(lm.endpoint(), "https://openrouter.ai/api/v1/chat/completions");
    }

    #[test]
    fn ollama_needs_no_key() {
        let lm = LM::from_model_string("ollama:llama3", None).unwrap();
        assert_eq!(lm.api_key.expose_secret(), "");
    }

    #[test]
    fn model_string_without_provider_is_rejected() {
        let err = LM::from_model_string("gpt-4o-mini", Some("key")).unwrap_err();
        assert!(err.to_string().contains("provider:model_name"));
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let err = LM::from_model_string("acme:model", Some("key")).unwrap_err();
        assert!(err.to_string().contains("unsupported provider `acme`"));
    }
}

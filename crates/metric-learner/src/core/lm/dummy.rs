use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use super::{LanguageModel, LmResponse, LmUsage};
use crate::core::errors::LmError;

type Responder = Arc<dyn Fn(&str) -> String + Send + Sync>;

#[derive(Default)]
struct DummyState {
    scripted: VecDeque<Result<String, String>>,
    prompts: Vec<String>,
}

/// In-memory LM used for deterministic tests and examples.
///
/// Replies come from, in order: the scripted queue, the responder closure,
/// the fixed reply. With none of those set, the call fails. Every prompt is
/// recorded and clones share the same state.
#[derive(Clone, Default)]
pub struct DummyLM {
    state: Arc<Mutex<DummyState>>,
    responder: Option<Responder>,
    reply: Option<String>,
}

impl DummyLM {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers every prompt with `reply`.
    pub fn with_reply(reply: impl Into<String>) -> Self {
        Self {
            reply: Some(reply.into()),
            ..Self::default()
        }
    }

    /// Answers prompts with `replies` in order, then fails.
    pub fn with_replies<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let lm = Self::default();
        for reply in replies {
            lm.push_reply(reply);
        }
        lm
    }

    /// Computes each reply from the prompt text.
    pub fn with_responder(responder: impl Fn(&str) -> String + Send + Sync + 'static) -> Self {
        Self {
            responder: Some(Arc::new(responder)),
            ..Self::default()
        }
    }

    pub fn push_reply(&self, reply: impl Into<String>) {
        self.lock().scripted.push_back(Ok(reply.into()));
    }

    /// Queues a provider failure for the next call.
    pub fn push_failure(&self, message: impl Into<String>) {
        self.lock().scripted.push_back(Err(message.into()));
    }

    /// Every prompt received so far, oldest first.
    pub fn prompts(&self) -> Vec<String> {
        self.lock().prompts.clone()
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.lock().prompts.last().cloned()
    }

    pub fn call_count(&self) -> usize {
        self.lock().prompts.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DummyState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl LanguageModel for DummyLM {
    async fn complete(&self, prompt: &str) -> Result<LmResponse, LmError> {
        let scripted = {
            let mut state = self.lock();
            state.prompts.push(prompt.to_string());
            state.scripted.pop_front()
        };

        let output = match scripted {
            Some(Ok(reply)) => reply,
            Some(Err(message)) => {
                return Err(LmError::Provider {
                    provider: "dummy".to_string(),
                    message,
                });
            }
            None => match (&self.responder, &self.reply) {
                (Some(responder), _) => responder(prompt),
                (None, Some(reply)) => reply.clone(),
                (None, None) => {
                    return Err(LmError::Provider {
                        provider: "dummy".to_string(),
                        message: "no reply configured".to_string(),
                    });
                }
            },
        };

        Ok(LmResponse {
            output,
            usage: LmUsage::default(),
        })
    }
}

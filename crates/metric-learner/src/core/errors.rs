use std::time::Duration;

/// Coarse error classification for retry and routing logic.
///
/// `Temporary` errors are generally retryable; `BadResponse` means the LM
/// answered but we could not read a score out of it.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ErrorClass {
    /// The request itself was malformed.
    BadRequest,
    /// Transient failure (network, rate limit, timeout, server 5xx).
    Temporary,
    /// The LM responded, but the output couldn't be used.
    BadResponse,
    /// A bug in the calling code or an unexpected provider response.
    Internal,
}

/// The LM provider failed before returning a usable response.
#[derive(Debug, thiserror::Error)]
pub enum LmError {
    /// Could not reach the provider endpoint (DNS, connection refused, etc.).
    #[error("could not reach {endpoint}")]
    Network {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    /// The provider returned a rate limit response (HTTP 429).
    #[error("rate limited by provider")]
    RateLimit { retry_after: Option<Duration> },

    /// The provider returned an unexpected HTTP status.
    #[error("invalid response from provider: HTTP {status}")]
    InvalidResponse { status: u16, body: String },

    /// The request exceeded the configured timeout.
    #[error("request timed out after {after:?}")]
    Timeout { after: Duration },

    /// The provider answered 2xx but returned no choices.
    #[error("provider returned no completion choices")]
    EmptyResponse,

    /// A provider-specific error that doesn't fit the other categories.
    #[error("provider error from {provider}: {message}")]
    Provider { provider: String, message: String },
}

impl LmError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Network { .. } => ErrorClass::Temporary,
            Self::RateLimit { .. } => ErrorClass::Temporary,
            Self::InvalidResponse { status, .. } if *status >= 500 => ErrorClass::Temporary,
            Self::InvalidResponse { .. } => ErrorClass::BadRequest,
            Self::Timeout { .. } => ErrorClass::Temporary,
            Self::EmptyResponse => ErrorClass::BadResponse,
            Self::Provider { .. } => ErrorClass::Internal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { .. } => true,
            Self::RateLimit { .. } => true,
            Self::Timeout { .. } => true,
            Self::InvalidResponse { status, .. } => *status >= 500,
            Self::EmptyResponse => false,
            Self::Provider { .. } => false,
        }
    }
}

/// The LM text did not contain a usable score.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseError {
    #[error("no number found in response")]
    NoNumber,

    #[error("`{text}` is not a valid number")]
    InvalidNumber { text: String },
}

/// A prompt template referenced a placeholder it cannot fill.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TemplateError {
    #[error("unknown placeholder `{{{name}}}` in prompt template")]
    UnknownPlaceholder { name: String },

    #[error("unbalanced `{brace}` at byte {offset} in prompt template")]
    UnbalancedBrace { brace: char, offset: usize },
}

/// Failure from a [`MetricModule::score`](crate::MetricModule::score) call.
///
/// 1. **[`Template`](ScoreError::Template)**: the prompt couldn't be built.
///    Not retryable.
/// 2. **[`Lm`](ScoreError::Lm)**: couldn't reach the LM or it errored.
/// 3. **[`Parse`](ScoreError::Parse)**: the LM answered without a number.
///    Retryable (the LM might produce different output). Includes the raw
///    response for debugging.
#[derive(Debug, thiserror::Error)]
pub enum ScoreError {
    #[error("failed to build scoring prompt")]
    Template {
        #[source]
        source: TemplateError,
    },

    #[error("LLM call failed")]
    Lm {
        #[source]
        source: LmError,
    },

    #[error("failed to parse score from response: {raw_response}")]
    Parse {
        #[source]
        source: ParseError,
        raw_response: String,
    },
}

impl ScoreError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Template { .. } => ErrorClass::Internal,
            Self::Lm { source } => source.class(),
            Self::Parse { .. } => ErrorClass::BadResponse,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Template { .. } => false,
            Self::Lm { source } => source.is_retryable(),
            Self::Parse { .. } => true,
        }
    }
}

impl From<LmError> for ScoreError {
    fn from(source: LmError) -> Self {
        ScoreError::Lm { source }
    }
}

impl From<TemplateError> for ScoreError {
    fn from(source: TemplateError) -> Self {
        ScoreError::Template { source }
    }
}

/// Core error type for followsort.
///
/// Adapter crates map their transport errors into this type so the pipeline
/// can tell retryable failures from fatal ones without knowing the transport.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("transient network error: {0}")]
    Transient(String),

    #[error("platform api error {code}: {message}")]
    Platform { code: i64, message: String },

    #[error("ai response error: {0}")]
    AiResponse(String),

    #[error("cancelled")]
    Cancelled,

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("external error: {0}")]
    External(String),
}

impl Error {
    /// Whether a retry of the same call could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transient(_))
    }

    /// Errors that must abort the whole run no matter which stage hit them.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Config(_) | Error::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

//! Fetch failures and their classification into retry categories

/// Failure raised while fetching or extracting one candidate.
///
/// Produced by page extractors (and by [`crate::fetch`]); consumed by
/// [`classify`] to pick a retry strategy.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchError {
    /// Request exceeded its bounded timeout
    Timeout,
    /// Connection-level failure (DNS, reset, refused)
    Connection(String),
    /// HTTP error with optional status code
    Http {
        status: Option<u16>,
        message: String,
    },
    /// Page was fetched but did not have the expected shape
    Mismatch(String),
    /// Unrecoverable failure; the worker cannot continue
    Fatal(String),
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout => f.write_str("request timed out"),
            Self::Connection(msg) => write!(f, "connection error: {msg}"),
            Self::Http {
                status: Some(s),
                message,
            } => write!(f, "HTTP {s}: {message}"),
            Self::Http {
                status: None,
                message,
            } => write!(f, "HTTP error: {message}"),
            Self::Mismatch(msg) => write!(f, "extraction mismatch: {msg}"),
            Self::Fatal(msg) => write!(f, "fatal: {msg}"),
        }
    }
}

impl std::error::Error for FetchError {}

impl FetchError {
    /// Create error from reqwest error
    pub fn from_reqwest(e: &reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_connect() {
            Self::Connection(e.to_string())
        } else {
            Self::Http {
                status: e.status().map(|s| s.as_u16()),
                message: e.to_string(),
            }
        }
    }

    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self::Http {
            status: Some(status),
            message: message.into(),
        }
    }
}

/// Retry category of a [`FetchError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    TransientNetwork,
    RateLimited,
    ExtractionMismatch,
    Fatal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TransientNetwork => "transient_network",
            Self::RateLimited => "rate_limited",
            Self::ExtractionMismatch => "extraction_mismatch",
            Self::Fatal => "fatal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Map a fetch failure to its retry category.
pub fn classify(error: &FetchError) -> ErrorKind {
    match error {
        FetchError::Timeout | FetchError::Connection(_) => ErrorKind::TransientNetwork,
        FetchError::Http { status, .. } => match status {
            // 403 = anti-bot block, treated like an explicit 429
            Some(429 | 403) => ErrorKind::RateLimited,
            Some(408) => ErrorKind::TransientNetwork,
            Some(s) if (400..500).contains(s) => ErrorKind::ExtractionMismatch,
            // 5xx and status-less transport errors
            _ => ErrorKind::TransientNetwork,
        },
        FetchError::Mismatch(_) => ErrorKind::ExtractionMismatch,
        FetchError::Fatal(_) => ErrorKind::Fatal,
    }
}

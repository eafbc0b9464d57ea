use thiserror::Error;

/// Failure classes for the upstream fetch path. The paged fetcher keys its
/// retry behavior off these: transport errors retry without limit,
/// rate-limit signals wait longer without consuming the retry budget, and
/// everything else counts against it.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("http error: {0}")]
    Transport(String),
    #[error("rate limited by upstream")]
    RateLimited,
    #[error("unexpected http status: {status}, body: {body}")]
    Status { status: u16, body: String },
    #[error("malformed response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        FetchError::Transport(e.to_string())
    }
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transport(_))
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, FetchError::RateLimited)
    }
}

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ConsoleError>;

#[derive(Error, Debug)]
pub enum ConsoleError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("invalid field '{field}': {reason}")]
    InvalidField { field: String, reason: String },
    #[error("unknown destination type '{0}'")]
    UnknownDestination(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("server answered {status} for {endpoint}")]
    Http { status: u16, endpoint: String },
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConsoleError {
    pub fn invalid_field(field: &str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    /// Network-level failures and overloaded-server answers.
    pub fn is_transient(&self) -> bool {
        match self {
            ConsoleError::Transport(_) | ConsoleError::Io(_) => true,
            ConsoleError::Http { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for ConsoleError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => ConsoleError::Http {
                status: status.as_u16(),
                endpoint: err
                    .url()
                    .map(|u| u.path().to_string())
                    .unwrap_or_default(),
            },
            None => ConsoleError::Transport(err.without_url().to_string()),
        }
    }
}

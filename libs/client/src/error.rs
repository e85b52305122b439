use stream_api::StreamError;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("transport: {0}")]
    Transport(#[from] StreamError),

    #[error("publish failed after {attempts} attempts, last error: {last_error}")]
    ExhaustedRetries { attempts: u32, last_error: StreamError },

    #[error("batch exceeds provider limits ({records} records, {bytes} bytes)")]
    BatchLimit { records: usize, bytes: usize },

    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0} is closed")]
    Closed(&'static str),

    #[error("subscriber is already running")]
    AlreadyRunning,

    #[error("config: {0}")]
    Config(String),
}

impl ClientError {
    /// The underlying transport error, if the failure came from the provider.
    pub fn transport_error(&self) -> Option<&StreamError> {
        match self {
            ClientError::Transport(e) => Some(e),
            ClientError::ExhaustedRetries { last_error, .. } => Some(last_error),
            _ => None,
        }
    }
}

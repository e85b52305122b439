use stream_api::StreamError;
use stream_client::ClientError;

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Client(#[from] ClientError),

    #[error("transport: {0}")]
    Transport(#[from] StreamError),

    #[error("input: {0}")]
    Input(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

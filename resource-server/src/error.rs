use thiserror::Error;

/// Errors starting or stopping the resource server
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Invalid server configuration: {0}")]
    Config(String),

    #[error("No available port found in range {start}-{end}")]
    NoAvailablePort { start: u16, end: u16 },

    #[error("Failed to bind server: {0}")]
    Bind(String),

    #[error("Server failed to start")]
    StartFailed,

    #[error("Server task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, ServerError>;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("I/O error: {0}")]
    StdIoError(#[from] std::io::Error),

    #[error("{0}")]
    InvalidWorkerPath(String),

    #[error("failed to start worker: {0}")]
    SpawnFailure(String),

    #[error("failed to send input: {0}")]
    WriteFailure(String),

    #[error("Classifier error: {0}")]
    SamplerError(String),
}

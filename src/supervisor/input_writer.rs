use crate::error::AppError;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::process::ChildStdin;

/// Write half of the worker's stdin. Only the send path holds one, so writes
/// are serialized by ownership.
#[derive(Debug)]
pub struct InputWriter<W = ChildStdin> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> InputWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Writes `text` followed by a newline and flushes immediately.
    pub async fn write_line(&mut self, text: &str) -> Result<(), AppError> {
        self.write_all_and_flush(text)
            .await
            .map_err(|e| AppError::WriteFailure(e.to_string()))
    }

    async fn write_all_and_flush(&mut self, text: &str) -> std::io::Result<()> {
        self.inner.write_all(text.as_bytes()).await?;
        self.inner.write_all(b"\n").await?;
        self.inner.flush().await
    }
}

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt, Stdout};
use tokio::sync::Mutex;

use crate::Result;
use crate::writer::Writer;

/// Prints batches to an output stream, stdout unless told otherwise.
pub struct ConsoleWriter<O = Stdout> {
    out: Mutex<O>,
}

impl ConsoleWriter<Stdout> {
    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }
}

impl<O> ConsoleWriter<O>
where
    O: AsyncWrite + Unpin + Send,
{
    pub fn new(out: O) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> O {
        self.out.into_inner()
    }
}

impl<O> Writer for ConsoleWriter<O>
where
    O: AsyncWrite + Unpin + Send,
{
    async fn write(&self, data: Bytes, name: &str) -> Result<String> {
        let mut out = self.out.lock().await;
        out.write_all(&data).await?;
        out.flush().await?;
        Ok(format!("console ({name})"))
    }

    async fn verify_writable(&self) -> Result<bool> {
        Ok(true)
    }
}

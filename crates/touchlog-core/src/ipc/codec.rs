//! Stream framing for IPC messages.
//!
//! Values are written as compact JSON followed by `\n`. The reader does not
//! rely on the newline: it decodes successive JSON values from a buffered
//! byte stream, so pretty-printed or back-to-back values decode the same.

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest single value accepted from a peer.
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

const READ_CHUNK: usize = 8 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame exceeds {MAX_FRAME_BYTES} bytes")]
    FrameTooLarge,

    #[error("connection closed mid-frame")]
    Truncated,
}

/// A bidirectional JSON value stream over any async byte stream.
pub struct JsonStream<S> {
    stream: S,
    buf: Vec<u8>,
}

impl<S> JsonStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            buf: Vec::with_capacity(READ_CHUNK),
        }
    }

    /// Read the next value. Returns `Ok(None)` on a clean end of stream.
    pub async fn read<T: DeserializeOwned>(&mut self) -> Result<Option<T>, CodecError> {
        loop {
            let start = self
                .buf
                .iter()
                .position(|b| !b.is_ascii_whitespace())
                .unwrap_or(self.buf.len());
            self.buf.drain(..start);

            if !self.buf.is_empty() {
                let mut values = serde_json::Deserializer::from_slice(&self.buf).into_iter::<T>();
                match values.next() {
                    Some(Ok(value)) => {
                        let consumed = values.byte_offset();
                        self.buf.drain(..consumed);
                        return Ok(Some(value));
                    }
                    Some(Err(e)) if e.is_eof() => {}
                    Some(Err(e)) => return Err(e.into()),
                    None => {}
                }
            }

            if self.buf.len() > MAX_FRAME_BYTES {
                return Err(CodecError::FrameTooLarge);
            }

            let mut chunk = [0u8; READ_CHUNK];
            let n = self.stream.read(&mut chunk).await?;
            if n == 0 {
                return if self.buf.is_empty() {
                    Ok(None)
                } else {
                    Err(CodecError::Truncated)
                };
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }

    /// Write one value followed by a newline and flush.
    pub async fn write<T: Serialize>(&mut self, value: &T) -> Result<(), CodecError> {
        let mut bytes = serde_json::to_vec(value)?;
        bytes.push(b'\n');
        self.stream.write_all(&bytes).await?;
        self.stream.flush().await?;
        Ok(())
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

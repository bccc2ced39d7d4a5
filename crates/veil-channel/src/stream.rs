use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::Stream;

use veil_core::errors::ExchangeError;

use crate::channel;
use crate::handshake::SymmetricKey;
use crate::transport::ByteStream;
use crate::wire::Frame;

const STREAM_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// Decrypts a line-delimited frame stream into text fragments, in arrival
/// order. Owns the per-exchange key for the lifetime of the stream.
///
/// The first corrupt or unauthentic frame yields an error and fuses the
/// stream; fragments already yielded are not retracted, so the caller keeps a
/// truncated response rather than nothing.
pub struct FrameStream {
    inner: ByteStream,
    key: SymmetricKey,
    buffer: Vec<u8>,
    pending: Vec<Result<String, ExchangeError>>,
    done: bool,
    idle_deadline: Pin<Box<tokio::time::Sleep>>,
    idle_duration: Duration,
}

impl FrameStream {
    pub fn new(inner: ByteStream, key: SymmetricKey) -> Self {
        Self::with_idle_timeout(inner, key, STREAM_IDLE_TIMEOUT)
    }

    pub fn with_idle_timeout(inner: ByteStream, key: SymmetricKey, idle_timeout: Duration) -> Self {
        Self {
            inner,
            key,
            buffer: Vec::new(),
            pending: Vec::new(),
            done: false,
            idle_deadline: Box::pin(tokio::time::sleep(idle_timeout)),
            idle_duration: idle_timeout,
        }
    }

    /// Decrypt one line. Blank lines carry no frame. The bytes are validated
    /// as UTF-8 here, after line splitting, so a character split across
    /// chunk boundaries is never mangled.
    fn process_line(&self, line: &[u8]) -> Option<Result<String, ExchangeError>> {
        let line = match std::str::from_utf8(line) {
            Ok(line) => line.trim(),
            Err(_) => {
                return Some(Err(ExchangeError::StreamCorruption(
                    "frame line is not valid UTF-8".into(),
                )))
            }
        };
        if line.is_empty() {
            return None;
        }
        let result = Frame::parse_line(line)
            .and_then(|frame| frame.decode())
            .and_then(|(nonce, ciphertext)| channel::open(&self.key, &nonce, &ciphertext))
            .and_then(|plaintext| {
                String::from_utf8(plaintext)
                    .map_err(|_| ExchangeError::StreamCorruption("frame is not valid UTF-8".into()))
            });
        Some(result)
    }

    /// Split the buffer into complete lines and queue their fragments.
    /// Stops at the first error; anything buffered past it is discarded.
    fn drain_buffer_lines(&mut self) {
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop();
            if let Some(item) = self.process_line(&line) {
                let is_err = item.is_err();
                self.pending.push(item);
                if is_err {
                    self.buffer.clear();
                    return;
                }
            }
        }
    }

    fn pop_pending(&mut self) -> Option<Result<String, ExchangeError>> {
        if self.pending.is_empty() {
            return None;
        }
        let item = self.pending.remove(0);
        if item.is_err() {
            self.done = true;
            self.pending.clear();
        }
        Some(item)
    }
}

impl Stream for FrameStream {
    type Item = Result<String, ExchangeError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if this.done {
            return Poll::Ready(None);
        }
        if let Some(item) = this.pop_pending() {
            return Poll::Ready(Some(item));
        }

        loop {
            match this.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    // Data received — reset idle timer
                    let new_deadline = tokio::time::Instant::now() + this.idle_duration;
                    this.idle_deadline.as_mut().reset(new_deadline);

                    this.buffer.extend_from_slice(&bytes);
                    this.drain_buffer_lines();

                    if let Some(item) = this.pop_pending() {
                        return Poll::Ready(Some(item));
                    }
                }
                Poll::Ready(Some(Err(e))) => {
                    this.done = true;
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => {
                    // Transport closed — a trailing unterminated line still
                    // carries a frame.
                    if !this.buffer.is_empty() {
                        let remaining = std::mem::take(&mut this.buffer);
                        if let Some(item) = this.process_line(&remaining) {
                            this.pending.push(item);
                        }
                        if let Some(item) = this.pop_pending() {
                            return Poll::Ready(Some(item));
                        }
                    }
                    this.done = true;
                    return Poll::Ready(None);
                }
                Poll::Pending => {
                    if this.idle_deadline.as_mut().poll(cx).is_ready() {
                        this.done = true;
                        return Poll::Ready(Some(Err(ExchangeError::Timeout(this.idle_duration))));
                    }
                    return Poll::Pending;
                }
            }
        }
    }
}

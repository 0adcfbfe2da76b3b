//! Shared HTTP streaming plumbing for the provider backends.

use bytes::BytesMut;
use futures_util::stream::{Stream, StreamExt};

use crate::error::ProviderError;

/// Incremental newline splitter over raw response bytes. Lines are
/// drained in place with `split_to`, so partial lines simply stay in the
/// buffer until more bytes arrive.
#[derive(Default)]
struct LineDecoder {
    pending: BytesMut,
}

impl LineDecoder {
    fn push(&mut self, chunk: &[u8]) {
        self.pending.extend_from_slice(chunk);
    }

    /// Next complete line, without its terminator. `None` while the
    /// buffer holds no full line yet.
    fn next_line(&mut self) -> Option<String> {
        let pos = self.pending.iter().position(|&b| b == b'\n')?;
        let raw = self.pending.split_to(pos + 1);
        Some(String::from_utf8_lossy(&raw[..pos]).into_owned())
    }

    /// Whatever trails the last newline once the source is exhausted.
    fn take_tail(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let raw = self.pending.split();
        let tail = String::from_utf8_lossy(&raw).into_owned();
        (!tail.trim().is_empty()).then_some(tail)
    }
}

/// Turn a byte stream into a stream of complete, non-blank lines. A
/// partial final line is flushed when the source ends.
pub(crate) fn stream_lines(
    byte_stream: impl Stream<Item = reqwest::Result<bytes::Bytes>> + Send + 'static,
) -> impl Stream<Item = Result<String, ProviderError>> + Send {
    let state = (Box::pin(byte_stream), LineDecoder::default(), false);

    futures_util::stream::unfold(state, |(mut source, mut decoder, mut exhausted)| async move {
        loop {
            while let Some(line) = decoder.next_line() {
                if line.trim().is_empty() {
                    continue;
                }
                return Some((Ok(line), (source, decoder, exhausted)));
            }

            if exhausted {
                let tail = decoder.take_tail()?;
                return Some((Ok(tail), (source, decoder, exhausted)));
            }

            match source.next().await {
                Some(Ok(chunk)) => decoder.push(&chunk),
                Some(Err(e)) => {
                    return Some((Err(ProviderError::Http(e)), (source, decoder, exhausted)));
                }
                None => exhausted = true,
            }
        }
    })
}

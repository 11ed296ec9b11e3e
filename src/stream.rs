//! Server-sent-events plumbing shared by every streaming provider.

use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use futures_core::Stream;
use futures_util::StreamExt;

use crate::error::LLMError;
use crate::http::HttpBodyStream;
use crate::provider::ChatStream;
use crate::types::{ChatChunk, ProviderMetadata};

/// Standardized SSE event yielded by [`StreamDecoder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Raw `data:` payload emitted by the provider.
    Data(String),
    /// Terminal marker reported via `[DONE]`.
    Done,
}

/// Normalizes provider SSE feeds into [`StreamEvent`] values.
///
/// Multi-line `data:` fields are joined with `\n`, CRLF line endings are accepted and
/// a final event without its trailing blank line is still delivered.
pub struct StreamDecoder {
    body: HttpBodyStream,
    buffer: Vec<u8>,
    data_lines: Vec<Vec<u8>>,
    pending: VecDeque<Result<StreamEvent, LLMError>>,
    provider: &'static str,
    stream_closed: bool,
    done_received: bool,
}

impl StreamDecoder {
    pub fn new(body: HttpBodyStream, provider: &'static str) -> Self {
        Self {
            body,
            buffer: Vec::new(),
            data_lines: Vec::new(),
            pending: VecDeque::new(),
            provider,
            stream_closed: false,
            done_received: false,
        }
    }

    fn handle_line(&mut self, line: &[u8]) {
        if let Some(data) = line.strip_prefix(b"data:") {
            let data = data.strip_prefix(b" ").unwrap_or(data);
            self.data_lines.push(data.to_vec());
        }
    }

    fn flush_event(&mut self) -> Result<(), LLMError> {
        if self.data_lines.is_empty() {
            return Ok(());
        }

        let joined = self.data_lines.drain(..).collect::<Vec<_>>().join(&b'\n');
        if joined.is_empty() {
            return Ok(());
        }

        let data = String::from_utf8(joined).map_err(|err| LLMError::Provider {
            provider: self.provider,
            message: format!("invalid UTF-8 in stream chunk: {err}"),
        })?;

        if data.trim() == "[DONE]" {
            if !self.done_received {
                self.done_received = true;
                self.pending.push_back(Ok(StreamEvent::Done));
            }
        } else {
            self.pending.push_back(Ok(StreamEvent::Data(data)));
        }
        Ok(())
    }

    fn next_line(&mut self) -> Option<Vec<u8>> {
        let pos = self.buffer.iter().position(|b| *b == b'\n')?;
        let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(line)
    }
}

impl Stream for StreamDecoder {
    type Item = Result<StreamEvent, LLMError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if let Some(event) = this.pending.pop_front() {
                return Poll::Ready(Some(event));
            }
            if this.done_received {
                return Poll::Ready(None);
            }

            if this.stream_closed {
                if !this.buffer.is_empty() {
                    let rest = std::mem::take(&mut this.buffer);
                    let line = rest.strip_suffix(b"\r").unwrap_or(&rest);
                    this.handle_line(line);
                }
                if let Err(err) = this.flush_event() {
                    return Poll::Ready(Some(Err(err)));
                }
                return Poll::Ready(this.pending.pop_front());
            }

            match ready!(this.body.as_mut().poll_next(cx)) {
                Some(Ok(bytes)) => {
                    this.buffer.extend_from_slice(&bytes);
                    while let Some(line) = this.next_line() {
                        if line.is_empty() {
                            if let Err(err) = this.flush_event() {
                                return Poll::Ready(Some(Err(err)));
                            }
                        } else {
                            this.handle_line(&line);
                        }
                    }
                }
                Some(Err(err)) => return Poll::Ready(Some(Err(err))),
                None => this.stream_closed = true,
            }
        }
    }
}

/// Drains a streamed body into a string, typically to read an error payload.
pub(crate) async fn collect_body_text(
    mut body: HttpBodyStream,
    provider: &'static str,
) -> Result<String, LLMError> {
    let mut bytes = Vec::new();
    while let Some(chunk) = body.next().await {
        bytes.extend_from_slice(&chunk?);
    }
    String::from_utf8(bytes).map_err(|err| LLMError::Provider {
        provider,
        message: format!("failed to decode stream error body: {err}"),
    })
}

/// Outcome of mapping one SSE payload.
pub(crate) enum MappedEvent {
    Chunk(ChatChunk),
    /// Keep-alives and events that carry nothing for the caller.
    Skip,
    /// Last chunk of the reply; the stream ends after it.
    Finished(ChatChunk),
}

/// Provider-specific translation of SSE payloads into [`ChatChunk`]s.
pub(crate) trait ChunkMapper: Send + Unpin + 'static {
    fn map_data(&mut self, data: &str, meta: &ProviderMetadata) -> Result<MappedEvent, LLMError>;

    /// Called when the body ends without a terminal event.
    fn end_of_body(&mut self, meta: &ProviderMetadata) -> Result<Option<ChatChunk>, LLMError> {
        Err(LLMError::StreamClosed {
            message: format!("{} stream ended before its terminal event", meta.provider),
        })
    }
}

struct ChunkStream<M> {
    decoder: StreamDecoder,
    mapper: M,
    meta: ProviderMetadata,
    finished: bool,
}

impl<M: ChunkMapper> Stream for ChunkStream<M> {
    type Item = Result<ChatChunk, LLMError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }

        loop {
            let item = match ready!(this.decoder.poll_next_unpin(cx)) {
                Some(Ok(StreamEvent::Data(data))) => match this.mapper.map_data(&data, &this.meta) {
                    Ok(MappedEvent::Skip) => continue,
                    Ok(MappedEvent::Chunk(chunk)) => return Poll::Ready(Some(Ok(chunk))),
                    Ok(MappedEvent::Finished(chunk)) => Some(Ok(chunk)),
                    Err(err) => Some(Err(err)),
                },
                Some(Ok(StreamEvent::Done)) => Some(Ok(ChatChunk::terminal(this.meta.clone()))),
                Some(Err(err)) => Some(Err(err)),
                None => this.mapper.end_of_body(&this.meta).transpose(),
            };
            this.finished = true;
            return Poll::Ready(item);
        }
    }
}

/// Decodes `body` as SSE and maps each payload through `mapper`.
///
/// The returned stream stops after the first terminal chunk or error.
pub(crate) fn chat_stream<M: ChunkMapper>(
    body: HttpBodyStream,
    mapper: M,
    provider: &'static str,
    endpoint: &str,
) -> ChatStream {
    Box::pin(ChunkStream {
        decoder: StreamDecoder::new(body, provider),
        mapper,
        meta: ProviderMetadata::new(provider, endpoint),
        finished: false,
    })
}

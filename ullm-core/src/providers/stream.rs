//! Stream normalization
//!
//! Every transport hands over a sequence of [`RawEvent`]s: SSE events for the
//! HTTP dialects, converted SDK events for Bedrock. The normalizer feeds each
//! one through the adapter's `parse_stream_event` and yields canonical
//! [`StreamChunk`]s, strictly in arrival order and only when the caller pulls.
//!
//! Termination rules:
//! - an adapter-reported terminal event ends the sequence
//! - end of input after a chunk carrying a finish reason ends it normally
//! - end of input before that is a `ServerError`
//! - a transport or decode failure is yielded once, then the sequence is fused

use crate::protocol::StreamChunk;
use crate::providers::adapter::ProviderAdapter;
use crate::providers::error::{ProviderError, ProviderResult, WireFailure};
use futures::stream::{BoxStream, Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tracing::debug;

/// One undecoded vendor event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    /// SSE `event:` field (empty when absent) or the SDK event name
    pub event: String,
    /// Event payload, usually JSON text
    pub data: String,
}

impl RawEvent {
    pub fn new(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            data: data.into(),
        }
    }

    /// Event without a name, as sent by the OpenAI dialect
    pub fn data(data: impl Into<String>) -> Self {
        Self::new("", data)
    }

    /// Decode the payload as JSON
    pub fn json(&self) -> ProviderResult<serde_json::Value> {
        serde_json::from_str(&self.data).map_err(|e| {
            ProviderError::server(format!(
                "undecodable stream event '{}': {}",
                self.event, e
            ))
        })
    }
}

/// Raw events from a non-blocking transport
pub type RawEventStream = BoxStream<'static, Result<RawEvent, WireFailure>>;

/// Raw events from a blocking transport
pub type RawEventIter = Box<dyn Iterator<Item = Result<RawEvent, WireFailure>> + Send>;

/// Response metadata some vendors send once, ahead of the first delta
///
/// The normalizer keeps it for the rest of the stream and fills it into
/// chunks that lack it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamStart {
    pub id: Option<String>,
    pub model: Option<String>,
    /// Input tokens, for vendors whose closing usage leaves them out
    pub prompt_tokens: Option<u32>,
}

/// What one raw event means to the caller
#[derive(Debug, Clone, PartialEq)]
pub enum EventOutcome {
    /// A user-visible delta
    Chunk(StreamChunk),
    /// Stream-wide metadata with nothing to emit yet
    Started(StreamStart),
    /// Metadata or keep-alive with nothing to emit
    Ignored,
    /// The vendor's completion signal, possibly carrying a last chunk
    Terminal(Option<StreamChunk>),
}

enum Step {
    Emit(ProviderResult<StreamChunk>),
    Skip,
    End,
}

/// State shared by the blocking and non-blocking sequences
struct Normalizer {
    adapter: Arc<dyn ProviderAdapter>,
    start: StreamStart,
    saw_finish: bool,
    done: bool,
    emitted: usize,
}

impl Normalizer {
    fn new(adapter: Arc<dyn ProviderAdapter>) -> Self {
        Self {
            adapter,
            start: StreamStart::default(),
            saw_finish: false,
            done: false,
            emitted: 0,
        }
    }

    fn step(&mut self, item: Option<Result<RawEvent, WireFailure>>) -> Step {
        let event = match item {
            None => {
                self.done = true;
                if self.saw_finish {
                    self.log_end("connection closed");
                    return Step::End;
                }
                return Step::Emit(Err(ProviderError::server(
                    "stream closed before completion",
                )
                .with_provider(self.adapter.tag())));
            }
            Some(Err(failure)) => {
                self.done = true;
                return Step::Emit(Err(self.adapter.map_error(failure)));
            }
            Some(Ok(event)) => event,
        };

        match self.adapter.parse_stream_event(&event) {
            Ok(EventOutcome::Chunk(mut chunk)) => {
                self.stamp(&mut chunk);
                self.saw_finish |= chunk.is_terminal();
                self.emitted += 1;
                Step::Emit(Ok(chunk))
            }
            Ok(EventOutcome::Started(start)) => {
                self.start = start;
                Step::Skip
            }
            Ok(EventOutcome::Ignored) => Step::Skip,
            Ok(EventOutcome::Terminal(last)) => {
                self.done = true;
                self.log_end("terminal event");
                match last {
                    Some(mut chunk) => {
                        self.stamp(&mut chunk);
                        self.emitted += 1;
                        Step::Emit(Ok(chunk))
                    }
                    None => Step::End,
                }
            }
            Err(error) => {
                self.done = true;
                Step::Emit(Err(error.with_provider(self.adapter.tag())))
            }
        }
    }

    fn stamp(&self, chunk: &mut StreamChunk) {
        if chunk.id.is_none() {
            chunk.id = self.start.id.clone();
        }
        if chunk.model.is_none() {
            chunk.model = self.start.model.clone();
        }
        if let (Some(usage), Some(prompt)) = (chunk.usage.as_mut(), self.start.prompt_tokens) {
            if usage.prompt_tokens == 0 {
                usage.prompt_tokens = prompt;
                usage.total_tokens = prompt + usage.completion_tokens;
            }
        }
    }

    fn log_end(&self, cause: &str) {
        debug!(
            provider = %self.adapter.tag(),
            chunks = self.emitted,
            "stream finished: {}", cause
        );
    }
}

/// Lazy sequence of canonical chunks for async callers
///
/// Single-consumer and forward-only. Dropping it drops the underlying
/// connection.
pub struct ChunkStream {
    events: RawEventStream,
    state: Normalizer,
    peeked: Option<StreamChunk>,
}

impl ChunkStream {
    pub fn new(events: RawEventStream, adapter: Arc<dyn ProviderAdapter>) -> Self {
        Self {
            events,
            state: Normalizer::new(adapter),
            peeked: None,
        }
    }

    /// Pull the first chunk so that failures before first byte surface here
    ///
    /// The pulled chunk is replayed as the first item.
    pub async fn prime(mut self) -> ProviderResult<Self> {
        match self.next().await {
            Some(Ok(chunk)) => {
                self.peeked = Some(chunk);
                Ok(self)
            }
            Some(Err(error)) => Err(error),
            None => Ok(self),
        }
    }
}

impl Stream for ChunkStream {
    type Item = ProviderResult<StreamChunk>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        if let Some(chunk) = this.peeked.take() {
            return Poll::Ready(Some(Ok(chunk)));
        }

        loop {
            if this.state.done {
                return Poll::Ready(None);
            }
            let item = match this.events.poll_next_unpin(cx) {
                Poll::Ready(item) => item,
                Poll::Pending => return Poll::Pending,
            };
            match this.state.step(item) {
                Step::Emit(result) => return Poll::Ready(Some(result)),
                Step::Skip => continue,
                Step::End => return Poll::Ready(None),
            }
        }
    }
}

/// Lazy sequence of canonical chunks for blocking callers
pub struct ChunkIter {
    events: RawEventIter,
    state: Normalizer,
    peeked: Option<StreamChunk>,
}

impl ChunkIter {
    pub fn new(events: RawEventIter, adapter: Arc<dyn ProviderAdapter>) -> Self {
        Self {
            events,
            state: Normalizer::new(adapter),
            peeked: None,
        }
    }

    /// Blocking counterpart of [`ChunkStream::prime`]
    pub fn prime(mut self) -> ProviderResult<Self> {
        match self.next() {
            Some(Ok(chunk)) => {
                self.peeked = Some(chunk);
                Ok(self)
            }
            Some(Err(error)) => Err(error),
            None => Ok(self),
        }
    }
}

impl Iterator for ChunkIter {
    type Item = ProviderResult<StreamChunk>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(chunk) = self.peeked.take() {
            return Some(Ok(chunk));
        }

        while !self.state.done {
            let item = self.events.next();
            match self.state.step(item) {
                Step::Emit(result) => return Some(result),
                Step::Skip => continue,
                Step::End => return None,
            }
        }
        None
    }
}

impl std::iter::FusedIterator for ChunkIter {}

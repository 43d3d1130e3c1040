//! Streaming translation engine.
//!
//! Turns a live provider byte stream into a live canonical SSE stream:
//!
//! 1. the upstream body is split into native records by a [`Framing`]
//!    (`data:` lines, newline-delimited JSON, or objects of a streamed JSON array);
//! 2. a per-provider [`RecordDecoder`] maps each record to zero or more
//!    [`ChatCompletionChunk`]s;
//! 3. every chunk is written out as `data: {json}\n\n` as soon as its record is
//!    decoded, and a clean end of input is closed with exactly one
//!    `data: [DONE]\n\n`.
//!
//! Blank lines, heartbeats and records that fail to decode are skipped. A broken
//! upstream, an oversized record, or a fatal decoder error ends the output
//! without the sentinel, which is how readers tell truncation from completion.
//! The output is pull-driven: nothing is read from upstream until the reader
//! asks for the next frame.

use super::canonical::{
    ChatCompletionChunk, ChatCompletionResponse, Choice, ChoiceMessage, ChunkFactory, ToolCall, Usage,
};
use crate::error::{RelayError, Result};
use crate::transport::{BodyStream, ByteStream};

use bytes::Bytes;
use futures::stream::{Stream, StreamExt};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::pin::Pin;
use tokio_util::sync::CancellationToken;

/// Upper bound on one native record; larger input cannot be resynchronized.
pub const MAX_RECORD_BYTES: usize = 1024 * 1024;

pub const DONE_FRAME: &[u8] = b"data: [DONE]\n\n";

/// How native records are delimited in the upstream body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Server-sent events; each `data:` line is one record. A `[DONE]` record
    /// ends the stream.
    Sse,
    /// One JSON object per line.
    NdJson,
    /// A JSON array streamed element by element (or a single bare object).
    JsonArray,
}

/// Maps one native record to canonical frames, chat chunks unless stated
/// otherwise.
///
/// Return [`RelayError::Decode`] for a record that should be skipped; any other
/// error ends the stream.
pub trait RecordDecoder<F = ChatCompletionChunk>: Send {
    fn decode(&mut self, record: &str) -> Result<Vec<F>>;

    /// Frames to emit after a clean end of input, before the sentinel.
    fn finish(&mut self) -> Vec<F> {
        Vec::new()
    }
}

/// Emits only the unseen suffix of cumulative text.
///
/// Some providers resend the whole output so far in every record; the cursor
/// remembers how much has already gone out. One cursor per stream.
#[derive(Debug, Default)]
pub struct TextCursor {
    emitted: usize,
}

impl TextCursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance<'a>(&mut self, full: &'a str) -> &'a str {
        if full.len() <= self.emitted {
            return "";
        }
        match full.get(self.emitted..) {
            Some(suffix) => {
                self.emitted = full.len();
                suffix
            }
            None => {
                // The text was rewritten under us; resynchronize.
                self.emitted = full.len();
                ""
            }
        }
    }

    #[must_use]
    pub fn emitted(&self) -> usize {
        self.emitted
    }
}

/// Sets the role on the first chunk of each choice and clears it afterwards.
#[derive(Debug, Default)]
struct RoleGate {
    seen: HashSet<u32>,
}

impl RoleGate {
    fn apply(&mut self, chunk: &mut ChatCompletionChunk) {
        for choice in &mut chunk.choices {
            if self.seen.insert(choice.index) {
                choice
                    .delta
                    .role
                    .get_or_insert_with(|| "assistant".to_string());
            } else {
                choice.delta.role = None;
            }
        }
    }
}

fn sse_frame<F: Serialize>(frame: &F) -> Result<Bytes> {
    let json = serde_json::to_string(frame)?;
    Ok(Bytes::from(format!("data: {json}\n\n")))
}

type RecordStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Split an upstream body into native records.
pub fn records(upstream: ByteStream, framing: Framing) -> RecordStream {
    match framing {
        Framing::Sse => Box::pin(lines(upstream).filter_map(|line| async move {
            match line {
                Ok(line) => sse_data(&line).map(|d| Ok(d.to_string())),
                Err(e) => Some(Err(e)),
            }
        })),
        Framing::NdJson => Box::pin(lines(upstream).filter_map(|line| async move {
            match line {
                Ok(line) if line.trim().is_empty() => None,
                Ok(line) => Some(Ok(line.trim().to_string())),
                Err(e) => Some(Err(e)),
            }
        })),
        Framing::JsonArray => Box::pin(json_objects(upstream)),
    }
}

/// Payload of an SSE `data:` line; `None` for blank lines, comments, and the
/// other SSE fields.
fn sse_data(line: &str) -> Option<&str> {
    let line = line.trim_end_matches(['\r', '\n']);
    let data = line.strip_prefix("data:")?;
    let data = data.strip_prefix(' ').unwrap_or(data).trim();
    if data.is_empty() {
        None
    } else {
        Some(data)
    }
}

fn lines(mut upstream: ByteStream) -> impl Stream<Item = Result<String>> + Send {
    async_stream::stream! {
        let mut buf: Vec<u8> = Vec::new();
        let mut scanned = 0usize;
        let mut failed = false;

        'read: while let Some(chunk) = upstream.next().await {
            let chunk = match chunk {
                Ok(c) => c,
                Err(e) => {
                    yield Err(e);
                    failed = true;
                    break 'read;
                }
            };
            buf.extend_from_slice(&chunk);

            while let Some(offset) = buf[scanned..].iter().position(|b| *b == b'\n') {
                let end = scanned + offset;
                let line = String::from_utf8_lossy(&buf[..end]).trim_end_matches('\r').to_string();
                buf.drain(..=end);
                scanned = 0;
                yield Ok(line);
            }
            scanned = buf.len();

            if buf.len() > MAX_RECORD_BYTES {
                yield Err(RelayError::decode(format!(
                    "record exceeds {MAX_RECORD_BYTES} bytes without a line break"
                )));
                failed = true;
                break 'read;
            }
        }

        if !failed && !buf.is_empty() {
            yield Ok(String::from_utf8_lossy(&buf).to_string());
        }
    }
}

/// Incremental splitter for top-level JSON objects, tracking brace depth
/// outside string literals.
#[derive(Debug, Default)]
struct ObjectSplitter {
    current: Vec<u8>,
    depth: usize,
    in_string: bool,
    escaped: bool,
}

impl ObjectSplitter {
    fn feed(&mut self, bytes: &[u8], out: &mut Vec<Vec<u8>>) -> Result<()> {
        for &b in bytes {
            if self.depth == 0 {
                if b == b'{' {
                    self.depth = 1;
                    self.current.push(b);
                }
                // Array brackets, commas and whitespace between elements.
                continue;
            }

            self.current.push(b);
            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if b == b'\\' {
                    self.escaped = true;
                } else if b == b'"' {
                    self.in_string = false;
                }
                continue;
            }
            match b {
                b'"' => self.in_string = true,
                b'{' | b'[' => self.depth += 1,
                b'}' | b']' => {
                    self.depth -= 1;
                    if self.depth == 0 {
                        out.push(std::mem::take(&mut self.current));
                    }
                }
                _ => {}
            }

            if self.current.len() > MAX_RECORD_BYTES {
                return Err(RelayError::decode(format!(
                    "record exceeds {MAX_RECORD_BYTES} bytes"
                )));
            }
        }
        Ok(())
    }
}

fn json_objects(mut upstream: ByteStream) -> impl Stream<Item = Result<String>> + Send {
    async_stream::stream! {
        let mut splitter = ObjectSplitter::default();
        let mut ready = Vec::new();

        'read: while let Some(chunk) = upstream.next().await {
            let chunk = match chunk {
                Ok(c) => c,
                Err(e) => {
                    yield Err(e);
                    break 'read;
                }
            };
            let fed = splitter.feed(&chunk, &mut ready);
            for object in ready.drain(..) {
                yield Ok(String::from_utf8_lossy(&object).to_string());
            }
            if let Err(e) = fed {
                yield Err(e);
                break 'read;
            }
        }
    }
}

/// Translate a live upstream body into a canonical chat SSE body.
pub fn translate_stream<D>(
    upstream: ByteStream,
    framing: Framing,
    decoder: D,
    cancel: CancellationToken,
) -> BodyStream
where
    D: RecordDecoder + 'static,
{
    let mut gate = RoleGate::default();
    stream_frames::<ChatCompletionChunk, _, _>(upstream, framing, decoder, cancel, move |chunk| {
        gate.apply(chunk)
    })
}

/// The pump behind [`translate_stream`], for any frame type. `prepare` sees
/// every frame just before it is written.
pub fn stream_frames<F, D, P>(
    upstream: ByteStream,
    framing: Framing,
    decoder: D,
    cancel: CancellationToken,
    mut prepare: P,
) -> BodyStream
where
    F: Serialize + Send + 'static,
    D: RecordDecoder<F> + 'static,
    P: FnMut(&mut F) + Send + 'static,
{
    let mut decoder = decoder;
    Box::pin(async_stream::stream! {
        let mut source = records(upstream, framing);
        let mut clean_eof = false;
        let mut emitted = 0usize;
        let mut skipped = 0usize;

        'pump: loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!("stream cancelled by caller");
                    break 'pump;
                }
                next = source.next() => next,
            };

            let record = match next {
                None => {
                    clean_eof = true;
                    break 'pump;
                }
                Some(Ok(record)) => record,
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "upstream stream failed, closing without sentinel");
                    break 'pump;
                }
            };

            if framing == Framing::Sse && record == "[DONE]" {
                clean_eof = true;
                break 'pump;
            }

            let frames = match decoder.decode(&record) {
                Ok(frames) => frames,
                Err(e) if e.is_skippable_record() => {
                    skipped += 1;
                    tracing::debug!(error = %e, "skipping undecodable record");
                    continue 'pump;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "fatal record, closing without sentinel");
                    break 'pump;
                }
            };

            for mut frame in frames {
                prepare(&mut frame);
                match sse_frame(&frame) {
                    Ok(bytes) => {
                        emitted += 1;
                        yield Ok(bytes);
                    }
                    Err(e) => tracing::warn!(error = %e, "dropping unserializable frame"),
                }
            }
        }

        // Release the upstream connection before the final frames go out.
        drop(source);

        if clean_eof {
            for mut frame in decoder.finish() {
                prepare(&mut frame);
                if let Ok(bytes) = sse_frame(&frame) {
                    emitted += 1;
                    yield Ok(bytes);
                }
            }
            yield Ok(Bytes::from_static(DONE_FRAME));
        }

        tracing::debug!(emitted, skipped, clean_eof, "stream closed");
    })
}

#[derive(Debug, Default)]
struct ChoiceAccumulator {
    content: String,
    reasoning: String,
    tool_calls: Vec<ToolCall>,
    finish_reason: Option<String>,
}

/// Drain an upstream body through a decoder and return every frame it
/// produced, `finish` included. Records are bounded by [`MAX_RECORD_BYTES`].
pub async fn collect_records<F, D>(
    upstream: ByteStream,
    framing: Framing,
    mut decoder: D,
    cancel: &CancellationToken,
) -> Result<Vec<F>>
where
    D: RecordDecoder<F>,
{
    let mut source = records(upstream, framing);
    let mut frames = Vec::new();
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(RelayError::transport("request cancelled while reading upstream body"));
            }
            next = source.next() => next,
        };
        let record = match next {
            None => break,
            Some(record) => record?,
        };
        if framing == Framing::Sse && record == "[DONE]" {
            break;
        }
        match decoder.decode(&record) {
            Ok(decoded) => frames.extend(decoded),
            Err(e) if e.is_skippable_record() => {
                tracing::debug!(error = %e, "skipping undecodable record");
            }
            Err(e) => return Err(e),
        }
    }
    frames.extend(decoder.finish());
    Ok(frames)
}

/// Drain an upstream body through a decoder and fold the chunks into one
/// non-streaming response.
pub async fn collect_completion<D>(
    upstream: ByteStream,
    framing: Framing,
    decoder: D,
    factory: &ChunkFactory,
    cancel: &CancellationToken,
) -> Result<ChatCompletionResponse>
where
    D: RecordDecoder,
{
    let chunks = collect_records(upstream, framing, decoder, cancel).await?;
    let mut choices: BTreeMap<u32, ChoiceAccumulator> = BTreeMap::new();
    let mut usage: Option<Usage> = None;

    for chunk in chunks {
        if chunk.usage.is_some() {
            usage = chunk.usage;
        }
        for choice in chunk.choices {
            let acc = choices.entry(choice.index).or_default();
            if let Some(text) = choice.delta.content {
                acc.content.push_str(&text);
            }
            if let Some(text) = choice.delta.reasoning_content {
                acc.reasoning.push_str(&text);
            }
            // Decoders emit whole calls, never argument fragments.
            for call in choice.delta.tool_calls.unwrap_or_default() {
                match serde_json::from_value::<ToolCall>(call) {
                    Ok(call) => acc.tool_calls.push(call),
                    Err(e) => tracing::debug!(error = %e, "dropping malformed tool call"),
                }
            }
            if choice.finish_reason.is_some() {
                acc.finish_reason = choice.finish_reason;
            }
        }
    }

    if choices.is_empty() {
        choices.insert(0, ChoiceAccumulator::default());
    }

    Ok(ChatCompletionResponse {
        id: factory.id().to_string(),
        object: "chat.completion".to_string(),
        created: factory.created(),
        model: factory.model().to_string(),
        choices: choices
            .into_iter()
            .map(|(index, acc)| Choice {
                index,
                message: ChoiceMessage {
                    role: "assistant".to_string(),
                    content: Some(acc.content),
                    reasoning_content: (!acc.reasoning.is_empty()).then_some(acc.reasoning),
                    tool_calls: (!acc.tool_calls.is_empty()).then_some(acc.tool_calls),
                },
                finish_reason: Some(acc.finish_reason.unwrap_or_else(|| "stop".to_string())),
            })
            .collect(),
        usage,
    })
}

/// Serialize a non-streaming response as a one-shot body.
pub fn json_body<T: serde::Serialize>(value: &T) -> Result<BodyStream> {
    let bytes = Bytes::from(serde_json::to_vec(value)?);
    Ok(Box::pin(futures::stream::once(async move { Ok(bytes) })))
}

//! fal.ai: a queue-backed media API plus an `any-llm` chat endpoint.
//!
//! Image and speech requests are queued and polled inline until the result is
//! ready; video requests are handed to the job tracker. Chat goes to the
//! synchronous host, which streams cumulative output.

use super::{video_metadata, video_status_from_job, Adapter, AdapterResponse, CallContext};
use crate::error::{RelayError, Result};
use crate::jobs::{poll_until_complete, JobTracker, PollOutcome, PollPolicy, Poller};
use crate::transport::HttpEndpoint;
use crate::translate::canonical::{
    ChatCompletionChunk, ChatCompletionRequest, ChunkFactory, ContentPart, Role,
};
use crate::translate::engine::{self, Framing, RecordDecoder, TextCursor};
use crate::translate::media::{
    ImageData, ImageRequest, ImageResponse, ModelList, SpeechRequest, VideoResult,
    VideoStatusRequest, VideoStatusResponse, VideoSubmitRequest, VideoSubmitResponse,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Upper bound on `system_prompt`, in characters.
pub const SYSTEM_PROMPT_LIMIT: usize = 4800;

const CHAT_PATH: &str = "/fal-ai/any-llm/stream";

const PREAMBLE: &str = "Answer only as the assistant. Never speak for or impersonate the user, \
and never include the user's turns in your reply.";

const CHAT_MODELS: &[&str] = &[
    "anthropic/claude-3.7-sonnet",
    "anthropic/claude-3.5-sonnet",
    "anthropic/claude-3-5-haiku",
    "anthropic/claude-3-haiku",
    "google/gemini-pro-1.5",
    "google/gemini-flash-1.5",
    "google/gemini-flash-1.5-8b",
    "google/gemini-2.0-flash-001",
    "meta-llama/llama-3.2-1b-instruct",
    "meta-llama/llama-3.2-3b-instruct",
    "meta-llama/llama-3.1-8b-instruct",
    "meta-llama/llama-3.1-70b-instruct",
    "openai/gpt-4o-mini",
    "openai/gpt-4o",
    "deepseek/deepseek-r1",
    "meta-llama/llama-4-maverick",
    "meta-llama/llama-4-scout",
];

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct LlmRequest {
    model: String,
    prompt: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    system_prompt: String,
    reasoning: bool,
}

#[derive(Debug, Deserialize)]
struct LlmResponse {
    #[serde(default)]
    output: String,
    #[serde(default)]
    reasoning: Option<String>,
    #[serde(default)]
    partial: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueueResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    request_id: String,
    #[serde(default)]
    response_url: String,
    #[serde(default)]
    status_url: String,
    #[serde(default)]
    logs: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct ImageSize {
    width: u32,
    height: u32,
}

#[derive(Debug, Serialize)]
struct ImageInput {
    prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_size: Option<ImageSize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    negative_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_images: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ImageOutput {
    #[serde(default)]
    images: Vec<FalFile>,
    #[serde(default)]
    prompt: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FalFile {
    url: String,
}

#[derive(Debug, Serialize)]
struct SpeechInput {
    prompt: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    voice: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    speed: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct SpeechOutput {
    audio: FalFile,
}

#[derive(Debug, Serialize)]
struct VideoInput {
    prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    resolution: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    negative_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    style: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VideoOutput {
    video: FalFile,
}

// ---------------------------------------------------------------------------
// Prompt packing
// ---------------------------------------------------------------------------

/// `any-llm` takes one prompt and one system prompt, so the conversation is
/// flattened into `role:content` entries. The last entry is always the prompt;
/// earlier entries fill `system_prompt` up to [`SYSTEM_PROMPT_LIMIT`]
/// characters, then spill into the front of the prompt. What fits nowhere is
/// dropped.
fn pack_conversation(req: &ChatCompletionRequest) -> Result<LlmRequest> {
    let entries: Vec<String> = req
        .messages
        .iter()
        .filter_map(|m| {
            let text: String = m
                .content
                .parts()
                .into_iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text),
                    _ => None,
                })
                .collect();
            if text.is_empty() {
                return None;
            }
            let role = match m.role {
                Role::Developer => Role::System,
                other => other,
            };
            Some(format!("{}:{}\n\n", role.as_str(), text))
        })
        .collect();

    let Some((last, earlier)) = entries.split_last() else {
        return Err(RelayError::invalid_request("chat request has no text to send"));
    };

    let mut system = format!("{PREAMBLE}\n\n");
    let mut prefix = String::new();
    let mut dropped = 0usize;
    let mut prompt_budget = SYSTEM_PROMPT_LIMIT.saturating_sub(last.chars().count());
    for entry in earlier {
        let len = entry.chars().count();
        if system.chars().count() + len <= SYSTEM_PROMPT_LIMIT {
            system.push_str(entry);
        } else if len <= prompt_budget {
            prefix.push_str(entry);
            prompt_budget -= len;
        } else {
            dropped += 1;
        }
    }
    if dropped > 0 {
        tracing::warn!(dropped, "conversation too long for fal, dropped earlier messages");
    }

    let prompt = format!("{prefix}{last}");
    Ok(LlmRequest {
        model: req.model.clone(),
        prompt: prompt.trim_end_matches('\n').to_string(),
        system_prompt: system.trim_end_matches('\n').to_string(),
        reasoning: true,
    })
}

// ---------------------------------------------------------------------------
// Chat decoding
// ---------------------------------------------------------------------------

struct LlmDecoder {
    factory: ChunkFactory,
    output: TextCursor,
    reasoning: TextCursor,
    finished: bool,
}

impl LlmDecoder {
    fn new(model: &str) -> Self {
        Self {
            factory: ChunkFactory::new(model),
            output: TextCursor::new(),
            reasoning: TextCursor::new(),
            finished: false,
        }
    }
}

impl RecordDecoder for LlmDecoder {
    fn decode(&mut self, record: &str) -> Result<Vec<ChatCompletionChunk>> {
        let resp: LlmResponse =
            serde_json::from_str(record).map_err(|e| RelayError::decode(e.to_string()))?;
        if let Some(err) = resp.error.filter(|e| !e.is_empty()) {
            return Err(RelayError::transport(format!("fal: {err}")));
        }

        let mut chunks = Vec::new();
        if let Some(ref reasoning) = resp.reasoning {
            let delta = self.reasoning.advance(reasoning);
            if !delta.is_empty() {
                chunks.push(self.factory.reasoning(0, delta));
            }
        }
        let delta = self.output.advance(&resp.output);
        if !delta.is_empty() {
            chunks.push(self.factory.text(0, delta));
        }
        if !resp.partial && !self.finished {
            self.finished = true;
            chunks.push(self.factory.finish(0, "stop", None));
        }
        Ok(chunks)
    }

    fn finish(&mut self) -> Vec<ChatCompletionChunk> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;
        vec![self.factory.finish(0, "stop", None)]
    }
}

// ---------------------------------------------------------------------------
// Queue polling
// ---------------------------------------------------------------------------

fn queue_failure(status: &QueueResponse) -> Option<RelayError> {
    let reason = match status.status.as_str() {
        "FAILED" | "ERROR" => "task failed",
        "CANCELED" | "CANCELLED" => "task was canceled",
        _ => return None,
    };
    Some(match status.logs {
        Some(ref logs) if !logs.is_null() => RelayError::poll_fatal(format!("{reason}: {logs}")),
        _ => RelayError::poll_fatal(reason),
    })
}

/// One look at a queued request's status; on completion, fetch its output.
async fn check_queue(
    endpoint: &HttpEndpoint,
    status_url: &str,
    response_url: &str,
    cancel: &CancellationToken,
) -> Result<PollOutcome> {
    let status: QueueResponse = endpoint.get_absolute(status_url, cancel).await?.json(cancel).await?;
    if let Some(err) = queue_failure(&status) {
        return Err(err);
    }
    if status.status != "COMPLETED" {
        return Ok(PollOutcome::pending());
    }
    let result: serde_json::Value = endpoint.get_absolute(response_url, cancel).await?.json(cancel).await?;
    Ok(PollOutcome::completed(result))
}

/// Tracks one fal video request for the job tracker.
struct VideoPoller {
    endpoint: HttpEndpoint,
    model: String,
    request_id: String,
}

#[async_trait]
impl Poller for VideoPoller {
    async fn poll(&self) -> Result<PollOutcome> {
        let cancel = CancellationToken::new();
        let base = format!("/fal-ai/{}/requests/{}", self.model, self.request_id);
        let status: QueueResponse = self
            .endpoint
            .get(&format!("{base}/status"), &cancel)
            .await?
            .json(&cancel)
            .await?;
        if let Some(err) = queue_failure(&status) {
            return Err(err);
        }
        if status.status != "COMPLETED" {
            return Ok(PollOutcome::pending());
        }
        let output: VideoOutput = self.endpoint.get(&base, &cancel).await?.json(&cancel).await?;
        Ok(PollOutcome::completed(serde_json::to_value(vec![
            VideoResult::single(output.video.url),
        ])?))
    }
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

pub struct FalAdapter {
    queue: HttpEndpoint,
    chat: HttpEndpoint,
    tracker: JobTracker,
    policy: PollPolicy,
}

impl FalAdapter {
    /// `queue` points at the queue host; chat goes to the matching
    /// synchronous host.
    pub fn new(queue: HttpEndpoint, tracker: JobTracker) -> Self {
        let chat = queue.with_base_url(queue.base_url().replace("queue.fal.run", "fal.run"));
        let policy = tracker.options().policy.clone();
        Self {
            queue,
            chat,
            tracker,
            policy,
        }
    }

    async fn enqueue<T: Serialize + Sync>(
        &self,
        model: &str,
        input: &T,
        cancel: &CancellationToken,
    ) -> Result<QueueResponse> {
        self.queue
            .post_json(&format!("/fal-ai/{model}"), input, cancel)
            .await?
            .json(cancel)
            .await
    }

    /// Queue a request and wait for its output.
    async fn run<T: Serialize + Sync>(
        &self,
        model: &str,
        input: &T,
        cancel: &CancellationToken,
    ) -> Result<serde_json::Value> {
        let queued = self.enqueue(model, input, cancel).await?;
        if queued.status_url.is_empty() || queued.response_url.is_empty() {
            return Err(RelayError::decode("fal queue response without status links"));
        }
        tracing::debug!(request_id = %queued.request_id, "fal request queued");
        poll_until_complete(&self.policy, cancel, || {
            check_queue(&self.queue, &queued.status_url, &queued.response_url, cancel)
        })
        .await
    }
}

#[async_trait]
impl Adapter for FalAdapter {
    fn name(&self) -> &str {
        "fal"
    }

    async fn chat_completions(
        &self,
        req: ChatCompletionRequest,
        cx: &CallContext,
    ) -> Result<AdapterResponse> {
        let body = pack_conversation(&req)?;
        let decoder = LlmDecoder::new(&req.model);
        let opened = self.chat.post_json(CHAT_PATH, &body, &cx.cancel).await?;

        if req.is_stream() {
            let stream = engine::translate_stream(opened.body, Framing::Sse, decoder, cx.cancel.clone());
            return Ok(AdapterResponse::event_stream(stream));
        }
        let factory = decoder.factory.clone();
        let response =
            engine::collect_completion(opened.body, Framing::Sse, decoder, &factory, &cx.cancel).await?;
        AdapterResponse::json(&response)
    }

    async fn create_image(&self, req: ImageRequest, cx: &CallContext) -> Result<AdapterResponse> {
        let input = ImageInput {
            prompt: req.prompt.clone(),
            image_size: req.dimensions().map(|(width, height)| ImageSize { width, height }),
            negative_prompt: req.negative_prompt.clone(),
            seed: req.seed,
            num_images: req.n,
        };
        let result = self.run(&req.model, &input, &cx.cancel).await?;
        let output: ImageOutput = serde_json::from_value(result)?;
        let response = ImageResponse {
            created: chrono::Utc::now().timestamp(),
            data: output
                .images
                .into_iter()
                .map(|img| ImageData {
                    url: Some(img.url),
                    b64_json: None,
                    revised_prompt: output.prompt.clone(),
                })
                .collect(),
        };
        AdapterResponse::json(&response)
    }

    async fn speech(&self, req: SpeechRequest, cx: &CallContext) -> Result<AdapterResponse> {
        if req.input.is_empty() {
            return Err(RelayError::invalid_request("speech input is empty"));
        }
        let input = SpeechInput {
            prompt: req.input.clone(),
            voice: req.voice.clone(),
            speed: req.speed,
        };
        let result = self.run(&req.model, &input, &cx.cancel).await?;
        let output: SpeechOutput = serde_json::from_value(result)?;
        let audio = self.queue.fetch_public(&output.audio.url, &cx.cancel).await?;
        Ok(AdapterResponse::relay(audio, cx.cancel.clone()))
    }

    async fn video_submit(
        &self,
        req: VideoSubmitRequest,
        cx: &CallContext,
    ) -> Result<VideoSubmitResponse> {
        let input = VideoInput {
            prompt: req.prompt.clone(),
            resolution: req.image_size.clone(),
            negative_prompt: req.negative_prompt.clone(),
            style: req.style.clone(),
            seed: req.seed,
            image_url: req.image.clone(),
        };
        let queued = self.enqueue(&req.model, &input, &cx.cancel).await?;
        if queued.request_id.is_empty() {
            return Err(RelayError::decode("fal queue response without request_id"));
        }

        let poller: Arc<dyn Poller> = Arc::new(VideoPoller {
            endpoint: self.queue.clone(),
            model: req.model.clone(),
            request_id: queued.request_id.clone(),
        });
        let id = self
            .tracker
            .submit(queued.request_id, poller, video_metadata("fal", &req.model));
        Ok(VideoSubmitResponse { request_id: id })
    }

    async fn video_status(
        &self,
        req: VideoStatusRequest,
        _cx: &CallContext,
    ) -> Result<VideoStatusResponse> {
        video_status_from_job(&req.request_id, self.tracker.get_result(&req.request_id))
    }

    async fn models(&self, _cx: &CallContext) -> Result<ModelList> {
        Ok(ModelList::from_ids(CHAT_MODELS.iter().copied(), "fal"))
    }
}

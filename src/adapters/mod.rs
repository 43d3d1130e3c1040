//! Provider adapters.
//!
//! Every provider implements [`Adapter`], which covers the full canonical
//! operation set. Operations a provider cannot serve keep the default body and
//! report [`RelayError::NotSupported`].

pub mod fal;
pub mod gemini;
pub mod ollama;
pub mod openai_compat;
pub mod volcengine;

use crate::error::{RelayError, Result};
use crate::jobs::{JobSnapshot, JobState};
use crate::providers::Capability;
use crate::transport::{BodyStream, Opened};
use crate::translate::canonical::ChatCompletionRequest;
use crate::translate::engine::json_body;
use crate::translate::media::{
    CompletionRequest, EmbeddingRequest, FormRequest, ImageRequest, ModelList, RerankRequest,
    ResponsesRequest, SpeechRequest, VideoResult, VideoStatus, VideoStatusRequest, VideoStatusResponse,
    VideoSubmitRequest, VideoSubmitResponse,
};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CACHE_CONTROL, CONTENT_TYPE};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

/// Per-request state handed to every adapter call.
#[derive(Debug, Clone)]
pub struct CallContext {
    pub request_id: String,
    /// Fires when the client goes away.
    pub cancel: CancellationToken,
}

impl CallContext {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().simple().to_string(),
            cancel,
        }
    }
}

/// Status, headers and a still-open body for the HTTP surface to forward.
pub struct AdapterResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: BodyStream,
}

impl AdapterResponse {
    pub fn json<T: Serialize>(value: &T) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(Self {
            status: 200,
            headers,
            body: json_body(value)?,
        })
    }

    pub fn event_stream(body: BodyStream) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        Self {
            status: 200,
            headers,
            body,
        }
    }

    /// Forward an upstream response as-is. Only the content type survives;
    /// hop-by-hop and provider bookkeeping headers are dropped.
    pub fn relay(opened: Opened, cancel: CancellationToken) -> Self {
        let mut headers = HeaderMap::new();
        if let Some(ct) = opened.headers.get(CONTENT_TYPE) {
            headers.insert(CONTENT_TYPE, ct.clone());
        }
        let is_sse = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));
        if is_sse {
            headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        }
        Self {
            status: opened.status,
            headers,
            body: opened.into_body(cancel),
        }
    }
}

fn unsupported<T>(capability: Capability) -> Result<T> {
    Err(RelayError::not_supported(capability.operation()))
}

/// The canonical operation set.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Provider name for logs and model ownership.
    fn name(&self) -> &str;

    async fn chat_completions(
        &self,
        _req: ChatCompletionRequest,
        _cx: &CallContext,
    ) -> Result<AdapterResponse> {
        unsupported(Capability::Chat)
    }

    /// Responses API; streamed or not, the provider's body is relayed as-is.
    async fn responses(
        &self,
        _req: ResponsesRequest,
        _cx: &CallContext,
    ) -> Result<AdapterResponse> {
        unsupported(Capability::Responses)
    }

    async fn completions(
        &self,
        _req: CompletionRequest,
        _cx: &CallContext,
    ) -> Result<AdapterResponse> {
        unsupported(Capability::Completions)
    }

    async fn embeddings(
        &self,
        _req: EmbeddingRequest,
        _cx: &CallContext,
    ) -> Result<AdapterResponse> {
        unsupported(Capability::Embeddings)
    }

    async fn rerank(&self, _req: RerankRequest, _cx: &CallContext) -> Result<AdapterResponse> {
        unsupported(Capability::Rerank)
    }

    async fn create_image(&self, _req: ImageRequest, _cx: &CallContext) -> Result<AdapterResponse> {
        unsupported(Capability::ImageGenerate)
    }

    async fn edit_image(&self, _req: FormRequest, _cx: &CallContext) -> Result<AdapterResponse> {
        unsupported(Capability::ImageEdit)
    }

    async fn image_variation(
        &self,
        _req: FormRequest,
        _cx: &CallContext,
    ) -> Result<AdapterResponse> {
        unsupported(Capability::ImageVariation)
    }

    async fn speech(&self, _req: SpeechRequest, _cx: &CallContext) -> Result<AdapterResponse> {
        unsupported(Capability::Speech)
    }

    async fn transcription(
        &self,
        _req: FormRequest,
        _cx: &CallContext,
    ) -> Result<AdapterResponse> {
        unsupported(Capability::Transcription)
    }

    async fn translation(&self, _req: FormRequest, _cx: &CallContext) -> Result<AdapterResponse> {
        unsupported(Capability::Translation)
    }

    /// Start an asynchronous video job. The returned id is local to this relay.
    async fn video_submit(
        &self,
        _req: VideoSubmitRequest,
        _cx: &CallContext,
    ) -> Result<VideoSubmitResponse> {
        unsupported(Capability::VideoSubmit)
    }

    async fn video_status(
        &self,
        _req: VideoStatusRequest,
        _cx: &CallContext,
    ) -> Result<VideoStatusResponse> {
        unsupported(Capability::VideoStatus)
    }

    async fn models(&self, _cx: &CallContext) -> Result<ModelList> {
        unsupported(Capability::Models)
    }
}

/// Canonical status for a tracked video job.
///
/// Completed jobs carry the `Vec<VideoResult>` their poller stored.
pub fn video_status_from_job(request_id: &str, job: Option<JobSnapshot>) -> Result<VideoStatusResponse> {
    let job = job.ok_or_else(|| RelayError::NotFound(format!("no video job '{request_id}'")))?;
    let response = match job.state {
        JobState::Pending => VideoStatusResponse {
            status: VideoStatus::InQueue,
            reason: None,
            results: None,
        },
        JobState::Processing => VideoStatusResponse {
            status: VideoStatus::InProgress,
            reason: None,
            results: None,
        },
        JobState::Completed => VideoStatusResponse {
            status: VideoStatus::Succeed,
            reason: None,
            results: job
                .result
                .and_then(|r| serde_json::from_value::<Vec<VideoResult>>(r).ok()),
        },
        JobState::Failed => VideoStatusResponse {
            status: VideoStatus::Failed,
            reason: job.reason,
            results: None,
        },
    };
    Ok(response)
}

/// Job metadata recorded for every video submission.
pub(crate) fn video_metadata(provider: &str, model: &str) -> std::collections::HashMap<String, String> {
    std::collections::HashMap::from([
        ("provider".to_string(), provider.to_string()),
        ("model".to_string(), model.to_string()),
    ])
}

/// Strip the credential-bearing parts of an upstream error before it is logged.
pub(crate) fn describe(err: &RelayError) -> String {
    match err {
        RelayError::UpstreamStatus { status, .. } => format!("upstream status {status}"),
        other => other.kind().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::HashMap;

    struct Bare;

    #[async_trait]
    impl Adapter for Bare {
        fn name(&self) -> &str {
            "bare"
        }
    }

    fn job(state: JobState, result: Option<serde_json::Value>, reason: Option<&str>) -> JobSnapshot {
        JobSnapshot {
            id: "local".to_string(),
            external_id: "remote".to_string(),
            state,
            result,
            reason: reason.map(str::to_string),
            attempts: 1,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            completed_at: None,
            stopped: state.is_terminal(),
            metadata: HashMap::new(),
            history: vec![JobState::Pending],
        }
    }

    #[tokio::test]
    async fn defaults_report_not_supported() {
        let cx = CallContext::new(CancellationToken::new());
        let err = Bare
            .rerank(
                serde_json::from_str(r#"{"model":"m","query":"q","documents":[]}"#).unwrap(),
                &cx,
            )
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), "not_supported");
        assert!(err.to_string().contains("rerank"));

        let err = Bare.models(&cx).await.unwrap_err();
        assert_eq!(err.kind(), "not_supported");
    }

    #[test]
    fn job_states_map_to_video_statuses() {
        let pending = video_status_from_job("x", Some(job(JobState::Pending, None, None))).unwrap();
        assert_eq!(pending.status, VideoStatus::InQueue);

        let running = video_status_from_job("x", Some(job(JobState::Processing, None, None))).unwrap();
        assert_eq!(running.status, VideoStatus::InProgress);

        let results = serde_json::to_value(vec![VideoResult::single("https://cdn/v.mp4")]).unwrap();
        let done =
            video_status_from_job("x", Some(job(JobState::Completed, Some(results), None))).unwrap();
        assert_eq!(done.status, VideoStatus::Succeed);
        assert_eq!(done.results.unwrap()[0].videos[0].url, "https://cdn/v.mp4");

        let failed =
            video_status_from_job("x", Some(job(JobState::Failed, None, Some("nsfw")))).unwrap();
        assert_eq!(failed.status, VideoStatus::Failed);
        assert_eq!(failed.reason.as_deref(), Some("nsfw"));

        let missing = video_status_from_job("x", None).unwrap_err();
        assert_eq!(missing.kind(), "not_found");
    }
}

//! VolcEngine Ark. Chat and embeddings are OpenAI-compatible; video runs
//! through Ark's content-generation task API.

use super::openai_compat::OpenAiCompatAdapter;
use super::{video_metadata, video_status_from_job, Adapter, AdapterResponse, CallContext};
use crate::error::{RelayError, Result};
use crate::jobs::{JobTracker, PollOutcome, Poller};
use crate::providers::ProviderPreset;
use crate::transport::HttpEndpoint;
use crate::translate::canonical::ChatCompletionRequest;
use crate::translate::media::{
    EmbeddingRequest, VideoResult, VideoStatusRequest, VideoStatusResponse, VideoSubmitRequest,
    VideoSubmitResponse,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const TASKS_PATH: &str = "/contents/generations/tasks";

#[derive(Debug, Serialize)]
struct TaskRequest {
    model: String,
    content: Vec<TaskContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum TaskContent {
    Text { text: String },
    ImageUrl { image_url: TaskImage },
}

#[derive(Debug, Serialize)]
struct TaskImage {
    url: String,
}

#[derive(Debug, Deserialize)]
struct TaskCreated {
    id: String,
}

#[derive(Debug, Deserialize)]
struct TaskStatus {
    status: String,
    #[serde(default)]
    content: Option<TaskOutput>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct TaskOutput {
    #[serde(default)]
    video_url: String,
}

impl TaskRequest {
    fn from_canonical(req: &VideoSubmitRequest) -> Result<Self> {
        let mut content = Vec::new();
        if !req.prompt.is_empty() {
            content.push(TaskContent::Text {
                text: req.prompt.clone(),
            });
        }
        if let Some(ref image) = req.image {
            content.push(TaskContent::ImageUrl {
                image_url: TaskImage { url: image.clone() },
            });
        }
        if content.is_empty() {
            return Err(RelayError::invalid_request(
                "video request needs a prompt or an image",
            ));
        }
        Ok(Self {
            model: req.model.clone(),
            content,
            seed: req.seed,
        })
    }
}

/// Map one Ark task status to a poll outcome.
fn task_outcome(status: TaskStatus) -> Result<PollOutcome> {
    match status.status.as_str() {
        "succeeded" => {
            let url = status.content.map(|c| c.video_url).unwrap_or_default();
            Ok(PollOutcome::completed(serde_json::to_value(vec![
                VideoResult::single(url),
            ])?))
        }
        "failed" | "cancelled" => {
            let reason = match status.error {
                Some(serde_json::Value::Object(ref err)) => err
                    .get("message")
                    .and_then(|m| m.as_str())
                    .map(str::to_string),
                Some(serde_json::Value::String(s)) => Some(s),
                _ => None,
            };
            Err(RelayError::poll_fatal(
                reason.unwrap_or_else(|| format!("task {}", status.status)),
            ))
        }
        _ => Ok(PollOutcome::pending()),
    }
}

pub struct VolcEngineAdapter {
    compat: OpenAiCompatAdapter,
    endpoint: HttpEndpoint,
    preset: &'static ProviderPreset,
    tracker: JobTracker,
}

impl VolcEngineAdapter {
    pub fn new(endpoint: HttpEndpoint, preset: &'static ProviderPreset, tracker: JobTracker) -> Self {
        Self {
            compat: OpenAiCompatAdapter::new(endpoint.clone(), preset, tracker.clone()),
            endpoint,
            preset,
            tracker,
        }
    }
}

#[async_trait]
impl Adapter for VolcEngineAdapter {
    fn name(&self) -> &str {
        self.preset.name
    }

    async fn chat_completions(
        &self,
        req: ChatCompletionRequest,
        cx: &CallContext,
    ) -> Result<AdapterResponse> {
        self.compat.chat_completions(req, cx).await
    }

    async fn embeddings(&self, req: EmbeddingRequest, cx: &CallContext) -> Result<AdapterResponse> {
        self.compat.embeddings(req, cx).await
    }

    async fn video_submit(
        &self,
        req: VideoSubmitRequest,
        cx: &CallContext,
    ) -> Result<VideoSubmitResponse> {
        let task = TaskRequest::from_canonical(&req)?;
        let created: TaskCreated = self
            .endpoint
            .post_json(TASKS_PATH, &task, &cx.cancel)
            .await?
            .json(&cx.cancel)
            .await?;

        let endpoint = self.endpoint.clone();
        let task_id = created.id.clone();
        let poller: Arc<dyn Poller> = Arc::new(move || {
            let endpoint = endpoint.clone();
            let path = format!("{TASKS_PATH}/{task_id}");
            async move {
                let cancel = CancellationToken::new();
                let status: TaskStatus = endpoint.get(&path, &cancel).await?.json(&cancel).await?;
                task_outcome(status)
            }
        });

        let id = self
            .tracker
            .submit(created.id, poller, video_metadata(self.preset.name, &req.model));
        Ok(VideoSubmitResponse { request_id: id })
    }

    async fn video_status(
        &self,
        req: VideoStatusRequest,
        _cx: &CallContext,
    ) -> Result<VideoStatusResponse> {
        video_status_from_job(&req.request_id, self.tracker.get_result(&req.request_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(raw: &str) -> TaskStatus {
        serde_json::from_str(raw).unwrap()
    }

    #[test]
    fn task_request_carries_text_and_image() {
        let req: VideoSubmitRequest = serde_json::from_str(
            r#"{"model":"seedance","prompt":"waves","image":"https://x/first.png","seed":7}"#,
        )
        .unwrap();
        let body = serde_json::to_value(TaskRequest::from_canonical(&req).unwrap()).unwrap();
        assert_eq!(body["content"][0], serde_json::json!({"type":"text","text":"waves"}));
        assert_eq!(body["content"][1]["image_url"]["url"], "https://x/first.png");
        assert_eq!(body["seed"], 7);
    }

    #[test]
    fn empty_video_request_is_rejected() {
        let req: VideoSubmitRequest = serde_json::from_str(r#"{"model":"m","prompt":""}"#).unwrap();
        assert_eq!(
            TaskRequest::from_canonical(&req).unwrap_err().kind(),
            "invalid_request_error"
        );
    }

    #[test]
    fn task_statuses_map_to_outcomes() {
        let done = task_outcome(status(
            r#"{"id":"t","status":"succeeded","content":{"video_url":"https://cdn/v.mp4"}}"#,
        ))
        .unwrap();
        assert!(done.completed);
        assert_eq!(done.result.unwrap()[0]["videos"][0]["url"], "https://cdn/v.mp4");

        let running = task_outcome(status(r#"{"id":"t","status":"running"}"#)).unwrap();
        assert!(!running.completed);

        let failed = task_outcome(status(
            r#"{"id":"t","status":"failed","error":{"code":"x","message":"sensitive content"}}"#,
        ))
        .unwrap_err();
        assert_eq!(failed.to_string(), "Task failed: sensitive content");

        let cancelled = task_outcome(status(r#"{"id":"t","status":"cancelled"}"#)).unwrap_err();
        assert_eq!(cancelled.kind(), "poll_fatal");
    }
}

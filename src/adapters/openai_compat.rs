//! OpenAI-compatible providers: requests already speak the canonical schema,
//! so every operation is a passthrough to the matching provider path.

use super::{video_metadata, video_status_from_job, Adapter, AdapterResponse, CallContext};
use crate::error::{RelayError, Result};
use crate::jobs::{JobTracker, PollOutcome, Poller};
use crate::providers::ProviderPreset;
use crate::transport::HttpEndpoint;
use crate::translate::canonical::ChatCompletionRequest;
use crate::translate::media::{
    CompletionRequest, EmbeddingRequest, FormRequest, ImageRequest, ModelList, RerankRequest,
    ResponsesRequest, SpeechRequest, VideoResult, VideoStatus, VideoStatusRequest, VideoStatusResponse,
    VideoSubmitRequest, VideoSubmitResponse,
};

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct OpenAiCompatAdapter {
    endpoint: HttpEndpoint,
    preset: &'static ProviderPreset,
    tracker: JobTracker,
}

impl OpenAiCompatAdapter {
    pub fn new(endpoint: HttpEndpoint, preset: &'static ProviderPreset, tracker: JobTracker) -> Self {
        Self {
            endpoint,
            preset,
            tracker,
        }
    }

    async fn forward_json<T: Serialize + Sync>(
        &self,
        path: &str,
        body: &T,
        cx: &CallContext,
    ) -> Result<AdapterResponse> {
        let opened = self.endpoint.post_json(path, body, &cx.cancel).await?;
        Ok(AdapterResponse::relay(opened, cx.cancel.clone()))
    }

    async fn forward_form(
        &self,
        path: &str,
        req: &FormRequest,
        cx: &CallContext,
    ) -> Result<AdapterResponse> {
        let opened = self
            .endpoint
            .post_form(path, req.to_multipart()?, &cx.cancel)
            .await?;
        Ok(AdapterResponse::relay(opened, cx.cancel.clone()))
    }
}

#[async_trait]
impl Adapter for OpenAiCompatAdapter {
    fn name(&self) -> &str {
        self.preset.name
    }

    async fn chat_completions(
        &self,
        req: ChatCompletionRequest,
        cx: &CallContext,
    ) -> Result<AdapterResponse> {
        self.forward_json("/chat/completions", &req, cx).await
    }

    async fn completions(&self, req: CompletionRequest, cx: &CallContext) -> Result<AdapterResponse> {
        self.forward_json(self.preset.completions_path, &req, cx).await
    }

    async fn responses(&self, req: ResponsesRequest, cx: &CallContext) -> Result<AdapterResponse> {
        self.forward_json("/responses", &req, cx).await
    }

    async fn embeddings(&self, req: EmbeddingRequest, cx: &CallContext) -> Result<AdapterResponse> {
        self.forward_json("/embeddings", &req, cx).await
    }

    async fn rerank(&self, req: RerankRequest, cx: &CallContext) -> Result<AdapterResponse> {
        self.forward_json("/rerank", &req, cx).await
    }

    async fn create_image(&self, req: ImageRequest, cx: &CallContext) -> Result<AdapterResponse> {
        self.forward_json("/images/generations", &req, cx).await
    }

    async fn edit_image(&self, req: FormRequest, cx: &CallContext) -> Result<AdapterResponse> {
        req.require(&["prompt"], &["image"])?;
        self.forward_form("/images/edits", &req, cx).await
    }

    async fn image_variation(&self, req: FormRequest, cx: &CallContext) -> Result<AdapterResponse> {
        req.require(&[], &["image"])?;
        self.forward_form("/images/variations", &req, cx).await
    }

    async fn speech(&self, req: SpeechRequest, cx: &CallContext) -> Result<AdapterResponse> {
        self.forward_json("/audio/speech", &req, cx).await
    }

    async fn transcription(&self, req: FormRequest, cx: &CallContext) -> Result<AdapterResponse> {
        req.require(&["model"], &["file"])?;
        self.forward_form("/audio/transcriptions", &req, cx).await
    }

    async fn translation(&self, req: FormRequest, cx: &CallContext) -> Result<AdapterResponse> {
        req.require(&["model"], &["file"])?;
        self.forward_form("/audio/translations", &req, cx).await
    }

    async fn video_submit(
        &self,
        req: VideoSubmitRequest,
        cx: &CallContext,
    ) -> Result<VideoSubmitResponse> {
        let submitted: VideoSubmitResponse = self
            .endpoint
            .post_json("/videos/submit", &req, &cx.cancel)
            .await?
            .json(&cx.cancel)
            .await?;

        let poller: Arc<dyn Poller> = Arc::new(VideoStatusPoller {
            endpoint: self.endpoint.clone(),
            request_id: submitted.request_id.clone(),
        });
        let id = self.tracker.submit(
            submitted.request_id,
            poller,
            video_metadata(self.preset.name, &req.model),
        );
        Ok(VideoSubmitResponse { request_id: id })
    }

    async fn video_status(
        &self,
        req: VideoStatusRequest,
        _cx: &CallContext,
    ) -> Result<VideoStatusResponse> {
        video_status_from_job(&req.request_id, self.tracker.get_result(&req.request_id))
    }

    async fn models(&self, cx: &CallContext) -> Result<ModelList> {
        let mut list: ModelList = self.endpoint.get("/models", &cx.cancel).await?.json(&cx.cancel).await?;
        for card in &mut list.data {
            if card.owned_by.is_empty() {
                card.owned_by = self.preset.name.to_string();
            }
        }
        Ok(list)
    }
}

/// Polls the provider's own `/videos/status` endpoint for one request.
struct VideoStatusPoller {
    endpoint: HttpEndpoint,
    request_id: String,
}

#[async_trait]
impl Poller for VideoStatusPoller {
    async fn poll(&self) -> Result<PollOutcome> {
        // Tracker polls run detached from any client request.
        let cancel = CancellationToken::new();
        let status: VideoStatusResponse = self
            .endpoint
            .post_json(
                "/videos/status",
                &VideoStatusRequest {
                    request_id: self.request_id.clone(),
                },
                &cancel,
            )
            .await?
            .json(&cancel)
            .await?;

        match status.status {
            VideoStatus::Succeed => Ok(PollOutcome::completed(serde_json::to_value(
                status.results.unwrap_or_else(Vec::<VideoResult>::new),
            )?)),
            VideoStatus::Failed => Err(RelayError::poll_fatal(
                status.reason.unwrap_or_else(|| "video generation failed".to_string()),
            )),
            VideoStatus::InQueue | VideoStatus::InProgress => Ok(PollOutcome::pending()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::TrackerOptions;
    use crate::providers::{AuthScheme, Credential};
    use crate::transport::Transport;
    use futures::StreamExt;
    use crate::translate::media::UploadFile;
    use wiremock::matchers::{body_partial_json, body_string_contains, header, header_regex, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn adapter(server: &MockServer) -> OpenAiCompatAdapter {
        let endpoint = HttpEndpoint::new(
            Transport::new(reqwest::Client::new()),
            format!("{}/v1", server.uri()),
            Credential::new(AuthScheme::Bearer, "sk-test"),
        );
        let preset = ProviderPreset::from_name("siliconflow").unwrap();
        OpenAiCompatAdapter::new(endpoint, preset, JobTracker::new(TrackerOptions::default()))
    }

    #[tokio::test]
    async fn chat_forwards_unknown_fields_and_credential() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(serde_json::json!({"logit_bias": {"7": 1}})))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "application/json")
                    .set_body_string(r#"{"id":"x","object":"chat.completion","choices":[]}"#),
            )
            .mount(&server)
            .await;

        let req: ChatCompletionRequest = serde_json::from_str(
            r#"{"model":"m","messages":[{"role":"user","content":"hi"}],"logit_bias":{"7":1}}"#,
        )
        .unwrap();
        let cx = CallContext::new(CancellationToken::new());
        let resp = adapter(&server).chat_completions(req, &cx).await.ok().unwrap();
        assert_eq!(resp.status, 200);
        let body: Vec<_> = resp.body.collect().await;
        assert!(String::from_utf8_lossy(&body[0].as_ref().unwrap()[..]).contains("chat.completion"));
    }

    #[tokio::test]
    async fn upstream_errors_keep_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
            .mount(&server)
            .await;

        let req: EmbeddingRequest = serde_json::from_str(r#"{"model":"e","input":"x"}"#).unwrap();
        let cx = CallContext::new(CancellationToken::new());
        let err = adapter(&server).embeddings(req, &cx).await.err().unwrap();
        assert_eq!(err.status_code(), 429);
        assert!(err.to_string().contains("rate limited"));
    }

    #[tokio::test]
    async fn video_submit_returns_a_local_job_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/videos/submit"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"requestId": "sf-123"})))
            .mount(&server)
            .await;

        let adapter = adapter(&server);
        let cx = CallContext::new(CancellationToken::new());
        let req: VideoSubmitRequest =
            serde_json::from_str(r#"{"model":"wan","prompt":"a cat surfing"}"#).unwrap();
        let submitted = adapter.video_submit(req, &cx).await.unwrap();
        assert_ne!(submitted.request_id, "sf-123");

        let status = adapter
            .video_status(
                VideoStatusRequest {
                    request_id: submitted.request_id.clone(),
                },
                &cx,
            )
            .await
            .unwrap();
        assert!(matches!(status.status, VideoStatus::InQueue | VideoStatus::InProgress));
        assert_eq!(
            adapter.tracker.get_result(&submitted.request_id).unwrap().external_id,
            "sf-123"
        );
        adapter.tracker.shutdown();
    }

    fn image_form(prompt: Option<&str>, with_image: bool) -> FormRequest {
        let mut form = FormRequest::default();
        form.fields.push(("model".to_string(), "dall-e-2".to_string()));
        if let Some(prompt) = prompt {
            form.fields.push(("prompt".to_string(), prompt.to_string()));
        }
        if with_image {
            form.files.push(UploadFile {
                field: "image".to_string(),
                filename: "cat.png".to_string(),
                content_type: Some("image/png".to_string()),
                bytes: bytes::Bytes::from_static(b"PNGDATA"),
            });
        }
        form
    }

    #[tokio::test]
    async fn image_edit_is_reencoded_as_multipart() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/images/edits"))
            .and(header("authorization", "Bearer sk-test"))
            .and(header_regex("content-type", "^multipart/form-data; boundary="))
            .and(body_string_contains("add a hat"))
            .and(body_string_contains("filename=\"cat.png\""))
            .and(body_string_contains("PNGDATA"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "application/json")
                    .set_body_string(r#"{"data":[{"url":"https://cdn/edit.png"}]}"#),
            )
            .expect(1)
            .mount(&server)
            .await;

        let cx = CallContext::new(CancellationToken::new());
        let resp = adapter(&server)
            .edit_image(image_form(Some("add a hat"), true), &cx)
            .await
            .ok()
            .unwrap();
        assert_eq!(resp.status, 200);
        let body: Vec<_> = resp.body.collect().await;
        assert!(String::from_utf8_lossy(&body[0].as_ref().unwrap()[..]).contains("edit.png"));
    }

    #[tokio::test]
    async fn image_variation_forwards_the_upload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/images/variations"))
            .and(body_string_contains("PNGDATA"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"data":[]}"#))
            .expect(1)
            .mount(&server)
            .await;

        let cx = CallContext::new(CancellationToken::new());
        let resp = adapter(&server)
            .image_variation(image_form(None, true), &cx)
            .await
            .ok()
            .unwrap();
        assert_eq!(resp.status, 200);
    }

    #[tokio::test]
    async fn image_forms_missing_parts_never_reach_the_provider() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let cx = CallContext::new(CancellationToken::new());
        let adapter = adapter(&server);

        let err = adapter.edit_image(image_form(Some("add a hat"), false), &cx).await.err().unwrap();
        assert_eq!(err.status_code(), 400);
        assert!(err.to_string().contains("image"));

        let err = adapter.edit_image(image_form(None, true), &cx).await.err().unwrap();
        assert_eq!(err.status_code(), 400);
        assert!(err.to_string().contains("prompt"));

        let err = adapter.image_variation(image_form(None, false), &cx).await.err().unwrap();
        assert_eq!(err.status_code(), 400);
    }
}

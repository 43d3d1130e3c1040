//! Request dispatch: picks the adapter for the configured provider once, then
//! gates every call on the provider's capability set and applies model aliases.

use crate::adapters::fal::FalAdapter;
use crate::adapters::gemini::GeminiAdapter;
use crate::adapters::ollama::OllamaAdapter;
use crate::adapters::openai_compat::OpenAiCompatAdapter;
use crate::adapters::volcengine::VolcEngineAdapter;
use crate::adapters::{describe, Adapter, AdapterResponse, CallContext};
use crate::config::RelayConfig;
use crate::error::{RelayError, Result};
use crate::jobs::JobTracker;
use crate::logging::{LogEntry, LogLevel, SharedLogger};
use crate::providers::{Capability, Credential, ProviderKind, ProviderPreset};
use crate::transport::{HttpEndpoint, Transport};
use crate::translate::canonical::ChatCompletionRequest;
use crate::translate::media::{
    CompletionRequest, EmbeddingRequest, FormRequest, ImageRequest, ModelCard, ModelList,
    RerankRequest, ResponsesRequest, SpeechRequest, VideoStatusRequest, VideoStatusResponse, VideoSubmitRequest,
    VideoSubmitResponse,
};

use std::sync::Arc;

/// Everything a relay needs, built once in `main` and passed down explicitly.
#[derive(Clone)]
pub struct RelayContext {
    pub config: Arc<RelayConfig>,
    pub client: reqwest::Client,
    pub tracker: JobTracker,
    pub logger: SharedLogger,
}

/// Build the adapter for `preset`, talking to `endpoint`.
pub fn build_adapter(
    preset: &'static ProviderPreset,
    endpoint: HttpEndpoint,
    tracker: &JobTracker,
) -> Arc<dyn Adapter> {
    match preset.kind {
        ProviderKind::OpenAiCompatible => {
            Arc::new(OpenAiCompatAdapter::new(endpoint, preset, tracker.clone()))
        }
        ProviderKind::OllamaNative => Arc::new(OllamaAdapter::new(endpoint)),
        ProviderKind::GeminiNative => Arc::new(GeminiAdapter::new(endpoint)),
        ProviderKind::Fal => Arc::new(FalAdapter::new(endpoint, tracker.clone())),
        ProviderKind::VolcEngine => {
            Arc::new(VolcEngineAdapter::new(endpoint, preset, tracker.clone()))
        }
    }
}

pub struct Relay {
    ctx: RelayContext,
    preset: &'static ProviderPreset,
    adapter: Arc<dyn Adapter>,
}

impl Relay {
    /// Resolve the provider and its credential from the configuration.
    pub fn new(ctx: RelayContext) -> Result<Self> {
        let credential = ctx.config.resolve_credential()?;
        Self::with_credential(ctx, credential)
    }

    pub fn with_credential(ctx: RelayContext, credential: Credential) -> Result<Self> {
        let preset = ctx.config.preset()?;
        let base_url = ctx.config.effective_base_url()?;
        ctx.logger.add_secret(credential.secret());

        let endpoint = HttpEndpoint::new(Transport::new(ctx.client.clone()), base_url, credential);
        let adapter = build_adapter(preset, endpoint, &ctx.tracker);
        Ok(Self {
            ctx,
            preset,
            adapter,
        })
    }

    #[must_use]
    pub fn preset(&self) -> &'static ProviderPreset {
        self.preset
    }

    #[must_use]
    pub fn tracker(&self) -> &JobTracker {
        &self.ctx.tracker
    }

    #[must_use]
    pub fn logger(&self) -> &SharedLogger {
        &self.ctx.logger
    }

    #[must_use]
    pub fn config(&self) -> &RelayConfig {
        &self.ctx.config
    }

    fn gate(&self, capability: Capability) -> Result<()> {
        if self.preset.supports(capability) {
            Ok(())
        } else {
            Err(RelayError::not_supported(capability.operation()))
        }
    }

    fn begin(&self, capability: Capability, model: &str, cx: &CallContext) -> Result<()> {
        self.gate(capability)?;
        self.ctx.logger.log(
            LogEntry::new(
                LogLevel::Info,
                "dispatch",
                format!(
                    "{} provider={} model={}",
                    capability.operation(),
                    self.adapter.name(),
                    model
                ),
            )
            .with_request_id(&cx.request_id),
        );
        Ok(())
    }

    fn finish<T>(&self, capability: Capability, cx: &CallContext, result: Result<T>) -> Result<T> {
        if let Err(ref e) = result {
            let level = if e.status_code() >= 500 {
                LogLevel::Error
            } else {
                LogLevel::Warn
            };
            self.ctx.logger.log(
                LogEntry::new(
                    level,
                    "dispatch",
                    format!("{} failed: {}", capability.operation(), describe(e)),
                )
                .with_request_id(&cx.request_id),
            );
        }
        result
    }

    fn alias(&self, model: &str) -> String {
        self.ctx.config.map_model(model)
    }

    fn alias_form(&self, req: &mut FormRequest) {
        if let Some(model) = req.model().map(|m| self.alias(m)) {
            req.set_field("model", model);
        }
    }

    pub async fn chat_completions(
        &self,
        mut req: ChatCompletionRequest,
        cx: &CallContext,
    ) -> Result<AdapterResponse> {
        req.model = self.alias(&req.model);
        self.begin(Capability::Chat, &req.model, cx)?;
        let result = self.adapter.chat_completions(req, cx).await;
        self.finish(Capability::Chat, cx, result)
    }

    pub async fn completions(
        &self,
        mut req: CompletionRequest,
        cx: &CallContext,
    ) -> Result<AdapterResponse> {
        req.model = self.alias(&req.model);
        self.begin(Capability::Completions, &req.model, cx)?;
        let result = self.adapter.completions(req, cx).await;
        self.finish(Capability::Completions, cx, result)
    }

    pub async fn responses(
        &self,
        mut req: ResponsesRequest,
        cx: &CallContext,
    ) -> Result<AdapterResponse> {
        req.model = self.alias(&req.model);
        self.begin(Capability::Responses, &req.model, cx)?;
        let result = self.adapter.responses(req, cx).await;
        self.finish(Capability::Responses, cx, result)
    }

    pub async fn embeddings(
        &self,
        mut req: EmbeddingRequest,
        cx: &CallContext,
    ) -> Result<AdapterResponse> {
        req.model = self.alias(&req.model);
        self.begin(Capability::Embeddings, &req.model, cx)?;
        let result = self.adapter.embeddings(req, cx).await;
        self.finish(Capability::Embeddings, cx, result)
    }

    pub async fn rerank(&self, mut req: RerankRequest, cx: &CallContext) -> Result<AdapterResponse> {
        req.model = self.alias(&req.model);
        self.begin(Capability::Rerank, &req.model, cx)?;
        let result = self.adapter.rerank(req, cx).await;
        self.finish(Capability::Rerank, cx, result)
    }

    pub async fn create_image(
        &self,
        mut req: ImageRequest,
        cx: &CallContext,
    ) -> Result<AdapterResponse> {
        req.model = self.alias(&req.model);
        self.begin(Capability::ImageGenerate, &req.model, cx)?;
        let result = self.adapter.create_image(req, cx).await;
        self.finish(Capability::ImageGenerate, cx, result)
    }

    pub async fn edit_image(&self, mut req: FormRequest, cx: &CallContext) -> Result<AdapterResponse> {
        self.alias_form(&mut req);
        self.begin(Capability::ImageEdit, req.model().unwrap_or("-"), cx)?;
        let result = self.adapter.edit_image(req, cx).await;
        self.finish(Capability::ImageEdit, cx, result)
    }

    pub async fn image_variation(
        &self,
        mut req: FormRequest,
        cx: &CallContext,
    ) -> Result<AdapterResponse> {
        self.alias_form(&mut req);
        self.begin(Capability::ImageVariation, req.model().unwrap_or("-"), cx)?;
        let result = self.adapter.image_variation(req, cx).await;
        self.finish(Capability::ImageVariation, cx, result)
    }

    pub async fn speech(&self, mut req: SpeechRequest, cx: &CallContext) -> Result<AdapterResponse> {
        req.model = self.alias(&req.model);
        self.begin(Capability::Speech, &req.model, cx)?;
        let result = self.adapter.speech(req, cx).await;
        self.finish(Capability::Speech, cx, result)
    }

    pub async fn transcription(
        &self,
        mut req: FormRequest,
        cx: &CallContext,
    ) -> Result<AdapterResponse> {
        self.alias_form(&mut req);
        self.begin(Capability::Transcription, req.model().unwrap_or("-"), cx)?;
        let result = self.adapter.transcription(req, cx).await;
        self.finish(Capability::Transcription, cx, result)
    }

    pub async fn translation(
        &self,
        mut req: FormRequest,
        cx: &CallContext,
    ) -> Result<AdapterResponse> {
        self.alias_form(&mut req);
        self.begin(Capability::Translation, req.model().unwrap_or("-"), cx)?;
        let result = self.adapter.translation(req, cx).await;
        self.finish(Capability::Translation, cx, result)
    }

    pub async fn video_submit(
        &self,
        mut req: VideoSubmitRequest,
        cx: &CallContext,
    ) -> Result<VideoSubmitResponse> {
        req.model = self.alias(&req.model);
        self.begin(Capability::VideoSubmit, &req.model, cx)?;
        let result = self.adapter.video_submit(req, cx).await;
        if let Ok(ref submitted) = result {
            self.ctx.logger.log(
                LogEntry::new(LogLevel::Info, "dispatch", "video job submitted")
                    .with_request_id(&cx.request_id)
                    .with_context(serde_json::json!({ "job": submitted.request_id })),
            );
        }
        self.finish(Capability::VideoSubmit, cx, result)
    }

    pub async fn video_status(
        &self,
        req: VideoStatusRequest,
        cx: &CallContext,
    ) -> Result<VideoStatusResponse> {
        self.gate(Capability::VideoStatus)?;
        let result = self.adapter.video_status(req, cx).await;
        self.finish(Capability::VideoStatus, cx, result)
    }

    /// The provider's model list plus every configured alias. Providers
    /// without a listing still report their aliases.
    pub async fn models(&self, cx: &CallContext) -> Result<ModelList> {
        let mut list = if self.preset.supports(Capability::Models) {
            let result = self.adapter.models(cx).await;
            self.finish(Capability::Models, cx, result)?
        } else if self.ctx.config.models.is_empty() {
            return Err(RelayError::not_supported(Capability::Models.operation()));
        } else {
            ModelList::from_ids(Vec::<String>::new(), self.preset.name)
        };

        let mut aliases: Vec<&String> = self.ctx.config.models.keys().collect();
        aliases.sort();
        for alias in aliases {
            if !list.data.iter().any(|card| &card.id == alias) {
                list.data.push(ModelCard {
                    id: alias.clone(),
                    object: "model".to_string(),
                    created: 0,
                    owned_by: self.preset.name.to_string(),
                });
            }
        }
        Ok(list)
    }
}

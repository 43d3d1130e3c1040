//! Ollama's native API (`/api/chat`, `/api/generate`, `/api/embed`,
//! `/api/tags`). Responses are newline-delimited JSON, streamed or not.

use super::{Adapter, AdapterResponse, CallContext};
use crate::error::{RelayError, Result};
use crate::transport::HttpEndpoint;
use crate::translate::canonical::{
    ChatCompletionChunk, ChatCompletionRequest, ChatMessage, ChatTool, ChunkChoice, ChunkDelta,
    ChunkFactory, ContentPart, DataUrl, Role, ToolCall, Usage,
};
use crate::translate::engine::{self, Framing, RecordDecoder};
use crate::translate::media::{
    CompletionRequest, CompletionResponse, EmbeddingData, EmbeddingRequest, EmbeddingResponse,
    EmbeddingUsage, ModelList,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Native wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct NativeChatRequest {
    model: String,
    messages: Vec<NativeMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ChatTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Options::is_empty")]
    options: Options,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct NativeMessage {
    role: String,
    #[serde(default)]
    content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    images: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<NativeToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    thinking: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct NativeToolCall {
    function: NativeFunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct NativeFunctionCall {
    name: String,
    #[serde(default)]
    arguments: serde_json::Value,
}

#[derive(Debug, Default, Serialize)]
struct Options {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    presence_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    frequency_penalty: Option<f64>,
}

impl Options {
    fn is_empty(&self) -> bool {
        self.temperature.is_none()
            && self.top_p.is_none()
            && self.seed.is_none()
            && self.num_predict.is_none()
            && self.stop.is_none()
            && self.presence_penalty.is_none()
            && self.frequency_penalty.is_none()
    }
}

#[derive(Debug, Serialize)]
struct NativeGenerateRequest {
    model: String,
    prompt: String,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    suffix: Option<String>,
    #[serde(skip_serializing_if = "Options::is_empty")]
    options: Options,
}

/// One NDJSON record from `/api/chat` or `/api/generate`.
#[derive(Debug, Deserialize)]
struct NativeRecord {
    #[serde(default)]
    message: Option<NativeMessage>,
    #[serde(default)]
    response: Option<String>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    prompt_eval_count: u64,
    #[serde(default)]
    eval_count: u64,
    #[serde(default)]
    error: Option<String>,
}

impl NativeRecord {
    fn parse(record: &str) -> Result<Self> {
        let parsed: Self =
            serde_json::from_str(record).map_err(|e| RelayError::decode(e.to_string()))?;
        if let Some(ref message) = parsed.error {
            return Err(RelayError::transport(format!("ollama: {message}")));
        }
        Ok(parsed)
    }

    fn usage(&self) -> Usage {
        Usage::new(self.prompt_eval_count, self.eval_count)
    }

    fn finish_reason(&self) -> String {
        match self.done_reason.as_deref() {
            Some("length") => "length".to_string(),
            _ => "stop".to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct NativeEmbedRequest<'a> {
    model: &'a str,
    input: &'a serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct NativeEmbedResponse {
    #[serde(default)]
    model: String,
    embeddings: Vec<Vec<f32>>,
    #[serde(default)]
    prompt_eval_count: u64,
}

#[derive(Debug, Deserialize)]
struct NativeTags {
    models: Vec<NativeModel>,
}

#[derive(Debug, Deserialize)]
struct NativeModel {
    name: String,
}

// ---------------------------------------------------------------------------
// Request translation
// ---------------------------------------------------------------------------

fn native_message(msg: &ChatMessage) -> NativeMessage {
    let mut content = String::new();
    let mut images = Vec::new();
    for part in msg.content.parts() {
        match part {
            ContentPart::Text { text } => content.push_str(&text),
            ContentPart::ImageUrl { image_url } => match DataUrl::parse(&image_url.url) {
                Some(data) => images.push(data.data.to_string()),
                None => tracing::debug!(url = %image_url.url, "ollama only accepts inline images, skipping remote url"),
            },
            ContentPart::InputAudio { .. } | ContentPart::File { .. } => {
                tracing::debug!(role = msg.role.as_str(), "ollama has no audio or file input, part skipped");
            }
        }
    }

    let tool_calls = msg
        .tool_calls
        .iter()
        .flatten()
        .map(|call| NativeToolCall {
            function: NativeFunctionCall {
                name: call.function.name.clone(),
                arguments: serde_json::from_str(&call.function.arguments)
                    .unwrap_or_else(|_| serde_json::Value::String(call.function.arguments.clone())),
            },
        })
        .collect();

    let role = match msg.role {
        Role::Developer => Role::System,
        other => other,
    };

    NativeMessage {
        role: role.as_str().to_string(),
        content,
        images,
        tool_calls,
        thinking: None,
    }
}

/// `response_format` to Ollama's `format`: `"json"` or a JSON schema.
fn native_format(response_format: Option<&serde_json::Value>) -> Option<serde_json::Value> {
    let rf = response_format?;
    match rf.get("type").and_then(|t| t.as_str()) {
        Some("json_object") => Some(serde_json::Value::String("json".to_string())),
        Some("json_schema") => rf.pointer("/json_schema/schema").cloned(),
        _ => None,
    }
}

fn chat_request(req: &ChatCompletionRequest) -> NativeChatRequest {
    NativeChatRequest {
        model: req.model.clone(),
        messages: req.messages.iter().map(native_message).collect(),
        stream: req.is_stream(),
        tools: req.tools.clone(),
        format: native_format(req.response_format.as_ref()),
        options: Options {
            temperature: req.temperature,
            top_p: req.top_p,
            seed: req.seed,
            num_predict: req.max_completion_tokens.or(req.max_tokens),
            stop: req.stop.as_ref().map(|s| s.to_vec()),
            presence_penalty: req.presence_penalty,
            frequency_penalty: req.frequency_penalty,
        },
    }
}

// ---------------------------------------------------------------------------
// Response decoding
// ---------------------------------------------------------------------------

struct ChatDecoder {
    factory: ChunkFactory,
    calls: usize,
}

impl ChatDecoder {
    fn new(model: &str) -> Self {
        Self {
            factory: ChunkFactory::new(model),
            calls: 0,
        }
    }

    fn tool_call_values(&mut self, calls: Vec<NativeToolCall>) -> Vec<serde_json::Value> {
        calls
            .into_iter()
            .filter_map(|call| {
                let index = self.calls;
                self.calls += 1;
                let call = ToolCall {
                    id: format!("call_{}", uuid::Uuid::new_v4().simple()),
                    call_type: "function".to_string(),
                    function: crate::translate::canonical::ToolCallFunction {
                        name: call.function.name,
                        arguments: call.function.arguments.to_string(),
                    },
                };
                let mut value = serde_json::to_value(call).ok()?;
                value["index"] = index.into();
                Some(value)
            })
            .collect()
    }
}

impl RecordDecoder for ChatDecoder {
    fn decode(&mut self, record: &str) -> Result<Vec<ChatCompletionChunk>> {
        let record = NativeRecord::parse(record)?;
        let mut chunks = Vec::new();

        if let Some(message) = record.message.clone() {
            if let Some(thinking) = message.thinking.filter(|t| !t.is_empty()) {
                chunks.push(self.factory.reasoning(0, thinking));
            }
            if !message.content.is_empty() {
                chunks.push(self.factory.text(0, message.content));
            }
            if !message.tool_calls.is_empty() {
                let tool_calls = self.tool_call_values(message.tool_calls);
                chunks.push(self.factory.chunk(ChunkChoice {
                    index: 0,
                    delta: ChunkDelta {
                        tool_calls: Some(tool_calls),
                        ..ChunkDelta::default()
                    },
                    finish_reason: None,
                }));
            }
        }

        if record.done {
            let reason = if self.calls > 0 {
                "tool_calls".to_string()
            } else {
                record.finish_reason()
            };
            chunks.push(self.factory.finish(0, reason, Some(record.usage())));
        }
        Ok(chunks)
    }
}

/// Maps `/api/generate` records to `text_completion` frames.
struct CompletionDecoder {
    id: String,
    factory: ChunkFactory,
}

impl CompletionDecoder {
    fn new(model: &str) -> Self {
        let factory = ChunkFactory::new(model);
        Self {
            id: factory.id().replacen("chatcmpl-", "cmpl-", 1),
            factory,
        }
    }
}

impl RecordDecoder<CompletionResponse> for CompletionDecoder {
    fn decode(&mut self, record: &str) -> Result<Vec<CompletionResponse>> {
        let record = NativeRecord::parse(record)?;
        let mut frame = CompletionResponse::single(
            self.id.clone(),
            self.factory.model(),
            self.factory.created(),
            record.response.clone().unwrap_or_default(),
            record.done.then(|| record.finish_reason()),
        );
        if record.done {
            frame.usage = Some(record.usage());
        }
        Ok(vec![frame])
    }
}

/// Fold `text_completion` frames into one response.
fn fold_completion(
    frames: Vec<CompletionResponse>,
    id: String,
    model: &str,
    created: i64,
) -> CompletionResponse {
    let mut text = String::new();
    let mut finish_reason = None;
    let mut usage = None;
    for frame in frames {
        for choice in frame.choices {
            text.push_str(&choice.text);
            if choice.finish_reason.is_some() {
                finish_reason = choice.finish_reason;
            }
        }
        if frame.usage.is_some() {
            usage = frame.usage;
        }
    }
    let mut response = CompletionResponse::single(
        id,
        model,
        created,
        text,
        Some(finish_reason.unwrap_or_else(|| "stop".to_string())),
    );
    response.usage = usage;
    response
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

pub struct OllamaAdapter {
    endpoint: HttpEndpoint,
}

impl OllamaAdapter {
    pub fn new(endpoint: HttpEndpoint) -> Self {
        Self { endpoint }
    }
}

#[async_trait]
impl Adapter for OllamaAdapter {
    fn name(&self) -> &str {
        "ollama-native"
    }

    async fn chat_completions(
        &self,
        req: ChatCompletionRequest,
        cx: &CallContext,
    ) -> Result<AdapterResponse> {
        let body = chat_request(&req);
        let opened = self.endpoint.post_json("/api/chat", &body, &cx.cancel).await?;
        let decoder = ChatDecoder::new(&req.model);

        if req.is_stream() {
            let stream = engine::translate_stream(opened.body, Framing::NdJson, decoder, cx.cancel.clone());
            return Ok(AdapterResponse::event_stream(stream));
        }
        let factory = decoder.factory.clone();
        let response =
            engine::collect_completion(opened.body, Framing::NdJson, decoder, &factory, &cx.cancel)
                .await?;
        AdapterResponse::json(&response)
    }

    async fn completions(&self, req: CompletionRequest, cx: &CallContext) -> Result<AdapterResponse> {
        let body = NativeGenerateRequest {
            model: req.model.clone(),
            prompt: req.prompt_text(),
            stream: req.is_stream(),
            suffix: req.suffix.clone(),
            options: Options {
                temperature: req.temperature,
                top_p: req.top_p,
                num_predict: req.max_tokens,
                stop: req.stop.as_ref().map(|s| s.to_vec()),
                ..Options::default()
            },
        };
        let opened = self
            .endpoint
            .post_json("/api/generate", &body, &cx.cancel)
            .await?;

        let decoder = CompletionDecoder::new(&req.model);
        if req.is_stream() {
            let stream = engine::stream_frames(
                opened.body,
                Framing::NdJson,
                decoder,
                cx.cancel.clone(),
                |_: &mut CompletionResponse| {},
            );
            return Ok(AdapterResponse::event_stream(stream));
        }

        let id = decoder.id.clone();
        let created = decoder.factory.created();
        let frames = engine::collect_records(opened.body, Framing::NdJson, decoder, &cx.cancel).await?;
        let response = fold_completion(frames, id, &req.model, created);
        AdapterResponse::json(&response)
    }

    async fn embeddings(&self, req: EmbeddingRequest, cx: &CallContext) -> Result<AdapterResponse> {
        let native: NativeEmbedResponse = self
            .endpoint
            .post_json(
                "/api/embed",
                &NativeEmbedRequest {
                    model: &req.model,
                    input: &req.input,
                },
                &cx.cancel,
            )
            .await?
            .json(&cx.cancel)
            .await?;

        let response = EmbeddingResponse {
            object: "list".to_string(),
            data: native
                .embeddings
                .into_iter()
                .enumerate()
                .map(|(index, embedding)| EmbeddingData {
                    object: "embedding".to_string(),
                    index: index as u32,
                    embedding,
                })
                .collect(),
            model: if native.model.is_empty() {
                req.model
            } else {
                native.model
            },
            usage: Some(EmbeddingUsage {
                prompt_tokens: native.prompt_eval_count,
                total_tokens: native.prompt_eval_count,
            }),
        };
        AdapterResponse::json(&response)
    }

    async fn models(&self, cx: &CallContext) -> Result<ModelList> {
        let tags: NativeTags = self.endpoint.get("/api/tags", &cx.cancel).await?.json(&cx.cancel).await?;
        Ok(ModelList::from_ids(tags.models.into_iter().map(|m| m.name), "ollama"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{AuthScheme, Credential};
    use crate::transport::Transport;
    use futures::StreamExt;
    use tokio_util::sync::CancellationToken;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn chat(raw: &str) -> ChatCompletionRequest {
        serde_json::from_str(raw).unwrap()
    }

    #[test]
    fn request_moves_inline_images_and_options() {
        let req = chat(
            r#"{"model":"llava","max_tokens":64,"temperature":0.2,"stop":"END",
                "response_format":{"type":"json_object"},
                "messages":[
                  {"role":"developer","content":"be brief"},
                  {"role":"user","content":[
                    {"type":"text","text":"what is "},
                    {"type":"image_url","image_url":{"url":"data:image/png;base64,AAAA"}},
                    {"type":"image_url","image_url":{"url":"https://x/remote.png"}},
                    {"type":"text","text":"this?"}
                  ]}
                ]}"#,
        );
        let native = serde_json::to_value(chat_request(&req)).unwrap();
        assert_eq!(native["messages"][0]["role"], "system");
        assert_eq!(native["messages"][1]["content"], "what is this?");
        assert_eq!(native["messages"][1]["images"], serde_json::json!(["AAAA"]));
        assert_eq!(native["options"]["num_predict"], 64);
        assert_eq!(native["options"]["stop"], serde_json::json!(["END"]));
        assert_eq!(native["format"], "json");
        assert_eq!(native["stream"], false);
    }

    #[test]
    fn decoder_emits_content_then_finish_with_usage() {
        let mut decoder = ChatDecoder::new("llama3");
        let first = decoder
            .decode(r#"{"model":"llama3","message":{"role":"assistant","content":"Hel"},"done":false}"#)
            .unwrap();
        assert_eq!(first[0].choices[0].delta.content.as_deref(), Some("Hel"));

        let last = decoder
            .decode(r#"{"model":"llama3","message":{"role":"assistant","content":""},"done":true,"done_reason":"stop","prompt_eval_count":12,"eval_count":5}"#)
            .unwrap();
        assert_eq!(last.len(), 1);
        assert_eq!(last[0].choices[0].finish_reason.as_deref(), Some("stop"));
        assert_eq!(last[0].usage, Some(Usage::new(12, 5)));
    }

    #[test]
    fn decoder_maps_tool_calls() {
        let mut decoder = ChatDecoder::new("llama3");
        let chunks = decoder
            .decode(r#"{"message":{"role":"assistant","content":"","tool_calls":[{"function":{"name":"weather","arguments":{"city":"Oslo"}}}]},"done":true}"#)
            .unwrap();
        let calls = chunks[0].choices[0].delta.tool_calls.as_ref().unwrap();
        assert_eq!(calls[0]["function"]["name"], "weather");
        assert_eq!(calls[0]["function"]["arguments"], r#"{"city":"Oslo"}"#);
        assert_eq!(chunks[1].choices[0].finish_reason.as_deref(), Some("tool_calls"));
    }

    #[test]
    fn in_band_error_is_fatal() {
        let err = ChatDecoder::new("m").decode(r#"{"error":"model not found"}"#).unwrap_err();
        assert!(!err.is_skippable_record());
    }

    fn adapter(server: &MockServer) -> OllamaAdapter {
        OllamaAdapter::new(HttpEndpoint::new(
            Transport::new(reqwest::Client::new()),
            server.uri(),
            Credential::new(AuthScheme::Bearer, ""),
        ))
    }

    #[tokio::test]
    async fn streaming_chat_becomes_canonical_sse() {
        let server = MockServer::start().await;
        let ndjson = concat!(
            "{\"message\":{\"role\":\"assistant\",\"content\":\"Hi\"},\"done\":false}\n",
            "{\"message\":{\"role\":\"assistant\",\"content\":\" there\"},\"done\":false}\n",
            "{\"message\":{\"role\":\"assistant\",\"content\":\"\"},\"done\":true,\"prompt_eval_count\":3,\"eval_count\":2}\n",
        );
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(body_partial_json(serde_json::json!({"stream": true})))
            .respond_with(ResponseTemplate::new(200).set_body_string(ndjson))
            .mount(&server)
            .await;

        let cx = CallContext::new(CancellationToken::new());
        let resp = adapter(&server)
            .chat_completions(
                chat(r#"{"model":"llama3","stream":true,"messages":[{"role":"user","content":"yo"}]}"#),
                &cx,
            )
            .await
            .ok()
            .unwrap();
        assert_eq!(resp.headers["content-type"], "text/event-stream");

        let frames: Vec<String> = resp
            .body
            .map(|b| String::from_utf8(b.unwrap().to_vec()).unwrap())
            .collect()
            .await;
        assert_eq!(frames.len(), 4);
        assert!(frames[0].contains("\"role\":\"assistant\""));
        assert!(frames[1].contains(" there"));
        assert!(frames[2].contains("\"finish_reason\":\"stop\""));
        assert_eq!(frames[3], "data: [DONE]\n\n");
    }

    #[tokio::test]
    async fn generate_folds_into_a_text_completion() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_partial_json(serde_json::json!({"prompt": "Once upon", "stream": false})))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"response":" a time","done":true,"done_reason":"length","prompt_eval_count":2,"eval_count":3}"#,
            ))
            .mount(&server)
            .await;

        let req: CompletionRequest =
            serde_json::from_str(r#"{"model":"llama3","prompt":"Once upon","max_tokens":3}"#).unwrap();
        let cx = CallContext::new(CancellationToken::new());
        let resp = adapter(&server).completions(req, &cx).await.ok().unwrap();
        let body: Vec<_> = resp.body.collect().await;
        let parsed: CompletionResponse = serde_json::from_slice(body[0].as_ref().unwrap()).unwrap();
        assert!(parsed.id.starts_with("cmpl-"));
        assert_eq!(parsed.choices[0].text, " a time");
        assert_eq!(parsed.choices[0].finish_reason.as_deref(), Some("length"));
        assert_eq!(parsed.usage.unwrap().total_tokens, 5);
    }

    #[tokio::test]
    async fn streamed_generate_becomes_text_completion_frames() {
        let server = MockServer::start().await;
        let ndjson = concat!(
            "{\"response\":\"Once\",\"done\":false}\n",
            "not json\n",
            "{\"response\":\" upon\",\"done\":true,\"done_reason\":\"stop\",\"prompt_eval_count\":1,\"eval_count\":2}\n",
        );
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_partial_json(serde_json::json!({"stream": true})))
            .respond_with(ResponseTemplate::new(200).set_body_string(ndjson))
            .mount(&server)
            .await;

        let req: CompletionRequest =
            serde_json::from_str(r#"{"model":"llama3","prompt":"tell","stream":true}"#).unwrap();
        let cx = CallContext::new(CancellationToken::new());
        let resp = adapter(&server).completions(req, &cx).await.ok().unwrap();
        let frames: Vec<String> = resp
            .body
            .map(|b| String::from_utf8(b.unwrap().to_vec()).unwrap())
            .collect()
            .await;
        assert_eq!(frames.len(), 3);
        assert!(frames[0].contains("\"text\":\"Once\""));
        assert!(frames[0].contains("\"id\":\"cmpl-"));
        assert!(frames[1].contains("\"finish_reason\":\"stop\""));
        assert!(frames[1].contains("\"total_tokens\":3"));
        assert_eq!(frames[2], "data: [DONE]\n\n");
    }

    #[tokio::test]
    async fn oversized_generate_body_is_rejected() {
        let server = MockServer::start().await;
        let huge = format!("{{\"response\":\"{}\"", "x".repeat(engine::MAX_RECORD_BYTES + 16));
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(200).set_body_string(huge))
            .mount(&server)
            .await;

        let req: CompletionRequest = serde_json::from_str(r#"{"model":"llama3","prompt":"tell"}"#).unwrap();
        let cx = CallContext::new(CancellationToken::new());
        assert!(adapter(&server).completions(req, &cx).await.is_err());
    }

    #[tokio::test]
    async fn embeddings_keep_input_order() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embed"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model": "nomic",
                "embeddings": [[0.1, 0.2], [0.3, 0.4]],
                "prompt_eval_count": 8
            })))
            .mount(&server)
            .await;

        let cx = CallContext::new(CancellationToken::new());
        let req: EmbeddingRequest =
            serde_json::from_str(r#"{"model":"nomic","input":["a","b"]}"#).unwrap();
        let resp = adapter(&server).embeddings(req, &cx).await.ok().unwrap();
        let body: Vec<_> = resp.body.collect().await;
        let parsed: EmbeddingResponse = serde_json::from_slice(body[0].as_ref().unwrap()).unwrap();
        assert_eq!(parsed.data[1].index, 1);
        assert_eq!(parsed.usage.unwrap().prompt_tokens, 8);
    }

    #[tokio::test]
    async fn models_come_from_tags() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "models": [{"name": "llama3:8b"}, {"name": "qwen2:7b"}]
            })))
            .mount(&server)
            .await;
        let cx = CallContext::new(CancellationToken::new());
        let list = adapter(&server).models(&cx).await.unwrap();
        let ids: Vec<_> = list.data.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["llama3:8b", "qwen2:7b"]);
    }
}

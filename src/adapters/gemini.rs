//! Gemini's native `generateContent` API.
//!
//! Streaming uses `streamGenerateContent` without `alt=sse`, which returns a
//! JSON array delivered element by element.

use super::{Adapter, AdapterResponse, CallContext};
use crate::error::{RelayError, Result};
use crate::transport::HttpEndpoint;
use crate::translate::canonical::{
    ChatCompletionChunk, ChatCompletionRequest, ChatMessage, ChunkChoice, ChunkDelta, ChunkFactory,
    ContentPart, DataUrl, Role, Usage,
};
use crate::translate::engine::{self, Framing, RecordDecoder};
use crate::translate::media::ModelList;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ---------------------------------------------------------------------------
// Native wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<NativeContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<NativeContent>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<NativeTool>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct NativeContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<NativePart>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NativePart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    /// Set on reasoning summaries.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    thought: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    inline_data: Option<Blob>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    file_data: Option<FileData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_call: Option<FunctionCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_response: Option<FunctionResponse>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Blob {
    mime_type: String,
    data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    mime_type: Option<String>,
    file_uri: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FunctionCall {
    name: String,
    #[serde(default)]
    args: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FunctionResponse {
    name: String,
    response: serde_json::Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NativeTool {
    function_declarations: Vec<serde_json::Value>,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_sequences: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    presence_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    frequency_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    candidate_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_schema: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
    #[serde(default)]
    error: Option<NativeError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<NativeContent>,
    #[serde(default)]
    finish_reason: Option<String>,
    #[serde(default)]
    index: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
    #[serde(default)]
    thoughts_token_count: u64,
}

#[derive(Debug, Deserialize)]
struct NativeError {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct NativeModels {
    #[serde(default)]
    models: Vec<NativeModel>,
}

#[derive(Debug, Deserialize)]
struct NativeModel {
    name: String,
}

// ---------------------------------------------------------------------------
// Request translation
// ---------------------------------------------------------------------------

fn native_role(role: Role) -> &'static str {
    match role {
        Role::Assistant => "model",
        Role::System | Role::Developer | Role::User | Role::Tool => "user",
    }
}

fn native_parts(msg: &ChatMessage) -> Result<Vec<NativePart>> {
    let mut parts = Vec::new();
    for part in msg.content.parts() {
        let native = match part {
            ContentPart::Text { text } => NativePart {
                text: Some(text),
                ..NativePart::default()
            },
            ContentPart::ImageUrl { image_url } => match DataUrl::parse(&image_url.url) {
                Some(data) => NativePart {
                    inline_data: Some(Blob {
                        mime_type: data.mime_type.to_string(),
                        data: data.data.to_string(),
                    }),
                    ..NativePart::default()
                },
                None => NativePart {
                    file_data: Some(FileData {
                        mime_type: None,
                        file_uri: image_url.url,
                    }),
                    ..NativePart::default()
                },
            },
            ContentPart::InputAudio { input_audio } => {
                if input_audio.data.is_empty() || input_audio.format.is_empty() {
                    return Err(RelayError::invalid_request(
                        "input_audio needs both data and format",
                    ));
                }
                NativePart {
                    inline_data: Some(Blob {
                        mime_type: format!("audio/{}", input_audio.format),
                        data: input_audio.data,
                    }),
                    ..NativePart::default()
                }
            }
            ContentPart::File { file } => {
                let inline = file.file_data.as_deref().and_then(DataUrl::parse).map(|d| Blob {
                    mime_type: d.mime_type.to_string(),
                    data: d.data.to_string(),
                });
                match (inline, file.file_id) {
                    (Some(blob), _) => NativePart {
                        inline_data: Some(blob),
                        ..NativePart::default()
                    },
                    (None, Some(uri)) => NativePart {
                        file_data: Some(FileData {
                            mime_type: None,
                            file_uri: uri,
                        }),
                        ..NativePart::default()
                    },
                    (None, None) => {
                        return Err(RelayError::invalid_request(
                            "file part needs file_data or file_id",
                        ))
                    }
                }
            }
        };
        parts.push(native);
    }
    Ok(parts)
}

fn generate_request(req: &ChatCompletionRequest) -> Result<GenerateRequest> {
    let mut system = Vec::new();
    let mut contents: Vec<NativeContent> = Vec::new();
    // Tool results name the function only through the id of the call.
    let mut call_names: HashMap<&str, &str> = HashMap::new();

    for msg in &req.messages {
        match msg.role {
            Role::System | Role::Developer => {
                let text = msg.content.plain_text();
                if !text.is_empty() {
                    system.push(NativePart {
                        text: Some(text),
                        ..NativePart::default()
                    });
                }
            }
            Role::Tool => {
                let name = msg
                    .name
                    .as_deref()
                    .or_else(|| msg.tool_call_id.as_deref().and_then(|id| call_names.get(id).copied()))
                    .unwrap_or("tool");
                let output = msg.content.plain_text();
                let response = serde_json::from_str::<serde_json::Value>(&output)
                    .ok()
                    .filter(serde_json::Value::is_object)
                    .unwrap_or_else(|| serde_json::json!({ "content": output }));
                contents.push(NativeContent {
                    role: Some(native_role(Role::Tool).to_string()),
                    parts: vec![NativePart {
                        function_response: Some(FunctionResponse {
                            name: name.to_string(),
                            response,
                        }),
                        ..NativePart::default()
                    }],
                });
            }
            Role::User | Role::Assistant => {
                let mut parts = native_parts(msg)?;
                for call in msg.tool_calls.iter().flatten() {
                    call_names.insert(&call.id, &call.function.name);
                    parts.push(NativePart {
                        function_call: Some(FunctionCall {
                            name: call.function.name.clone(),
                            args: serde_json::from_str(&call.function.arguments)
                                .unwrap_or_else(|_| serde_json::json!({})),
                        }),
                        ..NativePart::default()
                    });
                }
                if parts.is_empty() {
                    continue;
                }
                contents.push(NativeContent {
                    role: Some(native_role(msg.role).to_string()),
                    parts,
                });
            }
        }
    }

    if contents.is_empty() {
        return Err(RelayError::invalid_request(
            "at least one user or assistant message is required",
        ));
    }

    let tools = match req.tools {
        Some(ref tools) if !tools.is_empty() => vec![NativeTool {
            function_declarations: tools
                .iter()
                .map(|t| {
                    let mut decl = serde_json::json!({ "name": t.function.name });
                    if let Some(ref d) = t.function.description {
                        decl["description"] = d.clone().into();
                    }
                    if !t.function.parameters.is_null() {
                        decl["parameters"] = t.function.parameters.clone();
                    }
                    decl
                })
                .collect(),
        }],
        _ => Vec::new(),
    };

    let (response_mime_type, response_schema) = match req
        .response_format
        .as_ref()
        .and_then(|rf| rf.get("type"))
        .and_then(|t| t.as_str())
    {
        Some("json_object") => (Some("application/json".to_string()), None),
        Some("json_schema") => (
            Some("application/json".to_string()),
            req.response_format
                .as_ref()
                .and_then(|rf| rf.pointer("/json_schema/schema"))
                .cloned(),
        ),
        _ => (None, None),
    };

    Ok(GenerateRequest {
        contents,
        system_instruction: (!system.is_empty()).then(|| NativeContent {
            role: None,
            parts: system,
        }),
        tools,
        generation_config: GenerationConfig {
            temperature: req.temperature,
            top_p: req.top_p,
            max_output_tokens: req.max_completion_tokens.or(req.max_tokens),
            stop_sequences: req.stop.as_ref().map(|s| s.to_vec()),
            presence_penalty: req.presence_penalty,
            frequency_penalty: req.frequency_penalty,
            seed: req.seed,
            candidate_count: req.n,
            response_mime_type,
            response_schema,
        },
    })
}

// ---------------------------------------------------------------------------
// Response decoding
// ---------------------------------------------------------------------------

fn finish_reason(native: &str) -> &'static str {
    match native {
        "STOP" => "stop",
        "MAX_TOKENS" => "length",
        "SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT" | "SPII" | "IMAGE_SAFETY" => {
            "content_filter"
        }
        "MALFORMED_FUNCTION_CALL" => "tool_calls",
        _ => "stop",
    }
}

struct GenerateDecoder {
    factory: ChunkFactory,
    calls: HashMap<u32, usize>,
    /// Latest reported totals; Gemini repeats running counts on many records.
    usage: Option<Usage>,
}

impl GenerateDecoder {
    fn new(model: &str) -> Self {
        Self {
            factory: ChunkFactory::new(model),
            calls: HashMap::new(),
            usage: None,
        }
    }
}

impl RecordDecoder for GenerateDecoder {
    fn decode(&mut self, record: &str) -> Result<Vec<ChatCompletionChunk>> {
        let resp: GenerateResponse =
            serde_json::from_str(record).map_err(|e| RelayError::decode(e.to_string()))?;
        if let Some(err) = resp.error {
            return Err(RelayError::transport(format!("gemini: {}", err.message)));
        }

        if let Some(u) = resp.usage_metadata {
            self.usage = Some(Usage::new(
                u.prompt_token_count,
                u.candidates_token_count + u.thoughts_token_count,
            ));
        }
        let mut chunks = Vec::new();

        for (position, candidate) in resp.candidates.into_iter().enumerate() {
            let index = candidate.index.unwrap_or(position as u32);
            let mut delta = ChunkDelta::default();
            let mut tool_calls = Vec::new();

            for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
                if let Some(text) = part.text.filter(|t| !t.is_empty()) {
                    let slot = if part.thought {
                        &mut delta.reasoning_content
                    } else {
                        &mut delta.content
                    };
                    slot.get_or_insert_with(String::new).push_str(&text);
                }
                if let Some(call) = part.function_call {
                    let seen = self.calls.entry(index).or_default();
                    tool_calls.push(serde_json::json!({
                        "index": *seen,
                        "id": format!("call_{}", uuid::Uuid::new_v4().simple()),
                        "type": "function",
                        "function": {
                            "name": call.name,
                            "arguments": call.args.to_string(),
                        },
                    }));
                    *seen += 1;
                }
            }
            if !tool_calls.is_empty() {
                delta.tool_calls = Some(tool_calls);
            }

            let finish = candidate.finish_reason.as_deref().map(|native| {
                if self.calls.get(&index).copied().unwrap_or(0) > 0 {
                    "tool_calls".to_string()
                } else {
                    finish_reason(native).to_string()
                }
            });

            let empty = delta.content.is_none()
                && delta.reasoning_content.is_none()
                && delta.tool_calls.is_none();
            if empty && finish.is_none() {
                continue;
            }
            chunks.push(self.factory.chunk(ChunkChoice {
                index,
                delta,
                finish_reason: finish,
            }));
        }
        Ok(chunks)
    }

    /// Usage goes out once, after every candidate has finished.
    fn finish(&mut self) -> Vec<ChatCompletionChunk> {
        self.usage
            .take()
            .map(|usage| self.factory.usage(usage))
            .into_iter()
            .collect()
    }
}

/// `models/gemini-2.0-flash` and `gemini-2.0-flash` name the same model.
fn model_path(model: &str) -> String {
    let model = model.strip_prefix("models/").unwrap_or(model);
    format!("/models/{model}")
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

pub struct GeminiAdapter {
    endpoint: HttpEndpoint,
}

impl GeminiAdapter {
    pub fn new(endpoint: HttpEndpoint) -> Self {
        Self { endpoint }
    }
}

#[async_trait]
impl Adapter for GeminiAdapter {
    fn name(&self) -> &str {
        "gemini-native"
    }

    async fn chat_completions(
        &self,
        req: ChatCompletionRequest,
        cx: &CallContext,
    ) -> Result<AdapterResponse> {
        let body = generate_request(&req)?;
        let decoder = GenerateDecoder::new(&req.model);
        let base = model_path(&req.model);

        if req.is_stream() {
            let opened = self
                .endpoint
                .post_json(&format!("{base}:streamGenerateContent"), &body, &cx.cancel)
                .await?;
            let stream =
                engine::translate_stream(opened.body, Framing::JsonArray, decoder, cx.cancel.clone());
            return Ok(AdapterResponse::event_stream(stream));
        }

        let opened = self
            .endpoint
            .post_json(&format!("{base}:generateContent"), &body, &cx.cancel)
            .await?;
        let factory = decoder.factory.clone();
        let response =
            engine::collect_completion(opened.body, Framing::JsonArray, decoder, &factory, &cx.cancel)
                .await?;
        AdapterResponse::json(&response)
    }

    async fn models(&self, cx: &CallContext) -> Result<ModelList> {
        let native: NativeModels = self.endpoint.get("/models", &cx.cancel).await?.json(&cx.cancel).await?;
        Ok(ModelList::from_ids(
            native
                .models
                .into_iter()
                .map(|m| m.name.strip_prefix("models/").map(str::to_string).unwrap_or(m.name)),
            "google",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{AuthScheme, Credential};
    use crate::transport::Transport;
    use futures::StreamExt;
    use tokio_util::sync::CancellationToken;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn chat(raw: &str) -> ChatCompletionRequest {
        serde_json::from_str(raw).unwrap()
    }

    #[test]
    fn system_messages_become_system_instruction() {
        let req = chat(
            r#"{"model":"gemini-2.0-flash","max_tokens":100,"messages":[
                {"role":"system","content":"You are terse."},
                {"role":"user","content":[
                    {"type":"text","text":"describe"},
                    {"type":"image_url","image_url":{"url":"data:image/jpeg;base64,/9j/"}},
                    {"type":"image_url","image_url":{"url":"gs://bucket/cat.png"}}
                ]},
                {"role":"assistant","content":"ok"}
            ]}"#,
        );
        let body = serde_json::to_value(generate_request(&req).unwrap()).unwrap();
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "You are terse.");
        assert_eq!(body["contents"].as_array().unwrap().len(), 2);
        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(body["contents"][0]["parts"][1]["inlineData"]["mimeType"], "image/jpeg");
        assert_eq!(body["contents"][0]["parts"][2]["fileData"]["fileUri"], "gs://bucket/cat.png");
        assert_eq!(body["contents"][1]["role"], "model");
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 100);
    }

    #[test]
    fn tool_results_reuse_the_call_name() {
        let req = chat(
            r#"{"model":"g","messages":[
                {"role":"user","content":"weather?"},
                {"role":"assistant","content":null,"tool_calls":[
                    {"id":"call_1","type":"function","function":{"name":"get_weather","arguments":"{\"city\":\"Oslo\"}"}}
                ]},
                {"role":"tool","tool_call_id":"call_1","content":"{\"temp\":3}"}
            ]}"#,
        );
        let body = serde_json::to_value(generate_request(&req).unwrap()).unwrap();
        assert_eq!(body["contents"][1]["parts"][0]["functionCall"]["args"]["city"], "Oslo");
        let response = &body["contents"][2]["parts"][0]["functionResponse"];
        assert_eq!(response["name"], "get_weather");
        assert_eq!(response["response"]["temp"], 3);
    }

    #[test]
    fn decoder_maps_finish_reasons_and_usage() {
        let mut decoder = GenerateDecoder::new("g");
        let chunks = decoder
            .decode(r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"Hello"}]},"index":0}]}"#)
            .unwrap();
        assert_eq!(chunks[0].choices[0].delta.content.as_deref(), Some("Hello"));
        assert!(chunks[0].usage.is_none());

        let chunks = decoder
            .decode(r#"{"candidates":[{"content":{"parts":[{"text":"!"}]},"finishReason":"MAX_TOKENS","index":0}],
                        "usageMetadata":{"promptTokenCount":4,"candidatesTokenCount":6,"totalTokenCount":10}}"#)
            .unwrap();
        assert_eq!(chunks[0].choices[0].finish_reason.as_deref(), Some("length"));
        assert!(chunks[0].usage.is_none());

        let chunks = decoder
            .decode(r#"{"candidates":[{"finishReason":"SAFETY","index":0}]}"#)
            .unwrap();
        assert_eq!(chunks[0].choices[0].finish_reason.as_deref(), Some("content_filter"));

        let tail = decoder.finish();
        assert_eq!(tail.len(), 1);
        assert!(tail[0].choices.is_empty());
        assert_eq!(tail[0].usage, Some(Usage::new(4, 6)));
        assert!(decoder.finish().is_empty());
    }

    #[test]
    fn usage_is_reported_once_for_several_candidates() {
        let mut decoder = GenerateDecoder::new("g");
        let chunks = decoder
            .decode(
                r#"{"candidates":[
                    {"content":{"parts":[{"text":"A"}]},"finishReason":"STOP","index":0},
                    {"content":{"parts":[{"text":"B"}]},"finishReason":"STOP","index":1}],
                    "usageMetadata":{"promptTokenCount":5,"candidatesTokenCount":8}}"#,
            )
            .unwrap();
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| c.usage.is_none()));

        let reported: Vec<Usage> = decoder.finish().into_iter().filter_map(|c| c.usage).collect();
        assert_eq!(reported, vec![Usage::new(5, 8)]);
    }

    #[test]
    fn trailing_usage_only_record_is_kept() {
        let mut decoder = GenerateDecoder::new("g");
        decoder
            .decode(r#"{"candidates":[{"content":{"parts":[{"text":"ok"}]},"finishReason":"STOP","index":0}],
                        "usageMetadata":{"promptTokenCount":3,"candidatesTokenCount":1}}"#)
            .unwrap();
        let chunks = decoder
            .decode(r#"{"usageMetadata":{"promptTokenCount":3,"candidatesTokenCount":1,"thoughtsTokenCount":4}}"#)
            .unwrap();
        assert!(chunks.is_empty());

        let tail = decoder.finish();
        assert_eq!(tail[0].usage, Some(Usage::new(3, 5)));
    }

    #[test]
    fn decoder_reports_function_calls() {
        let mut decoder = GenerateDecoder::new("g");
        let chunks = decoder
            .decode(r#"{"candidates":[{"content":{"parts":[{"functionCall":{"name":"lookup","args":{"q":"rust"}}}]},"finishReason":"STOP"}]}"#)
            .unwrap();
        let choice = &chunks[0].choices[0];
        let calls = choice.delta.tool_calls.as_ref().unwrap();
        assert_eq!(calls[0]["function"]["name"], "lookup");
        assert_eq!(calls[0]["function"]["arguments"], r#"{"q":"rust"}"#);
        assert_eq!(choice.finish_reason.as_deref(), Some("tool_calls"));
    }

    #[test]
    fn error_records_are_fatal() {
        let err = GenerateDecoder::new("g")
            .decode(r#"{"error":{"code":400,"message":"API key not valid"}}"#)
            .unwrap_err();
        assert!(!err.is_skippable_record());
    }

    fn adapter(server: &MockServer) -> GeminiAdapter {
        GeminiAdapter::new(HttpEndpoint::new(
            Transport::new(reqwest::Client::new()),
            format!("{}/v1beta", server.uri()),
            Credential::new(AuthScheme::GoogApiKey, "g-key"),
        ))
    }

    #[tokio::test]
    async fn streamed_json_array_becomes_sse() {
        let server = MockServer::start().await;
        let body = r#"[{"candidates":[{"content":{"role":"model","parts":[{"text":"Hi"}]},"index":0}]}
,
{"candidates":[{"content":{"role":"model","parts":[{"text":" there"}]},"finishReason":"STOP","index":0}],"usageMetadata":{"promptTokenCount":2,"candidatesTokenCount":2}}
]"#;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-2.0-flash:streamGenerateContent"))
            .and(header("x-goog-api-key", "g-key"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let cx = CallContext::new(CancellationToken::new());
        let resp = adapter(&server)
            .chat_completions(
                chat(r#"{"model":"models/gemini-2.0-flash","stream":true,"messages":[{"role":"user","content":"hey"}]}"#),
                &cx,
            )
            .await
            .ok()
            .unwrap();
        let frames: Vec<String> = resp
            .body
            .map(|b| String::from_utf8(b.unwrap().to_vec()).unwrap())
            .collect()
            .await;
        assert_eq!(frames.len(), 4);
        assert!(frames[0].contains("\"content\":\"Hi\""));
        assert!(frames[1].contains("\"finish_reason\":\"stop\""));
        assert!(!frames[1].contains("\"usage\""));
        assert!(frames[2].contains("\"choices\":[]"));
        assert!(frames[2].contains("\"total_tokens\":4"));
        assert_eq!(frames[3], "data: [DONE]\n\n");
    }

    #[tokio::test]
    async fn non_streaming_reply_is_folded() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-2.0-flash:generateContent"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "candidates": [{"content": {"role": "model", "parts": [{"text": "Paris."}]}, "finishReason": "STOP", "index": 0}],
                "usageMetadata": {"promptTokenCount": 7, "candidatesTokenCount": 2}
            })))
            .mount(&server)
            .await;

        let cx = CallContext::new(CancellationToken::new());
        let resp = adapter(&server)
            .chat_completions(
                chat(r#"{"model":"gemini-2.0-flash","messages":[{"role":"user","content":"Capital of France?"}]}"#),
                &cx,
            )
            .await
            .ok()
            .unwrap();
        let body: Vec<_> = resp.body.collect().await;
        let parsed: crate::translate::canonical::ChatCompletionResponse =
            serde_json::from_slice(body[0].as_ref().unwrap()).unwrap();
        assert_eq!(parsed.choices[0].message.content.as_deref(), Some("Paris."));
        assert_eq!(parsed.usage, Some(Usage::new(7, 2)));
    }
}

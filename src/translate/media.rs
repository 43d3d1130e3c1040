//! Canonical request/response shapes for the non-chat capabilities.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

type Extra = BTreeMap<String, serde_json::Value>;

// ---------------------------------------------------------------------------
// Text and vectors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub model: String,
    /// String, list of strings, or token arrays; forwarded as given.
    pub prompt: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suffix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<super::canonical::Stop>,
    #[serde(flatten)]
    pub extra: Extra,
}

impl CompletionRequest {
    #[must_use]
    pub fn is_stream(&self) -> bool {
        self.stream.unwrap_or(false)
    }

    /// The prompt as one string; list prompts are joined with newlines.
    #[must_use]
    pub fn prompt_text(&self) -> String {
        match &self.prompt {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Array(items) => items
                .iter()
                .filter_map(|v| v.as_str())
                .collect::<Vec<_>>()
                .join("\n"),
            _ => String::new(),
        }
    }
}

/// Non-streaming `text_completion` body; streamed completions reuse the
/// same shape per frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<CompletionChoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<super::canonical::Usage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionChoice {
    pub text: String,
    pub index: u32,
    pub finish_reason: Option<String>,
}

impl CompletionResponse {
    pub fn single(
        id: impl Into<String>,
        model: impl Into<String>,
        created: i64,
        text: impl Into<String>,
        finish_reason: Option<String>,
    ) -> Self {
        Self {
            id: id.into(),
            object: "text_completion".to_string(),
            created,
            model: model.into(),
            choices: vec![CompletionChoice {
                text: text.into(),
                index: 0,
                finish_reason,
            }],
            usage: None,
        }
    }
}

/// Responses API request. Only the model is interpreted; everything else is
/// forwarded untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsesRequest {
    pub model: String,
    /// A string or a list of input items.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub input: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRequest {
    pub model: String,
    pub input: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding_format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<u32>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingResponse {
    pub object: String,
    pub data: Vec<EmbeddingData>,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<EmbeddingUsage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingData {
    pub object: String,
    pub index: u32,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct EmbeddingUsage {
    pub prompt_tokens: u64,
    pub total_tokens: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankRequest {
    pub model: String,
    pub query: String,
    pub documents: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_n: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_documents: Option<bool>,
    #[serde(flatten)]
    pub extra: Extra,
}

// ---------------------------------------------------------------------------
// Images and audio
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageRequest {
    pub model: String,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<u32>,
    /// `"<width>x<height>"`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    #[serde(flatten)]
    pub extra: Extra,
}

impl ImageRequest {
    /// `size` parsed as `(width, height)`.
    #[must_use]
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        let (w, h) = self.size.as_deref()?.split_once('x')?;
        Some((w.trim().parse().ok()?, h.trim().parse().ok()?))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImageResponse {
    pub created: i64,
    pub data: Vec<ImageData>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImageData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub b64_json: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revised_prompt: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeechRequest {
    pub model: String,
    pub input: String,
    #[serde(default)]
    pub voice: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

/// One uploaded file from a multipart request.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub field: String,
    pub filename: String,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

/// A decoded multipart request (image edits and variations, transcription,
/// translation). Text fields keep their order; repeated fields are allowed.
#[derive(Debug, Clone, Default)]
pub struct FormRequest {
    pub fields: Vec<(String, String)>,
    pub files: Vec<UploadFile>,
}

impl FormRequest {
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    #[must_use]
    pub fn model(&self) -> Option<&str> {
        self.field("model")
    }

    #[must_use]
    pub fn file(&self, name: &str) -> Option<&UploadFile> {
        self.files.iter().find(|f| f.field == name || f.field == format!("{name}[]"))
    }

    pub fn set_field(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.fields.iter_mut().find(|(k, _)| k == name) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((name.to_string(), value)),
        }
    }

    /// Check that the named text fields and files are present.
    pub fn require(&self, fields: &[&str], files: &[&str]) -> crate::error::Result<()> {
        for name in fields {
            if self.field(name).map_or(true, str::is_empty) {
                return Err(crate::error::RelayError::invalid_request(format!(
                    "missing form field '{name}'"
                )));
            }
        }
        for name in files {
            if self.file(name).is_none() {
                return Err(crate::error::RelayError::invalid_request(format!(
                    "missing file '{name}'"
                )));
            }
        }
        Ok(())
    }

    /// Re-encode for an outbound multipart call.
    pub fn to_multipart(&self) -> crate::error::Result<reqwest::multipart::Form> {
        let mut form = reqwest::multipart::Form::new();
        for (name, value) in &self.fields {
            form = form.text(name.clone(), value.clone());
        }
        for file in &self.files {
            let mut part = reqwest::multipart::Part::bytes(file.bytes.to_vec())
                .file_name(file.filename.clone());
            if let Some(ref ct) = file.content_type {
                part = part
                    .mime_str(ct)
                    .map_err(|e| crate::error::RelayError::invalid_request(format!("bad content type: {e}")))?;
            }
            form = form.part(file.field.clone(), part);
        }
        Ok(form)
    }
}

// ---------------------------------------------------------------------------
// Video (asynchronous)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoSubmitRequest {
    pub model: String,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,
    /// Reference image URL (or data URL) for image-to-video models.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoSubmitResponse {
    #[serde(rename = "requestId")]
    pub request_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoStatusRequest {
    #[serde(rename = "requestId")]
    pub request_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VideoStatus {
    InQueue,
    InProgress,
    Succeed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoStatusResponse {
    pub status: VideoStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<Vec<VideoResult>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoResult {
    pub videos: Vec<VideoItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timings: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoItem {
    pub url: String,
}

impl VideoResult {
    pub fn single(url: impl Into<String>) -> Self {
        Self {
            videos: vec![VideoItem { url: url.into() }],
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Model listing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelList {
    pub object: String,
    pub data: Vec<ModelCard>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelCard {
    pub id: String,
    #[serde(default = "default_model_object")]
    pub object: String,
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub owned_by: String,
}

fn default_model_object() -> String {
    "model".to_string()
}

impl ModelList {
    pub fn from_ids<I, S>(ids: I, owned_by: &str) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            object: "list".to_string(),
            data: ids
                .into_iter()
                .map(|id| ModelCard {
                    id: id.into(),
                    object: default_model_object(),
                    created: 0,
                    owned_by: owned_by.to_string(),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_size_parses_dimensions() {
        let req: ImageRequest =
            serde_json::from_str(r#"{"model":"m","prompt":"p","size":"1024x768"}"#).unwrap();
        assert_eq!(req.dimensions(), Some((1024, 768)));

        let req: ImageRequest =
            serde_json::from_str(r#"{"model":"m","prompt":"p","size":"large"}"#).unwrap();
        assert_eq!(req.dimensions(), None);
    }

    #[test]
    fn video_wire_names() {
        let resp = VideoSubmitResponse {
            request_id: "abc".to_string(),
        };
        assert_eq!(serde_json::to_string(&resp).unwrap(), r#"{"requestId":"abc"}"#);

        let status = VideoStatusResponse {
            status: VideoStatus::InQueue,
            reason: None,
            results: None,
        };
        assert_eq!(serde_json::to_string(&status).unwrap(), r#"{"status":"InQueue"}"#);
    }

    #[test]
    fn form_requirements() {
        let mut form = FormRequest::default();
        form.set_field("model", "whisper-1");
        assert!(form.require(&["model"], &["file"]).is_err());

        form.files.push(UploadFile {
            field: "file".to_string(),
            filename: "a.wav".to_string(),
            content_type: Some("audio/wav".to_string()),
            bytes: Bytes::from_static(b"RIFF"),
        });
        assert!(form.require(&["model"], &["file"]).is_ok());
        assert_eq!(form.model(), Some("whisper-1"));
    }

    #[test]
    fn completion_prompt_text() {
        let req: CompletionRequest =
            serde_json::from_str(r#"{"model":"m","prompt":["a","b"]}"#).unwrap();
        assert_eq!(req.prompt_text(), "a\nb");
    }
}

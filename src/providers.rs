//! Built-in provider presets.
//!
//! Each preset names the adapter variant that speaks the provider's wire format,
//! the default host and API prefix, how the credential is attached, and which
//! canonical operations the provider accepts. Users pick a preset by name in
//! their config; an unknown name falls back to a generic OpenAI-compatible
//! provider as long as an explicit `base_url` is configured.

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use std::fmt;

/// Which adapter implementation handles a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    OpenAiCompatible,
    OllamaNative,
    GeminiNative,
    Fal,
    VolcEngine,
}

/// How the credential is stamped onto outbound requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScheme {
    /// `Authorization: Bearer <key>`
    Bearer,
    /// `Authorization: Key <key>`
    Key,
    /// `x-goog-api-key: <key>`
    GoogApiKey,
}

/// One canonical operation a provider may accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Chat,
    Responses,
    Completions,
    Embeddings,
    Rerank,
    ImageGenerate,
    ImageEdit,
    ImageVariation,
    Speech,
    Transcription,
    Translation,
    VideoSubmit,
    VideoStatus,
    Models,
}

impl Capability {
    pub const ALL: &'static [Capability] = &[
        Capability::Chat,
        Capability::Responses,
        Capability::Completions,
        Capability::Embeddings,
        Capability::Rerank,
        Capability::ImageGenerate,
        Capability::ImageEdit,
        Capability::ImageVariation,
        Capability::Speech,
        Capability::Transcription,
        Capability::Translation,
        Capability::VideoSubmit,
        Capability::VideoStatus,
        Capability::Models,
    ];

    /// Operation name used in `NotSupported` errors.
    #[must_use]
    pub fn operation(self) -> &'static str {
        match self {
            Capability::Chat => "chat_completions",
            Capability::Responses => "responses",
            Capability::Completions => "completions",
            Capability::Embeddings => "embeddings",
            Capability::Rerank => "rerank",
            Capability::ImageGenerate => "create_image",
            Capability::ImageEdit => "edit_image",
            Capability::ImageVariation => "image_variation",
            Capability::Speech => "speech",
            Capability::Transcription => "transcription",
            Capability::Translation => "translation",
            Capability::VideoSubmit => "video_submit",
            Capability::VideoStatus => "video_status",
            Capability::Models => "models",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProviderPreset {
    pub name: &'static str,
    pub kind: ProviderKind,
    /// Host part of the endpoint; a configured `base_url` replaces it.
    pub base_url: &'static str,
    /// Appended to the host to form the API root.
    pub api_prefix: &'static str,
    pub auth: AuthScheme,
    pub default_api_key_env: &'static str,
    pub completions_path: &'static str,
    pub capabilities: &'static [Capability],
}

const OPENAI_CAPS: &[Capability] = &[
    Capability::Chat,
    Capability::Responses,
    Capability::Completions,
    Capability::Embeddings,
    Capability::ImageGenerate,
    Capability::ImageEdit,
    Capability::ImageVariation,
    Capability::Speech,
    Capability::Transcription,
    Capability::Translation,
    Capability::Models,
];

const PRESETS: &[ProviderPreset] = &[
    ProviderPreset {
        name: "openai",
        kind: ProviderKind::OpenAiCompatible,
        base_url: "https://api.openai.com",
        api_prefix: "/v1",
        auth: AuthScheme::Bearer,
        default_api_key_env: "OPENAI_API_KEY",
        completions_path: "/completions",
        capabilities: OPENAI_CAPS,
    },
    ProviderPreset {
        name: "deepseek",
        kind: ProviderKind::OpenAiCompatible,
        base_url: "https://api.deepseek.com",
        api_prefix: "",
        auth: AuthScheme::Bearer,
        default_api_key_env: "DEEPSEEK_API_KEY",
        completions_path: "/beta/completions",
        capabilities: &[
            Capability::Chat,
            Capability::Responses,
            Capability::Completions,
            Capability::Models,
        ],
    },
    ProviderPreset {
        name: "xai",
        kind: ProviderKind::OpenAiCompatible,
        base_url: "https://api.x.ai",
        api_prefix: "/v1",
        auth: AuthScheme::Bearer,
        default_api_key_env: "XAI_API_KEY",
        completions_path: "/completions",
        capabilities: &[
            Capability::Chat,
            Capability::Completions,
            Capability::Embeddings,
            Capability::ImageGenerate,
            Capability::Models,
        ],
    },
    ProviderPreset {
        name: "siliconflow",
        kind: ProviderKind::OpenAiCompatible,
        base_url: "https://api.siliconflow.ai",
        api_prefix: "/v1",
        auth: AuthScheme::Bearer,
        default_api_key_env: "SILICONFLOW_API_KEY",
        completions_path: "/completions",
        capabilities: &[
            Capability::Chat,
            Capability::Completions,
            Capability::Embeddings,
            Capability::Rerank,
            Capability::ImageGenerate,
            Capability::Speech,
            Capability::Transcription,
            Capability::VideoSubmit,
            Capability::VideoStatus,
            Capability::Models,
        ],
    },
    ProviderPreset {
        name: "gemini",
        kind: ProviderKind::OpenAiCompatible,
        base_url: "https://generativelanguage.googleapis.com",
        api_prefix: "/v1beta/openai",
        auth: AuthScheme::Bearer,
        default_api_key_env: "GEMINI_API_KEY",
        completions_path: "/completions",
        capabilities: &[
            Capability::Chat,
            Capability::Responses,
            Capability::Embeddings,
            Capability::ImageGenerate,
            Capability::Models,
        ],
    },
    ProviderPreset {
        name: "gemini-native",
        kind: ProviderKind::GeminiNative,
        base_url: "https://generativelanguage.googleapis.com",
        api_prefix: "/v1beta",
        auth: AuthScheme::GoogApiKey,
        default_api_key_env: "GEMINI_API_KEY",
        completions_path: "",
        capabilities: &[Capability::Chat, Capability::Models],
    },
    ProviderPreset {
        name: "ollama",
        kind: ProviderKind::OpenAiCompatible,
        base_url: "http://localhost:11434",
        api_prefix: "/v1",
        auth: AuthScheme::Bearer,
        default_api_key_env: "OLLAMA_API_KEY",
        completions_path: "/completions",
        capabilities: &[
            Capability::Chat,
            Capability::Responses,
            Capability::Completions,
            Capability::Embeddings,
            Capability::Models,
        ],
    },
    ProviderPreset {
        name: "ollama-native",
        kind: ProviderKind::OllamaNative,
        base_url: "http://localhost:11434",
        api_prefix: "",
        auth: AuthScheme::Bearer,
        default_api_key_env: "OLLAMA_API_KEY",
        completions_path: "/api/generate",
        capabilities: &[
            Capability::Chat,
            Capability::Completions,
            Capability::Embeddings,
            Capability::Models,
        ],
    },
    ProviderPreset {
        name: "volcengine",
        kind: ProviderKind::VolcEngine,
        base_url: "https://ark.cn-beijing.volces.com",
        api_prefix: "/api/v3",
        auth: AuthScheme::Bearer,
        default_api_key_env: "ARK_API_KEY",
        completions_path: "/completions",
        capabilities: &[
            Capability::Chat,
            Capability::Embeddings,
            Capability::VideoSubmit,
            Capability::VideoStatus,
        ],
    },
    ProviderPreset {
        name: "fal",
        kind: ProviderKind::Fal,
        base_url: "https://queue.fal.run",
        api_prefix: "",
        auth: AuthScheme::Key,
        default_api_key_env: "FAL_KEY",
        completions_path: "",
        capabilities: &[
            Capability::Chat,
            Capability::ImageGenerate,
            Capability::Speech,
            Capability::VideoSubmit,
            Capability::VideoStatus,
            Capability::Models,
        ],
    },
];

/// Preset used for unknown provider names: the configured base URL is taken
/// verbatim as the API root.
pub const GENERIC_OPENAI: ProviderPreset = ProviderPreset {
    name: "openai-compatible",
    kind: ProviderKind::OpenAiCompatible,
    base_url: "",
    api_prefix: "",
    auth: AuthScheme::Bearer,
    default_api_key_env: "API_KEY",
    completions_path: "/completions",
    capabilities: Capability::ALL,
};

impl ProviderPreset {
    #[must_use]
    pub fn from_name(name: &str) -> Option<&'static ProviderPreset> {
        let name = name.to_lowercase();
        PRESETS.iter().find(|p| p.name == name)
    }

    #[must_use]
    pub fn all() -> &'static [ProviderPreset] {
        PRESETS
    }

    #[must_use]
    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}

/// An API key bound to the scheme its provider expects.
///
/// `Debug` never prints the key.
#[derive(Clone)]
pub struct Credential {
    scheme: AuthScheme,
    key: String,
}

impl Credential {
    pub fn new(scheme: AuthScheme, key: impl Into<String>) -> Self {
        Self {
            scheme,
            key: key.into(),
        }
    }

    #[must_use]
    pub fn scheme(&self) -> AuthScheme {
        self.scheme
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.key.is_empty()
    }

    /// Overwrite whatever credential headers are present with this one.
    pub fn stamp(&self, headers: &mut HeaderMap) {
        headers.remove(AUTHORIZATION);
        headers.remove("x-goog-api-key");
        if self.key.is_empty() {
            return;
        }
        let value = match self.scheme {
            AuthScheme::Bearer => format!("Bearer {}", self.key),
            AuthScheme::Key => format!("Key {}", self.key),
            AuthScheme::GoogApiKey => self.key.clone(),
        };
        let Ok(mut value) = HeaderValue::from_str(&value) else {
            tracing::warn!("credential contains characters not allowed in a header; skipping");
            return;
        };
        value.set_sensitive(true);
        match self.scheme {
            AuthScheme::GoogApiKey => {
                headers.insert("x-goog-api-key", value);
            }
            AuthScheme::Bearer | AuthScheme::Key => {
                headers.insert(AUTHORIZATION, value);
            }
        }
    }

    /// Raw key, for redaction filters only.
    pub(crate) fn secret(&self) -> &str {
        &self.key
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("scheme", &self.scheme)
            .field("key", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_providers() {
        assert!(ProviderPreset::from_name("openai").is_some());
        assert!(ProviderPreset::from_name("SiliconFlow").is_some()); // case-insensitive
        assert!(ProviderPreset::from_name("fal").is_some());
        assert!(ProviderPreset::from_name("unknown_provider").is_none());
    }

    #[test]
    fn test_native_presets_use_native_adapters() {
        let fal = ProviderPreset::from_name("fal").unwrap();
        assert_eq!(fal.kind, ProviderKind::Fal);
        assert_eq!(fal.auth, AuthScheme::Key);

        let gemini = ProviderPreset::from_name("gemini-native").unwrap();
        assert_eq!(gemini.auth, AuthScheme::GoogApiKey);
    }

    #[test]
    fn test_video_only_where_supported() {
        for preset in ProviderPreset::all() {
            assert_eq!(
                preset.supports(Capability::VideoSubmit),
                preset.supports(Capability::VideoStatus),
                "{} must pair video submit with status",
                preset.name
            );
        }
        assert!(!ProviderPreset::from_name("openai")
            .unwrap()
            .supports(Capability::VideoSubmit));
    }

    #[test]
    fn test_credential_overwrites_inbound_authorization() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer caller-key"));

        Credential::new(AuthScheme::Key, "fal-secret").stamp(&mut headers);
        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Key fal-secret");

        Credential::new(AuthScheme::GoogApiKey, "g-secret").stamp(&mut headers);
        assert!(headers.get(AUTHORIZATION).is_none());
        assert_eq!(headers.get("x-goog-api-key").unwrap(), "g-secret");
    }

    #[test]
    fn test_credential_debug_is_redacted() {
        let cred = Credential::new(AuthScheme::Bearer, "sk-very-secret");
        let printed = format!("{cred:?}");
        assert!(!printed.contains("sk-very-secret"));
    }
}

//! Request decoding: `(module, action, attributes)` into a typed request.
//!
//! Callers hand over a loose JSON attribute bag. It is decoded exactly once
//! into a [`ModuleRequest`] variant, which fixes both the upstream endpoint
//! and the body shape. Every routing decision lives in [`ModuleRequest::decode`].

use serde::Serialize;
use serde_json::Value;

use crate::error::ConfigError;
use crate::registry::{Endpoint, ModuleEndpointConfig, ModuleName};

/// Free-form attributes supplied by the caller.
pub type Attributes = serde_json::Map<String, Value>;

pub const ACTION_CHAT: &str = "chat";
pub const ACTION_TRANSLATE: &str = "translate";
pub const ACTION_TRANSLATE_DOCUMENT: &str = "translate_document";
pub const ACTION_SUMMARIZE: &str = "summarize";
pub const ACTION_QUERY_RESOURCE: &str = "query_resource";
pub const ACTION_GENERATE: &str = "generate";

const CHAT_TEMPERATURE: f64 = 0.7;
const RESOURCE_TEMPERATURE: f64 = 0.5;
const RESOURCE_TOP_K: u32 = 3;
const DEFAULT_FEATURE_TYPE: &str = "omniquest_docs";
const DEFAULT_DOCUMENT_NAME: &str = "document.pdf";
const DEFAULT_IMAGE_SIZE: &str = "1024x1024";
const DEFAULT_EDIT_IMAGE_NAME: &str = "uploaded_image.jpg";

/// Kind of media Media Studio should generate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationType {
    Image,
    Audio,
    Video,
    ImageToImage,
}

impl std::str::FromStr for GenerationType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "image_generator" => Ok(Self::Image),
            "audio_generator" => Ok(Self::Audio),
            "video_generator" => Ok(Self::Video),
            "image_to_image" => Ok(Self::ImageToImage),
            _ => Err(format!("Unknown generation type: {}", s)),
        }
    }
}

/// Body for the shared chat endpoint (WebGPT, Summarizer, fallback route).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    pub temperature: f64,
    pub history: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranslateTextBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_language: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranslateDocumentBody {
    #[serde(rename = "toLanguage", skip_serializing_if = "Option::is_none")]
    pub to_language: Option<String>,
    pub filename: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceQueryBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    pub file_names: Vec<Value>,
    pub top_k: u32,
    pub temperature: f64,
    pub feature_type: String,
    pub history: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageGenerationBody {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    pub size: String,
    pub number_of_images: u32,
    pub quality: String,
    pub addons: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AudioGenerationBody {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    pub language: String,
    pub voice: String,
    pub negative_prompt: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoGenerationBody {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageEditBody {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    pub imagename: String,
    pub size: String,
    pub quality: String,
    pub operation_type: String,
}

/// A decoded module invocation. Each variant maps to one endpoint and body shape.
#[derive(Debug, Clone, PartialEq)]
pub enum ModuleRequest {
    WebChat(ChatBody),
    TranslateText(TranslateTextBody),
    TranslateDocument(TranslateDocumentBody),
    Summarize(ChatBody),
    QueryResource(ResourceQueryBody),
    GenerateImage(ImageGenerationBody),
    GenerateAudio(AudioGenerationBody),
    GenerateVideo(VideoGenerationBody),
    EditImage(ImageEditBody),
    /// Any other module/action pair: a chat-shaped body sent to the
    /// module's primary endpoint.
    Fallback(ChatBody),
}

impl ModuleRequest {
    /// Decode a caller's action and attributes for `module`.
    ///
    /// Only Media Studio can fail here: it accepts nothing but `generate`,
    /// and `generate` needs a known `generationType`, otherwise there is no
    /// endpoint to send it to.
    pub fn decode(
        module: ModuleName,
        action: &str,
        attrs: &Attributes,
    ) -> Result<Self, ConfigError> {
        let request = match (module, action) {
            (ModuleName::WebGpt, ACTION_CHAT) => Self::WebChat(ChatBody {
                query: text(attrs, "query").or_else(|| text(attrs, "message")),
                temperature: CHAT_TEMPERATURE,
                history: array(attrs, "history"),
            }),
            (ModuleName::Translator, ACTION_TRANSLATE) => Self::TranslateText(TranslateTextBody {
                query: text(attrs, "message"),
                target_language: target_language(attrs),
            }),
            (ModuleName::Translator, ACTION_TRANSLATE_DOCUMENT) => {
                Self::TranslateDocument(TranslateDocumentBody {
                    to_language: target_language(attrs),
                    filename: text_or(attrs, "filename", DEFAULT_DOCUMENT_NAME),
                })
            }
            (ModuleName::Summarizer, ACTION_SUMMARIZE) => Self::Summarize(ChatBody {
                query: text(attrs, "message"),
                temperature: CHAT_TEMPERATURE,
                history: Vec::new(),
            }),
            (ModuleName::OmniQuest, ACTION_QUERY_RESOURCE) => {
                Self::QueryResource(ResourceQueryBody {
                    query: text(attrs, "query"),
                    file_names: array(attrs, "file_names"),
                    top_k: RESOURCE_TOP_K,
                    temperature: RESOURCE_TEMPERATURE,
                    feature_type: text_or(attrs, "feature_type", DEFAULT_FEATURE_TYPE),
                    history: array(attrs, "history"),
                })
            }
            (ModuleName::MediaStudio, ACTION_GENERATE) => decode_generation(module, attrs)?,
            // Every Media Studio endpoint expects a generation body.
            (ModuleName::MediaStudio, _) => {
                return Err(ConfigError::UnsupportedAction {
                    module: module.to_string(),
                    action: action.to_string(),
                });
            }
            _ => Self::Fallback(ChatBody {
                query: Some(
                    text(attrs, "message").unwrap_or_else(|| format!("User selected {module}")),
                ),
                temperature: CHAT_TEMPERATURE,
                history: Vec::new(),
            }),
        };
        Ok(request)
    }

    /// Upstream endpoint this request is sent to.
    pub fn endpoint(&self, config: &ModuleEndpointConfig) -> Endpoint {
        match self {
            Self::WebChat(_) | Self::Summarize(_) => Endpoint::Chat,
            Self::TranslateText(_) => Endpoint::TextTranslate,
            Self::TranslateDocument(_) => Endpoint::DocumentTranslate,
            Self::QueryResource(_) => Endpoint::Query,
            Self::GenerateImage(_) => Endpoint::ImageGeneration,
            Self::GenerateAudio(_) => Endpoint::AudioGeneration,
            Self::GenerateVideo(_) => Endpoint::VideoGeneration,
            Self::EditImage(_) => Endpoint::ImageEdit,
            Self::Fallback(_) => config.primary,
        }
    }

    /// JSON body sent upstream.
    pub fn body(&self) -> Result<Value, serde_json::Error> {
        match self {
            Self::WebChat(b) | Self::Summarize(b) | Self::Fallback(b) => serde_json::to_value(b),
            Self::TranslateText(b) => serde_json::to_value(b),
            Self::TranslateDocument(b) => serde_json::to_value(b),
            Self::QueryResource(b) => serde_json::to_value(b),
            Self::GenerateImage(b) => serde_json::to_value(b),
            Self::GenerateAudio(b) => serde_json::to_value(b),
            Self::GenerateVideo(b) => serde_json::to_value(b),
            Self::EditImage(b) => serde_json::to_value(b),
        }
    }

    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::WebChat(_) => "web_chat",
            Self::TranslateText(_) => "translate_text",
            Self::TranslateDocument(_) => "translate_document",
            Self::Summarize(_) => "summarize",
            Self::QueryResource(_) => "query_resource",
            Self::GenerateImage(_) => "generate_image",
            Self::GenerateAudio(_) => "generate_audio",
            Self::GenerateVideo(_) => "generate_video",
            Self::EditImage(_) => "edit_image",
            Self::Fallback(_) => "fallback",
        }
    }
}

fn decode_generation(module: ModuleName, attrs: &Attributes) -> Result<ModuleRequest, ConfigError> {
    let raw = text(attrs, "generationType");
    let generation_type = raw
        .as_deref()
        .and_then(|s| s.parse::<GenerationType>().ok())
        .ok_or_else(|| ConfigError::UnsupportedGenerationType {
            module: module.to_string(),
            generation_type: raw.clone().unwrap_or_else(|| "<missing>".to_string()),
        })?;

    let prompt = text(attrs, "prompt");
    let request = match generation_type {
        GenerationType::Image => ModuleRequest::GenerateImage(ImageGenerationBody {
            model: text_or(attrs, "model", "dall-e-3"),
            prompt,
            size: text_or(attrs, "size", DEFAULT_IMAGE_SIZE),
            number_of_images: 1,
            quality: "high".to_string(),
            addons: text_or(attrs, "addons", ""),
        }),
        GenerationType::Audio => ModuleRequest::GenerateAudio(AudioGenerationBody {
            model: text_or(attrs, "model", "tts-1"),
            prompt,
            language: text_or(attrs, "language", "en"),
            voice: text_or(attrs, "voice", "alloy"),
            negative_prompt: text_or(attrs, "negative_prompt", ""),
        }),
        GenerationType::Video => ModuleRequest::GenerateVideo(VideoGenerationBody {
            model: text_or(attrs, "model", "runway-gen2"),
            prompt,
        }),
        GenerationType::ImageToImage => ModuleRequest::EditImage(ImageEditBody {
            model: text_or(attrs, "model", "dall-e-2"),
            prompt,
            imagename: text_or(attrs, "imageName", DEFAULT_EDIT_IMAGE_NAME),
            size: text_or(attrs, "size", DEFAULT_IMAGE_SIZE),
            quality: text_or(attrs, "quality", "standard"),
            operation_type: "edit".to_string(),
        }),
    };
    Ok(request)
}

/// Non-empty string attribute. Numbers are accepted and stringified.
fn text(attrs: &Attributes, key: &str) -> Option<String> {
    match attrs.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn text_or(attrs: &Attributes, key: &str, default: &str) -> String {
    text(attrs, key).unwrap_or_else(|| default.to_string())
}

fn array(attrs: &Attributes, key: &str) -> Vec<Value> {
    match attrs.get(key) {
        Some(Value::Array(items)) => items.clone(),
        _ => Vec::new(),
    }
}

fn target_language(attrs: &Attributes) -> Option<String> {
    text(attrs, "targetLanguage").or_else(|| text(attrs, "target_language"))
}

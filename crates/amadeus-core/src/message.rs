//! Conversation messages and content parts.
//!
//! Messages follow the four-role chat shape (`system`, `user`, `assistant`,
//! `tool`). Content is either a plain string or an ordered list of content
//! parts. Unrecognized part types survive a load/store round trip verbatim
//! so that logs written by newer versions stay readable.

use std::collections::BTreeSet;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Value, json};

use crate::capability::ModelCapability;

/// Message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions.
    System,
    /// User input.
    User,
    /// Assistant output.
    Assistant,
    /// Tool result.
    Tool,
}

/// A message in the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Message role.
    pub role: Role,
    /// Message content.
    pub content: MessageContent,
    /// Tool calls requested by the assistant (assistant messages only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// The assistant tool call this message answers (tool messages only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    /// Create a user message from plain text.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// Create a user message from content parts.
    #[must_use]
    pub fn user_parts(parts: Vec<ContentPart>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Parts(parts),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// Create an assistant message from plain text.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Text(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// Create an assistant message with content parts and tool calls.
    #[must_use]
    pub fn assistant_with_tools(parts: Vec<ContentPart>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Parts(parts),
            tool_calls,
            tool_call_id: None,
        }
    }

    /// Create a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: MessageContent::Text(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// Concatenate all textual content, joined by `sep`.
    ///
    /// `think` parts are excluded — they are reasoning traces, not output.
    #[must_use]
    pub fn extract_text(&self, sep: &str) -> String {
        match &self.content {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Parts(parts) => {
                let texts: Vec<&str> = parts
                    .iter()
                    .filter_map(|part| match part {
                        ContentPart::Text { text } => Some(text.as_str()),
                        _ => None,
                    })
                    .collect();
                texts.join(sep)
            },
        }
    }

    /// Whether this assistant message requests any tool calls.
    #[must_use]
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Message content: plain text or structured parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    /// Plain text.
    Text(String),
    /// Ordered content parts.
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// Content parts view: a plain string becomes a single text part.
    #[must_use]
    pub fn to_parts(&self) -> Vec<ContentPart> {
        match self {
            Self::Text(text) => vec![ContentPart::Text { text: text.clone() }],
            Self::Parts(parts) => parts.clone(),
        }
    }
}

/// A URL-carrying media payload (`{"url": ...}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaUrl {
    /// The URL. `data:` URLs are allowed.
    pub url: String,
}

/// One element of structured message content.
///
/// The serialized form is externally tagged by a `type` field
/// (`{"type": "text", "text": ...}`). Unknown `type` values deserialize into
/// [`ContentPart::Unknown`] holding the raw JSON, and serialize back
/// unchanged.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentPart {
    /// Plain text.
    Text {
        /// The text.
        text: String,
    },
    /// Assistant reasoning trace. Preserved across turns.
    Think {
        /// The reasoning text.
        think: String,
    },
    /// Image input by URL.
    ImageUrl {
        /// The image payload.
        image_url: MediaUrl,
    },
    /// Audio input by URL.
    AudioUrl {
        /// The audio payload.
        audio_url: MediaUrl,
    },
    /// Video input by URL.
    VideoUrl {
        /// The video payload.
        video_url: MediaUrl,
    },
    /// A part of a type this version does not know. Round-trips losslessly.
    Unknown(Value),
}

impl ContentPart {
    /// Shorthand for a text part.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// The `type` tag of this part.
    #[must_use]
    pub fn type_name(&self) -> &str {
        match self {
            Self::Text { .. } => "text",
            Self::Think { .. } => "think",
            Self::ImageUrl { .. } => "image_url",
            Self::AudioUrl { .. } => "audio_url",
            Self::VideoUrl { .. } => "video_url",
            Self::Unknown(value) => value
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or("unknown"),
        }
    }
}

impl Serialize for ContentPart {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let value = match self {
            Self::Text { text } => json!({"type": "text", "text": text}),
            Self::Think { think } => json!({"type": "think", "think": think}),
            Self::ImageUrl { image_url } => json!({"type": "image_url", "image_url": image_url}),
            Self::AudioUrl { audio_url } => json!({"type": "audio_url", "audio_url": audio_url}),
            Self::VideoUrl { video_url } => json!({"type": "video_url", "video_url": video_url}),
            Self::Unknown(value) => value.clone(),
        };
        value.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ContentPart {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;

        fn string_field<E: serde::de::Error>(value: &Value, key: &str) -> Result<String, E> {
            value
                .get(key)
                .and_then(Value::as_str)
                .map(str::to_owned)
                .ok_or_else(|| E::custom(format!("content part missing `{key}` field")))
        }

        fn media_field<E: serde::de::Error>(value: &Value, key: &str) -> Result<MediaUrl, E> {
            let media = value
                .get(key)
                .ok_or_else(|| E::custom(format!("content part missing `{key}` field")))?;
            serde_json::from_value(media.clone()).map_err(E::custom)
        }

        match value.get("type").and_then(Value::as_str) {
            Some("text") => Ok(Self::Text {
                text: string_field(&value, "text")?,
            }),
            Some("think") => Ok(Self::Think {
                think: string_field(&value, "think")?,
            }),
            Some("image_url") => Ok(Self::ImageUrl {
                image_url: media_field(&value, "image_url")?,
            }),
            Some("audio_url") => Ok(Self::AudioUrl {
                audio_url: media_field(&value, "audio_url")?,
            }),
            Some("video_url") => Ok(Self::VideoUrl {
                video_url: media_field(&value, "video_url")?,
            }),
            Some(_) => Ok(Self::Unknown(value)),
            None => Err(D::Error::custom("content part missing `type` field")),
        }
    }
}

/// A tool call requested by the assistant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique call ID, referenced by the answering tool message.
    pub id: String,
    /// Call kind. Always `"function"` today.
    #[serde(rename = "type", default = "default_call_kind")]
    pub kind: String,
    /// The function being called.
    pub function: ToolFunction,
    /// Opaque provider-specific extras, passed through untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extras: Option<Value>,
}

fn default_call_kind() -> String {
    "function".to_string()
}

impl ToolCall {
    /// Create a new function call.
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Option<String>) -> Self {
        Self {
            id: id.into(),
            kind: default_call_kind(),
            function: ToolFunction {
                name: name.into(),
                arguments,
            },
            extras: None,
        }
    }
}

/// The function payload of a tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolFunction {
    /// Tool name.
    pub name: String,
    /// Arguments as a JSON string, exactly as streamed by the model.
    #[serde(default)]
    pub arguments: Option<String>,
}

/// Collect the capabilities `message` requires but `available` lacks.
///
/// Media parts require the matching input capability; `think` parts require
/// a thinking-capable model. Unknown parts require nothing — they are
/// passed through, not interpreted.
#[must_use]
pub fn check_message(
    message: &Message,
    available: &BTreeSet<ModelCapability>,
) -> BTreeSet<ModelCapability> {
    let mut missing = BTreeSet::new();
    let MessageContent::Parts(parts) = &message.content else {
        return missing;
    };
    for part in parts {
        let required = match part {
            ContentPart::ImageUrl { .. } => Some(ModelCapability::ImageIn),
            ContentPart::AudioUrl { .. } => Some(ModelCapability::AudioIn),
            ContentPart::VideoUrl { .. } => Some(ModelCapability::VideoIn),
            ContentPart::Think { .. } => Some(ModelCapability::Thinking),
            ContentPart::Text { .. } | ContentPart::Unknown(_) => None,
        };
        if let Some(capability) = required {
            if !available.contains(&capability) {
                missing.insert(capability);
            }
        }
    }
    missing
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_text_roundtrip() {
        let message = Message::user("hello");
        let line = serde_json::to_string(&message).unwrap();
        let back: Message = serde_json::from_str(&line).unwrap();
        assert_eq!(back, message);
        assert_eq!(back.extract_text(" "), "hello");
    }

    #[test]
    fn test_content_part_tagging() {
        let part = ContentPart::text("hi");
        let value = serde_json::to_value(&part).unwrap();
        assert_eq!(value["type"], "text");
        assert_eq!(value["text"], "hi");
    }

    #[test]
    fn test_unknown_part_preserved_verbatim() {
        let raw = json!({"type": "hologram", "frames": [1, 2, 3]});
        let part: ContentPart = serde_json::from_value(raw.clone()).unwrap();
        assert!(matches!(part, ContentPart::Unknown(_)));
        assert_eq!(part.type_name(), "hologram");
        assert_eq!(serde_json::to_value(&part).unwrap(), raw);
    }

    #[test]
    fn test_part_without_type_rejected() {
        let raw = json!({"text": "hi"});
        assert!(serde_json::from_value::<ContentPart>(raw).is_err());
    }

    #[test]
    fn test_tool_call_default_kind() {
        let raw = json!({
            "id": "tc-1",
            "function": {"name": "Shell", "arguments": "{\"command\": \"ls\"}"}
        });
        let call: ToolCall = serde_json::from_value(raw).unwrap();
        assert_eq!(call.kind, "function");
        assert_eq!(call.function.name, "Shell");
    }

    #[test]
    fn test_extract_text_skips_think_parts() {
        let message = Message {
            role: Role::Assistant,
            content: MessageContent::Parts(vec![
                ContentPart::Think {
                    think: "pondering".to_string(),
                },
                ContentPart::text("answer"),
            ]),
            tool_calls: Vec::new(),
            tool_call_id: None,
        };
        assert_eq!(message.extract_text(" "), "answer");
    }

    #[test]
    fn test_check_message_missing_capabilities() {
        let message = Message::user_parts(vec![
            ContentPart::text("look at this"),
            ContentPart::ImageUrl {
                image_url: MediaUrl {
                    url: "https://example.com/cat.png".to_string(),
                },
            },
        ]);
        let missing = check_message(&message, &BTreeSet::new());
        assert!(missing.contains(&ModelCapability::ImageIn));
        assert_eq!(missing.len(), 1);

        let mut available = BTreeSet::new();
        available.insert(ModelCapability::ImageIn);
        assert!(check_message(&message, &available).is_empty());
    }

    #[test]
    fn test_check_message_plain_text_needs_nothing() {
        let message = Message::user("just text");
        assert!(check_message(&message, &BTreeSet::new()).is_empty());
    }
}

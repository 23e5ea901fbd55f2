use serde::de::DeserializeOwned;

/// One decoded `chat.completion.chunk` payload.
///
/// Only `choices[0].delta.content` drives the stream. The other fields are
/// informational: a `null` or mistyped value decodes to `None` instead of
/// failing the frame, and unknown fields are ignored.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CompletionDelta {
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub object: Option<String>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub created: Option<i64>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Missing and `null` both decode to an empty list.
    #[serde(default, deserialize_with = "null_as_default")]
    pub choices: Vec<Choice>,
}

/// A single choice inside a streamed chunk.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Choice {
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub delta: Delta,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

/// Incremental message fragment carried by a choice.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Delta {
    /// Present on the first chunk of a message (`assistant`).
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl CompletionDelta {
    /// Decodes a raw event payload.
    pub fn from_json(data: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(data)
    }

    /// Text carried by the first choice, if any.
    pub fn first_content(&self) -> Option<&str> {
        self.choices.first()?.delta.content.as_deref()
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Default + serde::Deserialize<'de>,
{
    let value: Option<T> = serde::Deserialize::deserialize(deserializer)?;
    Ok(value.unwrap_or_default())
}

fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: DeserializeOwned,
{
    let value: serde_json::Value = serde::Deserialize::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

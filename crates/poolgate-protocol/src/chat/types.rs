use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Assistant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CompletionUsage {
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
}

/// Usage slot on a streamed chunk.
///
/// When the client asked for usage reporting, every chunk before the final
/// one must carry an explicit `"usage": null` rather than omitting the field;
/// strict-schema clients break on a field that appears only at the end.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum ChunkUsage {
    /// Usage reporting was not requested; the field is not serialized.
    #[default]
    Omitted,
    /// Requested but not yet known; serialized as `null`.
    Pending,
    /// The final aggregate, on the last chunk only.
    Reported(CompletionUsage),
}

impl ChunkUsage {
    pub fn is_omitted(&self) -> bool {
        matches!(self, ChunkUsage::Omitted)
    }
}

impl Serialize for ChunkUsage {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            // Omitted is skipped at the struct level; treat a direct call
            // like Pending so the output is still valid JSON.
            ChunkUsage::Omitted | ChunkUsage::Pending => serializer.serialize_none(),
            ChunkUsage::Reported(usage) => usage.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for ChunkUsage {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Option::<CompletionUsage>::deserialize(deserializer)? {
            Some(usage) => Ok(ChunkUsage::Reported(usage)),
            None => Ok(ChunkUsage::Pending),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallChunkFunction {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallChunk {
    pub index: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<ToolCallKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function: Option<ToolCallChunkFunction>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallKind {
    Function,
}

/// A fully assembled tool call, used on the non-streaming surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ToolCallKind,
    pub function: ToolCallFunction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallFunction {
    pub name: String,
    pub arguments: String,
}

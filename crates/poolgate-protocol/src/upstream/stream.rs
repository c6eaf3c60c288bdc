use serde::{Deserialize, Serialize};

use crate::upstream::types::{OutputItem, Response};

/// Decoded form of one upstream SSE frame. Events the transcoder does not
/// recognize are preserved verbatim so the passthrough surface stays honest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UpstreamEvent {
    Known(UpstreamEventKnown),
    Unknown(serde_json::Value),
}

impl UpstreamEvent {
    /// The wire name carried in the `type` field, if any.
    pub fn event_name(&self) -> Option<&str> {
        match self {
            UpstreamEvent::Known(known) => Some(known.event_name()),
            UpstreamEvent::Unknown(value) => value.get("type").and_then(|v| v.as_str()),
        }
    }

    /// Terminal events end the stream; nothing after them is valid content.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UpstreamEvent::Known(
                UpstreamEventKnown::Completed(_)
                    | UpstreamEventKnown::Incomplete(_)
                    | UpstreamEventKnown::Failed(_)
            )
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum UpstreamEventKnown {
    #[serde(rename = "response.created")]
    Created(ResponseLifecycleEvent),
    #[serde(rename = "response.in_progress")]
    InProgress(ResponseLifecycleEvent),
    #[serde(rename = "response.output_item.added")]
    OutputItemAdded(OutputItemEvent),
    #[serde(rename = "response.output_item.done")]
    OutputItemDone(OutputItemEvent),
    #[serde(rename = "response.output_text.delta")]
    OutputTextDelta(TextDeltaEvent),
    #[serde(rename = "response.output_text.done")]
    OutputTextDone(TextDoneEvent),
    #[serde(rename = "response.function_call_arguments.delta")]
    FunctionCallArgumentsDelta(FunctionCallArgumentsDeltaEvent),
    #[serde(rename = "response.function_call_arguments.done")]
    FunctionCallArgumentsDone(FunctionCallArgumentsDoneEvent),
    #[serde(rename = "response.completed")]
    Completed(ResponseLifecycleEvent),
    #[serde(rename = "response.incomplete")]
    Incomplete(ResponseLifecycleEvent),
    #[serde(rename = "response.failed")]
    Failed(ResponseLifecycleEvent),
}

impl UpstreamEventKnown {
    pub fn event_name(&self) -> &'static str {
        match self {
            UpstreamEventKnown::Created(_) => "response.created",
            UpstreamEventKnown::InProgress(_) => "response.in_progress",
            UpstreamEventKnown::OutputItemAdded(_) => "response.output_item.added",
            UpstreamEventKnown::OutputItemDone(_) => "response.output_item.done",
            UpstreamEventKnown::OutputTextDelta(_) => "response.output_text.delta",
            UpstreamEventKnown::OutputTextDone(_) => "response.output_text.done",
            UpstreamEventKnown::FunctionCallArgumentsDelta(_) => {
                "response.function_call_arguments.delta"
            }
            UpstreamEventKnown::FunctionCallArgumentsDone(_) => {
                "response.function_call_arguments.done"
            }
            UpstreamEventKnown::Completed(_) => "response.completed",
            UpstreamEventKnown::Incomplete(_) => "response.incomplete",
            UpstreamEventKnown::Failed(_) => "response.failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseLifecycleEvent {
    pub response: Response,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence_number: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputItemEvent {
    pub output_index: i64,
    pub item: OutputItem,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence_number: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextDeltaEvent {
    pub output_index: i64,
    #[serde(default)]
    pub content_index: i64,
    pub delta: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextDoneEvent {
    pub output_index: i64,
    #[serde(default)]
    pub content_index: i64,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCallArgumentsDeltaEvent {
    pub output_index: i64,
    pub item_id: String,
    pub delta: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCallArgumentsDoneEvent {
    pub output_index: i64,
    pub item_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub arguments: String,
}

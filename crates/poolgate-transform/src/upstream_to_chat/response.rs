use std::collections::BTreeMap;

use poolgate_protocol::chat::response::{
    ChatChoice, ChatCompletionResponse, ChatObjectType, ChatResponseMessage,
};
use poolgate_protocol::chat::types::{
    CompletionUsage, FinishReason, Role, ToolCall, ToolCallFunction, ToolCallKind,
};
use poolgate_protocol::upstream::stream::{UpstreamEvent, UpstreamEventKnown};
use poolgate_protocol::upstream::types::{
    IncompleteDetails, IncompleteReason, OutputItem, ResponseUsage,
};

/// Folds a complete upstream event sequence into one chat-completion
/// response, for clients that did not ask for streaming.
#[derive(Debug, Default)]
pub struct ChatAggregator {
    id: String,
    model: String,
    created: i64,
    text: BTreeMap<(i64, i64), String>,
    calls: BTreeMap<i64, (Option<String>, Option<String>, String)>,
    usage: Option<ResponseUsage>,
    incomplete: Option<IncompleteDetails>,
    finished: bool,
}

impl ChatAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn finished(&self) -> bool {
        self.finished
    }

    pub fn absorb(&mut self, event: &UpstreamEvent) {
        if self.finished {
            return;
        }
        let UpstreamEvent::Known(known) = event else {
            return;
        };
        match known {
            UpstreamEventKnown::Created(event) | UpstreamEventKnown::InProgress(event) => {
                self.id = event.response.id.clone();
                self.model = event.response.model.clone();
                self.created = event.response.created_at;
            }
            UpstreamEventKnown::OutputTextDelta(event) => {
                self.text
                    .entry((event.output_index, event.content_index))
                    .and_modify(|text| text.push_str(&event.delta))
                    .or_insert_with(|| event.delta.clone());
            }
            UpstreamEventKnown::OutputTextDone(event) => {
                self.text
                    .insert((event.output_index, event.content_index), event.text.clone());
            }
            UpstreamEventKnown::OutputItemAdded(event)
            | UpstreamEventKnown::OutputItemDone(event) => {
                if let OutputItem::FunctionCall(function) = &event.item {
                    let entry = self.calls.entry(event.output_index).or_default();
                    entry.0.get_or_insert_with(|| {
                        function.id.clone().unwrap_or_else(|| function.call_id.clone())
                    });
                    entry.1.get_or_insert_with(|| function.name.clone());
                    if !function.arguments.is_empty() {
                        entry.2 = function.arguments.clone();
                    }
                }
            }
            UpstreamEventKnown::FunctionCallArgumentsDelta(event) => {
                let entry = self.calls.entry(event.output_index).or_default();
                entry.2.push_str(&event.delta);
            }
            UpstreamEventKnown::FunctionCallArgumentsDone(event) => {
                let entry = self.calls.entry(event.output_index).or_default();
                if entry.1.is_none() {
                    entry.1 = event.name.clone();
                }
                entry.2 = event.arguments.clone();
            }
            UpstreamEventKnown::Completed(event)
            | UpstreamEventKnown::Incomplete(event)
            | UpstreamEventKnown::Failed(event) => {
                self.finished = true;
                self.id = event.response.id.clone();
                self.model = event.response.model.clone();
                self.created = event.response.created_at;
                self.usage = event.response.usage;
                self.incomplete = event.response.incomplete_details;
            }
        }
    }

    pub fn into_response(self) -> ChatCompletionResponse {
        let content = if self.text.is_empty() {
            None
        } else {
            Some(
                self.text
                    .values()
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(""),
            )
        };
        let tool_calls: Vec<ToolCall> = self
            .calls
            .into_values()
            .filter_map(|(id, name, arguments)| {
                Some(ToolCall {
                    id: id?,
                    kind: ToolCallKind::Function,
                    function: ToolCallFunction {
                        name: name?,
                        arguments,
                    },
                })
            })
            .collect();

        let finish_reason = if !tool_calls.is_empty() {
            FinishReason::ToolCalls
        } else {
            match self.incomplete {
                Some(IncompleteDetails {
                    reason: IncompleteReason::MaxOutputTokens,
                }) => FinishReason::Length,
                Some(IncompleteDetails {
                    reason: IncompleteReason::ContentFilter,
                }) => FinishReason::ContentFilter,
                None => FinishReason::Stop,
            }
        };

        ChatCompletionResponse {
            id: self.id,
            object: ChatObjectType::ChatCompletion,
            created: self.created,
            model: self.model,
            choices: vec![ChatChoice {
                index: 0,
                message: ChatResponseMessage {
                    role: Role::Assistant,
                    content,
                    tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                },
                finish_reason: Some(finish_reason),
            }],
            usage: self.usage.map(|usage| CompletionUsage {
                prompt_tokens: usage.input_tokens,
                completion_tokens: usage.output_tokens,
                total_tokens: usage.total_tokens,
            }),
        }
    }
}

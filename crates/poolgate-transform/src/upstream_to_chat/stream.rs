use std::collections::BTreeMap;

use poolgate_protocol::chat::stream::{
    ChatCompletionChunk, ChunkChoice, ChunkDelta, ChunkObjectType,
};
use poolgate_protocol::chat::types::{
    ChunkUsage, CompletionUsage, FinishReason, Role, ToolCallChunk, ToolCallChunkFunction,
    ToolCallKind,
};
use poolgate_protocol::upstream::stream::{
    FunctionCallArgumentsDeltaEvent, FunctionCallArgumentsDoneEvent, OutputItemEvent,
    ResponseLifecycleEvent, TextDeltaEvent, TextDoneEvent, UpstreamEvent, UpstreamEventKnown,
};
use poolgate_protocol::upstream::types::{
    FunctionCallItem, IncompleteDetails, IncompleteReason, OutputItem, Response, ResponseUsage,
};

/// An event that arrived after the stream's terminal event. It is dropped,
/// never forwarded; the caller is expected to log it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolAnomaly {
    pub event: String,
}

#[derive(Debug, Clone)]
struct ToolCallState {
    index: i64,
    id: Option<String>,
    name: Option<String>,
    arguments: String,
    finalized: bool,
}

/// Derives chat-completion chunks from the upstream event sequence.
///
/// Tool-call argument fragments accumulate per upstream output index; a
/// call's arguments are complete only once its explicit done marker or a
/// terminal event arrives. Text deltas are forwarded as they come, never
/// buffered. Exactly one chunk carries a finish_reason.
#[derive(Debug)]
pub struct UpstreamToChatStream {
    id: String,
    model: String,
    created: i64,
    include_usage: bool,
    role_sent: bool,
    tool_calls: BTreeMap<i64, ToolCallState>,
    next_tool_index: i64,
    saw_tool_calls: bool,
    text_done: BTreeMap<(i64, i64), String>,
    usage: Option<ResponseUsage>,
    incomplete: Option<IncompleteDetails>,
    finished: bool,
    anomaly: Option<ProtocolAnomaly>,
}

impl UpstreamToChatStream {
    pub fn new(include_usage: bool) -> Self {
        Self {
            id: "response".to_string(),
            model: "unknown".to_string(),
            created: 0,
            include_usage,
            role_sent: false,
            tool_calls: BTreeMap::new(),
            next_tool_index: 0,
            saw_tool_calls: false,
            text_done: BTreeMap::new(),
            usage: None,
            incomplete: None,
            finished: false,
            anomaly: None,
        }
    }

    /// True once a terminal event has been transformed.
    pub fn finished(&self) -> bool {
        self.finished
    }

    /// Post-terminal event dropped since the last call, if any.
    pub fn take_anomaly(&mut self) -> Option<ProtocolAnomaly> {
        self.anomaly.take()
    }

    /// Completed argument strings per chat tool-call index. Calls without an
    /// observed done marker before the terminal are finalized as-is by the
    /// terminal itself.
    pub fn finalized_arguments(&self) -> Vec<(i64, String)> {
        self.tool_calls
            .values()
            .filter(|state| state.finalized)
            .map(|state| (state.index, state.arguments.clone()))
            .collect()
    }

    pub fn transform_event(&mut self, event: &UpstreamEvent) -> Vec<ChatCompletionChunk> {
        if self.finished {
            self.anomaly = Some(ProtocolAnomaly {
                event: event.event_name().unwrap_or("unknown").to_string(),
            });
            return Vec::new();
        }
        let UpstreamEvent::Known(known) = event else {
            // Unknown event kinds pass through on the passthrough surface
            // only; the derived stream has nothing to map them to.
            return Vec::new();
        };

        match known {
            UpstreamEventKnown::Created(event) | UpstreamEventKnown::InProgress(event) => {
                self.absorb_response(&event.response);
                Vec::new()
            }
            UpstreamEventKnown::OutputItemAdded(event) => self.handle_item_added(event),
            UpstreamEventKnown::OutputItemDone(event) => self.handle_item_done(event),
            UpstreamEventKnown::OutputTextDelta(event) => self.handle_text_delta(event),
            UpstreamEventKnown::OutputTextDone(event) => self.handle_text_done(event),
            UpstreamEventKnown::FunctionCallArgumentsDelta(event) => {
                self.handle_arguments_delta(event)
            }
            UpstreamEventKnown::FunctionCallArgumentsDone(event) => {
                self.handle_arguments_done(event)
            }
            UpstreamEventKnown::Completed(event)
            | UpstreamEventKnown::Incomplete(event)
            | UpstreamEventKnown::Failed(event) => self.finish(event),
        }
    }

    fn handle_item_added(&mut self, event: &OutputItemEvent) -> Vec<ChatCompletionChunk> {
        let OutputItem::FunctionCall(function) = &event.item else {
            return Vec::new();
        };
        let (index, id, name, arguments) =
            self.open_call(event.output_index, function, /* finalize */ false);
        self.emit_tool_chunk(index, id, name, arguments)
    }

    fn handle_item_done(&mut self, event: &OutputItemEvent) -> Vec<ChatCompletionChunk> {
        let OutputItem::FunctionCall(function) = &event.item else {
            return Vec::new();
        };
        let (index, id, name, delta) =
            self.open_call(event.output_index, function, /* finalize */ true);
        if delta.is_none() {
            return Vec::new();
        }
        self.emit_tool_chunk(index, id, name, delta)
    }

    fn handle_text_delta(&mut self, event: &TextDeltaEvent) -> Vec<ChatCompletionChunk> {
        if event.delta.is_empty() {
            return Vec::new();
        }
        self.text_done
            .entry((event.output_index, event.content_index))
            .and_modify(|seen| seen.push_str(&event.delta))
            .or_insert_with(|| event.delta.clone());
        let role = self.take_role();
        self.emit_delta(ChunkDelta {
            role,
            content: Some(event.delta.clone()),
            tool_calls: None,
        })
    }

    fn handle_text_done(&mut self, event: &TextDoneEvent) -> Vec<ChatCompletionChunk> {
        let key = (event.output_index, event.content_index);
        let delta = compute_delta(self.text_done.get(&key), &event.text);
        self.text_done.insert(key, event.text.clone());
        if delta.is_empty() {
            return Vec::new();
        }
        let role = self.take_role();
        self.emit_delta(ChunkDelta {
            role,
            content: Some(delta),
            tool_calls: None,
        })
    }

    fn handle_arguments_delta(
        &mut self,
        event: &FunctionCallArgumentsDeltaEvent,
    ) -> Vec<ChatCompletionChunk> {
        let (index, id, name) = {
            let state =
                self.call_state(event.output_index, Some(event.item_id.clone()), None);
            state.arguments.push_str(&event.delta);
            (state.index, state.id.clone(), state.name.clone())
        };
        self.emit_tool_chunk(index, id, name, Some(event.delta.clone()))
    }

    fn handle_arguments_done(
        &mut self,
        event: &FunctionCallArgumentsDoneEvent,
    ) -> Vec<ChatCompletionChunk> {
        let (index, id, name, delta) = {
            let state = self.call_state(
                event.output_index,
                Some(event.item_id.clone()),
                event.name.clone(),
            );
            let delta = compute_delta(Some(&state.arguments), &event.arguments);
            state.arguments = event.arguments.clone();
            state.finalized = true;
            (state.index, state.id.clone(), state.name.clone(), delta)
        };
        if delta.is_empty() {
            return Vec::new();
        }
        self.emit_tool_chunk(index, id, name, Some(delta))
    }

    fn finish(&mut self, event: &ResponseLifecycleEvent) -> Vec<ChatCompletionChunk> {
        self.finished = true;
        self.absorb_response(&event.response);
        // The terminal event is the implicit done marker for any call whose
        // explicit marker never arrived.
        for state in self.tool_calls.values_mut() {
            state.finalized = true;
        }

        let finish_reason = self.resolve_finish_reason();
        let usage = match (self.include_usage, self.usage.as_ref()) {
            (false, _) => ChunkUsage::Omitted,
            (true, Some(usage)) => ChunkUsage::Reported(map_usage(usage)),
            (true, None) => ChunkUsage::Pending,
        };
        vec![ChatCompletionChunk {
            id: self.id.clone(),
            object: ChunkObjectType::ChatCompletionChunk,
            created: self.created,
            model: self.model.clone(),
            choices: vec![ChunkChoice {
                index: 0,
                delta: ChunkDelta {
                    role: self.take_role(),
                    content: None,
                    tool_calls: None,
                },
                finish_reason: Some(finish_reason),
            }],
            usage,
        }]
    }

    fn resolve_finish_reason(&self) -> FinishReason {
        if self.saw_tool_calls {
            return FinishReason::ToolCalls;
        }
        if let Some(details) = &self.incomplete {
            return match details.reason {
                IncompleteReason::MaxOutputTokens => FinishReason::Length,
                IncompleteReason::ContentFilter => FinishReason::ContentFilter,
            };
        }
        FinishReason::Stop
    }

    fn absorb_response(&mut self, response: &Response) {
        self.id = response.id.clone();
        self.model = response.model.clone();
        self.created = response.created_at;
        self.incomplete = response.incomplete_details;
        if let Some(usage) = response.usage {
            self.usage = Some(usage);
        }
    }

    fn open_call(
        &mut self,
        output_index: i64,
        function: &FunctionCallItem,
        finalize: bool,
    ) -> (i64, Option<String>, Option<String>, Option<String>) {
        let id = function.id.clone().or_else(|| Some(function.call_id.clone()));
        let state = self.call_state(output_index, id, Some(function.name.clone()));
        let delta = if function.arguments.is_empty() {
            None
        } else {
            let delta = compute_delta(Some(&state.arguments), &function.arguments);
            state.arguments = function.arguments.clone();
            (!delta.is_empty()).then_some(delta)
        };
        if finalize {
            state.finalized = true;
        }
        (state.index, state.id.clone(), state.name.clone(), delta)
    }

    /// Buffers are keyed by the upstream output index, never arrival order;
    /// interleaved deltas for different calls cannot cross-contaminate.
    fn call_state(
        &mut self,
        output_index: i64,
        id: Option<String>,
        name: Option<String>,
    ) -> &mut ToolCallState {
        let next_index = &mut self.next_tool_index;
        let state = self.tool_calls.entry(output_index).or_insert_with(|| {
            let index = *next_index;
            *next_index += 1;
            ToolCallState {
                index,
                id: None,
                name: None,
                arguments: String::new(),
                finalized: false,
            }
        });
        if state.id.is_none() {
            state.id = id;
        }
        if state.name.is_none() {
            state.name = name;
        }
        state
    }

    fn emit_tool_chunk(
        &mut self,
        index: i64,
        id: Option<String>,
        name: Option<String>,
        arguments: Option<String>,
    ) -> Vec<ChatCompletionChunk> {
        self.saw_tool_calls = true;
        if name.is_none() && arguments.is_none() {
            return Vec::new();
        }
        let chunk = ToolCallChunk {
            index,
            id,
            kind: Some(ToolCallKind::Function),
            function: Some(ToolCallChunkFunction { name, arguments }),
        };
        let role = self.take_role();
        self.emit_delta(ChunkDelta {
            role,
            content: None,
            tool_calls: Some(vec![chunk]),
        })
    }

    fn emit_delta(&mut self, delta: ChunkDelta) -> Vec<ChatCompletionChunk> {
        let usage = if self.include_usage {
            ChunkUsage::Pending
        } else {
            ChunkUsage::Omitted
        };
        vec![ChatCompletionChunk {
            id: self.id.clone(),
            object: ChunkObjectType::ChatCompletionChunk,
            created: self.created,
            model: self.model.clone(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason: None,
            }],
            usage,
        }]
    }

    fn take_role(&mut self) -> Option<Role> {
        if self.role_sent {
            None
        } else {
            self.role_sent = true;
            Some(Role::Assistant)
        }
    }
}

fn compute_delta(previous: Option<&String>, full: &str) -> String {
    match previous {
        Some(prev) if full.starts_with(prev.as_str()) => full[prev.len()..].to_string(),
        _ => full.to_string(),
    }
}

fn map_usage(usage: &ResponseUsage) -> CompletionUsage {
    CompletionUsage {
        prompt_tokens: usage.input_tokens,
        completion_tokens: usage.output_tokens,
        total_tokens: usage.total_tokens,
    }
}

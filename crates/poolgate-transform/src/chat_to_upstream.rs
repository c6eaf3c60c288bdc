use serde_json::{Map, Value, json};

use poolgate_protocol::chat::request::ChatCompletionsRequestBody;
use poolgate_protocol::upstream::request::{ResponsesRequestBody, StreamOptions};

/// Validation failures for a chat-completions request. Each carries enough
/// context to build an `invalid_request_error` message without guessing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranslateError {
    EmptyMessages,
    MessageNotObject,
    NonTextSystemContent { role: String },
    InvalidUserContent { detail: String },
}

impl TranslateError {
    pub fn message(&self) -> String {
        match self {
            TranslateError::EmptyMessages => "'messages' must be a non-empty list".to_string(),
            TranslateError::MessageNotObject => "'messages' must contain objects".to_string(),
            TranslateError::NonTextSystemContent { role } => {
                format!("{role} messages must be text-only")
            }
            TranslateError::InvalidUserContent { detail } => detail.clone(),
        }
    }
}

/// Translate a chat-completions request into the upstream responses shape.
///
/// System and developer messages fold into `instructions`; the remaining
/// messages become input items; chat-style tool declarations flatten into the
/// upstream's single-level form. `max_tokens` and `store` have no upstream
/// counterpart and are dropped.
pub fn chat_to_upstream_request(
    body: &ChatCompletionsRequestBody,
) -> Result<ResponsesRequestBody, TranslateError> {
    validate_messages(&body.messages)?;

    let (instructions, input) = coerce_messages(&body.messages);
    let tools = body.tools.as_ref().map(|tools| normalize_tools(tools));
    let tool_choice = body.tool_choice.as_ref().map(normalize_tool_choice);

    let stream_options = body.stream_options.as_ref().map(|options| StreamOptions {
        include_usage: options.include_usage,
        include_obfuscation: options.include_obfuscation,
    });

    Ok(ResponsesRequestBody {
        model: body.model.clone(),
        instructions,
        input: Some(Value::Array(input)),
        tools,
        tool_choice,
        stream: body.stream,
        stream_options,
        temperature: body.temperature,
        top_p: body.top_p,
        prompt_cache_key: body.prompt_cache_key.clone(),
        extra: Map::new(),
    })
}

fn validate_messages(messages: &[Value]) -> Result<(), TranslateError> {
    if messages.is_empty() {
        return Err(TranslateError::EmptyMessages);
    }
    for message in messages {
        let Some(object) = message.as_object() else {
            return Err(TranslateError::MessageNotObject);
        };
        let role = object.get("role").and_then(Value::as_str).unwrap_or("");
        let content = object.get("content");
        match role {
            "system" | "developer" => ensure_text_only(content, role)?,
            "user" => validate_user_content(content)?,
            _ => {}
        }
    }
    Ok(())
}

fn ensure_text_only(content: Option<&Value>, role: &str) -> Result<(), TranslateError> {
    let reject = || TranslateError::NonTextSystemContent {
        role: role.to_string(),
    };
    match content {
        None | Some(Value::Null) | Some(Value::String(_)) => Ok(()),
        Some(Value::Array(parts)) => {
            for part in parts {
                match part {
                    Value::String(_) => {}
                    Value::Object(map) => {
                        let kind = map.get("type").and_then(Value::as_str);
                        if !matches!(kind, None | Some("text")) {
                            return Err(reject());
                        }
                        if !map.get("text").is_some_and(Value::is_string) {
                            return Err(reject());
                        }
                    }
                    _ => return Err(reject()),
                }
            }
            Ok(())
        }
        Some(_) => Err(reject()),
    }
}

fn validate_user_content(content: Option<&Value>) -> Result<(), TranslateError> {
    let parts = match content {
        None | Some(Value::Null) | Some(Value::String(_)) => return Ok(()),
        Some(Value::Array(parts)) => parts.as_slice(),
        Some(other) => std::slice::from_ref(other),
    };
    for part in parts {
        if part.is_string() {
            continue;
        }
        let Some(map) = part.as_object() else {
            return Err(TranslateError::InvalidUserContent {
                detail: "user message content parts must be objects".to_string(),
            });
        };
        let kind = map
            .get("type")
            .and_then(Value::as_str)
            .or_else(|| map.contains_key("text").then_some("text"));
        match kind {
            Some("text") => {
                if !map.get("text").is_some_and(Value::is_string) {
                    return Err(TranslateError::InvalidUserContent {
                        detail: "text content parts must include a string 'text'".to_string(),
                    });
                }
            }
            Some("image_url") => {
                let url = map
                    .get("image_url")
                    .and_then(Value::as_object)
                    .and_then(|image| image.get("url"));
                if !url.is_some_and(Value::is_string) {
                    return Err(TranslateError::InvalidUserContent {
                        detail: "image content parts must include image_url.url".to_string(),
                    });
                }
            }
            other => {
                return Err(TranslateError::InvalidUserContent {
                    detail: format!("unsupported user content part type: {other:?}"),
                });
            }
        }
    }
    Ok(())
}

/// Split messages into upstream `instructions` (system/developer text) and
/// input items (everything else, re-tagged as upstream message items).
fn coerce_messages(messages: &[Value]) -> (Option<String>, Vec<Value>) {
    let mut instruction_parts: Vec<String> = Vec::new();
    let mut input = Vec::new();

    for message in messages {
        let Some(object) = message.as_object() else {
            continue;
        };
        let role = object.get("role").and_then(Value::as_str).unwrap_or("user");
        if matches!(role, "system" | "developer") {
            if let Some(text) = text_of(object.get("content")) {
                instruction_parts.push(text);
            }
            continue;
        }
        input.push(json!({
            "type": "message",
            "role": role,
            "content": object.get("content").cloned().unwrap_or(Value::Null),
        }));
    }

    let instructions =
        (!instruction_parts.is_empty()).then(|| instruction_parts.join("\n\n"));
    (instructions, input)
}

fn text_of(content: Option<&Value>) -> Option<String> {
    match content? {
        Value::String(text) => Some(text.clone()),
        Value::Array(parts) => {
            let joined: Vec<String> = parts
                .iter()
                .filter_map(|part| match part {
                    Value::String(text) => Some(text.clone()),
                    Value::Object(map) => map
                        .get("text")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    _ => None,
                })
                .collect();
            (!joined.is_empty()).then(|| joined.join("\n"))
        }
        _ => None,
    }
}

/// Flatten `{type, function: {name, description, parameters}}` declarations
/// into the upstream's `{type, name, description, parameters}` form. Tools
/// without a usable name are dropped rather than forwarded broken.
fn normalize_tools(tools: &[Value]) -> Vec<Value> {
    let mut normalized = Vec::with_capacity(tools.len());
    for tool in tools {
        let Some(map) = tool.as_object() else {
            continue;
        };
        if let Some(function) = map.get("function").and_then(Value::as_object) {
            let Some(name) = function.get("name").and_then(Value::as_str) else {
                continue;
            };
            if name.is_empty() {
                continue;
            }
            normalized.push(json!({
                "type": map.get("type").cloned().unwrap_or(json!("function")),
                "name": name,
                "description": function.get("description").cloned().unwrap_or(Value::Null),
                "parameters": function.get("parameters").cloned().unwrap_or(Value::Null),
            }));
            continue;
        }
        if map.get("name").and_then(Value::as_str).is_some_and(|n| !n.is_empty()) {
            normalized.push(tool.clone());
        }
    }
    normalized
}

fn normalize_tool_choice(tool_choice: &Value) -> Value {
    let Some(map) = tool_choice.as_object() else {
        return tool_choice.clone();
    };
    if let Some(function) = map.get("function").and_then(Value::as_object)
        && let Some(name) = function.get("name").and_then(Value::as_str)
        && !name.is_empty()
    {
        return json!({
            "type": map.get("type").cloned().unwrap_or(json!("function")),
            "name": name,
        });
    }
    tool_choice.clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_request(messages: Vec<Value>) -> ChatCompletionsRequestBody {
        ChatCompletionsRequestBody {
            model: "gw-test".to_string(),
            messages,
            ..Default::default()
        }
    }

    #[test]
    fn empty_messages_rejected() {
        let err = chat_to_upstream_request(&base_request(Vec::new())).unwrap_err();
        assert_eq!(err, TranslateError::EmptyMessages);
    }

    #[test]
    fn system_messages_become_instructions() {
        let request = base_request(vec![
            json!({"role": "system", "content": "be terse"}),
            json!({"role": "user", "content": "hi"}),
        ]);
        let upstream = chat_to_upstream_request(&request).unwrap();
        assert_eq!(upstream.instructions.as_deref(), Some("be terse"));
        let input = upstream.input.unwrap();
        assert_eq!(input.as_array().unwrap().len(), 1);
        assert_eq!(input[0]["role"], "user");
    }

    #[test]
    fn image_system_content_rejected() {
        let request = base_request(vec![json!({
            "role": "system",
            "content": [{"type": "image_url", "image_url": {"url": "data:x"}}],
        })]);
        let err = chat_to_upstream_request(&request).unwrap_err();
        assert!(matches!(err, TranslateError::NonTextSystemContent { .. }));
    }

    #[test]
    fn chat_tools_flattened() {
        let mut request = base_request(vec![json!({"role": "user", "content": "hi"})]);
        request.tools = Some(vec![json!({
            "type": "function",
            "function": {"name": "lookup", "parameters": {"type": "object"}},
        })]);
        let upstream = chat_to_upstream_request(&request).unwrap();
        let tools = upstream.tools.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0]["name"], "lookup");
        assert!(tools[0].get("function").is_none());
    }

    #[test]
    fn nameless_tools_dropped() {
        let mut request = base_request(vec![json!({"role": "user", "content": "hi"})]);
        request.tools = Some(vec![json!({"type": "function", "function": {}})]);
        let upstream = chat_to_upstream_request(&request).unwrap();
        assert!(upstream.tools.unwrap().is_empty());
    }

    #[test]
    fn tool_choice_function_form_flattened() {
        let mut request = base_request(vec![json!({"role": "user", "content": "hi"})]);
        request.tool_choice = Some(json!({"type": "function", "function": {"name": "lookup"}}));
        let upstream = chat_to_upstream_request(&request).unwrap();
        assert_eq!(
            upstream.tool_choice.unwrap(),
            json!({"type": "function", "name": "lookup"})
        );
    }
}

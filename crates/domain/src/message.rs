use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A role in an agent's history. `User` and `Tool` are the only
/// externally-sourced roles; `Assistant` is the accumulated text of one
/// cycle (possibly including raw tool-call markup).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A single, immutable-after-append entry in an agent's history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            tool_call_id: None,
            name: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_call_id: None,
            name: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_call_id: None,
            name: None,
        }
    }

    /// Build the `[From @sender]`-prefixed delivery message for
    /// `send_message` (Testable Property #3).
    pub fn delivered_from(sender: &str, content: &str) -> Self {
        Self {
            role: Role::User,
            content: format!("[From @{sender}] {content}"),
            tool_call_id: None,
            name: None,
        }
    }

    pub fn tool_result(call_id: impl Into<String>, name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_call_id: Some(call_id.into()),
            name: Some(name.into()),
        }
    }
}

/// A coerced tool-call argument value. XML text is always a string on the
/// wire; tools coerce into richer types where their parameter expects one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl ArgValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ArgValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ArgValue::Int(i) => Some(*i),
            ArgValue::String(s) => s.parse().ok(),
            _ => None,
        }
    }
}

/// A tool call parsed from XML embedded in an assistant turn. `call_id` is
/// assigned by the parser, monotonic within the turn that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: BTreeMap<String, ArgValue>,
}

impl ToolCall {
    pub fn arg(&self, name: &str) -> Option<&str> {
        self.arguments.get(name).and_then(ArgValue::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivered_from_has_prefix() {
        let m = Message::delivered_from("admin_ai", "hello");
        assert_eq!(m.role, Role::User);
        assert_eq!(m.content, "[From @admin_ai] hello");
    }

    #[test]
    fn arg_value_coercion() {
        let mut args = BTreeMap::new();
        args.insert("count".to_string(), ArgValue::String("3".to_string()));
        let call = ToolCall {
            call_id: "c1".into(),
            tool_name: "file_system".into(),
            arguments: args,
        };
        assert_eq!(call.arg("count"), Some("3"));
        assert_eq!(call.arguments["count"].as_i64(), Some(3));
    }
}

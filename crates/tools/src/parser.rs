//! XML-in-text tool-call scanner (spec §4.5, §6).
//!
//! No third-party XML crate is introduced — this corpus never depends on
//! one for inline-tag extraction of this shape. The parser is a small
//! hand-rolled scanner over the assistant text built on `regex`, matching
//! registered tool names as top-level tags and recursing into their
//! children as parameters, with a minimal HTML entity unescape applied to
//! captured text content.

use regex::Regex;
use sa_domain::message::{ArgValue, ToolCall};
use std::collections::BTreeMap;
use std::sync::OnceLock;

fn child_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<([A-Za-z_][\w-]*)>(.*?)</\1>").expect("static regex"))
}

/// Un-escape the five HTML entities the spec's wire format requires
/// (spec §6: "Content is HTML-unescaped before interpretation").
pub fn html_unescape(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

/// Scan `text` for top-level elements whose tag matches one of
/// `known_tools`, in document order, regardless of kind. `call_id`s are
/// assigned monotonically starting at `start_index` (the caller threads the
/// running counter across a turn if this is invoked more than once).
pub fn parse_tool_calls(text: &str, known_tools: &[&str], start_index: usize) -> Vec<ToolCall> {
    let mut matches: Vec<(usize, &str, String)> = Vec::new();

    for tool_name in known_tools {
        let pattern = format!(r"(?s)<{tool_name}>(.*?)</{tool_name}>");
        let re = match Regex::new(&pattern) {
            Ok(re) => re,
            Err(_) => continue,
        };
        for m in re.captures_iter(text) {
            let whole = m.get(0).expect("group 0 always present");
            let inner = m.get(1).map(|g| g.as_str()).unwrap_or("");
            matches.push((whole.start(), tool_name, inner.to_string()));
        }
    }

    matches.sort_by_key(|(pos, _, _)| *pos);

    matches
        .into_iter()
        .enumerate()
        .map(|(i, (_, tool_name, inner))| ToolCall {
            call_id: format!("call_{}", start_index + i + 1),
            tool_name: tool_name.to_string(),
            arguments: parse_parameters(&inner),
        })
        .collect()
}

fn parse_parameters(inner: &str) -> BTreeMap<String, ArgValue> {
    let mut args = BTreeMap::new();
    for cap in child_regex().captures_iter(inner) {
        let name = cap[1].to_string();
        let value = html_unescape(cap[2].trim());
        args.insert(name, ArgValue::String(value));
    }
    args
}

/// Extract the verbatim body of a single `<plan>...</plan>` element (spec
/// §6: "The plan body is preserved verbatim into the agent's `current_plan`").
/// Returns `None` if no complete element is present.
pub fn extract_plan(text: &str) -> Option<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"(?s)<plan>(.*?)</plan>").expect("static regex"));
    re.captures(text).map(|c| c[1].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOOLS: &[&str] = &["file_system", "send_message", "manage_team"];

    #[test]
    fn parses_single_tool_call_with_params() {
        let text = r#"Sure thing.
<send_message>
  <target_agent_id>admin_ai</target_agent_id>
  <message_content>Completed. File at shared/report.md</message_content>
</send_message>"#;
        let calls = parse_tool_calls(text, TOOLS, 0);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].tool_name, "send_message");
        assert_eq!(calls[0].arg("target_agent_id"), Some("admin_ai"));
        assert_eq!(
            calls[0].arg("message_content"),
            Some("Completed. File at shared/report.md")
        );
        assert_eq!(calls[0].call_id, "call_1");
    }

    #[test]
    fn preserves_document_order_across_tool_kinds() {
        let text = r#"
<manage_team><action>create_team</action><team_id>t1</team_id></manage_team>
some prose in between
<send_message><target_agent_id>a1</target_agent_id><message_content>hi</message_content></send_message>
"#;
        let calls = parse_tool_calls(text, TOOLS, 0);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].tool_name, "manage_team");
        assert_eq!(calls[1].tool_name, "send_message");
        assert_eq!(calls[0].call_id, "call_1");
        assert_eq!(calls[1].call_id, "call_2");
    }

    #[test]
    fn ignores_unregistered_tags() {
        let text = "<bogus_tool><x>1</x></bogus_tool>";
        let calls = parse_tool_calls(text, TOOLS, 0);
        assert!(calls.is_empty());
    }

    #[test]
    fn tolerates_surrounding_prose() {
        let text = "Let me check that.\n\n<file_system><action>list</action><scope>shared</scope></file_system>\n\nDone.";
        let calls = parse_tool_calls(text, TOOLS, 0);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].arg("action"), Some("list"));
    }

    #[test]
    fn html_unescapes_parameter_text() {
        let text = "<file_system><content>a &lt;tag&gt; &amp; &quot;quoted&quot; &#39;text&#39;</content></file_system>";
        let calls = parse_tool_calls(text, TOOLS, 0);
        assert_eq!(
            calls[0].arg("content"),
            Some("a <tag> & \"quoted\" 'text'")
        );
    }

    #[test]
    fn extracts_plan_body_verbatim() {
        let text = "<plan>\nStep 1: research\nStep 2: write\n</plan>";
        let plan = extract_plan(text).unwrap();
        assert_eq!(plan, "\nStep 1: research\nStep 2: write\n");
    }

    #[test]
    fn no_plan_returns_none() {
        assert!(extract_plan("just some text").is_none());
    }

    #[test]
    fn call_ids_continue_from_start_index() {
        let text = "<send_message><target_agent_id>a</target_agent_id><message_content>m</message_content></send_message>";
        let calls = parse_tool_calls(text, TOOLS, 5);
        assert_eq!(calls[0].call_id, "call_6");
    }
}

//! The fixed set of built-in tool names and their XML documentation blurb,
//! substituted into `{tool_descriptions_xml}` by the prompt assembler
//! (spec §4.12).

/// Every tag the parser recognises as a tool call (spec §4.5). Order here
/// has no bearing on document order in a turn — only on this list's own
/// iteration when building prompt text.
pub const KNOWN_TOOLS: &[&str] = &["file_system", "send_message", "manage_team"];

/// Rendered once per prompt assembly and substituted verbatim; kept as a
/// plain constant rather than templated since the tool set itself never
/// varies by agent or team.
pub fn tool_descriptions_xml() -> String {
    r#"<file_system>
  <!-- action: read | write | append | list | delete | find_replace -->
  <!-- scope: private (your own sandbox) | shared (the team's shared workspace) -->
  <action>read</action>
  <scope>private</scope>
  <path>relative/path</path>
</file_system>

<send_message>
  <target_agent_id>agent_id_or_persona</target_agent_id>
  <message_content>text to deliver</message_content>
</send_message>

<manage_team>
  <!-- action: create_team | delete_team | create_agent | delete_agent | list_teams | list_agents -->
  <action>create_agent</action>
  <team_id>team_id</team_id>
  <persona>optional persona name</persona>
</manage_team>"#
        .to_string()
}

//! System prompt sent alongside every conversation.

use crate::tools::ToolDescriptor;

/// Build the system prompt with tool definitions.
pub fn build_system_prompt(tools: &[ToolDescriptor]) -> String {
    if tools.is_empty() {
        return "You are a helpful assistant. Answer the user's questions directly.".to_string();
    }

    let tool_descriptions = tools
        .iter()
        .map(|t| format!("- **{}**: {}", t.name, t.description))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"You are a helpful assistant that can call tools to compute exact answers.

## Available Tools

{tool_descriptions}

## Rules

1. **Use tools for computation** - Don't do arithmetic or sequence generation in your head when a tool can do it.

2. **One step at a time** - You may call several independent tools at once. If a call depends on another call's result, wait for that result first.

3. **Read tool errors** - A tool result starting with "Error:" means the call failed. Fix the arguments and retry, or explain the problem to the user.

4. **Answer in plain language** - Once you have what you need, reply with a short natural-language answer that includes the final values."#,
        tool_descriptions = tool_descriptions
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolRegistry;

    #[test]
    fn lists_every_tool() {
        let prompt = build_system_prompt(&ToolRegistry::new().describe_all());
        assert!(prompt.contains("- **calculate**:"));
        assert!(prompt.contains("- **fibonacci**:"));
        assert!(prompt.contains("- **exponential**:"));
    }

    #[test]
    fn empty_catalog_has_no_tool_section() {
        assert!(!build_system_prompt(&[]).contains("Available Tools"));
    }
}

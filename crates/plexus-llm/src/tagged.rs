//! Tagged tool-call form for models without native function calling.
//!
//! The model is taught to emit
//!
//! ```text
//! <tool_use>{"tool":"<name>","parameters":{...}}</tool_use>
//! ```
//!
//! and the adapter extracts every such block into a structured
//! [`ToolInvocation`], stripping the tags from the user-visible text.
//! Blocks whose body is not valid JSON are skipped; the surrounding text
//! is still returned, so a garbled block degrades to a plain response
//! rather than an error.

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::sync::OnceLock;

use crate::traits::{ToolInvocation, ToolSpec};

fn tag_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?s)<tool_use>(.*?)</tool_use>").unwrap())
}

#[derive(Deserialize)]
struct TaggedCall {
    tool: String,
    #[serde(default)]
    parameters: Value,
}

/// Instruction block documenting the available tools and the tagged form.
///
/// Appended to the system preamble when the provider lacks native
/// function calling.
#[must_use]
pub fn tool_primer(tools: &[ToolSpec]) -> String {
    let mut catalogue = String::new();
    for tool in tools {
        let params =
            serde_json::to_string_pretty(&tool.parameters).unwrap_or_else(|_| "{}".into());
        catalogue.push_str(&format!(
            "{}: {}\nParameters:\n{}\n\n",
            tool.name, tool.description, params
        ));
    }

    format!(
        "You have access to the following tools:\n\n{catalogue}\
         To use a tool, respond with a special XML tag:\n\
         <tool_use>{{\"tool\": \"tool_name\", \"parameters\": {{\"param1\": \"value1\"}}}}</tool_use>\n\n\
         You can use multiple tools by including multiple <tool_use> tags.\n\
         After using a tool, wait for the result before continuing your response.\n\n\
         Important: Always use tools when they would help answer the request."
    )
}

/// Extract every tagged tool call from raw model text.
///
/// Returns the text with all `<tool_use>` blocks removed, plus the
/// structured invocations in order of appearance.
#[must_use]
pub fn extract_tool_calls(content: &str) -> (String, Vec<ToolInvocation>) {
    let pattern = tag_pattern();

    let calls = pattern
        .captures_iter(content)
        .filter_map(|cap| {
            let body = cap.get(1)?.as_str().trim();
            let parsed: TaggedCall = serde_json::from_str(body).ok()?;
            Some(ToolInvocation {
                name: parsed.tool,
                arguments: if parsed.parameters.is_null() {
                    Value::Object(serde_json::Map::new())
                } else {
                    parsed.parameters
                },
                id: None,
            })
        })
        .collect();

    let clean = pattern.replace_all(content, "").trim().to_string();
    (clean, calls)
}

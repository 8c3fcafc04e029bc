use serde_json::Value;

use crate::error::BloomeoError;
use crate::mcp::tools::{self, ToolSpec};

const LIST_REFERENCE: &str = include_str!("list_reference.md");

pub fn render(tool: Option<&str>) -> Result<String, BloomeoError> {
    match tool.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(LIST_REFERENCE.to_string()),
        Some(raw) => {
            let name = raw.to_ascii_lowercase().replace('-', "_");
            match tools::find(&name) {
                Some(spec) => Ok(render_tool(spec)),
                None => {
                    let valid: Vec<String> =
                        tools::TOOLS.iter().map(|t| format!("- {}", t.name)).collect();
                    Err(BloomeoError::InvalidArgument(format!(
                        "Unknown tool: {raw}\n\nValid tools:\n{}",
                        valid.join("\n")
                    )))
                }
            }
        }
    }
}

fn schema_type(property: &Value) -> String {
    match property.get("type") {
        Some(Value::String(t)) => t.clone(),
        Some(Value::Array(types)) => types
            .iter()
            .filter_map(Value::as_str)
            .filter(|t| *t != "null")
            .collect::<Vec<_>>()
            .join("|"),
        _ if property.get("$ref").is_some() => "object".into(),
        _ => "any".into(),
    }
}

fn render_tool(spec: &ToolSpec) -> String {
    let schema = (spec.schema)();
    let required: Vec<&str> = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|r| r.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let mut out = format!("# {}\n\n{}\n\n{}\n", spec.name, spec.title, spec.description);
    if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
        out.push_str("\n## Arguments\n\n");
        for (name, property) in properties {
            let marker = if required.contains(&name.as_str()) {
                " (required)"
            } else {
                ""
            };
            out.push_str(&format!("- `{name}` {}{marker}", schema_type(property)));
            if let Some(description) = property.get("description").and_then(Value::as_str) {
                out.push_str(&format!(" - {description}"));
            }
            out.push('\n');
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::render;

    #[test]
    fn list_root_includes_quickstart() {
        let out = render(None).expect("list root should render");
        assert!(out.contains("## Quickstart"));
        assert!(out.contains("get_experiment_data"));
    }

    #[test]
    fn tool_page_lists_required_arguments() {
        let out = render(Some("get-experiment-data")).expect("tool page should render");
        assert!(out.starts_with("# get_experiment_data"));
        assert!(out.contains("`experiment_id` string (required)"));
        assert!(out.contains("`bearer_token`"));
    }

    #[test]
    fn unknown_tool_lists_valid_tools() {
        let err = render(Some("delete_experiment")).expect_err("unknown tool should fail");
        let msg = err.to_string();
        assert!(msg.contains("- set_bearer_token"));
        assert!(msg.contains("- get_genotypes"));
    }
}

use mcp_core::resource::HTML_MIME_TYPE;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// An embedded HTML resource found in a tool result.
///
/// Fields beyond the known ones are kept so the renderer receives the resource
/// exactly as the tool produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HtmlResource {
    #[serde(default)]
    pub uri: String,
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl HtmlResource {
    /// Reads a resource object without rejecting it. A `text` or `blob` that is
    /// not a string stays in `extra` under its own key.
    fn from_object(object: &Map<String, Value>) -> Self {
        let mut extra = object.clone();
        let uri = match extra.remove("uri") {
            Some(Value::String(uri)) => uri,
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        };
        let mime_type = match extra.remove("mimeType") {
            Some(Value::String(mime_type)) => mime_type,
            _ => HTML_MIME_TYPE.to_string(),
        };
        let text = take_string(&mut extra, "text");
        let blob = take_string(&mut extra, "blob");

        Self {
            uri,
            mime_type,
            text,
            blob,
            extra,
        }
    }
}

fn take_string(object: &mut Map<String, Value>, key: &str) -> Option<String> {
    if !matches!(object.get(key), Some(Value::String(_) | Value::Null)) {
        return None;
    }
    match object.remove(key) {
        Some(Value::String(value)) => Some(value),
        _ => None,
    }
}

/// The `content` array of a structured tool result.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentList(Vec<Value>);

impl ContentList {
    pub fn items(&self) -> &[Value] {
        &self.0
    }

    /// Items of type `resource` whose resource has mime type `text/html`, in order.
    pub fn html_resources(&self) -> Vec<HtmlResource> {
        self.0
            .iter()
            .filter(|item| item.get("type").and_then(Value::as_str) == Some("resource"))
            .filter_map(|item| item.get("resource"))
            .filter(|resource| {
                resource.get("mimeType").and_then(Value::as_str) == Some(HTML_MIME_TYPE)
            })
            .filter_map(Value::as_object)
            .map(HtmlResource::from_object)
            .collect()
    }
}

/// Why a result could not be read as a content list.
#[derive(Debug, Clone, PartialEq)]
pub enum UnstructuredReason {
    /// No result yet
    Absent,
    /// A value (or JSON string) without a `content` array
    NotAContainer,
    /// A string that does not parse as JSON
    MalformedJson(String),
}

/// A tool result, classified once at ingestion.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedToolResult {
    Structured(ContentList),
    Unstructured {
        raw: Option<Value>,
        reason: UnstructuredReason,
    },
}

fn as_container(value: &Value) -> Option<ContentList> {
    value
        .get("content")
        .and_then(Value::as_array)
        .map(|items| ContentList(items.clone()))
}

impl ParsedToolResult {
    /// Classify a raw result. Strings are parsed as JSON first. Never fails.
    pub fn parse(result: Option<&Value>) -> Self {
        let unstructured = |reason| ParsedToolResult::Unstructured {
            raw: result.cloned(),
            reason,
        };

        match result {
            None | Some(Value::Null) => unstructured(UnstructuredReason::Absent),
            Some(Value::String(s)) => match serde_json::from_str::<Value>(s) {
                Ok(parsed) => match as_container(&parsed) {
                    Some(list) => ParsedToolResult::Structured(list),
                    None => unstructured(UnstructuredReason::NotAContainer),
                },
                Err(e) => unstructured(UnstructuredReason::MalformedJson(e.to_string())),
            },
            Some(value) => match as_container(value) {
                Some(list) => ParsedToolResult::Structured(list),
                None => unstructured(UnstructuredReason::NotAContainer),
            },
        }
    }

    pub fn html_resources(&self) -> Vec<HtmlResource> {
        match self {
            ParsedToolResult::Structured(list) => list.html_resources(),
            ParsedToolResult::Unstructured { .. } => Vec::new(),
        }
    }
}

/// Human-readable rendering of arguments or results.
///
/// Strings that look like JSON objects or arrays are pretty-printed when they
/// parse, otherwise returned verbatim. Other values are pretty-printed.
pub fn format_content(value: &Value) -> String {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            if !trimmed.starts_with('{') && !trimmed.starts_with('[') {
                return s.clone();
            }
            match serde_json::from_str::<Value>(s) {
                Ok(parsed) => serde_json::to_string_pretty(&parsed).unwrap_or_else(|_| s.clone()),
                Err(_) => s.clone(),
            }
        }
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn html_item(uri: &str) -> Value {
        json!({"type": "resource", "resource": {"uri": uri, "mimeType": "text/html", "text": "<p>hi</p>"}})
    }

    #[test]
    fn test_structured_object_result() {
        let result = json!({"content": [
            {"type": "text", "text": "see widget"},
            html_item("ui://widget/1"),
            {"type": "resource", "resource": {"uri": "file:///a.txt", "mimeType": "text/plain", "text": "a"}}
        ]});
        let parsed = ParsedToolResult::parse(Some(&result));
        let resources = parsed.html_resources();
        assert_eq!(resources.len(), 1);
        assert_eq!(resources[0].uri, "ui://widget/1");
        assert_eq!(resources[0].text.as_deref(), Some("<p>hi</p>"));
    }

    #[test]
    fn test_string_result_is_parsed() {
        let result = Value::String(json!({"content": [html_item("ui://a")]}).to_string());
        assert!(matches!(
            ParsedToolResult::parse(Some(&result)),
            ParsedToolResult::Structured(_)
        ));
    }

    #[test]
    fn test_malformed_string_is_unstructured() {
        let result = json!("{not json");
        match ParsedToolResult::parse(Some(&result)) {
            ParsedToolResult::Unstructured {
                reason: UnstructuredReason::MalformedJson(_),
                raw,
            } => assert_eq!(raw, Some(result)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_object_without_content_is_unstructured() {
        let parsed = ParsedToolResult::parse(Some(&json!({"temperature": 21})));
        assert!(matches!(
            parsed,
            ParsedToolResult::Unstructured {
                reason: UnstructuredReason::NotAContainer,
                ..
            }
        ));
        assert!(parsed.html_resources().is_empty());
        assert!(matches!(
            ParsedToolResult::parse(None),
            ParsedToolResult::Unstructured {
                reason: UnstructuredReason::Absent,
                ..
            }
        ));
    }

    #[test]
    fn test_extra_resource_fields_are_kept() {
        let result = json!({"content": [{"type": "resource", "resource": {
            "uri": "ui://x", "mimeType": "text/html", "blob": "PGI+", "id": "widget-7"
        }}]});
        let resources = ParsedToolResult::parse(Some(&result)).html_resources();
        assert_eq!(resources[0].extra.get("id"), Some(&json!("widget-7")));
        assert_eq!(resources[0].blob.as_deref(), Some("PGI+"));
    }

    #[test]
    fn test_non_string_body_keeps_resource() {
        let result = json!({"content": [{"type": "resource", "resource": {
            "uri": "ui://odd", "mimeType": "text/html", "text": {"html": "<p>hi</p>"}
        }}]});
        let resources = ParsedToolResult::parse(Some(&result)).html_resources();
        assert_eq!(resources.len(), 1);
        assert_eq!(resources[0].uri, "ui://odd");
        assert_eq!(resources[0].text, None);
        assert_eq!(resources[0].extra.get("text"), Some(&json!({"html": "<p>hi</p>"})));
        assert_eq!(
            serde_json::to_value(&resources[0]).unwrap(),
            result["content"][0]["resource"]
        );
    }

    #[test]
    fn test_format_content() {
        assert_eq!(format_content(&json!("plain text")), "plain text");
        assert_eq!(format_content(&json!("{\"a\":1}")), "{\n  \"a\": 1\n}");
        assert_eq!(format_content(&json!("{broken")), "{broken");
        assert_eq!(format_content(&json!({"b": [1]})), "{\n  \"b\": [\n    1\n  ]\n}");
    }
}

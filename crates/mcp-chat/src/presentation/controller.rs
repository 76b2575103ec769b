use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::conversation::{ChatStatus, ConversationStore};
use super::tool_result::{format_content, HtmlResource, ParsedToolResult, UnstructuredReason};
use crate::diagnostics::SharedDiagnostics;
use crate::message::{CallState, Message, ToolInvocation};

pub const UI_ACTION_ACCEPTED: &str = "Tool execution requested via append";
pub const UI_ACTION_UNAVAILABLE: &str = "Chat context (append) not available for UI action";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusLabel {
    Running,
    Waiting,
    Completed,
}

impl fmt::Display for StatusLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StatusLabel::Running => "Running",
            StatusLabel::Waiting => "Waiting",
            StatusLabel::Completed => "Completed",
        })
    }
}

/// Where the invocation sits in the conversation when it is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusContext {
    pub is_latest_message: bool,
    pub chat_status: ChatStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResultView {
    /// HTML resources to render embedded, in result order
    Embedded(Vec<HtmlResource>),
    /// The result formatted as text
    Raw(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderedBody {
    pub arguments: Option<String>,
    pub result: Option<ResultView>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderedInvocation {
    pub tool_name: String,
    pub status: StatusLabel,
    pub expanded: bool,
    /// Only present while expanded
    pub body: Option<RenderedBody>,
}

/// A tool call requested from inside an embedded resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiActionRequest {
    pub tool_call_name: String,
    #[serde(default)]
    pub tool_call_params: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckStatus {
    Ok,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UiActionAck {
    pub status: AckStatus,
    pub message: String,
}

/// What an ingestion changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IngestOutcome {
    pub resources_replaced: bool,
    pub auto_expanded: bool,
}

impl IngestOutcome {
    pub fn changed(&self) -> bool {
        self.resources_replaced || self.auto_expanded
    }
}

fn sorted_uris(resources: &[HtmlResource]) -> Vec<&str> {
    let mut uris: Vec<&str> = resources.iter().map(|r| r.uri.as_str()).collect();
    uris.sort_unstable();
    uris
}

fn is_present(value: &Value) -> bool {
    match value {
        Value::Null | Value::Bool(false) => false,
        Value::String(s) => !s.is_empty(),
        _ => true,
    }
}

/// Presentation state of one tool invocation: collapsed or expanded, and the
/// HTML resources its latest result carries.
pub struct ToolInvocationController {
    invocation: ToolInvocation,
    expanded: bool,
    resources: Vec<HtmlResource>,
    diagnostics: SharedDiagnostics,
    conversation: Option<Arc<dyn ConversationStore>>,
}

impl ToolInvocationController {
    pub fn new(invocation: ToolInvocation, diagnostics: SharedDiagnostics) -> Self {
        let mut controller = Self {
            invocation,
            expanded: false,
            resources: Vec::new(),
            diagnostics,
            conversation: None,
        };
        let result = controller.invocation.result.clone();
        controller.ingest(result.as_ref());
        controller
    }

    pub fn with_conversation(mut self, conversation: Arc<dyn ConversationStore>) -> Self {
        self.conversation = Some(conversation);
        self
    }

    pub fn invocation(&self) -> &ToolInvocation {
        &self.invocation
    }

    pub fn is_expanded(&self) -> bool {
        self.expanded
    }

    pub fn resources(&self) -> &[HtmlResource] {
        &self.resources
    }

    /// Take a newer snapshot of the invocation. The result is only re-ingested
    /// when it actually changed.
    pub fn update(&mut self, invocation: ToolInvocation) -> IngestOutcome {
        let result_changed = invocation.result != self.invocation.result;
        self.invocation = invocation;
        if !result_changed {
            return IngestOutcome::default();
        }
        let result = self.invocation.result.clone();
        self.ingest(result.as_ref())
    }

    /// Recompute the embedded resources from `result`.
    ///
    /// The resource list is only replaced when its set of uris differs, so an
    /// equivalent result never causes a re-render. A replacement that leaves
    /// resources to show expands a collapsed invocation; nothing here ever
    /// collapses it.
    pub fn ingest(&mut self, result: Option<&Value>) -> IngestOutcome {
        let parsed = ParsedToolResult::parse(result);
        if let ParsedToolResult::Unstructured { raw, reason } = &parsed {
            match reason {
                UnstructuredReason::Absent => {}
                UnstructuredReason::NotAContainer => self.diagnostics.warn(
                    "tool-result",
                    &format!(
                        "result of '{}' has no content array: {}",
                        self.invocation.tool_name,
                        raw.as_ref().map(Value::to_string).unwrap_or_default()
                    ),
                ),
                UnstructuredReason::MalformedJson(error) => self.diagnostics.error(
                    "tool-result",
                    &format!(
                        "failed to parse result of '{}': {}",
                        self.invocation.tool_name, error
                    ),
                ),
            }
        }

        let incoming = parsed.html_resources();
        let mut outcome = IngestOutcome::default();
        if sorted_uris(&incoming) != sorted_uris(&self.resources) {
            self.resources = incoming;
            outcome.resources_replaced = true;
        }

        if outcome.resources_replaced && !self.resources.is_empty() && !self.expanded {
            self.expanded = true;
            outcome.auto_expanded = true;
        }
        outcome
    }

    /// Explicit user toggle. Returns the new expanded state.
    pub fn toggle(&mut self) -> bool {
        self.expanded = !self.expanded;
        self.expanded
    }

    pub fn status(&self, context: StatusContext) -> StatusLabel {
        match self.invocation.call_state() {
            CallState::Completed => StatusLabel::Completed,
            CallState::Pending
                if context.is_latest_message && context.chat_status != ChatStatus::Ready =>
            {
                StatusLabel::Running
            }
            CallState::Pending => StatusLabel::Waiting,
        }
    }

    pub fn render(&self, context: StatusContext) -> RenderedInvocation {
        let body = self.expanded.then(|| RenderedBody {
            arguments: is_present(&self.invocation.args)
                .then(|| format_content(&self.invocation.args)),
            result: self
                .invocation
                .result
                .as_ref()
                .filter(|result| is_present(result))
                .map(|result| {
                    if self.resources.is_empty() {
                        ResultView::Raw(format_content(result))
                    } else {
                        ResultView::Embedded(self.resources.clone())
                    }
                }),
        });

        RenderedInvocation {
            tool_name: self.invocation.tool_name.clone(),
            status: self.status(context),
            expanded: self.expanded,
            body,
        }
    }

    /// Turn an action raised by an embedded resource into a new user turn.
    pub fn handle_ui_action(&self, request: &UiActionRequest) -> UiActionAck {
        let Some(conversation) = &self.conversation else {
            self.diagnostics.warn(
                "ui-action",
                "no conversation available for UI action",
            );
            return UiActionAck {
                status: AckStatus::Error,
                message: UI_ACTION_UNAVAILABLE.to_string(),
            };
        };

        let params = serde_json::to_string(&request.tool_call_params)
            .unwrap_or_else(|_| "null".to_string());
        let content = format!(
            "Call {} with parameters: {}",
            request.tool_call_name, params
        );
        conversation.append(Message::user(nanoid::nanoid!(), content));

        UiActionAck {
            status: AckStatus::Ok,
            message: UI_ACTION_ACCEPTED.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::{Level, MemoryDiagnostics};
    use crate::presentation::conversation::InMemoryConversation;
    use mcp_core::Role;
    use serde_json::json;

    fn resource_result(uris: &[&str]) -> Value {
        json!({"content": uris.iter().map(|uri| json!({
            "type": "resource",
            "resource": {"uri": uri, "mimeType": "text/html", "text": "<div/>"}
        })).collect::<Vec<_>>()})
    }

    fn controller(result: Option<Value>) -> (ToolInvocationController, Arc<MemoryDiagnostics>) {
        let diagnostics = Arc::new(MemoryDiagnostics::new());
        let mut invocation = ToolInvocation::call("c1", "show_widget", json!({"id": 7}));
        if let Some(result) = result {
            invocation = invocation.with_result(result);
        }
        (
            ToolInvocationController::new(invocation, diagnostics.clone()),
            diagnostics,
        )
    }

    const LATEST_STREAMING: StatusContext = StatusContext {
        is_latest_message: true,
        chat_status: ChatStatus::Streaming,
    };

    #[test]
    fn test_html_resource_auto_expands() {
        let (controller, _) = controller(Some(resource_result(&["ui://a"])));
        assert!(controller.is_expanded());
        let rendered = controller.render(LATEST_STREAMING);
        assert_eq!(rendered.status, StatusLabel::Completed);
        match rendered.body.unwrap().result.unwrap() {
            ResultView::Embedded(resources) => assert_eq!(resources[0].uri, "ui://a"),
            other => panic!("expected embedded view, got {:?}", other),
        }
    }

    #[test]
    fn test_reordered_resources_do_not_replace() {
        let (mut controller, _) = controller(Some(resource_result(&["ui://a", "ui://b"])));
        let outcome = controller.ingest(Some(&resource_result(&["ui://b", "ui://a"])));
        assert!(!outcome.changed());
        assert_eq!(controller.resources()[0].uri, "ui://a");
    }

    #[test]
    fn test_identical_ingest_is_stable() {
        let (mut controller, _) = controller(None);
        let first = controller.ingest(Some(&resource_result(&["ui://a"])));
        assert!(first.resources_replaced && first.auto_expanded);
        let second = controller.ingest(Some(&resource_result(&["ui://a"])));
        assert_eq!(second, IngestOutcome::default());
        assert!(controller.is_expanded());
    }

    #[test]
    fn test_user_collapse_survives_equivalent_result() {
        let (mut controller, _) = controller(Some(resource_result(&["ui://a"])));
        assert!(!controller.toggle());
        controller.ingest(Some(&resource_result(&["ui://a"])));
        assert!(!controller.is_expanded());
        assert!(controller.render(LATEST_STREAMING).body.is_none());
    }

    #[test]
    fn test_resources_cleared_without_collapsing() {
        let (mut controller, _) = controller(Some(resource_result(&["ui://a"])));
        let outcome = controller.ingest(Some(&json!({"content": [{"type": "text", "text": "done"}]})));
        assert!(outcome.resources_replaced);
        assert!(controller.resources().is_empty());
        assert!(controller.is_expanded());
    }

    #[test]
    fn test_plain_result_stays_collapsed_and_renders_raw() {
        let (mut controller, _) = controller(Some(json!({"content": [{"type": "text", "text": "42"}]})));
        assert!(!controller.is_expanded());
        controller.toggle();
        let body = controller.render(LATEST_STREAMING).body.unwrap();
        assert_eq!(body.arguments.as_deref(), Some("{\n  \"id\": 7\n}"));
        assert!(matches!(body.result, Some(ResultView::Raw(text)) if text.contains("\"42\"")));
    }

    #[test]
    fn test_malformed_string_result_is_reported() {
        let (mut controller, diagnostics) = controller(Some(json!("{oops")));
        assert!(controller.resources().is_empty());
        assert_eq!(diagnostics.count(Level::Error), 1);

        assert!(!controller.is_expanded());
        controller.toggle();
        let rendered = controller.render(LATEST_STREAMING);
        assert_eq!(rendered.status, StatusLabel::Completed);
        assert_eq!(
            rendered.body.unwrap().result,
            Some(ResultView::Raw("{oops".to_string()))
        );
    }

    #[test]
    fn test_non_container_result_warns() {
        let (_, diagnostics) = controller(Some(json!({"temperature": 20})));
        assert_eq!(diagnostics.count(Level::Warn), 1);
    }

    #[test]
    fn test_status_labels() {
        let (pending, _) = controller(None);
        assert_eq!(pending.status(LATEST_STREAMING), StatusLabel::Running);
        assert_eq!(
            pending.status(StatusContext {
                is_latest_message: true,
                chat_status: ChatStatus::Ready
            }),
            StatusLabel::Waiting
        );
        assert_eq!(
            pending.status(StatusContext {
                is_latest_message: false,
                chat_status: ChatStatus::Streaming
            }),
            StatusLabel::Waiting
        );
    }

    #[test]
    fn test_update_only_ingests_changed_results() {
        let (mut controller, _) = controller(None);
        let same = controller.update(ToolInvocation::call("c1", "show_widget", json!({"id": 7})));
        assert_eq!(same, IngestOutcome::default());
        let done = controller.update(
            ToolInvocation::call("c1", "show_widget", json!({"id": 7}))
                .with_result(resource_result(&["ui://w"])),
        );
        assert!(done.auto_expanded);
        assert_eq!(controller.render(LATEST_STREAMING).status, StatusLabel::Completed);
    }

    #[test]
    fn test_ui_action_appends_user_turn() {
        let conversation = Arc::new(InMemoryConversation::new());
        let (controller, _) = controller(Some(resource_result(&["ui://a"])));
        let controller = controller.with_conversation(conversation.clone());

        let ack = controller.handle_ui_action(&UiActionRequest {
            tool_call_name: "get_weather".to_string(),
            tool_call_params: json!({"city": "Paris"}),
        });

        assert_eq!(ack.status, AckStatus::Ok);
        assert_eq!(ack.message, UI_ACTION_ACCEPTED);
        let messages = conversation.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(
            messages[0].content,
            "Call get_weather with parameters: {\"city\":\"Paris\"}"
        );
        assert!(!messages[0].id.is_empty());
    }

    #[test]
    fn test_ui_action_without_conversation() {
        let (controller, diagnostics) = controller(None);
        let ack = controller.handle_ui_action(&UiActionRequest {
            tool_call_name: "x".to_string(),
            tool_call_params: Value::Null,
        });
        assert_eq!(
            serde_json::to_value(&ack).unwrap(),
            json!({"status": "error", "message": UI_ACTION_UNAVAILABLE})
        );
        assert_eq!(diagnostics.count(Level::Warn), 1);
    }
}

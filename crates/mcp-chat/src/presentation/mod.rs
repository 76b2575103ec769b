//! Client-side presentation of tool invocations: classifying results, tracking
//! expand/collapse state, and routing actions raised by embedded resources.
mod controller;
mod conversation;
mod stream_reducer;
mod tool_result;

pub use controller::{
    AckStatus, IngestOutcome, RenderedBody, RenderedInvocation, ResultView, StatusContext,
    StatusLabel, ToolInvocationController, UiActionAck, UiActionRequest, UI_ACTION_ACCEPTED,
    UI_ACTION_UNAVAILABLE,
};
pub use conversation::{ChatStatus, ConversationStore, InMemoryConversation};
pub use stream_reducer::AssistantMessageBuilder;
pub use tool_result::{format_content, ContentList, HtmlResource, ParsedToolResult, UnstructuredReason};

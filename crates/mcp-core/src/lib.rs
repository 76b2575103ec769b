pub mod content;
pub use content::{Content, EmbeddedResource, ImageContent, TextContent};
pub mod protocol;
pub mod resource;
pub use resource::ResourceContents;
pub mod role;
pub use role::Role;
pub mod tool;
pub use tool::{Tool, ToolError, ToolResult};

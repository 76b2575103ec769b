pub mod client;
pub mod transport;

pub use client::{ClientCapabilities, ClientInfo, Error, McpClient, McpClientTrait};
pub use transport::{SseTransport, StreamableHttpTransport, Transport, TransportHandle};

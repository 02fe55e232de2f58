//! MCP - Model Context Protocol 연동
//!
//! 원격 MCP 서버 연결의 모든 것
//!
//! ## 기능
//! - 전송 협상 및 폴백 (SSE ↔ streamable HTTP)
//! - 연결 풀링 및 유휴 정리
//! - initialize 핸드셰이크, 도구/프롬프트 목록, 도구 호출
//!
//! ## 참고
//! - https://modelcontextprotocol.io/

mod client;
mod connector;
mod pool;
mod transport;
mod types;

pub use client::{spawn_notification_forwarder, McpClient, ServerInfo};
pub use connector::{connect_with_fallback, effective_headers, transport_order};
pub use pool::{pool_key, spawn_sweeper, ConnectionPool, PoolStatus, PooledConnection};
pub use transport::{
    JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, McpTransport,
    NotificationSender, SseTransport, StreamableHttpTransport,
};
pub use types::{
    CallToolResult, PromptArgument, PromptDefinition, PromptMessage, ServerConfig, SimpleMessage,
    ToolContent, ToolDefinition, TransportKind,
};

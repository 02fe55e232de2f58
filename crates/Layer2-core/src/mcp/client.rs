//! MCP Client - MCP 서버 클라이언트
//!
//! initialize 핸드셰이크, 도구/프롬프트 목록, 도구 호출, 취소 알림을 처리

use super::transport::{JsonRpcNotification, McpTransport};
use super::types::{
    CallToolResult, PromptDefinition, PromptMessage, ToolDefinition, TransportKind,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tether_foundation::{Error, ProgressRegistry, Result};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// MCP 프로토콜 버전
const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

/// 핸드셰이크/목록 조회용 기본 타임아웃
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// MCP 클라이언트 정보
#[derive(Debug, Clone, Serialize)]
struct ClientInfo {
    name: String,
    version: String,
}

/// MCP 서버 정보
#[derive(Debug, Clone, Deserialize)]
#[allow(dead_code)]
pub struct ServerInfo {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

/// Initialize 응답
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(dead_code)]
struct InitializeResult {
    protocol_version: String,
    server_info: ServerInfo,
    #[serde(default)]
    capabilities: Value,
}

/// MCP 클라이언트
///
/// 전송 계층 위에서 MCP 오퍼레이션을 수행합니다. 전송은 Connector가
/// 폴백 포함으로 수립하며, 클라이언트는 핸드셰이크 이후의 호출만 담당합니다.
pub struct McpClient {
    /// 서버 이름 (로그용)
    name: String,

    /// 전송 계층
    transport: Arc<dyn McpTransport>,

    /// 서버 정보 (initialize 응답)
    server_info: Option<ServerInfo>,
}

impl McpClient {
    /// 수립된 전송 위에서 initialize 핸드셰이크를 수행하고 클라이언트 생성
    pub async fn handshake(name: impl Into<String>, transport: Arc<dyn McpTransport>) -> Result<Self> {
        let name = name.into();

        let params = json!({
            "protocolVersion": MCP_PROTOCOL_VERSION,
            "clientInfo": ClientInfo {
                name: "tether".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            "capabilities": {}
        });

        let result = transport
            .request("initialize", Some(params), DEFAULT_REQUEST_TIMEOUT)
            .await?;

        let init_result: InitializeResult = serde_json::from_value(result)
            .map_err(|e| Error::Mcp(format!("Invalid initialize response: {}", e)))?;

        debug!(
            "MCP server '{}' ({}) initialized, protocol {}",
            init_result.server_info.name,
            name,
            init_result.protocol_version
        );

        // initialized 알림 전송
        transport.notify("notifications/initialized", None).await?;

        info!(
            "Connected to MCP server '{}' over {}",
            name,
            transport.kind()
        );

        Ok(Self {
            name,
            transport,
            server_info: Some(init_result.server_info),
        })
    }

    /// 서버 이름
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 서버 정보 (initialize 응답 기준)
    pub fn server_info(&self) -> Option<&ServerInfo> {
        self.server_info.as_ref()
    }

    /// 사용 중인 전송 종류
    pub fn transport_kind(&self) -> TransportKind {
        self.transport.kind()
    }

    /// 연결 상태
    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// 도구 목록 조회
    pub async fn list_tools(&self) -> Result<Vec<ToolDefinition>> {
        let result = self
            .transport
            .request("tools/list", None, DEFAULT_REQUEST_TIMEOUT)
            .await?;

        #[derive(Deserialize)]
        struct ToolsListResult {
            tools: Vec<ToolDefinition>,
        }

        let tools_result: ToolsListResult = serde_json::from_value(result)
            .map_err(|e| Error::Mcp(format!("Invalid tools/list response: {}", e)))?;

        debug!(
            "Listed {} tools from MCP server '{}'",
            tools_result.tools.len(),
            self.name
        );

        Ok(tools_result.tools)
    }

    /// 프롬프트 목록 조회
    ///
    /// 미지원 서버는 호출자가 soft-failure로 처리 (빈 목록)
    pub async fn list_prompts(&self) -> Result<Vec<PromptDefinition>> {
        let result = self
            .transport
            .request("prompts/list", None, DEFAULT_REQUEST_TIMEOUT)
            .await?;

        #[derive(Deserialize)]
        struct PromptsListResult {
            #[serde(default)]
            prompts: Vec<PromptDefinition>,
        }

        let prompts_result: PromptsListResult = serde_json::from_value(result)
            .map_err(|e| Error::Mcp(format!("Invalid prompts/list response: {}", e)))?;

        Ok(prompts_result.prompts)
    }

    /// 도구 호출
    pub async fn call_tool(
        &self,
        tool_name: &str,
        arguments: Value,
        timeout: Duration,
    ) -> Result<CallToolResult> {
        debug!("Calling MCP tool '{}' on '{}'", tool_name, self.name);

        let params = json!({
            "name": tool_name,
            "arguments": arguments
        });

        let result = self
            .transport
            .request("tools/call", Some(params), timeout)
            .await?;

        let tool_result: CallToolResult = serde_json::from_value(result)
            .map_err(|e| Error::Mcp(format!("Invalid tools/call response: {}", e)))?;

        if tool_result.is_error {
            warn!(
                "MCP tool '{}' on '{}' returned error: {:?}",
                tool_name,
                self.name,
                tool_result.text()
            );
        }

        Ok(tool_result)
    }

    /// 프롬프트 가져오기
    pub async fn get_prompt(
        &self,
        prompt_name: &str,
        arguments: Option<Value>,
        timeout: Duration,
    ) -> Result<Vec<PromptMessage>> {
        let params = json!({
            "name": prompt_name,
            "arguments": arguments.unwrap_or_else(|| Value::Object(Default::default()))
        });

        let result = self
            .transport
            .request("prompts/get", Some(params), timeout)
            .await?;

        #[derive(Deserialize)]
        struct GetPromptResult {
            #[serde(default)]
            messages: Vec<PromptMessage>,
        }

        let prompt_result: GetPromptResult = serde_json::from_value(result)
            .map_err(|e| Error::Mcp(format!("Invalid prompts/get response: {}", e)))?;

        Ok(prompt_result.messages)
    }

    /// 요청 취소 알림 (best-effort - 서버가 중단을 보장하지 않음)
    pub async fn cancel_request(&self, request_id: &str, reason: Option<&str>) -> Result<()> {
        let params = json!({
            "requestId": request_id,
            "reason": reason.unwrap_or("cancelled by caller")
        });

        self.transport
            .notify("notifications/cancelled", Some(params))
            .await
    }

    /// 연결 종료
    pub async fn close(&self) -> Result<()> {
        self.transport.close().await?;
        info!("Disconnected from MCP server: {}", self.name);
        Ok(())
    }
}

/// 서버 발신 알림을 레지스트리로 전달하는 백그라운드 태스크
///
/// notifications/progress만 소비하고 나머지는 debug 로그로 남깁니다.
pub fn spawn_notification_forwarder(
    server_name: String,
    mut rx: mpsc::UnboundedReceiver<JsonRpcNotification>,
    progress: Arc<ProgressRegistry>,
) {
    tokio::spawn(async move {
        while let Some(note) = rx.recv().await {
            match note.method.as_str() {
                "notifications/progress" => {
                    let Some(params) = note.params else { continue };

                    let token = params
                        .get("progressToken")
                        .map(|t| match t {
                            Value::String(s) => s.clone(),
                            other => other.to_string(),
                        })
                        .unwrap_or_default();
                    if token.is_empty() {
                        continue;
                    }

                    let value = params
                        .get("progress")
                        .and_then(|p| p.as_f64())
                        .unwrap_or(0.0);
                    let total = params.get("total").and_then(|t| t.as_f64());
                    let message = params
                        .get("message")
                        .and_then(|m| m.as_str())
                        .map(|s| s.to_string());

                    progress.record(&token, value, total, message);
                }
                other => {
                    debug!("Ignoring notification '{}' from '{}'", other, server_name);
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// 준비된 응답을 돌려주는 테스트 전송
    struct FakeTransport {
        responses: std::collections::HashMap<String, Value>,
        connected: AtomicBool,
    }

    #[async_trait]
    impl McpTransport for FakeTransport {
        async fn request(
            &self,
            method: &str,
            _params: Option<Value>,
            _timeout: Duration,
        ) -> Result<Value> {
            self.responses
                .get(method)
                .cloned()
                .ok_or_else(|| Error::Mcp(format!("no canned response for {}", method)))
        }

        async fn notify(&self, _method: &str, _params: Option<Value>) -> Result<()> {
            Ok(())
        }

        async fn close(&self) -> Result<()> {
            self.connected.store(false, Ordering::SeqCst);
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        fn kind(&self) -> TransportKind {
            TransportKind::StreamableHttp
        }
    }

    fn fake_transport() -> Arc<FakeTransport> {
        let mut responses = std::collections::HashMap::new();
        responses.insert(
            "initialize".to_string(),
            json!({
                "protocolVersion": "2024-11-05",
                "serverInfo": {"name": "fake", "version": "1.0"},
                "capabilities": {"tools": {}}
            }),
        );
        responses.insert(
            "tools/list".to_string(),
            json!({
                "tools": [
                    {"name": "search", "description": "Search", "inputSchema": {"type": "object"}}
                ]
            }),
        );
        responses.insert(
            "tools/call".to_string(),
            json!({
                "content": [{"type": "text", "text": "ok"}],
                "isError": false
            }),
        );
        responses.insert("prompts/list".to_string(), json!({"prompts": []}));

        Arc::new(FakeTransport {
            responses,
            connected: AtomicBool::new(true),
        })
    }

    #[tokio::test]
    async fn test_handshake_and_list_tools() {
        let client = McpClient::handshake("fake", fake_transport()).await.unwrap();
        assert_eq!(client.name(), "fake");
        assert_eq!(client.server_info().unwrap().name, "fake");

        let tools = client.list_tools().await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "search");
    }

    #[tokio::test]
    async fn test_call_tool() {
        let client = McpClient::handshake("fake", fake_transport()).await.unwrap();
        let result = client
            .call_tool("search", json!({"query": "x"}), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(!result.is_error);
        assert_eq!(result.text(), Some("ok"));
    }

    #[tokio::test]
    async fn test_progress_forwarder() {
        let registry = Arc::new(ProgressRegistry::new());
        let (tx, rx) = mpsc::unbounded_channel();
        spawn_notification_forwarder("fake".to_string(), rx, Arc::clone(&registry));

        tx.send(JsonRpcNotification::new(
            "notifications/progress",
            Some(json!({"progressToken": "tok-1", "progress": 30.0, "total": 100.0})),
        ))
        .unwrap();

        // forwarder 태스크가 소비할 시간
        tokio::time::sleep(Duration::from_millis(50)).await;

        let updates = registry.get("tok-1");
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].progress, 30.0);
        assert_eq!(updates[0].total, Some(100.0));
    }
}

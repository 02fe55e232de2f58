//! MCP Transport - 전송 계층 구현
//!
//! 원격 MCP 서버와의 통신을 위한 두 가지 전송
//! - SSE: 지속 이벤트 스트림 (GET event source + POST message endpoint)
//! - Streamable HTTP: 요청 단위 스트리밍 HTTP (POST per JSON-RPC request)

use super::types::TransportKind;
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tether_foundation::{Error, Result};
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// JSON-RPC 2.0 요청
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC 2.0 응답
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC 에러
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// JSON-RPC 알림 (응답 없음)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.into(),
            params,
        }
    }
}

/// 서버 발신 알림 전달 채널
pub type NotificationSender = mpsc::UnboundedSender<JsonRpcNotification>;

/// MCP Transport trait
#[async_trait]
pub trait McpTransport: Send + Sync {
    /// 요청 전송 및 응답 수신 (데드라인 포함)
    async fn request(&self, method: &str, params: Option<Value>, timeout: Duration)
        -> Result<Value>;

    /// 알림 전송 (응답 없음)
    async fn notify(&self, method: &str, params: Option<Value>) -> Result<()>;

    /// 연결 종료
    async fn close(&self) -> Result<()>;

    /// 연결 상태 확인
    fn is_connected(&self) -> bool;

    /// 전송 종류
    fn kind(&self) -> TransportKind;
}

/// 헤더 맵을 reqwest HeaderMap으로 변환
fn build_header_map(headers: &HashMap<String, String>) -> Result<reqwest::header::HeaderMap> {
    let mut map = reqwest::header::HeaderMap::new();
    for (key, value) in headers {
        let name = reqwest::header::HeaderName::from_bytes(key.as_bytes())
            .map_err(|e| Error::Config(format!("Invalid header name '{}': {}", key, e)))?;
        let value = reqwest::header::HeaderValue::from_str(value)
            .map_err(|e| Error::Config(format!("Invalid header value for '{}': {}", key, e)))?;
        map.insert(name, value);
    }
    Ok(map)
}

/// 수신한 SSE/HTTP 메시지를 응답 또는 알림으로 분배
fn dispatch_message(data: &str, notification_tx: &Option<NotificationSender>) -> DispatchOutcome {
    // id가 있는 응답 먼저 시도
    if let Ok(response) = serde_json::from_str::<JsonRpcResponse>(data) {
        if let Some(id) = response.id {
            return DispatchOutcome::Response { id, response };
        }
    }

    // method가 있으면 서버 발신 알림
    if let Ok(notification) = serde_json::from_str::<JsonRpcNotification>(data) {
        if !notification.method.is_empty() {
            if let Some(tx) = notification_tx {
                let _ = tx.send(notification);
            }
            return DispatchOutcome::Notification;
        }
    }

    debug!("Unrecognized message on transport: {}", data);
    DispatchOutcome::Ignored
}

enum DispatchOutcome {
    Response { id: u64, response: JsonRpcResponse },
    Notification,
    Ignored,
}

async fn deliver_response(
    outcome: DispatchOutcome,
    pending: &Arc<RwLock<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>,
) {
    if let DispatchOutcome::Response { id, response } = outcome {
        let mut guard = pending.write().await;
        if let Some(sender) = guard.remove(&id) {
            let _ = sender.send(response);
        }
    }
}

// ============================================================================
// SSE Transport - 지속 이벤트 스트림
// ============================================================================

/// SSE Transport
///
/// GET으로 이벤트 스트림을 열고, 서버가 알려주는 message endpoint로
/// POST 요청을 보냅니다. 응답은 이벤트 스트림으로 돌아옵니다.
pub struct SseTransport {
    /// 서버 URL
    url: String,

    /// 요청 ID 카운터
    request_id: AtomicU64,

    /// HTTP 클라이언트 (요청 헤더 포함)
    client: reqwest::Client,

    /// 메시지 엔드포인트 URL (서버의 endpoint 이벤트로 갱신)
    message_url: Arc<RwLock<String>>,

    /// 대기 중인 요청들 (id -> response sender)
    pending_requests: Arc<RwLock<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>,

    /// 연결 상태
    connected: Arc<AtomicBool>,

    /// close 시 리스너 태스크와 이벤트 스트림을 내리는 토큰
    shutdown: CancellationToken,
}

impl SseTransport {
    /// SSE 연결 생성
    pub async fn connect(
        url: &str,
        headers: &HashMap<String, String>,
        notification_tx: Option<NotificationSender>,
    ) -> Result<Self> {
        info!("Connecting to MCP SSE server: {}", url);

        let header_map = build_header_map(headers)?;
        let client = reqwest::Client::builder()
            .default_headers(header_map)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;

        let pending_requests: Arc<RwLock<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>> =
            Arc::new(RwLock::new(HashMap::new()));

        let connected = Arc::new(AtomicBool::new(false));

        // 서버가 endpoint 이벤트를 보내기 전까지의 기본값
        let message_url = Arc::new(RwLock::new(format!(
            "{}/messages",
            url.trim_end_matches("/sse").trim_end_matches('/')
        )));

        // 연결 확립 통지용 (Open 이벤트 또는 endpoint 이벤트)
        let (open_tx, open_rx) = oneshot::channel::<std::result::Result<(), String>>();

        let shutdown = CancellationToken::new();

        let pending_for_sse = Arc::clone(&pending_requests);
        let connected_for_sse = Arc::clone(&connected);
        let message_url_for_sse = Arc::clone(&message_url);
        let sse_url = url.to_string();
        let client_clone = client.clone();
        let shutdown_for_sse = shutdown.clone();

        tokio::spawn(async move {
            Self::sse_listener(
                sse_url,
                client_clone,
                pending_for_sse,
                connected_for_sse,
                message_url_for_sse,
                notification_tx,
                open_tx,
                shutdown_for_sse,
            )
            .await;
        });

        // 스트림이 열릴 때까지 대기 (10초 상한)
        match tokio::time::timeout(Duration::from_secs(10), open_rx).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => {
                return Err(Error::McpConnection(format!(
                    "SSE stream to '{}' failed: {}",
                    url, e
                )));
            }
            Ok(Err(_)) | Err(_) => {
                return Err(Error::McpConnection(format!(
                    "SSE stream to '{}' did not open in time",
                    url
                )));
            }
        }

        Ok(Self {
            url: url.to_string(),
            request_id: AtomicU64::new(1),
            client,
            message_url,
            pending_requests,
            connected,
            shutdown,
        })
    }

    /// SSE 이벤트 수신 루프
    #[allow(clippy::too_many_arguments)]
    async fn sse_listener(
        url: String,
        client: reqwest::Client,
        pending: Arc<RwLock<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>,
        connected: Arc<AtomicBool>,
        message_url: Arc<RwLock<String>>,
        notification_tx: Option<NotificationSender>,
        open_tx: oneshot::Sender<std::result::Result<(), String>>,
        shutdown: CancellationToken,
    ) {
        use reqwest_eventsource::{Event, EventSource};

        let mut es = match EventSource::new(client.get(&url)) {
            Ok(es) => es,
            Err(e) => {
                let _ = open_tx.send(Err(e.to_string()));
                return;
            }
        };

        let mut open_tx = Some(open_tx);

        loop {
            // close()가 토큰을 발화하면 루프를 빠져나가며 EventSource가
            // 드롭되어 GET 스트림도 함께 끊어짐
            let event = tokio::select! {
                event = es.next() => event,
                _ = shutdown.cancelled() => {
                    debug!("SSE listener shut down: {}", url);
                    break;
                }
            };
            let Some(event) = event else {
                break;
            };

            match event {
                Ok(Event::Open) => {
                    info!("SSE connection opened: {}", url);
                    connected.store(true, Ordering::SeqCst);
                    if let Some(tx) = open_tx.take() {
                        let _ = tx.send(Ok(()));
                    }
                }
                Ok(Event::Message(message)) => {
                    if message.event == "endpoint" {
                        // 서버가 message endpoint 경로를 알려줌
                        let endpoint = resolve_endpoint(&url, message.data.trim());
                        debug!("SSE message endpoint: {}", endpoint);
                        *message_url.write().await = endpoint;
                        continue;
                    }

                    let outcome = dispatch_message(&message.data, &notification_tx);
                    deliver_response(outcome, &pending).await;
                }
                Err(e) => {
                    if let Some(tx) = open_tx.take() {
                        let _ = tx.send(Err(e.to_string()));
                    } else {
                        error!("SSE error on {}: {}", url, e);
                    }
                    break;
                }
            }
        }

        connected.store(false, Ordering::SeqCst);
        info!("SSE connection closed: {}", url);
    }

    /// 다음 요청 ID 생성
    fn next_id(&self) -> u64 {
        self.request_id.fetch_add(1, Ordering::SeqCst)
    }
}

/// endpoint 이벤트의 경로를 절대 URL로 변환
fn resolve_endpoint(sse_url: &str, endpoint: &str) -> String {
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        return endpoint.to_string();
    }

    match url::Url::parse(sse_url).and_then(|base| base.join(endpoint)) {
        Ok(joined) => joined.to_string(),
        Err(_) => format!(
            "{}/{}",
            sse_url.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        ),
    }
}

#[async_trait]
impl McpTransport for SseTransport {
    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value> {
        if !self.is_connected() {
            return Err(Error::McpConnection(format!(
                "SSE transport to '{}' not connected",
                self.url
            )));
        }

        let id = self.next_id();
        let request = JsonRpcRequest::new(id, method, params);

        // 응답 수신 채널 등록
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending_requests.write().await;
            pending.insert(id, tx);
        }

        // POST 요청으로 메시지 전송
        let message_url = self.message_url.read().await.clone();
        let post_result = self.client.post(&message_url).json(&request).send().await;

        match post_result {
            Ok(r) if r.status().is_success() => {}
            Ok(r) => {
                self.pending_requests.write().await.remove(&id);
                return Err(Error::Http(format!(
                    "HTTP {} from message endpoint",
                    r.status()
                )));
            }
            Err(e) => {
                self.pending_requests.write().await.remove(&id);
                return Err(Error::Http(format!("Failed to send request: {}", e)));
            }
        }

        // SSE 스트림으로 응답 대기
        let response = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(r)) => r,
            Ok(Err(_)) => {
                return Err(Error::McpConnection(
                    "Response channel closed before reply".to_string(),
                ));
            }
            Err(_) => {
                self.pending_requests.write().await.remove(&id);
                return Err(Error::Timeout(format!(
                    "No response to '{}' within {:?}",
                    method, timeout
                )));
            }
        };

        if let Some(error) = response.error {
            return Err(Error::Mcp(format!("[{}] {}", error.code, error.message)));
        }

        Ok(response.result.unwrap_or(Value::Null))
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::McpConnection(format!(
                "SSE transport to '{}' not connected",
                self.url
            )));
        }

        let notification = JsonRpcNotification::new(method, params);
        let message_url = self.message_url.read().await.clone();

        self.client
            .post(&message_url)
            .json(&notification)
            .send()
            .await
            .map_err(|e| Error::Http(format!("Failed to send notification: {}", e)))?;

        Ok(())
    }

    async fn close(&self) -> Result<()> {
        // 리스너 태스크를 내려 지속 GET 스트림까지 끊음
        self.shutdown.cancel();
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Sse
    }
}

// ============================================================================
// Streamable HTTP Transport - 요청 단위 스트리밍 HTTP
// ============================================================================

/// Streamable HTTP Transport
///
/// 각 JSON-RPC 요청을 서버 URL로 POST하고, 응답 본문
/// (application/json 또는 단발성 text/event-stream)에서 결과를 읽습니다.
/// initialize 응답의 Mcp-Session-Id 헤더를 이후 요청에 실어 보냅니다.
pub struct StreamableHttpTransport {
    /// 서버 URL
    url: String,

    /// 요청 ID 카운터
    request_id: AtomicU64,

    /// HTTP 클라이언트 (요청 헤더 포함)
    client: reqwest::Client,

    /// 서버가 발급한 세션 ID
    session_id: Arc<RwLock<Option<String>>>,

    /// 서버 발신 알림 전달
    notification_tx: Option<NotificationSender>,

    /// 연결 상태
    connected: Arc<AtomicBool>,
}

impl StreamableHttpTransport {
    /// Transport 생성 (실제 검증은 initialize 핸드셰이크가 수행)
    pub fn connect(
        url: &str,
        headers: &HashMap<String, String>,
        notification_tx: Option<NotificationSender>,
    ) -> Result<Self> {
        info!("Creating streamable HTTP transport: {}", url);

        let header_map = build_header_map(headers)?;
        let client = reqwest::Client::builder()
            .default_headers(header_map)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            url: url.to_string(),
            request_id: AtomicU64::new(1),
            client,
            session_id: Arc::new(RwLock::new(None)),
            notification_tx,
            connected: Arc::new(AtomicBool::new(true)),
        })
    }

    fn next_id(&self) -> u64 {
        self.request_id.fetch_add(1, Ordering::SeqCst)
    }

    /// POST 한 번으로 요청-응답을 주고받음
    async fn round_trip(&self, request: &JsonRpcRequest, timeout: Duration) -> Result<Value> {
        let mut builder = self
            .client
            .post(&self.url)
            .header("accept", "application/json, text/event-stream")
            .json(request);

        if let Some(session) = self.session_id.read().await.clone() {
            builder = builder.header("mcp-session-id", session);
        }

        let response = builder
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| classify_reqwest_error(&self.url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Http(format!("HTTP {} from {}", status, self.url)));
        }

        // 세션 ID 갱신 (initialize 응답에 실려 옴)
        if let Some(session) = response
            .headers()
            .get("mcp-session-id")
            .and_then(|v| v.to_str().ok())
        {
            *self.session_id.write().await = Some(session.to_string());
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        if content_type.starts_with("text/event-stream") {
            self.read_sse_body(request.id, response, timeout).await
        } else {
            let body: JsonRpcResponse = response
                .json()
                .await
                .map_err(|e| Error::Mcp(format!("Invalid JSON-RPC response: {}", e)))?;
            unwrap_response(body)
        }
    }

    /// 단발성 SSE 본문에서 id가 일치하는 응답을 찾음
    async fn read_sse_body(
        &self,
        request_id: u64,
        response: reqwest::Response,
        timeout: Duration,
    ) -> Result<Value> {
        let read_all = async {
            let mut stream = response.bytes_stream();
            let mut buffer = String::new();

            while let Some(chunk) = stream.next().await {
                let chunk =
                    chunk.map_err(|e| Error::Http(format!("Stream read failed: {}", e)))?;
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                // 이벤트 경계(빈 줄)마다 data 라인 처리
                while let Some(pos) = buffer.find("\n\n") {
                    let event: String = buffer.drain(..pos + 2).collect();
                    for line in event.lines() {
                        let Some(data) = line.strip_prefix("data:") else {
                            continue;
                        };
                        let data = data.trim();

                        if let Ok(resp) = serde_json::from_str::<JsonRpcResponse>(data) {
                            if resp.id == Some(request_id) {
                                return unwrap_response(resp);
                            }
                        }
                        if let Ok(note) = serde_json::from_str::<JsonRpcNotification>(data) {
                            if !note.method.is_empty() {
                                if let Some(tx) = &self.notification_tx {
                                    let _ = tx.send(note);
                                }
                            }
                        }
                    }
                }
            }

            Err(Error::Mcp(
                "Event stream ended without a matching response".to_string(),
            ))
        };

        match tokio::time::timeout(timeout, read_all).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(format!(
                "No response within {:?} on event-stream body",
                timeout
            ))),
        }
    }
}

/// reqwest 에러를 타임아웃/네트워크로 구분
fn classify_reqwest_error(url: &str, e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(format!("Request to '{}' timed out", url))
    } else {
        Error::Http(format!("Request to '{}' failed: {}", url, e))
    }
}

fn unwrap_response(response: JsonRpcResponse) -> Result<Value> {
    if let Some(error) = response.error {
        return Err(Error::Mcp(format!("[{}] {}", error.code, error.message)));
    }
    Ok(response.result.unwrap_or(Value::Null))
}

#[async_trait]
impl McpTransport for StreamableHttpTransport {
    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value> {
        if !self.is_connected() {
            return Err(Error::McpConnection(format!(
                "HTTP transport to '{}' closed",
                self.url
            )));
        }

        let id = self.next_id();
        let request = JsonRpcRequest::new(id, method, params);

        debug!("HTTP request {} -> {}", method, self.url);
        self.round_trip(&request, timeout).await
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::McpConnection(format!(
                "HTTP transport to '{}' closed",
                self.url
            )));
        }

        let notification = JsonRpcNotification::new(method, params);

        let mut builder = self
            .client
            .post(&self.url)
            .header("accept", "application/json, text/event-stream")
            .json(&notification);

        if let Some(session) = self.session_id.read().await.clone() {
            builder = builder.header("mcp-session-id", session);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| classify_reqwest_error(&self.url, e))?;

        // 알림은 202 Accepted가 일반적 - 4xx/5xx만 에러 취급
        if response.status().is_client_error() || response.status().is_server_error() {
            warn!(
                "Notification '{}' rejected with HTTP {}",
                method,
                response.status()
            );
        }

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

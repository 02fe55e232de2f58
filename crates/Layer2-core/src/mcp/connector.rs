//! Transport Connector - 전송 협상 및 폴백
//!
//! ServerConfig 하나에 대해 힌트 전송 → 나머지 전송 순서로 단일 시도.
//! 재시도는 호출 계층의 몫이며 여기서는 전송당 한 번만 시도합니다.

use super::client::{spawn_notification_forwarder, McpClient};
use super::transport::{McpTransport, SseTransport, StreamableHttpTransport};
use super::types::{ServerConfig, TransportKind};
use std::collections::HashMap;
use std::sync::Arc;
use tether_foundation::{Error, ProgressRegistry, Result};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// 기본 User-Agent
///
/// 일부 서버는 UA 없는 요청을 거부하므로 항상 주입합니다.
fn default_user_agent() -> String {
    format!("tether/{}", env!("CARGO_PKG_VERSION"))
}

/// 요청 헤더 준비 (User-Agent 없으면 기본값 주입)
pub fn effective_headers(config: &ServerConfig) -> HashMap<String, String> {
    let mut headers = config.headers.clone();

    let has_user_agent = headers.keys().any(|k| k.eq_ignore_ascii_case("user-agent"));
    if !has_user_agent {
        headers.insert("User-Agent".to_string(), default_user_agent());
    }

    headers
}

/// 전송 폴백 순서 (힌트 먼저)
pub fn transport_order(hint: TransportKind) -> [TransportKind; 2] {
    [hint, hint.fallback()]
}

/// 서버에 연결 (전송 협상 + initialize 핸드셰이크)
///
/// 두 전송 모두 실패하면 시도한 전송을 모두 언급하는 단일 연결 에러를
/// 반환합니다.
pub async fn connect_with_fallback(
    config: &ServerConfig,
    progress: Option<Arc<ProgressRegistry>>,
) -> Result<(Arc<McpClient>, TransportKind)> {
    let headers = effective_headers(config);
    let server_name = config
        .name
        .clone()
        .unwrap_or_else(|| config.url.clone());

    let mut failures: Vec<(TransportKind, String)> = Vec::new();

    for kind in transport_order(config.transport_hint) {
        debug!("Trying transport {} for '{}'", kind, server_name);

        let (notification_tx, notification_rx) = mpsc::unbounded_channel();

        let transport: Result<Arc<dyn McpTransport>> = match kind {
            TransportKind::Sse => {
                SseTransport::connect(&config.url, &headers, Some(notification_tx))
                    .await
                    .map(|t| Arc::new(t) as Arc<dyn McpTransport>)
            }
            TransportKind::StreamableHttp => {
                StreamableHttpTransport::connect(&config.url, &headers, Some(notification_tx))
                    .map(|t| Arc::new(t) as Arc<dyn McpTransport>)
            }
        };

        let transport = match transport {
            Ok(t) => t,
            Err(e) => {
                warn!("Transport {} failed for '{}': {}", kind, server_name, e);
                failures.push((kind, e.to_string()));
                continue;
            }
        };

        match McpClient::handshake(server_name.clone(), Arc::clone(&transport)).await {
            Ok(client) => {
                if let Some(registry) = progress.clone() {
                    spawn_notification_forwarder(
                        server_name.clone(),
                        notification_rx,
                        registry,
                    );
                }
                return Ok((Arc::new(client), kind));
            }
            Err(e) => {
                warn!(
                    "Handshake over {} failed for '{}': {}",
                    kind, server_name, e
                );
                // 반쯤 열린 전송 정리
                let _ = transport.close().await;
                failures.push((kind, e.to_string()));
            }
        }
    }

    let detail = failures
        .iter()
        .map(|(kind, msg)| format!("{}: {}", kind, msg))
        .collect::<Vec<_>>()
        .join("; ");

    Err(Error::McpConnection(format!(
        "Failed to connect to '{}' over both transports ({})",
        server_name, detail
    )))
}

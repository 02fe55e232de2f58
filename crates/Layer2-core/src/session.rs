//! Bridge Session - 세션 수명주기와 도구 호출 진입점
//!
//! initialize가 카탈로그 집계, 풀 스위퍼, 레지스트리를 묶어 세션을
//! 만들고, invoke가 재시도/타임아웃/취소를 얹어 도구를 호출합니다.
//! invoke는 항상 정규화된 봉투를 돌려주며 Rust 에러를 밖으로
//! 전파하지 않습니다.

use crate::catalog::{aggregate, AggregatedCatalog};
use crate::mcp::{spawn_sweeper, ConnectionPool, ServerConfig};
use crate::normalize::{transform, InvocationResult};
use crate::projection;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tether_foundation::{
    format_error, with_retry, Error, ErrorCode, ProgressRegistry, RequestRegistry, Result,
    RetryConfig,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// 호출 단위 기본 타임아웃 (per_call_timeout_ms 미지정 시)
const DEFAULT_TOOL_TIMEOUT_MS: u64 = 30_000;

/// Rust 에러를 봉투용 에러 코드로 분류
fn error_code_for(error: &Error) -> ErrorCode {
    match error {
        Error::Timeout(_) => ErrorCode::Timeout,
        Error::RateLimited(_) => ErrorCode::RateLimited,
        Error::McpConnection(_) | Error::Transport(_) => ErrorCode::ConnectionError,
        Error::Http(_) => ErrorCode::NetworkError,
        Error::ToolNotFound(_) | Error::NotFound(_) | Error::McpServerNotFound(_) => {
            ErrorCode::NotFound
        }
        Error::InvalidInput(_) | Error::Validation(_) => ErrorCode::InvalidArguments,
        _ => ErrorCode::UnknownError,
    }
}

/// Rust 에러를 실패 봉투로 변환
///
/// details에 진단용 컨텍스트 (서버/도구/인자)와 사용자용 리포트를 함께
/// 싣습니다. 호출자가 재시도할지, 관대한 스키마로 폴백할지 판단하는 데
/// 필요한 전부입니다.
fn failure_from_error(
    error: &Error,
    server_key: &str,
    tool_name: &str,
    args: &Value,
) -> InvocationResult {
    let code = error_code_for(error);
    let report = format_error(code, &format!("tool '{}'", tool_name));
    let details = serde_json::json!({
        "server": server_key,
        "tool": tool_name,
        "args": args,
        "report": report,
    });
    InvocationResult::failure(code, error.to_string(), Some(details))
}

/// 활성 브릿지 세션
///
/// 세션 동안 카탈로그는 불변이며, 연결 상태만 풀 스위퍼가 관리합니다.
pub struct BridgeSession {
    catalog: AggregatedCatalog,
    pool: Arc<ConnectionPool>,
    progress: Arc<ProgressRegistry>,
    requests: Arc<RequestRegistry>,
    sweeper: tokio::task::JoinHandle<()>,
    cancel: CancellationToken,
    retry: RetryConfig,
}

impl BridgeSession {
    /// 세션 초기화: 모든 서버에 동시 연결해 카탈로그를 집계하고
    /// 풀 스위퍼를 시작합니다.
    ///
    /// 취소 토큰이 집계 중에 발화하면 이미 맺은 연결을 닫고
    /// `Error::Cancelled`를 돌려줍니다. 서버 연결 실패는 세션 실패가
    /// 아니며, 해당 서버만 카탈로그에서 빠집니다.
    pub async fn initialize(
        configs: Vec<ServerConfig>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let pool = Arc::new(ConnectionPool::new());
        let progress = Arc::new(ProgressRegistry::new());

        let catalog = tokio::select! {
            catalog = aggregate(configs, &pool, Some(Arc::clone(&progress))) => catalog,
            _ = cancel.cancelled() => {
                warn!("Session initialization cancelled, closing connections");
                pool.close_all().await;
                return Err(Error::Cancelled);
            }
        };

        let sweeper = spawn_sweeper(Arc::clone(&pool));

        info!(
            "Bridge session ready: {} servers, {} tools",
            catalog.len(),
            catalog.values().map(|c| c.tools.len()).sum::<usize>()
        );

        Ok(Self {
            catalog,
            pool,
            progress,
            requests: Arc::new(RequestRegistry::new()),
            sweeper,
            cancel,
            retry: RetryConfig::default(),
        })
    }

    /// 통합 카탈로그
    pub fn catalog(&self) -> &AggregatedCatalog {
        &self.catalog
    }

    /// 진행 상황 레지스트리
    pub fn progress(&self) -> &Arc<ProgressRegistry> {
        &self.progress
    }

    /// 활성 요청 레지스트리
    pub fn requests(&self) -> &Arc<RequestRegistry> {
        &self.requests
    }

    /// 연결 풀 (진단용)
    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// 카탈로그 전체의 JavaScript 헬퍼 소스
    pub fn helper_source(&self) -> String {
        projection::generate_all(&self.catalog)
    }

    /// 도구 호출
    ///
    /// 재시도(지수 백오프)와 호출 단위 타임아웃을 적용한 뒤 결과를
    /// 정규화 봉투로 돌려줍니다. 어떤 실패도 Err가 아닌 실패 봉투가
    /// 됩니다. 세션 취소 토큰이 발화하면 서버에 취소 알림을 보내고
    /// 즉시 반환합니다.
    pub async fn invoke(
        &self,
        server_key: &str,
        tool_name: &str,
        arguments: Value,
    ) -> InvocationResult {
        let Some(entry) = self.catalog.get(server_key) else {
            let known = self
                .catalog
                .keys()
                .cloned()
                .collect::<Vec<_>>()
                .join(", ");
            return InvocationResult::failure(
                ErrorCode::NotFound,
                format!("Unknown server '{}'. Known servers: {}", server_key, known),
                None,
            );
        };

        if !entry.tools.contains_key(tool_name) {
            let known = entry.tools.keys().cloned().collect::<Vec<_>>().join(", ");
            return InvocationResult::failure(
                ErrorCode::NotFound,
                format!(
                    "Unknown tool '{}' on server '{}'. Known tools: {}",
                    tool_name, server_key, known
                ),
                None,
            );
        }

        let timeout = Duration::from_millis(
            entry
                .config
                .per_call_timeout_ms
                .unwrap_or(DEFAULT_TOOL_TIMEOUT_MS),
        );

        let request_id = uuid::Uuid::new_v4().to_string();
        self.requests.track(&request_id, server_key);

        let client = Arc::clone(&entry.client);
        let call = with_retry(&self.retry, tool_name, || {
            let client = Arc::clone(&client);
            let arguments = arguments.clone();
            async move { client.call_tool(tool_name, arguments, timeout).await }
        });

        let result = tokio::select! {
            result = call => result,
            _ = self.cancel.cancelled() => {
                // best-effort - 서버가 중단을 보장하지 않음
                let _ = client
                    .cancel_request(&request_id, Some("session cancelled"))
                    .await;
                Err(Error::Cancelled)
            }
        };

        self.requests.untrack(&request_id);

        match result {
            Ok(raw) => match serde_json::to_value(&raw) {
                Ok(value) => transform(value, tool_name),
                Err(e) => {
                    failure_from_error(&Error::from(e), server_key, tool_name, &arguments)
                }
            },
            Err(e) => {
                warn!(
                    "Tool '{}' on '{}' failed: {}",
                    tool_name, server_key, e
                );
                failure_from_error(&e, server_key, tool_name, &arguments)
            }
        }
    }

    /// 단일 요청 취소
    ///
    /// 레지스트리에서 요청을 찾아 소유 클라이언트에 취소 알림을 보내고
    /// 엔트리를 제거합니다. 알림은 best-effort이며 서버가 작업 중단을
    /// 보장하지 않습니다. 모르는 요청 ID는 false를 돌려줍니다.
    pub async fn cancel(&self, request_id: &str) -> bool {
        let Some(request) = self.requests.untrack(request_id) else {
            return false;
        };

        if let Some(entry) = self.catalog.get(&request.server_key) {
            let _ = entry
                .client
                .cancel_request(request_id, Some("cancelled by caller"))
                .await;
        }

        true
    }

    /// 세션 정리: 스위퍼 중단, 활성 요청 취소 알림, 모든 연결 종료
    pub async fn cleanup(&self) {
        self.sweeper.abort();

        for request in self.requests.active() {
            if let Some(entry) = self.catalog.get(&request.server_key) {
                let _ = entry
                    .client
                    .cancel_request(&request.request_id, Some("session shutdown"))
                    .await;
            }
            self.requests.untrack(&request.request_id);
        }

        self.pool.close_all().await;
        info!("Bridge session closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_initialize_with_no_servers() {
        let session = BridgeSession::initialize(Vec::new(), CancellationToken::new())
            .await
            .unwrap();
        assert!(session.catalog().is_empty());
        session.cleanup().await;
    }

    #[tokio::test]
    async fn test_initialize_cancelled_up_front() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = BridgeSession::initialize(Vec::new(), cancel).await;
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn test_invoke_unknown_server() {
        let session = BridgeSession::initialize(Vec::new(), CancellationToken::new())
            .await
            .unwrap();

        let result = session
            .invoke("ghost", "search", serde_json::json!({}))
            .await;

        assert!(!result.ok);
        let error = result.error.unwrap();
        assert_eq!(error.code, ErrorCode::NotFound);
        assert!(error.message.contains("ghost"));

        session.cleanup().await;
    }

    #[tokio::test]
    async fn test_invoke_does_not_track_rejected_requests() {
        let session = BridgeSession::initialize(Vec::new(), CancellationToken::new())
            .await
            .unwrap();

        let _ = session
            .invoke("ghost", "search", serde_json::json!({}))
            .await;
        assert!(session.requests().is_empty());

        session.cleanup().await;
    }

    #[tokio::test]
    async fn test_cancel_unknown_request() {
        let session = BridgeSession::initialize(Vec::new(), CancellationToken::new())
            .await
            .unwrap();
        assert!(!session.cancel("no-such-request").await);
        session.cleanup().await;
    }

    #[test]
    fn test_error_code_mapping() {
        assert_eq!(
            error_code_for(&Error::Timeout("t".to_string())),
            ErrorCode::Timeout
        );
        assert_eq!(
            error_code_for(&Error::RateLimited("r".to_string())),
            ErrorCode::RateLimited
        );
        assert_eq!(
            error_code_for(&Error::McpConnection("c".to_string())),
            ErrorCode::ConnectionError
        );
        assert_eq!(
            error_code_for(&Error::ToolNotFound("x".to_string())),
            ErrorCode::NotFound
        );
        assert_eq!(error_code_for(&Error::Cancelled), ErrorCode::UnknownError);
    }

    #[test]
    fn test_failure_envelope_carries_context_and_report() {
        let args = serde_json::json!({"query": "x"});
        let envelope =
            failure_from_error(&Error::Timeout("slow".to_string()), "alpha", "search", &args);
        assert!(!envelope.ok);

        let error = envelope.error.unwrap();
        assert_eq!(error.code, ErrorCode::Timeout);

        let details = error.details.unwrap();
        assert_eq!(details["server"], "alpha");
        assert_eq!(details["tool"], "search");
        assert_eq!(details["args"]["query"], "x");
        assert_eq!(details["report"]["recoverable"], true);
    }
}

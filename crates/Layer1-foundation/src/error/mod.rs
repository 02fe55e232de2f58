//! Error types for Tether
//!
//! 모든 에러를 중앙에서 관리

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Tether 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // 설정 관련
    // ========================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    // ========================================================================
    // 연결 관련
    // ========================================================================
    #[error("MCP connection error: {0}")]
    McpConnection(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("HTTP error: {0}")]
    Http(String),

    // ========================================================================
    // MCP 관련
    // ========================================================================
    #[error("MCP error: {0}")]
    Mcp(String),

    #[error("MCP server not found: {0}")]
    McpServerNotFound(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    // ========================================================================
    // Tool 관련
    // ========================================================================
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool execution failed: {tool} - {message}")]
    ToolExecution { tool: String, message: String },

    // ========================================================================
    // Prompt 관련
    // ========================================================================
    #[error("Prompt error: {0}")]
    Prompt(String),

    // ========================================================================
    // 실행 관련
    // ========================================================================
    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Cancelled")]
    Cancelled,

    // ========================================================================
    // 일반
    // ========================================================================
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Validation error: {0}")]
    Validation(String),

    // ========================================================================
    // 외부 에러 변환
    // ========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ========================================================================
    // 기타
    // ========================================================================
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// 재시도 가능한 에러인지 확인
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Timeout(_) | Error::RateLimited(_) | Error::McpConnection(_) | Error::Http(_)
        )
    }
}

// ============================================================================
// ErrorCode - 브릿지 전체에서 쓰는 기계 판독용 에러 코드
// ============================================================================

/// 분류된 에러 코드
///
/// 호출 계층(재시도)과 응답 정규화 계층이 공유합니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// 두 전송 모두 연결 실패
    ConnectionError,
    /// 데드라인 초과
    Timeout,
    /// HTTP 429
    RateLimited,
    /// HTTP 5xx
    ServerError,
    /// 그 외 4xx (재시도 불가)
    ClientError,
    /// 전송 계층 실패 (connection reset, DNS 등)
    NetworkError,
    /// 정규화 계층: 테이블 없음
    TableNotFound,
    /// 정규화 계층: 잘못된 인자
    InvalidArguments,
    /// 정규화 계층: 필수 파라미터 누락
    MissingRequiredParam,
    /// 정규화 계층: 리소스 없음
    NotFound,
    /// 분류 불가
    UnknownError,
}

impl ErrorCode {
    /// SCREAMING_SNAKE_CASE 문자열 표현
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConnectionError => "CONNECTION_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::RateLimited => "RATE_LIMITED",
            Self::ServerError => "SERVER_ERROR",
            Self::ClientError => "CLIENT_ERROR",
            Self::NetworkError => "NETWORK_ERROR",
            Self::TableNotFound => "TABLE_NOT_FOUND",
            Self::InvalidArguments => "INVALID_ARGUMENTS",
            Self::MissingRequiredParam => "MISSING_REQUIRED_PARAM",
            Self::NotFound => "NOT_FOUND",
            Self::UnknownError => "UNKNOWN_ERROR",
        }
    }

    /// 재시도로 복구 가능한지 여부
    ///
    /// CLIENT_ERROR만 복구 불가 - 요청 자체가 잘못된 경우 재시도해도 동일
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::ClientError)
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 사용자에게 보여줄 에러 리포트
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReport {
    /// 짧은 에러 설명
    pub error: String,
    /// 상세 설명 (자동화된 호출자가 자가 수정에 쓸 수 있는 힌트 포함)
    pub details: String,
    /// 재시도 가치가 있는지
    pub recoverable: bool,
}

/// 에러 코드를 사용자용 리포트로 변환
pub fn format_error(code: ErrorCode, context: &str) -> ErrorReport {
    let (error, details) = match code {
        ErrorCode::ConnectionError => (
            "Could not connect to the tool server",
            "Both SSE and streamable HTTP transports failed. Check the server URL and headers.",
        ),
        ErrorCode::Timeout => (
            "The request timed out",
            "The server did not respond within the deadline. It may be overloaded; retrying usually helps.",
        ),
        ErrorCode::RateLimited => (
            "The server is rate limiting requests",
            "Received HTTP 429. Wait briefly before retrying.",
        ),
        ErrorCode::ServerError => (
            "The server reported an internal error",
            "Received an HTTP 5xx response. This is usually transient.",
        ),
        ErrorCode::ClientError => (
            "The request was rejected by the server",
            "Received an HTTP 4xx response. Retrying the same request will not help; fix the request first.",
        ),
        ErrorCode::NetworkError => (
            "A network error occurred",
            "Connection reset, refused, or DNS failure. Retrying usually helps.",
        ),
        ErrorCode::TableNotFound => (
            "The referenced table does not exist",
            "Check the table name against the tool's available tables.",
        ),
        ErrorCode::InvalidArguments => (
            "The tool rejected the arguments",
            "Check parameter names and types against the tool schema.",
        ),
        ErrorCode::MissingRequiredParam => (
            "A required parameter is missing",
            "Consult the tool schema for the required parameter list.",
        ),
        ErrorCode::NotFound => (
            "The requested resource was not found",
            "The tool could not locate the requested item.",
        ),
        ErrorCode::UnknownError => (
            "The tool reported an error",
            "The error text could not be classified; see the raw message.",
        ),
    };

    let details = if context.is_empty() {
        details.to_string()
    } else {
        format!("{} ({})", details, context)
    };

    ErrorReport {
        error: error.to_string(),
        details,
        recoverable: code.is_recoverable(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_retryable() {
        assert!(Error::Timeout("t".to_string()).is_retryable());
        assert!(Error::RateLimited("r".to_string()).is_retryable());
        assert!(!Error::InvalidInput("i".to_string()).is_retryable());
    }

    #[test]
    fn test_client_error_is_only_non_recoverable() {
        for code in [
            ErrorCode::ConnectionError,
            ErrorCode::Timeout,
            ErrorCode::RateLimited,
            ErrorCode::ServerError,
            ErrorCode::NetworkError,
            ErrorCode::TableNotFound,
            ErrorCode::InvalidArguments,
            ErrorCode::MissingRequiredParam,
            ErrorCode::NotFound,
            ErrorCode::UnknownError,
        ] {
            assert!(code.is_recoverable(), "{} should be recoverable", code);
        }
        assert!(!ErrorCode::ClientError.is_recoverable());
    }

    #[test]
    fn test_format_error_includes_context() {
        let report = format_error(ErrorCode::Timeout, "tool 'search'");
        assert!(report.recoverable);
        assert!(report.details.contains("tool 'search'"));
    }

    #[test]
    fn test_error_code_serialization() {
        let json = serde_json::to_string(&ErrorCode::RateLimited).unwrap();
        assert_eq!(json, "\"RATE_LIMITED\"");
    }
}

//! tether-core: Tool Bridge Runtime for Tether
//!
//! Layer2 - MCP 브릿지 구현 레이어
//!
//! # 주요 모듈
//!
//! - `mcp`: MCP 전송 (SSE / streamable HTTP), 클라이언트, 커넥터, 연결 풀
//! - `catalog`: 서버별 도구/프롬프트 동시 집계 (부분 실패 허용)
//! - `invoke`: 재시도 포함 HTTP 호출 계층
//! - `normalize`: 도구 응답을 단일 봉투로 정규화
//! - `projection`: server key별 JavaScript 헬퍼 소스 생성
//! - `session`: 세션 수명주기와 도구 호출 진입점
//! - `boundary`: 헬스체크 / 프롬프트 해석 단발 오퍼레이션
//! - `config`: TOML 서버 설정 로더
//!
//! # 사용 예시
//!
//! ```ignore
//! use tether_core::{load_servers, BridgeSession};
//! use tokio_util::sync::CancellationToken;
//!
//! let servers = load_servers("tether.toml")?;
//! let session = BridgeSession::initialize(servers, CancellationToken::new()).await?;
//!
//! let result = session.invoke("github", "search_issues", json!({
//!     "query": "is:open label:bug"
//! })).await;
//!
//! if result.ok {
//!     println!("{:?}", result.data);
//! }
//!
//! session.cleanup().await;
//! ```

pub mod boundary;
pub mod catalog;
pub mod config;
pub mod invoke;
pub mod mcp;
pub mod normalize;
pub mod projection;
pub mod session;

// ============================================================================
// MCP
// ============================================================================
pub use mcp::{
    connect_with_fallback, pool_key, spawn_sweeper, CallToolResult, ConnectionPool, McpClient,
    PoolStatus, PromptDefinition, PromptMessage, ServerConfig, SimpleMessage, ToolContent,
    ToolDefinition, TransportKind,
};

// ============================================================================
// Catalog
// ============================================================================
pub use catalog::{aggregate, extract_server_key, AggregatedCatalog, ServerCatalog};

// ============================================================================
// Invocation
// ============================================================================
pub use invoke::{fetch_with_retry, FetchOutcome, RequestSpec};

// ============================================================================
// Normalization
// ============================================================================
pub use normalize::{transform, ErrorInfo, InvocationResult, StagedData};

// ============================================================================
// Projection
// ============================================================================
pub use projection::{
    compact_description, generate_alias, generate_all, generate_helper, summarize_schema,
};

// ============================================================================
// Session & Boundary
// ============================================================================
pub use boundary::{health_check, resolve_prompt, HealthReport};
pub use config::load_servers;
pub use session::BridgeSession;

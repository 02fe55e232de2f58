//! # tether-foundation
//!
//! Foundation layer for Tether:
//! - Error: 중앙 에러 타입 + 분류된 에러 코드 (ErrorCode)
//! - Retry: 지수 백오프 + 지터 재시도 실행기
//! - Registry: 진행 상황 / 활성 요청 레지스트리
//!
//! ## 아키텍처
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  tether-core (bridge, transports, catalog)   │
//! │                     │                        │
//! │                     ▼                        │
//! │  tether-foundation                           │
//! │  ├── Error / ErrorCode / format_error        │
//! │  ├── RetryConfig / with_retry                │
//! │  └── ProgressRegistry / RequestRegistry      │
//! └──────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod registry;
pub mod retry;

// ============================================================================
// Error
// ============================================================================
pub use error::{format_error, Error, ErrorCode, ErrorReport, Result};

// ============================================================================
// Retry
// ============================================================================
pub use retry::{with_retry, RetryClassification, RetryConfig, RetryableError};

// ============================================================================
// Registry
// ============================================================================
pub use registry::{ActiveRequest, ProgressRegistry, ProgressUpdate, RequestRegistry};

//! Progress & Request Registries
//!
//! 진행 상황 토큰과 활성 요청을 추적하는 프로세스 단위 레지스트리.
//! 전역 상태가 아니라 명시적으로 생성/주입되는 컨테이너로,
//! 테스트에서 독립 인스턴스를 만들 수 있습니다.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 진행 상황 업데이트 (append-only)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressUpdate {
    /// 진행 토큰
    pub progress_token: String,

    /// 현재 진행값
    pub progress: f64,

    /// 전체 작업량 (알 수 없으면 None)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<f64>,

    /// 진행 메시지
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// 기록 시각
    pub timestamp: DateTime<Utc>,
}

/// 진행 상황 레지스트리
///
/// 토큰별 업데이트를 순서대로 누적합니다. 업데이트는 수정되지 않고
/// 항상 뒤에 추가됩니다.
#[derive(Debug, Default)]
pub struct ProgressRegistry {
    entries: RwLock<HashMap<String, Vec<ProgressUpdate>>>,
}

impl ProgressRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 업데이트 추가
    pub fn record(&self, token: &str, progress: f64, total: Option<f64>, message: Option<String>) {
        let update = ProgressUpdate {
            progress_token: token.to_string(),
            progress,
            total,
            message,
            timestamp: Utc::now(),
        };

        self.entries
            .write()
            .entry(token.to_string())
            .or_default()
            .push(update);
    }

    /// 토큰의 업데이트 목록 (기록 순서)
    pub fn get(&self, token: &str) -> Vec<ProgressUpdate> {
        self.entries.read().get(token).cloned().unwrap_or_default()
    }

    /// 토큰 제거
    pub fn clear(&self, token: &str) {
        self.entries.write().remove(token);
    }

    /// 추적 중인 토큰 수
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

/// 활성 요청 정보
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveRequest {
    /// 요청 ID
    pub request_id: String,

    /// 요청을 소유한 서버 키
    pub server_key: String,

    /// 시작 시각
    pub timestamp: DateTime<Utc>,
}

/// 활성 요청 레지스트리
///
/// 취소 엔드포인트가 참조하는 단순 존재 맵. 요청 시작 시 등록,
/// 완료 또는 취소 시 제거됩니다.
#[derive(Debug, Default)]
pub struct RequestRegistry {
    entries: RwLock<HashMap<String, ActiveRequest>>,
}

impl RequestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 요청 등록
    pub fn track(&self, request_id: &str, server_key: &str) {
        let request = ActiveRequest {
            request_id: request_id.to_string(),
            server_key: server_key.to_string(),
            timestamp: Utc::now(),
        };
        self.entries
            .write()
            .insert(request_id.to_string(), request);
    }

    /// 요청 제거 (완료 또는 취소)
    pub fn untrack(&self, request_id: &str) -> Option<ActiveRequest> {
        self.entries.write().remove(request_id)
    }

    /// 요청 조회
    pub fn get(&self, request_id: &str) -> Option<ActiveRequest> {
        self.entries.read().get(request_id).cloned()
    }

    /// 활성 요청 목록
    pub fn active(&self) -> Vec<ActiveRequest> {
        self.entries.read().values().cloned().collect()
    }

    /// 활성 요청 수
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_append_order() {
        let registry = ProgressRegistry::new();
        registry.record("tok-1", 10.0, Some(100.0), None);
        registry.record("tok-1", 50.0, Some(100.0), Some("halfway".to_string()));

        let updates = registry.get("tok-1");
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].progress, 10.0);
        assert_eq!(updates[1].progress, 50.0);
        assert_eq!(updates[1].message.as_deref(), Some("halfway"));
    }

    #[test]
    fn test_progress_clear() {
        let registry = ProgressRegistry::new();
        registry.record("tok-1", 1.0, None, None);
        registry.clear("tok-1");
        assert!(registry.get("tok-1").is_empty());
    }

    #[test]
    fn test_request_lifecycle() {
        let registry = RequestRegistry::new();
        registry.track("req-1", "alpha");

        let entry = registry.get("req-1").unwrap();
        assert_eq!(entry.server_key, "alpha");

        let removed = registry.untrack("req-1").unwrap();
        assert_eq!(removed.request_id, "req-1");
        assert!(registry.get("req-1").is_none());
    }

    #[test]
    fn test_unknown_token_is_empty() {
        let registry = ProgressRegistry::new();
        assert!(registry.get("nope").is_empty());
    }
}

//! Connection Pool - 연결 재사용
//!
//! url + 헤더로 키를 만들어 살아있는 연결을 캐시합니다.
//! 30초마다 스윕이 돌며 60초 이상 유휴 연결을 정리합니다.
//! 캐시 미스는 "새로 연결하라"는 뜻일 뿐 호출자를 블로킹하지 않습니다.

use super::client::McpClient;
use super::types::TransportKind;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// 유휴 연결 TTL (60초)
const IDLE_TTL: Duration = Duration::from_secs(60);

/// 스윕 간격 (30초)
const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// 풀에 들어있는 연결
pub struct PooledConnection {
    /// MCP 클라이언트
    pub client: Arc<McpClient>,

    /// 연결에 사용된 전송
    pub transport: TransportKind,

    /// 마지막 사용 시간
    last_used: RwLock<Instant>,
}

impl PooledConnection {
    fn new(client: Arc<McpClient>, transport: TransportKind) -> Self {
        Self {
            client,
            transport,
            last_used: RwLock::new(Instant::now()),
        }
    }

    /// 사용 시간 갱신
    async fn touch(&self) {
        *self.last_used.write().await = Instant::now();
    }

    /// 유휴 시간
    async fn idle(&self) -> Duration {
        self.last_used.read().await.elapsed()
    }
}

/// 풀 엔트리 상태 (진단용)
#[derive(Debug, Clone)]
pub struct PoolStatus {
    pub key: String,
    pub transport: TransportKind,
    pub idle: Duration,
    pub connected: bool,
}

/// 연결 풀
///
/// 모든 변경은 엔트리 단위 교체/삭제라 별도의 잠금 규율이 필요 없습니다.
/// 같은 키에 대한 동시 put은 마지막 쓰기가 이깁니다.
#[derive(Default)]
pub struct ConnectionPool {
    entries: RwLock<HashMap<String, Arc<PooledConnection>>>,
}

/// 풀 키 생성: url + 정규화된 헤더
///
/// 헤더 이름은 소문자로 통일하고 정렬하므로, 의미가 같은 헤더 맵은
/// 대소문자/순서와 무관하게 같은 키를 만듭니다.
pub fn pool_key(url: &str, headers: &HashMap<String, String>) -> String {
    let mut pairs: Vec<(String, &str)> = headers
        .iter()
        .map(|(k, v)| (k.to_lowercase(), v.as_str()))
        .collect();
    pairs.sort();

    let serialized = pairs
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(";");

    format!("{}|{}", url, serialized)
}

impl ConnectionPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// 연결 조회 (사용 시간 갱신)
    pub async fn get(&self, key: &str) -> Option<Arc<PooledConnection>> {
        let entries = self.entries.read().await;
        if let Some(entry) = entries.get(key) {
            entry.touch().await;
            return Some(Arc::clone(entry));
        }
        None
    }

    /// 연결 등록 (같은 키의 기존 연결은 best-effort로 닫고 교체)
    pub async fn put(&self, key: &str, client: Arc<McpClient>, transport: TransportKind) {
        let entry = Arc::new(PooledConnection::new(client, transport));

        let replaced = self.entries.write().await.insert(key.to_string(), entry);

        if let Some(old) = replaced {
            debug!("Replacing pooled connection for key '{}'", key);
            if let Err(e) = old.client.close().await {
                warn!("Error closing replaced connection: {}", e);
            }
        }
    }

    /// 연결 제거
    pub async fn remove(&self, key: &str) -> Option<Arc<PooledConnection>> {
        self.entries.write().await.remove(key)
    }

    /// 유휴 연결 스윕 (TTL 초과 엔트리를 닫고 제거)
    ///
    /// 닫기 실패는 삼킵니다 - 소유자가 이미 닫은 연결일 수 있음
    pub async fn sweep(&self, ttl: Duration) -> usize {
        let mut expired = Vec::new();

        {
            let entries = self.entries.read().await;
            for (key, entry) in entries.iter() {
                if entry.idle().await > ttl {
                    expired.push(key.clone());
                }
            }
        }

        let mut evicted = 0;
        for key in expired {
            if let Some(entry) = self.entries.write().await.remove(&key) {
                info!("Evicting idle MCP connection: {}", key);
                if let Err(e) = entry.client.close().await {
                    debug!("Ignoring close error during sweep: {}", e);
                }
                evicted += 1;
            }
        }

        evicted
    }

    /// 모든 연결 종료
    pub async fn close_all(&self) {
        let mut entries = self.entries.write().await;
        for (key, entry) in entries.drain() {
            if let Err(e) = entry.client.close().await {
                warn!("Error closing connection '{}': {}", key, e);
            }
        }
        info!("All pooled MCP connections closed");
    }

    /// 풀 상태 (진단용)
    pub async fn statuses(&self) -> Vec<PoolStatus> {
        let entries = self.entries.read().await;
        let mut statuses = Vec::with_capacity(entries.len());

        for (key, entry) in entries.iter() {
            statuses.push(PoolStatus {
                key: key.clone(),
                transport: entry.transport,
                idle: entry.idle().await,
                connected: entry.client.is_connected(),
            });
        }

        statuses
    }

    /// 엔트리 수
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

/// 주기적 스윕 태스크 시작
///
/// 반환된 핸들을 abort하면 스윕이 멈춥니다.
pub fn spawn_sweeper(pool: Arc<ConnectionPool>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            let evicted = pool.sweep(IDLE_TTL).await;
            if evicted > 0 {
                debug!("Pool sweep evicted {} idle connections", evicted);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_key_header_canonicalization() {
        let mut a = HashMap::new();
        a.insert("Authorization".to_string(), "Bearer x".to_string());
        a.insert("X-Team".to_string(), "blue".to_string());

        let mut b = HashMap::new();
        b.insert("x-team".to_string(), "blue".to_string());
        b.insert("AUTHORIZATION".to_string(), "Bearer x".to_string());

        assert_eq!(
            pool_key("https://example.com/mcp", &a),
            pool_key("https://example.com/mcp", &b)
        );
    }

    #[test]
    fn test_pool_key_differs_on_value() {
        let mut a = HashMap::new();
        a.insert("authorization".to_string(), "Bearer x".to_string());

        let mut b = HashMap::new();
        b.insert("authorization".to_string(), "Bearer y".to_string());

        assert_ne!(
            pool_key("https://example.com/mcp", &a),
            pool_key("https://example.com/mcp", &b)
        );
    }

    #[tokio::test]
    async fn test_pool_miss() {
        let pool = ConnectionPool::new();
        assert!(pool.get("nope").await.is_none());
        assert!(pool.is_empty().await);
    }
}

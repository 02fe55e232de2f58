//! Catalog Aggregator - 서버별 도구/프롬프트 통합
//!
//! N개 서버에 동시에 연결해 (부분 실패 허용) 도구/프롬프트 목록을
//! server key로 묶인 단일 카탈로그로 합칩니다. 연결 실패한 서버는
//! 카탈로그에서 빠질 뿐 전체 집계를 실패시키지 않습니다.

use crate::mcp::{
    connect_with_fallback, effective_headers, pool_key, ConnectionPool, McpClient,
    PromptDefinition, ServerConfig, ToolDefinition, TransportKind,
};
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use tether_foundation::{ProgressRegistry, Result};
use tracing::{debug, info, warn};

/// 한 서버의 카탈로그 항목
pub struct ServerCatalog {
    /// 서버 설정 (세션 동안 불변)
    pub config: ServerConfig,

    /// 연결에 사용된 전송
    pub transport: TransportKind,

    /// 연결된 클라이언트
    pub client: Arc<McpClient>,

    /// 도구들 (이름 -> 정의, 서버 내 중복 불가)
    pub tools: BTreeMap<String, ToolDefinition>,

    /// 프롬프트 템플릿들
    pub prompts: Vec<PromptDefinition>,
}

/// server key로 묶인 통합 카탈로그
///
/// 조회는 항상 (server_key, tool_name) 쌍으로 하므로 서버 간
/// 도구 이름 충돌은 발생하지 않습니다.
pub type AggregatedCatalog = BTreeMap<String, ServerCatalog>;

/// 소문자 영숫자만 남기기
fn sanitize(input: &str) -> String {
    input
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        .collect()
}

/// 식별자로 쓸 수 있게 보정 (숫자로 시작하면 접두사 부여)
fn identifier_safe(key: String) -> String {
    match key.chars().next() {
        Some(c) if c.is_ascii_digit() => format!("mcp{}", key),
        _ => key,
    }
}

/// ServerConfig에서 server key 유도
///
/// 우선순위: 명시된 이름 → URL 마지막 경로 세그먼트 → 첫 서브도메인
/// 레이블 (호스트 레이블이 3개 이상일 때) → 전체 호스트명 → "mcp".
/// 결정적이며, 같은 설정은 항상 같은 키를 만듭니다.
pub fn extract_server_key(config: &ServerConfig) -> String {
    // 1. 명시된 서버 이름
    if let Some(name) = &config.name {
        let key = sanitize(name);
        if !key.is_empty() {
            return identifier_safe(key);
        }
    }

    if let Ok(parsed) = url::Url::parse(&config.url) {
        // 2. 마지막 비어있지 않은 경로 세그먼트
        if let Some(segments) = parsed.path_segments() {
            if let Some(last) = segments.filter(|s| !s.is_empty()).last() {
                let key = sanitize(last);
                if !key.is_empty() {
                    return identifier_safe(key);
                }
            }
        }

        if let Some(host) = parsed.host_str() {
            let labels: Vec<&str> = host.split('.').collect();

            // 3. 레이블이 3개 이상이면 첫 서브도메인 레이블
            if labels.len() > 2 {
                let key = sanitize(labels[0]);
                if !key.is_empty() {
                    return identifier_safe(key);
                }
            }

            // 4. 전체 호스트명
            let key = sanitize(host);
            if !key.is_empty() {
                return identifier_safe(key);
            }
        }
    }

    // 5. 최후의 폴백
    "mcp".to_string()
}

/// 풀을 거쳐 서버에 연결 (캐시 미스면 새로 연결 후 등록)
async fn connect_pooled(
    config: &ServerConfig,
    pool: &ConnectionPool,
    progress: Option<Arc<ProgressRegistry>>,
) -> Result<(Arc<McpClient>, TransportKind)> {
    let key = pool_key(&config.url, &effective_headers(config));

    if let Some(entry) = pool.get(&key).await {
        if entry.client.is_connected() {
            debug!("Reusing pooled connection for {}", config.url);
            return Ok((Arc::clone(&entry.client), entry.transport));
        }
        // 죽은 연결은 버리고 새로 연결
        pool.remove(&key).await;
    }

    let (client, transport) = connect_with_fallback(config, progress).await?;
    pool.put(&key, Arc::clone(&client), transport).await;
    Ok((client, transport))
}

/// 한 서버의 카탈로그 수집
async fn collect_server(
    config: ServerConfig,
    pool: &ConnectionPool,
    progress: Option<Arc<ProgressRegistry>>,
) -> Option<(String, ServerCatalog)> {
    let server_key = extract_server_key(&config);

    let (client, transport) = match connect_pooled(&config, pool, progress).await {
        Ok(c) => c,
        Err(e) => {
            warn!("Skipping server '{}': {}", config.url, e);
            return None;
        }
    };

    // 도구 목록은 필수 - 실패하면 서버 제외
    let tools = match client.list_tools().await {
        Ok(tools) => tools,
        Err(e) => {
            warn!("Skipping server '{}': tools/list failed: {}", config.url, e);
            return None;
        }
    };

    // 프롬프트는 선택 - 미지원이면 빈 목록
    let prompts = match client.list_prompts().await {
        Ok(prompts) => prompts,
        Err(e) => {
            debug!("Server '{}' has no prompts: {}", config.url, e);
            Vec::new()
        }
    };

    let tools: BTreeMap<String, ToolDefinition> =
        tools.into_iter().map(|t| (t.name.clone(), t)).collect();

    info!(
        "Server '{}' ({}) contributed {} tools, {} prompts",
        server_key,
        transport,
        tools.len(),
        prompts.len()
    );

    Some((
        server_key,
        ServerCatalog {
            config,
            transport,
            client,
            tools,
            prompts,
        },
    ))
}

/// 모든 서버에 동시 연결 후 카탈로그 집계
///
/// server key 충돌은 마지막 등록이 이기며, 교체될 때 warn 로그만 남깁니다.
pub async fn aggregate(
    configs: Vec<ServerConfig>,
    pool: &ConnectionPool,
    progress: Option<Arc<ProgressRegistry>>,
) -> AggregatedCatalog {
    let futures = configs
        .into_iter()
        .map(|config| collect_server(config, pool, progress.clone()));

    let results = join_all(futures).await;

    let mut catalog = AggregatedCatalog::new();
    for (key, entry) in results.into_iter().flatten() {
        if catalog.contains_key(&key) {
            warn!(
                "Server key '{}' collision - previous entry will be replaced",
                key
            );
        }
        catalog.insert(key, entry);
    }

    catalog
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::TransportKind;

    fn config(url: &str) -> ServerConfig {
        ServerConfig::new(url)
    }

    #[test]
    fn test_key_from_name() {
        let c = config("https://example.com/mcp").with_name("My Alpha-Server");
        assert_eq!(extract_server_key(&c), "myalphaserver");
    }

    #[test]
    fn test_key_from_path_segment() {
        let c = config("https://example.com/tools/github");
        assert_eq!(extract_server_key(&c), "github");
    }

    #[test]
    fn test_key_ignores_trailing_slash() {
        let c = config("https://example.com/tools/github/");
        assert_eq!(extract_server_key(&c), "github");
    }

    #[test]
    fn test_key_from_subdomain() {
        let c = config("https://notion.mcp.example.com/");
        assert_eq!(extract_server_key(&c), "notion");
    }

    #[test]
    fn test_key_from_hostname() {
        let c = config("https://example.com/");
        assert_eq!(extract_server_key(&c), "examplecom");
    }

    #[test]
    fn test_key_fallback() {
        let c = config("not a url");
        assert_eq!(extract_server_key(&c), "mcp");
    }

    #[test]
    fn test_key_leading_digit_prefixed() {
        let c = config("https://example.com/x").with_name("1password");
        assert_eq!(extract_server_key(&c), "mcp1password");
    }

    #[test]
    fn test_key_deterministic() {
        let c = config("https://data.example.com/servers/sqlite").with_name("SQLite DB");
        let first = extract_server_key(&c);
        for _ in 0..10 {
            assert_eq!(extract_server_key(&c), first);
        }
    }

    #[tokio::test]
    async fn test_aggregate_unreachable_servers_yield_empty_catalog() {
        let pool = ConnectionPool::new();
        let configs = vec![
            config("http://127.0.0.1:1/mcp").with_transport_hint(TransportKind::StreamableHttp),
            config("http://127.0.0.1:2/mcp").with_transport_hint(TransportKind::StreamableHttp),
        ];

        let catalog = aggregate(configs, &pool, None).await;
        assert!(catalog.is_empty());
    }
}

//! 외부 경계 오퍼레이션 - 헬스체크와 프롬프트 해석
//!
//! 세션 없이 단발로 호출되는 오퍼레이션들입니다. 각자 전용 예산
//! 내에서 연결을 맺고, 끝나면 바로 닫습니다.

use crate::mcp::{connect_with_fallback, PromptMessage, ServerConfig, SimpleMessage, TransportKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tether_foundation::{Error, Result};
use tracing::debug;

/// 헬스체크 전체 예산 (연결 + 목록 조회 포함)
const HEALTH_CHECK_BUDGET: Duration = Duration::from_secs(8);

/// 프롬프트 해석 전체 예산
const PROMPT_BUDGET: Duration = Duration::from_secs(7);

/// 헬스체크 결과
///
/// 실패해도 Err가 아닌 ready=false 리포트를 돌려줍니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    /// 연결과 목록 조회가 모두 성공했는지
    pub ready: bool,

    /// 성공 시 사용된 전송
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transport: Option<TransportKind>,

    /// 노출된 도구 이름 목록
    pub tools: Vec<String>,

    /// 노출된 프롬프트 이름 목록
    pub prompts: Vec<String>,

    /// 실패 사유
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HealthReport {
    fn unhealthy(error: impl Into<String>) -> Self {
        Self {
            ready: false,
            transport: None,
            tools: Vec::new(),
            prompts: Vec::new(),
            error: Some(error.into()),
        }
    }
}

async fn probe(config: &ServerConfig) -> Result<HealthReport> {
    let (client, transport) = connect_with_fallback(config, None).await?;

    let tools = client.list_tools().await?;

    // 프롬프트 미지원 서버는 건강한 것으로 간주
    let prompts = client.list_prompts().await.unwrap_or_default();

    let _ = client.close().await;

    Ok(HealthReport {
        ready: true,
        transport: Some(transport),
        tools: tools.into_iter().map(|t| t.name).collect(),
        prompts: prompts.into_iter().map(|p| p.name).collect(),
        error: None,
    })
}

/// 서버 헬스체크
///
/// 전송 폴백 포함 연결, tools/list, prompts/list를 8초 예산 안에서
/// 수행합니다. 예산 초과나 연결 실패는 ready=false 리포트가 됩니다.
pub async fn health_check(config: &ServerConfig) -> HealthReport {
    match tokio::time::timeout(HEALTH_CHECK_BUDGET, probe(config)).await {
        Ok(Ok(report)) => report,
        Ok(Err(e)) => {
            debug!("Health check failed for '{}': {}", config.url, e);
            HealthReport::unhealthy(e.to_string())
        }
        Err(_) => HealthReport::unhealthy(format!(
            "Health check exceeded {}s budget",
            HEALTH_CHECK_BUDGET.as_secs()
        )),
    }
}

/// PromptMessage의 content를 평문으로 평탄화
///
/// 텍스트 블록, 블록 배열, 문자열을 모두 수용하고 그 외는 JSON
/// 문자열로 직렬화합니다.
fn flatten_content(content: &Value) -> String {
    match content {
        Value::String(text) => text.clone(),
        Value::Object(object) => {
            if let Some(text) = object.get("text").and_then(Value::as_str) {
                return text.to_string();
            }
            content.to_string()
        }
        Value::Array(items) => items
            .iter()
            .map(flatten_content)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n"),
        other => other.to_string(),
    }
}

fn simplify(messages: Vec<PromptMessage>) -> Vec<SimpleMessage> {
    messages
        .into_iter()
        .map(|m| SimpleMessage {
            role: m.role,
            text: flatten_content(&m.content),
        })
        .collect()
}

async fn fetch_prompt(
    config: &ServerConfig,
    prompt_name: &str,
    arguments: Option<Value>,
) -> Result<Vec<SimpleMessage>> {
    let (client, _) = connect_with_fallback(config, None).await?;

    let messages = client
        .get_prompt(prompt_name, arguments, PROMPT_BUDGET)
        .await;
    let _ = client.close().await;

    Ok(simplify(messages?))
}

/// 프롬프트 템플릿 해석
///
/// 7초 예산 안에서 연결하고 prompts/get을 호출해 {role, text} 목록으로
/// 평탄화합니다. 헬스체크와 달리 실패는 Err로 전파합니다 - 호출자가
/// 프롬프트 부재와 서버 장애를 구분해야 하기 때문입니다.
pub async fn resolve_prompt(
    config: &ServerConfig,
    prompt_name: &str,
    arguments: Option<Value>,
) -> Result<Vec<SimpleMessage>> {
    match tokio::time::timeout(PROMPT_BUDGET, fetch_prompt(config, prompt_name, arguments)).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout(format!(
            "Prompt '{}' resolution exceeded {}s budget",
            prompt_name,
            PROMPT_BUDGET.as_secs()
        ))),
    }
}

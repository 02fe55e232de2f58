//! MCP Types - MCP 관련 타입 정의

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// MCP 전송 방식 (원격 서버 전용)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    /// 지속 이벤트 스트림 (HTTP Server-Sent Events)
    Sse,
    /// 요청 단위 스트리밍 HTTP (POST per JSON-RPC request)
    StreamableHttp,
}

impl TransportKind {
    /// 폴백으로 시도할 나머지 전송
    pub fn fallback(&self) -> TransportKind {
        match self {
            Self::Sse => Self::StreamableHttp,
            Self::StreamableHttp => Self::Sse,
        }
    }
}

impl Default for TransportKind {
    fn default() -> Self {
        Self::StreamableHttp
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sse => write!(f, "sse"),
            Self::StreamableHttp => write!(f, "streamable-http"),
        }
    }
}

/// 원격 MCP 서버 설정
///
/// 세션 시작 시 한 번 제공되며 이후 불변입니다.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// 서버 이름 (server key 유도에 우선 사용)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// 서버 URL
    pub url: String,

    /// 선호 전송 방식 (실패 시 나머지로 폴백)
    #[serde(default)]
    pub transport_hint: TransportKind,

    /// 요청 헤더
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// 호출 단위 타임아웃 (밀리초, 없으면 기본값)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub per_call_timeout_ms: Option<u64>,
}

impl ServerConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            name: None,
            url: url.into(),
            transport_hint: TransportKind::default(),
            headers: HashMap::new(),
            per_call_timeout_ms: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_transport_hint(mut self, hint: TransportKind) -> Self {
        self.transport_hint = hint;
        self
    }
}

/// MCP 서버에서 제공하는 도구 정보
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// 도구 이름
    pub name: String,

    /// 도구 설명
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// 입력 스키마 (JSON Schema, 서버 소유 - 읽기 전용)
    #[serde(rename = "inputSchema", default)]
    pub input_schema: Value,
}

/// 프롬프트 템플릿 인자
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptArgument {
    /// 인자 이름
    pub name: String,

    /// 인자 설명
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// 필수 여부
    #[serde(default)]
    pub required: bool,
}

/// MCP 서버에서 제공하는 프롬프트 템플릿
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptDefinition {
    /// 프롬프트 이름
    pub name: String,

    /// 표시용 제목
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// 프롬프트 설명
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// 인자 목록
    #[serde(default)]
    pub arguments: Vec<PromptArgument>,
}

/// MCP 콘텐츠 블록
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolContent {
    /// 텍스트 콘텐츠
    Text { text: String },

    /// 이미지 콘텐츠
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },

    /// 리소스 참조
    Resource {
        uri: String,
        #[serde(rename = "mimeType", skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
    },
}

/// MCP 도구 실행 결과 (tools/call 응답)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallToolResult {
    /// 에러 여부
    #[serde(rename = "isError", default)]
    pub is_error: bool,

    /// 결과 콘텐츠
    #[serde(default)]
    pub content: Vec<ToolContent>,

    /// 구조화된 페이로드 (있으면 텍스트 휴리스틱보다 우선)
    #[serde(
        rename = "structuredContent",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub structured_content: Option<Value>,
}

impl CallToolResult {
    /// 성공 결과 생성
    pub fn success(text: impl Into<String>) -> Self {
        Self {
            is_error: false,
            content: vec![ToolContent::Text { text: text.into() }],
            structured_content: None,
        }
    }

    /// 오류 결과 생성
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            is_error: true,
            content: vec![ToolContent::Text { text: text.into() }],
            structured_content: None,
        }
    }

    /// 첫 텍스트 블록 추출
    pub fn text(&self) -> Option<&str> {
        for content in &self.content {
            if let ToolContent::Text { text } = content {
                return Some(text);
            }
        }
        None
    }
}

/// prompts/get 응답의 메시지
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptMessage {
    /// 역할 (user / assistant)
    pub role: String,

    /// 콘텐츠 (텍스트 블록 또는 중첩 객체)
    pub content: Value,
}

/// 호출자에게 돌려주는 단순화된 프롬프트 메시지
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimpleMessage {
    pub role: String,
    pub text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_tool_result_text() {
        let result = CallToolResult::success("Hello");
        assert!(!result.is_error);
        assert_eq!(result.text(), Some("Hello"));

        let error = CallToolResult::error("Failed");
        assert!(error.is_error);
    }

    #[test]
    fn test_tool_definition_deserialize() {
        let json = r#"{
            "name": "search",
            "description": "Search things",
            "inputSchema": {"type": "object", "properties": {"query": {"type": "string"}}}
        }"#;
        let tool: ToolDefinition = serde_json::from_str(json).unwrap();
        assert_eq!(tool.name, "search");
        assert!(tool.input_schema.get("properties").is_some());
    }

    #[test]
    fn test_call_tool_result_is_error_rename() {
        let json = r#"{"isError": true, "content": [{"type": "text", "text": "boom"}]}"#;
        let result: CallToolResult = serde_json::from_str(json).unwrap();
        assert!(result.is_error);
        assert_eq!(result.text(), Some("boom"));
    }

    #[test]
    fn test_transport_kind_fallback() {
        assert_eq!(TransportKind::Sse.fallback(), TransportKind::StreamableHttp);
        assert_eq!(TransportKind::StreamableHttp.fallback(), TransportKind::Sse);
    }
}

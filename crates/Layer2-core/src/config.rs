//! 서버 설정 로더
//!
//! TOML 파일의 [[servers]] 테이블을 ServerConfig 목록으로 읽습니다.
//! 파일이 없으면 빈 목록 (서버 없는 세션도 유효), 파싱 실패는 에러.

use crate::mcp::ServerConfig;
use serde::Deserialize;
use std::path::Path;
use tether_foundation::{Error, Result};
use tracing::{info, warn};

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    servers: Vec<ServerConfig>,
}

/// 설정 파일에서 서버 목록 읽기
///
/// 파일 부재는 soft-failure - warn 로그 후 빈 목록을 돌려줍니다.
/// 존재하는 파일의 문법/타입 오류는 조용히 무시하지 않고 에러로
/// 전파합니다.
pub fn load_servers(path: impl AsRef<Path>) -> Result<Vec<ServerConfig>> {
    let path = path.as_ref();

    if !path.exists() {
        warn!("Config file not found: {} (no servers)", path.display());
        return Ok(Vec::new());
    }

    let raw = std::fs::read_to_string(path)?;
    let parsed: ConfigFile = toml::from_str(&raw)
        .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;

    for server in &parsed.servers {
        if server.url.trim().is_empty() {
            return Err(Error::Config(format!(
                "{}: server entry with empty url",
                path.display()
            )));
        }
    }

    info!(
        "Loaded {} server(s) from {}",
        parsed.servers.len(),
        path.display()
    );

    Ok(parsed.servers)
}

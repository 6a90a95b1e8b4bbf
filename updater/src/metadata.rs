//! 업데이트 확인 응답 파싱
//!
//! 서버 응답 형식: `<softwareBuild>;<dataRevision>;<minBuild>`
//! 빈 필드는 건너뛰고, 앞의 세 필드만 사용합니다.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::UpdaterError;

/// 업데이트 확인 메타데이터
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateCheckMetadata {
    /// 서버의 최신 소프트웨어 빌드 번호
    pub software_build: u64,
    /// 서버의 최신 데이터베이스 리비전
    pub data_revision: u64,
    /// 새 데이터베이스를 열 수 있는 최소 빌드 번호
    pub min_build: u64,
}

impl UpdateCheckMetadata {
    /// 응답 본문을 파싱. 세 필드 모두 u64로 해석되어야 함
    pub fn parse(s: &str) -> Result<Self, UpdaterError> {
        let parts: Vec<&str> = s
            .split(';')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect();

        if parts.len() < 3 {
            return Err(UpdaterError::parse(
                "update metadata",
                format!("expected 3 fields, got {}", parts.len()),
            ));
        }

        let field = |idx: usize, name: &str| -> Result<u64, UpdaterError> {
            parts[idx].parse::<u64>().map_err(|e| {
                UpdaterError::parse("update metadata", format!("{} '{}': {}", name, parts[idx], e))
            })
        };

        Ok(Self {
            software_build: field(0, "software build")?,
            data_revision: field(1, "data revision")?,
            min_build: field(2, "min build")?,
        })
    }

    /// 바이트 응답을 그대로 파싱 (UTF-8이 아니면 실패)
    pub fn from_body(body: &[u8]) -> Result<Self, UpdaterError> {
        let text = std::str::from_utf8(body)
            .map_err(|e| UpdaterError::parse("update metadata", e.to_string()))?;
        Self::parse(text)
    }

    /// 현재 빌드보다 새로운 소프트웨어가 있는지
    pub fn is_software_newer_than(&self, current_build: u64) -> bool {
        self.software_build > current_build
    }

    /// 현재 빌드가 새 데이터 형식을 읽을 수 있는지
    pub fn supports_build(&self, current_build: u64) -> bool {
        self.min_build <= current_build
    }
}

impl fmt::Display for UpdateCheckMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{};{};{}", self.software_build, self.data_revision, self.min_build)
    }
}

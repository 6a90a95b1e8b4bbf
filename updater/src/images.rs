//! 이미지 매니페스트 파싱 및 로컬 파일 대조
//!
//! 네트워크/UI 의존성 없는 순수 집합 연산만 둡니다.
//!
//! 매니페스트 형식:
//! ```json
//! { "plant": [ { "name": "Rosa canina", "license html": "CC BY-SA", "database file name": "rosa.jpg" } ] }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::error::UpdaterError;

/// 매니페스트 내 이미지 한 건
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageMetadataEntry {
    #[serde(rename = "name", default)]
    pub display_name: String,
    /// 마크업을 포함할 수 있음
    #[serde(rename = "license html", default)]
    pub license_text: String,
    #[serde(rename = "database file name", default)]
    pub file_name: String,
}

/// 이미지 매니페스트 전체
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageManifest {
    #[serde(rename = "plant", default)]
    pub entries: Vec<ImageMetadataEntry>,
}

impl ImageManifest {
    pub fn parse(body: &[u8]) -> Result<Self, UpdaterError> {
        serde_json::from_slice(body)
            .map_err(|e| UpdaterError::parse("image manifest", e.to_string()))
    }

    /// 매니페스트에 나오는 파일명 집합 (빈 파일명 제외)
    pub fn file_names(&self) -> BTreeSet<String> {
        self.entries
            .iter()
            .filter(|e| !e.file_name.is_empty())
            .map(|e| e.file_name.clone())
            .collect()
    }
}

/// 다운로드할 파일 목록: 매니페스트 − 로컬. 매니페스트 순서 유지, 중복 제거
pub fn download_batch(manifest: &ImageManifest, local: &BTreeSet<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    manifest
        .entries
        .iter()
        .map(|e| e.file_name.as_str())
        .filter(|name| !name.is_empty() && !local.contains(*name))
        .filter(|name| seen.insert(*name))
        .map(str::to_string)
        .collect()
}

/// 동기화 후 삭제할 파일: 로컬 − 매니페스트
pub fn obsolete_files(manifest: &ImageManifest, local: &BTreeSet<String>) -> BTreeSet<String> {
    let wanted = manifest.file_names();
    local.difference(&wanted).cloned().collect()
}

/// 정리 대상 파일 메타데이터 ID
///
/// `file_records`: 데이터베이스의 파일 메타데이터 (id → 파일명)
/// `referenced`: 레코드에서 참조 중인 id
///
/// 어떤 레코드도 참조하지 않거나, 저장소에 파일이 없는 id를 반환합니다.
pub fn orphaned_metadata_ids(
    file_records: &BTreeMap<u64, String>,
    referenced: &BTreeSet<u64>,
    local: &BTreeSet<String>,
) -> BTreeSet<u64> {
    file_records
        .iter()
        .filter(|(id, name)| !referenced.contains(*id) || !local.contains(*name))
        .map(|(id, _)| *id)
        .collect()
}

/// 라이선스 표시용 행 (표시 이름, 라이선스, 파일명)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LicenseAttribution {
    pub display_name: String,
    pub license_text: String,
    pub file_name: String,
}

pub fn license_attributions(manifest: &ImageManifest) -> Vec<LicenseAttribution> {
    manifest
        .entries
        .iter()
        .map(|e| LicenseAttribution {
            display_name: e.display_name.clone(),
            license_text: e.license_text.clone(),
            file_name: e.file_name.clone(),
        })
        .collect()
}

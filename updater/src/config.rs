//! 업데이터 설정
//!
//! `config/passiflora.toml` 전체 또는 `config/global.toml`의 `[updater]` 섹션에서 읽습니다.
//! 파일 탐색/저장은 호출측(바이너리) 몫이고, 여기서는 값 해석만 합니다.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::UpdaterError;
use crate::machine::Endpoints;

const DEFAULT_BASE: &str = "http://passiflora.enmed.de/updates_raw";

/// 업데이터 설정
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateConfig {
    /// 시작 시 업데이트 확인 여부
    pub enabled: bool,
    /// 현재 소프트웨어 빌드 번호
    pub software_build: u64,
    pub update_url: String,
    pub database_url: String,
    pub image_meta_url: String,
    pub image_base_url: String,
    pub changelog_url: String,
    pub notice_url: String,
    /// 새 소프트웨어 다운로드 페이지
    pub download_url: String,
    /// 데이터 디렉터리 (기본값: 실행 파일 옆 `data/`)
    #[serde(default)]
    pub data_dir: Option<String>,
    pub database_file_name: String,
    pub request_timeout_secs: u64,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            software_build: 10,
            update_url: format!("{}/updates", DEFAULT_BASE),
            database_url: format!("{}/data.db", DEFAULT_BASE),
            image_meta_url: format!("{}/plantimagesmeta.json", DEFAULT_BASE),
            image_base_url: format!("{}/images/", DEFAULT_BASE),
            changelog_url: format!("{}/dbchangelog", DEFAULT_BASE),
            notice_url: format!("{}/dbnotice", DEFAULT_BASE),
            download_url: "http://passiflora.enmed.de/update/".to_string(),
            data_dir: None,
            database_file_name: "data.db".to_string(),
            request_timeout_secs: 30,
        }
    }
}

impl UpdateConfig {
    /// 모든 URL을 같은 서버 루트로 바꿈 (로컬 테스트 서버 등)
    pub fn with_base_url(mut self, base: &str) -> Self {
        let base = base.trim_end_matches('/');
        self.update_url = format!("{}/updates", base);
        self.database_url = format!("{}/data.db", base);
        self.image_meta_url = format!("{}/plantimagesmeta.json", base);
        self.image_base_url = format!("{}/images/", base);
        self.changelog_url = format!("{}/dbchangelog", base);
        self.notice_url = format!("{}/dbnotice", base);
        self
    }

    pub fn endpoints(&self) -> Endpoints {
        Endpoints {
            update_url: self.update_url.clone(),
            database_url: self.database_url.clone(),
            image_meta_url: self.image_meta_url.clone(),
            image_base_url: self.image_base_url.clone(),
            changelog_url: self.changelog_url.clone(),
            notice_url: self.notice_url.clone(),
            download_url: self.download_url.clone(),
        }
    }

    /// 데이터 디렉터리: 설정값 → 실행 파일 옆 `data/` → `./data`
    pub fn resolve_data_dir(&self) -> PathBuf {
        if let Some(dir) = &self.data_dir {
            return PathBuf::from(dir);
        }
        std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|d| d.join("data")))
            .filter(|p| p.exists())
            .unwrap_or_else(|| PathBuf::from("data"))
    }

    /// `config set <key> <value>` 처리
    pub fn set_value(&mut self, key: &str, value: &str) -> Result<(), UpdaterError> {
        let invalid = |expected: &str| UpdaterError::ConfigError {
            message: format!("'{}' expects {}, got '{}'", key, expected, value),
        };

        match key {
            "enabled" => self.enabled = value.parse().map_err(|_| invalid("true/false"))?,
            "software_build" => self.software_build = value.parse().map_err(|_| invalid("a build number"))?,
            "request_timeout_secs" => {
                self.request_timeout_secs = value.parse().map_err(|_| invalid("seconds"))?
            }
            "update_url" => self.update_url = value.to_string(),
            "database_url" => self.database_url = value.to_string(),
            "image_meta_url" => self.image_meta_url = value.to_string(),
            "image_base_url" => self.image_base_url = value.to_string(),
            "changelog_url" => self.changelog_url = value.to_string(),
            "notice_url" => self.notice_url = value.to_string(),
            "download_url" => self.download_url = value.to_string(),
            "database_file_name" => self.database_file_name = value.to_string(),
            "data_dir" => {
                self.data_dir = if value.is_empty() { None } else { Some(value.to_string()) }
            }
            _ => {
                return Err(UpdaterError::ConfigError {
                    message: format!("Unknown config key '{}'", key),
                })
            }
        }
        Ok(())
    }
}

/// TOML 값에서 설정 읽기. 없는 키는 기본값 유지
pub fn parse_update_config(val: &toml::Value) -> UpdateConfig {
    let mut cfg = UpdateConfig::default();
    if let Some(v) = val.get("enabled").and_then(|v| v.as_bool()) { cfg.enabled = v; }
    if let Some(v) = val.get("software_build").and_then(|v| v.as_integer()) { cfg.software_build = v.max(0) as u64; }
    if let Some(v) = val.get("update_url").and_then(|v| v.as_str()) { cfg.update_url = v.to_string(); }
    if let Some(v) = val.get("database_url").and_then(|v| v.as_str()) { cfg.database_url = v.to_string(); }
    if let Some(v) = val.get("image_meta_url").and_then(|v| v.as_str()) { cfg.image_meta_url = v.to_string(); }
    if let Some(v) = val.get("image_base_url").and_then(|v| v.as_str()) { cfg.image_base_url = v.to_string(); }
    if let Some(v) = val.get("changelog_url").and_then(|v| v.as_str()) { cfg.changelog_url = v.to_string(); }
    if let Some(v) = val.get("notice_url").and_then(|v| v.as_str()) { cfg.notice_url = v.to_string(); }
    if let Some(v) = val.get("download_url").and_then(|v| v.as_str()) { cfg.download_url = v.to_string(); }
    if let Some(v) = val.get("data_dir").and_then(|v| v.as_str()) { cfg.data_dir = Some(v.to_string()); }
    if let Some(v) = val.get("database_file_name").and_then(|v| v.as_str()) { cfg.database_file_name = v.to_string(); }
    if let Some(v) = val.get("request_timeout_secs").and_then(|v| v.as_integer()) {
        cfg.request_timeout_secs = v.max(1) as u64;
    }
    cfg
}

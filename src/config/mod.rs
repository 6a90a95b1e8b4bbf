//! 설정 파일 관리
//!
//! `config/passiflora.toml` 또는 `config/global.toml` [updater] 섹션에서 설정을 로드합니다.
//! `PASSIFLORA_CONFIG` 환경 변수가 있으면 그 파일을 우선 사용합니다.

use anyhow::Result;
use passiflora_updater::{parse_update_config, UpdateConfig};
use std::path::{Path, PathBuf};

const CONFIG_FILE: &str = "passiflora.toml";

/// 설정 파일 경로 결정
pub fn config_file_path() -> PathBuf {
    if let Ok(p) = std::env::var("PASSIFLORA_CONFIG") {
        return PathBuf::from(p);
    }

    // 1. 실행 파일 옆 config/passiflora.toml
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            let cfg = dir.join("config").join(CONFIG_FILE);
            if cfg.exists() {
                return cfg;
            }
        }
    }

    // 2. 기본: CWD의 config/passiflora.toml (생성용)
    PathBuf::from("config").join(CONFIG_FILE)
}

/// 설정 로드 (없으면 global.toml [updater] → 기본값)
pub fn load_config() -> Result<UpdateConfig> {
    let path = config_file_path();

    if !path.exists() {
        if let Some(gp) = find_global_toml() {
            if let Ok(content) = std::fs::read_to_string(&gp) {
                if let Ok(parsed) = content.parse::<toml::Value>() {
                    if let Some(updater) = parsed.get("updater") {
                        tracing::debug!("[Config] Loaded [updater] from {:?}", gp);
                        return Ok(parse_update_config(updater));
                    }
                }
            }
        }
        return Ok(UpdateConfig::default());
    }

    load_from_path(&path)
}

pub fn load_from_path(path: &Path) -> Result<UpdateConfig> {
    let content = std::fs::read_to_string(path)?;
    let parsed: toml::Value = content.parse()?;
    tracing::debug!("[Config] Loaded from {:?}", path);
    Ok(parse_update_config(&parsed))
}

/// config set <key> <value>
pub fn set_config_value(key: &str, value: &str) -> Result<UpdateConfig> {
    set_config_value_at(&config_file_path(), key, value)
}

/// 지정한 파일의 키 하나를 바꾸고 전체 설정을 다시 저장
pub fn set_config_value_at(path: &Path, key: &str, value: &str) -> Result<UpdateConfig> {
    let mut cfg = if path.exists() { load_from_path(path)? } else { UpdateConfig::default() };
    cfg.set_value(key, value)?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let content = toml::to_string_pretty(&cfg)
        .map_err(|e| anyhow::anyhow!("Serialize error: {}", e))?;
    std::fs::write(path, content)?;

    Ok(cfg)
}

fn find_global_toml() -> Option<PathBuf> {
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            let p = dir.join("config").join("global.toml");
            if p.exists() {
                return Some(p);
            }
        }
    }
    let p = PathBuf::from("config").join("global.toml");
    if p.exists() {
        return Some(p);
    }
    None
}

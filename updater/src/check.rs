//! 원샷 업데이트 확인 유틸리티
//!
//! 프로그램 시작 시 (설정에서 켜져 있으면) 또는 CLI `check` 명령에서
//! 한 번 호출됩니다. 주기적 재확인은 호출측 몫입니다.

use serde::{Deserialize, Serialize};

use crate::config::UpdateConfig;
use crate::coordinator::SyncCoordinator;
use crate::event::SyncEvent;
use crate::store::LocalStore;
use crate::transport::Transport;

/// 확인 결과 분류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckOutcome {
    NoUpdate,
    DataUpdate,
    SoftwareUpdate,
    /// 새 데이터가 있지만 현재 빌드가 너무 오래됨
    Withheld,
    Disabled,
    Error,
}

/// 원샷 확인 결과
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub outcome: CheckOutcome,
    pub current_build: u64,
    pub local_revision: u64,
    /// 서버 데이터 리비전 (데이터 업데이트일 때)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_revision: Option<u64>,
    /// 서버 소프트웨어 빌드 (소프트웨어 업데이트일 때)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub software_build: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub checked_at: String,
}

impl CheckResult {
    fn new(outcome: CheckOutcome, current_build: u64, local_revision: u64) -> Self {
        Self {
            outcome,
            current_build,
            local_revision,
            data_revision: None,
            software_build: None,
            download_url: None,
            error: None,
            checked_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn update_available(&self) -> bool {
        matches!(self.outcome, CheckOutcome::DataUpdate | CheckOutcome::SoftwareUpdate)
    }
}

/// 한 번 확인하고 결과를 반환합니다.
pub async fn check_once<T: Transport, S: LocalStore>(
    coordinator: &mut SyncCoordinator<T, S>,
    config: &UpdateConfig,
) -> CheckResult {
    let current_build = coordinator.current_build();
    let local_revision = coordinator.store().persisted_revision();

    if !config.enabled {
        let mut result = CheckResult::new(CheckOutcome::Disabled, current_build, local_revision);
        result.error = Some("Update check is disabled".into());
        return result;
    }

    tracing::info!("[Sync] Running one-shot update check (build {}, revision {})", current_build, local_revision);

    let event = match coordinator.check_for_updates().await {
        Ok(event) => event,
        Err(e) => {
            let mut result = CheckResult::new(CheckOutcome::Error, current_build, local_revision);
            result.error = Some(e.to_string());
            return result;
        }
    };

    let mut result = CheckResult::new(CheckOutcome::Error, current_build, local_revision);
    match event {
        SyncEvent::NoUpdate => result.outcome = CheckOutcome::NoUpdate,
        SyncEvent::DataUpdateAvailable { revision } => {
            result.outcome = CheckOutcome::DataUpdate;
            result.data_revision = Some(revision);
        }
        SyncEvent::SoftwareUpdateAvailable { build, download_url } => {
            result.outcome = CheckOutcome::SoftwareUpdate;
            result.software_build = Some(build);
            result.download_url = Some(download_url);
        }
        SyncEvent::UpdateWithheld { .. } => {
            result.outcome = CheckOutcome::Withheld;
            result.data_revision = coordinator.metadata().map(|m| m.data_revision);
        }
        SyncEvent::CheckFailed { reason } => result.error = Some(reason),
        other => result.error = Some(format!("Unexpected check result: {:?}", other)),
    }
    result
}

/// 확인 결과를 JSON 문자열로 직렬화 (`check --json` 출력용)
pub fn result_to_json(result: &CheckResult) -> String {
    serde_json::to_string(result).unwrap_or_else(|_| "{}".to_string())
}

/// 프로세스 종료 코드 결정
///
/// - `0`: 업데이트 있음
/// - `1`: 확인 실패
/// - `2`: 할 일 없음 (업데이트 없음, 보류, 비활성)
pub fn exit_code(result: &CheckResult) -> i32 {
    match result.outcome {
        CheckOutcome::Error => 1,
        CheckOutcome::DataUpdate | CheckOutcome::SoftwareUpdate => 0,
        CheckOutcome::NoUpdate | CheckOutcome::Withheld | CheckOutcome::Disabled => 2,
    }
}

//! 대화형 동기화 세션: 메타데이터부터 공지까지 전체 파이프라인
//!
//! 순서:
//! 1. 중단 플래그 설정 (끝까지 가지 못하면 다음 확인에서 재동기화)
//! 2. 메타데이터 → 최소 빌드 확인
//! 3. 데이터베이스 → 이미지 매니페스트 → 대조 → 이미지 배치
//! 4. 변경 내역 → 공지
//! 5. 플래그 해제 + 불필요한 이미지 삭제

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::coordinator::SyncCoordinator;
use crate::error::UpdaterError;
use crate::event::SyncEvent;
use crate::images::LicenseAttribution;
use crate::machine::MachineError;
use crate::store::LocalStore;
use crate::transport::Transport;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("data revision needs build {min_build} or newer (current build {current_build})")]
    SoftwareOutdated { min_build: u64, current_build: u64 },
    #[error("sync stopped: {0:?}")]
    Failed(SyncEvent),
    #[error(transparent)]
    Busy(#[from] MachineError),
    #[error(transparent)]
    Store(#[from] UpdaterError),
}

impl SessionError {
    /// 사용자 표시용 메시지
    pub fn user_message(&self) -> String {
        match self {
            SessionError::SoftwareOutdated { .. } => {
                "새 데이터를 사용하려면 프로그램을 먼저 업데이트해야 합니다.".to_string()
            }
            SessionError::Failed(SyncEvent::Cancelled) => "동기화가 취소되었습니다.".to_string(),
            SessionError::Failed(event) => format!("동기화에 실패했습니다: {:?}", event),
            SessionError::Busy(_) => "이미 동기화가 진행 중입니다.".to_string(),
            SessionError::Store(e) => e.user_message(),
        }
    }
}

/// 성공한 세션 요약
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionReport {
    /// 저장된 데이터 리비전 (메타데이터가 없었으면 None)
    pub data_revision: Option<u64>,
    pub images_downloaded: usize,
    pub obsolete_removed: Vec<String>,
    pub changelog_html: String,
    pub notices_html: String,
    pub attributions: Vec<LicenseAttribution>,
}

pub struct SyncSession;

impl SyncSession {
    pub async fn run<T: Transport, S: LocalStore>(
        coordinator: &mut SyncCoordinator<T, S>,
    ) -> Result<SessionReport, SessionError> {
        tracing::info!("[Sync] Starting sync session");
        coordinator.mark_sync_started()?;
        let mut report = SessionReport::default();

        let metadata = match coordinator.request_latest_metadata().await? {
            SyncEvent::MetadataReady { metadata } => metadata,
            other => return Err(SessionError::Failed(other)),
        };
        if !metadata.supports_build(coordinator.current_build()) {
            tracing::warn!(
                "[Sync] Revision {} needs build {}, stopping session",
                metadata.data_revision,
                metadata.min_build
            );
            return Err(SessionError::SoftwareOutdated {
                min_build: metadata.min_build,
                current_build: coordinator.current_build(),
            });
        }

        report.data_revision = match coordinator.request_database_file().await? {
            SyncEvent::DatabaseUpdated { revision } => revision,
            other => return Err(SessionError::Failed(other)),
        };

        match coordinator.request_image_manifest().await? {
            SyncEvent::ManifestReady => {}
            other => return Err(SessionError::Failed(other)),
        }

        let reconciliation = coordinator.reconcile_images()?;
        report.images_downloaded = reconciliation.batch.len();
        report.attributions = reconciliation.attributions;

        match coordinator.request_image_files(reconciliation.batch).await? {
            SyncEvent::AllImagesDownloaded => {}
            other => return Err(SessionError::Failed(other)),
        }

        report.changelog_html = match coordinator.request_changelog().await? {
            SyncEvent::ChangelogReady { html } => html,
            other => return Err(SessionError::Failed(other)),
        };

        report.notices_html = match coordinator.request_event_notices().await? {
            SyncEvent::NoticesReady { html } => html,
            other => return Err(SessionError::Failed(other)),
        };

        let cleanup = coordinator.finish_sync()?;
        report.obsolete_removed = cleanup.removed;

        tracing::info!(
            "[Sync] Session complete (revision {:?}, {} images)",
            report.data_revision,
            report.images_downloaded
        );
        Ok(report)
    }
}

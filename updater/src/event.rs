//! 호출측(GUI/CLI)에 전달되는 동기화 이벤트

use serde::{Deserialize, Serialize};

use crate::metadata::UpdateCheckMetadata;

/// 동기화 단계 태그: 응답이 어느 요청에 속하는지 식별
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOperation {
    None,
    CheckForUpdate,
    FetchMetadataOnly,
    FetchDatabaseFile,
    FetchImageFile,
    FetchChangelog,
    FetchImageMetadata,
    FetchEventNotices,
}

impl SyncOperation {
    pub fn label(&self) -> &'static str {
        match self {
            SyncOperation::None => "none",
            SyncOperation::CheckForUpdate => "update check",
            SyncOperation::FetchMetadataOnly => "update metadata",
            SyncOperation::FetchDatabaseFile => "database file",
            SyncOperation::FetchImageFile => "image file",
            SyncOperation::FetchChangelog => "changelog",
            SyncOperation::FetchImageMetadata => "image manifest",
            SyncOperation::FetchEventNotices => "event notices",
        }
    }
}

/// 동기화 이벤트 (broadcast로 구독 가능)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SyncEvent {
    /// 새 소프트웨어/데이터 없음
    NoUpdate,
    /// 새 데이터베이스 리비전 사용 가능 (또는 지난 동기화가 중단됨)
    DataUpdateAvailable { revision: u64 },
    /// 새 소프트웨어 빌드 사용 가능
    SoftwareUpdateAvailable { build: u64, download_url: String },
    /// 새 데이터가 있지만 현재 빌드로는 읽을 수 없음: 사용자에게 알리지 않아도 됨
    UpdateWithheld { min_build: u64, current_build: u64 },
    /// 업데이트 확인 실패 (전송/파싱)
    CheckFailed { reason: String },
    /// 메타데이터만 요청한 경우의 결과
    MetadataReady { metadata: UpdateCheckMetadata },
    /// 데이터베이스 교체 성공 (메타데이터가 없었으면 revision은 None)
    DatabaseUpdated { revision: Option<u64> },
    DatabaseUpdateFailed { reason: String },
    ManifestReady,
    ManifestFailed { reason: String },
    ImageDownloadStarted { file_name: String },
    ImageWriteFailed { file_name: String, reason: String },
    AllImagesDownloaded,
    ChangelogReady { html: String },
    NoticesReady { html: String },
    /// 기타 요청의 전송 실패
    RequestFailed { op: SyncOperation, reason: String },
    /// 파일별 다운로드 진행률 (percent가 None이면 indeterminate)
    DownloadProgress {
        op: SyncOperation,
        received: u64,
        total: Option<u64>,
        percent: Option<u8>,
    },
    /// 전체 단계 수 (이미지 배치 크기)
    TotalSteps { max: usize },
    StepCompleted { done: usize, max: usize },
    Cancelled,
}

impl SyncEvent {
    /// 작업 하나를 끝내는 이벤트인지 (진행 보고 이벤트가 아님)
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            SyncEvent::ImageDownloadStarted { .. }
                | SyncEvent::DownloadProgress { .. }
                | SyncEvent::TotalSteps { .. }
                | SyncEvent::StepCompleted { .. }
        )
    }

    /// 실패로 끝난 이벤트인지
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            SyncEvent::CheckFailed { .. }
                | SyncEvent::DatabaseUpdateFailed { .. }
                | SyncEvent::ManifestFailed { .. }
                | SyncEvent::ImageWriteFailed { .. }
                | SyncEvent::RequestFailed { .. }
                | SyncEvent::Cancelled
        )
    }
}

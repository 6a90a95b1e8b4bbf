//! # Passiflora 업데이터 라이브러리
//!
//! 업데이트 서버에서 소프트웨어/데이터 업데이트를 확인하고, 데이터베이스와
//! 식물 이미지를 로컬 저장소와 동기화합니다.
//!
//! ## 동작 원리
//! - **업데이트 확인**: `<softwareBuild>;<dataRevision>;<minBuild>` 응답을 현재 빌드/로컬 리비전과 비교
//! - **동기화 세션**: 메타데이터 → 데이터베이스 → 이미지 매니페스트 → 이미지 → 변경 내역 → 공지
//! - **이벤트**: 모든 진행 상황과 결과를 broadcast로 전달, GUI/CLI는 구독만 함
//!
//! ## 아키텍처
//! - **상태 머신(machine.rs)**: 요청/응답 라우팅, I/O 없는 순수 전이
//! - **코디네이터(coordinator.rs)**: Effect 실행, 작업 큐, 취소
//! - **전송(transport.rs)**: reqwest 기반 HTTP GET + 진행률
//! - **저장소(store.rs)**: 백업 후 교체, 동기화 플래그, 이미지 디렉터리
//! - **이미지(images.rs)**: 매니페스트 파싱과 집합 대조
//! - **에러(error.rs)**: 네트워크 끊김, 타임아웃 등 장애 분류
//!
//! ## 업데이트 서버 구조
//! ```text
//! updates_raw/updates               "10;5;3"
//! updates_raw/data.db               데이터베이스 파일
//! updates_raw/plantimagesmeta.json  { "plant": [ { "name", "license html", "database file name" } ] }
//! updates_raw/images/<file>         이미지 파일
//! updates_raw/dbchangelog           HTML
//! updates_raw/dbnotice              HTML
//! ```

// ══════════════════════════════════════════════════════
// 모듈
// ══════════════════════════════════════════════════════

pub mod check;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod event;
pub mod images;
pub mod machine;
pub mod metadata;
pub mod progress;
pub mod session;
pub mod store;
pub mod transport;

#[cfg(test)]
mod tests;

// Re-exports for convenience
pub use check::{check_once, CheckOutcome, CheckResult};
pub use config::{parse_update_config, UpdateConfig};
pub use coordinator::{CleanupReport, Reconciliation, SyncCoordinator, SyncStatus};
pub use error::{ErrorContext, RecoveryStrategy, UpdaterError};
pub use event::{SyncEvent, SyncOperation};
pub use images::{ImageManifest, ImageMetadataEntry, LicenseAttribution};
pub use machine::{Effect, Endpoints, Input, MachineError, Request, Snapshot, SyncMachine};
pub use metadata::UpdateCheckMetadata;
pub use progress::{download_percent, StepProgress};
pub use session::{SessionError, SessionReport, SyncSession};
pub use store::{replace_with_backup, FsLocalStore, LocalStore, PersistedSyncState, ReplaceFailure};
pub use transport::{HttpTransport, ProgressFn, Transport};

/// 실제 HTTP 전송과 파일 저장소를 쓰는 코디네이터
pub type HttpSyncCoordinator = SyncCoordinator<HttpTransport, FsLocalStore>;

/// 설정에서 코디네이터 생성 (데이터 디렉터리 열기 + HTTP 클라이언트)
pub fn open_coordinator(config: &UpdateConfig) -> Result<HttpSyncCoordinator, UpdaterError> {
    let transport = HttpTransport::new(config.request_timeout_secs)?;
    let store = FsLocalStore::open(config.resolve_data_dir(), &config.database_file_name)?;
    Ok(SyncCoordinator::new(transport, store, config.endpoints(), config.software_build))
}

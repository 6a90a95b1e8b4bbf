//! 업데이터 통합 테스트
//!
//! ## 테스트 시나리오
//! 1. 업데이트 확인: 리비전 비교, 중단 플래그, 빌드 보류
//! 2. 데이터베이스 교체 실패 시 원본 보존
//! 3. 전체 세션: 이미지 대조, 정리, 플래그 해제
//! 4. 중단/취소: 플래그 유지, 진행 중 요청 취소
//!
//! 네트워크 대신 스크립트된 `MockTransport`, 디스크는 `tempfile`을 사용합니다.

use crate::{
    check, replace_with_backup, CheckOutcome, Endpoints, FsLocalStore, LocalStore, ProgressFn,
    SessionError, SyncCoordinator, SyncEvent, SyncOperation, SyncSession, Transport, UpdateConfig,
    UpdaterError,
};
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;

const BASE: &str = "http://mock";

// ═══════════════════════════════════════════════════════
// 테스트 도구
// ═══════════════════════════════════════════════════════

#[derive(Clone)]
enum MockResponse {
    Body(Vec<u8>),
    Fail(UpdaterError),
    /// 응답이 오지 않음 (취소 테스트용)
    Hang,
}

/// URL별로 응답을 정해두는 전송 계층
#[derive(Default)]
struct MockTransport {
    routes: HashMap<String, MockResponse>,
    requested: Mutex<Vec<String>>,
}

impl MockTransport {
    fn new() -> Self {
        Self::default()
    }

    fn route(mut self, path: &str, body: &[u8]) -> Self {
        self.routes.insert(format!("{}{}", BASE, path), MockResponse::Body(body.to_vec()));
        self
    }

    fn fail(mut self, path: &str, error: UpdaterError) -> Self {
        self.routes.insert(format!("{}{}", BASE, path), MockResponse::Fail(error));
        self
    }

    fn hang(mut self, path: &str) -> Self {
        self.routes.insert(format!("{}{}", BASE, path), MockResponse::Hang);
        self
    }

    /// 업데이트 서버 전체 (manifest: a, b, c)
    fn full_server(metadata: &str) -> Self {
        Self::new()
            .route("/updates", metadata.as_bytes())
            .route("/data.db", b"NEW DATABASE")
            .route("/plantimagesmeta.json", manifest_json(&["a.jpg", "b.jpg", "c.jpg"]).as_bytes())
            .route("/images/a.jpg", b"image a")
            .route("/images/b.jpg", b"image b")
            .route("/images/c.jpg", b"image c")
            .route("/dbchangelog", b"<p>changes</p>")
            .route("/dbnotice", b"<p>notice</p>")
    }

    fn requested(&self) -> Vec<String> {
        self.requested.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl Transport for MockTransport {
    fn get<'a>(
        &'a self,
        url: &'a str,
        on_progress: ProgressFn<'a>,
    ) -> impl Future<Output = Result<Vec<u8>, UpdaterError>> + Send + 'a {
        async move {
            if let Ok(mut log) = self.requested.lock() {
                log.push(url.to_string());
            }
            match self.routes.get(url).cloned() {
                Some(MockResponse::Body(body)) => {
                    let total = body.len() as u64;
                    on_progress(total / 2, Some(total));
                    on_progress(total, Some(total));
                    Ok(body)
                }
                Some(MockResponse::Fail(e)) => Err(e),
                Some(MockResponse::Hang) => std::future::pending().await,
                None => Err(UpdaterError::ApiError {
                    status_code: 404,
                    message: format!("GET {} returned 404 Not Found", url),
                }),
            }
        }
    }
}

/// 저장소 작업별로 주입할 실패
#[derive(Clone, PartialEq)]
enum Fault {
    /// 데이터베이스를 절반만 쓰고 실패
    WriteDatabase,
    BackupCopy,
    RemoveBackup,
    WriteManifest,
    RemoveFile(&'static str),
}

/// 지정한 작업만 실패하는 저장소
struct FaultyStore {
    inner: FsLocalStore,
    faults: Vec<Fault>,
}

impl FaultyStore {
    fn new(inner: FsLocalStore, faults: &[Fault]) -> Self {
        Self { inner, faults: faults.to_vec() }
    }

    fn has(&self, fault: &Fault) -> bool {
        self.faults.contains(fault)
    }
}

fn injected(operation: &str, path: &Path, message: &str) -> UpdaterError {
    UpdaterError::FileSystemError {
        operation: operation.into(),
        path: path.display().to_string(),
        message: message.into(),
    }
}

impl LocalStore for FaultyStore {
    fn current_path(&self) -> PathBuf {
        self.inner.current_path()
    }
    fn close_handle(&mut self) {
        self.inner.close_handle()
    }
    fn reopen_handle(&mut self) -> Result<(), UpdaterError> {
        self.inner.reopen_handle()
    }
    fn copy(&self, src: &Path, dst: &Path) -> Result<(), UpdaterError> {
        if self.has(&Fault::BackupCopy) && dst == self.backup_path().as_path() {
            return Err(injected("copy", src, "Permission denied"));
        }
        self.inner.copy(src, dst)
    }
    fn remove(&self, path: &Path) -> Result<(), UpdaterError> {
        if self.has(&Fault::RemoveBackup) && path == self.backup_path().as_path() {
            return Err(injected("remove", path, "Device or resource busy"));
        }
        let denied = self.faults.iter().any(|f| {
            matches!(f, Fault::RemoveFile(name) if path.file_name().map_or(false, |n| n == *name))
        });
        if denied {
            return Err(injected("remove", path, "Permission denied"));
        }
        self.inner.remove(path)
    }
    fn write(&self, path: &Path, bytes: &[u8]) -> Result<(), UpdaterError> {
        if self.has(&Fault::WriteDatabase) && path == self.current_path().as_path() {
            // 일부만 쓰고 실패한 상황
            let _ = std::fs::write(path, &bytes[..bytes.len() / 2]);
            return Err(injected("write", path, "No space left on device"));
        }
        if self.has(&Fault::WriteManifest) && path == self.manifest_path().as_path() {
            return Err(injected("write", path, "Read-only file system"));
        }
        self.inner.write(path, bytes)
    }
    fn read(&self, path: &Path) -> Result<Vec<u8>, UpdaterError> {
        self.inner.read(path)
    }
    fn persisted_revision(&self) -> u64 {
        self.inner.persisted_revision()
    }
    fn set_persisted_revision(&mut self, revision: u64) -> Result<(), UpdaterError> {
        self.inner.set_persisted_revision(revision)
    }
    fn last_sync_aborted(&self) -> bool {
        self.inner.last_sync_aborted()
    }
    fn set_last_sync_aborted(&mut self, aborted: bool) -> Result<(), UpdaterError> {
        self.inner.set_last_sync_aborted(aborted)
    }
    fn files_dir(&self) -> PathBuf {
        self.inner.files_dir()
    }
    fn manifest_path(&self) -> PathBuf {
        self.inner.manifest_path()
    }
    fn local_file_inventory(&self) -> Result<BTreeSet<String>, UpdaterError> {
        self.inner.local_file_inventory()
    }
}

fn manifest_json(files: &[&str]) -> String {
    let entries: Vec<serde_json::Value> = files
        .iter()
        .map(|f| {
            serde_json::json!({
                "name": format!("Plant {}", f),
                "license html": "<a href=\"https://creativecommons.org\">CC BY-SA</a>",
                "database file name": f,
            })
        })
        .collect();
    serde_json::json!({ "plant": entries }).to_string()
}

fn test_config() -> UpdateConfig {
    UpdateConfig::default().with_base_url(BASE)
}

fn endpoints() -> Endpoints {
    test_config().endpoints()
}

/// 기존 데이터베이스와 리비전을 가진 저장소
fn open_store(tmp: &TempDir, revision: u64, aborted: bool) -> FsLocalStore {
    std::fs::write(tmp.path().join("data.db"), b"ORIGINAL DATABASE").unwrap();
    let mut store = FsLocalStore::open(tmp.path(), "data.db").unwrap();
    store.set_persisted_revision(revision).unwrap();
    store.set_last_sync_aborted(aborted).unwrap();
    store
}

fn drain(rx: &mut broadcast::Receiver<SyncEvent>) -> Vec<SyncEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

// ═══════════════════════════════════════════════════════
// 테스트 1: 업데이트 확인
// ═══════════════════════════════════════════════════════

#[tokio::test]
async fn test_same_revision_is_no_update_unless_aborted() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp, 5, false);
    let mut coord = SyncCoordinator::new(MockTransport::full_server("10;5;3"), store, endpoints(), 10);

    assert_eq!(coord.check_for_updates().await.unwrap(), SyncEvent::NoUpdate);

    coord.store_mut().set_last_sync_aborted(true).unwrap();
    assert_eq!(
        coord.check_for_updates().await.unwrap(),
        SyncEvent::DataUpdateAvailable { revision: 5 }
    );
}

#[tokio::test]
async fn test_build_too_old_is_withheld() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp, 5, false);
    let mut coord = SyncCoordinator::new(MockTransport::full_server("10;6;11"), store, endpoints(), 10);

    let event = coord.check_for_updates().await.unwrap();
    assert_ne!(event, SyncEvent::NoUpdate);
    assert!(!matches!(event, SyncEvent::DataUpdateAvailable { .. }));

    let result = check::check_once(&mut coord, &test_config()).await;
    assert_eq!(result.outcome, CheckOutcome::Withheld);
    assert_eq!(check::exit_code(&result), 2);
}

#[tokio::test]
async fn test_check_once_reports_software_update_and_errors() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp, 5, false);
    let mut coord = SyncCoordinator::new(MockTransport::full_server("12;5;3"), store, endpoints(), 10);

    let result = check::check_once(&mut coord, &test_config()).await;
    assert_eq!(result.outcome, CheckOutcome::SoftwareUpdate);
    assert_eq!(result.software_build, Some(12));
    assert_eq!(result.download_url.as_deref(), Some("http://passiflora.enmed.de/update/"));
    assert_eq!(check::exit_code(&result), 0);

    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp, 5, false);
    let mut coord = SyncCoordinator::new(MockTransport::new().route("/updates", b"garbage"), store, endpoints(), 10);
    let result = check::check_once(&mut coord, &test_config()).await;
    assert_eq!(result.outcome, CheckOutcome::Error);
    assert!(result.error.is_some());
    assert_eq!(check::exit_code(&result), 1);
}

#[tokio::test]
async fn test_disabled_check_makes_no_request() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp, 5, false);
    let mut coord = SyncCoordinator::new(MockTransport::full_server("10;6;3"), store, endpoints(), 10);
    let mut config = test_config();
    config.enabled = false;

    let result = check::check_once(&mut coord, &config).await;
    assert_eq!(result.outcome, CheckOutcome::Disabled);
    assert!(coord.status().last_event.is_none());
}

// ═══════════════════════════════════════════════════════
// 테스트 2: 데이터베이스 교체
// ═══════════════════════════════════════════════════════

#[tokio::test]
async fn test_database_write_failure_keeps_original() {
    let tmp = TempDir::new().unwrap();
    let store = FaultyStore::new(open_store(&tmp, 5, false), &[Fault::WriteDatabase]);
    let mut coord = SyncCoordinator::new(MockTransport::full_server("10;6;3"), store, endpoints(), 10);
    let mut rx = coord.subscribe();

    let event = coord.request_database_file().await.unwrap();
    assert!(matches!(event, SyncEvent::DatabaseUpdateFailed { .. }));

    let content = std::fs::read(tmp.path().join("data.db")).unwrap();
    assert_eq!(content, b"ORIGINAL DATABASE");
    assert_eq!(coord.store().persisted_revision(), 5);

    let events = drain(&mut rx);
    assert!(!events.iter().any(|e| matches!(e, SyncEvent::DatabaseUpdated { .. })));
}

#[test]
fn test_replace_reports_restore_after_write_failure() {
    let tmp = TempDir::new().unwrap();
    let mut store = FaultyStore::new(open_store(&tmp, 1, false), &[Fault::WriteDatabase]);

    let failure = replace_with_backup(&mut store, b"NEW DATABASE").unwrap_err();
    assert!(failure.restored);
    assert!(failure.to_string().contains("Failed to write database file"));
    assert_eq!(std::fs::read(store.current_path()).unwrap(), b"ORIGINAL DATABASE");
}

#[test]
fn test_first_sync_write_failure_leaves_no_partial_database() {
    let tmp = TempDir::new().unwrap();
    let inner = FsLocalStore::open(tmp.path(), "data.db").unwrap();
    let mut store = FaultyStore::new(inner, &[Fault::WriteDatabase]);

    let failure = replace_with_backup(&mut store, b"NEW DATABASE").unwrap_err();
    assert!(!failure.restored);
    assert!(!store.current_path().exists());
    assert!(!store.backup_exists());
}

#[tokio::test]
async fn test_backup_copy_failure_skips_overwrite() {
    let tmp = TempDir::new().unwrap();
    let store = FaultyStore::new(open_store(&tmp, 5, false), &[Fault::BackupCopy]);
    let mut coord = SyncCoordinator::new(MockTransport::full_server("10;6;3"), store, endpoints(), 10);

    coord.request_latest_metadata().await.unwrap();
    let event = coord.request_database_file().await.unwrap();
    assert!(
        matches!(event, SyncEvent::DatabaseUpdateFailed { ref reason } if reason.contains("backup")),
        "{:?}",
        event
    );
    assert_eq!(std::fs::read(tmp.path().join("data.db")).unwrap(), b"ORIGINAL DATABASE");
    assert!(!coord.store().backup_exists());
    assert_eq!(coord.store().persisted_revision(), 5);
}

#[tokio::test]
async fn test_stale_backup_removal_failure_does_not_abort_replace() {
    let tmp = TempDir::new().unwrap();
    let inner = open_store(&tmp, 5, false);
    std::fs::write(inner.backup_path(), b"OLD BACKUP").unwrap();
    let store = FaultyStore::new(inner, &[Fault::RemoveBackup]);
    let mut coord = SyncCoordinator::new(MockTransport::full_server("10;6;3"), store, endpoints(), 10);

    coord.request_latest_metadata().await.unwrap();
    let event = coord.request_database_file().await.unwrap();
    assert_eq!(event, SyncEvent::DatabaseUpdated { revision: Some(6) });
    assert_eq!(std::fs::read(coord.store().current_path()).unwrap(), b"NEW DATABASE");
    assert_eq!(std::fs::read(coord.store().backup_path()).unwrap(), b"ORIGINAL DATABASE");
    assert_eq!(coord.store().persisted_revision(), 6);
}

#[tokio::test]
async fn test_manifest_write_failure_is_reported() {
    let tmp = TempDir::new().unwrap();
    let store = FaultyStore::new(open_store(&tmp, 5, false), &[Fault::WriteManifest]);
    let mut coord = SyncCoordinator::new(MockTransport::full_server("10;6;3"), store, endpoints(), 10);

    let event = coord.request_image_manifest().await.unwrap();
    assert!(matches!(event, SyncEvent::ManifestFailed { .. }), "{:?}", event);
    assert!(!coord.store().manifest_path().exists());
    assert_eq!(coord.status().in_flight, SyncOperation::None);
}

#[tokio::test]
async fn test_database_transport_failure_leaves_store_untouched() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp, 5, false);
    let transport = MockTransport::new().fail(
        "/data.db",
        UpdaterError::NetworkError { message: "connection reset".into(), recoverable: true },
    );
    let mut coord = SyncCoordinator::new(transport, store, endpoints(), 10);

    let event = coord.request_database_file().await.unwrap();
    assert!(matches!(event, SyncEvent::DatabaseUpdateFailed { .. }));
    assert!(!coord.store().backup_exists());
    assert_eq!(std::fs::read(tmp.path().join("data.db")).unwrap(), b"ORIGINAL DATABASE");
}

#[tokio::test]
async fn test_download_progress_is_broadcast() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp, 5, false);
    let mut coord = SyncCoordinator::new(MockTransport::full_server("10;6;3"), store, endpoints(), 10);
    let mut rx = coord.subscribe();

    coord.request_database_file().await.unwrap();

    let percents: Vec<Option<u8>> = drain(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            SyncEvent::DownloadProgress { op: SyncOperation::FetchDatabaseFile, percent, .. } => Some(percent),
            _ => None,
        })
        .collect();
    assert_eq!(percents, vec![Some(50), Some(100)]);
}

// ═══════════════════════════════════════════════════════
// 테스트 3: 전체 세션
// ═══════════════════════════════════════════════════════

#[tokio::test]
async fn test_full_session_syncs_and_cleans_up() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp, 5, false);
    std::fs::write(store.files_dir().join("b.jpg"), b"image b").unwrap();
    std::fs::write(store.files_dir().join("d.jpg"), b"obsolete").unwrap();

    let mut coord = SyncCoordinator::new(MockTransport::full_server("10;6;3"), store, endpoints(), 10);
    let mut rx = coord.subscribe();

    let report = SyncSession::run(&mut coord).await.unwrap();

    assert_eq!(report.data_revision, Some(6));
    assert_eq!(report.images_downloaded, 2);
    assert_eq!(report.obsolete_removed, vec!["d.jpg".to_string()]);
    assert_eq!(report.changelog_html, "<p>changes</p>");
    assert_eq!(report.notices_html, "<p>notice</p>");
    assert_eq!(report.attributions.len(), 3);

    let store = coord.store();
    assert_eq!(store.persisted_revision(), 6);
    assert!(!store.last_sync_aborted());
    assert_eq!(std::fs::read(store.current_path()).unwrap(), b"NEW DATABASE");
    assert_eq!(std::fs::read(store.backup_path()).unwrap(), b"ORIGINAL DATABASE");
    assert_eq!(
        store.local_file_inventory().unwrap(),
        BTreeSet::from(["a.jpg".to_string(), "b.jpg".to_string(), "c.jpg".to_string()])
    );

    // 이미 있던 b.jpg는 요청하지 않음
    let requested = coord_requested(&coord);
    assert!(requested.contains(&format!("{}/images/a.jpg", BASE)));
    assert!(!requested.contains(&format!("{}/images/b.jpg", BASE)));

    let events = drain(&mut rx);
    assert!(events.contains(&SyncEvent::TotalSteps { max: 2 }));
    assert!(events.contains(&SyncEvent::StepCompleted { done: 2, max: 2 }));
    assert!(events.contains(&SyncEvent::AllImagesDownloaded));
}

fn coord_requested<S: LocalStore>(coord: &SyncCoordinator<MockTransport, S>) -> Vec<String> {
    coord.transport().requested()
}

#[tokio::test]
async fn test_nothing_to_download_skips_image_requests() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp, 5, false);
    for f in ["a.jpg", "b.jpg", "c.jpg"] {
        std::fs::write(store.files_dir().join(f), b"x").unwrap();
    }
    let mut coord = SyncCoordinator::new(MockTransport::full_server("10;6;3"), store, endpoints(), 10);

    let report = SyncSession::run(&mut coord).await.unwrap();
    assert_eq!(report.images_downloaded, 0);
    assert!(!coord_requested(&coord).iter().any(|u| u.contains("/images/")));
}

#[tokio::test]
async fn test_cleanup_continues_past_failed_delete() {
    let tmp = TempDir::new().unwrap();
    let inner = open_store(&tmp, 6, true);
    std::fs::write(inner.manifest_path(), manifest_json(&["a.jpg"])).unwrap();
    for f in ["a.jpg", "b.jpg", "d.jpg"] {
        std::fs::write(inner.files_dir().join(f), b"x").unwrap();
    }
    let store = FaultyStore::new(inner, &[Fault::RemoveFile("b.jpg")]);
    let mut coord = SyncCoordinator::new(MockTransport::new(), store, endpoints(), 10);

    let report = coord.finish_sync().unwrap();
    assert_eq!(report.removed, vec!["d.jpg".to_string()]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "b.jpg");
    assert!(!coord.store().last_sync_aborted());
    assert_eq!(
        coord.store().local_file_inventory().unwrap(),
        BTreeSet::from(["a.jpg".to_string(), "b.jpg".to_string()])
    );
}

#[tokio::test]
async fn test_image_failure_stops_batch() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp, 5, false);
    let transport = MockTransport::new()
        .route("/images/a.jpg", b"a")
        .route("/images/e.jpg", b"e");
    let mut coord = SyncCoordinator::new(transport, store, endpoints(), 10);

    let event = coord
        .request_image_files(vec!["a.jpg".into(), "c.jpg".into(), "e.jpg".into()])
        .await
        .unwrap();
    assert!(matches!(event, SyncEvent::ImageWriteFailed { ref file_name, .. } if file_name == "c.jpg"));
    assert!(!coord_requested(&coord).contains(&format!("{}/images/e.jpg", BASE)));
    assert!(coord.store().files_dir().join("a.jpg").exists());
}

#[tokio::test]
async fn test_session_stops_when_build_too_old() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp, 5, false);
    let mut coord = SyncCoordinator::new(MockTransport::full_server("10;6;11"), store, endpoints(), 10);

    let err = SyncSession::run(&mut coord).await.unwrap_err();
    assert!(matches!(err, SessionError::SoftwareOutdated { min_build: 11, current_build: 10 }));
    assert!(!coord_requested(&coord).contains(&format!("{}/data.db", BASE)));
    assert_eq!(std::fs::read(tmp.path().join("data.db")).unwrap(), b"ORIGINAL DATABASE");
}

// ═══════════════════════════════════════════════════════
// 테스트 4: 중단/취소
// ═══════════════════════════════════════════════════════

#[tokio::test]
async fn test_interrupted_session_forces_next_check() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp, 5, false);
    // 공지 요청만 실패: 데이터베이스는 이미 교체됨
    let transport = MockTransport::full_server("10;6;3").fail(
        "/dbnotice",
        UpdaterError::Timeout { operation: "GET dbnotice".into(), duration_secs: 30 },
    );
    let mut coord = SyncCoordinator::new(transport, store, endpoints(), 10);

    let err = SyncSession::run(&mut coord).await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::Failed(SyncEvent::RequestFailed { op: SyncOperation::FetchEventNotices, .. })
    ));
    assert_eq!(coord.store().persisted_revision(), 6);
    assert!(coord.store().last_sync_aborted());

    // 서버 리비전은 그대로지만 중단 플래그 때문에 업데이트로 판정
    assert_eq!(
        coord.check_for_updates().await.unwrap(),
        SyncEvent::DataUpdateAvailable { revision: 6 }
    );
}

#[tokio::test]
async fn test_cancel_in_flight_request() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp, 5, false);
    let transport = MockTransport::full_server("10;6;3").hang("/data.db");
    let mut coord = SyncCoordinator::new(transport, store, endpoints(), 10);

    let token = coord.cancellation_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();
    });

    let event = coord.request_database_file().await.unwrap();
    assert_eq!(event, SyncEvent::Cancelled);
    assert_eq!(coord.status().in_flight, SyncOperation::None);
    assert_eq!(std::fs::read(tmp.path().join("data.db")).unwrap(), b"ORIGINAL DATABASE");

    // 취소된 토큰이 남아 있는 동안에는 시작하지 않음
    assert_eq!(coord.check_for_updates().await.unwrap(), SyncEvent::Cancelled);

    // 새 토큰으로 교체하면 다음 작업은 정상 동작
    coord.renew_cancellation_token();
    assert_eq!(
        coord.check_for_updates().await.unwrap(),
        SyncEvent::DataUpdateAvailable { revision: 6 }
    );
}

#[tokio::test]
async fn test_dropped_run_does_not_block_next_operation() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp, 5, false);
    let transport = MockTransport::full_server("10;6;3").hang("/data.db");
    let mut coord = SyncCoordinator::new(transport, store, endpoints(), 10);
    let mut rx = coord.subscribe();

    let timed_out = tokio::time::timeout(Duration::from_millis(20), coord.request_database_file()).await;
    assert!(timed_out.is_err());
    assert_eq!(coord.status().in_flight, SyncOperation::FetchDatabaseFile);

    assert_eq!(
        coord.check_for_updates().await.unwrap(),
        SyncEvent::DataUpdateAvailable { revision: 6 }
    );
    assert_eq!(std::fs::read(tmp.path().join("data.db")).unwrap(), b"ORIGINAL DATABASE");

    // 버려진 작업도 종료 이벤트 하나를 받음
    let events = drain(&mut rx);
    assert_eq!(events.iter().filter(|e| **e == SyncEvent::Cancelled).count(), 1);
}

#[tokio::test]
async fn test_cancel_between_runs_is_honoured() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp, 5, false);
    let mut coord = SyncCoordinator::new(MockTransport::full_server("10;6;3"), store, endpoints(), 10);

    let token = coord.cancellation_token();
    token.cancel();
    assert_eq!(coord.check_for_updates().await.unwrap(), SyncEvent::Cancelled);
    assert!(coord.transport().requested().is_empty());
    assert!(coord.cancellation_token().is_cancelled());

    let renewed = coord.renew_cancellation_token();
    assert_eq!(
        coord.check_for_updates().await.unwrap(),
        SyncEvent::DataUpdateAvailable { revision: 6 }
    );

    // 교체된 토큰이 코디네이터를 제어
    renewed.cancel();
    assert_eq!(coord.check_for_updates().await.unwrap(), SyncEvent::Cancelled);
}

#[tokio::test]
async fn test_coordinator_cancel_resets_abandoned_operation() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp, 5, false);
    let transport = MockTransport::full_server("10;6;3").hang("/plantimagesmeta.json");
    let mut coord = SyncCoordinator::new(transport, store, endpoints(), 10);

    let timed_out = tokio::time::timeout(Duration::from_millis(20), coord.request_image_manifest()).await;
    assert!(timed_out.is_err());

    coord.cancel();
    assert_eq!(coord.status().in_flight, SyncOperation::None);
    assert_eq!(coord.status().last_event, Some(SyncEvent::Cancelled));
    assert!(coord.cancellation_token().is_cancelled());
}

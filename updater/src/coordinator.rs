//! 동기화 코디네이터: 상태 머신의 Effect를 실제 전송/저장소 작업으로 실행
//!
//! ## 아키텍처
//! - `SyncCoordinator`: 호출측이 소유하는 인스턴스 (전역 없음)
//! - 작업 하나(`run`)는 `VecDeque` 작업 큐를 반복 처리: 이미지 큐 길이와 무관하게 스택 깊이 일정
//! - 모든 이벤트는 broadcast로 전달, `run`은 종료 이벤트 하나를 반환
//! - `CancellationToken`으로 진행 중인 요청 중단

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::error::{ErrorContext, UpdaterError};
use crate::event::{SyncEvent, SyncOperation};
use crate::images::{self, ImageManifest, LicenseAttribution};
use crate::machine::{Effect, Endpoints, Input, MachineError, Request, Snapshot, SyncMachine};
use crate::metadata::UpdateCheckMetadata;
use crate::progress::download_percent;
use crate::store::{replace_with_backup, LocalStore};
use crate::transport::Transport;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// 매니페스트와 로컬 파일 대조 결과
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reconciliation {
    /// 내려받을 파일 (매니페스트 순서)
    pub batch: Vec<String>,
    /// 동기화 후 지울 파일
    pub obsolete: BTreeSet<String>,
    pub attributions: Vec<LicenseAttribution>,
}

/// 동기화 종료 정리 결과
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub removed: Vec<String>,
    /// (파일명, 오류): 개별 삭제 실패는 정리를 멈추지 않음
    pub failed: Vec<(String, String)>,
}

/// 코디네이터 상태 (CLI status 등 표시용)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncStatus {
    pub in_flight: SyncOperation,
    pub current_build: u64,
    pub local_revision: u64,
    pub last_sync_aborted: bool,
    pub server_metadata: Option<UpdateCheckMetadata>,
    pub last_event: Option<SyncEvent>,
    pub last_event_at: Option<DateTime<Utc>>,
    pub last_error: Option<ErrorContext>,
}

pub struct SyncCoordinator<T: Transport, S: LocalStore> {
    machine: SyncMachine,
    transport: T,
    store: S,
    current_build: u64,
    event_tx: broadcast::Sender<SyncEvent>,
    cancel: CancellationToken,
    last_event: Option<(SyncEvent, DateTime<Utc>)>,
    /// 마지막 `run`에서 난 전송 오류 (호출측 재시도 판단용)
    last_error: Option<ErrorContext>,
}

impl<T: Transport, S: LocalStore> SyncCoordinator<T, S> {
    pub fn new(transport: T, store: S, endpoints: Endpoints, current_build: u64) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            machine: SyncMachine::new(endpoints),
            transport,
            store,
            current_build,
            event_tx,
            cancel: CancellationToken::new(),
            last_event: None,
            last_error: None,
        }
    }

    /// 이벤트 구독
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.event_tx.subscribe()
    }

    /// 현재 작업을 중단할 수 있는 토큰. 취소된 토큰은 `renew_cancellation_token` 전까지 유지됨
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// 새 세션용 토큰으로 교체하고 반환. 이전 토큰의 복제본은 더 이상 이 코디네이터를 제어하지 않음
    pub fn renew_cancellation_token(&mut self) -> CancellationToken {
        self.cancel = CancellationToken::new();
        self.cancel.clone()
    }

    /// 토큰을 취소하고 남아 있는 작업 상태를 정리
    pub fn cancel(&mut self) {
        self.cancel.cancel();
        self.abandon_in_flight();
    }

    /// 중간에 drop된 `run`이 남긴 상태를 유휴로 되돌림. 구독자에게는 `Cancelled`가 전달됨
    fn abandon_in_flight(&mut self) {
        let op = self.machine.in_flight();
        if op == SyncOperation::None {
            return;
        }
        tracing::warn!("[Sync] {} was abandoned before finishing, resetting", op.label());
        for effect in self.machine.cancel() {
            if let Effect::Emit(event) = effect {
                self.emit(event);
            }
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn current_build(&self) -> u64 {
        self.current_build
    }

    pub fn metadata(&self) -> Option<&UpdateCheckMetadata> {
        self.machine.metadata()
    }

    pub fn status(&self) -> SyncStatus {
        let snapshot = self.snapshot();
        SyncStatus {
            in_flight: self.machine.in_flight(),
            current_build: self.current_build,
            local_revision: snapshot.local_revision,
            last_sync_aborted: snapshot.last_sync_aborted,
            server_metadata: self.machine.metadata().copied(),
            last_event: self.last_event.as_ref().map(|(e, _)| e.clone()),
            last_event_at: self.last_event.as_ref().map(|(_, at)| *at),
            last_error: self.last_error.clone(),
        }
    }

    pub fn last_error(&self) -> Option<&ErrorContext> {
        self.last_error.as_ref()
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            current_build: self.current_build,
            local_revision: self.store.persisted_revision(),
            last_sync_aborted: self.store.last_sync_aborted(),
        }
    }

    pub async fn check_for_updates(&mut self) -> Result<SyncEvent, MachineError> {
        self.run(Request::CheckForUpdate).await
    }

    pub async fn request_latest_metadata(&mut self) -> Result<SyncEvent, MachineError> {
        self.run(Request::FetchMetadataOnly).await
    }

    pub async fn request_database_file(&mut self) -> Result<SyncEvent, MachineError> {
        self.run(Request::FetchDatabaseFile).await
    }

    pub async fn request_image_manifest(&mut self) -> Result<SyncEvent, MachineError> {
        self.run(Request::FetchImageMetadata).await
    }

    pub async fn request_image_files(&mut self, files: Vec<String>) -> Result<SyncEvent, MachineError> {
        self.run(Request::FetchImageFiles(files)).await
    }

    pub async fn request_changelog(&mut self) -> Result<SyncEvent, MachineError> {
        self.run(Request::FetchChangelog).await
    }

    pub async fn request_event_notices(&mut self) -> Result<SyncEvent, MachineError> {
        self.run(Request::FetchEventNotices).await
    }

    /// 작업 하나를 끝까지 실행하고 종료 이벤트를 반환
    pub async fn run(&mut self, request: Request) -> Result<SyncEvent, MachineError> {
        // `&mut self`를 쥔 동안 다른 run은 살아 있을 수 없음: 유휴가 아니면 이전 future가 drop된 것
        self.abandon_in_flight();
        self.last_error = None;

        let op = request.operation();
        if self.cancel.is_cancelled() {
            tracing::info!("[Sync] {} not started, cancellation already requested", op.label());
            self.emit(SyncEvent::Cancelled);
            return Ok(SyncEvent::Cancelled);
        }
        tracing::debug!("[Sync] Starting {}", op.label());
        let snapshot = self.snapshot();
        let mut work: VecDeque<Effect> = self.machine.begin(request, &snapshot)?.into();
        let mut terminal = None;

        while let Some(effect) = work.pop_front() {
            let input = match effect {
                Effect::Emit(event) => {
                    if event.is_terminal() {
                        terminal = Some(event.clone());
                    }
                    self.emit(event);
                    continue;
                }
                Effect::PersistRevision(revision) => {
                    match self.store.set_persisted_revision(revision) {
                        Ok(()) => tracing::info!("[Sync] Local data revision is now {}", revision),
                        Err(e) => tracing::error!("[Sync] Failed to persist revision {}: {}", revision, e),
                    }
                    continue;
                }
                Effect::Get { url, op } => match self.fetch(&url, op).await {
                    Some(result) => {
                        if let Err(e) = &result {
                            let context = ErrorContext::new(op.label(), e.clone()).with_file(&url);
                            context.log();
                            self.last_error = Some(context);
                        }
                        Input::Completed { url, result }
                    }
                    None => {
                        work.extend(self.machine.cancel());
                        continue;
                    }
                },
                Effect::ReplaceDatabase { bytes } => {
                    Input::DatabaseReplaced(replace_with_backup(&mut self.store, &bytes).map_err(|f| f.to_string()))
                }
                Effect::WriteManifest { bytes } => {
                    let path = self.store.manifest_path();
                    Input::ManifestWritten(self.store.write(&path, &bytes).map_err(|e| e.to_string()))
                }
                Effect::WriteImage { file_name, bytes } => {
                    let path = self.store.files_dir().join(&file_name);
                    let result = self.store.write(&path, &bytes).map_err(|e| e.to_string());
                    Input::ImageWritten { file_name, result }
                }
            };

            let snapshot = self.snapshot();
            work.extend(self.machine.step(input, &snapshot));
        }

        Ok(terminal.unwrap_or_else(|| {
            tracing::error!("[Sync] {} finished without a terminal event", op.label());
            SyncEvent::RequestFailed {
                op,
                reason: "operation finished without a result".to_string(),
            }
        }))
    }

    /// 요청 하나 실행. 취소되면 None
    async fn fetch(&self, url: &str, op: SyncOperation) -> Option<Result<Vec<u8>, UpdaterError>> {
        let event_tx = self.event_tx.clone();
        let on_progress = move |received: u64, total: Option<u64>| {
            let _ = event_tx.send(SyncEvent::DownloadProgress {
                op,
                received,
                total,
                percent: download_percent(received, total),
            });
        };

        let token = self.cancel.clone();
        tokio::select! {
            biased;
            _ = token.cancelled() => None,
            result = self.transport.get(url, &on_progress) => Some(result),
        }
    }

    fn emit(&mut self, event: SyncEvent) {
        if event.is_terminal() {
            tracing::info!("[Sync] {:?}", event);
            self.last_event = Some((event.clone(), Utc::now()));
        }
        // 구독자가 없으면 send가 실패하지만 무시
        let _ = self.event_tx.send(event);
    }

    /// 동기화 시작 표시: 끝까지 완료되지 않으면 다음 확인에서 데이터 업데이트로 잡힘
    pub fn mark_sync_started(&mut self) -> Result<(), UpdaterError> {
        self.store.set_last_sync_aborted(true)
    }

    /// 저장된 매니페스트와 로컬 파일 목록을 대조
    pub fn reconcile_images(&self) -> Result<Reconciliation, UpdaterError> {
        let manifest = self.load_manifest()?;
        let local = self.store.local_file_inventory()?;
        let reconciliation = Reconciliation {
            batch: images::download_batch(&manifest, &local),
            obsolete: images::obsolete_files(&manifest, &local),
            attributions: images::license_attributions(&manifest),
        };
        tracing::info!(
            "[Images] {} to download, {} obsolete, {} present",
            reconciliation.batch.len(),
            reconciliation.obsolete.len(),
            local.len()
        );
        Ok(reconciliation)
    }

    fn load_manifest(&self) -> Result<ImageManifest, UpdaterError> {
        let bytes = self.store.read(&self.store.manifest_path())?;
        ImageManifest::parse(&bytes)
    }

    /// 동기화 마무리: 중단 플래그 해제 후 매니페스트에 없는 파일 삭제 (best-effort)
    pub fn finish_sync(&mut self) -> Result<CleanupReport, UpdaterError> {
        self.store.set_last_sync_aborted(false)?;

        let mut report = CleanupReport::default();
        let manifest = match self.load_manifest() {
            Ok(manifest) => manifest,
            Err(e) => {
                tracing::warn!("[Images] No usable manifest, skipping cleanup: {}", e);
                return Ok(report);
            }
        };
        let local = self.store.local_file_inventory()?;
        let files_dir = self.store.files_dir();

        for name in images::obsolete_files(&manifest, &local) {
            match self.store.remove(&files_dir.join(&name)) {
                Ok(()) => report.removed.push(name),
                Err(e) => {
                    tracing::warn!("[Images] Failed to remove {}: {}", name, e);
                    report.failed.push((name, e.to_string()));
                }
            }
        }

        tracing::info!(
            "[Sync] Sync finished ({} obsolete removed, {} failed)",
            report.removed.len(),
            report.failed.len()
        );
        Ok(report)
    }
}

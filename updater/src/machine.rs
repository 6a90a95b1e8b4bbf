//! 동기화 상태 머신
//!
//! 네트워크/파일 I/O를 직접 하지 않는 순수 전이 함수입니다.
//! `begin`/`step`은 상태를 먼저 확정한 뒤 실행할 [`Effect`] 목록을 돌려주고,
//! 실제 요청·쓰기는 [`crate::coordinator::SyncCoordinator`]가 수행한 다음
//! 결과를 [`Input`]으로 다시 넣어줍니다.

use std::collections::VecDeque;
use thiserror::Error;

use crate::error::UpdaterError;
use crate::event::{SyncEvent, SyncOperation};
use crate::metadata::UpdateCheckMetadata;
use crate::progress::StepProgress;
use crate::transport::{file_name_from_url, join_url};

/// 요청 대상 URL 묶음
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub update_url: String,
    pub database_url: String,
    pub image_meta_url: String,
    /// 이미지 파일 베이스 URL (파일명이 뒤에 붙음)
    pub image_base_url: String,
    pub changelog_url: String,
    pub notice_url: String,
    /// 새 소프트웨어 다운로드 페이지
    pub download_url: String,
}

/// 호출측이 시작하는 작업
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    CheckForUpdate,
    FetchMetadataOnly,
    FetchDatabaseFile,
    FetchImageMetadata,
    /// 순서대로 내려받을 파일명 목록
    FetchImageFiles(Vec<String>),
    FetchChangelog,
    FetchEventNotices,
}

impl Request {
    pub fn operation(&self) -> SyncOperation {
        match self {
            Request::CheckForUpdate => SyncOperation::CheckForUpdate,
            Request::FetchMetadataOnly => SyncOperation::FetchMetadataOnly,
            Request::FetchDatabaseFile => SyncOperation::FetchDatabaseFile,
            Request::FetchImageMetadata => SyncOperation::FetchImageMetadata,
            Request::FetchImageFiles(_) => SyncOperation::FetchImageFile,
            Request::FetchChangelog => SyncOperation::FetchChangelog,
            Request::FetchEventNotices => SyncOperation::FetchEventNotices,
        }
    }
}

/// 전이 시점의 로컬 상태
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub current_build: u64,
    pub local_revision: u64,
    pub last_sync_aborted: bool,
}

/// 실행 결과 입력
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    /// 전송 완료 (본문 또는 오류)
    Completed {
        url: String,
        result: Result<Vec<u8>, UpdaterError>,
    },
    DatabaseReplaced(Result<(), String>),
    ManifestWritten(Result<(), String>),
    ImageWritten {
        file_name: String,
        result: Result<(), String>,
    },
}

/// 상태 확정 후 실행할 작업
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Get { url: String, op: SyncOperation },
    ReplaceDatabase { bytes: Vec<u8> },
    WriteManifest { bytes: Vec<u8> },
    WriteImage { file_name: String, bytes: Vec<u8> },
    PersistRevision(u64),
    Emit(SyncEvent),
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineError {
    #[error("sync operation already in flight: {}", .0.label())]
    Busy(SyncOperation),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    /// 전송 완료 대기
    Awaiting(SyncOperation),
    /// 받은 본문을 저장하는 중 (쓰기 결과 대기)
    Applying(SyncOperation),
}

pub struct SyncMachine {
    endpoints: Endpoints,
    state: State,
    /// 마지막으로 파싱에 성공한 메타데이터
    metadata: Option<UpdateCheckMetadata>,
    pending_images: VecDeque<String>,
    steps: StepProgress,
}

impl SyncMachine {
    pub fn new(endpoints: Endpoints) -> Self {
        Self {
            endpoints,
            state: State::Idle,
            metadata: None,
            pending_images: VecDeque::new(),
            steps: StepProgress::default(),
        }
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    pub fn is_idle(&self) -> bool {
        self.state == State::Idle
    }

    /// 진행 중인 작업 (없으면 `SyncOperation::None`)
    pub fn in_flight(&self) -> SyncOperation {
        match self.state {
            State::Idle => SyncOperation::None,
            State::Awaiting(op) | State::Applying(op) => op,
        }
    }

    pub fn metadata(&self) -> Option<&UpdateCheckMetadata> {
        self.metadata.as_ref()
    }

    pub fn pending_images(&self) -> &VecDeque<String> {
        &self.pending_images
    }

    pub fn steps(&self) -> StepProgress {
        self.steps
    }

    /// 새 작업 시작. 다른 작업이 진행 중이면 `Busy`
    pub fn begin(&mut self, request: Request, _snapshot: &Snapshot) -> Result<Vec<Effect>, MachineError> {
        if self.state != State::Idle {
            return Err(MachineError::Busy(self.in_flight()));
        }

        let effects = match request {
            Request::FetchImageFiles(files) => {
                self.pending_images = files.into();
                if self.pending_images.is_empty() {
                    vec![Effect::Emit(SyncEvent::AllImagesDownloaded)]
                } else {
                    let max = self.pending_images.len();
                    self.steps.set_max(max);
                    let mut effects = vec![Effect::Emit(SyncEvent::TotalSteps { max })];
                    effects.extend(self.issue_next_image());
                    effects
                }
            }
            Request::CheckForUpdate => self.issue(SyncOperation::CheckForUpdate, self.endpoints.update_url.clone()),
            Request::FetchMetadataOnly => {
                self.issue(SyncOperation::FetchMetadataOnly, self.endpoints.update_url.clone())
            }
            Request::FetchDatabaseFile => {
                self.issue(SyncOperation::FetchDatabaseFile, self.endpoints.database_url.clone())
            }
            Request::FetchImageMetadata => {
                self.issue(SyncOperation::FetchImageMetadata, self.endpoints.image_meta_url.clone())
            }
            Request::FetchChangelog => self.issue(SyncOperation::FetchChangelog, self.endpoints.changelog_url.clone()),
            Request::FetchEventNotices => {
                self.issue(SyncOperation::FetchEventNotices, self.endpoints.notice_url.clone())
            }
        };
        Ok(effects)
    }

    /// 입력 하나를 처리
    ///
    /// 기존 상태를 꺼내고 `Idle`로 되돌린 뒤 처리하므로, 핸들러가 다음 요청을
    /// 시작하면 그 요청이 새 상태가 됩니다. 현재 상태와 맞지 않는 입력은 무시합니다.
    pub fn step(&mut self, input: Input, snapshot: &Snapshot) -> Vec<Effect> {
        let state = std::mem::replace(&mut self.state, State::Idle);

        match (state, input) {
            (State::Awaiting(op), Input::Completed { url, result }) => self.on_completed(op, url, result, snapshot),
            (State::Applying(SyncOperation::FetchDatabaseFile), Input::DatabaseReplaced(result)) => {
                self.on_database_replaced(result)
            }
            (State::Applying(SyncOperation::FetchImageMetadata), Input::ManifestWritten(result)) => match result {
                Ok(()) => vec![Effect::Emit(SyncEvent::ManifestReady)],
                Err(reason) => vec![Effect::Emit(SyncEvent::ManifestFailed { reason })],
            },
            (State::Applying(SyncOperation::FetchImageFile), Input::ImageWritten { file_name, result }) => {
                self.on_image_written(file_name, result)
            }
            (state, input) => {
                tracing::warn!("[Sync] Ignoring input {} in state {:?}", input_label(&input), state);
                self.state = state;
                Vec::new()
            }
        }
    }

    /// 진행 중인 작업 취소. 유휴 상태면 아무 일도 없음
    pub fn cancel(&mut self) -> Vec<Effect> {
        if self.state == State::Idle {
            return Vec::new();
        }
        tracing::info!("[Sync] Cancelled {}", self.in_flight().label());
        self.state = State::Idle;
        self.pending_images.clear();
        vec![Effect::Emit(SyncEvent::Cancelled)]
    }

    fn issue(&mut self, op: SyncOperation, url: String) -> Vec<Effect> {
        self.state = State::Awaiting(op);
        vec![Effect::Get { url, op }]
    }

    fn issue_next_image(&mut self) -> Vec<Effect> {
        let Some(file_name) = self.pending_images.front().cloned() else {
            return vec![Effect::Emit(SyncEvent::AllImagesDownloaded)];
        };
        let url = join_url(&self.endpoints.image_base_url, &file_name);
        let mut effects = vec![Effect::Emit(SyncEvent::ImageDownloadStarted { file_name })];
        effects.extend(self.issue(SyncOperation::FetchImageFile, url));
        effects
    }

    fn on_completed(
        &mut self,
        op: SyncOperation,
        url: String,
        result: Result<Vec<u8>, UpdaterError>,
        snapshot: &Snapshot,
    ) -> Vec<Effect> {
        let body = match result {
            Ok(body) => body,
            Err(e) => return vec![Effect::Emit(self.transport_failure(op, &url, &e))],
        };

        match op {
            SyncOperation::CheckForUpdate => match self.parse_metadata(&body) {
                Ok(metadata) => vec![Effect::Emit(self.evaluate(metadata, snapshot))],
                Err(reason) => vec![Effect::Emit(SyncEvent::CheckFailed { reason })],
            },
            SyncOperation::FetchMetadataOnly => match self.parse_metadata(&body) {
                Ok(metadata) => vec![Effect::Emit(SyncEvent::MetadataReady { metadata })],
                Err(reason) => vec![Effect::Emit(SyncEvent::CheckFailed { reason })],
            },
            SyncOperation::FetchDatabaseFile => {
                self.state = State::Applying(op);
                vec![Effect::ReplaceDatabase { bytes: body }]
            }
            SyncOperation::FetchImageMetadata => {
                self.state = State::Applying(op);
                vec![Effect::WriteManifest { bytes: body }]
            }
            SyncOperation::FetchImageFile => {
                let file_name = file_name_from_url(&url)
                    .map(str::to_string)
                    .or_else(|| self.pending_images.front().cloned());
                match file_name {
                    Some(file_name) => {
                        self.state = State::Applying(op);
                        vec![Effect::WriteImage { file_name, bytes: body }]
                    }
                    None => {
                        self.pending_images.clear();
                        vec![Effect::Emit(SyncEvent::ImageWriteFailed {
                            file_name: String::new(),
                            reason: format!("No file name in URL {}", url),
                        })]
                    }
                }
            }
            SyncOperation::FetchChangelog => vec![Effect::Emit(SyncEvent::ChangelogReady {
                html: String::from_utf8_lossy(&body).into_owned(),
            })],
            SyncOperation::FetchEventNotices => vec![Effect::Emit(SyncEvent::NoticesReady {
                html: String::from_utf8_lossy(&body).into_owned(),
            })],
            SyncOperation::None => Vec::new(),
        }
    }

    fn parse_metadata(&mut self, body: &[u8]) -> Result<UpdateCheckMetadata, String> {
        match UpdateCheckMetadata::from_body(body) {
            Ok(metadata) => {
                tracing::debug!("[Sync] Server metadata {}", metadata);
                self.metadata = Some(metadata);
                Ok(metadata)
            }
            Err(e) => {
                tracing::warn!("[Sync] {}", e);
                Err(e.to_string())
            }
        }
    }

    /// 업데이트 확인 결과 판정
    fn evaluate(&self, metadata: UpdateCheckMetadata, snapshot: &Snapshot) -> SyncEvent {
        if metadata.is_software_newer_than(snapshot.current_build) {
            return SyncEvent::SoftwareUpdateAvailable {
                build: metadata.software_build,
                download_url: self.endpoints.download_url.clone(),
            };
        }

        let wants_data = metadata.data_revision > snapshot.local_revision || snapshot.last_sync_aborted;
        if !wants_data {
            return SyncEvent::NoUpdate;
        }

        if metadata.supports_build(snapshot.current_build) {
            SyncEvent::DataUpdateAvailable { revision: metadata.data_revision }
        } else {
            tracing::info!(
                "[Sync] Revision {} needs build {} (current {}), withholding",
                metadata.data_revision,
                metadata.min_build,
                snapshot.current_build
            );
            SyncEvent::UpdateWithheld {
                min_build: metadata.min_build,
                current_build: snapshot.current_build,
            }
        }
    }

    fn transport_failure(&mut self, op: SyncOperation, url: &str, error: &UpdaterError) -> SyncEvent {
        tracing::debug!("[Sync] {} failed: {}", op.label(), error);
        let reason = error.to_string();
        match op {
            SyncOperation::CheckForUpdate => SyncEvent::CheckFailed { reason },
            SyncOperation::FetchDatabaseFile => SyncEvent::DatabaseUpdateFailed { reason },
            SyncOperation::FetchImageMetadata => SyncEvent::ManifestFailed { reason },
            SyncOperation::FetchImageFile => {
                let file_name = file_name_from_url(url)
                    .map(str::to_string)
                    .or_else(|| self.pending_images.front().cloned())
                    .unwrap_or_default();
                self.pending_images.clear();
                SyncEvent::ImageWriteFailed { file_name, reason }
            }
            _ => SyncEvent::RequestFailed { op, reason },
        }
    }

    fn on_database_replaced(&mut self, result: Result<(), String>) -> Vec<Effect> {
        match result {
            Ok(()) => match self.metadata {
                Some(metadata) => vec![
                    Effect::PersistRevision(metadata.data_revision),
                    Effect::Emit(SyncEvent::DatabaseUpdated {
                        revision: Some(metadata.data_revision),
                    }),
                ],
                None => {
                    tracing::warn!("[Sync] Database replaced without metadata, revision not persisted");
                    vec![Effect::Emit(SyncEvent::DatabaseUpdated { revision: None })]
                }
            },
            Err(reason) => vec![Effect::Emit(SyncEvent::DatabaseUpdateFailed { reason })],
        }
    }

    fn on_image_written(&mut self, file_name: String, result: Result<(), String>) -> Vec<Effect> {
        if let Err(reason) = result {
            self.pending_images.clear();
            return vec![Effect::Emit(SyncEvent::ImageWriteFailed { file_name, reason })];
        }

        if let Some(pos) = self.pending_images.iter().position(|f| *f == file_name) {
            self.pending_images.remove(pos);
        } else {
            self.pending_images.pop_front();
        }
        self.steps.increment();

        let mut effects = vec![Effect::Emit(SyncEvent::StepCompleted {
            done: self.steps.done,
            max: self.steps.max_steps,
        })];
        if self.pending_images.is_empty() {
            effects.push(Effect::Emit(SyncEvent::AllImagesDownloaded));
        } else {
            effects.extend(self.issue_next_image());
        }
        effects
    }
}

fn input_label(input: &Input) -> &'static str {
    match input {
        Input::Completed { .. } => "completed",
        Input::DatabaseReplaced(_) => "database-replaced",
        Input::ManifestWritten(_) => "manifest-written",
        Input::ImageWritten { .. } => "image-written",
    }
}

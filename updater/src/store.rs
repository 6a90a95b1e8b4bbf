//! 로컬 저장소 어댑터: 데이터베이스 파일 백업/교체, 동기화 플래그, 로컬 파일 목록
//!
//! 모든 파일 작업은 전체 파일 복사/덮어쓰기입니다. 원자성은
//! "백업 후 덮어쓰기" 순서와 실패 시 복원 경로로만 보장합니다.
//!
//! ## 디렉터리 구조 (`data_dir` 기준)
//! - `data.db` / `data.db.backup`
//! - `files/`: 이미지 파일
//! - `plantimagesmeta.json`: 마지막으로 받은 이미지 매니페스트
//! - `sync-state.json`: 리비전/중단 플래그

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::UpdaterError;

pub const BACKUP_SUFFIX: &str = ".backup";
pub const FILES_DIR: &str = "files";
pub const MANIFEST_FILE: &str = "plantimagesmeta.json";
pub const STATE_FILE: &str = "sync-state.json";

/// 동기화 코어가 필요로 하는 로컬 저장소 계약
pub trait LocalStore {
    /// 데이터베이스 파일 경로
    fn current_path(&self) -> PathBuf;

    fn backup_path(&self) -> PathBuf {
        let mut p = self.current_path().into_os_string();
        p.push(BACKUP_SUFFIX);
        PathBuf::from(p)
    }

    /// 데이터베이스 핸들 닫기 (덮어쓰기 전)
    fn close_handle(&mut self);

    /// 데이터베이스 핸들 다시 열기
    fn reopen_handle(&mut self) -> Result<(), UpdaterError>;

    fn backup_exists(&self) -> bool {
        self.backup_path().exists()
    }

    fn copy(&self, src: &Path, dst: &Path) -> Result<(), UpdaterError>;

    fn remove(&self, path: &Path) -> Result<(), UpdaterError>;

    /// truncate-create 쓰기
    fn write(&self, path: &Path, bytes: &[u8]) -> Result<(), UpdaterError>;

    fn read(&self, path: &Path) -> Result<Vec<u8>, UpdaterError>;

    fn persisted_revision(&self) -> u64;

    fn set_persisted_revision(&mut self, revision: u64) -> Result<(), UpdaterError>;

    fn last_sync_aborted(&self) -> bool;

    fn set_last_sync_aborted(&mut self, aborted: bool) -> Result<(), UpdaterError>;

    /// 이미지 파일 디렉터리
    fn files_dir(&self) -> PathBuf;

    /// 이미지 매니페스트 저장 경로
    fn manifest_path(&self) -> PathBuf;

    /// `files_dir`에 있는 파일 이름 목록
    fn local_file_inventory(&self) -> Result<BTreeSet<String>, UpdaterError>;
}

/// 데이터베이스 교체 실패: 단계별 오류 메시지 모음
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplaceFailure {
    pub messages: Vec<String>,
    /// 백업에서 원본을 복원했는지
    pub restored: bool,
}

impl std::fmt::Display for ReplaceFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.messages.join(" "))
    }
}

/// 다운로드한 데이터베이스로 로컬 저장소를 교체
///
/// 1. 핸들 닫기
/// 2. 기존 백업 삭제 (실패는 기록만)
/// 3. 현재 파일 → 백업 복사
/// 4. 새 내용 덮어쓰기
/// 5. 3 또는 4가 실패하면 백업에서 복원
/// 6. 결과와 무관하게 핸들 다시 열기
///
/// 백업 복사에 실패하면 덮어쓰지 않습니다. 원본 파일이 아직 없으면 (첫 동기화) 백업 없이 씁니다.
pub fn replace_with_backup<S: LocalStore + ?Sized>(
    store: &mut S,
    bytes: &[u8],
) -> Result<(), ReplaceFailure> {
    let db_path = store.current_path();
    let backup_path = store.backup_path();
    let mut messages = Vec::new();
    let mut restored = false;

    store.close_handle();

    if store.backup_exists() {
        if let Err(e) = store.remove(&backup_path) {
            tracing::warn!("[Store] Failed to remove old backup: {}", e);
            messages.push(format!("Failed to remove database backup file: {}.", e));
        }
    }

    let had_original = db_path.exists();
    let backup_done = had_original
        && match store.copy(&db_path, &backup_path) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("[Store] Failed to create backup: {}", e);
                messages.push(format!("Failed to create database backup file: {}.", e));
                false
            }
        };

    let written = if backup_done || !had_original {
        match store.write(&db_path, bytes) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("[Store] Failed to write database file: {}", e);
                messages.push(format!("Failed to write database file: {}.", e));
                false
            }
        }
    } else {
        false
    };

    if !written && backup_done {
        tracing::warn!("[Store] Restoring database from backup");
        if let Err(e) = store.remove(&db_path) {
            tracing::warn!("[Store] Failed to remove partial database: {}", e);
        }
        match store.copy(&backup_path, &db_path) {
            Ok(()) => restored = true,
            Err(e) => {
                tracing::error!("[Store] Failed to restore backup: {}", e);
                messages.push(format!("Failed to restore database backup: {}.", e));
            }
        }
    } else if !written && !had_original && db_path.exists() {
        if let Err(e) = store.remove(&db_path) {
            tracing::warn!("[Store] Failed to remove partial database: {}", e);
        }
    }

    if let Err(e) = store.reopen_handle() {
        tracing::error!("[Store] Failed to reopen database: {}", e);
        messages.push(format!("Failed to reopen database: {}.", e));
    }

    if written {
        tracing::info!("[Store] Database replaced ({} bytes)", bytes.len());
        Ok(())
    } else {
        Err(ReplaceFailure { messages, restored })
    }
}

/// `sync-state.json`에 저장되는 동기화 상태
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedSyncState {
    pub data_revision: u64,
    pub last_sync_aborted: bool,
    /// 마지막으로 상태가 바뀐 시각 (RFC3339)
    #[serde(default)]
    pub updated_at: Option<String>,
}

/// 파일 시스템 기반 로컬 저장소
pub struct FsLocalStore {
    data_dir: PathBuf,
    db_file_name: String,
    handle: Option<File>,
    state: PersistedSyncState,
}

impl FsLocalStore {
    /// 데이터 디렉터리를 열고 저장된 동기화 상태를 불러옴
    pub fn open(data_dir: impl Into<PathBuf>, db_file_name: &str) -> Result<Self, UpdaterError> {
        let data_dir = data_dir.into();
        let files_dir = data_dir.join(FILES_DIR);
        std::fs::create_dir_all(&files_dir)
            .map_err(|e| UpdaterError::from_io(&e, "create_dir", &files_dir))?;

        let state = Self::load_state(&data_dir.join(STATE_FILE));
        let mut store = Self {
            data_dir,
            db_file_name: db_file_name.to_string(),
            handle: None,
            state,
        };
        store.reopen_handle()?;

        tracing::debug!(
            "[Store] Opened {:?} (revision {}, aborted {})",
            store.data_dir,
            store.state.data_revision,
            store.state.last_sync_aborted
        );
        Ok(store)
    }

    fn load_state(path: &Path) -> PersistedSyncState {
        match std::fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(state) => state,
                Err(e) => {
                    tracing::warn!("[Store] Corrupt {:?}, starting from defaults: {}", path, e);
                    PersistedSyncState::default()
                }
            },
            Err(_) => PersistedSyncState::default(),
        }
    }

    fn save_state(&mut self) -> Result<(), UpdaterError> {
        self.state.updated_at = Some(chrono::Utc::now().to_rfc3339());
        let path = self.data_dir.join(STATE_FILE);
        let json = serde_json::to_string_pretty(&self.state)
            .map_err(|e| UpdaterError::parse("sync state", e.to_string()))?;
        std::fs::write(&path, json).map_err(|e| UpdaterError::from_io(&e, "write", &path))
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn state(&self) -> &PersistedSyncState {
        &self.state
    }

    pub fn is_handle_open(&self) -> bool {
        self.handle.is_some()
    }
}

impl LocalStore for FsLocalStore {
    fn current_path(&self) -> PathBuf {
        self.data_dir.join(&self.db_file_name)
    }

    fn close_handle(&mut self) {
        if self.handle.take().is_some() {
            tracing::debug!("[Store] Database handle closed");
        }
    }

    fn reopen_handle(&mut self) -> Result<(), UpdaterError> {
        let path = self.current_path();
        if !path.exists() {
            // 아직 데이터베이스가 없음 (첫 동기화 전)
            self.handle = None;
            return Ok(());
        }
        let file = File::open(&path).map_err(|e| UpdaterError::from_io(&e, "open", &path))?;
        self.handle = Some(file);
        Ok(())
    }

    fn copy(&self, src: &Path, dst: &Path) -> Result<(), UpdaterError> {
        std::fs::copy(src, dst)
            .map(|_| ())
            .map_err(|e| UpdaterError::from_io(&e, "copy", src))
    }

    fn remove(&self, path: &Path) -> Result<(), UpdaterError> {
        std::fs::remove_file(path).map_err(|e| UpdaterError::from_io(&e, "remove", path))
    }

    fn write(&self, path: &Path, bytes: &[u8]) -> Result<(), UpdaterError> {
        let mut file = File::create(path).map_err(|e| UpdaterError::from_io(&e, "create", path))?;
        file.write_all(bytes)
            .and_then(|_| file.flush())
            .map_err(|e| UpdaterError::from_io(&e, "write", path))
    }

    fn read(&self, path: &Path) -> Result<Vec<u8>, UpdaterError> {
        std::fs::read(path).map_err(|e| UpdaterError::from_io(&e, "read", path))
    }

    fn persisted_revision(&self) -> u64 {
        self.state.data_revision
    }

    fn set_persisted_revision(&mut self, revision: u64) -> Result<(), UpdaterError> {
        self.state.data_revision = revision;
        self.save_state()
    }

    fn last_sync_aborted(&self) -> bool {
        self.state.last_sync_aborted
    }

    fn set_last_sync_aborted(&mut self, aborted: bool) -> Result<(), UpdaterError> {
        self.state.last_sync_aborted = aborted;
        self.save_state()
    }

    fn files_dir(&self) -> PathBuf {
        self.data_dir.join(FILES_DIR)
    }

    fn manifest_path(&self) -> PathBuf {
        self.data_dir.join(MANIFEST_FILE)
    }

    fn local_file_inventory(&self) -> Result<BTreeSet<String>, UpdaterError> {
        let dir = self.files_dir();
        if !dir.exists() {
            return Ok(BTreeSet::new());
        }

        let entries = std::fs::read_dir(&dir).map_err(|e| UpdaterError::from_io(&e, "read_dir", &dir))?;
        let mut names = BTreeSet::new();
        for entry in entries {
            let entry = entry.map_err(|e| UpdaterError::from_io(&e, "read_dir", &dir))?;
            let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
            if is_file {
                names.insert(entry.file_name().to_string_lossy().to_string());
            }
        }
        Ok(names)
    }
}

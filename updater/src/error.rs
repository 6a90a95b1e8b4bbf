//! 에러 처리 및 복구 로직
//!
//! ## 지원하는 에러 상황
//! - 네트워크 끊김 / 타임아웃 / HTTP 상태 오류
//! - 다운로드 중단 (Content-Length보다 짧은 본문)
//! - 파일 시스템 오류 (백업, 덮어쓰기, 삭제)
//! - 응답 파싱 오류 (업데이트 메타데이터, 이미지 매니페스트)
//!
//! 코어는 자동 재시도를 하지 않습니다. `RecoveryStrategy`는 호출측이
//! 전체 파이프라인을 다시 돌릴지 결정할 때 쓰는 헬퍼입니다.

use std::fmt;
use std::time::Duration;
use serde::{Deserialize, Serialize};

/// 업데이터 에러 타입
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "details")]
pub enum UpdaterError {
    /// 네트워크 연결 실패
    NetworkError {
        message: String,
        recoverable: bool,
    },
    /// HTTP 요청 타임아웃
    Timeout {
        operation: String,
        duration_secs: u64,
    },
    /// 서버 응답 오류 (2xx 이외)
    ApiError {
        status_code: u16,
        message: String,
    },
    /// 다운로드 중단됨
    DownloadInterrupted {
        url: String,
        downloaded_bytes: u64,
        total_bytes: u64,
    },
    /// 파일 시스템 오류
    FileSystemError {
        operation: String,
        path: String,
        message: String,
    },
    /// 응답 본문 파싱 실패
    ParseError {
        what: String,
        message: String,
    },
    /// 설정 오류
    ConfigError {
        message: String,
    },
}

impl fmt::Display for UpdaterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdaterError::NetworkError { message, .. } => {
                write!(f, "Network error: {}", message)
            }
            UpdaterError::Timeout { operation, duration_secs } => {
                write!(f, "Timeout after {}s: {}", duration_secs, operation)
            }
            UpdaterError::ApiError { status_code, message } => {
                write!(f, "HTTP error ({}): {}", status_code, message)
            }
            UpdaterError::DownloadInterrupted { url, downloaded_bytes, total_bytes } => {
                write!(
                    f,
                    "Download interrupted for {}: {}/{} bytes",
                    url, downloaded_bytes, total_bytes
                )
            }
            UpdaterError::FileSystemError { operation, path, message } => {
                write!(f, "File system error during {} on '{}': {}", operation, path, message)
            }
            UpdaterError::ParseError { what, message } => {
                write!(f, "Failed to parse {}: {}", what, message)
            }
            UpdaterError::ConfigError { message } => {
                write!(f, "Configuration error: {}", message)
            }
        }
    }
}

impl std::error::Error for UpdaterError {}

impl UpdaterError {
    /// 복구 가능한 에러인지 확인
    pub fn is_recoverable(&self) -> bool {
        match self {
            UpdaterError::NetworkError { recoverable, .. } => *recoverable,
            UpdaterError::Timeout { .. } => true,
            UpdaterError::ApiError { status_code, .. } => {
                // 5xx 에러는 재시도 가능, 4xx는 불가능
                *status_code >= 500
            }
            UpdaterError::DownloadInterrupted { .. } => true,
            UpdaterError::FileSystemError { .. } => false,
            UpdaterError::ParseError { .. } => false,
            UpdaterError::ConfigError { .. } => false,
        }
    }

    /// 권장 재시도 대기 시간
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let base_delay = match self {
            UpdaterError::NetworkError { .. } => Duration::from_secs(2),
            UpdaterError::Timeout { .. } => Duration::from_secs(5),
            UpdaterError::ApiError { status_code, .. } => {
                if *status_code == 429 {
                    Duration::from_secs(30)
                } else {
                    Duration::from_secs(3)
                }
            }
            _ => Duration::from_secs(1),
        };

        let multiplier = 2u64.saturating_pow(attempt);
        let delay_secs = base_delay.as_secs().saturating_mul(multiplier);
        Duration::from_secs(delay_secs.min(60))
    }

    /// 사용자에게 표시할 메시지
    pub fn user_message(&self) -> String {
        match self {
            UpdaterError::NetworkError { .. } => {
                "인터넷 연결을 확인해주세요.".to_string()
            }
            UpdaterError::Timeout { .. } => {
                "서버 응답이 지연되고 있습니다. 잠시 후 다시 시도해주세요.".to_string()
            }
            UpdaterError::ApiError { status_code, .. } => {
                if *status_code == 404 {
                    "요청한 업데이트 파일을 찾을 수 없습니다.".to_string()
                } else if *status_code >= 500 {
                    "서버에 일시적인 문제가 있습니다. 잠시 후 다시 시도해주세요.".to_string()
                } else {
                    format!("서버 오류 ({})", status_code)
                }
            }
            UpdaterError::DownloadInterrupted { .. } => {
                "다운로드가 중단되었습니다. 동기화를 다시 시작해주세요.".to_string()
            }
            UpdaterError::FileSystemError { .. } => {
                "파일 저장 중 오류가 발생했습니다. 디스크 공간과 권한을 확인해주세요.".to_string()
            }
            UpdaterError::ParseError { what, .. } => {
                format!("서버 응답을 해석할 수 없습니다 ({})", what)
            }
            UpdaterError::ConfigError { message } => {
                format!("설정 오류: {}", message)
            }
        }
    }

    /// reqwest 에러를 UpdaterError로 변환
    pub fn from_reqwest(err: &reqwest::Error, operation: &str, timeout_secs: u64) -> Self {
        if err.is_timeout() {
            UpdaterError::Timeout {
                operation: operation.to_string(),
                duration_secs: timeout_secs,
            }
        } else if err.is_connect() {
            UpdaterError::NetworkError {
                message: format!("연결 실패: {}", err),
                recoverable: true,
            }
        } else if let Some(status) = err.status() {
            UpdaterError::ApiError {
                status_code: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            UpdaterError::NetworkError {
                message: err.to_string(),
                recoverable: err.is_request() || err.is_body(),
            }
        }
    }

    /// IO 에러를 UpdaterError로 변환
    pub fn from_io(err: &std::io::Error, operation: &str, path: &std::path::Path) -> Self {
        UpdaterError::FileSystemError {
            operation: operation.to_string(),
            path: path.display().to_string(),
            message: err.to_string(),
        }
    }

    pub fn parse(what: &str, message: impl Into<String>) -> Self {
        UpdaterError::ParseError {
            what: what.to_string(),
            message: message.into(),
        }
    }
}

/// 에러 복구 전략 (호출측 재시도 정책)
#[derive(Debug, Clone)]
pub struct RecoveryStrategy {
    /// 최대 재시도 횟수
    pub max_retries: u32,
    /// 현재 시도 횟수
    pub current_attempt: u32,
    /// 재시도 간 기본 대기 시간
    pub base_delay: Duration,
    /// 지수 백오프 사용 여부
    pub use_backoff: bool,
}

impl Default for RecoveryStrategy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            current_attempt: 0,
            base_delay: Duration::from_secs(2),
            use_backoff: true,
        }
    }
}

impl RecoveryStrategy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    /// 다음 시도 전 대기 시간 계산
    pub fn next_delay(&self) -> Duration {
        if self.use_backoff {
            let multiplier = 2u64.saturating_pow(self.current_attempt);
            let delay_secs = self.base_delay.as_secs().saturating_mul(multiplier);
            Duration::from_secs(delay_secs.min(60)) // 최대 1분
        } else {
            self.base_delay
        }
    }

    /// 재시도 가능한지 확인
    pub fn can_retry(&self) -> bool {
        self.current_attempt < self.max_retries
    }

    /// 에러 종류까지 고려한 재시도 판단
    pub fn should_retry(&self, error: &UpdaterError) -> bool {
        self.can_retry() && error.is_recoverable()
    }

    pub fn increment(&mut self) {
        self.current_attempt += 1;
    }
}

/// 에러 컨텍스트 (디버깅/로깅용)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorContext {
    pub timestamp: String,
    pub operation: String,
    pub file: Option<String>,
    pub error: UpdaterError,
}

impl ErrorContext {
    pub fn new(operation: &str, error: UpdaterError) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            operation: operation.to_string(),
            file: None,
            error,
        }
    }

    pub fn with_file(mut self, file: &str) -> Self {
        self.file = Some(file.to_string());
        self
    }

    /// 로그 출력
    pub fn log(&self) {
        if self.error.is_recoverable() {
            tracing::warn!(
                "[Error] {} - {} (recoverable): {}",
                self.operation,
                self.file.as_deref().unwrap_or("N/A"),
                self.error
            );
        } else {
            tracing::error!(
                "[Error] {} - {} (fatal): {}",
                self.operation,
                self.file.as_deref().unwrap_or("N/A"),
                self.error
            );
        }
    }
}

//! HTTP 전송 계층
//!
//! 요청 하나당 `get` 호출 하나. 퓨처가 끝나는 시점이 유일한 완료 이벤트이고,
//! 진행률은 청크를 받을 때마다 콜백으로 보고합니다.

use futures_util::StreamExt;
use std::future::Future;
use std::time::Duration;

use crate::error::UpdaterError;

/// 진행률 콜백: (받은 바이트, 전체 바이트: 모르면 None)
pub type ProgressFn<'a> = &'a (dyn Fn(u64, Option<u64>) + Send + Sync);

/// 동기화 코어가 사용하는 전송 계층 추상화 (테스트에서 mock으로 교체)
pub trait Transport {
    /// GET 요청 후 본문 전체를 반환
    fn get<'a>(
        &'a self,
        url: &'a str,
        on_progress: ProgressFn<'a>,
    ) -> impl Future<Output = Result<Vec<u8>, UpdaterError>> + Send + 'a;
}

/// reqwest 기반 HTTP 전송
pub struct HttpTransport {
    http: reqwest::Client,
    timeout_secs: u64,
}

impl HttpTransport {
    pub fn new(timeout_secs: u64) -> Result<Self, UpdaterError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("passiflora-updater/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| UpdaterError::ConfigError {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self { http, timeout_secs })
    }

    async fn fetch(&self, url: &str, on_progress: ProgressFn<'_>) -> Result<Vec<u8>, UpdaterError> {
        tracing::debug!("[Transport] GET {}", url);

        let response = self.http
            .get(url)
            .send()
            .await
            .map_err(|e| UpdaterError::from_reqwest(&e, url, self.timeout_secs))?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpdaterError::ApiError {
                status_code: status.as_u16(),
                message: format!("GET {} returned {}", url, status),
            });
        }

        let total = response.content_length();
        let mut body = Vec::with_capacity(total.unwrap_or(0).min(64 * 1024 * 1024) as usize);
        let mut stream = response.bytes_stream();

        on_progress(0, total);
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| UpdaterError::from_reqwest(&e, url, self.timeout_secs))?;
            body.extend_from_slice(&chunk);
            on_progress(body.len() as u64, total);
        }

        if let Some(total) = total {
            if (body.len() as u64) < total {
                return Err(UpdaterError::DownloadInterrupted {
                    url: url.to_string(),
                    downloaded_bytes: body.len() as u64,
                    total_bytes: total,
                });
            }
        }

        tracing::debug!("[Transport] {} → {} bytes", url, body.len());
        Ok(body)
    }
}

impl Transport for HttpTransport {
    fn get<'a>(
        &'a self,
        url: &'a str,
        on_progress: ProgressFn<'a>,
    ) -> impl Future<Output = Result<Vec<u8>, UpdaterError>> + Send + 'a {
        self.fetch(url, on_progress)
    }
}

/// URL의 마지막 경로 세그먼트 (쿼리/프래그먼트 제외)
pub fn file_name_from_url(url: &str) -> Option<&str> {
    let without_fragment = url.split('#').next().unwrap_or(url);
    let path = without_fragment.split('?').next().unwrap_or(without_fragment);
    let after_scheme = path.split_once("://").map(|(_, rest)| rest).unwrap_or(path);
    // 호스트만 있는 URL은 파일명이 없음
    let (_, tail) = after_scheme.split_once('/')?;
    tail.rsplit('/').next().filter(|s| !s.is_empty())
}

/// 베이스 URL과 파일명을 결합
pub fn join_url(base: &str, file_name: &str) -> String {
    if base.ends_with('/') {
        format!("{}{}", base, file_name)
    } else {
        format!("{}/{}", base, file_name)
    }
}

//! 진행률 계산: 파일별 다운로드 퍼센트와 전체 단계 카운트

use serde::{Deserialize, Serialize};

/// 다운로드 퍼센트. 전체 크기를 모르거나 0이면 `None` (indeterminate)
pub fn download_percent(received: u64, total: Option<u64>) -> Option<u8> {
    match total {
        Some(total) if total > 0 => {
            let percent = (received as u128 * 100) / total as u128;
            Some(percent.min(100) as u8)
        }
        _ => None,
    }
}

/// 전체 동기화 단계 진행 상태 (이미지 배치 등)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepProgress {
    pub max_steps: usize,
    pub done: usize,
}

impl StepProgress {
    pub fn new(max_steps: usize) -> Self {
        Self { max_steps, done: 0 }
    }

    /// 새 배치 시작: 완료 카운트 초기화
    pub fn set_max(&mut self, max_steps: usize) {
        self.max_steps = max_steps;
        self.done = 0;
    }

    pub fn increment(&mut self) {
        self.done += 1;
    }

    pub fn is_complete(&self) -> bool {
        self.done >= self.max_steps
    }

    /// 단계 기준 퍼센트. 단계가 없으면 indeterminate
    pub fn percent(&self) -> Option<u8> {
        download_percent(self.done as u64, Some(self.max_steps as u64))
    }
}

//! Progress Port - 进度观察者
//!
//! 管线只负责发出类型化事件，展示方式由外部决定

use serde::{Deserialize, Serialize};

/// 管线阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum ProgressPhase {
    Chunking,
    /// 第 `index` 批（从 1 开始）已完成，共 `total` 批
    BatchProcessing { index: usize, total: usize },
    Assembling,
    Exporting,
}

/// 进度事件
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    #[serde(flatten)]
    pub phase: ProgressPhase,
    /// 0.0..=1.0
    pub fraction: f32,
}

impl ProgressEvent {
    pub fn new(phase: ProgressPhase, fraction: f32) -> Self {
        Self {
            phase,
            fraction: fraction.clamp(0.0, 1.0),
        }
    }
}

/// Progress Reporter
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

impl<F> ProgressReporter for F
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    fn report(&self, event: ProgressEvent) {
        self(event)
    }
}

/// 丢弃所有事件
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _event: ProgressEvent) {}
}

//! Progress Publisher Implementation
//!
//! 进度事件的广播与日志输出

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::application::ports::{ProgressEvent, ProgressPhase, ProgressReporter};

/// 默认广播通道容量
const CHANNEL_CAPACITY: usize = 100;

/// 进度发布器
///
/// 把管线的进度事件广播给所有订阅者；没有订阅者时事件被丢弃
pub struct ProgressPublisher {
    channel: broadcast::Sender<ProgressEvent>,
}

impl ProgressPublisher {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { channel: tx }
    }

    pub fn arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// 订阅进度事件
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.channel.subscribe()
    }
}

impl Default for ProgressPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter for ProgressPublisher {
    fn report(&self, event: ProgressEvent) {
        if let Err(e) = self.channel.send(event) {
            tracing::trace!(error = %e, "Failed to publish progress event (no receivers)");
        }
    }
}

/// 以日志形式输出进度
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingProgressReporter;

impl ProgressReporter for TracingProgressReporter {
    fn report(&self, event: ProgressEvent) {
        let percent = (event.fraction * 100.0).round() as u32;
        match event.phase {
            ProgressPhase::Chunking => tracing::info!("Chunking text"),
            ProgressPhase::BatchProcessing { index, total } => {
                tracing::info!(batch = index, total = total, percent = percent, "Batch processed")
            }
            ProgressPhase::Assembling => tracing::info!("Assembling audio"),
            ProgressPhase::Exporting => tracing::info!(percent = percent, "Exporting artifact"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let publisher = ProgressPublisher::new();
        let mut rx = publisher.subscribe();

        publisher.report(ProgressEvent::new(ProgressPhase::Chunking, 0.0));
        publisher.report(ProgressEvent::new(
            ProgressPhase::BatchProcessing { index: 1, total: 2 },
            0.5,
        ));

        assert_eq!(rx.recv().await.unwrap().phase, ProgressPhase::Chunking);
        let event = rx.recv().await.unwrap();
        assert_eq!(event.phase, ProgressPhase::BatchProcessing { index: 1, total: 2 });
        assert!((event.fraction - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_publish_without_receivers_is_ignored() {
        let publisher = ProgressPublisher::new();
        publisher.report(ProgressEvent::new(ProgressPhase::Assembling, 0.0));

        // 之后订阅的接收者看不到之前的事件
        let mut rx = publisher.subscribe();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_event_serializes_with_phase_tag() {
        let event = ProgressEvent::new(ProgressPhase::BatchProcessing { index: 2, total: 4 }, 0.5);
        let json = serde_json::to_value(event).unwrap();
        assert_eq!(json["phase"], "batch_processing");
        assert_eq!(json["index"], 2);
        assert_eq!(json["fraction"], 0.5);
    }
}

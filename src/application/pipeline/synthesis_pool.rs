//! Synthesis Pool - 合成并发闸门
//!
//! 所有合成调用共享一个信号量：任意时刻在途调用数不超过 `max_concurrent`。
//! 槽位以 RAII 许可的形式持有，成功、失败或 future 被丢弃时都会恰好释放一次。

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::application::ports::{SynthesisRequest, SynthesisResponse, TtsEnginePort, TtsError};

/// 默认最大并发合成数
pub const DEFAULT_MAX_CONCURRENT: usize = 4;
/// 默认等待槽位超时
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(300);

/// 合成池错误
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("No synthesis slot freed within {0:?}")]
    Timeout(Duration),

    #[error("Synthesis pool closed")]
    Closed,

    #[error(transparent)]
    Backend(#[from] TtsError),
}

/// 合成池配置
#[derive(Debug, Clone)]
pub struct SynthesisPoolConfig {
    /// 最大并发合成数
    pub max_concurrent: usize,
    /// 等待空闲槽位的上限
    pub acquire_timeout: Duration,
}

impl Default for SynthesisPoolConfig {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
        }
    }
}

/// 合成池
pub struct SynthesisPool {
    engine: Arc<dyn TtsEnginePort>,
    semaphore: Arc<Semaphore>,
    config: SynthesisPoolConfig,
    in_flight: Arc<AtomicUsize>,
    peak_in_flight: Arc<AtomicUsize>,
    calls: Arc<AtomicU64>,
}

impl SynthesisPool {
    pub fn new(engine: Arc<dyn TtsEnginePort>, config: SynthesisPoolConfig) -> Self {
        let max_concurrent = config.max_concurrent.max(1);
        tracing::debug!(
            max_concurrent = max_concurrent,
            acquire_timeout = ?config.acquire_timeout,
            "SynthesisPool created"
        );

        Self {
            engine,
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            config: SynthesisPoolConfig {
                max_concurrent,
                ..config
            },
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak_in_flight: Arc::new(AtomicUsize::new(0)),
            calls: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// 等待一个空闲槽位
    ///
    /// 超过 `acquire_timeout` 仍未获得槽位时返回 `PoolError::Timeout`
    pub async fn acquire(&self) -> Result<SynthesisPermit, PoolError> {
        let waited = self.config.acquire_timeout;
        let permit = tokio::time::timeout(waited, self.semaphore.clone().acquire_owned())
            .await
            .map_err(|_| PoolError::Timeout(waited))?
            .map_err(|_| PoolError::Closed)?;

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(current, Ordering::SeqCst);

        Ok(SynthesisPermit {
            _permit: permit,
            engine: self.engine.clone(),
            in_flight: self.in_flight.clone(),
            calls: self.calls.clone(),
        })
    }

    /// 获取槽位并执行一次合成调用
    pub async fn synthesize(&self, request: SynthesisRequest) -> Result<SynthesisResponse, PoolError> {
        let permit = self.acquire().await?;
        Ok(permit.synthesize(request).await?)
    }

    pub fn capacity(&self) -> usize {
        self.config.max_concurrent
    }

    /// 当前在途调用数
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// 自创建以来的最大在途调用数
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// 已发出的后端调用次数
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn engine(&self) -> &Arc<dyn TtsEnginePort> {
        &self.engine
    }
}

/// 合成许可
///
/// 只能用于一次后端调用；调用结束（或许可被丢弃）时释放槽位
pub struct SynthesisPermit {
    _permit: OwnedSemaphorePermit,
    engine: Arc<dyn TtsEnginePort>,
    in_flight: Arc<AtomicUsize>,
    calls: Arc<AtomicU64>,
}

impl SynthesisPermit {
    /// 提交 (文本, 音色) 到后端，消费许可
    pub async fn synthesize(self, request: SynthesisRequest) -> Result<SynthesisResponse, TtsError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.engine.synthesize(request).await
    }
}

impl Drop for SynthesisPermit {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::VoiceInfo;
    use crate::domain::VoiceId;
    use async_trait::async_trait;
    use rand::Rng;

    /// 记录真实并发度的后端
    struct TrackingEngine {
        active: AtomicUsize,
        peak: AtomicUsize,
        fail: bool,
    }

    impl TrackingEngine {
        fn new(fail: bool) -> Self {
            Self {
                active: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                fail,
            }
        }
    }

    #[async_trait]
    impl TtsEnginePort for TrackingEngine {
        async fn synthesize(&self, _request: SynthesisRequest) -> Result<SynthesisResponse, TtsError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            let delay = rand::thread_rng().gen_range(1..15);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);

            if self.fail {
                return Err(TtsError::ServiceError("boom".to_string()));
            }
            Ok(SynthesisResponse {
                audio_data: vec![0; 4],
                sample_rate: None,
            })
        }

        async fn list_voices(&self) -> Result<Vec<VoiceInfo>, TtsError> {
            Ok(Vec::new())
        }
    }

    fn request() -> SynthesisRequest {
        SynthesisRequest {
            text: "Olá.".to_string(),
            voice: VoiceId::new("v").unwrap(),
        }
    }

    fn pool(engine: Arc<TrackingEngine>, max_concurrent: usize) -> Arc<SynthesisPool> {
        SynthesisPool::new(
            engine,
            SynthesisPoolConfig {
                max_concurrent,
                acquire_timeout: Duration::from_secs(10),
            },
        )
        .arc()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_in_flight_never_exceeds_capacity() {
        let engine = Arc::new(TrackingEngine::new(false));
        let pool = pool(engine.clone(), 3);

        let handles: Vec<_> = (0..40)
            .map(|_| {
                let pool = pool.clone();
                tokio::spawn(async move { pool.synthesize(request()).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert!(engine.peak.load(Ordering::SeqCst) <= 3);
        assert!(pool.peak_in_flight() <= 3);
        assert_eq!(pool.in_flight(), 0);
        assert_eq!(pool.calls(), 40);
    }

    #[tokio::test]
    async fn test_failure_releases_slot() {
        let engine = Arc::new(TrackingEngine::new(true));
        let pool = pool(engine, 1);

        for _ in 0..5 {
            let result = pool.synthesize(request()).await;
            assert!(matches!(result, Err(PoolError::Backend(TtsError::ServiceError(_)))));
        }
        assert_eq!(pool.in_flight(), 0);
        assert!(pool.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn test_dropped_permit_releases_slot() {
        let pool = pool(Arc::new(TrackingEngine::new(false)), 1);

        let permit = pool.acquire().await.unwrap();
        assert_eq!(pool.in_flight(), 1);
        drop(permit);
        assert_eq!(pool.in_flight(), 0);
        assert!(pool.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn test_acquire_times_out_when_exhausted() {
        let pool = SynthesisPool::new(
            Arc::new(TrackingEngine::new(false)),
            SynthesisPoolConfig {
                max_concurrent: 1,
                acquire_timeout: Duration::from_millis(20),
            },
        );

        let _held = pool.acquire().await.unwrap();
        let result = pool.acquire().await;
        assert!(matches!(result, Err(PoolError::Timeout(_))));
    }
}

//! Batch Scheduler - 分批调度合成任务
//!
//! 每批内先查缓存，未命中的任务并发提交到合成池；整批全部完成后才进入下一批。
//! 结果按片段序号放回，输出顺序与任务完成顺序无关。

use std::sync::Arc;

use futures_util::future::join_all;
use tokio_util::sync::CancellationToken;

use super::job::{DecodedSegment, JobState, SynthesisJob};
use super::synthesis_pool::{PoolError, SynthesisPool};
use crate::application::error::{AssemblyError, PipelineError};
use crate::application::ports::{
    AudioCachePort, AudioCodecPort, CacheEntry, CacheKey, CodecError, ProgressEvent,
    ProgressPhase, ProgressReporter, SynthesisRequest,
};
use crate::domain::{PcmAudio, SpeedFactor, TextChunk, VoiceId};

/// 默认每批片段数
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// 调度结果
#[derive(Debug)]
pub struct ScheduleOutcome {
    /// 按片段序号排列的解码片段
    pub segments: Vec<DecodedSegment>,
    pub cache_hits: usize,
    pub synthesized: usize,
}

/// 单个任务的结果
struct Resolved {
    segment: DecodedSegment,
    from_cache: bool,
}

/// 分批调度器
pub struct BatchScheduler {
    cache: Arc<dyn AudioCachePort>,
    pool: Arc<SynthesisPool>,
    codec: Arc<dyn AudioCodecPort>,
    batch_size: usize,
}

impl BatchScheduler {
    pub fn new(
        cache: Arc<dyn AudioCachePort>,
        pool: Arc<SynthesisPool>,
        codec: Arc<dyn AudioCodecPort>,
        batch_size: usize,
    ) -> Self {
        Self {
            cache,
            pool,
            codec,
            batch_size: batch_size.max(1),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// 执行调度
    ///
    /// 任一任务失败则整次运行失败；同批中已成功的任务仍会写入缓存，供重试复用
    pub async fn run(
        &self,
        chunks: Vec<TextChunk>,
        voice: &VoiceId,
        speed: SpeedFactor,
        reporter: &dyn ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<ScheduleOutcome, PipelineError> {
        if let Some((position, chunk)) = chunks
            .iter()
            .enumerate()
            .find(|(position, chunk)| chunk.index() != *position)
        {
            return Err(PipelineError::invalid_input(format!(
                "chunk ordinals must be contiguous from 0: found {} at position {}",
                chunk.index(),
                position
            )));
        }

        let total_chunks = chunks.len();
        let total_batches = (total_chunks + self.batch_size - 1) / self.batch_size;
        let mut slots: Vec<Option<DecodedSegment>> = (0..total_chunks).map(|_| None).collect();
        let mut cache_hits = 0;
        let mut synthesized = 0;

        tracing::info!(
            chunks = total_chunks,
            batches = total_batches,
            batch_size = self.batch_size,
            voice = %voice,
            speed = %speed,
            "Scheduling synthesis"
        );

        for (batch_index, batch) in chunks.chunks(self.batch_size).enumerate() {
            if cancel.is_cancelled() {
                tracing::info!(batch = batch_index + 1, "Cancelled before batch");
                return Err(PipelineError::Cancelled);
            }

            let jobs = batch.iter().map(|chunk| {
                let job = SynthesisJob::new(chunk.clone(), voice.clone(), speed);
                self.resolve(job, cancel)
            });

            // 屏障：等待本批所有任务（命中与未命中）结束
            let results = join_all(jobs).await;

            let mut failure: Option<PipelineError> = None;
            for result in results {
                match result {
                    Ok(resolved) => {
                        if resolved.from_cache {
                            cache_hits += 1;
                        } else {
                            synthesized += 1;
                        }
                        let index = resolved.segment.index;
                        slots[index] = Some(resolved.segment);
                    }
                    // 结果按批内顺序排列，保留序号最小的失败
                    Err(e) if failure.is_none() => failure = Some(e),
                    Err(e) => {
                        tracing::debug!(error = %e, "Additional failure in batch");
                    }
                }
            }

            if let Some(e) = failure {
                tracing::error!(
                    batch = batch_index + 1,
                    chunk_index = ?e.chunk_index(),
                    error = %e,
                    "Batch failed"
                );
                return Err(e);
            }

            tracing::debug!(
                batch = batch_index + 1,
                total = total_batches,
                cache_hits = cache_hits,
                synthesized = synthesized,
                "Batch completed"
            );
            reporter.report(ProgressEvent::new(
                ProgressPhase::BatchProcessing {
                    index: batch_index + 1,
                    total: total_batches,
                },
                (batch_index + 1) as f32 / total_batches as f32,
            ));
        }

        let segments = slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.ok_or_else(|| {
                    PipelineError::invalid_input(format!("chunk {} produced no segment", index))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ScheduleOutcome {
            segments,
            cache_hits,
            synthesized,
        })
    }

    /// 解析单个任务：缓存优先，未命中则合成、解码、回写缓存
    async fn resolve(
        &self,
        job: SynthesisJob,
        cancel: &CancellationToken,
    ) -> Result<Resolved, PipelineError> {
        let index = job.index();
        let key = job.cache_key();
        trace_state(index, JobState::Pending);
        trace_state(index, JobState::CacheCheck);

        if let Some(segment) = self.lookup_cache(index, &key).await {
            trace_state(index, JobState::CacheHit);
            trace_state(index, JobState::Ready);
            return Ok(Resolved {
                segment,
                from_cache: true,
            });
        }
        trace_state(index, JobState::CacheMiss);

        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        trace_state(index, JobState::PoolWait);
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
            permit = self.pool.acquire() => permit.map_err(|e| pool_error(index, e))?,
        };

        // 已开始的后端调用不随取消中断，完成后释放槽位
        trace_state(index, JobState::Synthesizing);
        let request = SynthesisRequest {
            text: job.chunk.content().to_string(),
            voice: job.voice.clone(),
        };
        let response = permit.synthesize(request).await.map_err(|e| {
            trace_state(index, JobState::Failed);
            PipelineError::SynthesisBackend {
                chunk_index: index,
                source: e,
            }
        })?;

        trace_state(index, JobState::Decoding);
        let declared_rate = response.sample_rate;
        let (payload, decoded) = self.decode(response.audio_data).await;
        let audio = decoded.map_err(|e| {
            trace_state(index, JobState::Failed);
            PipelineError::Assembly(AssemblyError::SegmentDecode {
                chunk_index: index,
                source: e,
            })
        })?;

        if let Some(rate) = declared_rate.filter(|rate| *rate != audio.sample_rate) {
            tracing::debug!(
                chunk_index = index,
                declared = rate,
                decoded = audio.sample_rate,
                "Backend sample rate header differs from decoded stream"
            );
        }

        trace_state(index, JobState::CachePut);
        self.store_cache(index, key, payload, &audio).await;

        trace_state(index, JobState::Ready);
        Ok(Resolved {
            segment: DecodedSegment::new(index, audio),
            from_cache: false,
        })
    }

    /// 查询缓存；负载无法解码时按未命中处理，由随后的回写覆盖
    async fn lookup_cache(&self, index: usize, key: &CacheKey) -> Option<DecodedSegment> {
        let entry = self.cache.get(key).await?;
        let (_, decoded) = self.decode(entry.payload).await;

        match decoded {
            Ok(audio) => Some(DecodedSegment::new(index, audio)),
            Err(e) => {
                tracing::warn!(
                    chunk_index = index,
                    cache_key = %key,
                    error = %e,
                    "Cached payload unreadable, treating as miss"
                );
                None
            }
        }
    }

    /// 回写缓存；失败只记录告警，不影响任务结果
    async fn store_cache(&self, index: usize, key: CacheKey, payload: Vec<u8>, audio: &PcmAudio) {
        let Some(encoding) = self.codec.detect_encoding(&payload) else {
            tracing::warn!(chunk_index = index, "Unknown payload encoding, not caching");
            return;
        };

        let entry = CacheEntry::new(key, payload, encoding, audio.sample_rate, audio.channels);
        if let Err(e) = self.cache.put(entry).await {
            tracing::warn!(chunk_index = index, error = %e, "Failed to cache segment");
        }
    }

    /// 在阻塞线程池中解码，并把原始字节交还调用方
    async fn decode(&self, payload: Vec<u8>) -> (Vec<u8>, Result<PcmAudio, CodecError>) {
        let codec = self.codec.clone();
        let task = tokio::task::spawn_blocking(move || {
            let decoded = codec.decode(&payload);
            (payload, decoded)
        });

        match task.await {
            Ok(result) => result,
            Err(e) => (
                Vec::new(),
                Err(CodecError::DecodingError(format!("decoder task failed: {}", e))),
            ),
        }
    }
}

fn trace_state(chunk_index: usize, state: JobState) {
    if state.is_terminal() {
        tracing::debug!(chunk_index = chunk_index, state = state.as_str(), "Job finished");
    } else {
        tracing::trace!(chunk_index = chunk_index, state = state.as_str(), "Job state");
    }
}

fn pool_error(chunk_index: usize, err: PoolError) -> PipelineError {
    match err {
        PoolError::Timeout(waited) => PipelineError::PoolExhaustionTimeout {
            chunk_index,
            waited,
        },
        PoolError::Closed => PipelineError::Cancelled,
        PoolError::Backend(source) => PipelineError::SynthesisBackend {
            chunk_index,
            source,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::pipeline::synthesis_pool::SynthesisPoolConfig;
    use crate::application::ports::{
        AudioEncoding, CacheError, CacheStats, CleanupReport, EncodeSettings, NoopProgress,
        SynthesisResponse, TtsEnginePort, TtsError, VoiceInfo,
    };
    use crate::domain::chunk_text;
    use async_trait::async_trait;
    use rand::Rng;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// 内存缓存
    #[derive(Default)]
    struct MemoryCache {
        entries: Mutex<HashMap<CacheKey, CacheEntry>>,
    }

    impl MemoryCache {
        fn contains(&self, key: &CacheKey) -> bool {
            self.entries.lock().unwrap().contains_key(key)
        }

        fn len(&self) -> usize {
            self.entries.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl AudioCachePort for MemoryCache {
        async fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
            self.entries.lock().unwrap().get(key).cloned()
        }

        async fn put(&self, entry: CacheEntry) -> Result<(), CacheError> {
            self.entries.lock().unwrap().insert(entry.key.clone(), entry);
            Ok(())
        }

        async fn cleanup(&self) -> Result<CleanupReport, CacheError> {
            Ok(CleanupReport::default())
        }

        async fn stats(&self) -> CacheStats {
            CacheStats {
                total_entries: self.len(),
                ..CacheStats::default()
            }
        }
    }

    /// 把每个字节解码为一个样本；以 "BAD" 开头的负载解码失败
    struct ByteCodec;

    impl AudioCodecPort for ByteCodec {
        fn detect_encoding(&self, _data: &[u8]) -> Option<AudioEncoding> {
            Some(AudioEncoding::PcmS16le)
        }

        fn decode(&self, data: &[u8]) -> Result<PcmAudio, CodecError> {
            if data.starts_with(b"BAD") {
                return Err(CodecError::DecodingError("bad payload".to_string()));
            }
            let samples = data.iter().map(|b| *b as f32 / 255.0).collect();
            Ok(PcmAudio::new(samples, 1_000, 1))
        }

        fn encode(&self, _audio: &PcmAudio, _settings: &EncodeSettings) -> Result<Vec<u8>, CodecError> {
            Ok(Vec::new())
        }
    }

    /// 回显文本字节的后端，随机延迟使完成顺序乱序
    #[derive(Default)]
    struct EchoEngine {
        calls: AtomicU64,
        /// 固定延迟，覆盖随机延迟
        delay: Option<Duration>,
    }

    #[async_trait]
    impl TtsEnginePort for EchoEngine {
        async fn synthesize(&self, request: SynthesisRequest) -> Result<SynthesisResponse, TtsError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let delay = self
                .delay
                .unwrap_or_else(|| Duration::from_millis(rand::thread_rng().gen_range(0..20)));
            tokio::time::sleep(delay).await;

            if request.text.contains("FAIL") {
                return Err(TtsError::ServiceError("rejected".to_string()));
            }
            Ok(SynthesisResponse {
                audio_data: request.text.into_bytes(),
                sample_rate: Some(1_000),
            })
        }

        async fn list_voices(&self) -> Result<Vec<VoiceInfo>, TtsError> {
            Ok(Vec::new())
        }
    }

    struct Fixture {
        cache: Arc<MemoryCache>,
        engine: Arc<EchoEngine>,
        pool: Arc<SynthesisPool>,
        scheduler: BatchScheduler,
    }

    fn fixture(batch_size: usize, max_concurrent: usize) -> Fixture {
        fixture_with_engine(EchoEngine::default(), batch_size, max_concurrent)
    }

    fn fixture_with_engine(engine: EchoEngine, batch_size: usize, max_concurrent: usize) -> Fixture {
        let cache = Arc::new(MemoryCache::default());
        let engine = Arc::new(engine);
        let pool = SynthesisPool::new(
            engine.clone(),
            SynthesisPoolConfig {
                max_concurrent,
                acquire_timeout: Duration::from_secs(10),
            },
        )
        .arc();
        let scheduler =
            BatchScheduler::new(cache.clone(), pool.clone(), Arc::new(ByteCodec), batch_size);
        Fixture {
            cache,
            engine,
            pool,
            scheduler,
        }
    }

    fn voice() -> VoiceId {
        VoiceId::new("pt-BR-FranciscaNeural").unwrap()
    }

    fn speed() -> SpeedFactor {
        SpeedFactor::new(1.4).unwrap()
    }

    fn chunks(text: &str) -> Vec<TextChunk> {
        chunk_text(text, 1)
    }

    fn as_text(segment: &DecodedSegment) -> String {
        segment
            .audio
            .samples
            .iter()
            .map(|s| (s * 255.0).round() as u8 as char)
            .collect()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_segments_follow_chunk_order() {
        let fx = fixture(4, 3);
        let text = "Um. Dois. Tres. Quatro. Cinco. Seis. Sete. Oito. Nove. Dez. Onze.";
        let input = chunks(text);

        let outcome = fx
            .scheduler
            .run(input.clone(), &voice(), speed(), &NoopProgress, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.segments.len(), input.len());
        for (segment, chunk) in outcome.segments.iter().zip(&input) {
            assert_eq!(segment.index, chunk.index());
            assert_eq!(as_text(segment), chunk.content());
        }
        assert_eq!(outcome.synthesized, input.len());
        assert_eq!(outcome.cache_hits, 0);
    }

    #[tokio::test]
    async fn test_second_run_is_served_from_cache() {
        let fx = fixture(2, 2);
        let input = chunks("Primeira. Segunda. Terceira.");

        fx.scheduler
            .run(input.clone(), &voice(), speed(), &NoopProgress, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(fx.engine.calls.load(Ordering::SeqCst), 3);

        let outcome = fx
            .scheduler
            .run(input, &voice(), speed(), &NoopProgress, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.cache_hits, 3);
        assert_eq!(outcome.synthesized, 0);
        assert_eq!(fx.engine.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_failure_keeps_sibling_results_cached() {
        let fx = fixture(10, 4);
        let input = chunks("Um. Dois. FAIL tres. Quatro. Cinco.");

        let err = fx
            .scheduler
            .run(input.clone(), &voice(), speed(), &NoopProgress, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::SynthesisBackend { chunk_index: 2, .. }));
        for chunk in input.iter().filter(|c| c.index() != 2) {
            let job = SynthesisJob::new(chunk.clone(), voice(), speed());
            assert!(fx.cache.contains(&job.cache_key()), "chunk {} not cached", chunk.index());
        }
        assert_eq!(fx.cache.len(), 4);
    }

    #[tokio::test]
    async fn test_lowest_failing_index_is_reported() {
        let fx = fixture(10, 4);
        let input = chunks("Um. FAIL dois. Tres. FAIL quatro.");

        let err = fx
            .scheduler
            .run(input, &voice(), speed(), &NoopProgress, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.chunk_index(), Some(1));
    }

    #[tokio::test]
    async fn test_failure_stops_later_batches() {
        let fx = fixture(2, 2);
        let input = chunks("FAIL um. Dois. Tres. Quatro.");

        assert!(fx
            .scheduler
            .run(input, &voice(), speed(), &NoopProgress, &CancellationToken::new())
            .await
            .is_err());
        assert_eq!(fx.engine.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_corrupt_cache_entry_is_resynthesized() {
        let fx = fixture(4, 2);
        let input = chunks("Corrompido.");
        let job = SynthesisJob::new(input[0].clone(), voice(), speed());
        fx.cache
            .put(CacheEntry::new(
                job.cache_key(),
                b"BAD".to_vec(),
                AudioEncoding::Wav,
                1_000,
                1,
            ))
            .await
            .unwrap();

        let outcome = fx
            .scheduler
            .run(input, &voice(), speed(), &NoopProgress, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.synthesized, 1);
        assert_eq!(as_text(&outcome.segments[0]), "Corrompido.");

        // 损坏条目被新的合成结果覆盖
        let stored = fx.cache.get(&job.cache_key()).await.unwrap();
        assert_eq!(stored.payload, b"Corrompido.".to_vec());
    }

    #[tokio::test]
    async fn test_undecodable_backend_audio_fails_with_chunk() {
        let fx = fixture(4, 2);
        let input = chunks("Bom. BAD audio.");

        let err = fx
            .scheduler
            .run(input, &voice(), speed(), &NoopProgress, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Assembly(AssemblyError::SegmentDecode { chunk_index: 1, .. })
        ));
        assert_eq!(fx.cache.len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_run_dispatches_nothing() {
        let fx = fixture(2, 2);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = fx
            .scheduler
            .run(chunks("Um. Dois. Tres."), &voice(), speed(), &NoopProgress, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled));
        assert_eq!(fx.engine.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancel_during_flight_lets_call_finish() {
        let engine = EchoEngine {
            delay: Some(Duration::from_millis(200)),
            ..EchoEngine::default()
        };
        let fx = fixture_with_engine(engine, 4, 1);
        let input = chunks("Um. Dois. Tres. Quatro.");
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let err = fx
            .scheduler
            .run(input.clone(), &voice(), speed(), &NoopProgress, &cancel)
            .await
            .unwrap_err();

        // 第一个任务已在途，完成后写入缓存；其余任务在等待槽位时被取消
        assert!(matches!(err, PipelineError::Cancelled));
        assert_eq!(fx.engine.calls.load(Ordering::SeqCst), 1);
        assert_eq!(fx.pool.in_flight(), 0);
        assert_eq!(fx.pool.calls(), 1);

        let first = SynthesisJob::new(input[0].clone(), voice(), speed());
        assert!(fx.cache.contains(&first.cache_key()));
        assert_eq!(fx.cache.len(), 1);
    }

    #[tokio::test]
    async fn test_batch_progress_events() {
        let fx = fixture(2, 2);
        let events = Mutex::new(Vec::new());
        let reporter = |event: ProgressEvent| events.lock().unwrap().push(event);

        fx.scheduler
            .run(
                chunks("Um. Dois. Tres. Quatro. Cinco."),
                &voice(),
                speed(),
                &reporter,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let events = events.into_inner().unwrap();
        let phases: Vec<_> = events.iter().map(|e| e.phase).collect();
        assert_eq!(
            phases,
            vec![
                ProgressPhase::BatchProcessing { index: 1, total: 3 },
                ProgressPhase::BatchProcessing { index: 2, total: 3 },
                ProgressPhase::BatchProcessing { index: 3, total: 3 },
            ]
        );
        assert!((events[2].fraction - 1.0).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn test_non_contiguous_ordinals_rejected() {
        let fx = fixture(2, 2);
        let input = vec![TextChunk::new(0, "a.".to_string()), TextChunk::new(2, "b.".to_string())];

        let err = fx
            .scheduler
            .run(input, &voice(), speed(), &NoopProgress, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput(_)));
    }
}

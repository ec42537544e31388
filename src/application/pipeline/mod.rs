//! Narration Pipeline - 长文本朗读管线
//!
//! 分片 → 分批调度（缓存优先、并发受限的合成）→ 变速拼接 → 编码导出

mod assembler;
mod batch_scheduler;
mod job;
mod synthesis_pool;

pub use assembler::{AssemblyPlan, AudioAssembler, EncodedArtifact, DEFAULT_GAP};
pub use batch_scheduler::{BatchScheduler, ScheduleOutcome, DEFAULT_BATCH_SIZE};
pub use job::{DecodedSegment, JobState, SynthesisJob};
pub use synthesis_pool::{
    PoolError, SynthesisPermit, SynthesisPool, SynthesisPoolConfig, DEFAULT_ACQUIRE_TIMEOUT,
    DEFAULT_MAX_CONCURRENT,
};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::fs;
use tokio_util::sync::CancellationToken;

use crate::application::error::PipelineError;
use crate::application::ports::{
    AudioCachePort, AudioCodecPort, AudioFormat, EncodeSettings, ProgressEvent, ProgressPhase,
    ProgressReporter,
};
use crate::domain::{chunk_text, SpeedFactor, VoiceId, DEFAULT_MAX_CHUNK_CHARS};

/// 管线参数
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub max_chunk_chars: usize,
    pub batch_size: usize,
    pub gap: Duration,
    pub encode: EncodeSettings,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_chunk_chars: DEFAULT_MAX_CHUNK_CHARS,
            batch_size: DEFAULT_BATCH_SIZE,
            gap: DEFAULT_GAP,
            encode: EncodeSettings::default(),
        }
    }
}

/// 一次朗读请求
#[derive(Debug, Clone)]
pub struct NarrationRequest {
    pub text: String,
    pub voice: VoiceId,
    pub speed: SpeedFactor,
    pub output_path: PathBuf,
}

/// 运行结果
#[derive(Debug, Clone)]
pub struct NarrationOutcome {
    pub output_path: PathBuf,
    pub elapsed: Duration,
    pub chunk_count: usize,
    pub cache_hits: usize,
    pub synthesized: usize,
    pub audio_duration: Duration,
    pub format: AudioFormat,
}

/// 朗读管线
///
/// 缓存与合成池作为显式依赖注入
pub struct NarrationPipeline {
    scheduler: BatchScheduler,
    assembler: AudioAssembler,
    settings: PipelineSettings,
}

impl NarrationPipeline {
    pub fn new(
        cache: Arc<dyn AudioCachePort>,
        pool: Arc<SynthesisPool>,
        codec: Arc<dyn AudioCodecPort>,
        settings: PipelineSettings,
    ) -> Self {
        let scheduler = BatchScheduler::new(cache, pool, codec.clone(), settings.batch_size);
        let assembler = AudioAssembler::new(codec, settings.encode.clone());
        Self {
            scheduler,
            assembler,
            settings,
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// 执行一次完整运行
    ///
    /// 成功时产物已完整写入 `output_path`；失败时不会留下部分产物
    pub async fn run(
        &self,
        request: NarrationRequest,
        reporter: &dyn ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<NarrationOutcome, PipelineError> {
        let started = Instant::now();

        reporter.report(ProgressEvent::new(ProgressPhase::Chunking, 0.0));
        let chunks = chunk_text(&request.text, self.settings.max_chunk_chars);
        if chunks.is_empty() {
            return Err(PipelineError::invalid_input("text is empty after normalization"));
        }
        let chunk_count = chunks.len();

        tracing::info!(
            chunks = chunk_count,
            max_chunk_chars = self.settings.max_chunk_chars,
            voice = %request.voice,
            speed = %request.speed,
            "Text chunked"
        );

        let schedule = self
            .scheduler
            .run(chunks, &request.voice, request.speed, reporter, cancel)
            .await?;

        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        reporter.report(ProgressEvent::new(ProgressPhase::Assembling, 0.0));
        let plan = AssemblyPlan::new(schedule.segments, self.settings.gap);
        let artifact = self.assembler.assemble(plan, request.speed).await?;

        reporter.report(ProgressEvent::new(ProgressPhase::Exporting, 0.0));
        write_atomically(&request.output_path, &artifact.data).await?;
        reporter.report(ProgressEvent::new(ProgressPhase::Exporting, 1.0));

        let outcome = NarrationOutcome {
            output_path: request.output_path,
            elapsed: started.elapsed(),
            chunk_count,
            cache_hits: schedule.cache_hits,
            synthesized: schedule.synthesized,
            audio_duration: artifact.duration,
            format: artifact.format,
        };

        tracing::info!(
            path = %outcome.output_path.display(),
            chunks = outcome.chunk_count,
            cache_hits = outcome.cache_hits,
            synthesized = outcome.synthesized,
            elapsed_ms = outcome.elapsed.as_millis() as u64,
            "Narration completed"
        );

        Ok(outcome)
    }
}

/// 先写入同目录临时文件，再重命名到目标路径
async fn write_atomically(path: &Path, data: &[u8]) -> Result<(), PipelineError> {
    let export_error = |source| PipelineError::Export {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await.map_err(export_error)?;
    }

    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "narration".to_string());
    let temp_path = path.with_file_name(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));

    let result = async {
        fs::write(&temp_path, data).await?;
        fs::rename(&temp_path, path).await
    }
    .await;

    if let Err(e) = result {
        let _ = fs::remove_file(&temp_path).await;
        return Err(export_error(e));
    }

    tracing::debug!(path = %path.display(), bytes = data.len(), "Artifact written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_write_atomically_creates_parent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/out.ogg");

        write_atomically(&path, b"artifact").await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"artifact");

        let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_write_atomically_reports_export_error() {
        let dir = tempdir().unwrap();
        // 目标路径是已存在的目录，重命名失败
        let target = dir.path().join("taken");
        std::fs::create_dir(&target).unwrap();
        std::fs::write(target.join("child"), b"x").unwrap();

        let err = write_atomically(&target, b"artifact").await.unwrap_err();
        assert!(matches!(err, PipelineError::Export { .. }));
        let tmp_count = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(tmp_count, 0);
    }
}

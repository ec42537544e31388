//! Audio Assembler - 拼接与导出
//!
//! 对每个片段变速，统一采样率与声道，片段之间插入固定静音，最后编码为单一产物

use std::sync::Arc;
use std::time::Duration;

use super::job::DecodedSegment;
use crate::application::error::AssemblyError;
use crate::application::ports::{AudioCodecPort, AudioFormat, EncodeSettings};
use crate::domain::audio::{change_tempo, remix_channels, resample};
use crate::domain::{PcmAudio, SpeedFactor};

/// 默认片段间隔
pub const DEFAULT_GAP: Duration = Duration::from_millis(150);

/// 组装计划
#[derive(Debug, Clone)]
pub struct AssemblyPlan {
    /// 按片段序号排列
    pub segments: Vec<DecodedSegment>,
    /// 相邻片段之间的静音时长
    pub gap: Duration,
}

impl AssemblyPlan {
    pub fn new(segments: Vec<DecodedSegment>, gap: Duration) -> Self {
        Self { segments, gap }
    }
}

/// 编码后的产物
#[derive(Debug, Clone)]
pub struct EncodedArtifact {
    pub data: Vec<u8>,
    pub format: AudioFormat,
    pub duration: Duration,
    pub sample_rate: u32,
    pub channels: u16,
}

/// 音频组装器
pub struct AudioAssembler {
    codec: Arc<dyn AudioCodecPort>,
    settings: EncodeSettings,
}

impl AudioAssembler {
    pub fn new(codec: Arc<dyn AudioCodecPort>, settings: EncodeSettings) -> Self {
        Self { codec, settings }
    }

    pub fn settings(&self) -> &EncodeSettings {
        &self.settings
    }

    /// 拼接为单条 PCM
    ///
    /// 目标采样率与声道取第一个片段的值；间隔只出现在片段之间，结尾没有
    pub fn stitch(plan: &AssemblyPlan, speed: SpeedFactor) -> Result<PcmAudio, AssemblyError> {
        let first = plan.segments.first().ok_or(AssemblyError::EmptyPlan)?;
        let sample_rate = first.audio.sample_rate;
        let channels = first.audio.channels;

        let gap = PcmAudio::silence(sample_rate, channels, plan.gap);
        let mut samples = Vec::new();

        for (position, segment) in plan.segments.iter().enumerate() {
            if segment.index != position {
                return Err(AssemblyError::InvalidSegment {
                    chunk_index: segment.index,
                    reason: format!("expected segment {} at this position", position),
                });
            }
            if segment.audio.sample_rate == 0 || segment.audio.channels == 0 {
                return Err(AssemblyError::InvalidSegment {
                    chunk_index: segment.index,
                    reason: "zero sample rate or channel count".to_string(),
                });
            }

            let audio = change_tempo(&segment.audio, speed.value());
            let audio = resample(&audio, sample_rate);
            let audio = remix_channels(&audio, channels);

            if position > 0 {
                samples.extend_from_slice(&gap.samples);
            }
            samples.extend_from_slice(&audio.samples);
        }

        Ok(PcmAudio::new(samples, sample_rate, channels))
    }

    /// 拼接并编码，编码在阻塞线程池中执行
    pub async fn assemble(
        &self,
        plan: AssemblyPlan,
        speed: SpeedFactor,
    ) -> Result<EncodedArtifact, AssemblyError> {
        let segment_count = plan.segments.len();
        let codec = self.codec.clone();
        let settings = self.settings.clone();

        let artifact = tokio::task::spawn_blocking(move || {
            let audio = Self::stitch(&plan, speed)?;
            let data = codec
                .encode(&audio, &settings)
                .map_err(AssemblyError::Encode)?;

            Ok::<_, AssemblyError>(EncodedArtifact {
                data,
                format: settings.format,
                duration: audio.duration(),
                sample_rate: audio.sample_rate,
                channels: audio.channels,
            })
        })
        .await
        .map_err(|e| AssemblyError::Join(e.to_string()))??;

        tracing::info!(
            segments = segment_count,
            format = %artifact.format,
            duration_secs = artifact.duration.as_secs_f64(),
            bytes = artifact.data.len(),
            "Audio assembled"
        );

        Ok(artifact)
    }
}

//! 合成任务与解码片段

use std::time::Duration;

use crate::application::ports::CacheKey;
use crate::domain::{PcmAudio, SpeedFactor, TextChunk, VoiceId};

/// 合成任务状态
///
/// `Pending → CacheCheck → CacheHit → Ready`
/// `Pending → CacheCheck → CacheMiss → PoolWait → Synthesizing → Decoding → CachePut → Ready`
/// `Synthesizing`/`Decoding` 失败进入终态 `Failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    CacheCheck,
    CacheHit,
    CacheMiss,
    PoolWait,
    Synthesizing,
    Decoding,
    CachePut,
    Ready,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::CacheCheck => "cache_check",
            JobState::CacheHit => "cache_hit",
            JobState::CacheMiss => "cache_miss",
            JobState::PoolWait => "pool_wait",
            JobState::Synthesizing => "synthesizing",
            JobState::Decoding => "decoding",
            JobState::CachePut => "cache_put",
            JobState::Ready => "ready",
            JobState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Ready | JobState::Failed)
    }
}

/// 合成任务
#[derive(Debug, Clone)]
pub struct SynthesisJob {
    pub chunk: TextChunk,
    pub voice: VoiceId,
    pub speed: SpeedFactor,
}

impl SynthesisJob {
    pub fn new(chunk: TextChunk, voice: VoiceId, speed: SpeedFactor) -> Self {
        Self { chunk, voice, speed }
    }

    pub fn index(&self) -> usize {
        self.chunk.index()
    }

    pub fn cache_key(&self) -> CacheKey {
        CacheKey::derive(self.chunk.content(), &self.voice, self.speed)
    }
}

/// 解码后的片段（变速前）
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedSegment {
    pub index: usize,
    pub audio: PcmAudio,
}

impl DecodedSegment {
    pub fn new(index: usize, audio: PcmAudio) -> Self {
        Self { index, audio }
    }

    pub fn sample_rate(&self) -> u32 {
        self.audio.sample_rate
    }

    pub fn duration(&self) -> Duration {
        self.audio.duration()
    }
}

//! 应用层 - 用例编排
//!
//! 包含：
//! - ports: 六边形架构端口定义（TtsEngine、AudioCache、AudioCodec、Progress）
//! - pipeline: 朗读管线（分批调度、合成池、拼接导出）
//! - voice_catalog: 音色目录
//! - error: 应用层错误定义

pub mod error;
pub mod pipeline;
pub mod ports;
pub mod voice_catalog;

pub use error::{AssemblyError, PipelineError};

pub use pipeline::{
    AssemblyPlan, AudioAssembler, BatchScheduler, DecodedSegment, EncodedArtifact,
    NarrationOutcome, NarrationPipeline, NarrationRequest, PipelineSettings, PoolError,
    ScheduleOutcome, SynthesisPool, SynthesisPoolConfig,
};

pub use ports::{
    // Audio cache
    AudioCachePort,
    CacheEntry,
    CacheError,
    CacheKey,
    CacheStats,
    CleanupReport,
    // Audio codec
    AudioCodecPort,
    AudioEncoding,
    AudioFormat,
    CodecError,
    EncodeSettings,
    // Progress
    NoopProgress,
    ProgressEvent,
    ProgressPhase,
    ProgressReporter,
    // TTS engine
    SynthesisRequest,
    SynthesisResponse,
    TtsEnginePort,
    TtsError,
    VoiceInfo,
};

pub use voice_catalog::VoiceCatalog;

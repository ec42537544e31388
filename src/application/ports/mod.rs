//! Application Ports - 出站端口定义
//!
//! 定义应用层与基础设施层的抽象接口

mod audio_cache;
mod audio_codec;
mod progress;
mod tts_engine;

pub use audio_cache::{
    AudioCachePort, CacheEntry, CacheError, CacheKey, CacheStats, CleanupReport,
};
pub use audio_codec::{
    AudioCodecPort, AudioEncoding, AudioFormat, CodecError, EncodeSettings, DEFAULT_BITRATE,
};
pub use progress::{NoopProgress, ProgressEvent, ProgressPhase, ProgressReporter};
pub use tts_engine::{SynthesisRequest, SynthesisResponse, TtsEnginePort, TtsError, VoiceInfo};

//! Domain Layer - 领域层
//!
//! - Narration Context: 文本片段、音色标识、语速因子
//! - Text Chunker: 按句分块
//! - Audio: PCM 值对象与变速、重采样、声道转换

pub mod audio;
pub mod narration;

mod text_chunker;

pub use audio::PcmAudio;
pub use narration::{NarrationError, SpeedFactor, TextChunk, VoiceId};
pub use text_chunker::{chunk_text, normalize_text, DEFAULT_MAX_CHUNK_CHARS};

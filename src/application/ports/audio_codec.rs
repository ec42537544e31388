//! Audio Codec Port - 音频编解码抽象
//!
//! 解码后端返回的音频（WAV/MP3），把拼接结果编码为最终产物（MP3、Ogg/Opus 或 WAV）

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::PcmAudio;

/// 编解码错误
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Encoding error: {0}")]
    EncodingError(String),

    #[error("Decoding error: {0}")]
    DecodingError(String),
}

/// 缓存负载的编码方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioEncoding {
    Wav,
    Mp3,
    Ogg,
    PcmS16le,
}

impl AudioEncoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            AudioEncoding::Wav => "wav",
            AudioEncoding::Mp3 => "mp3",
            AudioEncoding::Ogg => "ogg",
            AudioEncoding::PcmS16le => "pcm_s16le",
        }
    }
}

/// 最终产物格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    /// MPEG-1 Layer III，固定码率
    #[default]
    Mp3,
    /// Ogg 容器中的 Opus
    Opus,
    /// PCM16 WAV，不压缩
    Wav,
}

impl AudioFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Opus => "ogg",
            AudioFormat::Wav => "wav",
        }
    }
}

impl std::fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AudioFormat::Mp3 => write!(f, "mp3"),
            AudioFormat::Opus => write!(f, "opus"),
            AudioFormat::Wav => write!(f, "wav"),
        }
    }
}

impl std::str::FromStr for AudioFormat {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mp3" => Ok(AudioFormat::Mp3),
            "opus" | "ogg" => Ok(AudioFormat::Opus),
            "wav" => Ok(AudioFormat::Wav),
            _ => Err(CodecError::UnsupportedFormat(s.to_string())),
        }
    }
}

/// 固定输出比特率 128 kbps
pub const DEFAULT_BITRATE: u32 = 128_000;

/// 编码配置
#[derive(Debug, Clone)]
pub struct EncodeSettings {
    pub format: AudioFormat,
    /// 比特率（bps），仅对有损格式生效
    pub bitrate: u32,
}

impl Default for EncodeSettings {
    fn default() -> Self {
        Self {
            format: AudioFormat::Mp3,
            bitrate: DEFAULT_BITRATE,
        }
    }
}

/// Audio Codec Port
///
/// 编解码均为 CPU 密集操作，调用方负责放到阻塞线程池中执行
pub trait AudioCodecPort: Send + Sync {
    /// 根据魔数探测负载编码
    fn detect_encoding(&self, data: &[u8]) -> Option<AudioEncoding>;

    /// 解码为交错 f32 PCM
    fn decode(&self, data: &[u8]) -> Result<PcmAudio, CodecError>;

    /// 编码为最终产物
    fn encode(&self, audio: &PcmAudio, settings: &EncodeSettings) -> Result<Vec<u8>, CodecError>;
}

//! TTS Engine Port - 语音合成后端抽象
//!
//! 定义外部合成服务的抽象接口，具体实现在 infrastructure/adapters 层

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::VoiceId;

/// TTS 错误
#[derive(Debug, Error)]
pub enum TtsError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Request timeout")]
    Timeout,

    #[error("Service error: {0}")]
    ServiceError(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Voice not found: {0}")]
    VoiceNotFound(String),
}

impl TtsError {
    /// 是否为传输层的瞬时错误（可由适配器重试）
    pub fn is_transient(&self) -> bool {
        matches!(self, TtsError::NetworkError(_) | TtsError::Timeout)
    }
}

/// 合成请求
#[derive(Debug, Clone)]
pub struct SynthesisRequest {
    /// 要合成的文本内容
    pub text: String,
    /// 音色
    pub voice: VoiceId,
}

/// 合成响应
#[derive(Debug, Clone)]
pub struct SynthesisResponse {
    /// 原始音频数据（WAV/MP3 等，由编解码器探测）
    pub audio_data: Vec<u8>,
    /// 服务端声明的采样率
    pub sample_rate: Option<u32>,
}

/// 音色目录条目
///
/// 同时接受 snake_case 与 Edge 风格的 PascalCase 字段名
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceInfo {
    #[serde(alias = "ShortName")]
    pub short_name: String,
    #[serde(alias = "Locale")]
    pub locale: String,
    #[serde(default, alias = "Gender")]
    pub gender: Option<String>,
    #[serde(default, alias = "VoiceType")]
    pub voice_type: Option<String>,
}

/// TTS Engine Port
///
/// 外部合成服务的抽象接口
#[async_trait]
pub trait TtsEnginePort: Send + Sync {
    /// 提交 (文本, 音色) 并返回原始音频字节
    async fn synthesize(&self, request: SynthesisRequest) -> Result<SynthesisResponse, TtsError>;

    /// 获取可用音色列表
    async fn list_voices(&self) -> Result<Vec<VoiceInfo>, TtsError>;

    /// 检查 TTS 服务是否可用
    async fn health_check(&self) -> bool {
        true // 默认实现
    }
}

//! Configuration Types
//!
//! 定义所有配置结构体

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::application::pipeline::PipelineSettings;
use crate::application::ports::{AudioFormat, EncodeSettings, DEFAULT_BITRATE};

/// 应用主配置
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    /// TTS 后端配置
    #[serde(default)]
    pub tts: TtsConfig,

    /// 管线配置
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// 缓存配置
    #[serde(default)]
    pub cache: CacheConfig,

    /// 音频输出配置
    #[serde(default)]
    pub audio: AudioConfig,

    /// 日志配置
    #[serde(default)]
    pub log: LogConfig,
}

impl AppConfig {
    /// 转换为管线参数
    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            max_chunk_chars: self.pipeline.max_chunk_chars,
            batch_size: self.pipeline.batch_size,
            gap: Duration::from_millis(self.pipeline.gap_ms),
            encode: EncodeSettings {
                format: self.audio.output_format,
                bitrate: self.audio.bitrate,
            },
        }
    }
}

/// 合成后端类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TtsBackend {
    /// 远程 HTTP 合成服务
    #[default]
    Http,
    /// 本地离线假后端（生成提示音）
    Fake,
}

impl std::fmt::Display for TtsBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TtsBackend::Http => write!(f, "http"),
            TtsBackend::Fake => write!(f, "fake"),
        }
    }
}

/// TTS 后端配置
#[derive(Debug, Clone, Deserialize)]
pub struct TtsConfig {
    /// 后端类型
    #[serde(default)]
    pub backend: TtsBackend,

    /// TTS 服务基础 URL
    #[serde(default = "default_tts_url")]
    pub url: String,

    /// 请求超时时间（秒）
    #[serde(default = "default_tts_timeout")]
    pub timeout_secs: u64,

    /// 传输层失败的最大重试次数
    #[serde(default)]
    pub max_retries: u32,

    /// 重试间隔（毫秒），按重试次数线性递增
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,
}

fn default_tts_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_tts_timeout() -> u64 {
    120
}

fn default_retry_backoff() -> u64 {
    500
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            backend: TtsBackend::default(),
            url: default_tts_url(),
            timeout_secs: default_tts_timeout(),
            max_retries: 0,
            retry_backoff_ms: default_retry_backoff(),
        }
    }
}

/// 管线配置
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// 单个片段的最大字符数
    #[serde(default = "default_max_chunk_chars")]
    pub max_chunk_chars: usize,

    /// 每批片段数
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// 最大并发合成数
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// 等待合成槽位的超时（秒）
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,

    /// 片段间静音（毫秒）
    #[serde(default = "default_gap_ms")]
    pub gap_ms: u64,

    /// 默认语速
    #[serde(default = "default_speed")]
    pub default_speed: f64,
}

fn default_max_chunk_chars() -> usize {
    1500
}

fn default_batch_size() -> usize {
    10
}

fn default_max_concurrent() -> usize {
    4
}

fn default_acquire_timeout() -> u64 {
    300
}

fn default_gap_ms() -> u64 {
    150
}

fn default_speed() -> f64 {
    1.4
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_chunk_chars: default_max_chunk_chars(),
            batch_size: default_batch_size(),
            max_concurrent: default_max_concurrent(),
            acquire_timeout_secs: default_acquire_timeout(),
            gap_ms: default_gap_ms(),
            default_speed: default_speed(),
        }
    }
}

/// 缓存配置
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// 缓存目录
    #[serde(default = "default_cache_dir")]
    pub dir: PathBuf,

    /// 缓存预算（字节）
    #[serde(default = "default_cache_max_size")]
    pub max_size_bytes: u64,

    /// 退出时是否执行清理
    #[serde(default = "default_cleanup_on_exit")]
    pub cleanup_on_exit: bool,
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("data/cache")
}

fn default_cache_max_size() -> u64 {
    100 * 1024 * 1024 // 100 MiB
}

fn default_cleanup_on_exit() -> bool {
    true
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: default_cache_dir(),
            max_size_bytes: default_cache_max_size(),
            cleanup_on_exit: default_cleanup_on_exit(),
        }
    }
}

/// 音频输出配置
#[derive(Debug, Clone, Deserialize)]
pub struct AudioConfig {
    /// 输出格式
    /// 可选: mp3, opus, wav
    #[serde(default)]
    pub output_format: AudioFormat,

    /// 目标比特率（bps），对 MP3 / Opus 生效
    #[serde(default = "default_bitrate")]
    pub bitrate: u32,
}

fn default_bitrate() -> u32 {
    DEFAULT_BITRATE
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            output_format: AudioFormat::default(),
            bitrate: default_bitrate(),
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// 日志级别
    #[serde(default = "default_log_level")]
    pub level: String,

    /// 是否启用 JSON 格式
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.tts.backend, TtsBackend::Http);
        assert_eq!(config.tts.url, "http://localhost:8000");
        assert_eq!(config.pipeline.max_chunk_chars, 1500);
        assert_eq!(config.pipeline.batch_size, 10);
        assert_eq!(config.cache.dir, PathBuf::from("data/cache"));
        assert_eq!(config.audio.output_format, AudioFormat::Mp3);
        assert_eq!(config.pipeline.gap_ms, 150);
        assert_eq!(config.audio.bitrate, 128_000);
    }

    #[test]
    fn test_pipeline_settings() {
        let mut config = AppConfig::default();
        config.pipeline.gap_ms = 250;
        config.audio.output_format = AudioFormat::Wav;

        let settings = config.pipeline_settings();
        assert_eq!(settings.gap, Duration::from_millis(250));
        assert_eq!(settings.encode.format, AudioFormat::Wav);
        assert_eq!(settings.batch_size, 10);
    }
}

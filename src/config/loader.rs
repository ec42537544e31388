//! Configuration Loader
//!
//! 实现多源配置加载与合并逻辑
//!
//! 优先级（从高到低）：
//! 1. 环境变量
//! 2. 配置文件（narro.toml）
//! 3. 默认值

use config::{Config, ConfigError as ConfigCrateError, Environment, File};
use std::path::Path;
use thiserror::Error;

use super::types::{AppConfig, TtsBackend};
use crate::domain::narration::{MAX_SPEED, MIN_SPEED};

/// 配置加载错误
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

impl From<ConfigCrateError> for ConfigError {
    fn from(err: ConfigCrateError) -> Self {
        ConfigError::LoadError(err.to_string())
    }
}

/// 配置文件搜索路径
const CONFIG_FILE_NAMES: &[&str] = &["narro", "narro.local"];

/// 加载应用配置
///
/// 按优先级从高到低合并配置：
/// 1. 环境变量（前缀 `NARRO_`，层级分隔符 `__`）
/// 2. 配置文件（narro.toml 或 narro.local.toml）
/// 3. 默认值
///
/// # 环境变量示例
/// - `NARRO_TTS__URL=http://tts-server:8000`
/// - `NARRO_TTS__BACKEND=fake`
/// - `NARRO_PIPELINE__MAX_CONCURRENT=3`
/// - `NARRO_CACHE__DIR=/var/cache/narro`
///
/// # 参数
/// - `config_path` - 可选的配置文件路径，如果为 None 则使用默认搜索路径
pub fn load_config_from_path(config_path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let mut builder = Config::builder();

    // 1. 首先设置默认值（最低优先级）
    builder = builder
        .set_default("tts.backend", "http")?
        .set_default("tts.url", "http://localhost:8000")?
        .set_default("tts.timeout_secs", 120)?
        .set_default("tts.max_retries", 0)?
        .set_default("tts.retry_backoff_ms", 500)?
        .set_default("pipeline.max_chunk_chars", 1500)?
        .set_default("pipeline.batch_size", 10)?
        .set_default("pipeline.max_concurrent", 4)?
        .set_default("pipeline.acquire_timeout_secs", 300)?
        .set_default("pipeline.gap_ms", 150)?
        .set_default("pipeline.default_speed", 1.4)?
        .set_default("cache.dir", "data/cache")?
        .set_default("cache.max_size_bytes", 100_u64 * 1024 * 1024)?
        .set_default("cache.cleanup_on_exit", true)?
        .set_default("audio.output_format", "mp3")?
        .set_default("audio.bitrate", 128_000)?
        .set_default("log.level", "info")?
        .set_default("log.json", false)?;

    // 2. 添加配置文件（如果存在）
    if let Some(path) = config_path {
        builder = builder.add_source(File::from(path).required(true));
    } else {
        for name in CONFIG_FILE_NAMES {
            builder = builder.add_source(File::with_name(name).required(false));
        }
    }

    // 3. 添加环境变量（最高优先级）
    // 例如: NARRO_PIPELINE__BATCH_SIZE=5
    builder = builder.add_source(
        Environment::with_prefix("NARRO")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;

    let app_config: AppConfig = config.try_deserialize().map_err(|e| {
        ConfigError::ParseError(format!("Failed to deserialize config: {}", e))
    })?;

    validate_config(&app_config)?;

    Ok(app_config)
}

/// 验证配置有效性
pub fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    if config.tts.backend == TtsBackend::Http && config.tts.url.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "TTS URL cannot be empty".to_string(),
        ));
    }

    if config.pipeline.max_chunk_chars == 0 {
        return Err(ConfigError::ValidationError(
            "max_chunk_chars cannot be 0".to_string(),
        ));
    }

    if config.pipeline.batch_size == 0 {
        return Err(ConfigError::ValidationError(
            "batch_size cannot be 0".to_string(),
        ));
    }

    if config.pipeline.max_concurrent == 0 {
        return Err(ConfigError::ValidationError(
            "max_concurrent cannot be 0".to_string(),
        ));
    }

    let speed = config.pipeline.default_speed;
    if !(MIN_SPEED..=MAX_SPEED).contains(&speed) {
        return Err(ConfigError::ValidationError(format!(
            "default_speed {} outside {}..={}",
            speed, MIN_SPEED, MAX_SPEED
        )));
    }

    if config.audio.bitrate == 0 {
        return Err(ConfigError::ValidationError(
            "Audio bitrate cannot be 0".to_string(),
        ));
    }

    Ok(())
}

/// 打印配置信息（用于启动时日志）
pub fn print_config(config: &AppConfig) {
    tracing::info!("=== Narration Configuration ===");
    tracing::info!("TTS Backend: {}", config.tts.backend);
    if config.tts.backend == TtsBackend::Http {
        tracing::info!("TTS URL: {}", config.tts.url);
        tracing::info!("TTS Timeout: {}s", config.tts.timeout_secs);
        tracing::info!("TTS Max Retries: {}", config.tts.max_retries);
    }
    tracing::info!("Max Chunk Chars: {}", config.pipeline.max_chunk_chars);
    tracing::info!("Batch Size: {}", config.pipeline.batch_size);
    tracing::info!("Max Concurrent: {}", config.pipeline.max_concurrent);
    tracing::info!("Gap: {}ms", config.pipeline.gap_ms);
    tracing::info!("Cache Directory: {:?}", config.cache.dir);
    tracing::info!("Cache Budget: {} bytes", config.cache.max_size_bytes);
    tracing::info!(
        "Output: {} @ {} bps",
        config.audio.output_format,
        config.audio.bitrate
    );
    tracing::info!("Log Level: {}", config.log.level);
    tracing::info!("===============================");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_validation_passes_for_valid_config() {
        let config = AppConfig::default();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validation_error_for_empty_tts_url() {
        let mut config = AppConfig::default();
        config.tts.url = String::new();
        assert!(validate_config(&config).is_err());

        // 假后端不需要 URL
        config.tts.backend = TtsBackend::Fake;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validation_error_for_zero_sizes() {
        let mut config = AppConfig::default();
        config.pipeline.batch_size = 0;
        assert!(validate_config(&config).is_err());

        let mut config = AppConfig::default();
        config.pipeline.max_concurrent = 0;
        assert!(validate_config(&config).is_err());

        let mut config = AppConfig::default();
        config.pipeline.max_chunk_chars = 0;
        assert!(validate_config(&config).is_err());

        let mut config = AppConfig::default();
        config.audio.bitrate = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validation_error_for_speed_out_of_range() {
        let mut config = AppConfig::default();
        config.pipeline.default_speed = 2.5;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_load_from_explicit_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[tts]\nbackend = \"fake\"\n\n[pipeline]\nbatch_size = 3\ngap_ms = 120\n\n[audio]\noutput_format = \"wav\""
        )
        .unwrap();

        let config = load_config_from_path(Some(file.path())).unwrap();
        assert_eq!(config.tts.backend, TtsBackend::Fake);
        assert_eq!(config.pipeline.batch_size, 3);
        assert_eq!(config.pipeline.gap_ms, 120);
        assert_eq!(config.pipeline.max_concurrent, 4);
        assert_eq!(
            config.audio.output_format,
            crate::application::ports::AudioFormat::Wav
        );
    }

    #[test]
    fn test_defaults_fill_missing_keys() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[tts]\nbackend = \"fake\"").unwrap();

        let config = load_config_from_path(Some(file.path())).unwrap();
        assert_eq!(config.pipeline.gap_ms, 150);
        assert_eq!(config.pipeline_settings().gap, std::time::Duration::from_millis(150));
        assert_eq!(
            config.audio.output_format,
            crate::application::ports::AudioFormat::Mp3
        );
        assert_eq!(config.audio.bitrate, 128_000);
    }
}

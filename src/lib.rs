//! Narro - 长文本朗读流水线
//!
//! 架构设计: DDD + Hexagonal Architecture
//!
//! 领域层 (domain/):
//! - Narration Context: 文本片段、音色、语速
//! - Text Chunker: 按句分块
//! - Audio: PCM 值对象与变速、重采样
//!
//! 应用层 (application/):
//! - Ports: 端口定义（TtsEngine, AudioCache, AudioCodec, ProgressReporter）
//! - Pipeline: 合成池、批次调度、音频拼接、导出
//! - VoiceCatalog: 音色目录
//!
//! 基础设施层 (infrastructure/):
//! - Adapters: HTTP/Fake TTS 客户端, Symphonia/Opus 编解码
//! - Persistence: 文件缓存
//! - Events: 进度发布

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;

pub use config::{load_config_from_path, AppConfig};

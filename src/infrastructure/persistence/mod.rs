//! Persistence Layer - 数据持久化
//!
//! 合成音频的文件缓存实现

mod file_cache;

pub use file_cache::{FileAudioCache, FileCacheConfig};

//! Audio Cache Port - 合成音频缓存
//!
//! 定义内容寻址音频缓存的抽象接口，具体实现为每个 key 一个文件的目录存储

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use super::audio_codec::AudioEncoding;
use crate::domain::{normalize_text, SpeedFactor, VoiceId};

/// Audio Cache 错误
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("IO error: {0}")]
    IoError(String),
}

/// key 各组成部分之间的分隔符（U+001F，音色标识中不允许出现）
const KEY_SEPARATOR: char = '\u{1F}';

/// 缓存 key
///
/// md5(normalize(text) ␟ voice_id ␟ speed) 的十六进制摘要。
/// 相同三元组总是得到相同 key。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn derive(text: &str, voice: &VoiceId, speed: SpeedFactor) -> Self {
        let material = format!(
            "{}{sep}{}{sep}{}",
            normalize_text(text),
            voice.as_str(),
            speed.value(),
            sep = KEY_SEPARATOR
        );
        Self(format!("{:x}", md5::compute(material.as_bytes())))
    }

    /// 从已有摘要恢复（读取缓存文件名时使用）
    pub fn from_digest(digest: &str) -> Option<Self> {
        let valid = digest.len() == 32 && digest.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f'));
        valid.then(|| Self(digest.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 缓存条目
///
/// 写入后不可变；同一 key 的覆盖写入内容相同，因此是幂等的
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: CacheKey,
    /// 音频负载（编码由 `encoding` 描述）
    pub payload: Vec<u8>,
    pub encoding: AudioEncoding,
    pub sample_rate: u32,
    pub channels: u16,
    pub created_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(
        key: CacheKey,
        payload: Vec<u8>,
        encoding: AudioEncoding,
        sample_rate: u32,
        channels: u16,
    ) -> Self {
        Self {
            key,
            payload,
            encoding,
            sample_rate,
            channels,
            created_at: Utc::now(),
        }
    }
}

/// 缓存统计信息
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub total_entries: usize,
    pub total_size_bytes: u64,
    pub max_size_bytes: u64,
    pub hit_count: u64,
    pub miss_count: u64,
}

/// 清理结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub removed_entries: usize,
    pub freed_bytes: u64,
    pub remaining_bytes: u64,
}

/// Audio Cache Port
///
/// - `get` 对损坏或不可读的条目返回 `None`（视为未命中），从不报错，也不删除条目
/// - `put` 为单条目原子写入，可被同一批次的多个任务并发调用
/// - `cleanup` 在总大小超过预算时按最后写入时间淘汰最旧的条目
#[async_trait]
pub trait AudioCachePort: Send + Sync {
    async fn get(&self, key: &CacheKey) -> Option<CacheEntry>;

    async fn put(&self, entry: CacheEntry) -> Result<(), CacheError>;

    async fn cleanup(&self) -> Result<CleanupReport, CacheError>;

    async fn stats(&self) -> CacheStats;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::distributions::Alphanumeric;
    use rand::{Rng, SeedableRng};
    use std::collections::HashSet;

    fn voice(id: &str) -> VoiceId {
        VoiceId::new(id).unwrap()
    }

    fn speed(v: f64) -> SpeedFactor {
        SpeedFactor::new(v).unwrap()
    }

    #[test]
    fn test_key_is_deterministic() {
        let a = CacheKey::derive("Hello. World.", &voice("pt-BR-A"), speed(1.4));
        let b = CacheKey::derive("Hello.   World.\n", &voice("pt-BR-A"), speed(1.4));
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 32);
    }

    #[test]
    fn test_key_distinguishes_each_component() {
        let base = CacheKey::derive("texto", &voice("v1"), speed(1.4));
        assert_ne!(base, CacheKey::derive("texto!", &voice("v1"), speed(1.4)));
        assert_ne!(base, CacheKey::derive("texto", &voice("v2"), speed(1.4)));
        assert_ne!(base, CacheKey::derive("texto", &voice("v1"), speed(1.5)));
    }

    #[test]
    fn test_key_separator_prevents_ambiguity() {
        // "ab" + "c" 与 "a" + "bc" 拼接相同，但 key 不同
        let a = CacheKey::derive("ab", &voice("c"), speed(1.0));
        let b = CacheKey::derive("a", &voice("bc"), speed(1.0));
        assert_ne!(a, b);
    }

    #[test]
    fn test_randomized_keys_are_unique() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(42);
        let mut triples = HashSet::new();
        let mut keys = HashSet::new();

        while triples.len() < 20_000 {
            let len = rng.gen_range(1..24);
            let text: String = (&mut rng)
                .sample_iter(&Alphanumeric)
                .take(len)
                .map(char::from)
                .collect();
            let voice_id = format!("voice-{}", rng.gen_range(0..8));
            let speed_value = 1.0 + rng.gen_range(0..=100) as f64 / 100.0;

            if triples.insert((text.clone(), voice_id.clone(), speed_value.to_bits())) {
                let key = CacheKey::derive(&text, &voice(&voice_id), speed(speed_value));
                assert!(keys.insert(key), "collision for {:?}", (text, voice_id, speed_value));
            }
        }
    }

    #[test]
    fn test_from_digest_validation() {
        let key = CacheKey::derive("x", &voice("v"), speed(1.0));
        assert_eq!(CacheKey::from_digest(key.as_str()), Some(key));
        assert!(CacheKey::from_digest("not-a-digest").is_none());
        assert!(CacheKey::from_digest(&"A".repeat(32)).is_none());
    }
}

//! Voice Catalog - 音色目录
//!
//! 首次访问时向后端拉取一次并缓存，之后只有显式刷新才会重新拉取

use std::sync::Arc;

use tokio::sync::RwLock;

use crate::application::ports::{TtsEnginePort, TtsError, VoiceInfo};

/// 音色目录
pub struct VoiceCatalog {
    engine: Arc<dyn TtsEnginePort>,
    voices: RwLock<Option<Arc<Vec<VoiceInfo>>>>,
}

impl VoiceCatalog {
    pub fn new(engine: Arc<dyn TtsEnginePort>) -> Self {
        Self {
            engine,
            voices: RwLock::new(None),
        }
    }

    /// 获取全部音色（已缓存时不访问后端）
    pub async fn voices(&self) -> Result<Arc<Vec<VoiceInfo>>, TtsError> {
        if let Some(voices) = self.voices.read().await.as_ref() {
            return Ok(voices.clone());
        }

        let mut guard = self.voices.write().await;
        // 等待写锁期间可能已有其他调用方完成拉取
        if let Some(voices) = guard.as_ref() {
            return Ok(voices.clone());
        }

        let voices = Arc::new(self.engine.list_voices().await?);
        tracing::info!(count = voices.len(), "Voice catalog loaded");
        *guard = Some(voices.clone());
        Ok(voices)
    }

    /// 丢弃缓存并重新拉取
    pub async fn refresh(&self) -> Result<Arc<Vec<VoiceInfo>>, TtsError> {
        let mut guard = self.voices.write().await;
        let voices = Arc::new(self.engine.list_voices().await?);
        tracing::info!(count = voices.len(), "Voice catalog refreshed");
        *guard = Some(voices.clone());
        Ok(voices)
    }

    /// 按语言区域过滤（不区分大小写，如 `pt-BR`）
    pub async fn by_locale(&self, locale: &str) -> Result<Vec<VoiceInfo>, TtsError> {
        let voices = self.voices().await?;
        Ok(voices
            .iter()
            .filter(|voice| voice.locale.eq_ignore_ascii_case(locale))
            .cloned()
            .collect())
    }

    /// 音色是否存在于目录中
    pub async fn contains(&self, short_name: &str) -> Result<bool, TtsError> {
        let voices = self.voices().await?;
        Ok(voices.iter().any(|voice| voice.short_name == short_name))
    }
}

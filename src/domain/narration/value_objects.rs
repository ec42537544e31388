//! Narration Context - Value Objects

use serde::{Deserialize, Serialize};

use super::NarrationError;

/// 最小语速
pub const MIN_SPEED: f64 = 1.0;
/// 最大语速
pub const MAX_SPEED: f64 = 2.0;

/// 文本片段
///
/// 不变量:
/// - index 从 0 开始连续递增，是唯一的排序依据
/// - content 非空，创建后不可变
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    index: usize,
    content: String,
}

impl TextChunk {
    pub fn new(index: usize, content: impl Into<String>) -> Self {
        Self {
            index,
            content: content.into(),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    /// 字符数（按 Unicode 标量计）
    pub fn char_len(&self) -> usize {
        self.content.chars().count()
    }
}

/// 音色标识
///
/// 来自外部音色目录的不透明字符串，如 `pt-BR-FranciscaNeural`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VoiceId(String);

impl VoiceId {
    pub fn new(id: impl Into<String>) -> Result<Self, NarrationError> {
        let id = id.into();
        let trimmed = id.trim();
        if trimmed.is_empty() || trimmed.chars().any(char::is_control) {
            return Err(NarrationError::InvalidVoice(id));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for VoiceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 语速因子
///
/// 不变量: MIN_SPEED <= value <= MAX_SPEED，且为有限值
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpeedFactor(f64);

impl SpeedFactor {
    pub fn new(value: f64) -> Result<Self, NarrationError> {
        if !value.is_finite() || !(MIN_SPEED..=MAX_SPEED).contains(&value) {
            return Err(NarrationError::SpeedOutOfRange {
                value,
                min: MIN_SPEED,
                max: MAX_SPEED,
            });
        }
        Ok(Self(value))
    }

    /// 原速
    pub fn normal() -> Self {
        Self(MIN_SPEED)
    }

    pub fn value(&self) -> f64 {
        self.0
    }
}

impl std::fmt::Display for SpeedFactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_speed_range() {
        assert!(SpeedFactor::new(1.0).is_ok());
        assert!(SpeedFactor::new(1.4).is_ok());
        assert!(SpeedFactor::new(2.0).is_ok());
        assert!(SpeedFactor::new(0.9).is_err());
        assert!(SpeedFactor::new(2.01).is_err());
        assert!(SpeedFactor::new(f64::NAN).is_err());
    }

    #[test]
    fn test_voice_id_trimmed() {
        let voice = VoiceId::new("  pt-BR-FranciscaNeural ").unwrap();
        assert_eq!(voice.as_str(), "pt-BR-FranciscaNeural");
        assert!(VoiceId::new("   ").is_err());
        assert!(VoiceId::new("a\u{1F}b").is_err());
    }
}

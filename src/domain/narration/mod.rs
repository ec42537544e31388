//! Narration Context - 朗读限界上下文
//!
//! 职责:
//! - 文本片段（TextChunk）
//! - 音色标识与语速因子等值对象

mod errors;
mod value_objects;

pub use errors::NarrationError;
pub use value_objects::{SpeedFactor, TextChunk, VoiceId, MAX_SPEED, MIN_SPEED};

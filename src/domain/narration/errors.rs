//! Narration Context - Errors

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NarrationError {
    #[error("无效的音色标识: {0}")]
    InvalidVoice(String),

    #[error("语速超出范围 [{min}, {max}]: {value}")]
    SpeedOutOfRange { value: f64, min: f64, max: f64 },
}

//! 应用层错误定义
//!
//! 一次管线运行要么产出完整且有序的结果，要么返回唯一一个类型化错误

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::application::ports::{CodecError, TtsError};
use crate::domain::NarrationError;

/// 管线错误
#[derive(Debug, Error)]
pub enum PipelineError {
    /// 输入无效（空文本、片段序号不连续等）
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// 合成后端拒绝或失败
    #[error("Synthesis backend failed on chunk {chunk_index}: {source}")]
    SynthesisBackend {
        chunk_index: usize,
        #[source]
        source: TtsError,
    },

    /// 等待合成槽位超时
    #[error("No synthesis slot freed within {waited:?} (chunk {chunk_index})")]
    PoolExhaustionTimeout { chunk_index: usize, waited: Duration },

    /// 解码或编码失败
    #[error("Assembly failed: {0}")]
    Assembly(#[from] AssemblyError),

    /// 写出产物失败
    #[error("Failed to export {}: {source}", path.display())]
    Export {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// 运行被取消
    #[error("Pipeline run cancelled")]
    Cancelled,
}

impl PipelineError {
    /// 创建输入无效错误
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// 失败所在的片段序号（若与具体片段相关）
    pub fn chunk_index(&self) -> Option<usize> {
        match self {
            Self::SynthesisBackend { chunk_index, .. }
            | Self::PoolExhaustionTimeout { chunk_index, .. } => Some(*chunk_index),
            Self::Assembly(AssemblyError::SegmentDecode { chunk_index, .. })
            | Self::Assembly(AssemblyError::InvalidSegment { chunk_index, .. }) => {
                Some(*chunk_index)
            }
            _ => None,
        }
    }

    /// 失败所在阶段，用于用户可见的错误描述
    pub fn stage(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "input",
            Self::SynthesisBackend { .. } | Self::PoolExhaustionTimeout { .. } => "synthesis",
            Self::Assembly(AssemblyError::SegmentDecode { .. }) => "decoding",
            Self::Assembly(_) => "assembly",
            Self::Export { .. } => "export",
            Self::Cancelled => "cancelled",
        }
    }
}

impl From<NarrationError> for PipelineError {
    fn from(err: NarrationError) -> Self {
        Self::InvalidInput(err.to_string())
    }
}

/// 组装错误
#[derive(Debug, Error)]
pub enum AssemblyError {
    #[error("Nothing to assemble")]
    EmptyPlan,

    #[error("Failed to decode segment {chunk_index}: {source}")]
    SegmentDecode {
        chunk_index: usize,
        #[source]
        source: CodecError,
    },

    #[error("Invalid segment {chunk_index}: {reason}")]
    InvalidSegment { chunk_index: usize, reason: String },

    #[error("Failed to encode artifact: {0}")]
    Encode(#[source] CodecError),

    #[error("Encoder task failed: {0}")]
    Join(String),
}

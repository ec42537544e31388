//! Infrastructure Adapters
//!
//! 六边形架构的适配器实现

pub mod codec;
pub mod tts;

pub use codec::*;
pub use tts::*;

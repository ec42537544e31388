//! Infrastructure Layer - 基础设施层
//!
//! 提供所有端口的具体实现

pub mod adapters;
pub mod events;
pub mod persistence;

pub use adapters::{FakeTtsClient, HttpTtsClient, SymphoniaCodec};
pub use events::{ProgressPublisher, TracingProgressReporter};
pub use persistence::FileAudioCache;

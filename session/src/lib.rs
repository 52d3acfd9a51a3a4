pub mod chapters;
pub mod config;
pub mod controller;
pub mod engine;
pub mod error;
pub mod item;
pub mod latest;
pub mod machine;
pub mod overlay;
pub mod report;
pub mod ticks;
pub mod tracks;
mod util;

pub use config::SessionConfig;
pub use controller::{spawn_session, SessionControls, SessionHandle};
pub use engine::{engine_channel, EngineSink, EngineState, MediaEngine};
pub use error::{EngineError, ReportError, ReportKind, SessionError, SessionResult};
pub use item::{ItemDescriptor, ItemId, PlaybackItem};
pub use machine::{PlaybackState, SessionEvent, Snapshot};
pub use report::ReportClient;
pub use ticks::Ticks;

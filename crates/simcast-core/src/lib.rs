// Capture and lifecycle engine: device registry, capture sessions, frame
// distribution over HTTP.
pub mod config;
pub mod engine;
pub mod error;
pub mod frame;
pub mod process;
pub mod registry;
pub mod server;
pub mod session;
pub mod source;

pub use config::EngineConfig;
pub use engine::{CaptureStarted, Engine};
pub use error::EngineError;
pub use frame::{FrameBus, FrameEvent};
pub use session::{CaptureInfo, CaptureManager, SessionContext, SessionPhase};
pub use source::{CaptureStrategy, FrameSource};

pub mod session;
pub mod source;
pub mod synthetic;

pub use session::{CaptureConfig, CaptureSession, SessionState};
pub use source::{CaptureSource, MediaFrame, SourceFactory};
pub use synthetic::{SyntheticConfig, SyntheticSource, SyntheticSourceFactory};

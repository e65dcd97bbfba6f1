use tokio::sync::mpsc;

use crate::error::CourierError;

/// Media sample data (16-bit PCM, interleaved)
#[derive(Debug, Clone)]
pub struct MediaFrame {
    /// Raw samples (i16 PCM, interleaved)
    pub samples: Vec<i16>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u16,
    /// Timestamp in milliseconds since capture started
    pub timestamp_ms: u64,
}

impl MediaFrame {
    /// Frame duration derived from sample count and rate.
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 || self.channels == 0 {
            return 0;
        }
        let frames = self.samples.len() as u64 / self.channels as u64;
        frames * 1000 / self.sample_rate as u64
    }
}

/// Capture capability supplying the continuous sample stream.
///
/// Real platform sources (hardware devices, OS capture services) live outside
/// this crate and are injected where a source is needed; the crate ships a
/// synthetic source for demos and tests.
#[async_trait::async_trait]
pub trait CaptureSource: Send + Sync {
    /// Verify the capture permission before acquiring the stream.
    ///
    /// Returns `CourierError::PermissionDenied` when the platform refuses
    /// access; user action is required before retrying.
    async fn check_permission(&self) -> Result<(), CourierError>;

    /// Start capturing.
    ///
    /// Returns a channel receiver that will receive media frames. The
    /// channel closing before `stop` is called signals a stream failure.
    async fn start(&mut self) -> Result<mpsc::Receiver<MediaFrame>, CourierError>;

    /// Stop capturing and release the stream.
    async fn stop(&mut self) -> Result<(), CourierError>;

    /// Check if the source is currently capturing
    fn is_capturing(&self) -> bool;

    /// Get source name for logging
    fn name(&self) -> &str;
}

/// Creates capture sources on demand, one per recording session.
pub trait SourceFactory: Send + Sync {
    fn create(&self) -> Result<Box<dyn CaptureSource>, CourierError>;
}

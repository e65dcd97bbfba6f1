use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::source::{CaptureSource, MediaFrame, SourceFactory};
use crate::error::CourierError;

/// Configuration for the synthetic tone source
#[derive(Debug, Clone)]
pub struct SyntheticConfig {
    pub sample_rate: u32,
    pub channels: u16,
    /// Samples-per-frame expressed as a duration (default: 100ms)
    pub frame_duration_ms: u64,
    /// Tone frequency in Hz
    pub tone_hz: f32,
    /// Stop producing after this much media time; None runs until stopped
    pub total_duration_ms: Option<u64>,
    /// Pace frames in wall-clock time. Off, the whole stream is delivered
    /// as fast as the receiver drains it, with timestamps still advancing
    /// in media time.
    pub realtime: bool,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            channels: 1,
            frame_duration_ms: 100,
            tone_hz: 440.0,
            total_duration_ms: None,
            realtime: false,
        }
    }
}

/// Deterministic sine-tone capture source.
///
/// Stands in for a platform capture stream in demos and tests: frame
/// timestamps advance in media time, so chunk rotation behaves identically
/// whether or not frames are paced in real time.
pub struct SyntheticSource {
    config: SyntheticConfig,
    running: Arc<AtomicBool>,
}

impl SyntheticSource {
    pub fn new(config: SyntheticConfig) -> Self {
        Self {
            config,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    fn frame_at(config: &SyntheticConfig, timestamp_ms: u64) -> MediaFrame {
        let frames_per_buffer =
            (config.sample_rate as u64 * config.frame_duration_ms / 1000) as usize;
        let mut samples = Vec::with_capacity(frames_per_buffer * config.channels as usize);

        for n in 0..frames_per_buffer {
            let t = (timestamp_ms as f32 / 1000.0)
                + (n as f32 / config.sample_rate as f32);
            let value = (t * config.tone_hz * 2.0 * std::f32::consts::PI).sin();
            let sample = (value * i16::MAX as f32 * 0.3) as i16;
            for _ in 0..config.channels {
                samples.push(sample);
            }
        }

        MediaFrame {
            samples,
            sample_rate: config.sample_rate,
            channels: config.channels,
            timestamp_ms,
        }
    }
}

#[async_trait::async_trait]
impl CaptureSource for SyntheticSource {
    async fn check_permission(&self) -> Result<(), CourierError> {
        // Nothing to ask the platform for
        Ok(())
    }

    async fn start(&mut self) -> Result<mpsc::Receiver<MediaFrame>, CourierError> {
        let (tx, rx) = mpsc::channel(32);

        self.running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.running);
        let config = self.config.clone();

        info!(
            "Synthetic source started ({}Hz, {} channels, {}Hz tone)",
            config.sample_rate, config.channels, config.tone_hz
        );

        tokio::spawn(async move {
            let mut timestamp_ms = 0u64;

            while running.load(Ordering::SeqCst) {
                if let Some(total) = config.total_duration_ms {
                    if timestamp_ms >= total {
                        // Media exhausted; hold the stream open until the
                        // session stops us, a closed channel means failure
                        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                        continue;
                    }
                }

                let frame = SyntheticSource::frame_at(&config, timestamp_ms);
                if tx.send(frame).await.is_err() {
                    // Receiver gone, recording loop ended
                    break;
                }

                timestamp_ms += config.frame_duration_ms;

                if config.realtime {
                    tokio::time::sleep(std::time::Duration::from_millis(
                        config.frame_duration_ms,
                    ))
                    .await;
                }
            }

            debug!("Synthetic source finished at {}ms", timestamp_ms);
        });

        Ok(rx)
    }

    async fn stop(&mut self) -> Result<(), CourierError> {
        self.running.store(false, Ordering::SeqCst);
        info!("Synthetic source stopped");
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "synthetic"
    }
}

/// Factory producing one synthetic source per session.
pub struct SyntheticSourceFactory {
    pub config: SyntheticConfig,
}

impl SyntheticSourceFactory {
    pub fn new(config: SyntheticConfig) -> Self {
        Self { config }
    }
}

impl SourceFactory for SyntheticSourceFactory {
    fn create(&self) -> Result<Box<dyn CaptureSource>, CourierError> {
        Ok(Box::new(SyntheticSource::new(self.config.clone())))
    }
}

//! Audio processing crate for EchoScribe
//!
//! Provides capture, the session container, segmentation and file I/O.
//!
//! # Features
//! - **Microphone capture** via cpal (cross-platform)
//! - **System audio capture** behind a trait; platform drivers feed a
//!   channel of per-channel sample buffers
//! - **Session container**: stereo MP3 through an FFmpeg pipe, with
//!   random-access range extraction for transcription
//! - **Chunk segmenter**: pause-driven splitting of the live stream
//! - **Waveform envelope** for visualization caches

pub mod capture;
pub mod container;
pub mod file_io;
pub mod resampling;
pub mod segmenter;
pub mod waveform;

pub use capture::{
    list_input_devices, rms_level, AudioChannel, ChannelData, MicCapture, PipeSystemCapture,
    SystemAudioCapture, SystemCaptureConfig,
};
pub use container::{ContainerReader, ContainerWriter};
pub use segmenter::{ChunkEvent, ChunkSegmenter, SegmenterState, VadConfig, VadMode};

/// Resample audio to target rate
pub fn resample(samples: &[f32], source_rate: u32, target_rate: u32) -> anyhow::Result<Vec<f32>> {
    resampling::resample(samples, source_rate, target_rate)
}

/// Compute RMS over a sample buffer
pub fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Check whether a buffer is effectively silent.
///
/// Feeding silent channels to ASR produces hallucinated filler text, so
/// callers skip transcription below this floor.
pub fn is_silent(samples: &[f32], threshold: Option<f32>) -> bool {
    let threshold = threshold.unwrap_or(1e-4);
    calculate_rms(samples) < threshold
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calculate_rms() {
        assert!(calculate_rms(&[]) < f32::EPSILON);
        let loud = vec![0.5f32; 100];
        assert!(calculate_rms(&loud) > 0.4);
    }

    #[test]
    fn test_is_silent() {
        assert!(is_silent(&vec![0.0f32; 1000], None));
        assert!(!is_silent(&vec![0.1f32; 1000], None));
    }
}

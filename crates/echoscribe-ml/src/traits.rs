//! ML engine traits

use echoscribe_types::{SpeakerSegment, TranscriptSegment, TranscriptionResult};
use anyhow::Result;

use crate::diarization::DiarizationResult;

/// Trait for transcription engines
pub trait TranscriptionEngine: Send + Sync {
    /// Engine name
    fn name(&self) -> &str;

    /// Transcribe audio samples and return result
    fn transcribe(&self, samples: &[f32]) -> Result<TranscriptionResult>;

    /// Transcribe audio samples and return segments with timestamps
    fn transcribe_with_segments(&self, samples: &[f32]) -> Result<Vec<TranscriptSegment>>;

    /// Supported languages
    fn supported_languages(&self) -> &[&str];

    /// Set transcription language
    fn set_language(&mut self, language: &str) -> Result<()>;

    /// Set hotwords to bias decoding (interpretation is engine-specific)
    fn set_hotwords(&mut self, hotwords: &[String]) -> Result<()>;
}

/// Trait for diarization engines
pub trait DiarizationEngine: Send + Sync {
    /// Engine name
    fn name(&self) -> &str;

    /// Diarize audio samples and return speaker segments
    fn diarize(&self, samples: &[f32]) -> Result<Vec<SpeakerSegment>>;

    /// Diarize and return segments plus one embedding per unique speaker
    fn diarize_with_embeddings(&self, samples: &[f32]) -> Result<DiarizationResult>;

    /// Get number of detected speakers from last diarization
    fn num_speakers(&self) -> usize;
}

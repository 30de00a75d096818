//! ML crate for EchoScribe
//!
//! Speech detection, transcription engines, hybrid merging, diarization,
//! speaker identity and dialogue assembly.

pub mod arbiter;
pub mod ctc;
pub mod dialogue;
pub mod diarization;
pub mod engine_manager;
pub mod filters;
pub mod hybrid;
pub mod session_speakers;
pub mod speaker_assign;
pub mod timemap;
pub mod traits;
pub mod vad;
pub mod voiceprint;
pub mod whisper;

pub use arbiter::{OllamaArbiter, TranscriptArbiter};
pub use ctc::CtcEngine;
pub use dialogue::merge_dialogue;
pub use diarization::{
    consolidate_segments, DiarizationConfig, DiarizationResult, PipeDiarizationEngine,
};
pub use engine_manager::{get_or_create_engine_cached, EngineKind, EngineManager};
pub use filters::{auto_tune, probe_quality, FilterChain, FilterSettings, QualityReport};
pub use hybrid::{HybridConfig, HybridMode, HybridResult, HybridTranscriber};
pub use session_speakers::SessionSpeakerRegistry;
pub use speaker_assign::apply_speakers;
pub use timemap::{compress_regions, TimestampMap};
pub use traits::{DiarizationEngine, TranscriptionEngine};
pub use vad::{SpeechDetector, VadMethod, VadSettings};
pub use voiceprint::{
    cosine_similarity, MatchConfidence, MatchResult, VoicePrint, VoicePrintRegistry,
    VoicePrintThresholds,
};
pub use whisper::WhisperEngine;

//! Shared types for EchoScribe
//!
//! This crate contains the data model used across the EchoScribe
//! pipeline: sessions, chunks, transcript segments and the control
//! channel protocol.

use serde::{Deserialize, Serialize};

pub mod protocol;

/// Sample rate of the session container file (Hz).
///
/// Chosen to match the native rate of the voice-isolation capture path;
/// a port may elect 48 kHz, the value is recorded per session in meta.json.
pub const RECORD_SAMPLE_RATE: u32 = 24_000;

/// Sample rate expected by ASR and diarization models (Hz).
pub const ASR_SAMPLE_RATE: u32 = 16_000;

/// Speaker label carried by everything transcribed from the microphone.
pub const MIC_SPEAKER: &str = "You";

/// Label for the N-th diarized system-channel speaker (1-based).
pub fn interlocutor_label(speaker_id: i32) -> String {
    format!("Interlocutor {}", speaker_id)
}

/// All labels a session speaker may appear under in persisted segments:
/// the numbered label and the current display name if one was assigned.
pub fn speaker_aliases(speaker_id: i32, display_name: Option<&str>) -> Vec<String> {
    let mut aliases = vec![interlocutor_label(speaker_id)];
    if let Some(name) = display_name {
        if !name.is_empty() {
            aliases.push(name.to_string());
        }
    }
    aliases
}

/// Check if a speaker label refers to the microphone user.
pub fn is_mic_speaker(speaker: &str) -> bool {
    speaker == "mic" || speaker == MIC_SPEAKER
}

/// Transcription result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionResult {
    /// Full transcribed text
    pub text: String,
    /// Segments with timestamps
    pub segments: Vec<TranscriptSegment>,
    /// Detected language (ISO 639-1 code)
    pub language: Option<String>,
    /// Processing time in milliseconds
    pub processing_time_ms: u64,
    /// Real-time factor (audio_duration / processing_time)
    pub rtf: f32,
}

/// A segment of transcribed text with timing information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptSegment {
    /// Start time in milliseconds
    pub start: i64,
    /// End time in milliseconds
    pub end: i64,
    /// Transcribed text
    pub text: String,
    /// Speaker label (e.g. "You", "Interlocutor 1")
    pub speaker: Option<String>,
    /// Word-level timestamps
    pub words: Vec<TranscriptWord>,
    /// Confidence score (0.0 - 1.0)
    pub confidence: f32,
}

/// A single word with timing information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptWord {
    /// Start time in milliseconds
    pub start: i64,
    /// End time in milliseconds
    pub end: i64,
    /// The word text
    pub text: String,
    /// Confidence score (0.0 - 1.0)
    pub confidence: f32,
    /// Speaker label, set once diarization has been applied
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
}

/// A detected region of speech, local to one channel of one chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeechRegion {
    /// Start time in milliseconds
    pub start_ms: i64,
    /// End time in milliseconds
    pub end_ms: i64,
}

impl SpeechRegion {
    pub fn duration_ms(&self) -> i64 {
        self.end_ms - self.start_ms
    }
}

/// Speaker segment from diarization
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeakerSegment {
    /// Start time in seconds
    pub start: f32,
    /// End time in seconds
    pub end: f32,
    /// Speaker ID (1, 2, 3...)
    pub speaker: i32,
}

/// Speaker embedding produced by diarization
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeakerEmbedding {
    /// Local speaker ID within the diarized buffer
    pub speaker: i32,
    /// Embedding vector (256-dimensional, unit L2 norm)
    pub embedding: Vec<f32>,
    /// Total speech duration for this speaker (seconds)
    pub duration: f64,
}

/// Session lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Recording,
    Completed,
    Failed,
}

/// Chunk lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkStatus {
    Pending,
    Transcribing,
    Completed,
    Failed,
}

/// A contiguous audio segment of a session, the unit of transcription
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    pub id: String,
    pub session_id: String,
    /// Zero-based, dense, monotonic within the session
    pub index: i32,
    pub status: ChunkStatus,
    /// Start relative to session start (ms)
    pub start_ms: i64,
    /// End relative to session start (ms)
    pub end_ms: i64,
    pub is_stereo: bool,
    /// Combined text over both channels
    #[serde(default)]
    pub transcription: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mic_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sys_text: Option<String>,
    #[serde(default)]
    pub mic_segments: Vec<TranscriptSegment>,
    #[serde(default)]
    pub sys_segments: Vec<TranscriptSegment>,
    /// Speaker-labeled, time-ordered merge of both channels
    #[serde(default)]
    pub dialogue: Vec<TranscriptSegment>,
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcribed_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Chunk {
    /// New pending chunk for the given session-relative range.
    pub fn new(session_id: &str, index: i32, start_ms: i64, end_ms: i64, is_stereo: bool) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            index,
            status: ChunkStatus::Pending,
            start_ms,
            end_ms,
            is_stereo,
            transcription: String::new(),
            mic_text: None,
            sys_text: None,
            mic_segments: Vec::new(),
            sys_segments: Vec::new(),
            dialogue: Vec::new(),
            created_at: chrono::Utc::now().to_rfc3339(),
            transcribed_at: None,
            error: None,
        }
    }

    pub fn duration_ms(&self) -> i64 {
        self.end_ms - self.start_ms
    }
}

/// A recording with all its metadata, audio, chunks and derived data
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    /// ISO-8601
    pub start_time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
    pub status: SessionStatus,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub model: String,
    /// Storage directory on disk
    pub data_dir: String,
    /// Total duration in milliseconds
    #[serde(default)]
    pub total_duration: u64,
    /// Container sample rate (Hz)
    #[serde(default)]
    pub sample_rate: u32,
    /// Per-channel samples written to the container
    #[serde(default)]
    pub sample_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default)]
    pub chunks: Vec<Chunk>,
}

/// Session-scoped record of a diarized speaker
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSpeakerProfile {
    pub session_id: String,
    /// 1-based, stable within the session
    pub speaker_id: i32,
    /// Accumulated embedding (unit L2 norm)
    pub embedding: Vec<f32>,
    /// Cumulative speech duration in seconds
    pub total_duration: f64,
    /// Name recognized from the global voice-print registry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recognized_name: Option<String>,
    /// Backing voice-print when matched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voiceprint_id: Option<String>,
}

/// Audio input device information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioDevice {
    /// Device ID
    pub id: String,
    /// Human-readable device name
    pub name: String,
    /// Whether this is the default device
    pub is_default: bool,
    /// Number of input channels
    pub channels: u16,
    /// Sample rate in Hz
    pub sample_rate: u32,
}

/// Recording state snapshot returned by stop
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingState {
    pub session_id: String,
    /// Duration in milliseconds
    pub duration_ms: u64,
    /// Number of samples recorded (per channel)
    pub sample_count: u64,
}

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Transcription language (ISO 639-1 code, or "auto")
    pub language: String,
    /// Active model ID
    pub model_id: String,
    /// Hotwords for improved recognition
    pub hotwords: Vec<String>,
    /// Capture system audio alongside the microphone
    #[serde(default)]
    pub capture_system: bool,
    /// Enable speaker diarization for the sys channel
    #[serde(default)]
    pub enable_diarization: bool,
    /// VAD method: "energy", "neural" or "auto"
    #[serde(default)]
    pub vad_method: String,
    /// Chunking mode: "auto", "compression", "per_region" or "off"
    #[serde(default)]
    pub vad_mode: String,
    /// Enable hybrid transcription (dual-model)
    #[serde(default)]
    pub hybrid_enabled: bool,
    /// Secondary model ID for hybrid transcription
    #[serde(default)]
    pub hybrid_secondary_model_id: String,
    /// Hybrid mode: "primary_only", "low_confidence" or "full_compare"
    #[serde(default)]
    pub hybrid_mode: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            language: "auto".to_string(),
            model_id: "ggml-large-v3-turbo".to_string(),
            hotwords: vec![],
            capture_system: true,
            enable_diarization: true,
            vad_method: "auto".to_string(),
            vad_mode: "auto".to_string(),
            hybrid_enabled: false,
            hybrid_secondary_model_id: String::new(),
            hybrid_mode: "low_confidence".to_string(),
        }
    }
}

/// Voice-print summary exposed over the control channel (embeddings
/// themselves never leave the registry)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoicePrintInfo {
    pub id: String,
    pub name: String,
    pub created_at: String,
    pub last_seen_at: String,
    pub seen_count: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Model information reported over the control channel
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    /// Model ID (e.g., "ggml-base")
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Engine type ("whisper", "ctc", "diarization", "vad")
    pub engine: String,
    /// Size in bytes
    pub size_bytes: u64,
    /// Supported languages
    pub languages: Vec<String>,
    #[serde(default)]
    pub recommended: bool,
    /// "downloaded" or "not_downloaded"
    pub status: String,
    /// Path to the model file once present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_speaker_aliases_cover_label_and_display_name() {
        let aliases = speaker_aliases(2, Some("Alice"));
        assert!(aliases.contains(&"Interlocutor 2".to_string()));
        assert!(aliases.contains(&"Alice".to_string()));
        assert_eq!(speaker_aliases(2, None).len(), 1);
    }

    #[test]
    fn test_is_mic_speaker() {
        assert!(is_mic_speaker("You"));
        assert!(is_mic_speaker("mic"));
        assert!(!is_mic_speaker("Interlocutor 1"));
    }

    #[test]
    fn test_chunk_round_trips_through_json() {
        let chunk = Chunk::new("s1", 0, 0, 30_000, true);
        let json = serde_json::to_string(&chunk).unwrap();
        let back: Chunk = serde_json::from_str(&json).unwrap();
        assert_eq!(back.index, 0);
        assert_eq!(back.status, ChunkStatus::Pending);
        assert_eq!(back.end_ms, 30_000);
    }
}

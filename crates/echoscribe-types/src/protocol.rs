//! Control channel protocol
//!
//! One bidirectional stream per connected client, carrying tagged JSON
//! messages: [`Command`] in, [`Event`] out. The transport (stdio pipe,
//! socket) is up to the host process.

use crate::{AudioDevice, Chunk, ModelInfo, Session, SessionSpeakerProfile, VoicePrintInfo};
use serde::{Deserialize, Serialize};

/// Inbound command
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    GetDevices,
    GetModels,
    SetActiveModel {
        model_id: String,
    },
    StartSession {
        #[serde(default)]
        language: Option<String>,
        #[serde(default)]
        model: Option<String>,
        #[serde(default)]
        mic_device: Option<String>,
        #[serde(default)]
        capture_system: bool,
        #[serde(default)]
        vad_mode: Option<String>,
        #[serde(default)]
        hybrid_enabled: bool,
        #[serde(default)]
        hybrid_secondary_model: Option<String>,
        #[serde(default)]
        hybrid_mode: Option<String>,
    },
    StopSession,
    SetChannelMute {
        channel: String,
        muted: bool,
    },
    ListSessions,
    GetSession {
        session_id: String,
    },
    DeleteSession {
        session_id: String,
    },
    SetSessionTitle {
        session_id: String,
        title: String,
    },
    RetranscribeChunk {
        session_id: String,
        chunk_id: String,
        #[serde(default)]
        model: Option<String>,
        #[serde(default)]
        language: Option<String>,
    },
    RetranscribeFull {
        session_id: String,
        #[serde(default)]
        model: Option<String>,
        #[serde(default)]
        language: Option<String>,
        #[serde(default)]
        diarization_enabled: bool,
    },
    CancelFullTranscription {
        session_id: String,
    },
    EnableDiarization {
        #[serde(default)]
        backend: Option<String>,
        #[serde(default)]
        provider: Option<String>,
        #[serde(default)]
        segmentation_path: Option<String>,
        #[serde(default)]
        embedding_path: Option<String>,
    },
    DisableDiarization,
    GetSessionSpeakers {
        session_id: String,
    },
    RenameSessionSpeaker {
        session_id: String,
        local_speaker_id: i32,
        new_name: String,
        #[serde(default)]
        save_as_voiceprint: bool,
    },
    ListVoiceprints,
    RenameVoiceprint {
        voiceprint_id: String,
        name: String,
    },
    DeleteVoiceprint {
        voiceprint_id: String,
    },
    ImportFile {
        path: String,
        #[serde(default)]
        model: Option<String>,
        #[serde(default)]
        language: Option<String>,
    },
    Shutdown,
}

/// Outbound event
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    SessionStarted {
        session: Session,
    },
    SessionStopped {
        session_id: String,
    },
    SessionImported {
        session: Session,
    },
    ChunkCreated {
        session_id: String,
        chunk: Chunk,
    },
    ChunkTranscribing {
        session_id: String,
        chunk_id: String,
        chunk_index: i32,
    },
    ChunkTranscribed {
        session_id: String,
        chunk: Chunk,
    },
    ChunkError {
        session_id: String,
        chunk_id: String,
        error: String,
    },
    AudioLevel {
        mic_level: f32,
        sys_level: f32,
        /// Elapsed recording time in seconds
        duration: f64,
        mic_muted: bool,
        sys_muted: bool,
    },
    FullTranscriptionStarted {
        session_id: String,
        total_chunks: usize,
    },
    FullTranscriptionProgress {
        session_id: String,
        chunk_index: i32,
        total_chunks: usize,
    },
    FullTranscriptionCompleted {
        session_id: String,
    },
    FullTranscriptionCancelled {
        session_id: String,
    },
    FullTranscriptionError {
        session_id: String,
        error: String,
    },
    SpeakersUpdated {
        session_id: String,
        speakers: Vec<SessionSpeakerProfile>,
    },
    Devices {
        devices: Vec<AudioDevice>,
    },
    Models {
        models: Vec<ModelInfo>,
    },
    Sessions {
        sessions: Vec<Session>,
    },
    Session {
        session: Session,
    },
    Voiceprints {
        voiceprints: Vec<VoicePrintInfo>,
    },
    Error {
        message: String,
    },
    Ok,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_tag_round_trip() {
        let json = r#"{"type":"rename_session_speaker","session_id":"s1","local_speaker_id":2,"new_name":"Alice"}"#;
        let cmd: Command = serde_json::from_str(json).unwrap();
        match cmd {
            Command::RenameSessionSpeaker {
                local_speaker_id,
                save_as_voiceprint,
                ..
            } => {
                assert_eq!(local_speaker_id, 2);
                assert!(!save_as_voiceprint);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = Event::SessionStopped {
            session_id: "s1".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"session_stopped""#));
    }
}

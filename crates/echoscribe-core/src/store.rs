//! Session store
//!
//! Exclusive owner of sessions and their chunks. Everything else reads
//! value snapshots and mutates through named operations; all mutations
//! go through the store lock, chunk indices are assigned under it, and
//! observers are notified only after the change hit disk.
//!
//! Persistence layout, one directory per session:
//!   meta.json               session fields minus chunks
//!   chunks/NNN.json         one file per chunk, zero-padded index
//!   full.mp3                stereo container (left = mic, right = sys)
//!   summary.txt             optional
//!   speaker_profiles.json   optional
//!   waveform.json           optional

use crate::error::StoreError;
use echoscribe_types::{
    speaker_aliases, Chunk, ChunkStatus, Session, SessionStatus, TranscriptSegment,
};
use echoscribe_ml::merge_dialogue;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Change notifications, fired after successful persistence.
/// `on_chunk_ready` fires strictly in chunk-index order.
pub trait SessionObserver: Send + Sync {
    fn on_chunk_ready(&self, _session_id: &str, _chunk: &Chunk) {}
    fn on_chunk_transcribed(&self, _session_id: &str, _chunk: &Chunk) {}
}

/// Parameters for a new session
#[derive(Debug, Clone)]
pub struct NewSessionConfig {
    pub language: String,
    pub model: String,
    pub sample_rate: u32,
}

/// meta.json shape (session minus chunks)
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionMeta {
    id: String,
    start_time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    end_time: Option<String>,
    status: SessionStatus,
    #[serde(default)]
    language: String,
    #[serde(default)]
    model: String,
    #[serde(default)]
    total_duration: u64,
    #[serde(default)]
    sample_rate: u32,
    #[serde(default)]
    sample_count: u64,
    #[serde(default)]
    chunks_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    title: Option<String>,
}

impl SessionMeta {
    fn of(session: &Session) -> Self {
        Self {
            id: session.id.clone(),
            start_time: session.start_time.clone(),
            end_time: session.end_time.clone(),
            status: session.status,
            language: session.language.clone(),
            model: session.model.clone(),
            total_duration: session.total_duration,
            sample_rate: session.sample_rate,
            sample_count: session.sample_count,
            chunks_count: session.chunks.len(),
            title: session.title.clone(),
        }
    }
}

/// The store
pub struct SessionStore {
    sessions_dir: PathBuf,
    sessions: RwLock<Vec<Session>>,
    observers: RwLock<Vec<Arc<dyn SessionObserver>>>,
}

impl SessionStore {
    /// Open the store, loading every session found on disk
    pub fn new(sessions_dir: PathBuf) -> Self {
        let sessions = load_sessions_from_disk(&sessions_dir);
        tracing::info!(
            "SessionStore: loaded {} sessions from {:?}",
            sessions.len(),
            sessions_dir
        );
        Self {
            sessions_dir,
            sessions: RwLock::new(sessions),
            observers: RwLock::new(Vec::new()),
        }
    }

    pub fn add_observer(&self, observer: Arc<dyn SessionObserver>) {
        self.observers.write().push(observer);
    }

    pub fn sessions_dir(&self) -> &Path {
        &self.sessions_dir
    }

    pub fn session_dir(&self, session_id: &str) -> PathBuf {
        self.sessions_dir.join(session_id)
    }

    pub fn container_path(&self, session_id: &str) -> PathBuf {
        self.session_dir(session_id).join("full.mp3")
    }

    fn chunk_path(&self, session_id: &str, index: i32) -> PathBuf {
        self.session_dir(session_id)
            .join("chunks")
            .join(format!("{:03}.json", index))
    }

    /// Create a recording session. Only one may be recording at a time.
    pub fn create_session(&self, config: NewSessionConfig) -> Result<Session, StoreError> {
        let mut sessions = self.sessions.write();

        if sessions
            .iter()
            .any(|s| s.status == SessionStatus::Recording)
        {
            return Err(StoreError::AlreadyRecording);
        }

        let id = uuid::Uuid::new_v4().to_string();
        let now = chrono::Utc::now();
        let data_dir = self.sessions_dir.join(&id);

        std::fs::create_dir_all(data_dir.join("chunks")).map_err(StoreError::persistence)?;

        let session = Session {
            id: id.clone(),
            start_time: now.to_rfc3339(),
            end_time: None,
            status: SessionStatus::Recording,
            language: config.language,
            model: config.model,
            data_dir: data_dir.to_string_lossy().to_string(),
            total_duration: 0,
            sample_rate: config.sample_rate,
            sample_count: 0,
            title: Some(format!("Recording {}", now.format("%d.%m %H:%M"))),
            summary: None,
            chunks: Vec::new(),
        };

        write_json(&data_dir.join("meta.json"), &SessionMeta::of(&session))
            .map_err(StoreError::persistence)?;

        sessions.push(session.clone());
        tracing::info!("Session created: {}", id);
        Ok(session)
    }

    /// Create a session for an imported audio file. Unlike a recording
    /// session it is born `completed` and never conflicts with an active
    /// recording.
    pub fn create_imported_session(
        &self,
        config: NewSessionConfig,
        total_duration_ms: u64,
        sample_count: u64,
    ) -> Result<Session, StoreError> {
        let mut sessions = self.sessions.write();

        let id = uuid::Uuid::new_v4().to_string();
        let now = chrono::Utc::now();
        let data_dir = self.sessions_dir.join(&id);

        std::fs::create_dir_all(data_dir.join("chunks")).map_err(StoreError::persistence)?;

        let session = Session {
            id: id.clone(),
            start_time: now.to_rfc3339(),
            end_time: Some(now.to_rfc3339()),
            status: SessionStatus::Completed,
            language: config.language,
            model: config.model,
            data_dir: data_dir.to_string_lossy().to_string(),
            total_duration: total_duration_ms,
            sample_rate: config.sample_rate,
            sample_count,
            title: Some(format!("Import {}", now.format("%d.%m %H:%M"))),
            summary: None,
            chunks: Vec::new(),
        };

        write_json(&data_dir.join("meta.json"), &SessionMeta::of(&session))
            .map_err(StoreError::persistence)?;

        sessions.push(session.clone());
        tracing::info!("Imported session created: {}", id);
        Ok(session)
    }

    /// Stop the active recording session
    pub fn stop_session(
        &self,
        total_duration_ms: u64,
        sample_count: u64,
    ) -> Result<Session, StoreError> {
        let mut sessions = self.sessions.write();

        let session = sessions
            .iter_mut()
            .find(|s| s.status == SessionStatus::Recording)
            .ok_or(StoreError::NotRecording)?;

        let rollback = session.clone();
        let now = chrono::Utc::now();

        session.status = SessionStatus::Completed;
        session.end_time = Some(now.to_rfc3339());
        session.total_duration = total_duration_ms;
        session.sample_count = sample_count;
        session.title = Some(completed_title(&rollback.start_time, total_duration_ms));

        let meta = SessionMeta::of(session);
        let meta_path = self.session_dir(&session.id).join("meta.json");
        if let Err(e) = write_json(&meta_path, &meta) {
            *session = rollback;
            return Err(StoreError::persistence(e));
        }

        tracing::info!(
            "Session stopped: {} ({} ms, {} chunks)",
            session.id,
            total_duration_ms,
            session.chunks.len()
        );
        Ok(session.clone())
    }

    /// Mark the active recording session failed (capture failure)
    pub fn fail_session(&self, session_id: &str, error: &str) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write();
        let session = find_mut(&mut sessions, session_id)?;

        let rollback = session.clone();
        session.status = SessionStatus::Failed;
        session.end_time = Some(chrono::Utc::now().to_rfc3339());

        let meta = SessionMeta::of(session);
        let meta_path = self.session_dir(session_id).join("meta.json");
        if let Err(e) = write_json(&meta_path, &meta) {
            *session = rollback;
            return Err(StoreError::persistence(e));
        }

        tracing::error!("Session {} failed: {}", session_id, error);
        Ok(())
    }

    /// Snapshot of one session
    pub fn get(&self, session_id: &str) -> Option<Session> {
        self.sessions
            .read()
            .iter()
            .find(|s| s.id == session_id)
            .cloned()
    }

    /// Snapshot of all sessions, newest first
    pub fn list(&self) -> Vec<Session> {
        let mut sessions = self.sessions.read().clone();
        sessions.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        sessions
    }

    /// The currently recording session, if any
    pub fn active_session(&self) -> Option<Session> {
        self.sessions
            .read()
            .iter()
            .find(|s| s.status == SessionStatus::Recording)
            .cloned()
    }

    /// Delete a session and all its on-disk state. Forbidden while it is
    /// recording.
    pub fn delete(&self, session_id: &str) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write();

        let idx = sessions
            .iter()
            .position(|s| s.id == session_id)
            .ok_or_else(|| StoreError::SessionNotFound(session_id.to_string()))?;

        if sessions[idx].status == SessionStatus::Recording {
            return Err(StoreError::SessionActive);
        }

        let dir = self.session_dir(session_id);
        if dir.exists() {
            std::fs::remove_dir_all(&dir).map_err(StoreError::persistence)?;
        }

        sessions.remove(idx);
        tracing::info!("Session deleted: {}", session_id);
        Ok(())
    }

    pub fn set_title(&self, session_id: &str, title: &str) -> Result<(), StoreError> {
        if title.trim().is_empty() {
            return Err(StoreError::Validation("title must not be empty".into()));
        }

        let mut sessions = self.sessions.write();
        let session = find_mut(&mut sessions, session_id)?;

        let rollback = session.title.clone();
        session.title = Some(title.to_string());

        let meta = SessionMeta::of(session);
        if let Err(e) = write_json(&self.session_dir(session_id).join("meta.json"), &meta) {
            session.title = rollback;
            return Err(StoreError::persistence(e));
        }
        Ok(())
    }

    pub fn set_summary(&self, session_id: &str, summary: &str) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write();
        let session = find_mut(&mut sessions, session_id)?;

        let rollback = session.summary.clone();
        session.summary = Some(summary.to_string());

        let path = self.session_dir(session_id).join("summary.txt");
        if let Err(e) = std::fs::write(&path, summary) {
            session.summary = rollback;
            return Err(StoreError::persistence(e));
        }
        Ok(())
    }

    /// Append a chunk. The index is assigned here, under the store lock,
    /// so indices stay dense and `on_chunk_ready` fires in order.
    pub fn add_chunk(
        &self,
        session_id: &str,
        start_ms: i64,
        end_ms: i64,
        is_stereo: bool,
    ) -> Result<Chunk, StoreError> {
        if end_ms <= start_ms {
            return Err(StoreError::Validation(format!(
                "invalid chunk range [{}, {})",
                start_ms, end_ms
            )));
        }

        let chunk = {
            let mut sessions = self.sessions.write();
            let session = find_mut(&mut sessions, session_id)?;

            let index = session.chunks.len() as i32;
            let chunk = Chunk::new(session_id, index, start_ms, end_ms, is_stereo);

            if let Err(e) = write_json(&self.chunk_path(session_id, index), &chunk) {
                return Err(StoreError::persistence(e));
            }

            session.chunks.push(chunk.clone());
            chunk
        };

        for observer in self.observers.read().iter() {
            observer.on_chunk_ready(session_id, &chunk);
        }

        Ok(chunk)
    }

    /// Register an already-built chunk (import path)
    pub fn add_prepared_chunk(&self, chunk: Chunk) -> Result<Chunk, StoreError> {
        let session_id = chunk.session_id.clone();
        let chunk = {
            let mut sessions = self.sessions.write();
            let session = find_mut(&mut sessions, &session_id)?;

            let mut chunk = chunk;
            chunk.index = session.chunks.len() as i32;

            if let Err(e) = write_json(&self.chunk_path(&session_id, chunk.index), &chunk) {
                return Err(StoreError::persistence(e));
            }

            session.chunks.push(chunk.clone());
            chunk
        };

        for observer in self.observers.read().iter() {
            observer.on_chunk_ready(&session_id, &chunk);
        }

        Ok(chunk)
    }

    /// Mark a chunk as being transcribed
    pub fn mark_chunk_transcribing(
        &self,
        session_id: &str,
        chunk_id: &str,
    ) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write();
        let session = find_mut(&mut sessions, session_id)?;
        let chunk = find_chunk_mut(session, chunk_id)?;
        chunk.status = ChunkStatus::Transcribing;
        // Transient state, not worth a disk write
        Ok(())
    }

    /// Store a mono transcription result on a chunk
    pub fn update_chunk_transcription(
        &self,
        session_id: &str,
        chunk_id: &str,
        segments: Vec<TranscriptSegment>,
        error: Option<String>,
    ) -> Result<Chunk, StoreError> {
        let updated = {
            let mut sessions = self.sessions.write();
            let session = find_mut(&mut sessions, session_id)?;
            let chunk = find_chunk_mut(session, chunk_id)?;

            let rollback = chunk.clone();

            let dialogue = merge_dialogue(segments.clone(), Vec::new());
            chunk.transcription = dialogue_text(&dialogue);
            chunk.mic_text = Some(chunk.transcription.clone());
            chunk.mic_segments = segments;
            chunk.sys_segments = Vec::new();
            chunk.dialogue = dialogue;
            chunk.transcribed_at = Some(chrono::Utc::now().to_rfc3339());
            chunk.error = error.clone();
            chunk.status = if error.is_some() && chunk.mic_segments.is_empty() {
                ChunkStatus::Failed
            } else {
                ChunkStatus::Completed
            };

            let index = chunk.index;
            let snapshot = chunk.clone();
            if let Err(e) = write_json(&self.chunk_path(session_id, index), &snapshot) {
                *find_chunk_mut(session, chunk_id)? = rollback;
                return Err(StoreError::persistence(e));
            }
            snapshot
        };

        for observer in self.observers.read().iter() {
            observer.on_chunk_transcribed(session_id, &updated);
        }

        Ok(updated)
    }

    /// Store a stereo transcription result: both channel texts and
    /// segment lists. The merged dialogue and the combined transcription
    /// string are computed here.
    #[allow(clippy::too_many_arguments)]
    pub fn update_chunk_stereo_with_segments(
        &self,
        session_id: &str,
        chunk_id: &str,
        mic_text: Option<String>,
        sys_text: Option<String>,
        mic_segments: Vec<TranscriptSegment>,
        sys_segments: Vec<TranscriptSegment>,
        error: Option<String>,
    ) -> Result<Chunk, StoreError> {
        let updated = {
            let mut sessions = self.sessions.write();
            let session = find_mut(&mut sessions, session_id)?;
            let chunk = find_chunk_mut(session, chunk_id)?;

            let rollback = chunk.clone();

            let dialogue = merge_dialogue(mic_segments.clone(), sys_segments.clone());
            let both_failed = mic_segments.is_empty() && sys_segments.is_empty() && error.is_some();

            chunk.is_stereo = true;
            chunk.mic_text = mic_text;
            chunk.sys_text = sys_text;
            chunk.mic_segments = mic_segments;
            chunk.sys_segments = sys_segments;
            chunk.transcription = dialogue_text(&dialogue);
            chunk.dialogue = dialogue;
            chunk.transcribed_at = Some(chrono::Utc::now().to_rfc3339());
            chunk.error = error;
            chunk.status = if both_failed {
                ChunkStatus::Failed
            } else {
                ChunkStatus::Completed
            };

            let index = chunk.index;
            let snapshot = chunk.clone();
            if let Err(e) = write_json(&self.chunk_path(session_id, index), &snapshot) {
                *find_chunk_mut(session, chunk_id)? = rollback;
                return Err(StoreError::persistence(e));
            }
            snapshot
        };

        for observer in self.observers.read().iter() {
            observer.on_chunk_transcribed(session_id, &updated);
        }

        Ok(updated)
    }

    /// Replace a chunk's dialogue with an improved rendering (LLM
    /// cleanup is produced elsewhere; the store only persists it)
    pub fn update_improved_dialogue(
        &self,
        session_id: &str,
        chunk_id: &str,
        dialogue: Vec<TranscriptSegment>,
    ) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write();
        let session = find_mut(&mut sessions, session_id)?;
        let chunk = find_chunk_mut(session, chunk_id)?;

        let rollback = chunk.clone();
        chunk.transcription = dialogue_text(&dialogue);
        chunk.dialogue = dialogue;

        let index = chunk.index;
        let snapshot = chunk.clone();
        if let Err(e) = write_json(&self.chunk_path(session_id, index), &snapshot) {
            *find_chunk_mut(session, chunk_id)? = rollback;
            return Err(StoreError::persistence(e));
        }
        Ok(())
    }

    /// Rename a session speaker across all persisted segments.
    ///
    /// Every segment whose label matches any known alias of the speaker
    /// (numbered label, current display name) is rewritten. Returns how
    /// many chunks changed; calling twice with the same name is a no-op
    /// the second time.
    pub fn update_speaker_name(
        &self,
        session_id: &str,
        speaker_id: i32,
        old_display_name: Option<&str>,
        new_name: &str,
    ) -> Result<usize, StoreError> {
        if new_name.trim().is_empty() {
            return Err(StoreError::Validation("speaker name must not be empty".into()));
        }

        let aliases = speaker_aliases(speaker_id, old_display_name);

        let mut sessions = self.sessions.write();
        let session = find_mut(&mut sessions, session_id)?;

        let mut changed = 0usize;
        for chunk in session.chunks.iter_mut() {
            let rollback = chunk.clone();
            let mut touched = false;

            for seg in chunk
                .dialogue
                .iter_mut()
                .chain(chunk.sys_segments.iter_mut())
            {
                if let Some(ref speaker) = seg.speaker {
                    if aliases.iter().any(|a| a == speaker) && speaker != new_name {
                        seg.speaker = Some(new_name.to_string());
                        touched = true;
                    }
                }
                for word in seg.words.iter_mut() {
                    if let Some(ref speaker) = word.speaker {
                        if aliases.iter().any(|a| a == speaker) && speaker != new_name {
                            word.speaker = Some(new_name.to_string());
                            touched = true;
                        }
                    }
                }
            }

            if touched {
                let index = chunk.index;
                let snapshot = chunk.clone();
                if let Err(e) = write_json(&self.chunk_path(session_id, index), &snapshot) {
                    *chunk = rollback;
                    return Err(StoreError::persistence(e));
                }
                changed += 1;
            }
        }

        tracing::info!(
            "Session {}: speaker {} renamed to '{}' in {} chunks",
            session_id,
            speaker_id,
            new_name,
            changed
        );
        Ok(changed)
    }

    /// Reset all chunks of a session to pending (full re-transcription)
    pub fn reset_chunks_for_retranscription(&self, session_id: &str) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write();
        let session = find_mut(&mut sessions, session_id)?;
        for chunk in session.chunks.iter_mut() {
            chunk.status = ChunkStatus::Pending;
            chunk.error = None;
        }
        Ok(())
    }
}

fn find_mut<'a>(
    sessions: &'a mut parking_lot::RwLockWriteGuard<'_, Vec<Session>>,
    session_id: &str,
) -> Result<&'a mut Session, StoreError> {
    sessions
        .iter_mut()
        .find(|s| s.id == session_id)
        .ok_or_else(|| StoreError::SessionNotFound(session_id.to_string()))
}

fn find_chunk_mut<'a>(
    session: &'a mut Session,
    chunk_id: &str,
) -> Result<&'a mut Chunk, StoreError> {
    session
        .chunks
        .iter_mut()
        .find(|c| c.id == chunk_id)
        .ok_or_else(|| StoreError::ChunkNotFound(chunk_id.to_string()))
}

fn dialogue_text(dialogue: &[TranscriptSegment]) -> String {
    dialogue
        .iter()
        .map(|d| d.text.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

fn completed_title(start_time: &str, duration_ms: u64) -> String {
    let stamp = chrono::DateTime::parse_from_rfc3339(start_time)
        .map(|t| t.format("%d.%m %H:%M").to_string())
        .unwrap_or_else(|_| start_time.to_string());

    let total_secs = duration_ms / 1000;
    let mins = total_secs / 60;
    let secs = total_secs % 60;
    if mins > 0 {
        format!("Recording {} · {} min {} s", stamp, mins, secs)
    } else {
        format!("Recording {} · {} s", stamp, secs)
    }
}

/// Durable-enough write: temp file then rename
fn write_json<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, serde_json::to_string_pretty(value)?)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Load all sessions from the sessions directory
fn load_sessions_from_disk(sessions_dir: &Path) -> Vec<Session> {
    let mut sessions = Vec::new();

    let entries = match std::fs::read_dir(sessions_dir) {
        Ok(e) => e,
        Err(_) => return sessions,
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }

        let meta_path = path.join("meta.json");
        if !meta_path.exists() {
            continue;
        }

        let meta: SessionMeta = match std::fs::read_to_string(&meta_path)
            .map_err(anyhow::Error::from)
            .and_then(|content| Ok(serde_json::from_str(&content)?))
        {
            Ok(meta) => meta,
            Err(e) => {
                tracing::warn!("Failed to load {:?}: {}", meta_path, e);
                continue;
            }
        };

        let chunks = load_chunks_from_dir(&path);

        let summary = std::fs::read_to_string(path.join("summary.txt")).ok();

        sessions.push(Session {
            id: meta.id,
            start_time: meta.start_time,
            end_time: meta.end_time,
            // A session that was mid-recording when the process died can
            // never resume
            status: if meta.status == SessionStatus::Recording {
                SessionStatus::Failed
            } else {
                meta.status
            },
            language: meta.language,
            model: meta.model,
            data_dir: path.to_string_lossy().to_string(),
            total_duration: meta.total_duration,
            sample_rate: meta.sample_rate,
            sample_count: meta.sample_count,
            title: meta.title,
            summary,
            chunks,
        });
    }

    sessions.sort_by(|a, b| b.start_time.cmp(&a.start_time));
    sessions
}

fn load_chunks_from_dir(session_dir: &Path) -> Vec<Chunk> {
    let chunks_dir = session_dir.join("chunks");
    let mut entries: Vec<_> = match std::fs::read_dir(&chunks_dir) {
        Ok(e) => e.flatten().collect(),
        Err(_) => return Vec::new(),
    };
    entries.sort_by_key(|e| e.file_name());

    let mut chunks = Vec::new();
    for entry in entries {
        let path = entry.path();
        if path.extension().map(|e| e == "json").unwrap_or(false) {
            match std::fs::read_to_string(&path)
                .map_err(anyhow::Error::from)
                .and_then(|content| Ok(serde_json::from_str::<Chunk>(&content)?))
            {
                Ok(chunk) => chunks.push(chunk),
                Err(e) => tracing::warn!("Failed to load chunk {:?}: {}", path, e),
            }
        }
    }

    chunks.sort_by_key(|c| c.index);
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use echoscribe_types::{TranscriptWord, RECORD_SAMPLE_RATE};
    use std::sync::Mutex;

    fn store() -> (tempfile::TempDir, SessionStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().to_path_buf());
        (dir, store)
    }

    fn config() -> NewSessionConfig {
        NewSessionConfig {
            language: "en".to_string(),
            model: "ggml-base".to_string(),
            sample_rate: RECORD_SAMPLE_RATE,
        }
    }

    fn seg(start: i64, end: i64, text: &str, speaker: Option<&str>) -> TranscriptSegment {
        TranscriptSegment {
            start,
            end,
            text: text.to_string(),
            speaker: speaker.map(String::from),
            words: vec![TranscriptWord {
                start,
                end,
                text: text.to_string(),
                confidence: 0.9,
                speaker: speaker.map(String::from),
            }],
            confidence: 0.9,
        }
    }

    #[test]
    fn test_single_recording_session_invariant() {
        let (_dir, store) = store();
        store.create_session(config()).unwrap();
        assert!(matches!(
            store.create_session(config()),
            Err(StoreError::AlreadyRecording)
        ));
    }

    #[test]
    fn test_stop_completes_and_stamps_session() {
        let (_dir, store) = store();
        let session = store.create_session(config()).unwrap();

        let stopped = store.stop_session(125_000, 3_000_000).unwrap();
        assert_eq!(stopped.id, session.id);
        assert_eq!(stopped.status, SessionStatus::Completed);
        assert_eq!(stopped.total_duration, 125_000);
        assert!(stopped.end_time.is_some());
        assert!(stopped.title.unwrap().contains("2 min 5 s"));

        assert!(matches!(
            store.stop_session(0, 0),
            Err(StoreError::NotRecording)
        ));
    }

    #[test]
    fn test_chunk_indices_dense_and_ordered() {
        let (_dir, store) = store();
        let session = store.create_session(config()).unwrap();

        let c0 = store.add_chunk(&session.id, 0, 30_000, true).unwrap();
        let c1 = store.add_chunk(&session.id, 30_000, 65_000, true).unwrap();
        let c2 = store.add_chunk(&session.id, 65_000, 90_000, true).unwrap();

        assert_eq!((c0.index, c1.index, c2.index), (0, 1, 2));

        let snapshot = store.get(&session.id).unwrap();
        for pair in snapshot.chunks.windows(2) {
            assert!(pair[0].end_ms <= pair[1].start_ms);
            assert_eq!(pair[0].index + 1, pair[1].index);
        }
    }

    #[test]
    fn test_invalid_chunk_range_rejected() {
        let (_dir, store) = store();
        let session = store.create_session(config()).unwrap();
        assert!(matches!(
            store.add_chunk(&session.id, 5000, 5000, false),
            Err(StoreError::Validation(_))
        ));
    }

    #[test]
    fn test_on_chunk_ready_fires_in_index_order() {
        struct Recorder(Mutex<Vec<i32>>);
        impl SessionObserver for Recorder {
            fn on_chunk_ready(&self, _session_id: &str, chunk: &Chunk) {
                self.0.lock().unwrap().push(chunk.index);
            }
        }

        let (_dir, store) = store();
        let observer = Arc::new(Recorder(Mutex::new(Vec::new())));
        store.add_observer(observer.clone());

        let session = store.create_session(config()).unwrap();
        for i in 0..4i64 {
            store
                .add_chunk(&session.id, i * 1000, (i + 1) * 1000, false)
                .unwrap();
        }

        assert_eq!(*observer.0.lock().unwrap(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_delete_active_session_forbidden() {
        let (_dir, store) = store();
        let session = store.create_session(config()).unwrap();
        assert!(matches!(
            store.delete(&session.id),
            Err(StoreError::SessionActive)
        ));

        store.stop_session(1000, 24_000).unwrap();
        store.delete(&session.id).unwrap();
        assert!(store.get(&session.id).is_none());
    }

    #[test]
    fn test_stereo_update_computes_dialogue_and_text() {
        let (_dir, store) = store();
        let session = store.create_session(config()).unwrap();
        let chunk = store.add_chunk(&session.id, 0, 10_000, true).unwrap();

        let mic = vec![seg(0, 2000, "hello there", Some("You"))];
        let sys = vec![seg(3000, 5000, "hi", Some("Interlocutor 1"))];

        let updated = store
            .update_chunk_stereo_with_segments(
                &session.id,
                &chunk.id,
                Some("hello there".into()),
                Some("hi".into()),
                mic,
                sys,
                None,
            )
            .unwrap();

        assert_eq!(updated.status, ChunkStatus::Completed);
        assert_eq!(updated.dialogue.len(), 2);
        assert_eq!(updated.transcription, "hello there hi");

        // Persisted to chunks/000.json
        let on_disk: Chunk = serde_json::from_str(
            &std::fs::read_to_string(
                store.session_dir(&session.id).join("chunks").join("000.json"),
            )
            .unwrap(),
        )
        .unwrap();
        assert_eq!(on_disk.transcription, "hello there hi");
    }

    #[test]
    fn test_both_sides_failed_marks_chunk_failed() {
        let (_dir, store) = store();
        let session = store.create_session(config()).unwrap();
        let chunk = store.add_chunk(&session.id, 0, 10_000, true).unwrap();

        let updated = store
            .update_chunk_stereo_with_segments(
                &session.id,
                &chunk.id,
                None,
                None,
                vec![],
                vec![],
                Some("mic: engine failed; sys: engine failed".into()),
            )
            .unwrap();

        assert_eq!(updated.status, ChunkStatus::Failed);
        assert!(updated.error.is_some());
    }

    #[test]
    fn test_rename_speaker_is_idempotent() {
        let (_dir, store) = store();
        let session = store.create_session(config()).unwrap();
        let chunk = store.add_chunk(&session.id, 0, 10_000, true).unwrap();

        store
            .update_chunk_stereo_with_segments(
                &session.id,
                &chunk.id,
                None,
                Some("hi".into()),
                vec![],
                vec![seg(0, 2000, "hi", Some("Interlocutor 2"))],
                None,
            )
            .unwrap();

        let first = store
            .update_speaker_name(&session.id, 2, None, "Alice")
            .unwrap();
        assert_eq!(first, 1);

        let state_after_first = store.get(&session.id).unwrap();

        let second = store
            .update_speaker_name(&session.id, 2, Some("Alice"), "Alice")
            .unwrap();
        assert_eq!(second, 0);

        let state_after_second = store.get(&session.id).unwrap();
        assert_eq!(
            serde_json::to_string(&state_after_first).unwrap(),
            serde_json::to_string(&state_after_second).unwrap()
        );

        let speakers: Vec<_> = state_after_second.chunks[0]
            .dialogue
            .iter()
            .filter_map(|s| s.speaker.clone())
            .collect();
        assert!(speakers.iter().all(|s| s == "Alice"));
    }

    #[test]
    fn test_summary_persists_to_file() {
        let (_dir, store) = store();
        let session = store.create_session(config()).unwrap();

        store.set_summary(&session.id, "Quarterly sync notes").unwrap();

        let on_disk =
            std::fs::read_to_string(store.session_dir(&session.id).join("summary.txt")).unwrap();
        assert_eq!(on_disk, "Quarterly sync notes");
        assert_eq!(
            store.get(&session.id).unwrap().summary.as_deref(),
            Some("Quarterly sync notes")
        );
    }

    #[test]
    fn test_improved_dialogue_replaces_chunk_dialogue() {
        let (_dir, store) = store();
        let session = store.create_session(config()).unwrap();
        let chunk = store.add_chunk(&session.id, 0, 10_000, false).unwrap();

        store
            .update_chunk_transcription(
                &session.id,
                &chunk.id,
                vec![seg(0, 2000, "uh hello there um", Some("You"))],
                None,
            )
            .unwrap();

        store
            .update_improved_dialogue(
                &session.id,
                &chunk.id,
                vec![seg(0, 2000, "Hello there.", Some("You"))],
            )
            .unwrap();

        let snapshot = store.get(&session.id).unwrap();
        assert_eq!(snapshot.chunks[0].transcription, "Hello there.");
        assert_eq!(snapshot.chunks[0].dialogue[0].text, "Hello there.");
    }

    #[test]
    fn test_sessions_reload_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let session_id = {
            let store = SessionStore::new(dir.path().to_path_buf());
            let session = store.create_session(config()).unwrap();
            store.add_chunk(&session.id, 0, 30_000, true).unwrap();
            store.stop_session(30_000, 720_000).unwrap();
            session.id
        };

        let reloaded = SessionStore::new(dir.path().to_path_buf());
        let session = reloaded.get(&session_id).unwrap();
        assert_eq!(session.status, SessionStatus::Completed);
        assert_eq!(session.chunks.len(), 1);
        assert_eq!(session.chunks[0].index, 0);
        assert_eq!(session.total_duration, 30_000);
    }

    #[test]
    fn test_interrupted_recording_loads_as_failed() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = SessionStore::new(dir.path().to_path_buf());
            store.create_session(config()).unwrap();
            // Process "dies" without stop_session
        }

        let reloaded = SessionStore::new(dir.path().to_path_buf());
        let sessions = reloaded.list();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].status, SessionStatus::Failed);
    }
}

//! Full session re-transcription
//!
//! Replays the chunk pipeline over a whole session with a fresh model or
//! settings. Cooperative cancellation is checked between chunks; chunks
//! already persisted stay. Speaker names the operator assigned before
//! the run survive it: they are cached, profiles are rebuilt from
//! scratch, and the cache is re-applied at the end (unless cancelled).

use crate::error::StoreError;
use crate::events::EventBus;
use crate::pipeline::{ChunkPipeline, TranscribeOptions};
use crate::store::SessionStore;
use echoscribe_types::protocol::Event;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub struct Retranscriber {
    store: Arc<SessionStore>,
    pipeline: Arc<ChunkPipeline>,
    events: EventBus,
    /// One token per session; a second start cancels the first
    cancel_tokens: RwLock<HashMap<String, CancellationToken>>,
}

impl Retranscriber {
    pub fn new(store: Arc<SessionStore>, pipeline: Arc<ChunkPipeline>, events: EventBus) -> Self {
        Self {
            store,
            pipeline,
            events,
            cancel_tokens: RwLock::new(HashMap::new()),
        }
    }

    /// Cancel a running full re-transcription, if any
    pub fn cancel(&self, session_id: &str) {
        if let Some(token) = self.cancel_tokens.read().get(session_id) {
            token.cancel();
            tracing::info!("Full transcription cancel requested: {}", session_id);
        }
    }

    /// Re-transcribe every chunk of a session in index order
    pub async fn retranscribe_full(
        &self,
        session_id: &str,
        options: TranscribeOptions,
    ) -> Result<(), StoreError> {
        let session = self
            .store
            .get(session_id)
            .ok_or_else(|| StoreError::SessionNotFound(session_id.to_string()))?;

        let token = CancellationToken::new();
        {
            let mut tokens = self.cancel_tokens.write();
            if let Some(previous) = tokens.insert(session_id.to_string(), token.clone()) {
                previous.cancel();
            }
        }

        let mut chunks: Vec<_> = session
            .chunks
            .iter()
            .map(|c| (c.index, c.id.clone()))
            .collect();
        chunks.sort_by_key(|(index, _)| *index);
        let total_chunks = chunks.len();

        self.events.emit(Event::FullTranscriptionStarted {
            session_id: session_id.to_string(),
            total_chunks,
        });

        // Names assigned by the operator, keyed by session speaker id.
        // Profiles are rebuilt during the run, so these are re-applied
        // afterwards to keep user-visible names stable across models.
        let rename_cache: Vec<(i32, String)> = self
            .pipeline
            .speakers()
            .session_speakers(session_id)
            .into_iter()
            .filter_map(|p| p.recognized_name.map(|name| (p.speaker_id, name)))
            .collect();

        self.pipeline.speakers().clear_session_profiles(session_id);
        self.store.reset_chunks_for_retranscription(session_id)?;

        for (index, chunk_id) in chunks {
            if token.is_cancelled() {
                tracing::info!(
                    "Full transcription cancelled at chunk {} of {}",
                    index,
                    total_chunks
                );
                // Cancellation discards the rename cache by design
                self.cancel_tokens.write().remove(session_id);
                self.events.emit(Event::FullTranscriptionCancelled {
                    session_id: session_id.to_string(),
                });
                return Ok(());
            }

            self.events.emit(Event::FullTranscriptionProgress {
                session_id: session_id.to_string(),
                chunk_index: index,
                total_chunks,
            });

            match self
                .pipeline
                .retranscribe_chunk(session_id, &chunk_id, &options)
                .await
            {
                Ok(chunk) => {
                    self.events.emit(Event::ChunkTranscribed {
                        session_id: session_id.to_string(),
                        chunk,
                    });
                }
                Err(e) => {
                    // Store-level failure (not a per-chunk transcription
                    // error, those land on the chunk) aborts the run
                    self.cancel_tokens.write().remove(session_id);
                    self.events.emit(Event::FullTranscriptionError {
                        session_id: session_id.to_string(),
                        error: e.to_string(),
                    });
                    return Err(e);
                }
            }
        }

        // Re-apply the operator's names to the rebuilt profiles
        for (speaker_id, name) in rename_cache {
            if let Err(e) =
                self.pipeline
                    .speakers()
                    .rename_speaker(session_id, speaker_id, &name, false)
            {
                tracing::warn!(
                    "Rename cache: speaker {} no longer present ({})",
                    speaker_id,
                    e
                );
                continue;
            }
            if let Err(e) = self.store.update_speaker_name(session_id, speaker_id, None, &name) {
                tracing::warn!("Rename cache: failed to rewrite segments: {}", e);
            }
        }

        let session_dir = self.store.session_dir(session_id);
        if let Err(e) = self
            .pipeline
            .speakers()
            .save_profiles(session_id, &session_dir)
        {
            tracing::warn!("Failed to persist speaker profiles: {}", e);
        }

        self.cancel_tokens.write().remove(session_id);
        self.events.emit(Event::FullTranscriptionCompleted {
            session_id: session_id.to_string(),
        });

        Ok(())
    }
}

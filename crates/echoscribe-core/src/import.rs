//! Audio file import
//!
//! Decodes an external recording, re-encodes it into the canonical
//! session container, and runs it through the pipeline as one chunk
//! spanning the whole file. The imported audio lands on the sys channel
//! (the mic side stays silent), so diarization applies to it whenever a
//! diarizer is available.

use crate::error::StoreError;
use crate::events::EventBus;
use crate::pipeline::{ChunkPipeline, TranscribeOptions};
use crate::store::{NewSessionConfig, SessionStore};
use anyhow::Context;
use echoscribe_types::protocol::Event;
use echoscribe_types::{Session, RECORD_SAMPLE_RATE};
use std::path::Path;
use std::sync::Arc;

/// Import a file and transcribe it.
pub async fn import_audio_file(
    store: &Arc<SessionStore>,
    pipeline: &Arc<ChunkPipeline>,
    events: &EventBus,
    path: &Path,
    options: &TranscribeOptions,
) -> Result<Session, StoreError> {
    tracing::info!("Importing audio file: {:?}", path);

    let samples = decode_to_container_rate(path).map_err(StoreError::persistence)?;
    if samples.is_empty() {
        return Err(StoreError::Validation(format!(
            "no audio decoded from {:?}",
            path
        )));
    }

    let duration_ms = samples.len() as u64 * 1000 / RECORD_SAMPLE_RATE as u64;

    let session = store.create_imported_session(
        NewSessionConfig {
            language: options.language.clone(),
            model: options.model_id.clone(),
            sample_rate: RECORD_SAMPLE_RATE,
        },
        duration_ms,
        samples.len() as u64,
    )?;

    // Re-encode into the canonical container: left silent, right carries
    // the imported audio
    write_container(store, &session.id, &samples).map_err(StoreError::persistence)?;

    let chunk = store.add_chunk(&session.id, 0, duration_ms as i64, true)?;

    // Diarization is forced on whenever an engine is present
    let mut options = options.clone();
    options.diarization_enabled = pipeline.has_diarizer();

    let silence = vec![0.0f32; samples.len()];
    pipeline
        .transcribe_chunk_samples(
            &session.id,
            &chunk,
            silence,
            Some(samples),
            RECORD_SAMPLE_RATE,
            &options,
        )
        .await?;

    let session = store
        .get(&session.id)
        .ok_or_else(|| StoreError::SessionNotFound(session.id.clone()))?;

    events.emit(Event::SessionImported {
        session: session.clone(),
    });

    tracing::info!(
        "Import complete: {} ({} ms, {} chunks)",
        session.id,
        session.total_duration,
        session.chunks.len()
    );

    Ok(session)
}

fn decode_to_container_rate(path: &Path) -> anyhow::Result<Vec<f32>> {
    echoscribe_audio::file_io::load_audio_file_resampled(path, RECORD_SAMPLE_RATE)
        .with_context(|| format!("Failed to decode {:?}", path))
}

fn write_container(
    store: &SessionStore,
    session_id: &str,
    samples: &[f32],
) -> anyhow::Result<()> {
    let mut writer = echoscribe_audio::ContainerWriter::new(
        store.container_path(session_id),
        RECORD_SAMPLE_RATE,
        2,
        "128k",
    )?;

    let silence = vec![0.0f32; samples.len()];
    writer.write_stereo(&silence, samples)?;
    writer.close()?;
    Ok(())
}

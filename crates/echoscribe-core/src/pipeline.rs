//! Per-chunk transcription pipeline
//!
//! For each chunk: extract audio, condition it, detect speech,
//! transcribe both channels, diarize the sys channel, resolve speaker
//! identities, and assemble the dialogue — then persist through the
//! session store.
//!
//! Mic-side and sys-side failures are recorded independently; only when
//! both fail does the chunk fail. Nothing here retries — re-transcription
//! is an explicit user operation.

use crate::error::StoreError;
use crate::store::SessionStore;
use crate::timeout::run_with_timeout;
use anyhow::{Context, Result};
use echoscribe_audio::segmenter::VadMode;
use echoscribe_audio::{calculate_rms, is_silent, ContainerReader};
use echoscribe_ml::{
    apply_speakers, compress_regions, consolidate_segments, get_or_create_engine_cached,
    DiarizationEngine, FilterChain, HybridConfig, HybridMode, HybridTranscriber,
    SessionSpeakerRegistry, SpeechDetector, TimestampMap, TranscriptArbiter, VadSettings,
};
use echoscribe_types::{
    interlocutor_label, Chunk, SpeechRegion, TranscriptSegment, ASR_SAMPLE_RATE, MIC_SPEAKER,
};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;

/// Channels are treated as duplicates below this relative L1 difference
const DEGENERATE_L1_RATIO: f32 = 0.10;
/// Absolute noise floor for a "silent" channel
const SILENCE_FLOOR: f32 = 1e-4;
/// Per-region transcription: regions shorter than this merge with a
/// neighbor no farther than [`REGION_MERGE_GAP_MS`]
const SHORT_REGION_MS: i64 = 2000;
const REGION_MERGE_GAP_MS: i64 = 3000;

/// Per-call transcription options
#[derive(Clone)]
pub struct TranscribeOptions {
    pub model_id: String,
    pub language: String,
    pub hotwords: Vec<String>,
    /// Chunking/transcription mode carried over from the segmenter
    pub vad_mode: VadMode,
    pub vad: VadSettings,
    pub hybrid_enabled: bool,
    pub hybrid_secondary_model_id: String,
    pub hybrid_mode: HybridMode,
    pub arbiter: Option<Arc<dyn TranscriptArbiter>>,
    pub diarization_enabled: bool,
    /// Diarization stops after this many chunks per session
    pub diarization_chunk_cap: i32,
    pub diarization_timeout: Duration,
    pub asr_timeout: Duration,
}

impl Default for TranscribeOptions {
    fn default() -> Self {
        Self {
            model_id: "ggml-large-v3-turbo".to_string(),
            language: "auto".to_string(),
            hotwords: Vec::new(),
            vad_mode: VadMode::Auto,
            vad: VadSettings::default(),
            hybrid_enabled: false,
            hybrid_secondary_model_id: String::new(),
            hybrid_mode: HybridMode::PrimaryOnly,
            arbiter: None,
            diarization_enabled: false,
            diarization_chunk_cap: 50,
            diarization_timeout: Duration::from_secs(20),
            asr_timeout: Duration::from_secs(300),
        }
    }
}

/// One channel's outcome inside a chunk
struct ChannelOutcome {
    segments: Vec<TranscriptSegment>,
    error: Option<String>,
}

/// The orchestrator
pub struct ChunkPipeline {
    store: Arc<SessionStore>,
    speakers: Arc<SessionSpeakerRegistry>,
    diarizer: RwLock<Option<Arc<dyn DiarizationEngine>>>,
    /// One transcription worker per session; later chunks queue here
    session_locks: parking_lot::Mutex<std::collections::HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ChunkPipeline {
    pub fn new(store: Arc<SessionStore>, speakers: Arc<SessionSpeakerRegistry>) -> Self {
        Self {
            store,
            speakers,
            diarizer: RwLock::new(None),
            session_locks: parking_lot::Mutex::new(std::collections::HashMap::new()),
        }
    }

    fn session_lock(&self, session_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.session_locks
            .lock()
            .entry(session_id.to_string())
            .or_default()
            .clone()
    }

    pub fn set_diarizer(&self, engine: Arc<dyn DiarizationEngine>) {
        *self.diarizer.write() = Some(engine);
    }

    pub fn clear_diarizer(&self) {
        *self.diarizer.write() = None;
    }

    pub fn has_diarizer(&self) -> bool {
        self.diarizer.read().is_some()
    }

    pub fn speakers(&self) -> &Arc<SessionSpeakerRegistry> {
        &self.speakers
    }

    /// Transcribe a chunk from live capture buffers.
    ///
    /// `mic` / `sys` arrive at the container rate; everything downstream
    /// runs at 16 kHz.
    pub async fn transcribe_chunk_samples(
        &self,
        session_id: &str,
        chunk: &Chunk,
        mic: Vec<f32>,
        sys: Option<Vec<f32>>,
        source_rate: u32,
        options: &TranscribeOptions,
    ) -> Result<Chunk, StoreError> {
        let mic_16k = to_asr_rate(mic, source_rate);
        let sys_16k = sys.map(|s| to_asr_rate(s, source_rate));
        self.run(session_id, chunk, mic_16k, sys_16k, options).await
    }

    /// Re-run the pipeline for one chunk, pulling audio from the
    /// session container.
    pub async fn retranscribe_chunk(
        &self,
        session_id: &str,
        chunk_id: &str,
        options: &TranscribeOptions,
    ) -> Result<Chunk, StoreError> {
        let session = self
            .store
            .get(session_id)
            .ok_or_else(|| StoreError::SessionNotFound(session_id.to_string()))?;
        let chunk = session
            .chunks
            .iter()
            .find(|c| c.id == chunk_id)
            .ok_or_else(|| StoreError::ChunkNotFound(chunk_id.to_string()))?
            .clone();

        let reader = ContainerReader::open(self.store.container_path(session_id))
            .map_err(StoreError::persistence)?;

        if chunk.is_stereo {
            let (mic, sys) = reader
                .extract_stereo(chunk.start_ms, chunk.end_ms, ASR_SAMPLE_RATE)
                .map_err(StoreError::persistence)?;
            self.run(session_id, &chunk, mic, Some(sys), options).await
        } else {
            let mic = reader
                .extract_mono(chunk.start_ms, chunk.end_ms, ASR_SAMPLE_RATE)
                .map_err(StoreError::persistence)?;
            self.run(session_id, &chunk, mic, None, options).await
        }
    }

    /// The pipeline proper. Input at 16 kHz.
    async fn run(
        &self,
        session_id: &str,
        chunk: &Chunk,
        mic_16k: Vec<f32>,
        sys_16k: Option<Vec<f32>>,
        options: &TranscribeOptions,
    ) -> Result<Chunk, StoreError> {
        let lock = self.session_lock(session_id);
        let _guard = lock.lock().await;

        self.store.mark_chunk_transcribing(session_id, &chunk.id)?;

        // Degenerate-stereo check: identical channels or a dead sys side
        // mean there is nothing stereo to do.
        let sys_16k = match sys_16k {
            Some(sys) if !is_degenerate_stereo(&mic_16k, &sys) => Some(sys),
            Some(_) => {
                tracing::info!(
                    "Chunk {}: degenerate stereo, falling back to mono",
                    chunk.index
                );
                None
            }
            None => None,
        };

        match sys_16k {
            None => self.run_mono(session_id, chunk, mic_16k, options).await,
            Some(sys) => self.run_stereo(session_id, chunk, mic_16k, sys, options).await,
        }
    }

    async fn run_mono(
        &self,
        session_id: &str,
        chunk: &Chunk,
        mic_16k: Vec<f32>,
        options: &TranscribeOptions,
    ) -> Result<Chunk, StoreError> {
        let mut outcome = self
            .transcribe_channel(mic_16k, Some(MIC_SPEAKER), chunk, options)
            .await;
        outcome.segments = offset_and_clamp(outcome.segments, chunk);

        tracing::info!(
            "Chunk {} (mono): {} segments{}",
            chunk.index,
            outcome.segments.len(),
            outcome
                .error
                .as_deref()
                .map(|e| format!(", error: {}", e))
                .unwrap_or_default()
        );

        self.store.update_chunk_transcription(
            session_id,
            &chunk.id,
            outcome.segments,
            outcome.error,
        )
    }

    async fn run_stereo(
        &self,
        session_id: &str,
        chunk: &Chunk,
        mic_16k: Vec<f32>,
        sys_16k: Vec<f32>,
        options: &TranscribeOptions,
    ) -> Result<Chunk, StoreError> {
        // Mic channel: always "You"
        let mic_outcome = if is_silent(&mic_16k, Some(SILENCE_FLOOR)) {
            ChannelOutcome {
                segments: Vec::new(),
                error: None,
            }
        } else {
            self.transcribe_channel(mic_16k, Some(MIC_SPEAKER), chunk, options)
                .await
        };

        // Sys channel: transcription plus diarization
        let (sys_outcome, sys_filtered) = if is_silent(&sys_16k, Some(SILENCE_FLOOR)) {
            (
                ChannelOutcome {
                    segments: Vec::new(),
                    error: None,
                },
                Vec::new(),
            )
        } else {
            let filtered = condition_channel(sys_16k);
            let outcome = self
                .transcribe_conditioned(filtered.clone(), None, chunk, options)
                .await;
            (outcome, filtered)
        };

        // Diarization runs on the original uncompressed sys channel so
        // its timestamps share the transcript's reference frame.
        let sys_segments = if options.diarization_enabled
            && chunk.index < options.diarization_chunk_cap
            && !sys_outcome.segments.is_empty()
            && !sys_filtered.is_empty()
        {
            self.diarize_and_label(session_id, sys_outcome.segments, sys_filtered, options)
                .await
        } else {
            sys_outcome.segments
        };

        // Offset everything into session time and clamp to the chunk
        let mic_segments = offset_and_clamp(mic_outcome.segments, chunk);
        let sys_segments = offset_and_clamp(sys_segments, chunk);

        let error = match (&mic_outcome.error, &sys_outcome.error) {
            (Some(m), Some(s)) => Some(format!("mic: {}; sys: {}", m, s)),
            (Some(m), None) => Some(format!("mic: {}", m)),
            (None, Some(s)) => Some(format!("sys: {}", s)),
            (None, None) => None,
        };

        let mic_text = text_of(&mic_segments);
        let sys_text = text_of(&sys_segments);

        tracing::info!(
            "Chunk {} (stereo): mic={} sys={} segments{}",
            chunk.index,
            mic_segments.len(),
            sys_segments.len(),
            error
                .as_deref()
                .map(|e| format!(", error: {}", e))
                .unwrap_or_default()
        );

        let updated = self.store.update_chunk_stereo_with_segments(
            session_id,
            &chunk.id,
            mic_text,
            sys_text,
            mic_segments,
            sys_segments,
            error,
        )?;

        // Keep the session's speaker profiles durable alongside chunks
        let session_dir = self.store.session_dir(session_id);
        if let Err(e) = self.speakers.save_profiles(session_id, &session_dir) {
            tracing::warn!("Failed to persist speaker profiles: {}", e);
        }

        Ok(updated)
    }

    /// Filter + VAD + ASR for one channel (chunk-local timestamps)
    async fn transcribe_channel(
        &self,
        samples_16k: Vec<f32>,
        speaker: Option<&str>,
        chunk: &Chunk,
        options: &TranscribeOptions,
    ) -> ChannelOutcome {
        let filtered = condition_channel(samples_16k);
        self.transcribe_conditioned(filtered, speaker, chunk, options)
            .await
    }

    async fn transcribe_conditioned(
        &self,
        filtered: Vec<f32>,
        speaker: Option<&str>,
        chunk: &Chunk,
        options: &TranscribeOptions,
    ) -> ChannelOutcome {
        let detector = SpeechDetector::new(options.vad.clone());
        let regions = detector.detect_speech(&filtered, ASR_SAMPLE_RATE);

        if regions.is_empty() {
            return ChannelOutcome {
                segments: Vec::new(),
                error: None,
            };
        }

        let hybrid = match self.build_hybrid(options) {
            Ok(h) => h,
            Err(e) => {
                return ChannelOutcome {
                    segments: Vec::new(),
                    error: Some(e.to_string()),
                }
            }
        };

        let result = if options.vad_mode == VadMode::PerRegion {
            self.transcribe_per_region(&hybrid, &filtered, regions, options)
                .await
        } else {
            self.transcribe_compressed(&hybrid, &filtered, regions, options)
                .await
        };

        match result {
            Ok(mut segments) => {
                if let Some(speaker) = speaker {
                    for seg in &mut segments {
                        seg.speaker = Some(speaker.to_string());
                        for word in &mut seg.words {
                            word.speaker = Some(speaker.to_string());
                        }
                    }
                }
                ChannelOutcome {
                    segments,
                    error: None,
                }
            }
            Err(e) => {
                tracing::error!("Chunk {} channel transcription failed: {}", chunk.index, e);
                ChannelOutcome {
                    segments: Vec::new(),
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// One ASR call per speech region, short regions merged first
    async fn transcribe_per_region(
        &self,
        hybrid: &Arc<HybridTranscriber>,
        samples: &[f32],
        regions: Vec<SpeechRegion>,
        options: &TranscribeOptions,
    ) -> Result<Vec<TranscriptSegment>> {
        let regions = merge_short_regions(regions);
        let mut all_segments = Vec::new();

        for region in regions {
            let s0 = (region.start_ms * ASR_SAMPLE_RATE as i64 / 1000) as usize;
            let s1 = ((region.end_ms * ASR_SAMPLE_RATE as i64 / 1000) as usize).min(samples.len());
            if s0 >= s1 {
                continue;
            }

            let slice = samples[s0..s1].to_vec();
            let mut segments = self.run_hybrid(hybrid.clone(), slice, options).await?;

            // Region-local back to channel-local time
            for seg in &mut segments {
                seg.start += region.start_ms;
                seg.end += region.start_ms;
                for word in &mut seg.words {
                    word.start += region.start_ms;
                    word.end += region.start_ms;
                }
            }
            all_segments.extend(segments);
        }

        Ok(all_segments)
    }

    /// Compress to speech, transcribe once, remap timestamps back
    async fn transcribe_compressed(
        &self,
        hybrid: &Arc<HybridTranscriber>,
        samples: &[f32],
        regions: Vec<SpeechRegion>,
        options: &TranscribeOptions,
    ) -> Result<Vec<TranscriptSegment>> {
        let (compressed, map): (Vec<f32>, TimestampMap) =
            compress_regions(samples, &regions, ASR_SAMPLE_RATE);

        if compressed.is_empty() {
            return Ok(Vec::new());
        }

        let mut segments = self.run_hybrid(hybrid.clone(), compressed, options).await?;
        map.apply_to_segments(&mut segments);
        Ok(segments)
    }

    /// Execute the hybrid transcriber off the async path, under the ASR
    /// timeout. Full-compare needs the async arbiter and runs inline.
    async fn run_hybrid(
        &self,
        hybrid: Arc<HybridTranscriber>,
        samples: Vec<f32>,
        options: &TranscribeOptions,
    ) -> Result<Vec<TranscriptSegment>> {
        if hybrid.mode() == HybridMode::FullCompare {
            let result = hybrid.transcribe_async(&samples).await?;
            return Ok(result.segments);
        }

        let timeout = options.asr_timeout;
        let result = tokio::task::spawn_blocking(move || {
            run_with_timeout("transcription", timeout, move || hybrid.transcribe(&samples))
        })
        .await
        .context("transcription task panicked")??;

        Ok(result.segments)
    }

    fn build_hybrid(&self, options: &TranscribeOptions) -> Result<Arc<HybridTranscriber>> {
        let primary = get_or_create_engine_cached(&options.model_id, &options.language)?;

        let secondary = if options.hybrid_enabled && !options.hybrid_secondary_model_id.is_empty()
        {
            match get_or_create_engine_cached(&options.hybrid_secondary_model_id, &options.language)
            {
                Ok(engine) => Some(engine),
                Err(e) => {
                    tracing::warn!("Secondary engine unavailable ({}), primary only", e);
                    None
                }
            }
        } else {
            None
        };

        let mode = if options.hybrid_enabled && secondary.is_some() {
            options.hybrid_mode
        } else {
            HybridMode::PrimaryOnly
        };

        {
            // Hotwords bias both engines
            let hotwords = options.hotwords.clone();
            primary.lock().set_hotwords(&hotwords).ok();
            if let Some(ref engine) = secondary {
                engine.lock().set_hotwords(&hotwords).ok();
            }
        }

        Ok(Arc::new(HybridTranscriber::new(
            primary,
            secondary,
            options.arbiter.clone(),
            HybridConfig {
                mode,
                hotwords: options.hotwords.clone(),
                ..Default::default()
            },
        )))
    }

    /// Diarize the sys channel, remap local speakers through the session
    /// registry, consolidate, and label the transcript.
    async fn diarize_and_label(
        &self,
        session_id: &str,
        segments: Vec<TranscriptSegment>,
        sys_filtered: Vec<f32>,
        options: &TranscribeOptions,
    ) -> Vec<TranscriptSegment> {
        let engine = match self.diarizer.read().clone() {
            Some(engine) => engine,
            None => return segments,
        };

        let timeout = options.diarization_timeout;
        let result = tokio::task::spawn_blocking(move || {
            run_with_timeout("diarization", timeout, move || {
                engine.diarize_with_embeddings(&sys_filtered)
            })
        })
        .await;

        let diarization = match result {
            Ok(Ok(d)) if !d.segments.is_empty() => d,
            Ok(Ok(_)) => return segments,
            Ok(Err(e)) => {
                // The chunk keeps its transcription without speaker labels
                tracing::warn!("Diarization failed: {}", e);
                return segments;
            }
            Err(e) => {
                tracing::warn!("Diarization task panicked: {}", e);
                return segments;
            }
        };

        // Local diarizer ids -> stable session speaker ids
        let remap = self
            .speakers
            .process_embeddings(session_id, &diarization.speaker_embeddings);

        let mut speaker_segments = diarization.segments;
        for seg in &mut speaker_segments {
            if let Some(&mapped) = remap.get(&seg.speaker) {
                seg.speaker = mapped;
            }
        }

        let speaker_segments = consolidate_segments(speaker_segments);

        // Render ids through the profiles: recognized names win
        let profiles = self.speakers.session_speakers(session_id);
        let label = move |id: i32| -> String {
            profiles
                .iter()
                .find(|p| p.speaker_id == id)
                .and_then(|p| p.recognized_name.clone())
                .unwrap_or_else(|| interlocutor_label(id))
        };

        apply_speakers(segments, &speaker_segments, label)
    }
}

/// Both channels effectively carry the same (or no) signal
fn is_degenerate_stereo(mic: &[f32], sys: &[f32]) -> bool {
    if sys.is_empty() {
        return true;
    }

    // A dead sys side (which also covers both-silent) leaves nothing
    // stereo about this chunk
    if calculate_rms(sys) < SILENCE_FLOOR {
        return true;
    }

    let len = mic.len().min(sys.len());
    let mut diff = 0.0f64;
    let mut combined = 0.0f64;
    for i in 0..len {
        diff += (mic[i] - sys[i]).abs() as f64;
        combined += (mic[i].abs() + sys[i].abs()) as f64;
    }

    combined > 0.0 && diff / combined < DEGENERATE_L1_RATIO as f64
}

/// Filter order is fixed: high-pass, de-click, gate, normalize, with
/// thresholds tuned from a probe of the raw window.
fn condition_channel(samples: Vec<f32>) -> Vec<f32> {
    let chain = FilterChain::tuned_for(&samples, ASR_SAMPLE_RATE);
    let mut out = samples;
    chain.process(&mut out);
    out
}

fn to_asr_rate(samples: Vec<f32>, source_rate: u32) -> Vec<f32> {
    if source_rate == ASR_SAMPLE_RATE {
        return samples;
    }
    echoscribe_audio::resample(&samples, source_rate, ASR_SAMPLE_RATE)
        .unwrap_or_else(|e| {
            tracing::warn!("Resample to 16 kHz failed ({}), using source rate", e);
            samples
        })
}

/// Merge regions shorter than 2 s with a neighbor within 3 s
fn merge_short_regions(regions: Vec<SpeechRegion>) -> Vec<SpeechRegion> {
    if regions.len() <= 1 {
        return regions;
    }

    let mut merged: Vec<SpeechRegion> = Vec::with_capacity(regions.len());

    for region in regions {
        match merged.last_mut() {
            Some(prev)
                if (prev.duration_ms() < SHORT_REGION_MS
                    || region.duration_ms() < SHORT_REGION_MS)
                    && region.start_ms - prev.end_ms <= REGION_MERGE_GAP_MS =>
            {
                prev.end_ms = region.end_ms;
            }
            _ => merged.push(region),
        }
    }

    merged
}

/// Shift chunk-local timestamps into session time; clamp out-of-range
/// values to the chunk interval, discard inverted intervals.
fn offset_and_clamp(segments: Vec<TranscriptSegment>, chunk: &Chunk) -> Vec<TranscriptSegment> {
    let mut out = Vec::with_capacity(segments.len());

    for mut seg in segments {
        seg.start = (seg.start + chunk.start_ms).clamp(chunk.start_ms, chunk.end_ms);
        seg.end = (seg.end + chunk.start_ms).clamp(chunk.start_ms, chunk.end_ms);
        if seg.end <= seg.start {
            continue;
        }

        seg.words.retain_mut(|word| {
            word.start = (word.start + chunk.start_ms).clamp(seg.start, seg.end);
            word.end = (word.end + chunk.start_ms).clamp(seg.start, seg.end);
            word.end > word.start
        });

        out.push(seg);
    }

    out
}

fn text_of(segments: &[TranscriptSegment]) -> Option<String> {
    if segments.is_empty() {
        return None;
    }
    Some(
        segments
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(" "),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use echoscribe_types::TranscriptWord;

    #[test]
    fn test_degenerate_stereo_on_silent_sys() {
        let mic = vec![0.1f32; 16_000];
        let sys = vec![0.0f32; 16_000];
        assert!(is_degenerate_stereo(&mic, &sys));
    }

    #[test]
    fn test_degenerate_stereo_on_duplicate_channels() {
        let mic: Vec<f32> = (0..16_000).map(|i| (i as f32 * 0.01).sin() * 0.3).collect();
        let mut sys = mic.clone();
        // Tiny per-sample deviation, far under 10% relative L1
        for s in sys.iter_mut() {
            *s += 0.0001;
        }
        assert!(is_degenerate_stereo(&mic, &sys));
    }

    #[test]
    fn test_distinct_channels_stay_stereo() {
        let mic: Vec<f32> = (0..16_000).map(|i| (i as f32 * 0.01).sin() * 0.3).collect();
        let sys: Vec<f32> = (0..16_000).map(|i| (i as f32 * 0.03).cos() * 0.3).collect();
        assert!(!is_degenerate_stereo(&mic, &sys));
    }

    #[test]
    fn test_merge_short_regions() {
        let regions = vec![
            SpeechRegion {
                start_ms: 0,
                end_ms: 1200,
            },
            SpeechRegion {
                start_ms: 2500,
                end_ms: 8000,
            },
            SpeechRegion {
                start_ms: 20_000,
                end_ms: 21_000,
            },
        ];

        let merged = merge_short_regions(regions);
        // First two merge (short + within 3 s); the far one stays
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].start_ms, 0);
        assert_eq!(merged[0].end_ms, 8000);
        assert_eq!(merged[1].start_ms, 20_000);
    }

    #[test]
    fn test_offset_and_clamp_discards_inverted() {
        let chunk = Chunk::new("s1", 0, 10_000, 40_000, true);
        let segments = vec![
            TranscriptSegment {
                start: 1000,
                end: 2000,
                text: "ok".into(),
                speaker: None,
                words: vec![TranscriptWord {
                    start: 1000,
                    end: 2000,
                    text: "ok".into(),
                    confidence: 0.9,
                    speaker: None,
                }],
                confidence: 0.9,
            },
            TranscriptSegment {
                start: 5000,
                end: 4000, // inverted: discarded
                text: "bad".into(),
                speaker: None,
                words: vec![],
                confidence: 0.9,
            },
            TranscriptSegment {
                start: 29_000,
                end: 99_000, // clamped to the chunk end
                text: "overrun".into(),
                speaker: None,
                words: vec![],
                confidence: 0.9,
            },
        ];

        let out = offset_and_clamp(segments, &chunk);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].start, 11_000);
        assert_eq!(out[0].words[0].start, 11_000);
        assert_eq!(out[1].end, 40_000);
    }
}

//! Live recording driver
//!
//! Owns the capture loop for one session: drains the microphone and the
//! system-audio channel, pairs the two buffers sample-for-sample, writes
//! interleaved stereo to the container, feeds the segmenter, and hands
//! finished chunks to the transcription pipeline without ever blocking
//! the capture path.
//!
//! The loop runs on a dedicated thread because `cpal::Stream` is not
//! Send; chunk transcription is spawned onto the tokio runtime.

use crate::error::StoreError;
use crate::events::EventBus;
use crate::pipeline::{ChunkPipeline, TranscribeOptions};
use crate::store::{NewSessionConfig, SessionStore};
use echoscribe_audio::{
    rms_level, AudioChannel, ChunkEvent, ChunkSegmenter, ContainerWriter, MicCapture,
    PipeSystemCapture, SystemAudioCapture, SystemCaptureConfig, VadConfig,
};
use echoscribe_types::protocol::Event;
use echoscribe_types::{RecordingState, Session, RECORD_SAMPLE_RATE};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;

/// Iterations (50 ms each) without system audio before the silence
/// fallback engages
const SYS_STALL_ITERATIONS: u32 = 40;

/// Recording parameters for one session
#[derive(Clone)]
pub struct RecorderConfig {
    pub mic_device: Option<String>,
    pub capture_system: bool,
    pub vad: VadConfig,
    pub transcribe: TranscribeOptions,
}

/// Outcome of the capture thread
struct CaptureOutcome {
    duration_ms: u64,
    sample_count: u64,
    capture_error: Option<String>,
}

/// Control surface of an active recording
struct ActiveRecording {
    session_id: String,
    stop_flag: Arc<AtomicBool>,
    mic_muted: Arc<AtomicBool>,
    sys_muted: Arc<AtomicBool>,
    join_handle: std::thread::JoinHandle<CaptureOutcome>,
}

/// Recording entry point
pub struct Recorder {
    store: Arc<SessionStore>,
    pipeline: Arc<ChunkPipeline>,
    events: EventBus,
    runtime: Handle,
    active: Mutex<Option<ActiveRecording>>,
}

impl Recorder {
    pub fn new(
        store: Arc<SessionStore>,
        pipeline: Arc<ChunkPipeline>,
        events: EventBus,
        runtime: Handle,
    ) -> Self {
        Self {
            store,
            pipeline,
            events,
            runtime,
            active: Mutex::new(None),
        }
    }

    /// Start a recording session
    pub fn start(&self, config: RecorderConfig) -> Result<Session, StoreError> {
        let mut active = self.active.lock();
        if active.is_some() {
            return Err(StoreError::AlreadyRecording);
        }

        let session = self.store.create_session(NewSessionConfig {
            language: config.transcribe.language.clone(),
            model: config.transcribe.model_id.clone(),
            sample_rate: RECORD_SAMPLE_RATE,
        })?;

        let stop_flag = Arc::new(AtomicBool::new(false));
        let mic_muted = Arc::new(AtomicBool::new(false));
        let sys_muted = Arc::new(AtomicBool::new(false));

        let ctx = CaptureContext {
            session_id: session.id.clone(),
            container_path: self.store.container_path(&session.id),
            config: config.clone(),
            stop_flag: stop_flag.clone(),
            mic_muted: mic_muted.clone(),
            sys_muted: sys_muted.clone(),
            store: self.store.clone(),
            pipeline: self.pipeline.clone(),
            events: self.events.clone(),
            runtime: self.runtime.clone(),
        };

        let join_handle = std::thread::Builder::new()
            .name(format!("capture-{}", &session.id[..8]))
            .spawn(move || capture_thread(ctx))
            .map_err(StoreError::persistence)?;

        *active = Some(ActiveRecording {
            session_id: session.id.clone(),
            stop_flag,
            mic_muted,
            sys_muted,
            join_handle,
        });

        self.events.emit(Event::SessionStarted {
            session: session.clone(),
        });

        Ok(session)
    }

    /// Stop the active recording, finalize the session
    pub fn stop(&self) -> Result<RecordingState, StoreError> {
        let recording = self
            .active
            .lock()
            .take()
            .ok_or(StoreError::NotRecording)?;

        recording.stop_flag.store(true, Ordering::SeqCst);

        let outcome = recording
            .join_handle
            .join()
            .map_err(|_| StoreError::Persistence("capture thread panicked".into()))?;

        let session_id = recording.session_id;

        if let Some(ref error) = outcome.capture_error {
            self.store.fail_session(&session_id, error)?;
        } else {
            self.store
                .stop_session(outcome.duration_ms, outcome.sample_count)?;

            // Cache the waveform envelope while the container is fresh
            let container_path = self.store.container_path(&session_id);
            let waveform_path = self.store.session_dir(&session_id).join("waveform.json");
            self.runtime.spawn(async move {
                let _ = tokio::task::spawn_blocking(move || {
                    match echoscribe_audio::waveform::Waveform::from_file(&container_path) {
                        Ok(waveform) => {
                            if let Err(e) = waveform.save(&waveform_path) {
                                tracing::warn!("Failed to cache waveform: {}", e);
                            }
                        }
                        Err(e) => tracing::warn!("Failed to compute waveform: {}", e),
                    }
                })
                .await;
            });
        }

        self.events.emit(Event::SessionStopped {
            session_id: session_id.clone(),
        });

        Ok(RecordingState {
            session_id,
            duration_ms: outcome.duration_ms,
            sample_count: outcome.sample_count,
        })
    }

    pub fn is_recording(&self) -> bool {
        self.active.lock().is_some()
    }

    /// Mute or unmute one channel mid-recording; muted samples are
    /// written (and transcribed) as silence
    pub fn set_channel_mute(&self, channel: &str, muted: bool) -> Result<(), StoreError> {
        let active = self.active.lock();
        let recording = active.as_ref().ok_or(StoreError::NotRecording)?;

        match channel {
            "mic" => recording.mic_muted.store(muted, Ordering::SeqCst),
            "sys" => recording.sys_muted.store(muted, Ordering::SeqCst),
            other => {
                return Err(StoreError::Validation(format!(
                    "unknown channel: {}",
                    other
                )))
            }
        }

        tracing::info!("Channel {} mute set to {}", channel, muted);
        Ok(())
    }
}

/// Everything the capture thread needs
struct CaptureContext {
    session_id: String,
    container_path: std::path::PathBuf,
    config: RecorderConfig,
    stop_flag: Arc<AtomicBool>,
    mic_muted: Arc<AtomicBool>,
    sys_muted: Arc<AtomicBool>,
    store: Arc<SessionStore>,
    pipeline: Arc<ChunkPipeline>,
    events: EventBus,
    runtime: Handle,
}

fn capture_thread(ctx: CaptureContext) -> CaptureOutcome {
    let failed = |error: String| CaptureOutcome {
        duration_ms: 0,
        sample_count: 0,
        capture_error: Some(error),
    };

    // Microphone is mandatory; its failure is fatal for the session
    let mut mic_capture = match MicCapture::new(ctx.config.mic_device.as_deref()) {
        Ok(c) => c,
        Err(e) => return failed(format!("mic capture: {}", e)),
    };
    if let Err(e) = mic_capture.start() {
        return failed(format!("mic capture: {}", e));
    }
    let mic_rate = mic_capture.sample_rate();
    let need_resample = mic_rate != RECORD_SAMPLE_RATE;

    // System audio is best-effort; without it the session is mono
    let mut sys_capture: Option<Box<dyn SystemAudioCapture>> = if ctx.config.capture_system {
        match PipeSystemCapture::new(SystemCaptureConfig::default()) {
            Ok(mut capture) => match capture.start() {
                Ok(()) => Some(Box::new(capture)),
                Err(e) => {
                    tracing::warn!("System audio capture unavailable: {}", e);
                    None
                }
            },
            Err(e) => {
                tracing::warn!("System audio capture unavailable: {}", e);
                None
            }
        }
    } else {
        None
    };

    let channels: u16 = if sys_capture.is_some() { 2 } else { 1 };
    let mut writer =
        match ContainerWriter::new(&ctx.container_path, RECORD_SAMPLE_RATE, channels, "128k") {
            Ok(w) => w,
            Err(e) => return failed(format!("container writer: {}", e)),
        };

    let mut segmenter = ChunkSegmenter::new(ctx.config.vad.clone(), RECORD_SAMPLE_RATE);

    tracing::info!(
        "Recording started: session={}, mic_rate={}, stereo={}",
        ctx.session_id,
        mic_rate,
        sys_capture.is_some()
    );

    let start_time = std::time::Instant::now();
    let mut mic_buffer: Vec<f32> = Vec::new();
    let mut sys_buffer: Vec<f32> = Vec::new();
    let mut sys_empty_streak: u32 = 0;
    let mut sys_disconnected = false;
    let mut sys_fallback_logged = false;

    loop {
        if ctx.stop_flag.load(Ordering::SeqCst) {
            break;
        }

        std::thread::sleep(std::time::Duration::from_millis(50));

        // Fresh mic samples at the container rate
        let new_mic_raw = mic_capture.drain_samples();
        let new_mic: Vec<f32> = if need_resample && !new_mic_raw.is_empty() {
            match echoscribe_audio::resample(&new_mic_raw, mic_rate, RECORD_SAMPLE_RATE) {
                Ok(resampled) => resampled,
                Err(e) => {
                    tracing::warn!("Mic resample failed: {}, using raw samples", e);
                    new_mic_raw.clone()
                }
            }
        } else {
            new_mic_raw.clone()
        };

        // Drain the system channel without blocking
        let mut sys_level: f32 = 0.0;
        let mut sys_recv_count = 0u32;
        if let Some(ref sys) = sys_capture {
            loop {
                match sys.receiver().try_recv() {
                    Ok(data) => {
                        if data.channel == AudioChannel::System {
                            sys_level = rms_level(&data.samples);
                            sys_buffer.extend_from_slice(&data.samples);
                            sys_recv_count += 1;
                        }
                    }
                    Err(std::sync::mpsc::TryRecvError::Empty) => break,
                    Err(std::sync::mpsc::TryRecvError::Disconnected) => {
                        if !sys_disconnected {
                            tracing::error!("System audio channel disconnected");
                            sys_disconnected = true;
                        }
                        break;
                    }
                }
            }

            if sys_recv_count > 0 {
                sys_empty_streak = 0;
            } else {
                sys_empty_streak += 1;
                if sys_empty_streak == SYS_STALL_ITERATIONS {
                    tracing::warn!(
                        "No system audio for ~2 s (sys_buffer={}, mic_buffer={})",
                        sys_buffer.len(),
                        mic_buffer.len()
                    );
                }
            }
        }

        if !new_mic.is_empty() {
            mic_buffer.extend_from_slice(&new_mic);
        }

        let is_mic_muted = ctx.mic_muted.load(Ordering::Relaxed);
        let is_sys_muted = ctx.sys_muted.load(Ordering::Relaxed);

        if sys_capture.is_some() {
            // A stalled or dead system channel must not dam the mic side:
            // substitute silence so pairing keeps moving
            if (sys_disconnected || sys_empty_streak >= SYS_STALL_ITERATIONS)
                && sys_buffer.is_empty()
                && !mic_buffer.is_empty()
            {
                sys_buffer.resize(mic_buffer.len(), 0.0);
                if !sys_fallback_logged {
                    tracing::warn!("System audio unavailable, silence fallback engaged");
                    sys_fallback_logged = true;
                }
            }

            // Only aligned pairs are written; leftovers wait for the
            // other channel
            let min_len = mic_buffer.len().min(sys_buffer.len());
            if min_len > 0 {
                let mut mic_chunk: Vec<f32> = mic_buffer.drain(..min_len).collect();
                let mut sys_chunk: Vec<f32> = sys_buffer.drain(..min_len).collect();

                if is_mic_muted {
                    mic_chunk.iter_mut().for_each(|s| *s = 0.0);
                }
                if is_sys_muted {
                    sys_chunk.iter_mut().for_each(|s| *s = 0.0);
                }

                if let Err(e) = writer.write_stereo(&mic_chunk, &sys_chunk) {
                    tracing::error!("Container write failed: {}", e);
                }
                segmenter.process_stereo(&mic_chunk, &sys_chunk);
            }
        } else if !new_mic.is_empty() {
            let mut mono: Vec<f32> = std::mem::take(&mut mic_buffer);
            if is_mic_muted {
                mono.iter_mut().for_each(|s| *s = 0.0);
            }
            if let Err(e) = writer.write(&mono) {
                tracing::error!("Container write failed: {}", e);
            }
            segmenter.process(&mono);
        }

        // Dispatch finished chunks off the capture path
        while let Some(event) = segmenter.try_recv() {
            dispatch_chunk(&ctx, event, false);
        }

        // Level metering for the UI
        let mic_level = if is_mic_muted {
            0.0
        } else {
            rms_level(&new_mic_raw)
        };
        ctx.events.emit(Event::AudioLevel {
            mic_level,
            sys_level: if is_sys_muted { 0.0 } else { sys_level },
            duration: start_time.elapsed().as_secs_f64(),
            mic_muted: is_mic_muted,
            sys_muted: is_sys_muted,
        });
    }

    // Drain whatever is still in flight
    let final_mic_raw = mic_capture.stop();
    if !final_mic_raw.is_empty() {
        let final_mic = if need_resample {
            echoscribe_audio::resample(&final_mic_raw, mic_rate, RECORD_SAMPLE_RATE)
                .unwrap_or(final_mic_raw)
        } else {
            final_mic_raw
        };
        mic_buffer.extend_from_slice(&final_mic);
    }

    if let Some(ref mut sys) = sys_capture {
        while let Ok(data) = sys.receiver().try_recv() {
            sys_buffer.extend_from_slice(&data.samples);
        }
        let _ = sys.stop();
    }

    if sys_capture.is_some() {
        let min_len = mic_buffer.len().min(sys_buffer.len());
        if min_len > 0 {
            let mic_final: Vec<f32> = mic_buffer.drain(..min_len).collect();
            let sys_final: Vec<f32> = sys_buffer.drain(..min_len).collect();
            let _ = writer.write_stereo(&mic_final, &sys_final);
            segmenter.process_stereo(&mic_final, &sys_final);
        }

        // The sys side may have ended short; pad it with silence so the
        // mic tail is not lost
        if !mic_buffer.is_empty() {
            let silence = vec![0.0f32; mic_buffer.len()];
            let _ = writer.write_stereo(&mic_buffer, &silence);
            segmenter.process_stereo(&mic_buffer, &silence);
            mic_buffer.clear();
        }
    } else if !mic_buffer.is_empty() {
        let _ = writer.write(&mic_buffer);
        segmenter.process(&mic_buffer);
        mic_buffer.clear();
    }

    // Emit the residue as final chunks
    for event in segmenter.flush_all() {
        dispatch_chunk(&ctx, event, true);
    }

    let duration_ms = writer.duration_ms();
    let sample_count = writer.samples_written() as u64;

    if let Err(e) = writer.close() {
        tracing::error!("Container finalize failed: {}", e);
    }

    tracing::info!(
        "Recording stopped: session={}, {} ms, {} samples, {} chunks",
        ctx.session_id,
        duration_ms,
        sample_count,
        segmenter.chunk_count()
    );

    CaptureOutcome {
        duration_ms,
        sample_count,
        capture_error: None,
    }
}

/// Register a chunk with the store and spawn its transcription
fn dispatch_chunk(ctx: &CaptureContext, event: ChunkEvent, is_final: bool) {
    let is_stereo = event.mic_samples.is_some();

    let chunk = match ctx
        .store
        .add_chunk(&ctx.session_id, event.start_ms, event.end_ms, is_stereo)
    {
        Ok(chunk) => chunk,
        Err(e) => {
            tracing::error!("Failed to register chunk: {}", e);
            return;
        }
    };

    tracing::info!(
        "Chunk created: {} ({} - {} ms){}",
        chunk.index,
        event.start_ms,
        event.end_ms,
        if is_final { " [final]" } else { "" }
    );

    ctx.events.emit(Event::ChunkTranscribing {
        session_id: ctx.session_id.clone(),
        chunk_id: chunk.id.clone(),
        chunk_index: chunk.index,
    });

    let pipeline = ctx.pipeline.clone();
    let events = ctx.events.clone();
    let session_id = ctx.session_id.clone();
    let options = ctx.config.transcribe.clone();
    let (mic, sys) = match (event.mic_samples, event.sys_samples) {
        (Some(mic), sys) => (mic, sys),
        (None, _) => (event.samples, None),
    };

    ctx.runtime.spawn(async move {
        match pipeline
            .transcribe_chunk_samples(&session_id, &chunk, mic, sys, RECORD_SAMPLE_RATE, &options)
            .await
        {
            Ok(updated) => {
                events.emit(Event::ChunkTranscribed {
                    session_id,
                    chunk: updated,
                });
            }
            Err(e) => {
                tracing::error!("Chunk {} transcription failed: {}", chunk.index, e);
                events.emit(Event::ChunkError {
                    session_id,
                    chunk_id: chunk.id.clone(),
                    error: e.to_string(),
                });
            }
        }
    });
}

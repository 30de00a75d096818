//! EchoScribe daemon
//!
//! The control channel: newline-delimited JSON commands on stdin, events
//! on stdout, one client per process. All behavior lives in the core
//! crates; this binary only dispatches.
//!
//! Logs go to stderr so stdout stays reserved for the protocol stream.

mod models;

use anyhow::Result;
use echoscribe_audio::segmenter::{VadConfig, VadMode};
use echoscribe_core::{
    config, ChunkPipeline, EventBus, EventSink, Recorder, RecorderConfig, Retranscriber,
    SessionObserver, SessionStore, TranscribeOptions,
};
use echoscribe_ml::{
    DiarizationConfig, HybridMode, PipeDiarizationEngine, SessionSpeakerRegistry, VadMethod,
    VadSettings, VoicePrintRegistry, VoicePrintThresholds,
};
use echoscribe_types::protocol::{Command, Event};
use echoscribe_types::{Chunk, Settings, VoicePrintInfo};
use parking_lot::RwLock;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Serializes protocol events onto stdout
struct StdoutSink {
    out: parking_lot::Mutex<io::Stdout>,
}

impl EventSink for StdoutSink {
    fn emit(&self, event: Event) {
        let mut out = self.out.lock();
        match serde_json::to_string(&event) {
            Ok(line) => {
                let _ = writeln!(out, "{}", line);
                let _ = out.flush();
            }
            Err(e) => tracing::error!("Failed to serialize event: {}", e),
        }
    }
}

/// Forwards store notifications onto the control channel
struct StoreBridge {
    events: EventBus,
}

impl SessionObserver for StoreBridge {
    fn on_chunk_ready(&self, session_id: &str, chunk: &Chunk) {
        self.events.emit(Event::ChunkCreated {
            session_id: session_id.to_string(),
            chunk: chunk.clone(),
        });
    }
}

struct Daemon {
    store: Arc<SessionStore>,
    voiceprints: Arc<VoicePrintRegistry>,
    speakers: Arc<SessionSpeakerRegistry>,
    pipeline: Arc<ChunkPipeline>,
    recorder: Arc<Recorder>,
    retranscriber: Arc<Retranscriber>,
    events: EventBus,
    settings: RwLock<Settings>,
}

fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    tracing::info!("EchoScribe daemon starting");

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("Failed to start runtime: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = run(&runtime) {
        tracing::error!("Daemon error: {}", e);
        std::process::exit(1);
    }

    tracing::info!("EchoScribe daemon shutting down");
}

fn run(runtime: &tokio::runtime::Runtime) -> Result<()> {
    let data_dir = config::data_dir();
    let sessions_dir = config::sessions_dir();
    std::fs::create_dir_all(&sessions_dir)?;

    let events = EventBus::new();
    events.subscribe(Arc::new(StdoutSink {
        out: parking_lot::Mutex::new(io::stdout()),
    }));

    let store = Arc::new(SessionStore::new(sessions_dir));
    store.add_observer(Arc::new(StoreBridge {
        events: events.clone(),
    }));

    let voiceprints = Arc::new(VoicePrintRegistry::new(
        data_dir,
        VoicePrintThresholds::default(),
    )?);
    let speakers = Arc::new(SessionSpeakerRegistry::new(Some(voiceprints.clone())));
    let pipeline = Arc::new(ChunkPipeline::new(store.clone(), speakers.clone()));

    let recorder = Arc::new(Recorder::new(
        store.clone(),
        pipeline.clone(),
        events.clone(),
        runtime.handle().clone(),
    ));
    let retranscriber = Arc::new(Retranscriber::new(
        store.clone(),
        pipeline.clone(),
        events.clone(),
    ));

    let daemon = Daemon {
        store,
        voiceprints,
        speakers,
        pipeline,
        recorder,
        retranscriber,
        events,
        settings: RwLock::new(config::load_settings()),
    };

    tracing::info!("Daemon ready, listening for commands");

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let command: Command = match serde_json::from_str(&line) {
            Ok(cmd) => cmd,
            Err(e) => {
                daemon.events.emit(Event::Error {
                    message: format!("Invalid command: {}", e),
                });
                continue;
            }
        };

        if matches!(command, Command::Shutdown) {
            daemon.events.emit(Event::Ok);
            break;
        }

        dispatch(&daemon, runtime, command);
    }

    Ok(())
}

fn dispatch(daemon: &Daemon, runtime: &tokio::runtime::Runtime, command: Command) {
    let reply = handle(daemon, runtime, command);
    match reply {
        Ok(Some(event)) => daemon.events.emit(event),
        Ok(None) => {}
        Err(e) => daemon.events.emit(Event::Error {
            message: e.to_string(),
        }),
    }
}

/// Handle one command. `Ok(Some(_))` is the immediate reply; long
/// operations are spawned and answer through events.
fn handle(
    daemon: &Daemon,
    runtime: &tokio::runtime::Runtime,
    command: Command,
) -> Result<Option<Event>> {
    match command {
        Command::GetDevices => {
            let devices = echoscribe_audio::list_input_devices()?;
            Ok(Some(Event::Devices { devices }))
        }

        Command::GetModels => Ok(Some(Event::Models {
            models: models::list_models(),
        })),

        Command::SetActiveModel { model_id } => {
            {
                let mut settings = daemon.settings.write();
                settings.model_id = model_id;
                config::save_settings(&settings)?;
            }
            Ok(Some(Event::Ok))
        }

        Command::StartSession {
            language,
            model,
            mic_device,
            capture_system,
            vad_mode,
            hybrid_enabled,
            hybrid_secondary_model,
            hybrid_mode,
        } => {
            let mut options = transcribe_options(daemon);
            if let Some(language) = language {
                options.language = language;
            }
            if let Some(model) = model {
                options.model_id = model;
            }
            options.hybrid_enabled = hybrid_enabled;
            if let Some(secondary) = hybrid_secondary_model {
                options.hybrid_secondary_model_id = secondary;
            }
            if let Some(mode) = hybrid_mode {
                options.hybrid_mode = HybridMode::from_str(&mode);
            }

            let mode = vad_mode
                .as_deref()
                .map(VadMode::from_str)
                .unwrap_or(VadMode::Auto);
            options.vad_mode = mode;

            daemon.recorder.start(RecorderConfig {
                mic_device,
                capture_system,
                vad: VadConfig {
                    mode,
                    ..Default::default()
                },
                transcribe: options,
            })?;
            // session_started is emitted by the recorder
            Ok(None)
        }

        Command::StopSession => {
            daemon.recorder.stop()?;
            Ok(Some(Event::Ok))
        }

        Command::SetChannelMute { channel, muted } => {
            daemon.recorder.set_channel_mute(&channel, muted)?;
            Ok(Some(Event::Ok))
        }

        Command::ListSessions => Ok(Some(Event::Sessions {
            sessions: daemon.store.list(),
        })),

        Command::GetSession { session_id } => {
            let session = daemon
                .store
                .get(&session_id)
                .ok_or_else(|| anyhow::anyhow!("session not found: {}", session_id))?;
            Ok(Some(Event::Session { session }))
        }

        Command::DeleteSession { session_id } => {
            daemon.store.delete(&session_id)?;
            daemon.speakers.clear_session_profiles(&session_id);
            Ok(Some(Event::Ok))
        }

        Command::SetSessionTitle { session_id, title } => {
            daemon.store.set_title(&session_id, &title)?;
            Ok(Some(Event::Ok))
        }

        Command::RetranscribeChunk {
            session_id,
            chunk_id,
            model,
            language,
        } => {
            let mut options = transcribe_options(daemon);
            if let Some(model) = model {
                options.model_id = model;
            }
            if let Some(language) = language {
                options.language = language;
            }

            let pipeline = daemon.pipeline.clone();
            let events = daemon.events.clone();
            runtime.spawn(async move {
                match pipeline
                    .retranscribe_chunk(&session_id, &chunk_id, &options)
                    .await
                {
                    Ok(chunk) => events.emit(Event::ChunkTranscribed { session_id, chunk }),
                    Err(e) => events.emit(Event::ChunkError {
                        session_id,
                        chunk_id,
                        error: e.to_string(),
                    }),
                }
            });
            Ok(None)
        }

        Command::RetranscribeFull {
            session_id,
            model,
            language,
            diarization_enabled,
        } => {
            let mut options = transcribe_options(daemon);
            if let Some(model) = model {
                options.model_id = model;
            }
            if let Some(language) = language {
                options.language = language;
            }
            options.diarization_enabled = diarization_enabled && daemon.pipeline.has_diarizer();

            let retranscriber = daemon.retranscriber.clone();
            runtime.spawn(async move {
                let _ = retranscriber.retranscribe_full(&session_id, options).await;
            });
            Ok(None)
        }

        Command::CancelFullTranscription { session_id } => {
            daemon.retranscriber.cancel(&session_id);
            Ok(Some(Event::Ok))
        }

        Command::EnableDiarization {
            backend: _,
            provider: _,
            segmentation_path: _,
            embedding_path: _,
        } => {
            let engine = PipeDiarizationEngine::new(DiarizationConfig::default())?;
            daemon.pipeline.set_diarizer(Arc::new(engine));
            {
                let mut settings = daemon.settings.write();
                settings.enable_diarization = true;
                config::save_settings(&settings)?;
            }
            Ok(Some(Event::Ok))
        }

        Command::DisableDiarization => {
            daemon.pipeline.clear_diarizer();
            {
                let mut settings = daemon.settings.write();
                settings.enable_diarization = false;
                config::save_settings(&settings)?;
            }
            Ok(Some(Event::Ok))
        }

        Command::GetSessionSpeakers { session_id } => Ok(Some(Event::SpeakersUpdated {
            speakers: daemon.speakers.session_speakers(&session_id),
            session_id,
        })),

        Command::RenameSessionSpeaker {
            session_id,
            local_speaker_id,
            new_name,
            save_as_voiceprint,
        } => {
            let old_name = daemon
                .speakers
                .session_speakers(&session_id)
                .into_iter()
                .find(|p| p.speaker_id == local_speaker_id)
                .and_then(|p| p.recognized_name);

            daemon.speakers.rename_speaker(
                &session_id,
                local_speaker_id,
                &new_name,
                save_as_voiceprint,
            )?;
            daemon.store.update_speaker_name(
                &session_id,
                local_speaker_id,
                old_name.as_deref(),
                &new_name,
            )?;
            daemon
                .speakers
                .save_profiles(&session_id, &daemon.store.session_dir(&session_id))?;

            Ok(Some(Event::SpeakersUpdated {
                speakers: daemon.speakers.session_speakers(&session_id),
                session_id,
            }))
        }

        Command::ListVoiceprints => {
            let voiceprints = daemon
                .voiceprints
                .list()
                .into_iter()
                .map(|vp| VoicePrintInfo {
                    id: vp.id,
                    name: vp.name,
                    created_at: vp.created_at,
                    last_seen_at: vp.last_seen_at,
                    seen_count: vp.seen_count,
                    source: vp.source,
                })
                .collect();
            Ok(Some(Event::Voiceprints { voiceprints }))
        }

        Command::RenameVoiceprint {
            voiceprint_id,
            name,
        } => {
            daemon.voiceprints.update_name(&voiceprint_id, &name)?;
            Ok(Some(Event::Ok))
        }

        Command::DeleteVoiceprint { voiceprint_id } => {
            daemon.voiceprints.delete(&voiceprint_id)?;
            Ok(Some(Event::Ok))
        }

        Command::ImportFile {
            path,
            model,
            language,
        } => {
            let mut options = transcribe_options(daemon);
            if let Some(model) = model {
                options.model_id = model;
            }
            if let Some(language) = language {
                options.language = language;
            }

            let store = daemon.store.clone();
            let pipeline = daemon.pipeline.clone();
            let events = daemon.events.clone();
            runtime.spawn(async move {
                if let Err(e) = echoscribe_core::import_audio_file(
                    &store,
                    &pipeline,
                    &events,
                    std::path::Path::new(&path),
                    &options,
                )
                .await
                {
                    events.emit(Event::Error {
                        message: format!("import failed: {}", e),
                    });
                }
            });
            Ok(None)
        }

        Command::Shutdown => Ok(Some(Event::Ok)),
    }
}

/// Build pipeline options from the persisted settings
fn transcribe_options(daemon: &Daemon) -> TranscribeOptions {
    let settings = daemon.settings.read();
    TranscribeOptions {
        model_id: settings.model_id.clone(),
        language: settings.language.clone(),
        hotwords: settings.hotwords.clone(),
        vad_mode: VadMode::from_str(&settings.vad_mode),
        vad: VadSettings {
            method: VadMethod::from_str(&settings.vad_method),
            ..Default::default()
        },
        hybrid_enabled: settings.hybrid_enabled,
        hybrid_secondary_model_id: settings.hybrid_secondary_model_id.clone(),
        hybrid_mode: HybridMode::from_str(&settings.hybrid_mode),
        diarization_enabled: settings.enable_diarization && daemon.pipeline.has_diarizer(),
        ..Default::default()
    }
}

//! EchoScribe core
//!
//! The recording and transcription engine: session store, live capture
//! driver, per-chunk transcription pipeline, full re-transcription and
//! audio import. The control channel and model management sit on top of
//! this crate.

pub mod config;
pub mod error;
pub mod events;
pub mod import;
pub mod pipeline;
pub mod recorder;
pub mod retranscribe;
pub mod store;
pub mod timeout;

pub use error::StoreError;
pub use events::{EventBus, EventSink, NullSink};
pub use import::import_audio_file;
pub use pipeline::{ChunkPipeline, TranscribeOptions};
pub use recorder::{Recorder, RecorderConfig};
pub use retranscribe::Retranscriber;
pub use store::{NewSessionConfig, SessionObserver, SessionStore};
pub use timeout::run_with_timeout;

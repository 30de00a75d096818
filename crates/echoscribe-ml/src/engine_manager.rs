//! Transcription engine construction and caching
//!
//! Engines are expensive to load and single-occupancy: each lives behind
//! a mutex and at most one transcription call is in flight per engine.
//! Live recording reuses loaded engines through a process-wide cache
//! keyed by (model id, language).

use crate::traits::TranscriptionEngine;
use crate::{CtcEngine, WhisperEngine};
use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

/// An engine behind its occupancy lock
pub type SharedEngine = Arc<Mutex<Box<dyn TranscriptionEngine>>>;

/// Engine family, derived from the model id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    /// whisper.cpp GGML models
    Whisper,
    /// ONNX CTC acoustic models
    Ctc,
}

impl EngineKind {
    pub fn from_model_id(model_id: &str) -> Self {
        if model_id.starts_with("ctc") || model_id.contains("-ctc") || model_id.ends_with(".onnx") {
            EngineKind::Ctc
        } else {
            EngineKind::Whisper
        }
    }
}

/// Engine factory bound to a models directory
pub struct EngineManager {
    models_dir: PathBuf,
}

impl EngineManager {
    pub fn new(models_dir: PathBuf) -> Self {
        Self { models_dir }
    }

    /// Default models directory under the app data dir
    pub fn default_models_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("echoscribe")
            .join("models")
    }

    pub fn models_dir(&self) -> &PathBuf {
        &self.models_dir
    }

    /// Build an engine for the model with the language applied
    pub fn create_engine(
        &self,
        model_id: &str,
        language: &str,
    ) -> Result<Box<dyn TranscriptionEngine>> {
        let kind = EngineKind::from_model_id(model_id);

        let mut engine: Box<dyn TranscriptionEngine> = match kind {
            EngineKind::Whisper => {
                let model_path = self.model_path(model_id)?;
                let engine = WhisperEngine::new(
                    model_path
                        .to_str()
                        .context("Model path is not valid UTF-8")?,
                )?;
                tracing::info!("EngineManager: created whisper engine for {}", model_id);
                Box::new(engine)
            }
            EngineKind::Ctc => {
                let model_path = self.model_path(model_id)?;
                let vocab_path = self.vocab_path(model_id)?;
                let engine = CtcEngine::new(
                    model_path
                        .to_str()
                        .context("Model path is not valid UTF-8")?,
                    vocab_path
                        .to_str()
                        .context("Vocab path is not valid UTF-8")?,
                )?;
                tracing::info!("EngineManager: created CTC engine for {}", model_id);
                Box::new(engine)
            }
        };

        if !language.is_empty() {
            if let Err(e) = engine.set_language(language) {
                tracing::warn!("EngineManager: failed to set language {}: {}", language, e);
            }
        }

        Ok(engine)
    }

    /// Resolve the model file on disk
    fn model_path(&self, model_id: &str) -> Result<PathBuf> {
        let file_name = match EngineKind::from_model_id(model_id) {
            EngineKind::Whisper => format!("{}.bin", model_id),
            EngineKind::Ctc => format!("{}.onnx", model_id),
        };

        let path = self.models_dir.join(&file_name);
        if !path.exists() {
            anyhow::bail!("Model file not found: {:?}", path);
        }
        Ok(path)
    }

    /// Resolve the vocab file for a CTC model
    fn vocab_path(&self, model_id: &str) -> Result<PathBuf> {
        let candidates = [
            format!("{}_vocab.txt", model_id),
            format!("{}.vocab", model_id),
            "vocab.txt".to_string(),
        ];

        for name in &candidates {
            let path = self.models_dir.join(name);
            if path.exists() {
                return Ok(path);
            }
        }

        anyhow::bail!("Vocab file not found. Tried: {:?}", candidates)
    }
}

fn engine_cache() -> &'static Mutex<HashMap<String, SharedEngine>> {
    static CACHE: OnceLock<Mutex<HashMap<String, SharedEngine>>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Get a cached engine, loading it on first use.
///
/// Keyed by (model id, language) so a language switch gets a fresh
/// engine instead of mutating one that may be mid-transcription.
pub fn get_or_create_engine_cached(model_id: &str, language: &str) -> Result<SharedEngine> {
    let key = format!("{}:{}", model_id, language);

    if let Some(engine) = engine_cache().lock().get(&key) {
        return Ok(engine.clone());
    }

    let manager = EngineManager::new(EngineManager::default_models_dir());
    let engine: SharedEngine = Arc::new(Mutex::new(manager.create_engine(model_id, language)?));

    engine_cache()
        .lock()
        .insert(key, engine.clone());

    Ok(engine)
}

/// Drop all cached engines (used when switching the active model set)
pub fn clear_engine_cache() {
    engine_cache().lock().clear();
    tracing::info!("EngineManager: engine cache cleared");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_kind_from_model_id() {
        assert_eq!(
            EngineKind::from_model_id("ggml-large-v3-turbo"),
            EngineKind::Whisper
        );
        assert_eq!(EngineKind::from_model_id("ggml-base"), EngineKind::Whisper);
        assert_eq!(EngineKind::from_model_id("ctc-ru-v3"), EngineKind::Ctc);
        assert_eq!(EngineKind::from_model_id("acoustic-ctc"), EngineKind::Ctc);
    }

    #[test]
    fn test_missing_model_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let manager = EngineManager::new(dir.path().to_path_buf());
        assert!(manager.create_engine("ggml-base", "en").is_err());
    }
}

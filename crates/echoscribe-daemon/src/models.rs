//! Static model registry
//!
//! Download and cache management live outside the daemon; this registry
//! only names the models the engines can load and reports whether their
//! files are present on disk.

use echoscribe_ml::EngineManager;
use echoscribe_types::ModelInfo;

fn entry(id: &str, name: &str, engine: &str, size_bytes: u64, recommended: bool) -> ModelInfo {
    ModelInfo {
        id: id.to_string(),
        name: name.to_string(),
        engine: engine.to_string(),
        size_bytes,
        languages: vec!["multi".to_string()],
        recommended,
        status: "not_downloaded".to_string(),
        path: None,
    }
}

/// The known models with their on-disk status
pub fn list_models() -> Vec<ModelInfo> {
    let mut models = vec![
        entry(
            "ggml-large-v3-turbo",
            "Large V3 Turbo",
            "whisper",
            1_624_417_792,
            true,
        ),
        entry("ggml-medium", "Medium", "whisper", 1_533_774_781, false),
        entry("ggml-base", "Base", "whisper", 147_951_465, false),
        entry("acoustic-ctc-v3", "Acoustic CTC v3", "ctc", 225_000_000, false),
        entry("silero-vad-v5", "Silero VAD v5", "vad", 2_327_524, true),
    ];

    let models_dir = EngineManager::default_models_dir();

    for model in models.iter_mut() {
        let candidates = [
            models_dir.join(format!("{}.bin", model.id)),
            models_dir.join(format!("{}.onnx", model.id)),
            models_dir.join("silero_vad.onnx"),
        ];

        for path in candidates {
            // The VAD fallback name only applies to the VAD entry
            if path.file_name().map(|n| n == "silero_vad.onnx").unwrap_or(false)
                && model.engine != "vad"
            {
                continue;
            }
            if path.exists() {
                model.status = "downloaded".to_string();
                model.path = Some(path.to_string_lossy().to_string());
                break;
            }
        }
    }

    models
}

//! Voice activity detection
//!
//! Two implementations behind one contract: a cheap RMS-energy detector
//! and the Silero neural classifier (ONNX). `Auto` prefers the neural
//! model and falls back to energy when it is missing or fails.
//!
//! Both emit [`SpeechRegion`] lists in milliseconds with the same
//! post-processing: nearby regions merged, sub-minimum regions dropped
//! unless a region is the only activity in the buffer.

use anyhow::{Context, Result};
use echoscribe_types::{SpeechRegion, ASR_SAMPLE_RATE};
use ort::session::{builder::GraphOptimizationLevel, Session};
use std::sync::Mutex;

/// Detection method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VadMethod {
    Energy,
    Neural,
    #[default]
    Auto,
}

impl VadMethod {
    pub fn from_str(s: &str) -> Self {
        match s {
            "energy" => VadMethod::Energy,
            "neural" => VadMethod::Neural,
            _ => VadMethod::Auto,
        }
    }
}

/// Detection settings
#[derive(Debug, Clone)]
pub struct VadSettings {
    pub method: VadMethod,
    /// RMS window for the energy variant (10-50 ms)
    pub energy_window_ms: u32,
    /// RMS at or above this is speech
    pub energy_threshold: f32,
    /// A pause of at least this length splits regions
    pub silence_duration_ms: u32,
    /// Regions shorter than this are dropped (unless alone)
    pub min_region_ms: u32,
    /// Regions closer than this merge
    pub merge_gap_ms: u32,
    /// Path to the Silero ONNX model
    pub neural_model_path: Option<String>,
    /// Speech probability threshold for the neural variant
    pub neural_threshold: f32,
    /// Padding applied around neural regions
    pub speech_pad_ms: u32,
}

impl Default for VadSettings {
    fn default() -> Self {
        Self {
            method: VadMethod::Auto,
            energy_window_ms: 30,
            energy_threshold: 0.02,
            silence_duration_ms: 1000,
            min_region_ms: 250,
            merge_gap_ms: 700,
            neural_model_path: None,
            neural_threshold: 0.45,
            speech_pad_ms: 250,
        }
    }
}

/// Speech detector over the configured method
pub struct SpeechDetector {
    settings: VadSettings,
    neural: Option<SileroVad>,
}

impl SpeechDetector {
    pub fn new(settings: VadSettings) -> Self {
        let neural = match settings.method {
            VadMethod::Energy => None,
            VadMethod::Neural | VadMethod::Auto => {
                settings.neural_model_path.as_deref().and_then(|path| {
                    match SileroVad::new(path, settings.neural_threshold, settings.speech_pad_ms) {
                        Ok(vad) => Some(vad),
                        Err(e) => {
                            tracing::warn!("Silero VAD unavailable ({}), energy fallback", e);
                            None
                        }
                    }
                })
            }
        };

        Self { settings, neural }
    }

    /// Detect speech regions. Input at any rate; non-16 kHz audio is
    /// resampled before detection (timestamps are rate-independent).
    pub fn detect_speech(&self, samples: &[f32], sample_rate: u32) -> Vec<SpeechRegion> {
        if samples.is_empty() {
            return vec![];
        }

        let resampled;
        let (samples, sample_rate) = if sample_rate == ASR_SAMPLE_RATE {
            (samples, sample_rate)
        } else {
            resampled = resample_linear(samples, sample_rate, ASR_SAMPLE_RATE);
            (resampled.as_slice(), ASR_SAMPLE_RATE)
        };

        let raw = match (&self.settings.method, &self.neural) {
            (VadMethod::Energy, _) | (_, None) => self.detect_energy(samples, sample_rate),
            (_, Some(neural)) => match neural.detect_regions(samples, sample_rate) {
                Ok(regions) => regions,
                Err(e) => {
                    tracing::warn!("Neural VAD failed ({}), energy fallback", e);
                    self.detect_energy(samples, sample_rate)
                }
            },
        };

        post_process(
            raw,
            self.settings.merge_gap_ms as i64,
            self.settings.min_region_ms as i64,
        )
    }

    /// RMS-window detection
    fn detect_energy(&self, samples: &[f32], sample_rate: u32) -> Vec<SpeechRegion> {
        let window_ms = self.settings.energy_window_ms.clamp(10, 50) as i64;
        let window_size = (sample_rate as i64 * window_ms / 1000).max(1) as usize;
        let silence_ms = self.settings.silence_duration_ms as i64;

        let mut regions = Vec::new();
        let mut region_start: Option<i64> = None;
        let mut region_end: i64 = 0;
        let mut silent_ms: i64 = 0;

        for (i, window) in samples.chunks(window_size).enumerate() {
            let t_ms = i as i64 * window_ms;
            let sum_squares: f32 = window.iter().map(|s| s * s).sum();
            let rms = (sum_squares / window.len() as f32).sqrt();

            if rms >= self.settings.energy_threshold {
                if region_start.is_none() {
                    region_start = Some(t_ms);
                }
                region_end = t_ms + window_ms;
                silent_ms = 0;
            } else if region_start.is_some() {
                silent_ms += window_ms;
                if silent_ms >= silence_ms {
                    regions.push(SpeechRegion {
                        start_ms: region_start.take().unwrap(),
                        end_ms: region_end,
                    });
                    silent_ms = 0;
                }
            }
        }

        if let Some(start) = region_start {
            regions.push(SpeechRegion {
                start_ms: start,
                end_ms: region_end,
            });
        }

        regions
    }
}

/// Merge close regions, then drop sub-minimum regions unless a region is
/// the only activity in the buffer.
fn post_process(regions: Vec<SpeechRegion>, merge_gap_ms: i64, min_region_ms: i64) -> Vec<SpeechRegion> {
    if regions.is_empty() {
        return regions;
    }

    let mut merged: Vec<SpeechRegion> = Vec::new();
    let mut current = regions[0];

    for region in regions.into_iter().skip(1) {
        if region.start_ms - current.end_ms < merge_gap_ms {
            current.end_ms = region.end_ms;
        } else {
            merged.push(current);
            current = region;
        }
    }
    merged.push(current);

    if merged.len() == 1 {
        return merged;
    }

    let kept: Vec<SpeechRegion> = merged
        .iter()
        .copied()
        .filter(|r| r.duration_ms() >= min_region_ms)
        .collect();

    if kept.is_empty() {
        // Everything was short; keep the longest as the only activity
        let longest = merged
            .into_iter()
            .max_by_key(|r| r.duration_ms())
            .expect("non-empty");
        vec![longest]
    } else {
        kept
    }
}

/// Silero VAD (ONNX)
///
/// Small pretrained classifier over 512-sample windows at 16 kHz with an
/// LSTM state threaded between windows.
/// Reference: https://github.com/snakers4/silero-vad
pub struct SileroVad {
    session: Mutex<Session>,
    threshold: f32,
    speech_pad_ms: u32,
    state: Mutex<Vec<f32>>,
    context: Mutex<Vec<f32>>,
}

/// Context carried between windows (16 kHz)
const CONTEXT_SIZE: usize = 64;
/// Window size (16 kHz)
const CHUNK_SIZE: usize = 512;
/// LSTM h and c states: [2, 1, 128]
const STATE_SIZE: usize = 2 * 128;

impl SileroVad {
    pub fn new(model_path: &str, threshold: f32, speech_pad_ms: u32) -> Result<Self> {
        tracing::info!("Loading Silero VAD model from: {}", model_path);

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(2)?
            .commit_from_file(model_path)
            .context("Failed to load Silero VAD model")?;

        Ok(Self {
            session: Mutex::new(session),
            threshold,
            speech_pad_ms,
            state: Mutex::new(vec![0.0; STATE_SIZE]),
            context: Mutex::new(vec![0.0; CONTEXT_SIZE]),
        })
    }

    fn reset_state(&self) {
        self.state.lock().unwrap().fill(0.0);
        self.context.lock().unwrap().fill(0.0);
    }

    /// Process one 512-sample window, returning speech probability
    fn process_chunk(&self, samples: &[f32]) -> Result<f32> {
        let mut context = self.context.lock().unwrap();
        let mut state = self.state.lock().unwrap();

        let mut input_data = Vec::with_capacity(CONTEXT_SIZE + samples.len());
        input_data.extend_from_slice(&context);
        input_data.extend_from_slice(samples);

        if samples.len() >= CONTEXT_SIZE {
            context.copy_from_slice(&samples[samples.len() - CONTEXT_SIZE..]);
        } else {
            context.rotate_left(samples.len());
            context[CONTEXT_SIZE - samples.len()..].copy_from_slice(samples);
        }

        let input_len = input_data.len();
        let input_tensor = ort::value::Tensor::from_array(([1_i64, input_len as i64], input_data))?;
        let state_tensor =
            ort::value::Tensor::from_array(([2_i64, 1_i64, 128_i64], state.clone()))?;
        let sr_tensor =
            ort::value::Tensor::from_array(([1_i64], vec![ASR_SAMPLE_RATE as i64]))?;

        let (prob, new_state_vec) = {
            let mut session_guard = self.session.lock().unwrap();
            let outputs = session_guard.run(ort::inputs![
                "input" => input_tensor,
                "state" => state_tensor,
                "sr" => sr_tensor,
            ])?;

            let (_, output_data) = outputs
                .get("output")
                .context("No output tensor")?
                .try_extract_tensor::<f32>()?;
            let prob = output_data[0];

            let (_, new_state_data) = outputs
                .get("stateN")
                .context("No stateN tensor")?
                .try_extract_tensor::<f32>()?;

            (prob, new_state_data.to_vec())
        };

        state.copy_from_slice(&new_state_vec);

        Ok(prob)
    }

    /// Classify all windows and assemble speech regions
    fn detect_regions(&self, samples: &[f32], sample_rate: u32) -> Result<Vec<SpeechRegion>> {
        self.reset_state();

        let ms_per_chunk = CHUNK_SIZE as f32 * 1000.0 / sample_rate as f32;

        let mut probs: Vec<f32> = Vec::new();
        for chunk in samples.chunks(CHUNK_SIZE) {
            let chunk_data = if chunk.len() < CHUNK_SIZE {
                let mut padded = vec![0.0; CHUNK_SIZE];
                padded[..chunk.len()].copy_from_slice(chunk);
                padded
            } else {
                chunk.to_vec()
            };
            probs.push(self.process_chunk(&chunk_data)?);
        }

        // Runs of sub-threshold windows >= 1 s split regions; finer gap
        // handling happens in the shared post-processing.
        let pad_chunks = (self.speech_pad_ms as f32 / ms_per_chunk).ceil() as usize;
        let silence_chunks = (1000.0 / ms_per_chunk).ceil() as usize;

        let mut regions = Vec::new();
        let mut start = 0usize;
        let mut last_speech = 0usize;
        let mut in_speech = false;
        let mut silence_run = 0usize;

        for (i, &prob) in probs.iter().enumerate() {
            if prob >= self.threshold {
                if !in_speech {
                    start = i.saturating_sub(pad_chunks);
                    in_speech = true;
                }
                last_speech = i;
                silence_run = 0;
            } else if in_speech {
                silence_run += 1;
                if silence_run >= silence_chunks {
                    let end = last_speech + 1 + pad_chunks;
                    regions.push(SpeechRegion {
                        start_ms: (start as f32 * ms_per_chunk) as i64,
                        end_ms: (end as f32 * ms_per_chunk) as i64,
                    });
                    in_speech = false;
                }
            }
        }

        if in_speech {
            let end = (last_speech + 1 + pad_chunks).min(probs.len());
            regions.push(SpeechRegion {
                start_ms: (start as f32 * ms_per_chunk) as i64,
                end_ms: (end as f32 * ms_per_chunk) as i64,
            });
        }

        // Clamp padded edges to the buffer
        let total_ms = (samples.len() as f32 * 1000.0 / sample_rate as f32) as i64;
        for region in &mut regions {
            region.start_ms = region.start_ms.max(0);
            region.end_ms = region.end_ms.min(total_ms);
        }

        Ok(regions)
    }
}

/// Linear resample; good enough for a detector front-end
fn resample_linear(samples: &[f32], source_rate: u32, target_rate: u32) -> Vec<f32> {
    let ratio = source_rate as f64 / target_rate as f64;
    let out_len = (samples.len() as f64 / ratio).floor() as usize;
    (0..out_len)
        .map(|i| {
            let pos = i as f64 * ratio;
            let idx = pos as usize;
            let frac = (pos - idx as f64) as f32;
            let a = samples[idx.min(samples.len() - 1)];
            let b = samples[(idx + 1).min(samples.len() - 1)];
            a + (b - a) * frac
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 16_000;

    fn energy_detector() -> SpeechDetector {
        SpeechDetector::new(VadSettings {
            method: VadMethod::Energy,
            ..Default::default()
        })
    }

    fn speech(seconds: f64) -> Vec<f32> {
        vec![0.1f32; (seconds * RATE as f64) as usize]
    }

    fn silence(seconds: f64) -> Vec<f32> {
        vec![0.0f32; (seconds * RATE as f64) as usize]
    }

    #[test]
    fn test_energy_detects_two_regions() {
        let mut audio = speech(1.0);
        audio.extend(silence(2.0));
        audio.extend(speech(1.0));

        let regions = energy_detector().detect_speech(&audio, RATE);
        assert_eq!(regions.len(), 2);
        assert!(regions[0].start_ms <= 30);
        assert!((regions[0].end_ms - 1000).abs() < 100);
        assert!((regions[1].start_ms - 3000).abs() < 100);
    }

    #[test]
    fn test_short_pause_does_not_split() {
        let mut audio = speech(1.0);
        audio.extend(silence(0.4));
        audio.extend(speech(1.0));

        let regions = energy_detector().detect_speech(&audio, RATE);
        assert_eq!(regions.len(), 1);
    }

    #[test]
    fn test_regions_sorted_and_non_overlapping() {
        let mut audio = Vec::new();
        for _ in 0..3 {
            audio.extend(speech(0.8));
            audio.extend(silence(1.5));
        }

        let regions = energy_detector().detect_speech(&audio, RATE);
        for pair in regions.windows(2) {
            assert!(pair[0].end_ms <= pair[1].start_ms);
        }
    }

    #[test]
    fn test_silence_only_yields_nothing() {
        let regions = energy_detector().detect_speech(&silence(3.0), RATE);
        assert!(regions.is_empty());
    }

    #[test]
    fn test_other_sample_rate_gives_same_timestamps() {
        let mut audio = speech(1.0);
        audio.extend(silence(2.0));
        audio.extend(speech(1.0));

        // Same waveform at 32 kHz: double the samples
        let audio_32k: Vec<f32> = audio.iter().flat_map(|&s| [s, s]).collect();

        let at_16k = energy_detector().detect_speech(&audio, RATE);
        let at_32k = energy_detector().detect_speech(&audio_32k, 32_000);

        assert_eq!(at_16k.len(), at_32k.len());
        for (a, b) in at_16k.iter().zip(at_32k.iter()) {
            assert!((a.start_ms - b.start_ms).abs() <= 60);
            assert!((a.end_ms - b.end_ms).abs() <= 60);
        }
    }

    #[test]
    fn test_lone_short_region_survives() {
        let regions = post_process(
            vec![SpeechRegion {
                start_ms: 0,
                end_ms: 120,
            }],
            700,
            250,
        );
        assert_eq!(regions.len(), 1);
    }

    #[test]
    fn test_short_regions_dropped_when_longer_exists() {
        let regions = post_process(
            vec![
                SpeechRegion {
                    start_ms: 0,
                    end_ms: 100,
                },
                SpeechRegion {
                    start_ms: 2000,
                    end_ms: 4000,
                },
            ],
            700,
            250,
        );
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].start_ms, 2000);
    }
}

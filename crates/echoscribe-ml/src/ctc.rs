//! CTC transcription engine using ONNX Runtime
//!
//! Runs a CTC acoustic model (log-mel in, per-frame token logits out)
//! with a plain-text vocabulary file. Serves as the secondary back-end
//! in hybrid transcription.

use crate::traits::TranscriptionEngine;
use anyhow::{Context, Result};
use echoscribe_types::{TranscriptSegment, TranscriptWord, TranscriptionResult, ASR_SAMPLE_RATE};
use ort::session::{builder::GraphOptimizationLevel, Session};
use realfft::RealFftPlanner;
use std::sync::Mutex;
use std::time::Instant;

const N_MELS: usize = 64;
const HOP_LENGTH: usize = 160; // 10 ms at 16 kHz
const WIN_LENGTH: usize = 320; // 20 ms
const N_FFT: usize = 320;

/// CTC transcription engine over an ONNX acoustic model
pub struct CtcEngine {
    session: Mutex<Session>,
    vocab: Vec<String>,
    blank_id: usize,
    space_id: Option<usize>,
    mel: MelProcessor,
    language: String,
}

impl TranscriptionEngine for CtcEngine {
    fn name(&self) -> &str {
        "ctc"
    }

    fn transcribe(&self, samples: &[f32]) -> Result<TranscriptionResult> {
        let start = Instant::now();
        let segments = self.transcribe_with_segments(samples)?;

        let text = segments
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");

        let elapsed = start.elapsed();
        let audio_duration = samples.len() as f64 / ASR_SAMPLE_RATE as f64;

        Ok(TranscriptionResult {
            text,
            segments,
            language: Some(self.language.clone()),
            processing_time_ms: elapsed.as_millis() as u64,
            rtf: (audio_duration / elapsed.as_secs_f64().max(1e-6)) as f32,
        })
    }

    fn transcribe_with_segments(&self, samples: &[f32]) -> Result<Vec<TranscriptSegment>> {
        let start = Instant::now();

        // Below 0.1 s there is nothing to decode
        if samples.len() < ASR_SAMPLE_RATE as usize / 10 {
            return Ok(vec![]);
        }

        let (mel_spec, num_frames) = self.mel.compute(samples);

        // [batch, n_mels, time]
        let mut flat_mel = vec![0.0f32; N_MELS * num_frames];
        for i in 0..N_MELS {
            for j in 0..num_frames {
                flat_mel[i * num_frames + j] = mel_spec[j][i];
            }
        }

        let input_tensor =
            ort::value::Tensor::from_array(([1_i64, N_MELS as i64, num_frames as i64], flat_mel))?;
        let length_tensor = ort::value::Tensor::from_array(([1_i64], vec![num_frames as i64]))?;

        let logits = {
            let mut session_guard = self.session.lock().unwrap();

            let outputs = session_guard.run(ort::inputs![
                "features" => input_tensor,
                "feature_lengths" => length_tensor,
            ])?;

            let output = outputs
                .get("log_probs")
                .or_else(|| outputs.get("logprobs"))
                .or_else(|| outputs.get("output"))
                .context("No output tensor found")?;

            let (output_shape, output_data) = output.try_extract_tensor::<f32>()?;

            let time_steps = output_shape[1] as usize;
            let vocab_size = output_shape[2] as usize;

            let mut logits: Vec<Vec<f32>> = Vec::with_capacity(time_steps);
            for t in 0..time_steps {
                let start_idx = t * vocab_size;
                logits.push(output_data[start_idx..start_idx + vocab_size].to_vec());
            }
            logits
        };

        let audio_duration = samples.len() as f64 / ASR_SAMPLE_RATE as f64;
        let segments = self.decode_ctc_with_timestamps(&logits, audio_duration);

        let elapsed = start.elapsed();
        tracing::debug!(
            "CTC: transcribed {:.1}s audio in {:.2}s, {} segments",
            audio_duration,
            elapsed.as_secs_f64(),
            segments.len()
        );

        Ok(segments)
    }

    fn supported_languages(&self) -> &[&str] {
        &["multi"]
    }

    fn set_language(&mut self, language: &str) -> Result<()> {
        // The acoustic model fixes the language; remember it for reporting
        self.language = language.to_string();
        Ok(())
    }

    fn set_hotwords(&mut self, _hotwords: &[String]) -> Result<()> {
        // No decoder-level biasing; hotwords are applied as a post-pass in
        // hybrid transcription
        Ok(())
    }
}

impl CtcEngine {
    /// Create a new engine from an ONNX model and its vocabulary file
    pub fn new(model_path: &str, vocab_path: &str) -> Result<Self> {
        tracing::info!("Loading CTC model from: {}", model_path);

        let (vocab, blank_id, space_id) = load_vocab(vocab_path)?;
        tracing::info!(
            "CTC: vocab={} tokens, blank_id={}, space_id={:?}",
            vocab.len(),
            blank_id,
            space_id
        );

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(4)?
            .commit_from_file(model_path)
            .context("Failed to load CTC ONNX model")?;

        Ok(Self {
            session: Mutex::new(session),
            vocab,
            blank_id,
            space_id,
            mel: MelProcessor::new(MelConfig {
                sample_rate: ASR_SAMPLE_RATE,
                n_mels: N_MELS,
                hop_length: HOP_LENGTH,
                win_length: WIN_LENGTH,
                n_fft: N_FFT,
            }),
            language: "auto".to_string(),
        })
    }

    /// Greedy CTC decode with word timestamps
    fn decode_ctc_with_timestamps(
        &self,
        logits: &[Vec<f32>],
        audio_duration: f64,
    ) -> Vec<TranscriptSegment> {
        if logits.is_empty() {
            return vec![];
        }

        let frame_ms = audio_duration * 1000.0 / logits.len() as f64;

        let mut words: Vec<TranscriptWord> = vec![];
        let mut current_word = String::new();
        let mut word_start: Option<i64> = None;
        let mut word_confidences: Vec<f32> = vec![];
        let mut prev_token = self.blank_id;

        let mut flush_word =
            |word: &mut String, start: &mut Option<i64>, confs: &mut Vec<f32>, end: i64| {
                if let (false, Some(s)) = (word.is_empty(), *start) {
                    let confidence = if confs.is_empty() {
                        0.9
                    } else {
                        confs.iter().sum::<f32>() / confs.len() as f32
                    };
                    words.push(TranscriptWord {
                        start: s,
                        end,
                        text: std::mem::take(word),
                        confidence,
                        speaker: None,
                    });
                }
                word.clear();
                confs.clear();
                *start = None;
            };

        for (t, frame) in logits.iter().enumerate() {
            let (max_idx, _) = frame
                .iter()
                .enumerate()
                .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
                .unwrap_or((0, &0.0));

            let frame_time = (t as f64 * frame_ms) as i64;

            // CTC rule: skip blank and repeated tokens
            if max_idx != self.blank_id && max_idx != prev_token {
                if let Some(token) = self.vocab.get(max_idx) {
                    let confidence = softmax_max(frame);

                    let is_boundary =
                        self.space_id == Some(max_idx) || token.starts_with('▁');

                    if is_boundary {
                        flush_word(
                            &mut current_word,
                            &mut word_start,
                            &mut word_confidences,
                            frame_time,
                        );
                        let stripped = token.trim_start_matches('▁');
                        if !stripped.is_empty() {
                            word_start = Some(frame_time);
                            current_word.push_str(stripped);
                            word_confidences.push(confidence);
                        }
                    } else if token != "<unk>" {
                        if word_start.is_none() {
                            word_start = Some(frame_time);
                        }
                        current_word.push_str(token);
                        word_confidences.push(confidence);
                    }
                }
            }
            prev_token = max_idx;
        }

        flush_word(
            &mut current_word,
            &mut word_start,
            &mut word_confidences,
            (audio_duration * 1000.0) as i64,
        );

        if words.is_empty() {
            return vec![];
        }

        let full_text = words
            .iter()
            .map(|w| w.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");

        let confidence =
            words.iter().map(|w| w.confidence).sum::<f32>() / words.len() as f32;

        vec![TranscriptSegment {
            start: words.first().map(|w| w.start).unwrap_or(0),
            end: words.last().map(|w| w.end).unwrap_or(0),
            text: full_text,
            speaker: None,
            words,
            confidence,
        }]
    }
}

/// Max softmax probability of a logit frame
fn softmax_max(logits: &[f32]) -> f32 {
    let max_val = logits.iter().cloned().fold(f32::NEG_INFINITY, f32::max);

    let mut sum = 0.0f32;
    let mut max_prob = 0.0f32;

    for &v in logits {
        let exp = (v - max_val).exp();
        sum += exp;
        if exp > max_prob {
            max_prob = exp;
        }
    }

    max_prob / sum
}

/// Load a vocabulary file: one token per line, optionally "token index"
fn load_vocab(path: &str) -> Result<(Vec<String>, usize, Option<usize>)> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read vocab file: {}", path))?;

    let mut vocab = Vec::new();
    let mut blank_id = None;
    let mut space_id = None;

    for line in content.lines() {
        let parts: Vec<&str> = line.rsplitn(2, [' ', '\t']).collect();

        let token = if parts.len() == 2 {
            parts[1].to_string()
        } else if parts.len() == 1 {
            parts[0].to_string()
        } else {
            continue;
        };

        let idx = vocab.len();

        if token == "<blk>" || token == "<blank>" || token == "[blank]" {
            blank_id = Some(idx);
        }
        if token == " " || token == "▁" {
            space_id = Some(idx);
        }

        vocab.push(token);
    }

    // Blank is conventionally the last token when unmarked
    let blank_id = blank_id.unwrap_or(vocab.len().saturating_sub(1));

    Ok((vocab, blank_id, space_id))
}

/// Mel spectrogram configuration
struct MelConfig {
    sample_rate: u32,
    n_mels: usize,
    hop_length: usize,
    win_length: usize,
    n_fft: usize,
}

/// Log-mel front-end
struct MelProcessor {
    config: MelConfig,
    mel_filterbank: Vec<Vec<f32>>,
    window: Vec<f32>,
}

impl MelProcessor {
    fn new(config: MelConfig) -> Self {
        // Symmetric Hann window (torch.hann_window with periodic=False)
        let window: Vec<f32> = (0..config.win_length)
            .map(|i| {
                let n = (config.win_length - 1) as f32;
                0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / n).cos())
            })
            .collect();

        let mel_filterbank = create_mel_filterbank(config.sample_rate, config.n_fft, config.n_mels);

        Self {
            config,
            mel_filterbank,
            window,
        }
    }

    /// Compute the log-mel spectrogram, returning (frames, frame count)
    fn compute(&self, samples: &[f32]) -> (Vec<Vec<f32>>, usize) {
        let n_fft = self.config.n_fft;
        let hop_length = self.config.hop_length;
        let win_length = self.config.win_length;

        if samples.len() < win_length {
            return (vec![], 0);
        }

        let num_frames = (samples.len() - win_length) / hop_length + 1;
        let mut mel_spec: Vec<Vec<f32>> = Vec::with_capacity(num_frames);

        let mut planner = RealFftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(n_fft);
        let mut spectrum = fft.make_output_vec();

        for frame_idx in 0..num_frames {
            let start = frame_idx * hop_length;
            let end = start + win_length;
            if end > samples.len() {
                break;
            }

            let mut windowed: Vec<f32> = samples[start..end]
                .iter()
                .zip(self.window.iter())
                .map(|(s, w)| s * w)
                .collect();
            windowed.resize(n_fft, 0.0);

            if fft.process(&mut windowed, &mut spectrum).is_err() {
                break;
            }

            let power_spec: Vec<f32> = spectrum.iter().map(|c| c.norm_sqr()).collect();

            let mut mel_frame = vec![0.0f32; self.config.n_mels];
            for (m, filter) in self.mel_filterbank.iter().enumerate() {
                let mut sum = 0.0;
                for (f, &weight) in filter.iter().enumerate() {
                    if f < power_spec.len() {
                        sum += power_spec[f] * weight;
                    }
                }
                mel_frame[m] = sum.max(1e-10).ln();
            }

            mel_spec.push(mel_frame);
        }

        let num_frames = mel_spec.len();
        (mel_spec, num_frames)
    }
}

/// Triangular mel filterbank (torchaudio-compatible, Hz interpolation)
fn create_mel_filterbank(sample_rate: u32, n_fft: usize, n_mels: usize) -> Vec<Vec<f32>> {
    let num_bins = n_fft / 2 + 1;
    let fmax = sample_rate as f32 / 2.0;

    let hz_to_mel = |hz: f32| -> f32 { 2595.0 * (1.0 + hz / 700.0).log10() };
    let mel_to_hz = |mel: f32| -> f32 { 700.0 * (10.0_f32.powf(mel / 2595.0) - 1.0) };

    let all_freqs: Vec<f32> = (0..num_bins)
        .map(|i| i as f32 * fmax / (num_bins - 1) as f32)
        .collect();

    let mel_min = hz_to_mel(0.0);
    let mel_max = hz_to_mel(fmax);
    let f_pts: Vec<f32> = (0..=n_mels + 1)
        .map(|i| {
            let mel = mel_min + i as f32 * (mel_max - mel_min) / (n_mels + 1) as f32;
            mel_to_hz(mel)
        })
        .collect();

    let f_diff: Vec<f32> = (0..n_mels + 1).map(|i| f_pts[i + 1] - f_pts[i]).collect();

    let mut filterbank = vec![vec![0.0f32; num_bins]; n_mels];

    for m in 0..n_mels {
        for (k, &freq) in all_freqs.iter().enumerate() {
            let lower = (freq - f_pts[m]) / f_diff[m];
            let upper = (f_pts[m + 2] - freq) / f_diff[m + 1];
            filterbank[m][k] = lower.min(upper).max(0.0);
        }
    }

    filterbank
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_softmax_max_is_probability() {
        let logits = vec![1.0, 2.0, 3.0, 0.5];
        let prob = softmax_max(&logits);
        assert!(prob > 0.0 && prob <= 1.0);
    }

    #[test]
    fn test_mel_filterbank_shape() {
        let filterbank = create_mel_filterbank(16000, 320, 64);
        assert_eq!(filterbank.len(), 64);
        assert_eq!(filterbank[0].len(), 161); // n_fft/2 + 1
    }

    #[test]
    fn test_mel_processor_frame_count() {
        let mel = MelProcessor::new(MelConfig {
            sample_rate: 16_000,
            n_mels: 64,
            hop_length: 160,
            win_length: 320,
            n_fft: 320,
        });
        // 1 s of audio: (16000 - 320) / 160 + 1 = 99 frames
        let samples = vec![0.01f32; 16_000];
        let (frames, count) = mel.compute(&samples);
        assert_eq!(count, 99);
        assert_eq!(frames[0].len(), 64);
    }

    #[test]
    fn test_load_vocab_detects_blank_and_space() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vocab.txt");
        std::fs::write(&path, "a\nb\n▁\n<blk>\n").unwrap();

        let (vocab, blank_id, space_id) = load_vocab(path.to_str().unwrap()).unwrap();
        assert_eq!(vocab.len(), 4);
        assert_eq!(blank_id, 3);
        assert_eq!(space_id, Some(2));
    }
}

//! Low-resolution amplitude envelope for session visualization
//!
//! Computed once from the container file and cached to `waveform.json`
//! inside the session directory.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// Number of envelope bins per channel
const SAMPLE_COUNT: usize = 400;

/// Precomputed waveform envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Waveform {
    /// Normalized peak per bin, per channel
    pub peaks: Vec<Vec<f32>>,
    /// Normalized RMS per bin, per channel
    pub rms: Vec<Vec<f32>>,
    /// Seconds covered by one bin
    pub sample_duration: f32,
    pub sample_count: usize,
    /// Total duration in seconds
    pub duration: f32,
    pub channel_count: usize,
}

impl Waveform {
    /// Compute the envelope from an audio file
    pub fn from_file(path: &Path) -> Result<Self> {
        let (channels, sample_rate) = decode_all(path)?;

        if channels.is_empty() || channels[0].is_empty() {
            anyhow::bail!("No audio samples found");
        }

        let channel_count = channels.len();
        let total_samples = channels[0].len();
        let duration_sec = total_samples as f32 / sample_rate as f32;
        let samples_per_bin = (total_samples / SAMPLE_COUNT).max(1);
        let sample_duration = duration_sec / SAMPLE_COUNT as f32;

        let mut peaks: Vec<Vec<f32>> = vec![vec![0.0; SAMPLE_COUNT]; channel_count];
        let mut rms: Vec<Vec<f32>> = vec![vec![0.0; SAMPLE_COUNT]; channel_count];

        let mut max_peak: f32 = 1e-9;
        let mut max_rms: f32 = 1e-9;

        for ch in 0..channel_count {
            for bin in 0..SAMPLE_COUNT {
                let start = bin * samples_per_bin;
                let end = ((bin + 1) * samples_per_bin).min(total_samples);
                if start >= end {
                    break;
                }

                let mut peak: f32 = 0.0;
                let mut sum_squares: f32 = 0.0;

                for &sample in &channels[ch][start..end] {
                    peak = peak.max(sample.abs());
                    sum_squares += sample * sample;
                }

                let rms_value = (sum_squares / (end - start) as f32).sqrt();

                peaks[ch][bin] = peak;
                rms[ch][bin] = rms_value;
                max_peak = max_peak.max(peak);
                max_rms = max_rms.max(rms_value);
            }
        }

        // Normalize for display
        for ch in 0..channel_count {
            for bin in 0..SAMPLE_COUNT {
                peaks[ch][bin] /= max_peak;
                rms[ch][bin] /= max_rms;
            }
        }

        Ok(Self {
            peaks,
            rms,
            sample_duration,
            sample_count: SAMPLE_COUNT,
            duration: duration_sec,
            channel_count,
        })
    }

    /// Load the cached envelope if present
    pub fn load(path: &Path) -> Option<Self> {
        let content = std::fs::read_to_string(path).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// Persist the envelope next to the session audio
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string(self)?;
        std::fs::write(path, content).context("Failed to write waveform cache")?;
        Ok(())
    }
}

/// Decode an entire file into per-channel sample vectors
fn decode_all(path: &Path) -> Result<(Vec<Vec<f32>>, u32)> {
    let file = std::fs::File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;

    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| anyhow::anyhow!("No audio track found"))?;

    let track_id = track.id;
    let sample_rate = track.codec_params.sample_rate.unwrap_or(44_100);
    let channel_count = track.codec_params.channels.map(|c| c.count()).unwrap_or(2);

    let mut decoder =
        symphonia::default::get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

    let mut channels: Vec<Vec<f32>> = vec![Vec::new(); channel_count];

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(symphonia::core::errors::Error::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break
            }
            Err(e) => return Err(e.into()),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = decoder.decode(&packet)?;
        let spec = *decoded.spec();

        let mut sample_buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        sample_buf.copy_interleaved_ref(decoded);

        for (i, sample) in sample_buf.samples().iter().enumerate() {
            channels[i % channel_count].push(*sample);
        }
    }

    Ok((channels, sample_rate))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_waveform_from_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");

        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 16_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for i in 0..32_000 {
            let v = ((i as f32 * 0.05).sin() * 0.5 * 32767.0) as i16;
            writer.write_sample(v).unwrap();
        }
        writer.finalize().unwrap();

        let waveform = Waveform::from_file(&path).unwrap();
        assert_eq!(waveform.channel_count, 2);
        assert_eq!(waveform.sample_count, SAMPLE_COUNT);
        assert!(waveform.duration > 0.9 && waveform.duration < 1.1);
        // Normalized: the loudest bin is exactly 1.0
        let max = waveform.peaks[0].iter().cloned().fold(0.0f32, f32::max);
        assert!((max - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_waveform_cache_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("waveform.json");

        let waveform = Waveform {
            peaks: vec![vec![0.5; 4]],
            rms: vec![vec![0.3; 4]],
            sample_duration: 0.25,
            sample_count: 4,
            duration: 1.0,
            channel_count: 1,
        };
        waveform.save(&path).unwrap();

        let loaded = Waveform::load(&path).unwrap();
        assert_eq!(loaded.sample_count, 4);
        assert_eq!(loaded.channel_count, 1);
    }
}

//! Audio file I/O for import

use anyhow::{Context, Result};
use hound::WavReader;
use std::path::Path;

/// Load any supported audio file as mono samples at its native rate.
/// Returns (samples, sample_rate).
pub fn load_audio_file(path: &Path) -> Result<(Vec<f32>, u32)> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    match ext.as_str() {
        "wav" => load_wav(path),
        "mp3" | "m4a" | "ogg" | "flac" | "aac" => load_with_symphonia(path),
        _ => anyhow::bail!("Unsupported audio format: {}", ext),
    }
}

/// Load and resample to the given rate in one step
pub fn load_audio_file_resampled(path: &Path, target_rate: u32) -> Result<Vec<f32>> {
    let (samples, rate) = load_audio_file(path)?;
    if rate == target_rate {
        Ok(samples)
    } else {
        crate::resampling::resample(&samples, rate, target_rate)
    }
}

fn load_wav(path: &Path) -> Result<(Vec<f32>, u32)> {
    let reader = WavReader::open(path).context("Failed to open WAV file")?;

    let spec = reader.spec();
    let sample_rate = spec.sample_rate;
    let channels = spec.channels as usize;

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .filter_map(|s| s.ok())
            .collect(),
        hound::SampleFormat::Int => {
            let bits = spec.bits_per_sample;
            let max_val = (1i64 << (bits - 1)) as f32;
            reader
                .into_samples::<i32>()
                .filter_map(|s| s.ok())
                .map(|s| s as f32 / max_val)
                .collect()
        }
    };

    Ok((downmix(samples, channels), sample_rate))
}

fn load_with_symphonia(path: &Path) -> Result<(Vec<f32>, u32)> {
    use symphonia::core::audio::SampleBuffer;
    use symphonia::core::codecs::DecoderOptions;
    use symphonia::core::formats::FormatOptions;
    use symphonia::core::io::MediaSourceStream;
    use symphonia::core::meta::MetadataOptions;
    use symphonia::core::probe::Hint;

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

    let track = format.default_track().context("No audio track found")?;

    let sample_rate = track
        .codec_params
        .sample_rate
        .context("Unknown sample rate")?;
    let channels = track
        .codec_params
        .channels
        .context("Unknown channel count")?
        .count();

    let mut decoder =
        symphonia::default::get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

    let mut samples = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(_) => break,
        };

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(_) => continue,
        };
        let spec = *decoded.spec();

        let mut sample_buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        sample_buf.copy_interleaved_ref(decoded);

        samples.extend_from_slice(sample_buf.samples());
    }

    Ok((downmix(samples, channels), sample_rate))
}

fn downmix(samples: Vec<f32>, channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return samples;
    }
    samples
        .chunks(channels)
        .map(|chunk| chunk.iter().sum::<f32>() / channels as f32)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_wav_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");

        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for i in 0..16_000 {
            let v = (i as f32 * 0.01).sin() * 0.5;
            writer.write_sample((v * 32767.0) as i16).unwrap();
        }
        writer.finalize().unwrap();

        let (samples, rate) = load_audio_file(&path).unwrap();
        assert_eq!(rate, 16_000);
        assert_eq!(samples.len(), 16_000);
        assert!(samples.iter().any(|s| s.abs() > 0.1));
    }

    #[test]
    fn test_downmix_averages_channels() {
        let stereo = vec![0.0, 1.0, 0.0, 1.0];
        let mono = downmix(stereo, 2);
        assert_eq!(mono, vec![0.5, 0.5]);
    }

    #[test]
    fn test_unknown_extension_rejected() {
        assert!(load_audio_file(Path::new("/tmp/file.xyz")).is_err());
    }
}

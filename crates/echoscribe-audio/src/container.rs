//! Session audio container
//!
//! One stereo MP3 per session (left = mic, right = sys), encoded through
//! an FFmpeg child process during recording and read back with symphonia
//! for transcription and playback.
//!
//! The writer pairs the two capture channels itself: samples pushed on
//! one channel are held back until the other channel has caught up, so
//! the encoded file can never drift. That pairing is the only ordering
//! guarantee the writer makes. Range extraction resamples with linear
//! interpolation.

use anyhow::{Context, Result};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// Sample-for-sample pairing of the mic and sys channels.
///
/// Holds whatever one channel has produced beyond the other; only the
/// common prefix ever leaves as interleaved frames.
#[derive(Default)]
struct ChannelAligner {
    mic: Vec<f32>,
    sys: Vec<f32>,
}

impl ChannelAligner {
    /// Queue new samples and take the newly aligned frames, interleaved
    /// [mic0, sys0, mic1, sys1, ...]. Unmatched samples stay queued.
    fn push(&mut self, mic: &[f32], sys: &[f32]) -> Vec<f32> {
        self.mic.extend_from_slice(mic);
        self.sys.extend_from_slice(sys);

        let ready = self.mic.len().min(self.sys.len());
        if ready == 0 {
            return Vec::new();
        }

        self.mic
            .drain(..ready)
            .zip(self.sys.drain(..ready))
            .flat_map(|(m, s)| [m, s])
            .collect()
    }

    /// Flush the queued tail, padding the shorter channel with silence
    /// so no captured audio is dropped at the end of a session.
    fn drain_padded(&mut self) -> Vec<f32> {
        let len = self.mic.len().max(self.sys.len());
        self.mic.resize(len, 0.0);
        self.sys.resize(len, 0.0);
        self.push(&[], &[])
    }

    fn pending(&self) -> (usize, usize) {
        (self.mic.len(), self.sys.len())
    }
}

/// Quantize float samples into the signed 16-bit little-endian stream
/// FFmpeg is told to expect.
fn to_s16le(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let quantized = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        bytes.extend_from_slice(&quantized.to_le_bytes());
    }
    bytes
}

/// The encoder child process and its input pipe
struct Encoder {
    child: Child,
    stdin: Option<ChildStdin>,
}

impl Encoder {
    fn spawn(output: &Path, sample_rate: u32, channels: u16, bitrate: &str) -> Result<Self> {
        let ffmpeg = locate_ffmpeg()?;

        let mut command = Command::new(&ffmpeg);
        command.args(["-y", "-f", "s16le"]);
        command.args(["-ar", &sample_rate.to_string()]);
        command.args(["-ac", &channels.to_string()]);
        command.args(["-i", "pipe:0"]);
        command.args(["-c:a", "libmp3lame", "-b:a", bitrate, "-f", "mp3"]);
        command.arg(output);

        let mut child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("Failed to start encoder: {}", ffmpeg.display()))?;

        let stdin = child.stdin.take().context("Encoder has no stdin pipe")?;

        Ok(Self {
            child,
            stdin: Some(stdin),
        })
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.stdin
            .as_mut()
            .context("Encoder already finalized")?
            .write_all(bytes)
            .context("Encoder pipe write failed")
    }

    /// Signal EOF and wait for the encoder to finalize the file
    fn finish(mut self) -> Result<()> {
        self.stdin.take();

        let status = self.child.wait().context("Failed to wait for encoder")?;
        if !status.success() {
            anyhow::bail!("Encoder exited with {:?}", status);
        }
        Ok(())
    }

    fn abort(mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Streaming container writer
pub struct ContainerWriter {
    encoder: Option<Encoder>,
    file_path: PathBuf,
    sample_rate: u32,
    channels: u16,
    aligner: ChannelAligner,
    /// Frames (samples per channel) handed to the encoder; monotonic
    frames_written: i64,
}

impl ContainerWriter {
    /// Create a new writer
    ///
    /// # Arguments
    /// * `file_path` - Output file path
    /// * `sample_rate` - Sample rate in Hz (24000 for recording)
    /// * `channels` - 1 for mono, 2 for stereo (mic + sys)
    /// * `bitrate` - MP3 bitrate (e.g. "128k")
    pub fn new(
        file_path: impl AsRef<Path>,
        sample_rate: u32,
        channels: u16,
        bitrate: &str,
    ) -> Result<Self> {
        let file_path = file_path.as_ref().to_path_buf();
        let encoder = Encoder::spawn(&file_path, sample_rate, channels, bitrate)?;

        tracing::info!(
            "ContainerWriter: path={:?}, rate={}, channels={}, bitrate={}",
            file_path,
            sample_rate,
            channels,
            bitrate
        );

        Ok(Self {
            encoder: Some(encoder),
            file_path,
            sample_rate,
            channels,
            aligner: ChannelAligner::default(),
            frames_written: 0,
        })
    }

    /// Append already-interleaved samples (float32, [-1, 1])
    pub fn write(&mut self, samples: &[f32]) -> Result<()> {
        if samples.is_empty() {
            return Ok(());
        }

        self.encoder
            .as_mut()
            .context("Writer already closed")?
            .write(&to_s16le(samples))?;

        self.frames_written += samples.len() as i64 / self.channels as i64;
        Ok(())
    }

    /// Append stereo samples from the two capture channels.
    ///
    /// The buffers may be unequal; only the paired prefix reaches the
    /// encoder and the leftover waits for the other channel.
    pub fn write_stereo(&mut self, mic_samples: &[f32], sys_samples: &[f32]) -> Result<()> {
        let interleaved = self.aligner.push(mic_samples, sys_samples);
        self.write(&interleaved)
    }

    /// Frames written per channel (monotonic)
    pub fn samples_written(&self) -> i64 {
        self.frames_written
    }

    /// Duration in milliseconds
    pub fn duration_ms(&self) -> u64 {
        self.frames_written as u64 * 1000 / self.sample_rate as u64
    }

    /// Output file path
    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    /// Flush any unpaired tail (silence-padded) and finalize the file.
    /// Durability is only guaranteed after this returns.
    pub fn close(&mut self) -> Result<()> {
        let (mic_tail, sys_tail) = self.aligner.pending();
        if mic_tail > 0 || sys_tail > 0 {
            tracing::debug!(
                "ContainerWriter: padding tail (mic={}, sys={})",
                mic_tail,
                sys_tail
            );
            let tail = self.aligner.drain_padded();
            self.write(&tail)?;
        }

        let encoder = self.encoder.take().context("Writer already closed")?;
        encoder.finish()?;

        tracing::info!(
            "ContainerWriter closed: {:?}, {} frames, {} ms",
            self.file_path,
            self.frames_written,
            self.duration_ms()
        );

        Ok(())
    }
}

impl Drop for ContainerWriter {
    fn drop(&mut self) {
        if let Some(encoder) = self.encoder.take() {
            tracing::warn!("ContainerWriter dropped without close, aborting encoder");
            encoder.abort();
        }
    }
}

/// Resolve the FFmpeg binary: explicit override, then next to the
/// executable, then PATH.
fn locate_ffmpeg() -> Result<PathBuf> {
    if let Ok(configured) = std::env::var("ECHOSCRIBE_FFMPEG") {
        return Ok(PathBuf::from(configured));
    }

    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            for candidate in [dir.join("ffmpeg"), dir.join("resources").join("ffmpeg")] {
                if candidate.exists() {
                    return Ok(candidate);
                }
            }
        }
    }

    which::which("ffmpeg").context("ffmpeg not found; install it or set ECHOSCRIBE_FFMPEG")
}

/// Random-access reader over a finalized container file
pub struct ContainerReader {
    path: PathBuf,
}

impl ContainerReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            anyhow::bail!("Container file not found: {:?}", path);
        }
        Ok(Self { path })
    }

    /// Extract a window as mono (channels averaged), resampled to target_rate
    pub fn extract_mono(&self, start_ms: i64, end_ms: i64, target_rate: u32) -> Result<Vec<f32>> {
        let (channels, source_rate) = self.decode_range(start_ms, end_ms)?;
        let mono: Vec<f32> = if channels.len() > 1 {
            let len = channels.iter().map(|c| c.len()).min().unwrap_or(0);
            (0..len)
                .map(|i| channels.iter().map(|c| c[i]).sum::<f32>() / channels.len() as f32)
                .collect()
        } else {
            channels.into_iter().next().unwrap_or_default()
        };
        Ok(resample_linear(&mono, source_rate, target_rate))
    }

    /// Extract a window as (left, right), resampled to target_rate.
    /// Mono files duplicate the channel.
    pub fn extract_stereo(
        &self,
        start_ms: i64,
        end_ms: i64,
        target_rate: u32,
    ) -> Result<(Vec<f32>, Vec<f32>)> {
        let (mut channels, source_rate) = self.decode_range(start_ms, end_ms)?;
        let left = if channels.is_empty() {
            Vec::new()
        } else {
            channels.remove(0)
        };
        let right = if channels.is_empty() {
            left.clone()
        } else {
            channels.remove(0)
        };
        Ok((
            resample_linear(&left, source_rate, target_rate),
            resample_linear(&right, source_rate, target_rate),
        ))
    }

    /// Decode [start_ms, end_ms) into per-channel sample vectors at the
    /// source rate.
    fn decode_range(&self, start_ms: i64, end_ms: i64) -> Result<(Vec<Vec<f32>>, u32)> {
        if end_ms <= start_ms {
            return Ok((vec![], 0));
        }

        let file = std::fs::File::open(&self.path)
            .with_context(|| format!("Failed to open container: {:?}", self.path))?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = self.path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .context("Failed to probe container format")?;

        let mut format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| anyhow::anyhow!("No audio track found"))?;

        let track_id = track.id;
        let sample_rate = track.codec_params.sample_rate.unwrap_or(44_100);
        let channel_count = track.codec_params.channels.map(|c| c.count()).unwrap_or(2);

        let mut decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .context("Failed to create audio decoder")?;

        let start_sample = (start_ms as f64 * sample_rate as f64 / 1000.0) as usize;
        let end_sample = (end_ms as f64 * sample_rate as f64 / 1000.0) as usize;

        let mut channels: Vec<Vec<f32>> = vec![Vec::new(); channel_count];
        let mut current_sample = 0usize;

        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(symphonia::core::errors::Error::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break
                }
                Err(_) => break,
            };

            if packet.track_id() != track_id {
                continue;
            }

            let decoded = match decoder.decode(&packet) {
                Ok(d) => d,
                Err(_) => continue,
            };

            let spec = *decoded.spec();
            let duration = decoded.capacity() as u64;

            let mut sample_buf = SampleBuffer::<f32>::new(duration, spec);
            sample_buf.copy_interleaved_ref(decoded);
            let samples = sample_buf.samples();

            let frame_samples = samples.len() / channel_count;

            for i in 0..frame_samples {
                let sample_idx = current_sample + i;
                if sample_idx >= start_sample && sample_idx < end_sample {
                    for (ch, out) in channels.iter_mut().enumerate() {
                        out.push(samples[i * channel_count + ch]);
                    }
                }
            }

            current_sample += frame_samples;
            if current_sample >= end_sample {
                break;
            }
        }

        Ok((channels, sample_rate))
    }
}

/// Linear-interpolation resampling for extraction windows.
///
/// Cheap and artifact-free enough for ASR input; the capture path uses the
/// sinc resampler in [`crate::resampling`] instead.
pub fn resample_linear(samples: &[f32], source_rate: u32, target_rate: u32) -> Vec<f32> {
    if samples.is_empty() || source_rate == 0 || source_rate == target_rate {
        return samples.to_vec();
    }

    let ratio = source_rate as f64 / target_rate as f64;
    let out_len = ((samples.len() as f64) / ratio).floor() as usize;
    let mut out = Vec::with_capacity(out_len);

    for i in 0..out_len {
        let src_pos = i as f64 * ratio;
        let idx = src_pos as usize;
        let frac = (src_pos - idx as f64) as f32;

        let a = samples[idx.min(samples.len() - 1)];
        let b = samples[(idx + 1).min(samples.len() - 1)];
        out.push(a + (b - a) * frac);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aligner_releases_only_paired_prefix() {
        let mut aligner = ChannelAligner::default();

        // Mic runs ahead of sys by two samples
        let out = aligner.push(&[0.1, 0.2, 0.3, 0.4], &[0.5, 0.6]);
        assert_eq!(out, vec![0.1, 0.5, 0.2, 0.6]);
        assert_eq!(aligner.pending(), (2, 0));

        // Sys catches up; the held-back mic samples pair off
        let out = aligner.push(&[], &[0.7, 0.8, 0.9]);
        assert_eq!(out, vec![0.3, 0.7, 0.4, 0.8]);
        assert_eq!(aligner.pending(), (0, 1));
    }

    #[test]
    fn test_aligner_drain_pads_shorter_channel() {
        let mut aligner = ChannelAligner::default();
        aligner.push(&[0.1, 0.2, 0.3], &[0.4]);

        let tail = aligner.drain_padded();
        assert_eq!(tail, vec![0.2, 0.0, 0.3, 0.0]);
        assert_eq!(aligner.pending(), (0, 0));
    }

    #[test]
    fn test_s16le_quantization() {
        let bytes = to_s16le(&[0.0, 1.0, -1.0, 2.0]);
        assert_eq!(bytes.len(), 8);
        assert_eq!(i16::from_le_bytes([bytes[0], bytes[1]]), 0);
        assert_eq!(i16::from_le_bytes([bytes[2], bytes[3]]), i16::MAX);
        // Over-range input clips instead of wrapping
        assert_eq!(
            i16::from_le_bytes([bytes[6], bytes[7]]),
            i16::from_le_bytes([bytes[2], bytes[3]])
        );
    }

    #[test]
    fn test_locate_ffmpeg_honors_override() {
        std::env::set_var("ECHOSCRIBE_FFMPEG", "/opt/media/ffmpeg");
        let found = locate_ffmpeg().unwrap();
        std::env::remove_var("ECHOSCRIBE_FFMPEG");
        assert_eq!(found, PathBuf::from("/opt/media/ffmpeg"));
    }

    #[test]
    fn test_resample_linear_identity() {
        let samples = vec![0.1, 0.2, 0.3, 0.4];
        assert_eq!(resample_linear(&samples, 16000, 16000), samples);
    }

    #[test]
    fn test_resample_linear_halves_length() {
        let samples: Vec<f32> = (0..1000).map(|i| (i as f32 / 1000.0).sin()).collect();
        let out = resample_linear(&samples, 32000, 16000);
        assert_eq!(out.len(), 500);
    }

    #[test]
    fn test_resample_linear_interpolates_midpoints() {
        // Downsampling 2:1 with a linear ramp must land between neighbors
        let samples = vec![0.0, 1.0, 2.0, 3.0];
        let out = resample_linear(&samples, 48000, 24000);
        assert_eq!(out.len(), 2);
        assert!((out[0] - 0.0).abs() < 1e-6);
        assert!((out[1] - 2.0).abs() < 1e-6);
    }
}

//! Audio capture
//!
//! Microphone input goes through cpal. System audio (the far side of the
//! call) comes from a platform driver behind [`SystemAudioCapture`]; the
//! reference implementation pipes raw f32 samples from a helper process.
//! Both channels share a wall-clock origin within ±20 ms — the recorder
//! starts them back to back and pairs their buffers sample-for-sample.

use anyhow::{Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use echoscribe_types::AudioDevice;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};

/// Audio channel identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioChannel {
    /// Microphone input
    Microphone,
    /// System audio output (loopback)
    System,
}

/// Audio data with channel information
#[derive(Debug, Clone)]
pub struct ChannelData {
    /// Source channel
    pub channel: AudioChannel,
    /// Audio samples (mono, float32)
    pub samples: Vec<f32>,
}

/// Configuration for system audio capture
#[derive(Debug, Clone)]
pub struct SystemCaptureConfig {
    /// Target sample rate (default: 24000 Hz)
    pub sample_rate: u32,
    /// Helper binary delivering raw f32le samples on stdout; auto-detected
    /// next to the executable when not set
    pub helper_path: Option<PathBuf>,
}

impl Default for SystemCaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: echoscribe_types::RECORD_SAMPLE_RATE,
            helper_path: None,
        }
    }
}

/// System audio capture trait
///
/// Platform drivers (Core Audio tap, WASAPI loopback, PipeWire monitor)
/// live outside this crate; they all share this surface.
pub trait SystemAudioCapture: Send {
    /// Start capturing system audio
    fn start(&mut self) -> Result<()>;

    /// Stop capturing
    fn stop(&mut self) -> Result<()>;

    /// Check if capture is running
    fn is_running(&self) -> bool;

    /// Get receiver for audio data
    fn receiver(&self) -> &mpsc::Receiver<ChannelData>;
}

/// Microphone capture from an input device
pub struct MicCapture {
    device: cpal::Device,
    config: cpal::StreamConfig,
    stream: Option<cpal::Stream>,
    buffer: Arc<Mutex<Vec<f32>>>,
}

impl MicCapture {
    /// Create new microphone capture for the named device (default if None)
    pub fn new(device_name: Option<&str>) -> Result<Self> {
        let host = cpal::default_host();

        let device = if let Some(name) = device_name {
            host.input_devices()?
                .find(|d| d.name().map(|n| n == name).unwrap_or(false))
                .context("Device not found")?
        } else {
            host.default_input_device()
                .context("No default input device")?
        };

        let config = device.default_input_config()?;

        tracing::info!(
            "Mic capture: {} @ {}Hz, {} channels",
            device.name().unwrap_or_default(),
            config.sample_rate().0,
            config.channels()
        );

        Ok(Self {
            device,
            config: config.into(),
            stream: None,
            buffer: Arc::new(Mutex::new(Vec::new())),
        })
    }

    /// Start capturing audio
    pub fn start(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let buffer = self.buffer.clone();
        let channels = self.config.channels as usize;

        let stream = self.device.build_input_stream(
            &self.config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                // Average interleaved channels down to mono
                let mono: Vec<f32> = data
                    .chunks(channels)
                    .map(|chunk| chunk.iter().sum::<f32>() / channels as f32)
                    .collect();

                if let Ok(mut buf) = buffer.lock() {
                    buf.extend_from_slice(&mono);
                }
            },
            |err| {
                tracing::error!("Mic capture error: {}", err);
            },
            None,
        )?;

        stream.play()?;
        self.stream = Some(stream);

        tracing::info!("Mic stream started");
        Ok(())
    }

    /// Stop capturing and return any remaining samples
    pub fn stop(&mut self) -> Vec<f32> {
        self.stream = None;
        let mut buffer = self.buffer.lock().unwrap();
        std::mem::take(&mut *buffer)
    }

    /// Take the buffered samples, leaving the buffer empty
    pub fn drain_samples(&self) -> Vec<f32> {
        let mut buffer = self.buffer.lock().unwrap();
        std::mem::take(&mut *buffer)
    }

    /// Get device sample rate
    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }
}

/// System capture fed by a helper process writing raw f32le to stdout.
///
/// Every platform driver ends up looking like this from the outside: a
/// producer the recorder can only drain, never rewind.
pub struct PipeSystemCapture {
    config: SystemCaptureConfig,
    child: Option<Child>,
    running: Arc<AtomicBool>,
    tx: mpsc::SyncSender<ChannelData>,
    rx: mpsc::Receiver<ChannelData>,
    reader_handle: Option<std::thread::JoinHandle<()>>,
}

impl PipeSystemCapture {
    pub fn new(config: SystemCaptureConfig) -> Result<Self> {
        // Capacity covers > 1 s of backlog at ~50 ms per buffer
        let (tx, rx) = mpsc::sync_channel(64);
        Ok(Self {
            config,
            child: None,
            running: Arc::new(AtomicBool::new(false)),
            tx,
            rx,
            reader_handle: None,
        })
    }

    fn helper_path(&self) -> Result<PathBuf> {
        if let Some(ref path) = self.config.helper_path {
            return Ok(path.clone());
        }

        let exe_dir = std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()));

        let candidates = [
            exe_dir.as_ref().map(|d| d.join("system-audio-helper")),
            exe_dir
                .as_ref()
                .map(|d| d.join("resources/system-audio-helper")),
        ];

        for candidate in candidates.into_iter().flatten() {
            if candidate.exists() {
                return Ok(candidate);
            }
        }

        if let Ok(path) = which::which("system-audio-helper") {
            return Ok(path);
        }

        anyhow::bail!("system-audio-helper binary not found")
    }
}

impl SystemAudioCapture for PipeSystemCapture {
    fn start(&mut self) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }

        let helper = self.helper_path()?;
        let mut child = Command::new(&helper)
            .arg("--sample-rate")
            .arg(self.config.sample_rate.to_string())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("Failed to start {}", helper.display()))?;

        let stdout = child.stdout.take().context("Helper has no stdout")?;
        let tx = self.tx.clone();
        let running = self.running.clone();
        running.store(true, Ordering::SeqCst);

        let handle = std::thread::spawn(move || {
            let mut reader = std::io::BufReader::new(stdout);
            // ~50 ms of 24 kHz mono per read
            let mut raw = vec![0u8; 1200 * 4];
            while running.load(Ordering::SeqCst) {
                match reader.read(&mut raw) {
                    Ok(0) => break,
                    Ok(n) => {
                        let samples: Vec<f32> = raw[..n - n % 4]
                            .chunks_exact(4)
                            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                            .collect();
                        if tx
                            .send(ChannelData {
                                channel: AudioChannel::System,
                                samples,
                            })
                            .is_err()
                        {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::error!("System audio read failed: {}", e);
                        break;
                    }
                }
            }
            running.store(false, Ordering::SeqCst);
        });

        self.child = Some(child);
        self.reader_handle = Some(handle);
        tracing::info!("System audio capture started via {}", helper.display());
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
        if let Some(handle) = self.reader_handle.take() {
            let _ = handle.join();
        }
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn receiver(&self) -> &mpsc::Receiver<ChannelData> {
        &self.rx
    }
}

impl Drop for PipeSystemCapture {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

/// List available input devices
pub fn list_input_devices() -> Result<Vec<AudioDevice>> {
    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    let devices: Vec<AudioDevice> = host
        .input_devices()?
        .filter_map(|device| {
            let name = device.name().ok()?;
            let config = device.default_input_config().ok()?;

            Some(AudioDevice {
                id: name.clone(),
                name: name.clone(),
                is_default: default_name.as_ref() == Some(&name),
                channels: config.channels(),
                sample_rate: config.sample_rate().0,
            })
        })
        .collect();

    Ok(devices)
}

/// Map recent samples to a 0..100 display level
pub fn rms_level(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let rms = crate::calculate_rms(samples);
    (rms * 300.0).min(100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rms_level_bounds() {
        assert_eq!(rms_level(&[]), 0.0);
        assert!(rms_level(&vec![1.0f32; 100]) <= 100.0);
        assert!(rms_level(&vec![0.05f32; 100]) > 0.0);
    }
}

//! Per-channel audio conditioning before ASR
//!
//! Applied in a fixed order: high-pass, de-click, noise gate, peak
//! normalization. Thresholds auto-tune from a quality probe of the raw
//! window.

use std::f32::consts::PI;

/// Filter thresholds for one channel
#[derive(Debug, Clone)]
pub struct FilterSettings {
    /// High-pass cutoff (Hz)
    pub highpass_hz: f32,
    /// A sample differing from both neighbors by more than this is a click
    pub declick_threshold: f32,
    /// Gate windows with RMS below this
    pub gate_threshold: f32,
    /// Attenuation floor of the gate
    pub gate_floor: f32,
    /// Normalization gain cap
    pub max_gain: f32,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            highpass_hz: 80.0,
            declick_threshold: 0.5,
            gate_threshold: 0.01,
            gate_floor: 0.1,
            max_gain: 20.0,
        }
    }
}

/// Quality probe of a raw channel window
#[derive(Debug, Clone)]
pub struct QualityReport {
    pub rms: f32,
    pub peak: f32,
    /// Ratio of loud-window RMS to quiet-window RMS, in dB
    pub snr_db: f32,
    pub click_count: usize,
    pub dc_offset: f32,
    /// RMS of the quietest windows, used as the noise-floor estimate
    pub noise_floor: f32,
}

/// Measure the signal before choosing thresholds
pub fn probe_quality(samples: &[f32], sample_rate: u32) -> QualityReport {
    if samples.is_empty() {
        return QualityReport {
            rms: 0.0,
            peak: 0.0,
            snr_db: 0.0,
            click_count: 0,
            dc_offset: 0.0,
            noise_floor: 0.0,
        };
    }

    let sum: f32 = samples.iter().sum();
    let dc_offset = sum / samples.len() as f32;

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    let rms = (sum_squares / samples.len() as f32).sqrt();

    let peak = samples.iter().fold(0.0f32, |p, s| p.max(s.abs()));

    let mut click_count = 0;
    for i in 1..samples.len().saturating_sub(1) {
        let d_prev = (samples[i] - samples[i - 1]).abs();
        let d_next = (samples[i] - samples[i + 1]).abs();
        if d_prev > 0.5 && d_next > 0.5 {
            click_count += 1;
        }
    }

    // SNR estimate from the spread of 10 ms window RMS values
    let window = (sample_rate as usize / 100).max(1);
    let mut window_rms: Vec<f32> = samples
        .chunks(window)
        .map(|w| (w.iter().map(|s| s * s).sum::<f32>() / w.len() as f32).sqrt())
        .collect();
    window_rms.sort_by(|a, b| a.partial_cmp(b).unwrap());

    let noise_floor = window_rms[window_rms.len() / 10];
    let signal = window_rms[window_rms.len() * 9 / 10];
    let snr_db = if noise_floor > 1e-9 {
        20.0 * (signal / noise_floor).log10()
    } else {
        60.0
    };

    QualityReport {
        rms,
        peak,
        snr_db,
        click_count,
        dc_offset,
        noise_floor,
    }
}

/// Derive filter thresholds from the probe
pub fn auto_tune(report: &QualityReport) -> FilterSettings {
    let mut settings = FilterSettings::default();

    // Gate just above the measured noise floor
    settings.gate_threshold = (report.noise_floor * 2.0).clamp(0.003, 0.05);

    // A clean signal can afford a tighter click threshold
    settings.declick_threshold = if report.click_count > 0 {
        (report.peak * 0.6).clamp(0.2, 0.8)
    } else {
        0.5
    };

    settings
}

/// Fixed-order filter chain for one channel
pub struct FilterChain {
    settings: FilterSettings,
    sample_rate: u32,
}

impl FilterChain {
    pub fn new(settings: FilterSettings, sample_rate: u32) -> Self {
        Self {
            settings,
            sample_rate,
        }
    }

    /// Probe the window and build an auto-tuned chain
    pub fn tuned_for(samples: &[f32], sample_rate: u32) -> Self {
        let report = probe_quality(samples, sample_rate);
        Self::new(auto_tune(&report), sample_rate)
    }

    /// Apply the full chain in place
    pub fn process(&self, samples: &mut Vec<f32>) {
        if samples.is_empty() {
            return;
        }
        self.highpass(samples);
        self.declick(samples);
        self.noise_gate(samples);
        self.normalize(samples);
    }

    /// First-order IIR high-pass
    fn highpass(&self, samples: &mut [f32]) {
        let rc = 1.0 / (2.0 * PI * self.settings.highpass_hz);
        let dt = 1.0 / self.sample_rate as f32;
        let alpha = rc / (rc + dt);

        let mut prev_in = samples[0];
        let mut prev_out = samples[0];
        for sample in samples.iter_mut().skip(1) {
            let x = *sample;
            let y = alpha * (prev_out + x - prev_in);
            prev_in = x;
            prev_out = y;
            *sample = y;
        }
    }

    /// Interpolate isolated spikes from their neighbors
    fn declick(&self, samples: &mut [f32]) {
        let threshold = self.settings.declick_threshold;
        for i in 1..samples.len().saturating_sub(1) {
            let d_prev = (samples[i] - samples[i - 1]).abs();
            let d_next = (samples[i] - samples[i + 1]).abs();
            if d_prev > threshold && d_next > threshold {
                samples[i] = (samples[i - 1] + samples[i + 1]) / 2.0;
            }
        }
    }

    /// Soft gate over 10 ms windows: attenuation proportional to
    /// rms/threshold, never below the floor
    fn noise_gate(&self, samples: &mut [f32]) {
        let window = (self.sample_rate as usize / 100).max(1);
        let threshold = self.settings.gate_threshold;
        let floor = self.settings.gate_floor;

        for chunk in samples.chunks_mut(window) {
            let rms = (chunk.iter().map(|s| s * s).sum::<f32>() / chunk.len() as f32).sqrt();
            if rms < threshold {
                let attenuation = (rms / threshold).max(floor);
                for sample in chunk.iter_mut() {
                    *sample *= attenuation;
                }
            }
        }
    }

    /// Peak normalization with a gain cap and hard clip
    fn normalize(&self, samples: &mut [f32]) {
        let peak = samples.iter().fold(0.0f32, |p, s| p.max(s.abs()));
        if peak < 1e-9 {
            return;
        }
        let gain = (1.0 / peak).min(self.settings.max_gain);
        for sample in samples.iter_mut() {
            *sample = (*sample * gain).clamp(-1.0, 1.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 16_000;

    #[test]
    fn test_highpass_attenuates_rumble() {
        // 20 Hz rumble, well below the 80 Hz cutoff
        let samples: Vec<f32> = (0..RATE as usize)
            .map(|i| (2.0 * PI * 20.0 * i as f32 / RATE as f32).sin() * 0.5)
            .collect();
        let input_rms = (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt();

        let chain = FilterChain::new(
            FilterSettings {
                max_gain: 1.0, // isolate the filter from normalization
                gate_threshold: 0.0,
                ..Default::default()
            },
            RATE,
        );
        let mut filtered = samples.clone();
        chain.highpass(&mut filtered);
        let output_rms =
            (filtered.iter().map(|s| s * s).sum::<f32>() / filtered.len() as f32).sqrt();

        assert!(output_rms < input_rms * 0.5);
    }

    #[test]
    fn test_declick_interpolates_spike() {
        let mut samples = vec![0.1f32; 100];
        samples[50] = 0.95;

        let chain = FilterChain::new(FilterSettings::default(), RATE);
        chain.declick(&mut samples);

        assert!((samples[50] - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_gate_attenuates_quiet_windows() {
        let quiet = vec![0.001f32; 160];
        let mut samples = quiet.clone();

        let chain = FilterChain::new(FilterSettings::default(), RATE);
        chain.noise_gate(&mut samples);

        assert!(samples[0].abs() < quiet[0].abs());
        // Floor keeps the gate soft
        assert!(samples[0].abs() >= quiet[0].abs() * 0.1 - 1e-9);
    }

    #[test]
    fn test_normalize_caps_gain() {
        let mut samples = vec![0.001f32; 100];
        let chain = FilterChain::new(FilterSettings::default(), RATE);
        chain.normalize(&mut samples);

        // Gain is capped at 20x, so 0.001 becomes at most 0.02
        assert!((samples[0] - 0.02).abs() < 1e-6);
    }

    #[test]
    fn test_normalize_reaches_unit_peak() {
        let mut samples = vec![0.0f32; 100];
        samples[10] = 0.25;
        let chain = FilterChain::new(FilterSettings::default(), RATE);
        chain.normalize(&mut samples);
        assert!((samples[10] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_probe_counts_clicks_and_dc() {
        let mut samples = vec![0.2f32; 1000];
        samples[500] = 0.9;
        let report = probe_quality(&samples, RATE);

        assert_eq!(report.click_count, 1);
        assert!(report.dc_offset > 0.19);
        assert!(report.peak > 0.89);
    }

    #[test]
    fn test_auto_tune_tracks_noise_floor() {
        let mut samples: Vec<f32> = vec![0.004f32; 8000];
        samples.extend(vec![0.3f32; 8000]);
        let report = probe_quality(&samples, RATE);
        let settings = auto_tune(&report);

        assert!(settings.gate_threshold >= 0.003);
        assert!(settings.gate_threshold <= 0.05);
    }
}

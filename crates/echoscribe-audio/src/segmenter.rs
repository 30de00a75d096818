//! Chunk segmenter
//!
//! Accumulates the live stream and splits it into transcription-ready
//! chunks on natural pause boundaries:
//! - pause-driven modes: look for >= 1 s of silence after the minimum
//!   chunk length, split at the pause midpoint, force a split at the
//!   maximum length
//! - off: fixed intervals regardless of detected pauses
//!
//! In stereo capture the mic and sys buffers advance in lockstep with the
//! mixed buffer, so every emitted chunk carries three parallel slices.

use std::collections::VecDeque;
use std::time::Duration;

/// Chunking mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VadMode {
    /// Pause-driven splitting; downstream transcription compresses speech
    #[default]
    Auto,
    /// Pause-driven splitting; explicit speech-compression transcription
    Compression,
    /// Pause-driven splitting; one ASR call per speech region downstream
    PerRegion,
    /// Fixed intervals, no pause detection
    Off,
}

impl VadMode {
    pub fn from_str(s: &str) -> Self {
        match s {
            "compression" => VadMode::Compression,
            "per_region" => VadMode::PerRegion,
            "off" => VadMode::Off,
            _ => VadMode::Auto,
        }
    }
}

/// Segmentation configuration
#[derive(Debug, Clone)]
pub struct VadConfig {
    pub mode: VadMode,
    /// Delay before chunking starts; earlier audio stays in the first chunk
    pub chunking_start_delay: Duration,
    /// Minimum chunk length
    pub min_chunk_duration: Duration,
    /// Maximum chunk length (forced split)
    pub max_chunk_duration: Duration,
    /// Silence run length that qualifies as a split point
    pub silence_duration: Duration,
    /// RMS below this is silence
    pub silence_threshold: f32,
    /// Chunk length in `Off` mode
    pub fixed_chunk_duration: Duration,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            mode: VadMode::Auto,
            chunking_start_delay: Duration::from_secs(60),
            min_chunk_duration: Duration::from_secs(30),
            max_chunk_duration: Duration::from_secs(300),
            silence_duration: Duration::from_secs(1),
            silence_threshold: 0.02,
            fixed_chunk_duration: Duration::from_secs(30),
        }
    }
}

/// Segmenter state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmenterState {
    /// Accumulating, never emitting, until the start delay passes
    Warming,
    /// Accumulating and looking for split points
    Searching,
    /// Flushing residue on stop
    Draining,
}

/// An emitted chunk with its audio
#[derive(Debug, Clone)]
pub struct ChunkEvent {
    /// Chunk index (dense, monotonic)
    pub index: usize,
    /// Start relative to recording start (ms)
    pub start_ms: i64,
    /// End relative to recording start (ms)
    pub end_ms: i64,
    pub duration: Duration,
    /// Mixed mono samples for the chunk range
    pub samples: Vec<f32>,
    /// Mic channel slice (stereo capture only)
    pub mic_samples: Option<Vec<f32>>,
    /// Sys channel slice (stereo capture only)
    pub sys_samples: Option<Vec<f32>>,
}

/// Streaming segmenter
pub struct ChunkSegmenter {
    config: VadConfig,
    sample_rate: u32,

    /// Accumulated samples not yet emitted (mixed mono). Element 0 sits at
    /// absolute position `emitted_samples`.
    accumulated: Vec<f32>,
    mic_accumulated: Vec<f32>,
    sys_accumulated: Vec<f32>,
    has_separate_channels: bool,

    /// Total samples ever consumed
    total_samples: i64,
    /// Absolute position of the last split; monotonic
    emitted_samples: i64,
    chunk_count: usize,

    state: SegmenterState,

    pending: VecDeque<ChunkEvent>,
}

impl ChunkSegmenter {
    pub fn new(config: VadConfig, sample_rate: u32) -> Self {
        Self {
            config,
            sample_rate,
            accumulated: Vec::new(),
            mic_accumulated: Vec::new(),
            sys_accumulated: Vec::new(),
            has_separate_channels: false,
            total_samples: 0,
            emitted_samples: 0,
            chunk_count: 0,
            state: SegmenterState::Warming,
            pending: VecDeque::new(),
        }
    }

    /// Feed mono samples
    pub fn process(&mut self, samples: &[f32]) {
        self.accumulated.extend_from_slice(samples);
        self.total_samples += samples.len() as i64;

        if self.state == SegmenterState::Warming {
            if self.elapsed() >= self.config.chunking_start_delay {
                self.state = SegmenterState::Searching;
                tracing::info!("ChunkSegmenter: chunking enabled after {:?}", self.elapsed());
            } else {
                return;
            }
        }

        while self.try_emit_chunk() {}
    }

    /// Feed paired stereo samples; the mix drives pause detection
    pub fn process_stereo(&mut self, mic_samples: &[f32], sys_samples: &[f32]) {
        let min_len = mic_samples.len().min(sys_samples.len());
        if min_len == 0 {
            return;
        }

        self.has_separate_channels = true;
        self.mic_accumulated
            .extend_from_slice(&mic_samples[..min_len]);
        self.sys_accumulated
            .extend_from_slice(&sys_samples[..min_len]);

        let mut mix = vec![0.0f32; min_len];
        for i in 0..min_len {
            mix[i] = (mic_samples[i] + sys_samples[i]) / 2.0;
        }

        self.process(&mix);
    }

    /// Pop the next emitted chunk, if any
    pub fn try_recv(&mut self) -> Option<ChunkEvent> {
        self.pending.pop_front()
    }

    /// Flush all remaining audio, splitting into max-bounded chunks and
    /// preferring pause midpoints. Residue shorter than one second is
    /// discarded.
    pub fn flush_all(&mut self) -> Vec<ChunkEvent> {
        self.state = SegmenterState::Draining;

        let min_flush_samples = self.sample_rate as i64;
        let min_samples = self.duration_to_samples(self.config.min_chunk_duration);
        let max_samples = self.duration_to_samples(self.config.max_chunk_duration);

        let mut events = Vec::new();

        loop {
            let available = self.total_samples - self.emitted_samples;

            if available < min_flush_samples {
                if available > 0 {
                    tracing::debug!(
                        "ChunkSegmenter: discarding {} residue samples below 1 s",
                        available
                    );
                }
                break;
            }

            if available <= max_samples {
                events.push(self.emit(self.total_samples));
                break;
            }

            // Residue longer than a chunk: split on a pause when one exists
            let search_start = self.emitted_samples + min_samples.min(available);
            let search_end = self.emitted_samples + max_samples;
            let split = self
                .find_silence_gap(search_start, search_end)
                .unwrap_or(search_end);
            events.push(self.emit(split));
        }

        tracing::info!("ChunkSegmenter: flushed {} final chunk(s)", events.len());
        events
    }

    pub fn state(&self) -> SegmenterState {
        self.state
    }

    pub fn chunk_count(&self) -> usize {
        self.chunk_count
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn has_separate_channels(&self) -> bool {
        self.has_separate_channels
    }

    /// Total consumed duration in milliseconds
    pub fn total_duration_ms(&self) -> i64 {
        self.total_samples * 1000 / self.sample_rate as i64
    }

    fn elapsed(&self) -> Duration {
        Duration::from_secs_f64(self.total_samples as f64 / self.sample_rate as f64)
    }

    fn duration_to_samples(&self, d: Duration) -> i64 {
        (d.as_secs_f64() * self.sample_rate as f64) as i64
    }

    /// Try to emit one chunk; true if something was emitted.
    fn try_emit_chunk(&mut self) -> bool {
        let min_samples = self.duration_to_samples(self.config.min_chunk_duration);
        let max_samples = self.duration_to_samples(self.config.max_chunk_duration);

        let available = self.total_samples - self.emitted_samples;

        let split_point: i64 = match self.config.mode {
            VadMode::Off => {
                let fixed = self
                    .duration_to_samples(self.config.fixed_chunk_duration)
                    .min(max_samples);
                if available < fixed {
                    return false;
                }
                self.emitted_samples + fixed
            }
            VadMode::Auto | VadMode::Compression | VadMode::PerRegion => {
                let search_start = self.emitted_samples + min_samples;
                let search_end = self.total_samples.min(self.emitted_samples + max_samples);

                if search_start >= search_end {
                    return false;
                }

                if let Some(gap) = self.find_silence_gap(search_start, search_end) {
                    gap
                } else if available >= max_samples {
                    tracing::warn!(
                        "ChunkSegmenter: forced split at max duration ({}s)",
                        self.config.max_chunk_duration.as_secs()
                    );
                    self.emitted_samples + max_samples
                } else {
                    return false;
                }
            }
        };

        let event = self.emit(split_point);
        self.pending.push_back(event);
        true
    }

    /// Cut `[emitted_samples, split_point)` out of the buffers and build
    /// the event. `emitted_samples` advances monotonically.
    fn emit(&mut self, split_point: i64) -> ChunkEvent {
        let take = (split_point - self.emitted_samples).max(0) as usize;
        let take = take.min(self.accumulated.len());

        let samples: Vec<f32> = self.accumulated.drain(..take).collect();

        let (mic_samples, sys_samples) = if self.has_separate_channels {
            let mic_take = take.min(self.mic_accumulated.len());
            let sys_take = take.min(self.sys_accumulated.len());
            (
                Some(self.mic_accumulated.drain(..mic_take).collect()),
                Some(self.sys_accumulated.drain(..sys_take).collect()),
            )
        } else {
            (None, None)
        };

        let start_ms = self.emitted_samples * 1000 / self.sample_rate as i64;
        let end_ms = split_point * 1000 / self.sample_rate as i64;
        let duration = Duration::from_millis((end_ms - start_ms).max(0) as u64);

        let event = ChunkEvent {
            index: self.chunk_count,
            start_ms,
            end_ms,
            duration,
            samples,
            mic_samples,
            sys_samples,
        };

        tracing::info!(
            "ChunkSegmenter: emitting chunk {} ({} - {} ms, {:?})",
            self.chunk_count,
            start_ms,
            end_ms,
            duration
        );

        self.chunk_count += 1;
        self.emitted_samples = split_point;

        event
    }

    /// Find a qualifying pause in `[start_pos, end_pos)` (absolute sample
    /// positions). Slides a 100 ms RMS window; a run of silent windows at
    /// least `silence_duration` long yields the run's midpoint.
    fn find_silence_gap(&self, start_pos: i64, end_pos: i64) -> Option<i64> {
        let silence_samples = self.duration_to_samples(self.config.silence_duration);
        let window_size = (self.sample_rate / 10) as i64;

        let mut consecutive_silent = 0i64;
        let mut silence_start = -1i64;

        let mut pos = start_pos;
        while pos < end_pos - window_size {
            let rel_start = (pos - self.emitted_samples) as usize;
            let rel_end =
                ((pos + window_size - self.emitted_samples) as usize).min(self.accumulated.len());
            if rel_start >= rel_end {
                break;
            }
            let window = &self.accumulated[rel_start..rel_end];

            let rms = crate::calculate_rms(window);

            if rms < self.config.silence_threshold {
                if consecutive_silent == 0 {
                    silence_start = pos;
                }
                consecutive_silent += window_size;

                if consecutive_silent >= silence_samples {
                    return Some(silence_start + consecutive_silent / 2);
                }
            } else {
                consecutive_silent = 0;
                silence_start = -1;
            }

            pos += window_size;
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // A low sample rate keeps the test buffers small without changing any
    // of the timing arithmetic.
    const RATE: u32 = 1000;

    fn speech(seconds: f64) -> Vec<f32> {
        vec![0.1f32; (seconds * RATE as f64) as usize]
    }

    fn silence(seconds: f64) -> Vec<f32> {
        vec![0.0f32; (seconds * RATE as f64) as usize]
    }

    fn config(mode: VadMode) -> VadConfig {
        VadConfig {
            mode,
            ..Default::default()
        }
    }

    fn drain(seg: &mut ChunkSegmenter) -> Vec<ChunkEvent> {
        let mut out = Vec::new();
        while let Some(e) = seg.try_recv() {
            out.push(e);
        }
        out
    }

    #[test]
    fn test_warming_never_emits() {
        let mut seg = ChunkSegmenter::new(config(VadMode::Auto), RATE);
        seg.process(&speech(59.0));
        assert_eq!(seg.state(), SegmenterState::Warming);
        assert!(seg.try_recv().is_none());
    }

    #[test]
    fn test_leading_silence_below_delay_produces_no_chunk() {
        let mut seg = ChunkSegmenter::new(config(VadMode::Auto), RATE);
        seg.process(&silence(45.0));
        assert_eq!(seg.chunk_count(), 0);
        assert!(seg.flush_all().len() <= 1); // residue only, never a warm-up chunk
    }

    #[test]
    fn test_pause_driven_split_at_midpoint() {
        // Single 4-minute utterance with a 1.2 s pause at 95 s and an
        // ignorable 0.4 s pause at 210 s.
        let mut seg = ChunkSegmenter::new(config(VadMode::Auto), RATE);
        let mut audio = speech(95.0);
        audio.extend(silence(1.2));
        audio.extend(speech(210.0 - 96.2));
        audio.extend(silence(0.4));
        audio.extend(speech(240.0 - 210.4));
        seg.process(&audio);

        let events = drain(&mut seg);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].start_ms, 0);
        // Split lands at the detected pause midpoint, ~95.6 s
        assert!(
            (events[0].end_ms - 95_600).abs() < 400,
            "split at {} ms",
            events[0].end_ms
        );

        let tail = seg.flush_all();
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].start_ms, events[0].end_ms);
        assert_eq!(tail[0].end_ms, 240_000);
    }

    #[test]
    fn test_forced_split_at_max_duration() {
        // 6 minutes of continuous speech, no pauses.
        let mut seg = ChunkSegmenter::new(config(VadMode::Auto), RATE);
        seg.process(&speech(360.0));

        let events = drain(&mut seg);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].start_ms, 0);
        assert_eq!(events[0].end_ms, 300_000);

        let tail = seg.flush_all();
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].start_ms, 300_000);
        assert_eq!(tail[0].end_ms, 360_000);
    }

    #[test]
    fn test_off_mode_fixed_intervals() {
        let cfg = VadConfig {
            mode: VadMode::Off,
            chunking_start_delay: Duration::from_secs(5),
            fixed_chunk_duration: Duration::from_secs(15),
            ..Default::default()
        };
        let mut seg = ChunkSegmenter::new(cfg, RATE);
        seg.process(&speech(46.0));

        let events = drain(&mut seg);
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].end_ms, 15_000);
        assert_eq!(events[1].end_ms, 30_000);
        assert_eq!(events[2].end_ms, 45_000);
    }

    #[test]
    fn test_chunks_are_contiguous_and_monotonic() {
        let mut seg = ChunkSegmenter::new(config(VadMode::Auto), RATE);
        let mut audio = Vec::new();
        for _ in 0..4 {
            audio.extend(speech(40.0));
            audio.extend(silence(1.5));
        }
        seg.process(&audio);
        let mut events = drain(&mut seg);
        events.extend(seg.flush_all());

        assert!(events.len() >= 2);
        for pair in events.windows(2) {
            assert_eq!(pair[0].end_ms, pair[1].start_ms);
            assert_eq!(pair[0].index + 1, pair[1].index);
        }
        for e in &events {
            assert!(e.start_ms < e.end_ms);
        }
    }

    #[test]
    fn test_flush_discards_sub_second_residue() {
        let cfg = VadConfig {
            chunking_start_delay: Duration::from_secs(0),
            min_chunk_duration: Duration::from_secs(5),
            max_chunk_duration: Duration::from_secs(10),
            ..Default::default()
        };
        let mut seg = ChunkSegmenter::new(cfg, RATE);
        seg.process(&speech(10.5));

        let events = drain(&mut seg);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].end_ms, 10_000);

        // 0.5 s residue is dropped
        assert!(seg.flush_all().is_empty());
    }

    #[test]
    fn test_stereo_slices_stay_in_lockstep() {
        let cfg = VadConfig {
            chunking_start_delay: Duration::from_secs(0),
            min_chunk_duration: Duration::from_secs(2),
            max_chunk_duration: Duration::from_secs(4),
            ..Default::default()
        };
        let mut seg = ChunkSegmenter::new(cfg, RATE);
        let mic = vec![0.2f32; 5 * RATE as usize];
        let sys = vec![0.1f32; 5 * RATE as usize];
        seg.process_stereo(&mic, &sys);

        let events = drain(&mut seg);
        assert!(!events.is_empty());
        for e in &events {
            let mic = e.mic_samples.as_ref().unwrap();
            let sys = e.sys_samples.as_ref().unwrap();
            assert_eq!(mic.len(), e.samples.len());
            assert_eq!(sys.len(), e.samples.len());
            assert!((mic[0] - 0.2).abs() < 1e-6);
            assert!((sys[0] - 0.1).abs() < 1e-6);
        }
    }
}

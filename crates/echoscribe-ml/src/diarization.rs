//! Speaker diarization
//!
//! The diarizer runs as a subprocess for stability: each call is a fresh
//! process, so native-side leaks never accumulate in the recorder. Raw
//! f32 samples go to stdin, JSON segments plus one embedding per unique
//! speaker come back on stdout.
//!
//! Consolidation of the raw segment stream lives here too: minor
//! speakers are reassigned and sub-second fragments merged before the
//! labels reach the transcript.

use anyhow::{Context, Result};
use echoscribe_types::{SpeakerEmbedding, SpeakerSegment, ASR_SAMPLE_RATE};
use serde::Deserialize;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::Mutex;

/// Diarization configuration
#[derive(Debug, Clone)]
pub struct DiarizationConfig {
    /// Path to the diarizer binary (auto-detected when unset)
    pub binary_path: Option<String>,
    /// Clustering threshold (0.0-1.0)
    pub clustering_threshold: f64,
    /// Minimum segment duration in seconds
    pub min_segment_duration: f64,
    /// Minimum gap duration in seconds
    pub min_gap_duration: f64,
    /// Enable debug output
    pub debug: bool,
}

impl Default for DiarizationConfig {
    fn default() -> Self {
        Self {
            binary_path: None,
            clustering_threshold: 0.70,
            min_segment_duration: 0.2,
            min_gap_duration: 0.15,
            debug: false,
        }
    }
}

/// Full diarization result
#[derive(Debug, Clone)]
pub struct DiarizationResult {
    /// Speaker segments
    pub segments: Vec<SpeakerSegment>,
    /// Number of detected speakers
    pub num_speakers: i32,
    /// One embedding per unique speaker (for cross-session matching)
    pub speaker_embeddings: Vec<SpeakerEmbedding>,
}

/// JSON output of the diarizer binary
#[derive(Debug, Deserialize)]
struct DiarizerOutput {
    segments: Vec<DiarizerSegment>,
    num_speakers: i32,
    speaker_embeddings: Option<Vec<DiarizerEmbedding>>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DiarizerSegment {
    speaker: i32,
    start: f64,
    end: f64,
}

#[derive(Debug, Deserialize)]
struct DiarizerEmbedding {
    speaker: i32,
    embedding: Vec<f32>,
    duration: f64,
}

/// Subprocess-backed diarization engine
pub struct PipeDiarizationEngine {
    binary_path: PathBuf,
    config: DiarizationConfig,
    last_num_speakers: Mutex<usize>,
}

impl PipeDiarizationEngine {
    pub fn new(config: DiarizationConfig) -> Result<Self> {
        let binary_path = if let Some(ref path) = config.binary_path {
            PathBuf::from(path)
        } else {
            Self::find_binary()?
        };

        if !binary_path.exists() {
            anyhow::bail!("diarizer binary not found at {:?}", binary_path);
        }

        tracing::info!(
            "PipeDiarizationEngine: binary={:?} (threshold={:.2}, minSeg={:.2})",
            binary_path,
            config.clustering_threshold,
            config.min_segment_duration
        );

        Ok(Self {
            binary_path,
            config,
            last_num_speakers: Mutex::new(0),
        })
    }

    pub fn with_defaults() -> Result<Self> {
        Self::new(DiarizationConfig::default())
    }

    /// Look for the diarizer binary in common locations
    fn find_binary() -> Result<PathBuf> {
        let exe_dir = std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()));

        let candidates = [
            exe_dir.as_ref().map(|d| d.join("diarizer")),
            exe_dir.as_ref().map(|d| d.join("resources/diarizer")),
        ];

        for candidate in candidates.into_iter().flatten() {
            if candidate.exists() {
                tracing::debug!("Found diarizer at {:?}", candidate);
                return Ok(candidate);
            }
        }

        anyhow::bail!("diarizer binary not found in any known location")
    }

    /// Check whether the engine could run at all
    pub fn is_available() -> bool {
        Self::find_binary().is_ok()
    }

    fn run(&self, samples: &[f32]) -> Result<DiarizationResult> {
        if samples.is_empty() {
            return Ok(DiarizationResult {
                segments: vec![],
                num_speakers: 0,
                speaker_embeddings: vec![],
            });
        }

        let start_time = std::time::Instant::now();

        let mut args = vec![
            "--samples".to_string(),
            "--clustering-threshold".to_string(),
            format!("{:.2}", self.config.clustering_threshold),
            "--min-segment-duration".to_string(),
            format!("{:.2}", self.config.min_segment_duration),
            "--min-gap-duration".to_string(),
            format!("{:.2}", self.config.min_gap_duration),
        ];
        if self.config.debug {
            args.push("--debug".to_string());
        }

        let mut child = Command::new(&self.binary_path)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .context("Failed to start diarizer process")?;

        {
            let stdin = child.stdin.as_mut().context("Failed to get stdin")?;
            let bytes: Vec<u8> = samples.iter().flat_map(|&s| s.to_le_bytes()).collect();
            stdin.write_all(&bytes).context("Failed to write samples")?;
        }

        let output = child
            .wait_with_output()
            .context("Failed to wait for diarizer")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("diarizer failed: {}", stderr);
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let result: DiarizerOutput = serde_json::from_str(&stdout)
            .with_context(|| format!("Failed to parse diarizer output: {}", stdout))?;

        if let Some(error) = result.error {
            anyhow::bail!("Diarization error: {}", error);
        }

        let segments: Vec<SpeakerSegment> = result
            .segments
            .iter()
            .map(|seg| SpeakerSegment {
                start: seg.start as f32,
                end: seg.end as f32,
                speaker: seg.speaker,
            })
            .collect();

        let speaker_embeddings: Vec<SpeakerEmbedding> = result
            .speaker_embeddings
            .unwrap_or_default()
            .into_iter()
            .map(|emb| SpeakerEmbedding {
                speaker: emb.speaker,
                embedding: emb.embedding,
                duration: emb.duration,
            })
            .collect();

        *self.last_num_speakers.lock().unwrap() = result.num_speakers as usize;

        let elapsed = start_time.elapsed();
        let audio_duration = samples.len() as f64 / ASR_SAMPLE_RATE as f64;
        tracing::info!(
            "Diarization: {:.1}s audio in {:.2}s, {} segments from {} speakers ({} embeddings)",
            audio_duration,
            elapsed.as_secs_f64(),
            segments.len(),
            result.num_speakers,
            speaker_embeddings.len()
        );

        Ok(DiarizationResult {
            segments,
            num_speakers: result.num_speakers,
            speaker_embeddings,
        })
    }
}

impl crate::traits::DiarizationEngine for PipeDiarizationEngine {
    fn name(&self) -> &str {
        "pipe-diarizer"
    }

    fn diarize(&self, samples: &[f32]) -> Result<Vec<SpeakerSegment>> {
        Ok(self.run(samples)?.segments)
    }

    fn diarize_with_embeddings(&self, samples: &[f32]) -> Result<DiarizationResult> {
        self.run(samples)
    }

    fn num_speakers(&self) -> usize {
        *self.last_num_speakers.lock().unwrap()
    }
}

/// Share of total speech below which a speaker is considered spurious
const MINOR_SPEAKER_SHARE: f32 = 0.10;
/// Segments shorter than this merge into a neighbor (seconds)
const SHORT_SEGMENT_SEC: f32 = 1.0;

/// Clean up raw diarizer output:
/// 1. speakers holding < 10% of total speech are dissolved, each of
///    their segments reassigned to the nearest majority segment in time
/// 2. adjacent sub-second segments merge into a neighbor, preferring the
///    same speaker, then the nearer one in time
pub fn consolidate_segments(mut segments: Vec<SpeakerSegment>) -> Vec<SpeakerSegment> {
    if segments.is_empty() {
        return segments;
    }

    segments.sort_by(|a, b| a.start.partial_cmp(&b.start).unwrap_or(std::cmp::Ordering::Equal));

    // Per-speaker speech share
    let mut totals: std::collections::HashMap<i32, f32> = std::collections::HashMap::new();
    let mut grand_total = 0.0f32;
    for seg in &segments {
        let dur = seg.end - seg.start;
        *totals.entry(seg.speaker).or_insert(0.0) += dur;
        grand_total += dur;
    }

    if grand_total <= 0.0 {
        return segments;
    }

    let minor: std::collections::HashSet<i32> = totals
        .iter()
        .filter(|(_, &dur)| dur / grand_total < MINOR_SPEAKER_SHARE)
        .map(|(&id, _)| id)
        .collect();

    // Dissolve minor speakers into the nearest majority segment
    if !minor.is_empty() && minor.len() < totals.len() {
        let majority: Vec<(f32, i32)> = segments
            .iter()
            .filter(|s| !minor.contains(&s.speaker))
            .map(|s| ((s.start + s.end) / 2.0, s.speaker))
            .collect();

        for seg in segments.iter_mut() {
            if minor.contains(&seg.speaker) {
                let mid = (seg.start + seg.end) / 2.0;
                if let Some((_, speaker)) = majority
                    .iter()
                    .min_by(|a, b| {
                        (a.0 - mid)
                            .abs()
                            .partial_cmp(&(b.0 - mid).abs())
                            .unwrap_or(std::cmp::Ordering::Equal)
                    })
                    .copied()
                {
                    tracing::debug!(
                        "Diarization consolidate: speaker {} segment -> speaker {}",
                        seg.speaker,
                        speaker
                    );
                    seg.speaker = speaker;
                }
            }
        }
    }

    // Merge sub-second fragments into a neighbor
    let mut merged: Vec<SpeakerSegment> = Vec::with_capacity(segments.len());
    for seg in segments {
        match merged.last_mut() {
            Some(prev) if prev.speaker == seg.speaker && seg.start - prev.end < 0.5 => {
                prev.end = seg.end.max(prev.end);
            }
            _ => merged.push(seg),
        }
    }

    let mut i = 0;
    while i < merged.len() {
        let dur = merged[i].end - merged[i].start;
        if dur >= SHORT_SEGMENT_SEC || merged.len() == 1 {
            i += 1;
            continue;
        }

        let prev_idx = i.checked_sub(1);
        let next_idx = if i + 1 < merged.len() { Some(i + 1) } else { None };

        // Prefer a same-speaker neighbor, then the nearer one
        let target = match (prev_idx, next_idx) {
            (Some(p), Some(n)) => {
                if merged[p].speaker == merged[i].speaker {
                    p
                } else if merged[n].speaker == merged[i].speaker {
                    n
                } else {
                    let gap_prev = merged[i].start - merged[p].end;
                    let gap_next = merged[n].start - merged[i].end;
                    if gap_prev <= gap_next {
                        p
                    } else {
                        n
                    }
                }
            }
            (Some(p), None) => p,
            (None, Some(n)) => n,
            (None, None) => {
                i += 1;
                continue;
            }
        };

        if target < i {
            let end = merged[i].end;
            merged[target].end = merged[target].end.max(end);
            merged.remove(i);
        } else {
            let start = merged[i].start;
            merged[target].start = merged[target].start.min(start);
            merged.remove(i);
        }
        // Re-examine the current index after the removal
    }

    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(start: f32, end: f32, speaker: i32) -> SpeakerSegment {
        SpeakerSegment {
            start,
            end,
            speaker,
        }
    }

    #[test]
    fn test_minor_speaker_fully_reassigned() {
        // Speaker 3 holds ~3% of the speech
        let segments = vec![
            seg(0.0, 14.0, 1),
            seg(14.0, 15.0, 3),
            seg(15.0, 30.0, 2),
        ];

        let result = consolidate_segments(segments);
        assert!(
            result.iter().all(|s| s.speaker != 3),
            "minor speaker must not survive: {:?}",
            result
        );
    }

    #[test]
    fn test_two_equal_speakers_both_survive() {
        let segments = vec![seg(0.0, 15.0, 1), seg(15.0, 30.0, 2)];
        let result = consolidate_segments(segments);
        let speakers: std::collections::HashSet<i32> =
            result.iter().map(|s| s.speaker).collect();
        assert_eq!(speakers.len(), 2);
    }

    #[test]
    fn test_short_segment_merges_into_same_speaker_neighbor() {
        let segments = vec![
            seg(0.0, 10.0, 1),
            seg(10.2, 10.8, 2),
            seg(11.0, 21.0, 2),
        ];
        let result = consolidate_segments(segments);

        // The 0.6 s fragment joins the long speaker-2 segment
        assert_eq!(result.len(), 2);
        let two = result.iter().find(|s| s.speaker == 2).unwrap();
        assert!(two.start <= 10.2);
    }

    #[test]
    fn test_empty_input() {
        assert!(consolidate_segments(vec![]).is_empty());
    }
}

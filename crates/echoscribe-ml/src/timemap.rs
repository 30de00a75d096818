//! Compressed-time ↔ real-time remapping
//!
//! Before ASR, a channel can be compressed to only its speech regions
//! (silence removed). ASR then reports timestamps in compressed time;
//! the piecewise-linear map induced by the region list restores real
//! positions. Round trip is the identity on region-interior timestamps;
//! out-of-range inputs clamp to the nearest region edge.

use echoscribe_types::{SpeechRegion, TranscriptSegment};

/// Piecewise-linear map induced by an ordered region list
#[derive(Debug, Clone)]
pub struct TimestampMap {
    regions: Vec<SpeechRegion>,
    /// Compressed-time offset of each region's start
    offsets: Vec<i64>,
}

impl TimestampMap {
    pub fn new(regions: &[SpeechRegion]) -> Self {
        let mut offsets = Vec::with_capacity(regions.len());
        let mut acc = 0i64;
        for region in regions {
            offsets.push(acc);
            acc += region.duration_ms();
        }
        Self {
            regions: regions.to_vec(),
            offsets,
        }
    }

    /// Total compressed duration in milliseconds
    pub fn compressed_duration_ms(&self) -> i64 {
        self.regions.iter().map(|r| r.duration_ms()).sum()
    }

    /// Map a compressed timestamp back to real time
    pub fn to_real(&self, compressed_ms: i64) -> i64 {
        if self.regions.is_empty() {
            return compressed_ms;
        }

        let compressed_ms = compressed_ms.max(0);

        for (region, &offset) in self.regions.iter().zip(&self.offsets) {
            if compressed_ms < offset + region.duration_ms() {
                return region.start_ms + (compressed_ms - offset).max(0);
            }
        }

        // Past the end: clamp to the last region's end
        self.regions.last().map(|r| r.end_ms).unwrap_or(compressed_ms)
    }

    /// Map a real timestamp into compressed time
    pub fn to_compressed(&self, real_ms: i64) -> i64 {
        if self.regions.is_empty() {
            return real_ms;
        }

        for (region, &offset) in self.regions.iter().zip(&self.offsets) {
            if real_ms < region.start_ms {
                // In a gap before this region: clamp to the region's start
                return offset;
            }
            if real_ms < region.end_ms {
                return offset + (real_ms - region.start_ms);
            }
        }

        self.compressed_duration_ms()
    }

    /// Remap all segment and word timestamps in place
    pub fn apply_to_segments(&self, segments: &mut [TranscriptSegment]) {
        for segment in segments {
            segment.start = self.to_real(segment.start);
            segment.end = self.to_real(segment.end);
            for word in &mut segment.words {
                word.start = self.to_real(word.start);
                word.end = self.to_real(word.end);
            }
        }
    }
}

/// Concatenate the speech regions of a buffer, returning the compressed
/// audio and the map to restore real timestamps.
pub fn compress_regions(
    samples: &[f32],
    regions: &[SpeechRegion],
    sample_rate: u32,
) -> (Vec<f32>, TimestampMap) {
    let mut compressed = Vec::new();

    for region in regions {
        let start = (region.start_ms * sample_rate as i64 / 1000) as usize;
        let end = (region.end_ms * sample_rate as i64 / 1000) as usize;
        let start = start.min(samples.len());
        let end = end.min(samples.len());
        compressed.extend_from_slice(&samples[start..end]);
    }

    (compressed, TimestampMap::new(regions))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn regions() -> Vec<SpeechRegion> {
        vec![
            SpeechRegion {
                start_ms: 1000,
                end_ms: 3000,
            },
            SpeechRegion {
                start_ms: 5000,
                end_ms: 5500,
            },
            SpeechRegion {
                start_ms: 9000,
                end_ms: 12_000,
            },
        ]
    }

    #[test]
    fn test_round_trip_is_identity_on_region_interior() {
        let map = TimestampMap::new(&regions());
        for &real in &[1000, 1500, 2999, 5000, 5250, 9000, 11_999] {
            let compressed = map.to_compressed(real);
            assert_eq!(map.to_real(compressed), real, "real={}", real);
        }
        for &compressed in &[0, 500, 1999, 2000, 2400, 2500, 5499] {
            let real = map.to_real(compressed);
            assert_eq!(map.to_compressed(real), compressed, "compressed={}", compressed);
        }
    }

    #[test]
    fn test_gap_timestamps_clamp_to_region_edges() {
        let map = TimestampMap::new(&regions());
        // 4000 ms sits in the gap between regions 0 and 1
        assert_eq!(map.to_compressed(4000), 2000);
        // Before the first region clamps to its start
        assert_eq!(map.to_compressed(200), 0);
        // Past the end clamps to total compressed duration
        assert_eq!(map.to_compressed(50_000), 5500);
    }

    #[test]
    fn test_to_real_clamps_out_of_range() {
        let map = TimestampMap::new(&regions());
        assert_eq!(map.to_real(-5), 1000);
        assert_eq!(map.to_real(99_999), 12_000);
    }

    #[test]
    fn test_compress_concatenates_regions() {
        let rate = 1000u32; // 1 sample per ms
        let samples: Vec<f32> = (0..13_000).map(|i| i as f32).collect();
        let (compressed, map) = compress_regions(&samples, &regions(), rate);

        assert_eq!(compressed.len(), 5500);
        assert_eq!(compressed[0], 1000.0);
        assert_eq!(compressed[2000], 5000.0);
        assert_eq!(map.compressed_duration_ms(), 5500);
    }

    #[test]
    fn test_apply_to_segments_remaps_words() {
        let map = TimestampMap::new(&regions());
        let mut segments = vec![TranscriptSegment {
            start: 0,
            end: 2100,
            text: "hello there".to_string(),
            speaker: None,
            words: vec![
                echoscribe_types::TranscriptWord {
                    start: 0,
                    end: 500,
                    text: "hello".to_string(),
                    confidence: 0.9,
                    speaker: None,
                },
                echoscribe_types::TranscriptWord {
                    start: 2000,
                    end: 2100,
                    text: "there".to_string(),
                    confidence: 0.9,
                    speaker: None,
                },
            ],
            confidence: 0.9,
        }];

        map.apply_to_segments(&mut segments);
        assert_eq!(segments[0].start, 1000);
        assert_eq!(segments[0].words[0].start, 1000);
        // 2000 compressed = start of region 1 (5000 real)
        assert_eq!(segments[0].words[1].start, 5000);
    }
}

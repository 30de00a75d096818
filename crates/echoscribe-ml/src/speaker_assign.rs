//! Applying diarization output to transcript segments
//!
//! With word timestamps, segments are split at speaker-boundary
//! crossings; a change detected mid-sentence is deferred until the first
//! word that ends a sentence (`.`, `!`, `?`, `…`). Without word
//! timestamps, each segment gets the speaker with the largest time
//! overlap, nearest midpoint as the tie-break.

use echoscribe_types::{SpeakerSegment, TranscriptSegment, TranscriptWord};

/// Sentence-ending check for the deferral rule (ASCII plus the ellipsis;
/// locale-specific punctuation is out of scope)
fn ends_sentence(text: &str) -> bool {
    text.trim_end()
        .chars()
        .next_back()
        .map(|c| matches!(c, '.' | '!' | '?' | '…'))
        .unwrap_or(false)
}

/// The diarized speaker id at the given moment, if any
fn speaker_at(speaker_segments: &[SpeakerSegment], at_ms: i64) -> Option<i32> {
    let at_sec = at_ms as f32 / 1000.0;

    for seg in speaker_segments {
        if seg.start <= at_sec && at_sec <= seg.end {
            return Some(seg.speaker);
        }
    }

    // Between diarized segments: nearest by midpoint
    speaker_segments
        .iter()
        .min_by(|a, b| {
            let da = ((a.start + a.end) / 2.0 - at_sec).abs();
            let db = ((b.start + b.end) / 2.0 - at_sec).abs();
            da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|s| s.speaker)
}

/// Speaker with the maximum overlap against `[start_ms, end_ms]`;
/// smallest midpoint distance breaks ties.
fn speaker_by_overlap(
    speaker_segments: &[SpeakerSegment],
    start_ms: i64,
    end_ms: i64,
) -> Option<i32> {
    let start_sec = start_ms as f32 / 1000.0;
    let end_sec = end_ms as f32 / 1000.0;
    let mid_sec = (start_sec + end_sec) / 2.0;

    let mut best: Option<(f32, f32, i32)> = None; // (overlap, mid_distance, speaker)

    for seg in speaker_segments {
        let overlap = (seg.end.min(end_sec) - seg.start.max(start_sec)).max(0.0);
        let distance = ((seg.start + seg.end) / 2.0 - mid_sec).abs();

        let candidate = (overlap, distance, seg.speaker);
        best = match best {
            None => Some(candidate),
            Some(current) => {
                let (cur_overlap, cur_distance, _) = current;
                if overlap > cur_overlap
                    || (overlap == cur_overlap && distance < cur_distance)
                {
                    Some(candidate)
                } else {
                    Some(current)
                }
            }
        };
    }

    best.map(|(_, _, speaker)| speaker)
}

/// Apply speaker labels to transcript segments.
///
/// `label` renders a diarized (already remapped) speaker id into the
/// user-visible name.
pub fn apply_speakers(
    segments: Vec<TranscriptSegment>,
    speaker_segments: &[SpeakerSegment],
    label: impl Fn(i32) -> String,
) -> Vec<TranscriptSegment> {
    if speaker_segments.is_empty() {
        return segments;
    }

    let has_words = segments.iter().any(|s| !s.words.is_empty());
    if has_words {
        apply_word_level(segments, speaker_segments, label)
    } else {
        apply_segment_level(segments, speaker_segments, label)
    }
}

fn apply_segment_level(
    mut segments: Vec<TranscriptSegment>,
    speaker_segments: &[SpeakerSegment],
    label: impl Fn(i32) -> String,
) -> Vec<TranscriptSegment> {
    for segment in &mut segments {
        if let Some(speaker) = speaker_by_overlap(speaker_segments, segment.start, segment.end) {
            segment.speaker = Some(label(speaker));
        }
    }
    segments
}

fn apply_word_level(
    segments: Vec<TranscriptSegment>,
    speaker_segments: &[SpeakerSegment],
    label: impl Fn(i32) -> String,
) -> Vec<TranscriptSegment> {
    let mut result = Vec::with_capacity(segments.len());

    for segment in segments {
        if segment.words.is_empty() {
            // No words to split on; whole-segment assignment
            let mut seg = segment;
            if let Some(speaker) = speaker_by_overlap(speaker_segments, seg.start, seg.end) {
                seg.speaker = Some(label(speaker));
            }
            result.push(seg);
            continue;
        }

        // Per-word raw assignment with the mid-sentence deferral
        let mut words = segment.words.clone();
        let mut current: Option<i32> = None;
        let mut pending: Option<i32> = None;

        for i in 0..words.len() {
            let mid = (words[i].start + words[i].end) / 2;
            let raw = speaker_at(speaker_segments, mid);

            match (raw, current) {
                (Some(r), None) => current = Some(r),
                (Some(r), Some(c)) if r != c => {
                    let prev_ends_sentence = i > 0 && ends_sentence(&words[i - 1].text);
                    if prev_ends_sentence {
                        current = Some(r);
                        pending = None;
                    } else {
                        pending = Some(r);
                    }
                }
                (Some(r), Some(c)) if r == c => pending = None,
                _ => {}
            }

            words[i].speaker = current.map(&label);

            if ends_sentence(&words[i].text) {
                if let Some(p) = pending.take() {
                    current = Some(p);
                }
            }
        }

        // Split at the speaker boundaries that survived deferral
        let mut run: Vec<TranscriptWord> = Vec::new();
        let mut run_speaker: Option<String> = None;

        let mut flush = |run: &mut Vec<TranscriptWord>,
                         speaker: &Option<String>,
                         out: &mut Vec<TranscriptSegment>| {
            if run.is_empty() {
                return;
            }
            let text = run
                .iter()
                .map(|w| w.text.as_str())
                .collect::<Vec<_>>()
                .join(" ");
            out.push(TranscriptSegment {
                start: run.first().map(|w| w.start).unwrap_or(0),
                end: run.last().map(|w| w.end).unwrap_or(0),
                text,
                speaker: speaker.clone(),
                words: std::mem::take(run),
                confidence: segment.confidence,
            });
        };

        for word in words {
            if word.speaker != run_speaker && !run.is_empty() {
                flush(&mut run, &run_speaker, &mut result);
            }
            run_speaker = word.speaker.clone();
            run.push(word);
        }
        flush(&mut run, &run_speaker, &mut result);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sseg(start: f32, end: f32, speaker: i32) -> SpeakerSegment {
        SpeakerSegment {
            start,
            end,
            speaker,
        }
    }

    fn word(start: i64, end: i64, text: &str) -> TranscriptWord {
        TranscriptWord {
            start,
            end,
            text: text.to_string(),
            confidence: 0.9,
            speaker: None,
        }
    }

    fn seg(start: i64, end: i64, text: &str, words: Vec<TranscriptWord>) -> TranscriptSegment {
        TranscriptSegment {
            start,
            end,
            text: text.to_string(),
            speaker: None,
            words,
            confidence: 0.9,
        }
    }

    fn plain_label(id: i32) -> String {
        format!("Interlocutor {}", id)
    }

    #[test]
    fn test_segment_level_max_overlap() {
        let speakers = vec![sseg(0.0, 2.0, 1), sseg(2.0, 10.0, 2)];
        let segments = vec![seg(1000, 6000, "mostly second", vec![])];

        let result = apply_speakers(segments, &speakers, plain_label);
        assert_eq!(result[0].speaker.as_deref(), Some("Interlocutor 2"));
    }

    #[test]
    fn test_segment_level_tie_breaks_by_midpoint() {
        // Equal 1 s overlaps; speaker 2's midpoint is closer
        let speakers = vec![sseg(0.0, 3.0, 1), sseg(3.0, 4.0, 2)];
        let segments = vec![seg(2000, 4000, "tied", vec![])];

        let result = apply_speakers(segments, &speakers, plain_label);
        assert_eq!(result[0].speaker.as_deref(), Some("Interlocutor 2"));
    }

    #[test]
    fn test_word_level_splits_at_boundary() {
        let speakers = vec![sseg(0.0, 2.0, 1), sseg(2.0, 4.0, 2)];
        let segments = vec![seg(
            0,
            4000,
            "first part. second part",
            vec![
                word(0, 900, "first"),
                word(900, 1800, "part."),
                word(2100, 3000, "second"),
                word(3000, 3900, "part"),
            ],
        )];

        let result = apply_speakers(segments, &speakers, plain_label);
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].speaker.as_deref(), Some("Interlocutor 1"));
        assert_eq!(result[0].text, "first part.");
        assert_eq!(result[1].speaker.as_deref(), Some("Interlocutor 2"));
        assert_eq!(result[1].text, "second part");
    }

    #[test]
    fn test_mid_sentence_change_defers_to_sentence_end() {
        // Diarization flips to speaker 2 at 1.5 s, but the sentence only
        // ends at "boundary." (2.7 s); the change waits for it.
        let speakers = vec![sseg(0.0, 1.5, 1), sseg(1.5, 5.0, 2)];
        let segments = vec![seg(
            0,
            5000,
            "so i think that boundary. next phrase",
            vec![
                word(0, 500, "so"),
                word(500, 1000, "i"),
                word(1000, 1400, "think"),
                word(1600, 2100, "that"),
                word(2100, 2700, "boundary."),
                word(3000, 3600, "next"),
                word(3600, 4200, "phrase"),
            ],
        )];

        let result = apply_speakers(segments, &speakers, plain_label);
        assert_eq!(result.len(), 2);
        // Everything through the sentence end stays with speaker 1
        assert_eq!(result[0].speaker.as_deref(), Some("Interlocutor 1"));
        assert_eq!(result[0].text, "so i think that boundary.");
        assert_eq!(result[1].speaker.as_deref(), Some("Interlocutor 2"));
        assert_eq!(result[1].text, "next phrase");
    }

    #[test]
    fn test_no_speakers_leaves_segments_untouched() {
        let segments = vec![seg(0, 1000, "text", vec![])];
        let result = apply_speakers(segments.clone(), &[], plain_label);
        assert_eq!(result[0].speaker, None);
    }

    #[test]
    fn test_ends_sentence() {
        assert!(ends_sentence("done."));
        assert!(ends_sentence("really?"));
        assert!(ends_sentence("wait…"));
        assert!(!ends_sentence("that"));
        assert!(!ends_sentence("comma,"));
    }
}

//! Dialogue assembly
//!
//! Interleaves the per-channel transcripts into one speaker-labeled,
//! time-ordered dialogue. The mic side is always "You"; sys side carries
//! the diarized interlocutor labels.
//!
//! Word-level merge when both sides have word timestamps (union of
//! words, phrase break on speaker change or > 0.5 s gap), segment-level
//! otherwise. Broken ASR timestamps are repaired before merging.

use echoscribe_types::{TranscriptSegment, TranscriptWord, MIC_SPEAKER};

/// A word implied to last longer than this has broken timestamps
const MAX_WORD_DURATION_MS: i64 = 2000;
/// Synthetic duration assigned when repairing a broken word
const REPAIR_WORD_DURATION_MS: i64 = 500;
/// Gap between words that splits an oversized segment
const WORD_GAP_SPLIT_MS: i64 = 2000;
/// Gap between same-speaker words that breaks a phrase
const PHRASE_GAP_MS: i64 = 500;
/// Consecutive same-speaker phrases closer than this merge
const PHRASE_MERGE_GAP_MS: i64 = 200;
/// Overlap below this between different speakers is a timestamp error
const OVERLAP_TOLERANCE_MS: i64 = 500;

/// Default sys-side label when diarization assigned nothing
const DEFAULT_SYS_SPEAKER: &str = "Interlocutor 1";

/// Merge mic and sys transcripts into one dialogue.
///
/// Output phrases are sorted by start, non-overlapping modulo the
/// same-speaker merge, and every phrase carries a speaker label.
pub fn merge_dialogue(
    mic_segments: Vec<TranscriptSegment>,
    sys_segments: Vec<TranscriptSegment>,
) -> Vec<TranscriptSegment> {
    if mic_segments.is_empty() && sys_segments.is_empty() {
        return Vec::new();
    }

    let mic_segments = label_side(fix_anomalous_timestamps(mic_segments), MIC_SPEAKER);
    let sys_segments = label_side(fix_anomalous_timestamps(sys_segments), DEFAULT_SYS_SPEAKER);

    let mic_has_words = side_has_words(&mic_segments);
    let sys_has_words = side_has_words(&sys_segments);

    let merged = if mic_has_words && sys_has_words {
        merge_word_level(mic_segments, sys_segments)
    } else {
        merge_segment_level(mic_segments, sys_segments)
    };

    post_process(merged)
}

/// A side counts as word-timestamped when it is empty or its segments
/// carry words.
fn side_has_words(segments: &[TranscriptSegment]) -> bool {
    segments.is_empty() || segments.iter().any(|s| !s.words.is_empty())
}

/// Fill in the channel's default speaker where nothing was assigned
fn label_side(mut segments: Vec<TranscriptSegment>, default: &str) -> Vec<TranscriptSegment> {
    for seg in &mut segments {
        if seg.speaker.as_deref().map(|s| s.is_empty()).unwrap_or(true) {
            seg.speaker = Some(default.to_string());
        }
        for word in &mut seg.words {
            if word.speaker.as_deref().map(|s| s.is_empty()).unwrap_or(true) {
                word.speaker = seg.speaker.clone();
            }
        }
    }
    segments
}

/// Clamp words with absurd implied durations.
///
/// Some engines stretch a word across a long silence. A word longer
/// than 2 s whose successor starts later gets a 500 ms synthetic
/// duration (bounded by that successor).
fn fix_anomalous_timestamps(mut segments: Vec<TranscriptSegment>) -> Vec<TranscriptSegment> {
    for segment in &mut segments {
        let words_len = segment.words.len();
        for j in 0..words_len {
            let duration = segment.words[j].end - segment.words[j].start;

            if duration > MAX_WORD_DURATION_MS {
                let mut new_end = segment.words[j].start + REPAIR_WORD_DURATION_MS;
                if j + 1 < words_len {
                    let next_start = segment.words[j + 1].start;
                    if next_start < new_end {
                        new_end = next_start;
                    }
                }
                tracing::trace!(
                    "timestamp repair: word '{}' {}ms -> {}ms",
                    segment.words[j].text,
                    duration,
                    new_end - segment.words[j].start
                );
                segment.words[j].end = new_end;
            }
        }

        // Segment boundaries follow the repaired words
        if !segment.words.is_empty() {
            segment.start = segment.words[0].start;
            segment.end = segment.words.last().map(|w| w.end).unwrap_or(segment.end);
        }
    }

    segments
}

/// Word-level merge: union of words ordered by start, greedy coalescing
/// of same-speaker runs, break on speaker change or a > 0.5 s gap.
fn merge_word_level(
    mic_segments: Vec<TranscriptSegment>,
    sys_segments: Vec<TranscriptSegment>,
) -> Vec<TranscriptSegment> {
    let mut words: Vec<TranscriptWord> = Vec::new();
    let mut confidence = 1.0f32;

    for seg in mic_segments.iter().chain(sys_segments.iter()) {
        confidence = confidence.min(seg.confidence);
        words.extend(seg.words.iter().cloned());
    }

    // Mic first on exact ties: the initiator reads more naturally
    words.sort_by(|a, b| {
        a.start.cmp(&b.start).then_with(|| {
            let a_mic = a.speaker.as_deref() == Some(MIC_SPEAKER);
            let b_mic = b.speaker.as_deref() == Some(MIC_SPEAKER);
            b_mic.cmp(&a_mic)
        })
    });

    let mut phrases: Vec<TranscriptSegment> = Vec::new();
    let mut run: Vec<TranscriptWord> = Vec::new();

    for word in words {
        let break_phrase = match run.last() {
            Some(prev) => {
                prev.speaker != word.speaker || word.start - prev.end > PHRASE_GAP_MS
            }
            None => false,
        };

        if break_phrase {
            phrases.push(phrase_from_words(std::mem::take(&mut run), confidence));
        }
        run.push(word);
    }
    if !run.is_empty() {
        phrases.push(phrase_from_words(run, confidence));
    }

    phrases
}

fn phrase_from_words(words: Vec<TranscriptWord>, confidence: f32) -> TranscriptSegment {
    let text = words
        .iter()
        .map(|w| w.text.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    TranscriptSegment {
        start: words.first().map(|w| w.start).unwrap_or(0),
        end: words.last().map(|w| w.end).unwrap_or(0),
        text,
        speaker: words.first().and_then(|w| w.speaker.clone()),
        words,
        confidence,
    }
}

/// Segment-level merge: sort and emit, after splitting any segment whose
/// internal word gaps exceed 2 s (engines that span a long silence with
/// one segment), trimming small cross-speaker overlaps.
fn merge_segment_level(
    mic_segments: Vec<TranscriptSegment>,
    sys_segments: Vec<TranscriptSegment>,
) -> Vec<TranscriptSegment> {
    let mut all: Vec<(bool, TranscriptSegment)> = Vec::new();
    for seg in split_by_word_gaps(mic_segments) {
        all.push((true, seg));
    }
    for seg in split_by_word_gaps(sys_segments) {
        all.push((false, seg));
    }

    all.sort_by(|a, b| {
        a.1.start
            .cmp(&b.1.start)
            .then_with(|| b.0.cmp(&a.0)) // mic first on ties
    });

    let mut result: Vec<TranscriptSegment> = Vec::new();

    for (_, seg) in all {
        if let Some(prev) = result.last_mut() {
            let overlap = prev.end - seg.start;
            let same_speaker = prev.speaker == seg.speaker;

            if !same_speaker && overlap > 0 && overlap < OVERLAP_TOLERANCE_MS {
                // Small overlap is a timestamp error; a large one is a
                // real interruption and stays
                prev.end = seg.start;
            }
        }
        result.push(seg);
    }

    result
}

/// Split segments into phrases wherever adjacent words are more than
/// 2 s apart
fn split_by_word_gaps(segments: Vec<TranscriptSegment>) -> Vec<TranscriptSegment> {
    let mut result = Vec::new();

    for seg in segments {
        if seg.words.len() < 2 {
            result.push(seg);
            continue;
        }

        let mut current: Vec<TranscriptWord> = Vec::new();

        for word in &seg.words {
            if let Some(prev) = current.last() {
                if word.start - prev.end > WORD_GAP_SPLIT_MS {
                    let mut phrase =
                        phrase_from_words(std::mem::take(&mut current), seg.confidence);
                    phrase.speaker = seg.speaker.clone();
                    result.push(phrase);
                }
            }
            current.push(word.clone());
        }

        if !current.is_empty() {
            let mut phrase = phrase_from_words(current, seg.confidence);
            phrase.speaker = seg.speaker.clone();
            result.push(phrase);
        }
    }

    result
}

/// Merge consecutive same-speaker phrases separated by at most 200 ms
fn post_process(phrases: Vec<TranscriptSegment>) -> Vec<TranscriptSegment> {
    let mut result: Vec<TranscriptSegment> = Vec::new();

    for phrase in phrases {
        if let Some(prev) = result.last_mut() {
            let same_speaker = prev.speaker == phrase.speaker;
            let gap = phrase.start - prev.end;

            if same_speaker && gap <= PHRASE_MERGE_GAP_MS {
                prev.end = phrase.end.max(prev.end);
                prev.text = format!("{} {}", prev.text, phrase.text);
                prev.words.extend(phrase.words);
                continue;
            }
        }
        result.push(phrase);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(start: i64, end: i64, text: &str) -> TranscriptWord {
        TranscriptWord {
            start,
            end,
            text: text.to_string(),
            confidence: 1.0,
            speaker: None,
        }
    }

    fn segment(
        start: i64,
        end: i64,
        text: &str,
        speaker: Option<&str>,
        words: Vec<TranscriptWord>,
    ) -> TranscriptSegment {
        TranscriptSegment {
            start,
            end,
            text: text.to_string(),
            speaker: speaker.map(|s| s.to_string()),
            words,
            confidence: 1.0,
        }
    }

    #[test]
    fn test_speaker_change_with_short_gap() {
        // Mic says "So I think that", sys answers 100 ms later.
        let mic = vec![segment(
            0,
            1900,
            "So I think that",
            None,
            vec![
                word(0, 400, "So"),
                word(400, 700, "I"),
                word(700, 1300, "think"),
                word(1300, 1900, "that"),
            ],
        )];
        let sys = vec![segment(
            2000,
            3800,
            "no, we should wait.",
            Some("Interlocutor 1"),
            vec![
                word(2000, 2400, "no,"),
                word(2400, 2800, "we"),
                word(2800, 3200, "should"),
                word(3200, 3800, "wait."),
            ],
        )];

        let dialogue = merge_dialogue(mic, sys);

        assert_eq!(dialogue.len(), 2);
        assert_eq!(dialogue[0].speaker.as_deref(), Some("You"));
        assert_eq!(dialogue[0].text, "So I think that");
        assert_eq!(dialogue[1].speaker.as_deref(), Some("Interlocutor 1"));
        assert_eq!(dialogue[1].text, "no, we should wait.");
    }

    #[test]
    fn test_phrases_sorted_and_labeled() {
        let mic = vec![segment(
            5000,
            6000,
            "reply",
            None,
            vec![word(5000, 6000, "reply")],
        )];
        let sys = vec![segment(
            0,
            1000,
            "question",
            Some("Interlocutor 1"),
            vec![word(0, 1000, "question")],
        )];

        let dialogue = merge_dialogue(mic, sys);

        assert_eq!(dialogue.len(), 2);
        assert!(dialogue[0].start <= dialogue[1].start);
        assert!(dialogue.iter().all(|p| p
            .speaker
            .as_deref()
            .map(|s| !s.is_empty())
            .unwrap_or(false)));
    }

    #[test]
    fn test_same_speaker_gap_breaks_phrase() {
        // 3 s of silence inside one channel splits the phrase
        let mic = vec![segment(
            0,
            5000,
            "before after",
            None,
            vec![word(0, 800, "before"), word(4200, 5000, "after")],
        )];

        let dialogue = merge_dialogue(mic, vec![]);
        assert_eq!(dialogue.len(), 2);
        assert_eq!(dialogue[0].text, "before");
        assert_eq!(dialogue[1].text, "after");
    }

    #[test]
    fn test_close_same_speaker_phrases_merge() {
        let mic = vec![
            segment(0, 1000, "hello", None, vec![word(0, 1000, "hello")]),
            segment(1100, 2000, "again", None, vec![word(1100, 2000, "again")]),
        ];

        let dialogue = merge_dialogue(mic, vec![]);
        // 100 ms gap, same speaker: one phrase
        assert_eq!(dialogue.len(), 1);
        assert_eq!(dialogue[0].text, "hello again");
    }

    #[test]
    fn test_anomalous_word_duration_repaired() {
        let mic = vec![segment(
            0,
            8000,
            "stretched word",
            None,
            vec![word(0, 6000, "stretched"), word(7000, 8000, "word")],
        )];

        let dialogue = merge_dialogue(mic, vec![]);
        let first = &dialogue[0].words[0];
        assert_eq!(first.end - first.start, 500);
    }

    #[test]
    fn test_segment_level_splits_oversized_segment() {
        // Sys side has no word timestamps, mic has an oversized segment
        // spanning a 4 s silence: segment-level path with gap splitting.
        let mic = vec![segment(
            0,
            10_000,
            "first second",
            None,
            vec![word(0, 1000, "first"), word(5000, 6000, "second")],
        )];
        let sys = vec![segment(7000, 8000, "done", Some("Interlocutor 1"), vec![])];

        let dialogue = merge_dialogue(mic, sys);
        assert_eq!(dialogue.len(), 3);
        assert_eq!(dialogue[0].text, "first");
        assert_eq!(dialogue[1].text, "second");
    }

    #[test]
    fn test_small_cross_speaker_overlap_trimmed() {
        let mic = vec![segment(0, 2100, "talking here", None, vec![])];
        let sys = vec![segment(2000, 3000, "reply", Some("Interlocutor 1"), vec![])];

        let dialogue = merge_dialogue(mic, sys);
        assert_eq!(dialogue.len(), 2);
        assert!(dialogue[0].end <= dialogue[1].start);
    }

    #[test]
    fn test_empty_input() {
        assert!(merge_dialogue(vec![], vec![]).is_empty());
    }
}

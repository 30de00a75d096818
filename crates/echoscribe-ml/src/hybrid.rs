//! Hybrid transcription over two engines
//!
//! Wraps a primary and an optional secondary engine. Three modes:
//! - primary-only: delegate
//! - low-confidence retry: re-transcribe the audio around words the
//!   primary was unsure about, adopt the secondary's rendering when its
//!   mean confidence is higher
//! - full-compare: run both engines over the whole buffer and let an LLM
//!   arbiter pick the better rendering, with safety rails against
//!   arbiter hallucination
//!
//! The primary/secondary distinction is fixed per session. Both engines
//! receive the same hotwords; a fuzzy hotword correction pass runs over
//! the merged output.

use crate::arbiter::TranscriptArbiter;
use crate::engine_manager::SharedEngine;
use anyhow::Result;
use echoscribe_types::{TranscriptSegment, TranscriptWord, ASR_SAMPLE_RATE};
use std::collections::HashMap;
use std::sync::Arc;

/// Hybrid mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HybridMode {
    /// Hybrid disabled: just call the primary
    #[default]
    PrimaryOnly,
    /// Re-transcribe low-confidence word spans with the secondary
    LowConfidence,
    /// Run both engines and arbitrate between full renderings
    FullCompare,
}

impl HybridMode {
    pub fn from_str(s: &str) -> Self {
        match s {
            "low_confidence" => HybridMode::LowConfidence,
            "full_compare" => HybridMode::FullCompare,
            _ => HybridMode::PrimaryOnly,
        }
    }
}

/// Hybrid configuration
#[derive(Debug, Clone)]
pub struct HybridConfig {
    pub mode: HybridMode,
    /// Words below this confidence trigger a retry
    pub confidence_threshold: f32,
    /// Surrounding words included in a retry span
    pub context_words: usize,
    /// Hotwords handed to both engines and to the correction pass
    pub hotwords: Vec<String>,
}

impl Default for HybridConfig {
    fn default() -> Self {
        Self {
            mode: HybridMode::PrimaryOnly,
            confidence_threshold: 0.7,
            context_words: 3,
            hotwords: Vec::new(),
        }
    }
}

/// Hybrid transcription outcome
#[derive(Debug, Clone)]
pub struct HybridResult {
    pub segments: Vec<TranscriptSegment>,
    /// Words that fell below the confidence threshold
    pub low_confidence_count: usize,
    /// Spans re-rendered by the secondary or the arbiter
    pub retranscribed_count: usize,
}

impl HybridResult {
    fn passthrough(segments: Vec<TranscriptSegment>) -> Self {
        Self {
            segments,
            low_confidence_count: 0,
            retranscribed_count: 0,
        }
    }
}

/// Dual-engine transcriber
pub struct HybridTranscriber {
    primary: SharedEngine,
    secondary: Option<SharedEngine>,
    arbiter: Option<Arc<dyn TranscriptArbiter>>,
    config: HybridConfig,
}

impl HybridTranscriber {
    pub fn new(
        primary: SharedEngine,
        secondary: Option<SharedEngine>,
        arbiter: Option<Arc<dyn TranscriptArbiter>>,
        config: HybridConfig,
    ) -> Self {
        Self {
            primary,
            secondary,
            arbiter,
            config,
        }
    }

    pub fn mode(&self) -> HybridMode {
        self.config.mode
    }

    /// Synchronous transcription; `FullCompare` needs the async variant
    /// for the arbiter and degrades to primary-only here.
    pub fn transcribe(&self, samples: &[f32]) -> Result<HybridResult> {
        match self.config.mode {
            HybridMode::PrimaryOnly | HybridMode::FullCompare => {
                let segments = self.primary.lock().transcribe_with_segments(samples)?;
                Ok(HybridResult::passthrough(self.apply_hotwords(segments)))
            }
            HybridMode::LowConfidence => self.transcribe_low_confidence(samples),
        }
    }

    /// Full transcription including arbiter-backed full-compare
    pub async fn transcribe_async(&self, samples: &[f32]) -> Result<HybridResult> {
        match self.config.mode {
            HybridMode::PrimaryOnly => {
                let segments = self.primary.lock().transcribe_with_segments(samples)?;
                Ok(HybridResult::passthrough(self.apply_hotwords(segments)))
            }
            HybridMode::LowConfidence => self.transcribe_low_confidence(samples),
            HybridMode::FullCompare => self.transcribe_full_compare(samples).await,
        }
    }

    /// Re-transcribe the spans around low-confidence words
    fn transcribe_low_confidence(&self, samples: &[f32]) -> Result<HybridResult> {
        let segments = self.primary.lock().transcribe_with_segments(samples)?;

        let secondary = match &self.secondary {
            Some(engine) => engine,
            None => return Ok(HybridResult::passthrough(self.apply_hotwords(segments))),
        };

        let mut low_confidence_count = 0;
        let mut retranscribed_count = 0;
        let mut out_segments = Vec::with_capacity(segments.len());

        for mut segment in segments {
            if segment.words.is_empty() {
                out_segments.push(segment);
                continue;
            }

            let spans = self.low_confidence_spans(&segment.words, &mut low_confidence_count);

            // Process right-to-left so earlier indices stay valid
            for (span_start, span_end) in spans.into_iter().rev() {
                let span_words = &segment.words[span_start..=span_end];
                let t0 = span_words.first().map(|w| w.start).unwrap_or(0);
                let t1 = span_words.last().map(|w| w.end).unwrap_or(0);
                if t1 <= t0 {
                    continue;
                }

                let s0 = (t0 * ASR_SAMPLE_RATE as i64 / 1000) as usize;
                let s1 = ((t1 * ASR_SAMPLE_RATE as i64 / 1000) as usize).min(samples.len());
                if s0 >= s1 {
                    continue;
                }

                let retry = match secondary.lock().transcribe_with_segments(&samples[s0..s1]) {
                    Ok(segs) => segs,
                    Err(e) => {
                        tracing::warn!("Secondary retry failed: {}", e);
                        continue;
                    }
                };

                let mut retry_words: Vec<TranscriptWord> =
                    retry.into_iter().flat_map(|s| s.words).collect();
                if retry_words.is_empty() {
                    continue;
                }

                // Adopt the secondary words iff their mean confidence is
                // higher than the primary span's.
                let primary_mean = mean_confidence(span_words);
                let retry_mean = mean_confidence(&retry_words);
                if retry_mean <= primary_mean {
                    continue;
                }

                // Slice timestamps are relative to the span start
                for word in &mut retry_words {
                    word.start += t0;
                    word.end += t0;
                    word.speaker = span_words.first().and_then(|w| w.speaker.clone());
                }

                tracing::debug!(
                    "Hybrid retry: '{}' -> '{}' ({:.2} -> {:.2})",
                    join_words_text(span_words),
                    join_words_text(&retry_words),
                    primary_mean,
                    retry_mean
                );

                segment.words.splice(span_start..=span_end, retry_words);
                retranscribed_count += 1;
            }

            segment.text = join_words_text(&segment.words);
            out_segments.push(segment);
        }

        Ok(HybridResult {
            segments: self.apply_hotwords(out_segments),
            low_confidence_count,
            retranscribed_count,
        })
    }

    /// Merge each low-confidence word with its ±context_words surroundings
    /// into disjoint index spans.
    fn low_confidence_spans(
        &self,
        words: &[TranscriptWord],
        low_confidence_count: &mut usize,
    ) -> Vec<(usize, usize)> {
        let ctx = self.config.context_words;
        let mut spans: Vec<(usize, usize)> = Vec::new();

        for (i, word) in words.iter().enumerate() {
            if word.confidence >= self.config.confidence_threshold {
                continue;
            }
            *low_confidence_count += 1;

            let start = i.saturating_sub(ctx);
            let end = (i + ctx).min(words.len() - 1);

            match spans.last_mut() {
                Some(last) if start <= last.1 + 1 => last.1 = end,
                _ => spans.push((start, end)),
            }
        }

        spans
    }

    /// Run both engines over the whole buffer and arbitrate
    async fn transcribe_full_compare(&self, samples: &[f32]) -> Result<HybridResult> {
        let primary_segments = self.primary.lock().transcribe_with_segments(samples)?;

        let secondary = match &self.secondary {
            Some(engine) => engine,
            None => {
                return Ok(HybridResult::passthrough(
                    self.apply_hotwords(primary_segments),
                ))
            }
        };

        let secondary_segments = match secondary.lock().transcribe_with_segments(samples) {
            Ok(segs) => segs,
            Err(e) => {
                tracing::warn!("Secondary failed ({}), using primary", e);
                return Ok(HybridResult::passthrough(
                    self.apply_hotwords(primary_segments),
                ));
            }
        };

        let primary_text = segments_to_full_text(&primary_segments);
        let secondary_text = segments_to_full_text(&secondary_segments);

        if secondary_segments.is_empty() || primary_text == secondary_text {
            return Ok(HybridResult::passthrough(
                self.apply_hotwords(primary_segments),
            ));
        }

        let arbiter = match &self.arbiter {
            Some(a) => a,
            // No arbiter configured: silently primary-only
            None => {
                return Ok(HybridResult::passthrough(
                    self.apply_hotwords(primary_segments),
                ))
            }
        };

        let selected = match arbiter
            .select_best(&primary_text, &secondary_text, "")
            .await
        {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!("Arbiter failed ({}), using primary", e);
                return Ok(HybridResult::passthrough(
                    self.apply_hotwords(primary_segments),
                ));
            }
        };

        // Safety rails: a suspiciously short or unrelated answer is
        // discarded in favor of the primary.
        if selected.trim().len() < primary_text.len() / 3 {
            tracing::warn!("Arbiter output too short, keeping primary");
            return Ok(HybridResult::passthrough(
                self.apply_hotwords(primary_segments),
            ));
        }
        let sim_primary = text_similarity_jaccard(&selected, &primary_text);
        let sim_secondary = text_similarity_jaccard(&selected, &secondary_text);
        if sim_primary < 0.30 && sim_secondary < 0.30 {
            tracing::warn!(
                "Arbiter output dissimilar to both candidates ({:.2}/{:.2}), keeping primary",
                sim_primary,
                sim_secondary
            );
            return Ok(HybridResult::passthrough(
                self.apply_hotwords(primary_segments),
            ));
        }

        let mut segments = if sim_secondary > sim_primary {
            // The arbiter sided with the secondary: keep its timing but
            // restore speaker labels from the primary's aligned segments.
            let mut segs = secondary_segments;
            reattach_speakers(&mut segs, &primary_segments);
            if segs.len() == 1 {
                segs[0].text = selected;
            }
            segs
        } else {
            let mut segs = primary_segments;
            if segs.len() == 1 && selected != segs[0].text {
                segs[0].text = selected;
            }
            segs
        };

        segments = self.apply_hotwords(segments);

        Ok(HybridResult {
            segments,
            low_confidence_count: 0,
            retranscribed_count: 1,
        })
    }

    /// Fuzzy hotword correction over the merged output
    fn apply_hotwords(&self, segments: Vec<TranscriptSegment>) -> Vec<TranscriptSegment> {
        if self.config.hotwords.is_empty() {
            return segments;
        }

        let mut replacements: HashMap<String, String> = HashMap::new();
        for seg in &segments {
            for word in &seg.words {
                let (matches, hotword) = matches_hotword(&word.text, &self.config.hotwords);
                if matches {
                    let word_lower = word.text.to_lowercase();
                    if word_lower != hotword.to_lowercase() {
                        replacements.insert(word_lower, hotword);
                    }
                }
            }
        }

        if replacements.is_empty() {
            return segments;
        }

        segments
            .into_iter()
            .map(|mut seg| {
                let mut text = seg.text.clone();
                for (from, to) in &replacements {
                    text = replace_word_ignore_case(&text, from, to);
                }
                seg.text = text;

                for word in &mut seg.words {
                    if let Some(replacement) = replacements.get(&word.text.to_lowercase()) {
                        word.text = replacement.clone();
                    }
                }
                seg
            })
            .collect()
    }
}

/// Copy speaker labels onto `segments` from the best time-overlapping
/// donor segment.
fn reattach_speakers(segments: &mut [TranscriptSegment], donors: &[TranscriptSegment]) {
    for seg in segments.iter_mut() {
        let mut best_overlap = 0i64;
        let mut best_speaker = None;

        for donor in donors {
            let overlap = seg.end.min(donor.end) - seg.start.max(donor.start);
            if overlap > best_overlap && donor.speaker.is_some() {
                best_overlap = overlap;
                best_speaker = donor.speaker.clone();
            }
        }

        if best_speaker.is_some() {
            seg.speaker = best_speaker;
        }
    }
}

fn mean_confidence(words: &[TranscriptWord]) -> f32 {
    if words.is_empty() {
        return 0.0;
    }
    words.iter().map(|w| w.confidence).sum::<f32>() / words.len() as f32
}

fn join_words_text(words: &[TranscriptWord]) -> String {
    let mut result = String::new();
    for word in words {
        if !result.is_empty()
            && !word
                .text
                .starts_with(['.', ',', '!', '?', ':', ';'])
        {
            result.push(' ');
        }
        result.push_str(&word.text);
    }
    result
}

/// Join all segment text
pub fn segments_to_full_text(segments: &[TranscriptSegment]) -> String {
    segments
        .iter()
        .map(|s| s.text.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Jaccard similarity over whitespace tokens
pub fn text_similarity_jaccard(a: &str, b: &str) -> f64 {
    let a_lower = a.to_lowercase();
    let b_lower = b.to_lowercase();
    let words_a: std::collections::HashSet<&str> = a_lower.split_whitespace().collect();
    let words_b: std::collections::HashSet<&str> = b_lower.split_whitespace().collect();

    if words_a.is_empty() && words_b.is_empty() {
        return 1.0;
    }
    if words_a.is_empty() || words_b.is_empty() {
        return 0.0;
    }

    let intersection = words_a.intersection(&words_b).count();
    let union = words_a.union(&words_b).count();

    intersection as f64 / union as f64
}

/// Normalize a word for comparison
fn normalize_word(word: &str) -> String {
    word.trim()
        .to_lowercase()
        .trim_matches(|c: char| c.is_ascii_punctuation())
        .to_string()
}

/// Levenshtein distance over chars
fn levenshtein_distance(s1: &str, s2: &str) -> usize {
    let r1: Vec<char> = s1.chars().collect();
    let r2: Vec<char> = s2.chars().collect();

    if r1.is_empty() {
        return r2.len();
    }
    if r2.is_empty() {
        return r1.len();
    }

    let mut matrix = vec![vec![0usize; r2.len() + 1]; r1.len() + 1];

    for (i, row) in matrix.iter_mut().enumerate() {
        row[0] = i;
    }
    for j in 0..=r2.len() {
        matrix[0][j] = j;
    }

    for i in 1..=r1.len() {
        for j in 1..=r2.len() {
            let cost = if r1[i - 1] == r2[j - 1] { 0 } else { 1 };
            matrix[i][j] = (matrix[i - 1][j] + 1)
                .min(matrix[i][j - 1] + 1)
                .min(matrix[i - 1][j - 1] + cost);
        }
    }

    matrix[r1.len()][r2.len()]
}

/// Check a word against the hotword list with fuzzy matching
fn matches_hotword(word: &str, hotwords: &[String]) -> (bool, String) {
    let word_norm = normalize_word(word);
    if word_norm.is_empty() || word_norm.chars().count() < 4 {
        return (false, String::new());
    }

    for hw in hotwords {
        let hw_norm = normalize_word(hw);
        if hw_norm.is_empty() || hw_norm.chars().count() < 4 {
            continue;
        }

        if word_norm == hw_norm {
            return (true, hw.clone());
        }

        let word_len = word_norm.chars().count();
        let hw_len = hw_norm.chars().count();

        let len_diff = (hw_len as i32 - word_len as i32).unsigned_abs() as usize;
        if len_diff > hw_len * 30 / 100 {
            continue;
        }

        let dist = levenshtein_distance(&word_norm, &hw_norm);
        let max_dist = (hw_len * 15 / 100).clamp(1, 2);

        if dist <= max_dist && dist > 0 {
            let max_len = word_len.max(hw_len);
            let similarity = 1.0 - (dist as f64 / max_len as f64);
            if similarity >= 0.75 {
                return (true, hw.clone());
            }
        }
    }

    (false, String::new())
}

/// Whole-word case-insensitive replacement
fn replace_word_ignore_case(text: &str, from: &str, to: &str) -> String {
    let text_lower = text.to_lowercase();
    let from_lower = from.to_lowercase();

    let mut result = text.to_string();
    let mut search_start = 0;

    while let Some(pos) = text_lower
        .get(search_start..)
        .and_then(|s| s.find(&from_lower))
    {
        let abs_pos = search_start + pos;

        let is_word_start = abs_pos == 0
            || !result[..abs_pos]
                .chars()
                .next_back()
                .map(|c| c.is_alphabetic())
                .unwrap_or(false);
        let end_pos = abs_pos + from.len();
        let is_word_end = end_pos >= result.len()
            || !result[end_pos..]
                .chars()
                .next()
                .map(|c| c.is_alphabetic())
                .unwrap_or(false);

        if is_word_start && is_word_end {
            result = format!("{}{}{}", &result[..abs_pos], to, &result[end_pos..]);
            search_start = abs_pos + to.len();
        } else {
            search_start = abs_pos + 1;
        }

        if search_start >= result.len() {
            break;
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arbiter::TranscriptArbiter;
    use crate::traits::TranscriptionEngine;
    use echoscribe_types::TranscriptionResult;
    use parking_lot::Mutex;

    struct FakeEngine {
        name: &'static str,
        segments: Vec<TranscriptSegment>,
    }

    impl TranscriptionEngine for FakeEngine {
        fn name(&self) -> &str {
            self.name
        }
        fn transcribe(&self, _samples: &[f32]) -> Result<TranscriptionResult> {
            Ok(TranscriptionResult {
                text: segments_to_full_text(&self.segments),
                segments: self.segments.clone(),
                language: None,
                processing_time_ms: 0,
                rtf: 0.0,
            })
        }
        fn transcribe_with_segments(&self, _samples: &[f32]) -> Result<Vec<TranscriptSegment>> {
            Ok(self.segments.clone())
        }
        fn supported_languages(&self) -> &[&str] {
            &["en"]
        }
        fn set_language(&mut self, _language: &str) -> Result<()> {
            Ok(())
        }
        fn set_hotwords(&mut self, _hotwords: &[String]) -> Result<()> {
            Ok(())
        }
    }

    struct FakeArbiter {
        answer: String,
    }

    #[async_trait::async_trait]
    impl TranscriptArbiter for FakeArbiter {
        async fn select_best(
            &self,
            _primary: &str,
            _secondary: &str,
            _context: &str,
        ) -> Result<String> {
            Ok(self.answer.clone())
        }
    }

    fn word(start: i64, end: i64, text: &str, confidence: f32) -> TranscriptWord {
        TranscriptWord {
            start,
            end,
            text: text.to_string(),
            confidence,
            speaker: None,
        }
    }

    fn segment_with_words(words: Vec<TranscriptWord>) -> TranscriptSegment {
        TranscriptSegment {
            start: words.first().map(|w| w.start).unwrap_or(0),
            end: words.last().map(|w| w.end).unwrap_or(0),
            text: join_words_text(&words),
            speaker: None,
            words,
            confidence: 0.9,
        }
    }

    fn shared(engine: FakeEngine) -> SharedEngine {
        std::sync::Arc::new(Mutex::new(
            Box::new(engine) as Box<dyn TranscriptionEngine>
        ))
    }

    #[test]
    fn test_primary_only_passthrough() {
        let primary = shared(FakeEngine {
            name: "primary",
            segments: vec![segment_with_words(vec![word(0, 500, "hello", 0.9)])],
        });

        let hybrid =
            HybridTranscriber::new(primary, None, None, HybridConfig::default());
        let result = hybrid.transcribe(&[0.0; 16000]).unwrap();
        assert_eq!(result.segments.len(), 1);
        assert_eq!(result.segments[0].text, "hello");
    }

    #[test]
    fn test_low_confidence_adopts_better_secondary() {
        let primary = shared(FakeEngine {
            name: "primary",
            segments: vec![segment_with_words(vec![
                word(0, 400, "the", 0.95),
                word(400, 900, "mumble", 0.3),
                word(900, 1300, "works", 0.95),
            ])],
        });
        let secondary = shared(FakeEngine {
            name: "secondary",
            segments: vec![segment_with_words(vec![
                word(0, 400, "the", 0.9),
                word(400, 900, "module", 0.9),
                word(900, 1300, "works", 0.9),
            ])],
        });

        let hybrid = HybridTranscriber::new(
            primary,
            Some(secondary),
            None,
            HybridConfig {
                mode: HybridMode::LowConfidence,
                ..Default::default()
            },
        );

        let result = hybrid.transcribe(&[0.0; 32000]).unwrap();
        assert_eq!(result.low_confidence_count, 1);
        assert_eq!(result.retranscribed_count, 1);
        assert!(result.segments[0].text.contains("module"));
    }

    #[test]
    fn test_low_confidence_keeps_primary_when_secondary_weaker() {
        let primary = shared(FakeEngine {
            name: "primary",
            segments: vec![segment_with_words(vec![word(0, 500, "alpha", 0.5)])],
        });
        let secondary = shared(FakeEngine {
            name: "secondary",
            segments: vec![segment_with_words(vec![word(0, 500, "alfa", 0.2)])],
        });

        let hybrid = HybridTranscriber::new(
            primary,
            Some(secondary),
            None,
            HybridConfig {
                mode: HybridMode::LowConfidence,
                ..Default::default()
            },
        );

        let result = hybrid.transcribe(&[0.0; 16000]).unwrap();
        assert_eq!(result.retranscribed_count, 0);
        assert_eq!(result.segments[0].text, "alpha");
    }

    #[tokio::test]
    async fn test_full_compare_identical_keeps_primary() {
        let seg = segment_with_words(vec![word(0, 500, "same", 0.9)]);
        let primary = shared(FakeEngine {
            name: "primary",
            segments: vec![seg.clone()],
        });
        let secondary = shared(FakeEngine {
            name: "secondary",
            segments: vec![seg],
        });

        let hybrid = HybridTranscriber::new(
            primary,
            Some(secondary),
            Some(std::sync::Arc::new(FakeArbiter {
                answer: "should not be consulted".to_string(),
            })),
            HybridConfig {
                mode: HybridMode::FullCompare,
                ..Default::default()
            },
        );

        let result = hybrid.transcribe_async(&[0.0; 16000]).await.unwrap();
        assert_eq!(result.retranscribed_count, 0);
        assert_eq!(result.segments[0].text, "same");
    }

    #[tokio::test]
    async fn test_full_compare_rejects_short_arbiter_answer() {
        let primary = shared(FakeEngine {
            name: "primary",
            segments: vec![segment_with_words(vec![
                word(0, 500, "a", 0.9),
                word(500, 1000, "reasonably", 0.9),
                word(1000, 1500, "long", 0.9),
                word(1500, 2000, "sentence", 0.9),
                word(2000, 2500, "here", 0.9),
            ])],
        });
        let secondary = shared(FakeEngine {
            name: "secondary",
            segments: vec![segment_with_words(vec![word(0, 2500, "different", 0.9)])],
        });

        let hybrid = HybridTranscriber::new(
            primary,
            Some(secondary),
            Some(std::sync::Arc::new(FakeArbiter {
                answer: "ok".to_string(),
            })),
            HybridConfig {
                mode: HybridMode::FullCompare,
                ..Default::default()
            },
        );

        let result = hybrid.transcribe_async(&[0.0; 40000]).await.unwrap();
        assert!(result.segments[0].text.starts_with("a reasonably"));
    }

    #[tokio::test]
    async fn test_full_compare_rejects_unrelated_arbiter_answer() {
        let primary = shared(FakeEngine {
            name: "primary",
            segments: vec![segment_with_words(vec![
                word(0, 500, "meeting", 0.9),
                word(500, 1000, "notes", 0.9),
                word(1000, 1500, "recorded", 0.9),
            ])],
        });
        let secondary = shared(FakeEngine {
            name: "secondary",
            segments: vec![segment_with_words(vec![
                word(0, 500, "meeting", 0.9),
                word(500, 1000, "nodes", 0.9),
                word(1000, 1500, "recorded", 0.9),
            ])],
        });

        let hybrid = HybridTranscriber::new(
            primary,
            Some(secondary),
            Some(std::sync::Arc::new(FakeArbiter {
                answer: "completely unrelated hallucinated output text".to_string(),
            })),
            HybridConfig {
                mode: HybridMode::FullCompare,
                ..Default::default()
            },
        );

        let result = hybrid.transcribe_async(&[0.0; 24000]).await.unwrap();
        assert!(result.segments[0].text.contains("notes"));
    }

    #[tokio::test]
    async fn test_full_compare_secondary_choice_reattaches_speakers() {
        let mut primary_seg =
            segment_with_words(vec![word(0, 1000, "hello", 0.9), word(1000, 2000, "there", 0.9)]);
        primary_seg.speaker = Some("Interlocutor 1".to_string());

        let secondary_seg = segment_with_words(vec![
            word(0, 1000, "hello", 0.9),
            word(1000, 2000, "they're", 0.9),
        ]);

        let primary = shared(FakeEngine {
            name: "primary",
            segments: vec![primary_seg],
        });
        let secondary = shared(FakeEngine {
            name: "secondary",
            segments: vec![secondary_seg],
        });

        let hybrid = HybridTranscriber::new(
            primary,
            Some(secondary),
            Some(std::sync::Arc::new(FakeArbiter {
                answer: "hello they're".to_string(),
            })),
            HybridConfig {
                mode: HybridMode::FullCompare,
                ..Default::default()
            },
        );

        let result = hybrid.transcribe_async(&[0.0; 32000]).await.unwrap();
        assert_eq!(result.segments[0].text, "hello they're");
        assert_eq!(
            result.segments[0].speaker.as_deref(),
            Some("Interlocutor 1")
        );
    }

    #[test]
    fn test_hotword_correction() {
        let primary = shared(FakeEngine {
            name: "primary",
            segments: vec![segment_with_words(vec![
                word(0, 500, "the", 0.9),
                word(500, 1000, "kubernates", 0.9),
                word(1000, 1500, "cluster", 0.9),
            ])],
        });

        let hybrid = HybridTranscriber::new(
            primary,
            None,
            None,
            HybridConfig {
                hotwords: vec!["kubernetes".to_string()],
                ..Default::default()
            },
        );

        let result = hybrid.transcribe(&[0.0; 24000]).unwrap();
        assert!(result.segments[0].text.contains("kubernetes"));
        assert_eq!(result.segments[0].words[1].text, "kubernetes");
    }

    #[test]
    fn test_jaccard_similarity() {
        assert!((text_similarity_jaccard("a b c", "a b c") - 1.0).abs() < 1e-9);
        assert!(text_similarity_jaccard("a b c d", "x y z w") < 1e-9);
        let mixed = text_similarity_jaccard("a b c d", "a b x y");
        assert!(mixed > 0.3 && mixed < 0.4);
    }

    #[test]
    fn test_levenshtein() {
        assert_eq!(levenshtein_distance("kitten", "sitting"), 3);
        assert_eq!(levenshtein_distance("hello", "hello"), 0);
        assert_eq!(levenshtein_distance("", "abc"), 3);
    }
}

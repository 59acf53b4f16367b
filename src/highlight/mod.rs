//! Highlight reconciliation: re-embeds LLM analysis segments into the
//! original answer text as `<mark>` spans.
//!
//! Spans are computed against the unmodified answer first and claimed in
//! analysis order; a span overlapping an already-claimed one is rejected, so
//! a segment contained in an earlier segment never produces a nested
//! highlight. The marked-up string is then rendered in a single pass. A
//! segment that does not occur verbatim simply produces no inline marker;
//! it still shows up in the analysis panel.

use crate::roster::{AnalysisSegment, Sentiment};

pub const POSITIVE_CLASS: &str = "highlight-positive";
pub const NEGATIVE_CLASS: &str = "highlight-negative";
pub const NEUTRAL_CLASS: &str = "highlight-neutral";

pub fn sentiment_class(sentiment: Sentiment) -> &'static str {
    match sentiment {
        Sentiment::Positive => POSITIVE_CLASS,
        Sentiment::Negative => NEGATIVE_CLASS,
        Sentiment::Neutral => NEUTRAL_CLASS,
    }
}

struct Span<'a> {
    start: usize,
    end: usize,
    segment: &'a AnalysisSegment,
}

/// Builds the highlighted form of `original`: every non-neutral segment that
/// occurs verbatim (ASCII case-insensitive, on word boundaries) is wrapped in
/// a mark element carrying the segment id and a sentiment class. All other
/// characters pass through untouched.
pub fn reconcile(original: &str, analysis: &[AnalysisSegment]) -> String {
    let mut claimed: Vec<Span<'_>> = Vec::new();

    for segment in analysis {
        if segment.sentiment == Sentiment::Neutral || segment.segment.is_empty() {
            continue;
        }
        for (start, end) in occurrences(original, &segment.segment) {
            let overlaps = claimed
                .iter()
                .any(|span| start < span.end && span.start < end);
            if !overlaps {
                claimed.push(Span {
                    start,
                    end,
                    segment,
                });
            }
        }
    }

    claimed.sort_by_key(|span| span.start);

    let mut output = String::with_capacity(original.len());
    let mut cursor = 0;
    for span in &claimed {
        output.push_str(&original[cursor..span.start]);
        output.push_str(&format!(
            "<mark id=\"{}\" class=\"{}\">{}</mark>",
            span.segment.id,
            sentiment_class(span.segment.sentiment),
            span.segment.segment
        ));
        cursor = span.end;
    }
    output.push_str(&original[cursor..]);
    output
}

/// Removes every complete markup tag, recovering the plain answer text.
/// Chat refinement re-derives highlights by stripping the prior highlighted
/// string and reconciling the fresh analysis against the result.
pub fn strip_markup(highlighted: &str) -> String {
    let mut output = String::with_capacity(highlighted.len());
    let mut rest = highlighted;
    while let Some(open) = rest.find('<') {
        match rest[open..].find('>') {
            Some(close) => {
                output.push_str(&rest[..open]);
                rest = &rest[open + close + 1..];
            }
            None => break,
        }
    }
    output.push_str(rest);
    output
}

/// All boundary-respecting occurrences of `needle` in `haystack`, as byte
/// ranges, left to right. Matching is ASCII case-insensitive, which mirrors
/// how the grading collaborator tends to re-case its quotes.
fn occurrences(haystack: &str, needle: &str) -> Vec<(usize, usize)> {
    let mut found = Vec::new();
    let needle_len = needle.len();

    for (start, _) in haystack.char_indices() {
        let end = start + needle_len;
        if end > haystack.len() || !haystack.is_char_boundary(end) {
            continue;
        }
        if !haystack[start..end].eq_ignore_ascii_case(needle) {
            continue;
        }
        if boundary_ok(haystack, start, end) {
            found.push((start, end));
        }
    }

    found
}

/// A match must not split a larger word: the characters adjacent to the span,
/// when present, must be non-alphanumeric.
fn boundary_ok(haystack: &str, start: usize, end: usize) -> bool {
    let left_ok = haystack[..start]
        .chars()
        .next_back()
        .map(|c| !c.is_alphanumeric())
        .unwrap_or(true);
    let right_ok = haystack[end..]
        .chars()
        .next()
        .map(|c| !c.is_alphanumeric())
        .unwrap_or(true);
    left_ok && right_ok
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(id: &str, text: &str, sentiment: Sentiment) -> AnalysisSegment {
        AnalysisSegment {
            id: id.to_string(),
            segment: text.to_string(),
            comment: "why it matters".to_string(),
            sentiment,
        }
    }

    #[test]
    fn wraps_both_segments_and_leaves_the_rest_untouched() {
        let answer = "The sky is blue and grass is green.";
        let analysis = vec![
            segment("segment-0-1", "sky is blue", Sentiment::Positive),
            segment("segment-1-1", "grass is green", Sentiment::Negative),
        ];
        let highlighted = reconcile(answer, &analysis);
        assert_eq!(
            highlighted,
            "The <mark id=\"segment-0-1\" class=\"highlight-positive\">sky is blue</mark> \
             and <mark id=\"segment-1-1\" class=\"highlight-negative\">grass is green</mark>."
        );
    }

    #[test]
    fn neutral_segments_are_never_highlighted() {
        let answer = "Water boils at 100 degrees.";
        let analysis = vec![segment("segment-0-1", "100 degrees", Sentiment::Neutral)];
        assert_eq!(reconcile(answer, &analysis), answer);
    }

    #[test]
    fn paraphrased_segment_produces_no_marker_and_leaves_others_intact() {
        let answer = "Plants absorb sunlight to make food.";
        let analysis = vec![
            segment(
                "segment-0-1",
                "vegetation captures light",
                Sentiment::Negative,
            ),
            segment("segment-1-1", "make food", Sentiment::Positive),
        ];
        let highlighted = reconcile(answer, &analysis);
        assert!(!highlighted.contains("segment-0-1"));
        assert!(
            highlighted
                .contains("<mark id=\"segment-1-1\" class=\"highlight-positive\">make food</mark>")
        );
        assert!(highlighted.starts_with("Plants absorb sunlight to "));
    }

    #[test]
    fn segment_inside_claimed_span_is_rejected() {
        let answer = "the quick brown fox jumps";
        let analysis = vec![
            segment("segment-0-1", "quick brown fox", Sentiment::Positive),
            segment("segment-1-1", "brown", Sentiment::Negative),
        ];
        let highlighted = reconcile(answer, &analysis);
        assert!(highlighted.contains("segment-0-1"));
        assert!(!highlighted.contains("segment-1-1"));
    }

    #[test]
    fn partial_word_matches_are_not_highlighted() {
        let answer = "yellow mellow";
        let analysis = vec![segment("segment-0-1", "low", Sentiment::Positive)];
        assert_eq!(reconcile(answer, &analysis), answer);
    }

    #[test]
    fn matching_ignores_ascii_case_but_keeps_segment_casing() {
        let answer = "the sky is blue";
        let analysis = vec![segment("segment-0-1", "Sky Is Blue", Sentiment::Positive)];
        let highlighted = reconcile(answer, &analysis);
        assert!(highlighted.contains(">Sky Is Blue</mark>"));
    }

    #[test]
    fn every_qualifying_occurrence_is_wrapped() {
        let answer = "good start, good finish";
        let analysis = vec![segment("segment-0-1", "good", Sentiment::Positive)];
        let highlighted = reconcile(answer, &analysis);
        assert_eq!(highlighted.matches("<mark").count(), 2);
    }

    #[test]
    fn punctuation_counts_as_a_boundary() {
        let answer = "It makes ATP, the energy carrier.";
        let analysis = vec![segment("segment-0-1", "ATP", Sentiment::Positive)];
        let highlighted = reconcile(answer, &analysis);
        assert!(highlighted.contains(">ATP</mark>,"));
    }

    #[test]
    fn strip_recovers_the_plain_answer() {
        let answer = "The sky is blue and grass is green.";
        let analysis = vec![
            segment("segment-0-1", "sky is blue", Sentiment::Positive),
            segment("segment-1-1", "grass is green", Sentiment::Negative),
        ];
        assert_eq!(strip_markup(&reconcile(answer, &analysis)), answer);
    }

    #[test]
    fn strip_then_reapply_is_idempotent() {
        let answer = "The sky is blue and grass is green.";
        let analysis = vec![
            segment("segment-0-1", "sky is blue", Sentiment::Positive),
            segment("segment-1-1", "grass is green", Sentiment::Negative),
        ];
        let first = reconcile(answer, &analysis);
        let second = reconcile(&strip_markup(&first), &analysis);
        assert_eq!(first, second);
    }

    #[test]
    fn strip_leaves_unclosed_angle_brackets_alone() {
        assert_eq!(strip_markup("2 < 3 is true"), "2 < 3 is true");
        assert_eq!(strip_markup("a <b>bold</b> claim"), "a bold claim");
    }

    #[test]
    fn empty_analysis_returns_the_original() {
        assert_eq!(reconcile("anything at all", &[]), "anything at all");
    }

    #[test]
    fn multibyte_text_is_handled_without_panics() {
        let answer = "Résumé: naïve answer — détail";
        let analysis = vec![segment("segment-0-1", "naïve answer", Sentiment::Negative)];
        let highlighted = reconcile(answer, &analysis);
        assert!(highlighted.contains(">naïve answer</mark>"));
    }
}

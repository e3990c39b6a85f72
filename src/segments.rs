//! Sentence-marker segments
//!
//! Source texts arrive pre-marked with `┼N┼` sentence markers. The parser
//! here splits marked text into `{sid, text}` segments and, when handed
//! unmarked text, pre-marks it first so the split always succeeds.

use std::borrow::Cow;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

pub const MARKER_START: char = '┼';
pub const MARKER_END: char = '┼';

/// A segment may grow to this many characters before a new marker is forced.
const DEFAULT_MIN_SENTENCE_LEN: usize = 80;

static MARKER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        "{}(\\d+){}",
        regex::escape(&MARKER_START.to_string()),
        regex::escape(&MARKER_END.to_string())
    ))
    .expect("marker pattern is valid")
});

/// One translated/source sentence unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub sid: i64,
    pub text: String,
}

/// Splits text into `{sid, text}` segments.
///
/// Idempotent on already-marked text: the inner text between markers is
/// preserved exactly. Unmarked text is wrapped by pre-marking it.
pub fn segments_from_text(raw: &str) -> Vec<Segment> {
    let marked: Cow<'_, str> = if MARKER_RE.is_match(raw) {
        Cow::Borrowed(raw)
    } else {
        Cow::Owned(add_sentence_markers(raw))
    };

    let markers: Vec<(i64, usize, usize)> = MARKER_RE
        .captures_iter(&marked)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let sid = caps.get(1)?.as_str().parse::<i64>().ok()?;
            Some((sid, whole.start(), whole.end()))
        })
        .collect();

    let mut segments = Vec::with_capacity(markers.len());
    for (i, &(sid, _, text_start)) in markers.iter().enumerate() {
        let text_end = markers
            .get(i + 1)
            .map(|&(_, next_start, _)| next_start)
            .unwrap_or(marked.len());
        segments.push(Segment {
            sid,
            text: marked[text_start..text_end].to_string(),
        });
    }
    segments
}

/// Renders segments back into marked text.
pub fn segments_to_marked_text(segments: &[Segment]) -> String {
    let mut out = String::new();
    for segment in segments {
        out.push(MARKER_START);
        out.push_str(&segment.sid.to_string());
        out.push(MARKER_END);
        out.push_str(&segment.text);
    }
    out
}

/// Inserts `┼N┼` markers without altering original newlines.
///
/// Works per physical line: a line at or under the minimum length gets one
/// marker at its start; longer lines get additional markers at sentence
/// boundaries so each segment stays near the minimum length. Empty lines
/// are kept untouched.
pub fn add_sentence_markers(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }

    let mut out = String::with_capacity(text.len() + 64);
    let mut marker_no: i64 = 1;

    for (line, sep) in split_lines_with_seps(text) {
        if line.trim().is_empty() {
            out.push_str(line);
        } else {
            mark_line(line, &mut marker_no, DEFAULT_MIN_SENTENCE_LEN, &mut out);
        }
        out.push_str(sep);
    }

    out
}

/// Splits into (line, newline_cluster) pairs preserving exact separators.
fn split_lines_with_seps(text: &str) -> Vec<(&str, &str)> {
    let bytes = text.as_bytes();
    let n = bytes.len();
    let mut res = Vec::new();
    let mut i = 0;

    while i < n {
        let line_start = i;
        while i < n && bytes[i] != b'\r' && bytes[i] != b'\n' {
            i += 1;
        }
        let line_end = i;
        while i < n && (bytes[i] == b'\r' || bytes[i] == b'\n') {
            i += 1;
        }
        res.push((&text[line_start..line_end], &text[line_end..i]));
    }

    res
}

fn mark_line(line: &str, marker_no: &mut i64, min_sentence_len: usize, out: &mut String) {
    let starts = sentence_starts(line);
    let threshold = min_sentence_len.max(1);
    let mut chunk_start: Option<usize> = None;

    let flush = |from: usize, to: usize, marker_no: &mut i64, out: &mut String| {
        out.push(MARKER_START);
        out.push_str(&marker_no.to_string());
        out.push(MARKER_END);
        out.push_str(&line[from..to]);
        *marker_no += 1;
    };

    for (idx, &start) in starts.iter().enumerate() {
        let end = starts.get(idx + 1).copied().unwrap_or(line.len());
        let from = *chunk_start.get_or_insert(start);

        if line[from..end].trim().chars().count() < threshold {
            continue;
        }
        flush(from, end, marker_no, out);
        chunk_start = None;
    }

    if let Some(from) = chunk_start {
        if !line[from..].trim().is_empty() {
            flush(from, line.len(), marker_no, out);
        }
    }
}

/// Byte offsets where a new sentence begins inside one physical line.
///
/// Boundaries: `...`, `…`, `‽`, `?!`, `!?`, and single `.?!` plus their
/// CJK counterparts `。？！`.
fn sentence_starts(line: &str) -> Vec<usize> {
    let chars: Vec<(usize, char)> = line.char_indices().collect();
    let n = chars.len();
    let mut starts = vec![0usize];
    let mut i = 0;

    while i < n {
        let c = chars[i].1;
        let boundary_end = if c == '.' && i + 2 < n && chars[i + 1].1 == '.' && chars[i + 2].1 == '.'
        {
            Some(i + 3)
        } else if c == '…' || c == '‽' {
            Some(i + 1)
        } else if i + 1 < n
            && ((c == '?' && chars[i + 1].1 == '!') || (c == '!' && chars[i + 1].1 == '?'))
        {
            Some(i + 2)
        } else if matches!(c, '.' | '?' | '!' | '。' | '？' | '！') {
            Some(i + 1)
        } else {
            None
        };

        match boundary_end {
            Some(end) => {
                if end < n {
                    let byte = chars[end].0;
                    if *starts.last().unwrap_or(&0) != byte {
                        starts.push(byte);
                    }
                }
                i = end;
            }
            None => i += 1,
        }
    }

    starts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marked_text_splits_into_segments() {
        let segments = segments_from_text("┼1┼A.┼2┼B.");
        assert_eq!(
            segments,
            vec![
                Segment {
                    sid: 1,
                    text: "A.".to_string()
                },
                Segment {
                    sid: 2,
                    text: "B.".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_marker_parse_is_a_fixed_point() {
        let first = segments_from_text("┼1┼A.┼2┼B.");
        let rendered = segments_to_marked_text(&first);
        assert_eq!(rendered, "┼1┼A.┼2┼B.");
        assert_eq!(segments_from_text(&rendered), first);
    }

    #[test]
    fn test_marked_text_preserves_inner_text_exactly() {
        let segments = segments_from_text("┼1┼ Hello there!┼2┼ And more. ");
        assert_eq!(segments[0].text, " Hello there!");
        assert_eq!(segments[1].text, " And more. ");
    }

    #[test]
    fn test_unmarked_text_is_pre_marked() {
        let segments = segments_from_text("안녕?");
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].sid, 1);
        assert_eq!(segments[0].text, "안녕?");
    }

    #[test]
    fn test_unmarked_multiline_gets_one_marker_per_line() {
        let segments = segments_from_text("Hello.\nWorld!");
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].text, "Hello.\n");
        assert_eq!(segments[1].text, "World!");
    }

    #[test]
    fn test_long_line_splits_at_sentence_boundaries() {
        let a = "x".repeat(90);
        let b = "y".repeat(90);
        let line = format!("{a}. {b}.");
        let segments = segments_from_text(&line);
        assert_eq!(segments.len(), 2);
        assert!(segments[0].text.starts_with('x'));
        assert!(segments[1].text.trim_start().starts_with('y'));
    }

    #[test]
    fn test_empty_lines_are_untouched() {
        let marked = add_sentence_markers("Hello.\n\nWorld.");
        assert_eq!(marked, "┼1┼Hello.\n\n┼2┼World.");
    }

    #[test]
    fn test_empty_input() {
        assert!(segments_from_text("").is_empty());
        assert_eq!(add_sentence_markers(""), "");
    }
}

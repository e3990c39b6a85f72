//! Translation collector
//!
//! Builds the `{segments, metadata?}` artifact out of a translation run's
//! accumulated AI text. Agents emit an optional metadata JSON object
//! followed by a `<translated_text>` body that is either segments JSON or
//! `┼N┼`-marked text.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::{ChunkCollector, CollectorState};
use crate::segments::{segments_from_text, Segment};

static TRANSLATED_TEXT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<translated_text>(.*?)</translated_text>").expect("tag pattern is valid")
});

#[derive(Debug, Default)]
pub struct TranslationCollector {
    state: CollectorState,
}

impl TranslationCollector {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ChunkCollector for TranslationCollector {
    fn add_chunk(&mut self, chunk: &Value) {
        self.state.add_chunk(chunk);
    }

    fn chunks(&self) -> &[Value] {
        self.state.chunks()
    }

    fn append_ai_content(&mut self, text: &str) {
        self.state.append_ai_content(text);
    }

    fn set_metadata(&mut self, key: &str, value: Value) {
        self.state.set_metadata(key, value);
    }

    fn get_metadata(&self, key: &str) -> Option<&Value> {
        self.state.get_metadata(key)
    }

    fn get_ai_content(&self) -> &str {
        self.state.ai_content()
    }

    fn format_result(&self) -> Value {
        let content = self.state.ai_content();

        let (metadata, body) = split_metadata_and_body(content);
        let segments = segments_from_body(&body);

        if segments.is_empty() {
            warn!("Translation output yielded no segments, keeping raw content");
            let mut result = Map::new();
            result.insert("_raw".to_string(), Value::String(content.to_string()));
            if let Some(metadata) = metadata {
                result.insert("metadata".to_string(), metadata);
            }
            return Value::Object(result);
        }

        let mut result = Map::new();
        result.insert(
            "segments".to_string(),
            serde_json::to_value(&segments).unwrap_or_default(),
        );
        if let Some(metadata) = metadata {
            result.insert("metadata".to_string(), metadata);
        }
        Value::Object(result)
    }
}

/// Splits accumulated AI text into run metadata and the translated body.
///
/// A leading `{…}` JSON object immediately preceding the
/// `<translated_text>` tag (or the end of the text) is metadata; the body
/// is the tag's inner text, or whatever the metadata did not consume. A
/// whole-text segments object is the body, not metadata.
fn split_metadata_and_body(content: &str) -> (Option<Value>, String) {
    let tag = TRANSLATED_TEXT_RE.captures(content);
    let prefix = match &tag {
        Some(caps) => {
            let tag_start = caps.get(0).map(|m| m.start()).unwrap_or(0);
            &content[..tag_start]
        }
        None => content,
    };

    let metadata = parse_metadata_prefix(prefix.trim());
    let body = match &tag {
        Some(caps) => caps[1].to_string(),
        // No tag: the metadata object consumed the whole text
        None if metadata.is_some() => String::new(),
        None => content.to_string(),
    };

    (metadata, body)
}

fn parse_metadata_prefix(prefix: &str) -> Option<Value> {
    if !prefix.starts_with('{') {
        return None;
    }

    match serde_json::from_str::<Value>(prefix) {
        Ok(value) if value.is_object() => {
            if value.get("segments").is_some() {
                return None;
            }
            Some(value)
        }
        Ok(_) => None,
        Err(e) => {
            debug!(error = %e, "Ignoring unparseable metadata prefix");
            None
        }
    }
}

fn segments_from_body(body: &str) -> Vec<Segment> {
    // Direct JSON segments first: an agent that already answered with
    // {"segments": [...]} must round-trip without re-marking.
    if let Ok(value) = serde_json::from_str::<Value>(body.trim()) {
        if let Some(items) = value.get("segments").and_then(Value::as_array) {
            let segments = validated_segments(items);
            if !segments.is_empty() {
                return segments;
            }
        }
    }

    segments_from_text(body)
}

fn validated_segments(items: &[Value]) -> Vec<Segment> {
    let mut segments = Vec::with_capacity(items.len());
    for item in items {
        let Some(sid) = item.get("sid").and_then(Value::as_i64) else {
            warn!(item = %item, "Dropping segment without numeric sid");
            continue;
        };
        let text = match item.get("text") {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => {
                warn!(sid = sid, "Dropping segment without text");
                continue;
            }
        };
        segments.push(Segment { sid, text });
    }
    segments
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn collect(content: &str) -> Value {
        let mut collector = TranslationCollector::new();
        collector.append_ai_content(content);
        collector.format_result()
    }

    #[test]
    fn test_metadata_and_marked_body() {
        let result = collect(
            r#"{"summary":"s"}<translated_text>┼1┼Hello.┼2┼World.</translated_text>"#,
        );

        assert_eq!(result["metadata"], json!({ "summary": "s" }));
        assert_eq!(
            result["segments"],
            json!([
                { "sid": 1, "text": "Hello." },
                { "sid": 2, "text": "World." },
            ])
        );
    }

    #[test]
    fn test_direct_json_segments_round_trip() {
        let body = r#"{"segments": [{"sid": 1, "text": "A."}, {"sid": 2, "text": "B."}]}"#;
        let result = collect(body);

        assert_eq!(
            result["segments"],
            json!([
                { "sid": 1, "text": "A." },
                { "sid": 2, "text": "B." },
            ])
        );
        // The segments object is the body, never swallowed as metadata
        assert!(result.get("metadata").is_none());
    }

    #[test]
    fn test_json_segments_inside_tag() {
        let content = r#"<translated_text>{"segments": [{"sid": 7, "text": "Hi."}]}</translated_text>"#;
        let result = collect(content);
        assert_eq!(result["segments"], json!([{ "sid": 7, "text": "Hi." }]));
    }

    #[test]
    fn test_segment_text_is_coerced_to_string() {
        let body = r#"{"segments": [{"sid": 1, "text": 42}]}"#;
        let result = collect(body);
        assert_eq!(result["segments"], json!([{ "sid": 1, "text": "42" }]));
    }

    #[test]
    fn test_unmarked_body_is_marker_parsed() {
        let result = collect("<translated_text>Hello there.</translated_text>");
        assert_eq!(
            result["segments"],
            json!([{ "sid": 1, "text": "Hello there." }])
        );
    }

    #[test]
    fn test_tag_spanning_newlines() {
        let result = collect("<translated_text>\n┼1┼Line one.\n</translated_text>");
        assert_eq!(
            result["segments"],
            json!([{ "sid": 1, "text": "Line one.\n" }])
        );
    }

    #[test]
    fn test_empty_output_keeps_raw_escape_hatch() {
        let result = collect("");
        assert_eq!(result, json!({ "_raw": "" }));
    }

    #[test]
    fn test_unparseable_metadata_is_ignored() {
        let result = collect("{not json<translated_text>┼1┼A.</translated_text>");
        assert!(result.get("metadata").is_none());
        assert_eq!(result["segments"], json!([{ "sid": 1, "text": "A." }]));
    }

    #[test]
    fn test_metadata_without_tag_before_end_of_text() {
        // No body at all: metadata parses, segments fall back to _raw
        let result = collect(r#"{"summary": "only metadata"}"#);
        assert_eq!(result["metadata"], json!({ "summary": "only metadata" }));
        assert!(result.get("_raw").is_some());
    }
}

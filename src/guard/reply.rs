//! Upstream reply normalization
//!
//! The conversation service may return a flat string or a structured list of
//! content segments. Normalization to the canonical string happens exactly
//! once, before the reply is recorded, so both consumption paths see the
//! already-normalized result.

use serde::{Deserialize, Serialize};

/// Shape of a reply as returned by the conversation service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplyContent {
    /// The whole reply arrived as one string.
    PlainText(String),
    /// The reply arrived as ordered content segments.
    Segments(Vec<Segment>),
}

/// One content segment of a structured reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub kind: SegmentKind,
    /// Textual payload for [`SegmentKind::Text`]; a URL or opaque reference
    /// for other kinds.
    pub text: String,
}

impl Segment {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: SegmentKind::Text,
            text: text.into(),
        }
    }

    pub fn of_kind(kind: SegmentKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }
}

/// Segment kinds the upstream is known to emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentKind {
    Text,
    Image,
    Audio,
    Other,
}

impl ReplyContent {
    /// Produce the canonical reply string: textual segments concatenated in
    /// their given order, non-textual segments skipped.
    pub fn canonical_text(&self) -> String {
        match self {
            ReplyContent::PlainText(text) => text.clone(),
            ReplyContent::Segments(segments) => segments
                .iter()
                .filter(|s| s.kind == SegmentKind::Text)
                .map(|s| s.text.as_str())
                .collect(),
        }
    }

    /// Whether the canonical reply would be empty.
    pub fn is_empty(&self) -> bool {
        match self {
            ReplyContent::PlainText(text) => text.is_empty(),
            ReplyContent::Segments(segments) => segments
                .iter()
                .all(|s| s.kind != SegmentKind::Text || s.text.is_empty()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_passes_through() {
        let content = ReplyContent::PlainText("Hello there".to_string());
        assert_eq!(content.canonical_text(), "Hello there");
        assert!(!content.is_empty());
    }

    #[test]
    fn test_segments_concatenate_textual_parts_in_order() {
        let content = ReplyContent::Segments(vec![
            Segment::text("a"),
            Segment::of_kind(SegmentKind::Image, "https://example.com/b.png"),
            Segment::text("c"),
        ]);
        assert_eq!(content.canonical_text(), "ac");
    }

    #[test]
    fn test_concatenation_is_deterministic() {
        let segments = vec![
            Segment::text("first "),
            Segment::of_kind(SegmentKind::Audio, "ignored"),
            Segment::text("second"),
        ];
        let content = ReplyContent::Segments(segments);
        assert_eq!(content.canonical_text(), content.canonical_text());
        assert_eq!(content.canonical_text(), "first second");
    }

    #[test]
    fn test_non_textual_only_reply_is_empty() {
        let content = ReplyContent::Segments(vec![Segment::of_kind(
            SegmentKind::Image,
            "https://example.com/x.png",
        )]);
        assert_eq!(content.canonical_text(), "");
        assert!(content.is_empty());
    }
}

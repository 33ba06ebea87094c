//! Line-oriented view of an editor buffer
//!
//! Offsets exchanged with the editor are UTF-16 code units and positions are
//! LSP `(line, character)` pairs, also in UTF-16. Lines are split on `\n`,
//! `\r\n` and `\r`, the same breaks the protocol uses.

use std::borrow::Cow;

use ropey::{Rope, RopeSlice};
use tower_lsp::lsp_types::{Position, TextDocumentContentChangeEvent, Url};
use tracing::{debug, warn};

/// What the region engine needs from a document.
pub trait TextDocument {
    /// Number of lines. A trailing line break starts one more (empty) line,
    /// so an empty document has exactly one line.
    fn line_count(&self) -> usize;

    /// Text of line `index` without its terminator; empty when out of range.
    fn line_text(&self, index: usize) -> Cow<'_, str>;

    /// The break ending line `index` (`"\n"`, `"\r\n"`, `"\r"`), or `""` for
    /// the last line.
    fn line_terminator(&self, index: usize) -> &'static str;

    /// Total length in UTF-16 code units.
    fn len_utf16(&self) -> usize;

    /// Converts a UTF-16 offset into a position, `None` past the end.
    fn position_at(&self, offset: usize) -> Option<Position>;

    /// Converts a position into a UTF-16 offset. A character past the end of
    /// its line is clamped to the line end; an unknown line yields `None`.
    fn offset_at(&self, position: Position) -> Option<usize>;
}

fn terminator_of(slice: &RopeSlice<'_>) -> &'static str {
    let len = slice.len_chars();
    match (len.checked_sub(2).map(|i| slice.char(i)), len.checked_sub(1).map(|i| slice.char(i))) {
        (Some('\r'), Some('\n')) => "\r\n",
        (_, Some('\n')) => "\n",
        (_, Some('\r')) => "\r",
        _ => "",
    }
}

impl TextDocument for Rope {
    fn line_count(&self) -> usize {
        self.len_lines()
    }

    fn line_text(&self, index: usize) -> Cow<'_, str> {
        let Some(slice) = self.get_line(index) else {
            return Cow::Borrowed("");
        };
        let content = slice.len_chars() - terminator_of(&slice).chars().count();
        Cow::from(slice.slice(..content))
    }

    fn line_terminator(&self, index: usize) -> &'static str {
        self.get_line(index).map(|slice| terminator_of(&slice)).unwrap_or("")
    }

    fn len_utf16(&self) -> usize {
        self.len_utf16_cu()
    }

    fn position_at(&self, offset: usize) -> Option<Position> {
        if offset > self.len_utf16_cu() {
            return None;
        }
        let char_index = self.utf16_cu_to_char(offset);
        let line = self.char_to_line(char_index);
        let line_start = self.char_to_utf16_cu(self.line_to_char(line));
        Some(Position::new(line as u32, (offset - line_start) as u32))
    }

    fn offset_at(&self, position: Position) -> Option<usize> {
        let line = position.line as usize;
        let slice = self.get_line(line)?;
        let line_start = self.char_to_utf16_cu(self.line_to_char(line));
        let content = slice.len_chars() - terminator_of(&slice).chars().count();
        let content_len = slice.slice(..content).len_utf16_cu();
        Some(line_start + (position.character as usize).min(content_len))
    }
}

/// Counts the UTF-16 code units of `text`.
pub fn utf16_len(text: &str) -> usize {
    text.chars().map(char::len_utf16).sum()
}

/// Maps a UTF-16 column within `line` to a byte index, clamped to the line.
/// A column inside a surrogate pair maps to the start of that character.
pub fn utf16_to_byte(line: &str, column: usize) -> usize {
    let mut units = 0;
    for (byte, c) in line.char_indices() {
        if units + c.len_utf16() > column {
            return byte;
        }
        units += c.len_utf16();
    }
    line.len()
}

/// An open editor buffer.
#[derive(Debug, Clone)]
pub struct OpenDocument {
    pub uri: Url,
    pub version: i32,
    pub text: Rope,
}

impl OpenDocument {
    pub fn new(uri: Url, version: i32, text: &str) -> Self {
        Self {
            uri,
            version,
            text: Rope::from_str(text),
        }
    }

    /// Applies a batch of content changes in order. Changes for a version
    /// that is not newer than the current one are ignored.
    pub fn apply(&mut self, changes: &[TextDocumentContentChangeEvent], version: i32) -> bool {
        if version <= self.version {
            warn!(
                "Ignoring stale change for {} (version {} <= {})",
                self.uri, version, self.version
            );
            return false;
        }
        for change in changes {
            match change.range {
                Some(range) => {
                    let (Some(start), Some(end)) =
                        (self.text.offset_at(range.start), self.text.offset_at(range.end))
                    else {
                        warn!("Change range {:?} is outside {}", range, self.uri);
                        continue;
                    };
                    let end = end.max(start);
                    let start = self.text.utf16_cu_to_char(start);
                    let end = self.text.utf16_cu_to_char(end);
                    self.text.remove(start..end);
                    self.text.insert(start, &change.text);
                }
                None => self.text = Rope::from_str(&change.text),
            }
        }
        debug!("Applied {} change(s) to {}, now version {}", changes.len(), self.uri, version);
        self.version = version;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tower_lsp::lsp_types::Range;

    #[test]
    fn test_lines_and_terminators() {
        let rope = Rope::from_str("a\r\nb\rc\nd");
        assert_eq!(rope.line_count(), 4);
        let lines: Vec<_> = (0..4).map(|i| (rope.line_text(i).into_owned(), rope.line_terminator(i))).collect();
        assert_eq!(
            lines,
            vec![
                ("a".to_string(), "\r\n"),
                ("b".to_string(), "\r"),
                ("c".to_string(), "\n"),
                ("d".to_string(), ""),
            ]
        );
    }

    #[test]
    fn test_empty_document_has_one_empty_line() {
        let rope = Rope::from_str("");
        assert_eq!(rope.line_count(), 1);
        assert_eq!(rope.line_text(0), "");
        assert_eq!(rope.line_terminator(0), "");
        assert_eq!(rope.position_at(0), Some(Position::new(0, 0)));
        assert_eq!(rope.position_at(1), None);
    }

    #[test]
    fn test_trailing_newline_opens_a_line() {
        let rope = Rope::from_str("x\n");
        assert_eq!(rope.line_count(), 2);
        assert_eq!(rope.position_at(2), Some(Position::new(1, 0)));
    }

    #[test]
    fn test_utf16_positions() {
        // "😀" is two UTF-16 code units.
        let rope = Rope::from_str("a😀b\nc");
        assert_eq!(rope.len_utf16(), 6);
        assert_eq!(rope.position_at(3), Some(Position::new(0, 3)));
        assert_eq!(rope.position_at(5), Some(Position::new(1, 0)));
        assert_eq!(rope.offset_at(Position::new(0, 3)), Some(3));
        assert_eq!(rope.offset_at(Position::new(1, 1)), Some(6));
        assert_eq!(rope.offset_at(Position::new(0, 99)), Some(4));
        assert_eq!(rope.offset_at(Position::new(7, 0)), None);
    }

    #[test]
    fn test_utf16_to_byte() {
        let line = "é😀x";
        assert_eq!(utf16_to_byte(line, 0), 0);
        assert_eq!(utf16_to_byte(line, 1), 2);
        assert_eq!(utf16_to_byte(line, 2), 2);
        assert_eq!(utf16_to_byte(line, 3), 6);
        assert_eq!(utf16_to_byte(line, 10), line.len());
        assert_eq!(utf16_len(line), 4);
    }

    #[test]
    fn test_apply_full_change() {
        let mut doc = OpenDocument::new(Url::parse("file:///a.svx").unwrap(), 1, "initial text");
        let changes = vec![TextDocumentContentChangeEvent {
            range: None,
            range_length: None,
            text: "new text".to_string(),
        }];
        assert!(doc.apply(&changes, 2));
        assert_eq!(doc.text.to_string(), "new text");
        assert_eq!(doc.version, 2);
    }

    #[test]
    fn test_apply_incremental_change_in_utf16() {
        let mut doc = OpenDocument::new(Url::parse("file:///a.svx").unwrap(), 1, "😀 hello world");
        let changes = vec![TextDocumentContentChangeEvent {
            range: Some(Range::new(Position::new(0, 9), Position::new(0, 14))),
            range_length: None,
            text: "there".to_string(),
        }];
        assert!(doc.apply(&changes, 2));
        assert_eq!(doc.text.to_string(), "😀 hello there");
    }

    #[test]
    fn test_apply_reversed_range_after_surrogate_pairs_inserts() {
        let mut doc = OpenDocument::new(Url::parse("file:///a.svx").unwrap(), 1, "😀😀abc");
        let changes = vec![TextDocumentContentChangeEvent {
            range: Some(Range::new(Position::new(0, 5), Position::new(0, 4))),
            range_length: None,
            text: "X".to_string(),
        }];
        assert!(doc.apply(&changes, 2));
        assert_eq!(doc.text.to_string(), "😀😀aXbc");
    }

    #[test]
    fn test_apply_outdated_version_is_ignored() {
        let mut doc = OpenDocument::new(Url::parse("file:///a.svx").unwrap(), 3, "keep");
        let changes = vec![TextDocumentContentChangeEvent {
            range: None,
            range_length: None,
            text: "drop".to_string(),
        }];
        assert!(!doc.apply(&changes, 2));
        assert_eq!(doc.text.to_string(), "keep");
        assert_eq!(doc.version, 3);
    }
}

//! Offset classification and masked projections
//!
//! Both operations retokenize from the first line: the rule stack for line N
//! only exists after lines `0..N` have been tokenized in order.

use std::sync::Arc;

use tracing::{debug, trace};

use super::{ClassificationError, RegionTag};
use crate::document::{utf16_len, utf16_to_byte, TextDocument};
use crate::grammar::{Grammar, LineTokens, RuleStack, Token};

/// Scope suffix marking a token as Svelte.
pub const EMBEDDED_SENTINEL: &str = "source.svelte";

/// Replacement for every UTF-16 code unit of masked text.
pub const FILLER: char = ' ';

/// Classifies and projects documents with one compiled grammar.
#[derive(Debug, Clone)]
pub struct LanguageRegions {
    grammar: Arc<Grammar>,
    sentinel: Arc<str>,
}

impl LanguageRegions {
    pub fn new(grammar: Arc<Grammar>) -> Self {
        Self::with_sentinel(grammar, EMBEDDED_SENTINEL)
    }

    /// Uses `sentinel` instead of `source.svelte` to recognise embedded tokens.
    pub fn with_sentinel(grammar: Arc<Grammar>, sentinel: impl Into<Arc<str>>) -> Self {
        Self {
            grammar,
            sentinel: sentinel.into(),
        }
    }

    pub fn grammar(&self) -> &Arc<Grammar> {
        &self.grammar
    }

    pub fn tag_of(&self, token: &Token) -> RegionTag {
        if token.has_scope_suffix(&self.sentinel) {
            RegionTag::Embedded
        } else {
            RegionTag::Host
        }
    }

    fn tokenize(&self, line: &str, index: usize, stack: &RuleStack) -> Result<LineTokens, ClassificationError> {
        self.grammar
            .tokenize_line(line, stack)
            .map_err(|source| ClassificationError::Tokenize { line: index, source })
    }

    /// Classifies the character at UTF-16 `offset`.
    ///
    /// `offset` may equal the document length. A column that sits on a token
    /// boundary belongs to the token that starts there; the end of a line
    /// (including an empty line and the end of the document) belongs to the
    /// line's last token.
    ///
    /// # Errors
    ///
    /// [`ClassificationError::OffsetOutOfRange`] past the end of the document,
    /// [`ClassificationError::Tokenize`] when the grammar rejects a line and
    /// [`ClassificationError::NoCoveringToken`] if the target line produced no
    /// token for the column.
    pub fn classify<D>(&self, document: &D, offset: usize) -> Result<RegionTag, ClassificationError>
    where
        D: TextDocument + ?Sized,
    {
        let length = document.len_utf16();
        let position = document
            .position_at(offset)
            .ok_or(ClassificationError::OffsetOutOfRange { offset, length })?;
        let target = position.line as usize;

        let mut stack = RuleStack::initial();
        for index in 0..target {
            let line = document.line_text(index);
            stack = self.tokenize(&line, index, &stack)?.rule_stack;
        }

        let line = document.line_text(target);
        let tokens = self.tokenize(&line, target, &stack)?.tokens;
        let column = position.character as usize;
        let byte = utf16_to_byte(&line, column);

        let token = covering_token(&tokens, byte, line.len()).ok_or(ClassificationError::NoCoveringToken {
            line: target,
            column,
        })?;
        let tag = self.tag_of(token);
        trace!("Offset {} ({}:{}) is {:?}", offset, target, column, tag);
        Ok(tag)
    }

    /// Renders `document` with every token not tagged `keep` replaced by
    /// [`FILLER`]. The result has the same UTF-16 length and the same line
    /// breaks as the input, so positions carry over unchanged.
    pub fn project<D>(&self, document: &D, keep: RegionTag) -> Result<String, ClassificationError>
    where
        D: TextDocument + ?Sized,
    {
        let mut output = String::with_capacity(document.len_utf16());
        let mut stack = RuleStack::initial();
        let mut masked = 0usize;

        for index in 0..document.line_count() {
            let line = document.line_text(index);
            let LineTokens { tokens, rule_stack } = self.tokenize(&line, index, &stack)?;

            let mut copied_to = 0;
            for token in &tokens {
                let text = &line[token.start..token.end];
                if self.tag_of(token) == keep {
                    output.push_str(text);
                } else {
                    let width = utf16_len(text);
                    output.extend(std::iter::repeat_n(FILLER, width));
                    masked += width;
                }
                copied_to = token.end;
            }
            if copied_to < line.len() {
                return Err(ClassificationError::NoCoveringToken {
                    line: index,
                    column: utf16_len(&line[..copied_to]),
                });
            }

            output.push_str(document.line_terminator(index));
            stack = rule_stack;
        }

        debug!(
            "Projected {} lines keeping {:?}, masked {} code units",
            document.line_count(),
            keep,
            masked
        );
        Ok(output)
    }

    /// The Markdown view: Svelte masked out.
    pub fn host_view<D>(&self, document: &D) -> Result<String, ClassificationError>
    where
        D: TextDocument + ?Sized,
    {
        self.project(document, RegionTag::Host)
    }

    /// The Svelte view: Markdown masked out.
    pub fn embedded_view<D>(&self, document: &D) -> Result<String, ClassificationError>
    where
        D: TextDocument + ?Sized,
    {
        self.project(document, RegionTag::Embedded)
    }
}

/// Half-open lookup: `start <= byte < end`, with the end of the line owned by
/// the last token.
fn covering_token(tokens: &[Token], byte: usize, line_len: usize) -> Option<&Token> {
    if byte >= line_len {
        return tokens.last();
    }
    tokens.iter().find(|token| token.start <= byte && byte < token.end)
}

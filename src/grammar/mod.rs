//! TextMate grammar support
//!
//! A JSON `tmLanguage` grammar is parsed ([`raw`]), compiled into a rule arena
//! ([`rule`]) and used to tokenize documents line by line ([`tokenizer`]).
//! [`provider`] loads a grammar once per process and shares it.

pub mod provider;
pub mod raw;
mod rule;
pub mod tokenizer;

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

pub use provider::{GrammarProvider, GrammarRegistry, GrammarSource, BUNDLED_GRAMMAR, MDSVEX_SCOPE};
pub use raw::RawGrammar;
pub use tokenizer::{LineTokens, RuleStack, Token};

use rule::{Compiler, Rule};

/// Failure to obtain a usable grammar. Clonable so a cached failure can be
/// handed to every caller of [`GrammarProvider::load`].
#[derive(Debug, Clone, Error)]
pub enum GrammarLoadError {
    #[error("failed to read grammar file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: Arc<std::io::Error>,
    },

    #[error("failed to parse grammar {origin}: {source}")]
    Parse {
        origin: String,
        #[source]
        source: Arc<serde_json::Error>,
    },

    #[error("no grammar registered for scope '{scope}'")]
    UnknownScope { scope: String },

    #[error("invalid pattern {pattern:?} in grammar: {message}")]
    InvalidPattern { pattern: String, message: String },
}

impl GrammarLoadError {
    pub(crate) fn invalid_pattern(pattern: &str, error: onig::Error) -> Self {
        Self::InvalidPattern {
            pattern: pattern.to_string(),
            message: error.to_string(),
        }
    }
}

/// The scanner rejected a line.
#[derive(Debug, Clone, Error)]
pub enum TokenizeError {
    #[error("back-referenced pattern {pattern:?} failed to compile: {message}")]
    DynamicPattern { pattern: String, message: String },
}

/// A compiled, immutable grammar.
#[derive(Debug)]
pub struct Grammar {
    scope: Arc<str>,
    rules: Vec<Rule>,
}

impl Grammar {
    /// Compiles a parsed grammar, resolving includes and every regex.
    pub fn compile(raw: &RawGrammar) -> Result<Self, GrammarLoadError> {
        let rules = Compiler::new(raw).compile()?;
        Ok(Self {
            scope: Arc::from(raw.scope_name.as_str()),
            rules,
        })
    }

    /// Parses and compiles a grammar from JSON text.
    pub fn from_json(text: &str) -> Result<Self, GrammarLoadError> {
        let raw = RawGrammar::from_json(text).map_err(|e| GrammarLoadError::Parse {
            origin: "<inline>".to_string(),
            source: Arc::new(e),
        })?;
        Self::compile(&raw)
    }

    /// Root scope name, e.g. `text.html.mdsvex`.
    pub fn scope_name(&self) -> &str {
        &self.scope
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_json_reports_parse_errors() {
        let err = Grammar::from_json("{ not json").unwrap_err();
        assert!(matches!(err, GrammarLoadError::Parse { .. }));
        assert!(err.to_string().contains("<inline>"));
    }

    #[test]
    fn test_scope_name() {
        let grammar = Grammar::from_json(r#"{ "scopeName": "text.demo", "patterns": [] }"#).unwrap();
        assert_eq!(grammar.scope_name(), "text.demo");
    }
}

//! Host/embedded region classification for mdsvex documents
//!
//! A document mixes Markdown (the host language) with Svelte (the embedded
//! language). The grammar tags every token with scopes; a token belongs to
//! the embedded language when any of its scopes ends with the embedded
//! sentinel (`source.svelte` by default).
//!
//! [`LanguageRegions`] answers two questions about a document:
//! which language owns an offset, and what the document looks like with the
//! other language blanked out. [`VirtualDocumentStore`] keeps the latest
//! projections so other tools can read them by URI.

pub mod classifier;
pub mod virtual_document;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::grammar::TokenizeError;

pub use classifier::{LanguageRegions, EMBEDDED_SENTINEL, FILLER};
pub use virtual_document::{
    VirtualDocumentChange, VirtualDocumentEntry, VirtualDocumentStore, VirtualDocumentUri, VirtualUriError,
};

/// Which language a piece of text belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegionTag {
    Host,
    Embedded,
}

impl RegionTag {
    /// Short language id used in virtual document URIs.
    pub fn language(self) -> &'static str {
        match self {
            RegionTag::Host => "md",
            RegionTag::Embedded => "svelte",
        }
    }

    pub fn from_language(language: &str) -> Option<Self> {
        match language {
            "md" => Some(RegionTag::Host),
            "svelte" => Some(RegionTag::Embedded),
            _ => None,
        }
    }
}

/// Why an offset could not be classified or a document not projected.
#[derive(Debug, Clone, Error)]
pub enum ClassificationError {
    #[error("offset {offset} is outside the document (length {length})")]
    OffsetOutOfRange { offset: usize, length: usize },

    #[error("no token covers line {line}, column {column}")]
    NoCoveringToken { line: usize, column: usize },

    #[error("failed to tokenize line {line}: {source}")]
    Tokenize {
        line: usize,
        #[source]
        source: TokenizeError,
    },
}

//! mdsvex-specific LSP extensions
//!
//! Editors use these to find out which language owns a position and to read
//! the projected documents behind `embedded-md://` and `embedded-svelte://`
//! URIs.

use serde::{Deserialize, Serialize};
use tower_lsp::lsp_types::notification::Notification;
use tower_lsp::lsp_types::{Position, TextDocumentIdentifier};

use crate::language_regions::{RegionTag, VirtualDocumentChange};

pub const CLASSIFY_METHOD: &str = "mdsvex/classify";
pub const VIRTUAL_DOCUMENT_METHOD: &str = "mdsvex/virtualDocument";

/// JSON-RPC error code for a virtual document URI the store does not know.
pub const VIRTUAL_DOCUMENT_NOT_FOUND: i64 = -32001;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifyParams {
    pub text_document: TextDocumentIdentifier,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifyResult {
    pub region: RegionTag,
    /// Virtual document to forward requests for this position to.
    pub virtual_uri: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualDocumentParams {
    pub uri: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualDocumentResult {
    pub text: String,
    pub version: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualDocumentDidChangeParams {
    pub uri: String,
    pub version: u64,
    pub removed: bool,
}

impl From<VirtualDocumentChange> for VirtualDocumentDidChangeParams {
    fn from(change: VirtualDocumentChange) -> Self {
        Self {
            uri: change.uri.to_string(),
            version: change.version,
            removed: change.removed,
        }
    }
}

/// Sent whenever a projected document is updated or dropped.
#[derive(Debug)]
pub enum VirtualDocumentDidChange {}

impl Notification for VirtualDocumentDidChange {
    type Params = VirtualDocumentDidChangeParams;
    const METHOD: &'static str = "mdsvex/virtualDocumentDidChange";
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_classify_wire_format() {
        let params: ClassifyParams = serde_json::from_value(json!({
            "textDocument": { "uri": "file:///a.svx" },
            "position": { "line": 1, "character": 2 }
        }))
        .unwrap();
        assert_eq!(params.position, Position::new(1, 2));

        let result = ClassifyResult {
            region: RegionTag::Embedded,
            virtual_uri: "embedded-svelte://svelte/x.svelte".into(),
        };
        assert_eq!(
            serde_json::to_value(result).unwrap(),
            json!({ "region": "embedded", "virtualUri": "embedded-svelte://svelte/x.svelte" })
        );
    }
}

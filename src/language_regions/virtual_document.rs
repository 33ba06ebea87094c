//! Virtual documents for projected views
//!
//! Each open source document has two projections, addressed by URIs of the
//! form `embedded-<lang>://<lang>/<percent-encoded source uri>.<lang>`.
//! The store keeps the latest text per URI and tells subscribers about every
//! update and removal.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use thiserror::Error;
use tokio::sync::mpsc;
use tower_lsp::lsp_types::Url;
use tracing::{debug, trace};

use super::RegionTag;

/// Characters escaped by JavaScript's `encodeURIComponent`.
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

const SCHEME_PREFIX: &str = "embedded-";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VirtualUriError {
    #[error("'{0}' is not an embedded-* URI")]
    Scheme(String),

    #[error("unknown embedded language '{0}'")]
    Language(String),

    #[error("malformed virtual document URI '{0}'")]
    Malformed(String),

    #[error("source URI is not valid UTF-8 after decoding")]
    Encoding,

    #[error("invalid source URI '{uri}': {source}")]
    SourceUri {
        uri: String,
        #[source]
        source: url::ParseError,
    },
}

/// Address of one projection of one source document.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VirtualDocumentUri {
    source: Url,
    region: RegionTag,
}

impl VirtualDocumentUri {
    pub fn new(source: Url, region: RegionTag) -> Self {
        Self { source, region }
    }

    /// URIs of the host and embedded projections of `source`.
    pub fn pair(source: &Url) -> [Self; 2] {
        [
            Self::new(source.clone(), RegionTag::Host),
            Self::new(source.clone(), RegionTag::Embedded),
        ]
    }

    pub fn source(&self) -> &Url {
        &self.source
    }

    pub fn region(&self) -> RegionTag {
        self.region
    }

    pub fn parse(text: &str) -> Result<Self, VirtualUriError> {
        let rest = text
            .strip_prefix(SCHEME_PREFIX)
            .ok_or_else(|| VirtualUriError::Scheme(text.to_string()))?;
        let (language, rest) = rest
            .split_once("://")
            .ok_or_else(|| VirtualUriError::Malformed(text.to_string()))?;
        let region = RegionTag::from_language(language).ok_or_else(|| VirtualUriError::Language(language.to_string()))?;

        let encoded = rest
            .strip_prefix(language)
            .and_then(|rest| rest.strip_prefix('/'))
            .and_then(|rest| rest.strip_suffix(language))
            .and_then(|rest| rest.strip_suffix('.'))
            .ok_or_else(|| VirtualUriError::Malformed(text.to_string()))?;

        let decoded = percent_decode_str(encoded)
            .decode_utf8()
            .map_err(|_| VirtualUriError::Encoding)?;
        let source = Url::parse(&decoded).map_err(|source| VirtualUriError::SourceUri {
            uri: decoded.to_string(),
            source,
        })?;
        Ok(Self { source, region })
    }
}

impl fmt::Display for VirtualDocumentUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let language = self.region.language();
        write!(
            f,
            "{SCHEME_PREFIX}{language}://{language}/{}.{language}",
            utf8_percent_encode(self.source.as_str(), URI_COMPONENT)
        )
    }
}

impl FromStr for VirtualDocumentUri {
    type Err = VirtualUriError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Latest text of a virtual document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualDocumentEntry {
    pub text: Arc<str>,
    /// Starts at 1 and grows with every update of the same URI.
    pub version: u64,
}

/// Sent to subscribers once per `update` or `remove` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualDocumentChange {
    pub uri: VirtualDocumentUri,
    /// Version after an update, or the last version before a removal
    /// (0 when nothing was stored).
    pub version: u64,
    pub removed: bool,
}

/// In-memory store of projected documents.
#[derive(Debug, Default)]
pub struct VirtualDocumentStore {
    documents: DashMap<VirtualDocumentUri, VirtualDocumentEntry>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<VirtualDocumentChange>>>,
}

impl VirtualDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the text stored under `uri` and returns its new version.
    ///
    /// Subscribers are notified while the entry is still held, so changes to
    /// one URI arrive in version order.
    pub fn update(&self, uri: VirtualDocumentUri, text: impl Into<Arc<str>>) -> u64 {
        let text = text.into();
        let mut entry = self
            .documents
            .entry(uri.clone())
            .or_insert_with(|| VirtualDocumentEntry {
                text: Arc::from(""),
                version: 0,
            });
        entry.version += 1;
        entry.text = text;
        let version = entry.version;
        trace!("Updated {} to version {}", uri, version);
        self.notify(VirtualDocumentChange {
            uri,
            version,
            removed: false,
        });
        version
    }

    /// Drops `uri`. Removing an unknown URI is not an error but still
    /// notifies subscribers.
    pub fn remove(&self, uri: &VirtualDocumentUri) -> Option<VirtualDocumentEntry> {
        let removed = match self.documents.entry(uri.clone()) {
            Entry::Occupied(occupied) => {
                self.notify(VirtualDocumentChange {
                    uri: uri.clone(),
                    version: occupied.get().version,
                    removed: true,
                });
                let (_, entry) = occupied.remove_entry();
                Some(entry)
            }
            Entry::Vacant(_vacant) => {
                self.notify(VirtualDocumentChange {
                    uri: uri.clone(),
                    version: 0,
                    removed: true,
                });
                None
            }
        };
        debug!("Removed {} (present: {})", uri, removed.is_some());
        removed
    }

    pub fn get(&self, uri: &VirtualDocumentUri) -> Option<VirtualDocumentEntry> {
        self.documents.get(uri).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, uri: &VirtualDocumentUri) -> bool {
        self.documents.contains_key(uri)
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Registers a new listener. Dropping the receiver unsubscribes it.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<VirtualDocumentChange> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }

    fn notify(&self, change: VirtualDocumentChange) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(change.clone()).is_ok());
    }
}

//! The mdsvex language server
//!
//! Keeps every open document as a rope, re-projects its Markdown and Svelte
//! views after each change and publishes them through the virtual document
//! store. Classification and projection run inline on the handler: each one
//! is a single linear scan of one file.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::json;
use tokio::sync::RwLock;
use tower_lsp::jsonrpc::{Error, ErrorCode, Result};
use tower_lsp::lsp_types::{
    DidChangeTextDocumentParams, DidCloseTextDocumentParams, DidOpenTextDocumentParams, InitializeParams,
    InitializeResult, InitializedParams, MessageType, ServerCapabilities, ServerInfo, TextDocumentSyncCapability,
    TextDocumentSyncKind, Url,
};
use tower_lsp::{Client, LanguageServer};
use tracing::{debug, info, warn};

use super::protocol::{
    ClassifyParams, ClassifyResult, VirtualDocumentDidChange, VirtualDocumentParams, VirtualDocumentResult,
    VIRTUAL_DOCUMENT_NOT_FOUND,
};
use crate::config::ServerConfig;
use crate::document::{OpenDocument, TextDocument};
use crate::grammar::{GrammarLoadError, GrammarProvider};
use crate::language_regions::{
    ClassificationError, LanguageRegions, RegionTag, VirtualDocumentStore, VirtualDocumentUri,
};

pub struct MdsvexBackend {
    client: Client,
    config: ServerConfig,
    grammar: Arc<GrammarProvider>,
    documents: Arc<RwLock<HashMap<Url, OpenDocument>>>,
    store: Arc<VirtualDocumentStore>,
    forwarding: AtomicBool,
}

impl MdsvexBackend {
    pub fn new(client: Client, config: ServerConfig) -> Self {
        let grammar = Arc::new(GrammarProvider::new(config.registry(), config.scope_name.clone()));
        Self {
            client,
            config,
            grammar,
            documents: Arc::new(RwLock::new(HashMap::new())),
            store: Arc::new(VirtualDocumentStore::new()),
            forwarding: AtomicBool::new(false),
        }
    }

    pub fn store(&self) -> &Arc<VirtualDocumentStore> {
        &self.store
    }

    async fn regions(&self) -> std::result::Result<LanguageRegions, GrammarLoadError> {
        let grammar = self.grammar.load().await?;
        Ok(LanguageRegions::with_sentinel(grammar, self.config.embedded_scope.as_str()))
    }

    /// Forwards store changes to the client as notifications. Runs once.
    fn start_forwarding_changes(&self) {
        if self.forwarding.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut changes = self.store.subscribe();
        let client = self.client.clone();
        tokio::spawn(async move {
            while let Some(change) = changes.recv().await {
                client.send_notification::<VirtualDocumentDidChange>(change.into()).await;
            }
            debug!("Virtual document change stream closed");
        });
    }

    /// Projects both views of `document` into the store.
    async fn publish_views(&self, document: &OpenDocument) {
        let regions = match self.regions().await {
            Ok(regions) => regions,
            Err(e) => {
                warn!("Not projecting {}: {}", document.uri, e);
                return;
            }
        };
        for uri in VirtualDocumentUri::pair(&document.uri) {
            match regions.project(&document.text, uri.region()) {
                Ok(text) => {
                    let version = self.store.update(uri.clone(), text);
                    debug!("Published {} version {}", uri, version);
                }
                Err(e) => warn!("Failed to project {}: {}", uri, e),
            }
        }
    }

    /// Handler for `mdsvex/classify`.
    pub async fn classify(&self, params: ClassifyParams) -> Result<ClassifyResult> {
        let uri = params.text_document.uri;
        let regions = self.regions().await.map_err(grammar_error)?;

        let documents = self.documents.read().await;
        let document = documents
            .get(&uri)
            .ok_or_else(|| Error::invalid_params(format!("document {} is not open", uri)))?;
        let offset = document
            .text
            .offset_at(params.position)
            .ok_or_else(|| Error::invalid_params(format!("position {:?} is outside {}", params.position, uri)))?;

        let region = regions.classify(&document.text, offset).map_err(classification_error)?;
        debug!("{}:{}:{} is {:?}", uri, params.position.line, params.position.character, region);
        Ok(ClassifyResult {
            region,
            virtual_uri: VirtualDocumentUri::new(uri.clone(), region).to_string(),
        })
    }

    /// Handler for `mdsvex/virtualDocument`.
    pub async fn virtual_document(&self, params: VirtualDocumentParams) -> Result<VirtualDocumentResult> {
        let uri = VirtualDocumentUri::parse(&params.uri).map_err(|e| Error::invalid_params(e.to_string()))?;
        let entry = self.store.get(&uri).ok_or_else(|| Error {
            code: ErrorCode::ServerError(VIRTUAL_DOCUMENT_NOT_FOUND),
            message: format!("virtual document {} not found", params.uri).into(),
            data: None,
        })?;
        Ok(VirtualDocumentResult {
            text: entry.text.to_string(),
            version: entry.version,
        })
    }
}

fn grammar_error(error: GrammarLoadError) -> Error {
    Error {
        code: ErrorCode::InternalError,
        message: format!("grammar unavailable: {}", error).into(),
        data: None,
    }
}

fn classification_error(error: ClassificationError) -> Error {
    match error {
        ClassificationError::OffsetOutOfRange { .. } => Error::invalid_params(error.to_string()),
        other => Error {
            code: ErrorCode::InternalError,
            message: other.to_string().into(),
            data: None,
        },
    }
}

#[tower_lsp::async_trait]
impl LanguageServer for MdsvexBackend {
    async fn initialize(&self, _: InitializeParams) -> Result<InitializeResult> {
        Ok(InitializeResult {
            capabilities: ServerCapabilities {
                text_document_sync: Some(TextDocumentSyncCapability::Kind(TextDocumentSyncKind::INCREMENTAL)),
                experimental: Some(json!({
                    "mdsvex": {
                        "classify": true,
                        "virtualDocuments": [RegionTag::Host.language(), RegionTag::Embedded.language()],
                    }
                })),
                ..Default::default()
            },
            server_info: Some(ServerInfo {
                name: env!("CARGO_PKG_NAME").to_string(),
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
            }),
        })
    }

    async fn initialized(&self, _: InitializedParams) {
        self.start_forwarding_changes();
        match self.grammar.load().await {
            Ok(grammar) => info!("Grammar '{}' ready", grammar.scope_name()),
            Err(e) => {
                warn!("Grammar failed to load: {}", e);
                self.client
                    .show_message(MessageType::ERROR, format!("mdsvex grammar failed to load: {}", e))
                    .await;
            }
        }
    }

    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }

    async fn did_open(&self, params: DidOpenTextDocumentParams) {
        let item = params.text_document;
        info!("Opened {} (version {})", item.uri, item.version);
        let document = OpenDocument::new(item.uri.clone(), item.version, &item.text);

        let mut documents = self.documents.write().await;
        self.publish_views(&document).await;
        documents.insert(item.uri, document);
    }

    async fn did_change(&self, params: DidChangeTextDocumentParams) {
        let uri = params.text_document.uri;
        let mut documents = self.documents.write().await;
        let Some(document) = documents.get_mut(&uri) else {
            warn!("Change for unopened document {}", uri);
            return;
        };
        if document.apply(&params.content_changes, params.text_document.version) {
            self.publish_views(document).await;
        }
    }

    async fn did_close(&self, params: DidCloseTextDocumentParams) {
        let uri = params.text_document.uri;
        let removed = self.documents.write().await.remove(&uri);
        info!("Closed {} (was open: {})", uri, removed.is_some());
        for virtual_uri in VirtualDocumentUri::pair(&uri) {
            self.store.remove(&virtual_uri);
        }
    }
}

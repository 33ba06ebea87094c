//! Grammar registry and the process-wide grammar provider
//!
//! The provider loads its grammar at most once. Concurrent first callers all
//! await the same in-flight load, and the outcome (grammar or error) is
//! cached for the lifetime of the provider.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::{Grammar, GrammarLoadError, RawGrammar};

/// Scope name of the mixed Markdown/Svelte grammar.
pub const MDSVEX_SCOPE: &str = "text.html.mdsvex";

/// The grammar shipped with the server.
pub const BUNDLED_GRAMMAR: &str = include_str!("../../grammars/mdsvex.tmLanguage.json");

/// Where the JSON for a scope comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrammarSource {
    File(PathBuf),
    Bundled(&'static str),
}

/// Maps scope names to grammar sources.
#[derive(Debug, Clone, Default)]
pub struct GrammarRegistry {
    sources: HashMap<String, GrammarSource>,
}

impl GrammarRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry knowing only the bundled mdsvex grammar.
    pub fn with_bundled() -> Self {
        let mut registry = Self::new();
        registry.register(MDSVEX_SCOPE, GrammarSource::Bundled(BUNDLED_GRAMMAR));
        registry
    }

    /// Registers (or replaces) the source for `scope`.
    pub fn register(&mut self, scope: impl Into<String>, source: GrammarSource) {
        let scope = scope.into();
        debug!("Registering grammar source for '{}': {:?}", scope, source_label(&source));
        self.sources.insert(scope, source);
    }

    pub fn source(&self, scope: &str) -> Option<&GrammarSource> {
        self.sources.get(scope)
    }

    /// Reads, parses and compiles the grammar registered for `scope`.
    pub async fn read(&self, scope: &str) -> Result<Grammar, GrammarLoadError> {
        let source = self.source(scope).ok_or_else(|| GrammarLoadError::UnknownScope {
            scope: scope.to_string(),
        })?;

        let (text, origin) = match source {
            GrammarSource::File(path) => {
                let text = tokio::fs::read_to_string(path).await.map_err(|e| GrammarLoadError::Io {
                    path: path.clone(),
                    source: Arc::new(e),
                })?;
                (text, path.display().to_string())
            }
            GrammarSource::Bundled(text) => (text.to_string(), "<bundled>".to_string()),
        };

        let raw = RawGrammar::from_json(&text).map_err(|e| GrammarLoadError::Parse {
            origin: origin.clone(),
            source: Arc::new(e),
        })?;
        if raw.scope_name != scope {
            warn!(
                "Grammar {} declares scope '{}' but was registered as '{}'",
                origin, raw.scope_name, scope
            );
        }
        Grammar::compile(&raw)
    }
}

fn source_label(source: &GrammarSource) -> String {
    match source {
        GrammarSource::File(path) => path.display().to_string(),
        GrammarSource::Bundled(_) => "<bundled>".to_string(),
    }
}

/// Loads one grammar on first use and hands out the cached instance.
#[derive(Debug)]
pub struct GrammarProvider {
    scope: String,
    registry: GrammarRegistry,
    grammar: OnceCell<Result<Arc<Grammar>, GrammarLoadError>>,
}

impl GrammarProvider {
    pub fn new(registry: GrammarRegistry, scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            registry,
            grammar: OnceCell::new(),
        }
    }

    /// Provider for the bundled mdsvex grammar.
    pub fn bundled() -> Self {
        Self::new(GrammarRegistry::with_bundled(), MDSVEX_SCOPE)
    }

    /// Returns the grammar, loading it on the first call.
    pub async fn load(&self) -> Result<Arc<Grammar>, GrammarLoadError> {
        self.grammar
            .get_or_init(|| async {
                info!("Loading grammar for scope '{}'", self.scope);
                match self.registry.read(&self.scope).await {
                    Ok(grammar) => Ok(Arc::new(grammar)),
                    Err(e) => {
                        warn!("Failed to load grammar for '{}': {}", self.scope, e);
                        Err(e)
                    }
                }
            })
            .await
            .clone()
    }

    /// The grammar if a load has already succeeded.
    pub fn loaded(&self) -> Option<Arc<Grammar>> {
        match self.grammar.get() {
            Some(Ok(grammar)) => Some(Arc::clone(grammar)),
            _ => None,
        }
    }
}

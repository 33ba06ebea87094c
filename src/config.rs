//! Command line and environment configuration

use std::path::PathBuf;

use clap::Parser;
use tracing::debug;

use crate::grammar::{GrammarRegistry, GrammarSource, BUNDLED_GRAMMAR, MDSVEX_SCOPE};
use crate::language_regions::EMBEDDED_SENTINEL;

pub const GRAMMAR_PATH_ENV: &str = "MDSVEX_GRAMMAR_PATH";
pub const EMBEDDED_SCOPE_ENV: &str = "MDSVEX_EMBEDDED_SCOPE";

/// mdsvex language server command line.
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "mdsvex-language-server", version)]
#[command(about = "Routes mdsvex documents to Markdown and Svelte tooling via virtual documents")]
pub struct Args {
    /// tmLanguage JSON grammar to use instead of the bundled one
    #[arg(long, value_name = "PATH")]
    pub grammar: Option<PathBuf>,

    /// Scope name of the document grammar
    #[arg(long, value_name = "SCOPE")]
    pub scope_name: Option<String>,

    /// Scope suffix that marks a token as embedded Svelte
    #[arg(long, value_name = "SCOPE")]
    pub embedded_scope: Option<String>,

    /// Log filter for stderr (overrides RUST_LOG)
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Disable ANSI colors on stderr
    #[arg(long)]
    pub no_color: bool,

    /// Do not write a session log to the cache directory
    #[arg(long)]
    pub no_file_logging: bool,

    /// Communicate over stdio (the only transport; accepted for client compatibility)
    #[arg(long)]
    pub stdio: bool,
}

/// Resolved server settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub grammar: GrammarSource,
    pub scope_name: String,
    pub embedded_scope: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            grammar: GrammarSource::Bundled(BUNDLED_GRAMMAR),
            scope_name: MDSVEX_SCOPE.to_string(),
            embedded_scope: EMBEDDED_SENTINEL.to_string(),
        }
    }
}

impl ServerConfig {
    /// Flags win over environment variables, which win over defaults.
    pub fn from_env_or_default(args: &Args) -> Self {
        Self::resolve(args, |key| std::env::var(key).ok())
    }

    fn resolve(args: &Args, env: impl Fn(&str) -> Option<String>) -> Self {
        let lookup = |key: &str| env(key).filter(|value| !value.trim().is_empty());
        let defaults = Self::default();

        let grammar = args
            .grammar
            .clone()
            .or_else(|| lookup(GRAMMAR_PATH_ENV).map(PathBuf::from))
            .map(GrammarSource::File)
            .unwrap_or(defaults.grammar);
        let embedded_scope = args
            .embedded_scope
            .clone()
            .or_else(|| lookup(EMBEDDED_SCOPE_ENV))
            .unwrap_or(defaults.embedded_scope);
        let scope_name = args.scope_name.clone().unwrap_or(defaults.scope_name);

        let config = Self {
            grammar,
            scope_name,
            embedded_scope,
        };
        debug!("Resolved configuration: {:?}", config);
        config
    }

    /// Registry holding the configured grammar under the configured scope.
    pub fn registry(&self) -> GrammarRegistry {
        let mut registry = GrammarRegistry::new();
        registry.register(self.scope_name.clone(), self.grammar.clone());
        registry
    }
}

pub mod config;
pub mod document;
pub mod grammar;
pub mod language_regions;
pub mod logging;
pub mod lsp;

use anyhow::Context;
use clap::Parser;
use tower_lsp::{LspService, Server};
use tracing::info;

use mdsvex_language_server::config::{Args, ServerConfig};
use mdsvex_language_server::logging::init_logger;
use mdsvex_language_server::lsp::protocol::{CLASSIFY_METHOD, VIRTUAL_DOCUMENT_METHOD};
use mdsvex_language_server::lsp::MdsvexBackend;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _guard = init_logger(args.no_color, args.log_level.as_deref(), !args.no_file_logging)
        .context("failed to initialise logging")?;

    let config = ServerConfig::from_env_or_default(&args);
    info!(
        "Starting {} {} (scope '{}', embedded scope '{}')",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        config.scope_name,
        config.embedded_scope
    );

    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();

    let (service, socket) = LspService::build(|client| MdsvexBackend::new(client, config))
        .custom_method(CLASSIFY_METHOD, MdsvexBackend::classify)
        .custom_method(VIRTUAL_DOCUMENT_METHOD, MdsvexBackend::virtual_document)
        .finish();

    Server::new(stdin, stdout, socket).serve(service).await;
    info!("Server stopped");
    Ok(())
}

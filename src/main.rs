use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use booktrack::api::{self, AppState};
use booktrack::config::Config;
use booktrack::isbn::{IsbnLookup, IsbndbClient};
use booktrack::library::{Library, LibrarySettings};
use booktrack::logging;
use booktrack::server::BooksService;
use booktrack::store::sqlite::SqliteBookStore;
use booktrack::store::BookStore;
use rmcp::ServiceExt;

#[derive(Parser)]
#[command(name = "booktrack", version, about = "Personal book collection and reading tracker")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Skip automatic database migration on startup
    #[arg(long)]
    skip_migrate: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the JSON API over HTTP (default)
    Serve {
        /// Listen address, overrides bind_addr from config
        #[arg(long, env = "BOOKTRACK_BIND_ADDR")]
        bind: Option<String>,
    },
    /// Serve the MCP tools over stdio
    Mcp,
    /// Run database migrations and exit
    Migrate,
}

/// Create the ISBN lookup client when an API key is configured.
fn create_isbn_lookup(config: &Config) -> Result<Option<Arc<dyn IsbnLookup>>> {
    match config.isbn.api_key.as_deref().filter(|k| !k.is_empty()) {
        Some(key) => {
            let client = IsbndbClient::new(config.isbn.url_template.clone(), key.to_string())?;
            tracing::info!("ISBN lookup enabled");
            Ok(Some(Arc::new(client)))
        }
        None => {
            tracing::info!("ISBN lookup disabled (no BOOKTRACK_ISBN__API_KEY)");
            Ok(None)
        }
    }
}

async fn open_library(config: &Config, run_migrations: bool) -> Result<Library> {
    let store = SqliteBookStore::new(&config.db_path, run_migrations)
        .await
        .context("Failed to initialize database")?;
    tracing::info!(db_path = %config.db_path, "SQLite store initialized");

    Ok(Library::new(
        Arc::new(store) as Arc<dyn BookStore>,
        LibrarySettings::from(config),
        create_isbn_lookup(config)?,
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Parse CLI args
    let cli = Cli::parse();

    // 2. Load configuration
    let config = Config::load().unwrap_or_else(|e| {
        eprintln!("Config error (using defaults): {}", e);
        Config::default()
    });

    // 3. Initialize logging FIRST (before any other output)
    // stdout is reserved for JSON-RPC in mcp mode
    logging::init_logging(&config);

    let run_migrations = !cli.skip_migrate;

    match cli.command.unwrap_or(Commands::Serve { bind: None }) {
        Commands::Migrate => {
            tracing::info!("Running database migrations...");
            SqliteBookStore::new(&config.db_path, true)
                .await
                .context("Failed to connect and run migrations")?;
            println!("Migrations completed successfully.");
        }

        Commands::Mcp => {
            tracing::info!(version = env!("CARGO_PKG_VERSION"), "booktrack MCP server starting");
            let library = open_library(&config, run_migrations).await?;
            let service = BooksService::new(Arc::new(library));

            let (stdin, stdout) = rmcp::transport::io::stdio();
            let server = service.serve((stdin, stdout)).await?;

            tracing::info!("booktrack MCP server running, awaiting tool calls via stdio");

            // Wait for shutdown (client disconnects)
            server.waiting().await?;

            tracing::info!("booktrack MCP server stopped");
        }

        Commands::Serve { bind } => {
            tracing::info!(version = env!("CARGO_PKG_VERSION"), "booktrack API starting");
            let library = open_library(&config, run_migrations).await?;
            if config.api_key.is_none() {
                tracing::warn!("No api_key configured; the API accepts unauthenticated requests");
            }

            let bind_addr = bind.unwrap_or_else(|| config.bind_addr.clone());
            let state = AppState::new(library, config.api_key.clone());
            api::start_server(state, &bind_addr).await?;
        }
    }

    Ok(())
}

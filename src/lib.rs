pub mod accounts;
pub mod api;
pub mod auth;
pub mod chat;
pub mod cleanup;
pub mod cli;
pub mod db;
pub mod documents;
pub mod jwt;
pub mod password;
pub mod rate_limit;
pub mod usage;

use accounts::AccountService;
use api::{ApiContext, create_api_router, health};
use axum::{Router, routing::get};
use chat::{ChatSettings, MemoryEngine, RagEngine, SessionFactory};
use db::Database;
use documents::{DocumentLibrary, IndexerCommand};
use jwt::JwtConfig;
use rate_limit::RateLimitConfig;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use usage::UsageClient;

pub struct ServerConfig {
    /// Database connection (cloneable, uses connection pool internally)
    pub db: Database,
    /// JWT secret for signing tokens
    pub jwt_secret: Vec<u8>,
    /// bcrypt work factor for new password hashes
    pub bcrypt_cost: u32,
    /// Answer engine over the shared document corpus
    pub rag: Arc<dyn RagEngine>,
    /// Per-user conversational memory
    pub memory: Arc<dyn MemoryEngine>,
    pub chat: ChatSettings,
    /// Directory holding the PDF library
    pub documents_dir: PathBuf,
    /// Program that rebuilds the RAG index
    pub indexer: IndexerCommand,
    /// Billing API client for the usage/cost report
    pub usage: Arc<UsageClient>,
    pub rate_limit: RateLimitConfig,
    /// Whether new user signups are disabled
    pub no_signup: bool,
}

/// Create the application router with the given configuration.
pub fn create_app(config: &ServerConfig) -> Router {
    let jwt = Arc::new(JwtConfig::new(&config.jwt_secret));

    let ctx = ApiContext {
        db: config.db.clone(),
        jwt: jwt.clone(),
        accounts: AccountService::new(config.db.clone(), jwt, config.bcrypt_cost),
        sessions: Arc::new(SessionFactory::new(
            config.rag.clone(),
            config.memory.clone(),
            config.chat.clone(),
        )),
        library: Arc::new(DocumentLibrary::new(
            config.documents_dir.clone(),
            config.indexer.clone(),
        )),
        usage: config.usage.clone(),
        rate_limit_config: Arc::new(config.rate_limit.clone()),
        no_signup: config.no_signup,
    };

    Router::new()
        .route("/", get(health))
        .nest("/api", create_api_router(ctx))
}

/// Run cleanup tasks and spawn background scheduler.
/// Call this before starting the server.
pub async fn init_cleanup(db: &Database) {
    cleanup::run_cleanup(db).await;
    cleanup::spawn_cleanup_scheduler(db.clone());
}

/// Run the server on the given listener. This function blocks until the server exits.
/// Call `init_cleanup` before this to run cleanup on startup.
pub async fn run_server(config: ServerConfig, listener: TcpListener) -> Result<(), std::io::Error> {
    let app = create_app(&config);
    let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, make_service).await
}

/// Start the server on the given port in a background task. Use port 0 to let the OS choose a random port.
/// Returns the actual address the server is listening on.
/// Note: For production use, prefer `run_server` directly in main.
pub async fn start_server(
    config: ServerConfig,
    port: u16,
) -> Result<(tokio::task::JoinHandle<()>, SocketAddr), std::io::Error> {
    init_cleanup(&config.db).await;

    let listener = TcpListener::bind(("127.0.0.1", port)).await?;
    let local_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = run_server(config, listener).await {
            tracing::error!(error = %e, "Server error");
        }
    });

    Ok((handle, local_addr))
}

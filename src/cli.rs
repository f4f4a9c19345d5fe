//! CLI argument parsing, validation, and startup helpers.

use crate::ServerConfig;
use crate::accounts::normalize_email;
use crate::chat::{ChatSettings, HttpRagEngine, SqlMemoryEngine};
use crate::db::{Database, NewUser};
use crate::documents::IndexerCommand;
use crate::password::{self, hash_password};
use crate::rate_limit::RateLimitConfig;
use crate::usage::{DEFAULT_API_BASE, UsageClient};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use url::Url;
use uuid::Uuid;

const MIN_JWT_SECRET_LENGTH: usize = 32;

#[derive(clap::ValueEnum, Clone, Debug, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "ragdesk",
    about = "Multi-user document question answering with per-user memory"
)]
pub struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "8000")]
    pub port: u16,

    /// Path to SQLite database file
    #[arg(short, long, default_value = "ragdesk.db")]
    pub database: String,

    /// Path to file containing JWT secret. Prefer using JWT_SECRET env var instead
    #[arg(long)]
    pub jwt_secret_file: Option<String>,

    /// Directory holding the PDF library
    #[arg(long, default_value = "data")]
    pub documents_dir: PathBuf,

    /// Program run to rebuild the search index
    #[arg(long, default_value = "python3")]
    pub indexer: String,

    /// Argument passed to the indexer (repeatable)
    #[arg(long = "indexer-arg", allow_hyphen_values = true, default_values_t = vec!["scripts/build_index.py".to_string()])]
    pub indexer_args: Vec<String>,

    /// Seconds before an index rebuild is killed
    #[arg(long, default_value = "300")]
    pub index_timeout_secs: u64,

    /// Base URL of the RAG answer service
    #[arg(long, env = "RAG_URL", default_value = "http://127.0.0.1:8001")]
    pub rag_url: String,

    /// Seconds to wait for the RAG answer service
    #[arg(long, default_value = "120")]
    pub rag_timeout_secs: u64,

    /// Documents retrieved per question
    #[arg(long, default_value = "3")]
    pub top_k: usize,

    /// Memory snippets added to each question
    #[arg(long, default_value = "5")]
    pub memory_limit: usize,

    /// Model name recorded with each exchange
    #[arg(long, env = "CHAT_MODEL")]
    pub model: Option<String>,

    /// Base URL of the billing API used for the usage/cost report
    #[arg(long, default_value = DEFAULT_API_BASE)]
    pub usage_api_base: String,

    /// Admin key for the billing API
    #[arg(long, env = "ADMIN_KEY", hide_env_values = true)]
    pub admin_key: Option<String>,

    /// Organization id sent with billing requests
    #[arg(long, env = "ORG_ID")]
    pub org_id: Option<String>,

    /// Use the left-most X-Forwarded-For entry as the client IP (only behind a trusted proxy)
    #[arg(long)]
    pub trust_forwarded_for: bool,

    /// Disable new user signups (admin creation via --create-admin still works)
    #[arg(long)]
    pub no_signup: bool,

    /// Create (or promote) an admin with this email on startup. Password is read from ADMIN_PASSWORD
    #[arg(long, value_name = "EMAIL")]
    pub create_admin: Option<String>,

    /// Log output format
    #[arg(short, long, default_value = "pretty")]
    pub log_format: LogFormat,
}

/// Initialize logging based on the specified format.
pub fn init_logging(format: &LogFormat) {
    match format {
        LogFormat::Pretty => tracing_subscriber::fmt::init(),
        LogFormat::Json => tracing_subscriber::fmt().json().init(),
        LogFormat::Compact => tracing_subscriber::fmt().compact().init(),
    }
}

/// Read an env var and clear it so child processes never inherit it.
fn take_env(name: &str) -> Option<String> {
    let value = std::env::var(name).ok()?;
    // SAFETY: We're single-threaded at this point during startup,
    // and no other code is reading this environment variable.
    unsafe { std::env::remove_var(name) };
    Some(value)
}

/// Load JWT secret from environment variable or file.
/// Returns None and logs an error if the secret cannot be loaded.
pub fn load_jwt_secret(jwt_secret_file: Option<&str>) -> Option<String> {
    let secret = if let Some(secret) = take_env("JWT_SECRET") {
        secret
    } else if let Some(path) = jwt_secret_file {
        match std::fs::read_to_string(path) {
            Ok(content) => content.trim().to_string(),
            Err(e) => {
                error!(path = %path, error = %e, "Failed to read JWT secret file");
                return None;
            }
        }
    } else {
        error!(
            "JWT secret is required. Set JWT_SECRET environment variable (recommended) or use --jwt-secret-file"
        );
        return None;
    };

    if secret.len() < MIN_JWT_SECRET_LENGTH {
        error!(
            "JWT secret is shorter than {} characters. Use a longer secret",
            MIN_JWT_SECRET_LENGTH
        );
        return None;
    }

    Some(secret)
}

/// Parse the base URL of an outbound service.
/// Returns None and logs an error if it is not an absolute http(s) URL.
pub fn validate_service_url(name: &str, value: &str) -> Option<Url> {
    let url = match Url::parse(value) {
        Ok(url) => url,
        Err(e) => {
            error!(service = name, url = %value, error = %e, "Invalid service URL");
            return None;
        }
    };

    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        error!(service = name, url = %value, "Service URL must be http(s) with a host");
        return None;
    }

    Some(url)
}

/// Handle the --create-admin flag: promote an existing account or create a new admin.
/// Returns false and logs an error if the admin could not be set up.
pub async fn handle_create_admin(db: &Database, email: &str) -> bool {
    let email = match normalize_email(email) {
        Ok(email) => email,
        Err(e) => {
            error!(email = %email, error = %e, "Invalid admin email");
            return false;
        }
    };

    match db.users().get_by_email(&email).await {
        Ok(Some(existing)) => {
            if existing.is_admin {
                info!(email = %email, "Admin already exists");
                return true;
            }
            match db.users().set_admin(&existing.id, true).await {
                Ok(_) => {
                    info!(email = %email, user_id = %existing.id, "Promoted existing user to admin");
                    true
                }
                Err(e) => {
                    error!(error = %e, "Failed to promote user to admin");
                    false
                }
            }
        }
        Ok(None) => {
            let Some(admin_password) = take_env("ADMIN_PASSWORD") else {
                error!("ADMIN_PASSWORD must be set to create a new admin");
                return false;
            };
            if admin_password.is_empty() || !password::within_limit(&admin_password) {
                error!(
                    "ADMIN_PASSWORD must be between 1 and {} bytes",
                    password::MAX_PASSWORD_BYTES
                );
                return false;
            }

            let password_hash = match hash_password(&admin_password, password::DEFAULT_COST) {
                Ok(hash) => hash,
                Err(e) => {
                    error!(error = %e, "Failed to hash admin password");
                    return false;
                }
            };

            let id = Uuid::new_v4().to_string();
            let new_user = NewUser {
                id: &id,
                email: &email,
                password_hash: &password_hash,
                display_name: None,
                is_admin: true,
            };

            match db.users().create(new_user).await {
                Ok(user) => {
                    info!(email = %user.email, user_id = %user.id, "Admin user created");
                    true
                }
                Err(e) => {
                    error!(error = %e, "Failed to create admin user");
                    false
                }
            }
        }
        Err(e) => {
            error!(error = %e, "Failed to check for existing admin");
            false
        }
    }
}

/// Build ServerConfig from validated arguments.
/// Returns None and logs an error if an outbound client cannot be built.
pub fn build_config(args: Args, db: Database, jwt_secret: String) -> Option<ServerConfig> {
    let rag_url = validate_service_url("rag", &args.rag_url)?;
    let usage_api_base = validate_service_url("usage", &args.usage_api_base)?;

    let rag = match HttpRagEngine::new(rag_url.as_str(), Duration::from_secs(args.rag_timeout_secs)) {
        Ok(rag) => rag,
        Err(e) => {
            error!(url = %args.rag_url, error = %e, "Failed to build RAG client");
            return None;
        }
    };

    let usage = match UsageClient::new(usage_api_base.as_str(), args.admin_key, args.org_id) {
        Ok(usage) => usage,
        Err(e) => {
            error!(error = %e, "Failed to build usage client");
            return None;
        }
    };
    if !usage.is_configured() {
        info!("ADMIN_KEY not set, usage/cost report disabled");
    }

    let memory = SqlMemoryEngine::new(db.clone());

    Some(ServerConfig {
        db,
        jwt_secret: jwt_secret.into_bytes(),
        bcrypt_cost: password::DEFAULT_COST,
        rag: Arc::new(rag),
        memory: Arc::new(memory),
        chat: ChatSettings {
            top_k: args.top_k,
            memory_limit: args.memory_limit,
            model: args.model,
        },
        documents_dir: args.documents_dir,
        indexer: IndexerCommand {
            program: args.indexer,
            args: args.indexer_args,
            timeout: Duration::from_secs(args.index_timeout_secs),
        },
        usage: Arc::new(usage),
        rate_limit: RateLimitConfig::new(args.trust_forwarded_for),
        no_signup: args.no_signup,
    })
}

/// Open the database, logging errors if it fails.
pub async fn open_database(path: &str) -> Option<Database> {
    match Database::open(path).await {
        Ok(db) => {
            info!(path = %path, "Database opened");
            Some(db)
        }
        Err(e) => {
            error!(path = %path, error = %e, "Failed to open database");
            None
        }
    }
}

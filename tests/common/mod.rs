#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    Extension, Router,
    body::Body,
    extract::ConnectInfo,
    http::{Request, StatusCode, header},
};
use governor::Quota;
use ragdesk::chat::{
    ChatSettings, MemoryEngine, RagAnswer, RagEngine, RagError, RagSource, SqlMemoryEngine,
};
use ragdesk::db::{Database, NewUser};
use ragdesk::documents::IndexerCommand;
use ragdesk::jwt::JwtConfig;
use ragdesk::rate_limit::RateLimitConfig;
use ragdesk::usage::UsageClient;
use ragdesk::{ServerConfig, create_app};
use serde_json::Value;
use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

pub const JWT_SECRET: &[u8] = b"test-jwt-secret-that-is-long-enough";

/// Answers with the exact query it received, so tests can see what context
/// was sent for a user.
pub struct EchoRag;

#[async_trait]
impl RagEngine for EchoRag {
    async fn ask(&self, query: &str, top_k: usize) -> Result<RagAnswer, RagError> {
        let sources = (0..top_k.min(2))
            .map(|i| RagSource {
                text: format!("passage {} {}", i, "x".repeat(300)),
                metadata: serde_json::json!({"source": format!("doc{}.pdf", i)}),
                score: 1.0 - i as f64 * 0.1,
            })
            .collect();
        Ok(RagAnswer {
            answer: query.to_string(),
            sources,
            tokens_used: Some(42),
        })
    }
}

pub struct FailingRag;

#[async_trait]
impl RagEngine for FailingRag {
    async fn ask(&self, _query: &str, _top_k: usize) -> Result<RagAnswer, RagError> {
        Err(RagError::Request("connection refused".into()))
    }
}

pub struct TestApp {
    pub app: Router,
    pub db: Database,
    pub jwt: JwtConfig,
    pub docs: TempDir,
}

pub async fn setup() -> TestApp {
    TestSetup::new().build().await
}

/// Builder for test apps with various options
pub struct TestSetup {
    db: Option<Database>,
    rag: Arc<dyn RagEngine>,
    memory: Option<Arc<dyn MemoryEngine>>,
    indexer: IndexerCommand,
    usage: Option<UsageClient>,
    no_signup: bool,
    rate_limit: Option<RateLimitConfig>,
}

impl TestSetup {
    pub fn new() -> Self {
        Self {
            db: None,
            rag: Arc::new(EchoRag),
            memory: None,
            indexer: IndexerCommand {
                program: "sh".to_string(),
                args: vec!["-c".to_string(), "echo indexed".to_string()],
                timeout: Duration::from_secs(10),
            },
            usage: None,
            no_signup: false,
            rate_limit: None,
        }
    }

    pub fn with_db(mut self, db: Database) -> Self {
        self.db = Some(db);
        self
    }

    pub fn with_rag(mut self, rag: impl RagEngine + 'static) -> Self {
        self.rag = Arc::new(rag);
        self
    }

    pub fn with_memory(mut self, memory: impl MemoryEngine + 'static) -> Self {
        self.memory = Some(Arc::new(memory));
        self
    }

    pub fn with_indexer(mut self, script: &str, timeout: Duration) -> Self {
        self.indexer = IndexerCommand {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            timeout,
        };
        self
    }

    pub fn with_usage(mut self, usage: UsageClient) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn with_no_signup(mut self, no_signup: bool) -> Self {
        self.no_signup = no_signup;
        self
    }

    pub fn with_rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.rate_limit = Some(rate_limit);
        self
    }

    pub async fn build(self) -> TestApp {
        let db = match self.db {
            Some(db) => db,
            None => Database::open(":memory:")
                .await
                .expect("Failed to open test database"),
        };
        let docs = TempDir::new().expect("Failed to create temp dir");
        let memory = self
            .memory
            .unwrap_or_else(|| Arc::new(SqlMemoryEngine::new(db.clone())));
        let usage = match self.usage {
            Some(usage) => usage,
            None => UsageClient::new("http://127.0.0.1:9", None, None)
                .expect("Failed to build usage client"),
        };

        let config = ServerConfig {
            db: db.clone(),
            jwt_secret: JWT_SECRET.to_vec(),
            bcrypt_cost: ragdesk::password::MIN_COST,
            rag: self.rag,
            memory,
            chat: ChatSettings::default(),
            documents_dir: docs.path().join("data"),
            indexer: self.indexer,
            usage: Arc::new(usage),
            rate_limit: self.rate_limit.unwrap_or_else(generous_rate_limit),
            no_signup: self.no_signup,
        };

        // Oneshot requests carry no socket, so supply the address the
        // rate limiter keys on.
        let app = create_app(&config).layer(Extension(ConnectInfo(SocketAddr::from((
            [127, 0, 0, 1],
            3000,
        )))));

        TestApp {
            app,
            db,
            jwt: JwtConfig::new(JWT_SECRET),
            docs,
        }
    }
}

pub fn generous_rate_limit() -> RateLimitConfig {
    let plenty = NonZeroU32::new(10_000).unwrap();
    RateLimitConfig::with_quotas(
        Quota::per_second(plenty),
        Quota::per_second(plenty),
        false,
    )
}

/// Build a JSON request with an optional bearer token.
pub fn json_request(method: &str, uri: &str, token: Option<&str>, body: &Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

/// Build a bodyless request with an optional bearer token.
pub fn empty_request(method: &str, uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::empty()).unwrap()
}

/// Send a request and decode the body as JSON (Null when the body is not JSON).
pub async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, json)
}

/// Sign up through the API and return the response body.
pub async fn signup(app: &Router, email: &str, password: &str) -> Value {
    let (status, body) = send(
        app,
        json_request(
            "POST",
            "/api/auth/signup",
            None,
            &serde_json::json!({"email": email, "password": password}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "signup failed: {}", body);
    body
}

/// Access token for a freshly signed-up user.
pub async fn user_token(app: &Router, email: &str) -> String {
    signup(app, email, "secret123").await["accessToken"]
        .as_str()
        .unwrap()
        .to_string()
}

/// Insert an admin directly and return an access token for them.
pub async fn admin_token(test: &TestApp) -> String {
    let id = uuid::Uuid::new_v4().to_string();
    let email = format!("admin-{}@example.com", &id[..8]);
    test.db
        .users()
        .create(NewUser {
            id: &id,
            email: &email,
            password_hash: "unused",
            display_name: Some("Admin"),
            is_admin: true,
        })
        .await
        .unwrap();
    test.jwt.generate_access_token(&id, &email).unwrap().token
}

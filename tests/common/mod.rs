#![allow(dead_code)]

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use carecrm::{
    ServerConfig,
    auth::{ReplayPolicy, hash_password_with_cost},
    create_app,
    db::{Database, User, UserStatus},
    hub::Hub,
    jwt::JwtConfig,
};
use serde_json::Value;
use tokio::sync::watch;
use tower::ServiceExt;

pub const JWT_SECRET: &[u8] = b"test-jwt-secret-that-is-long-enough";
pub const PASSWORD: &str = "pw";

/// An app over an in-memory database with a live hub.
pub struct TestApp {
    pub app: Router,
    pub db: Database,
    pub jwt: JwtConfig,
    pub hub: Hub,
    // Dropping the sender stops the hub dispatcher
    _shutdown: watch::Sender<bool>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_policy(ReplayPolicy::Reject).await
    }

    pub async fn with_policy(policy: ReplayPolicy) -> Self {
        let db = Database::open(":memory:")
            .await
            .expect("Failed to open test database");
        let mut config = ServerConfig::new(db.clone(), JWT_SECRET);
        config.replay_policy = policy;

        let (tx, rx) = watch::channel(false);
        let (hub, _) = Hub::start(rx);

        Self {
            app: create_app(&config, &hub),
            db,
            jwt: JwtConfig::with_defaults(JWT_SECRET),
            hub,
            _shutdown: tx,
        }
    }

    /// Send a request and return the status and JSON body (Null when empty).
    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).unwrap_or_else(|_| {
                Value::String(String::from_utf8_lossy(&body).into_owned())
            })
        };
        (status, json)
    }

    pub async fn post_json(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.send(json_request("POST", uri, None, body)).await
    }

    pub async fn login(&self, email: &str, password: &str) -> (StatusCode, Value) {
        self.post_json(
            "/auth/login",
            serde_json::json!({ "email": email, "password": password }),
        )
        .await
    }

    /// Log in a seeded user and return its access token.
    pub async fn access_token(&self, email: &str) -> String {
        let (status, body) = self.login(email, PASSWORD).await;
        assert_eq!(status, StatusCode::OK, "login failed: {body}");
        body["token"].as_str().unwrap().to_string()
    }
}

pub fn json_request(method: &str, uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

pub fn authed_request(method: &str, uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap()
}

/// Seed a user whose password is [`PASSWORD`]. Uses the lowest bcrypt cost.
pub async fn seed_user(db: &Database, email: &str, status: UserStatus, role: Option<&str>) -> User {
    let hash = hash_password_with_cost(PASSWORD, 4).unwrap();
    db.users().create(email, &hash, status, role).await.unwrap()
}

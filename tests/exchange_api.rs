use std::io::Write;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{Request, StatusCode, header},
    response::Response,
    Router,
};
use chrono::Utc;
use governor::clock::FakeRelativeClock;
use serde_json::{Value, json};
use tower::ServiceExt;
use zeroize::Zeroizing;

use otp_relay::{
    app::build_router,
    clock::{Clock, ExpiryPolicy, ManualClock},
    config::Config,
    error::Result,
    limiter::MemoryRateLimiter,
    repositories::session::MemorySessionStore,
    services::exchange::Exchange,
    state::AppState,
    storage::{ObjectStore, ObjectSummary},
};

const CLIENT: &str = "198.51.100.20:40000";

/// Bucket stand-in that signs nothing and stores nothing.
struct FakeBucket;

#[async_trait]
impl ObjectStore for FakeBucket {
    async fn presign_put(&self, key: &str, content_type: &str, expires: Duration) -> Result<String> {
        Ok(format!(
            "https://fake.local/{}?put&ct={}&ttl={}",
            key,
            content_type,
            expires.as_secs()
        ))
    }

    async fn presign_get(&self, key: &str, expires: Duration) -> Result<String> {
        Ok(format!("https://fake.local/{}?get&ttl={}", key, expires.as_secs()))
    }

    async fn list(&self, _prefix: &str) -> Result<Vec<ObjectSummary>> {
        Ok(Vec::new())
    }

    async fn delete(&self, _key: &str) -> Result<()> {
        Ok(())
    }

    fn bucket(&self) -> &str {
        "fake-bucket"
    }

    fn region(&self) -> &str {
        "local-1"
    }
}

struct TestContext {
    app: Router,
    clock: Arc<ManualClock>,
    limiter_clock: FakeRelativeClock,
    store: Arc<MemorySessionStore>,
}

impl TestContext {
    fn new() -> Self {
        Self::with(|_| {}, false)
    }

    fn with(tweak: impl FnOnce(&mut Config), with_bucket: bool) -> Self {
        let mut config = Config::default();
        tweak(&mut config);

        let clock = Arc::new(ManualClock::new(Utc::now()));
        let dyn_clock: Arc<dyn Clock> = clock.clone();
        let store = Arc::new(MemorySessionStore::new(ExpiryPolicy::new(config.session_ttl)));
        let exchange = Exchange::new(
            store.clone(),
            config.code_format.clone(),
            dyn_clock.clone(),
            config.unique_codes,
        );
        let limiter_clock = FakeRelativeClock::default();
        let limiter = Arc::new(MemoryRateLimiter::with_clock(
            config.rate_limits,
            limiter_clock.clone(),
        ));
        let objects: Option<Arc<dyn ObjectStore>> = if with_bucket {
            Some(Arc::new(FakeBucket))
        } else {
            None
        };

        let state = AppState {
            config: Arc::new(config),
            exchange: Some(exchange),
            limiter,
            objects,
            clock: dyn_clock,
            http: reqwest::Client::new(),
        };

        Self {
            app: build_router(state),
            clock,
            limiter_clock,
            store,
        }
    }

    fn advance(&self, by: Duration) {
        self.clock.advance(by);
        self.limiter_clock.advance(by);
    }

    async fn call(&self, mut req: Request<Body>, peer: &str) -> Response {
        req.extensions_mut()
            .insert(ConnectInfo(peer.parse::<SocketAddr>().unwrap()));
        self.app.clone().oneshot(req).await.unwrap()
    }

    async fn send(&self, body: Value) -> Response {
        let req = Request::builder()
            .method("POST")
            .uri("/api/v1/user/send")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.call(req, CLIENT).await
    }

    async fn get(&self, uri: &str) -> Response {
        let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
        self.call(req, CLIENT).await
    }

    async fn receive(&self, code: &str) -> Response {
        self.get(&format!("/api/v1/user/receive?userCode={}", code)).await
    }
}

async fn json_body(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn deposit_then_receive() {
    let ctx = TestContext::new();

    let response = ctx.send(json!({ "content": "482913" })).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = json_body(response).await;
    assert_eq!(body["message"], "content was stored in database");
    let code = body["code"].as_str().unwrap().to_string();
    assert_eq!(code.len(), 4);
    assert!(code.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));

    let response = ctx.receive(&code).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["message"], "here's your data");
    assert_eq!(body["data"][0]["content"], "482913");
    assert_eq!(body["data"][0]["code"], code.as_str());
    assert!(body["data"][0]["createdAt"].is_string());

    // Reads do not consume.
    assert_eq!(ctx.receive(&code).await.status(), StatusCode::OK);
}

#[tokio::test]
async fn empty_content_is_accepted() {
    let ctx = TestContext::new();
    let response = ctx.send(json!({ "content": "" })).await;
    assert_eq!(response.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn malformed_deposits_are_validation_errors() {
    let ctx = TestContext::new();

    for body in [json!({}), json!({ "content": 42 }), json!({ "text": "hi" })] {
        let response = ctx.send(body).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let body = json_body(response).await;
        assert!(body["errors"]["content"].is_array());
    }

    let req = Request::builder()
        .method("POST")
        .uri("/api/v1/user/send")
        .header(header::CONTENT_TYPE, "text/plain")
        .body(Body::from("content=hi"))
        .unwrap();
    assert_eq!(ctx.call(req, CLIENT).await.status(), StatusCode::FORBIDDEN);
    assert!(ctx.store.is_empty().await);
}

#[tokio::test]
async fn oversized_content_is_rejected() {
    let ctx = TestContext::with(|c| c.max_content_bytes = 8, false);
    let response = ctx.send(json!({ "content": "123456789" })).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(ctx.store.is_empty().await);
}

#[tokio::test]
async fn body_over_the_limit_reports_the_content_cap() {
    let ctx = TestContext::with(|c| c.max_content_bytes = 8, false);

    let response = ctx.send(json!({ "content": "x".repeat(100) })).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = json_body(response).await;
    let messages = body["errors"]["content"].as_array().unwrap();
    assert!(messages[0].as_str().unwrap().contains("at most 8 bytes"));
    assert!(ctx.store.is_empty().await);
}

#[tokio::test]
async fn malformed_codes_are_rejected_before_lookup() {
    let ctx = TestContext::new();

    for code in ["ABC", "ABCDE", "abcd", "AB%2D1", ""] {
        let response = ctx.receive(code).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN, "code {:?}", code);
        let body = json_body(response).await;
        assert!(body["errors"]["userCode"].is_array());
    }

    let response = ctx.get("/api/v1/user/receive").await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn unknown_code_is_not_found() {
    let ctx = TestContext::new();
    let response = ctx.receive("ZZZZ").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn sessions_expire_after_the_ttl() {
    let ctx = TestContext::new();
    let body = json_body(ctx.send(json!({ "content": "short lived" })).await).await;
    let code = body["code"].as_str().unwrap().to_string();

    ctx.clock.advance(Duration::from_secs(120));
    assert_eq!(ctx.receive(&code).await.status(), StatusCode::OK);

    ctx.clock.advance(Duration::from_secs(1));
    assert_eq!(ctx.receive(&code).await.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn eleventh_send_is_rate_limited() {
    let ctx = TestContext::new();

    for i in 0..10 {
        let response = ctx.send(json!({ "content": format!("n{}", i) })).await;
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers()["ratelimit-limit"], "10");
        assert_eq!(
            response.headers()["ratelimit-remaining"],
            (9 - i).to_string().as_str()
        );
    }

    let response = ctx.send(json!({ "content": "one too many" })).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers()[header::RETRY_AFTER], "90");
    assert_eq!(response.headers()["ratelimit-policy"], "10;w=900");
    let body = json_body(response).await;
    assert_eq!(body["retryAfter"], 90);
    assert_eq!(ctx.store.len().await, 10);

    // Receive draws from its own budget.
    assert_eq!(ctx.receive("ZZZZ").await.status(), StatusCode::NOT_FOUND);

    ctx.advance(Duration::from_secs(901));
    let response = ctx.send(json!({ "content": "next window" })).await;
    assert_eq!(response.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn budgets_are_per_client() {
    let ctx = TestContext::with(|c| c.rate_limits.send = 1, false);

    let first = Request::builder()
        .method("POST")
        .uri("/api/v1/user/send")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"content":"a"}"#))
        .unwrap();
    assert_eq!(ctx.call(first, "192.0.2.1:1").await.status(), StatusCode::CREATED);

    let second = Request::builder()
        .method("POST")
        .uri("/api/v1/user/send")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"content":"b"}"#))
        .unwrap();
    assert_eq!(ctx.call(second, "192.0.2.2:1").await.status(), StatusCode::CREATED);

    assert_eq!(
        ctx.send(json!({ "content": "c" })).await.status(),
        StatusCode::CREATED
    );
    assert_eq!(
        ctx.send(json!({ "content": "d" })).await.status(),
        StatusCode::TOO_MANY_REQUESTS
    );
}

#[tokio::test]
async fn blocked_ip_never_reaches_the_store() {
    let ctx = TestContext::with(
        |c| c.blocked_ips = vec!["198.51.100.20".parse().unwrap()],
        false,
    );

    let response = ctx.send(json!({ "content": "nope" })).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = json_body(response).await;
    assert_eq!(body["error"], "Access Forbidden");
    assert!(ctx.store.is_empty().await);

    assert_eq!(
        ctx.get("/api/v1/user/health").await.status(),
        StatusCode::FORBIDDEN
    );
}

#[tokio::test]
async fn forwarded_for_is_honoured_only_behind_a_proxy() {
    let blocked = || -> Vec<std::net::IpAddr> { vec!["203.0.113.9".parse().unwrap()] };
    let request = || {
        Request::builder()
            .uri("/api/v1/user/health")
            .header("x-forwarded-for", "10.0.0.1, 203.0.113.9")
            .body(Body::empty())
            .unwrap()
    };

    let direct = TestContext::with(|c| c.blocked_ips = blocked(), false);
    assert_eq!(direct.call(request(), CLIENT).await.status(), StatusCode::OK);

    let proxied = TestContext::with(
        |c| {
            c.blocked_ips = blocked();
            c.trust_proxy = true;
        },
        false,
    );
    assert_eq!(
        proxied.call(request(), CLIENT).await.status(),
        StatusCode::FORBIDDEN
    );
}

#[tokio::test]
async fn client_supplied_forwarded_hops_do_not_reset_the_budget() {
    let ctx = TestContext::with(
        |c| {
            c.trust_proxy = true;
            c.rate_limits.send = 1;
        },
        false,
    );

    let mut statuses = Vec::new();
    for i in 0..3 {
        let req = Request::builder()
            .method("POST")
            .uri("/api/v1/user/send")
            .header(header::CONTENT_TYPE, "application/json")
            .header("x-forwarded-for", format!("10.9.9.{}, 198.51.100.20", i))
            .body(Body::from(r#"{"content":"spoof"}"#))
            .unwrap();
        statuses.push(ctx.call(req, "10.0.0.1:443").await.status());
    }

    assert_eq!(
        statuses,
        [
            StatusCode::CREATED,
            StatusCode::TOO_MANY_REQUESTS,
            StatusCode::TOO_MANY_REQUESTS
        ]
    );
}

#[tokio::test]
async fn health_reports_ok() {
    let ctx = TestContext::new();
    let response = ctx.get("/api/v1/user/health").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["ratelimit-limit"], "100");
    let body = json_body(response).await;
    assert_eq!(body["status"], "OK");
}

#[tokio::test]
async fn image_routes_need_a_bucket() {
    let ctx = TestContext::new();
    let response = ctx.get("/api/v1/images/upload-url").await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = json_body(response).await;
    assert_eq!(body["message"], "S3 is not configured");
}

#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn error_logs_carry_the_request_path() {
    let logs = LogBuffer::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let ctx = TestContext::new();
    let response = ctx.get("/api/v1/images/upload-url").await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
    let line = output
        .lines()
        .find(|l| l.contains("Configuration error"))
        .expect("configuration error was logged");
    assert!(line.contains("/api/v1/images/upload-url"), "{}", line);
}

#[tokio::test]
async fn upload_url_uses_defaults_and_temp_prefix() {
    let ctx = TestContext::with(|_| {}, true);

    let response = ctx.get("/api/v1/images/upload-url").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    let key = body["key"].as_str().unwrap();
    assert!(key.starts_with("temp/"));
    assert!(key.ends_with("-image"));
    assert!(body["uploadUrl"]
        .as_str()
        .unwrap()
        .contains("ct=application/octet-stream"));
    assert_eq!(body["contentType"], "application/octet-stream");
    assert_eq!(body["bucket"], "fake-bucket");
    assert_eq!(body["region"], "local-1");
    assert_eq!(body["expiresIn"], 300);

    let response = ctx
        .get("/api/v1/images/upload-url?filename=my%20cat.png&contentType=image/png")
        .await;
    let body = json_body(response).await;
    assert!(body["key"].as_str().unwrap().ends_with("-my_cat.png"));
}

#[tokio::test]
async fn download_url_only_serves_temp_keys() {
    let ctx = TestContext::with(|_| {}, true);

    let response = ctx.get("/api/v1/images/download-url").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = ctx
        .get("/api/v1/images/download-url?key=private/secret.png")
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = ctx
        .get("/api/v1/images/download-url?key=temp/abc-cat.png")
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["expiresIn"], 60);
    assert!(body["downloadUrl"]
        .as_str()
        .unwrap()
        .starts_with("https://fake.local/temp/abc-cat.png"));
}

#[tokio::test]
async fn access_key_guards_image_routes() {
    let ctx = TestContext::with(
        |c| c.access_key = Some(Zeroizing::new("letmein".to_string())),
        true,
    );

    let response = ctx.get("/api/v1/images/upload-url").await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = json_body(response).await;
    assert_eq!(body["message"], "Invalid Access Key");

    let wrong = Request::builder()
        .uri("/api/v1/images/upload-url")
        .header("access-key", "guess")
        .body(Body::empty())
        .unwrap();
    assert_eq!(ctx.call(wrong, CLIENT).await.status(), StatusCode::FORBIDDEN);

    let right = Request::builder()
        .uri("/api/v1/images/upload-url")
        .header("access-key", "letmein")
        .body(Body::empty())
        .unwrap();
    assert_eq!(ctx.call(right, CLIENT).await.status(), StatusCode::OK);

    // The exchange routes stay open.
    assert_eq!(
        ctx.send(json!({ "content": "x" })).await.status(),
        StatusCode::CREATED
    );
}

#[tokio::test]
async fn cors_preflight_allows_configured_origin() {
    let ctx = TestContext::new();
    let req = Request::builder()
        .method("OPTIONS")
        .uri("/api/v1/user/send")
        .header(header::ORIGIN, "http://localhost:5173")
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
        .body(Body::empty())
        .unwrap();
    let response = ctx.call(req, CLIENT).await;
    assert_eq!(
        response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        "http://localhost:5173"
    );

    let req = Request::builder()
        .uri("/api/v1/user/health")
        .header(header::ORIGIN, "https://evil.example")
        .body(Body::empty())
        .unwrap();
    let response = ctx.call(req, CLIENT).await;
    assert!(response
        .headers()
        .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
        .is_none());
}

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::{self, Body},
    http::{header, Method, Request},
    response::Response,
    Router,
};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use storefront_api::{
    auth::{SessionConfig, SessionService},
    build_router,
    config::AppConfig,
    db,
    entities::product::Category,
    errors::ServiceError,
    events::{self, EventSender},
    handlers::AppServices,
    services::{
        catalog::NewProduct,
        delivery::NewAgent,
        gateway::{InitRequest, InitSession, PaymentGateway, ValidationOutcome},
        uploads::LocalImageStore,
    },
    AppState,
};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

pub const ADMIN_KEY: &str = "test-admin-registration-key";
pub const PASSWORD: &str = "secret123";

/// Gateway double: hands out a fake checkout URL and answers validation
/// with whatever the test configured.
pub struct FakeGateway {
    valid: AtomicBool,
    inits: Mutex<Vec<InitRequest>>,
}

impl FakeGateway {
    fn new() -> Self {
        Self {
            valid: AtomicBool::new(true),
            inits: Mutex::new(Vec::new()),
        }
    }

    pub fn set_valid(&self, valid: bool) {
        self.valid.store(valid, Ordering::SeqCst);
    }

    pub fn last_init(&self) -> Option<InitRequest> {
        self.inits.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn init(&self, request: &InitRequest) -> Result<InitSession, ServiceError> {
        self.inits.lock().unwrap().push(request.clone());
        Ok(InitSession {
            gateway_url: format!("https://gateway.test/pay/{}", request.tran_id),
            session_key: Some(format!("session-{}", request.tran_id)),
        })
    }

    async fn validate(&self, _val_id: &str) -> Result<ValidationOutcome, ServiceError> {
        let valid = self.valid.load(Ordering::SeqCst);
        Ok(ValidationOutcome {
            valid,
            status: if valid { "VALID" } else { "INVALID_TRANSACTION" }.to_string(),
            tran_id: None,
            raw: json!({}),
        })
    }
}

/// Full application over a throwaway SQLite file.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub gateway: Arc<FakeGateway>,
    _dir: TempDir,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        let db_path = dir.path().join("storefront_test.db");

        let mut cfg = AppConfig::new(
            format!("sqlite://{}?mode=rwc", db_path.display()),
            "test_access_secret_for_integration_runs_0123456789".to_string(),
            "test_refresh_secret_for_integration_runs_9876543210".to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
            "http://shop.test".to_string(),
            "http://api.test".to_string(),
        );
        cfg.db_max_connections = 4;
        cfg.db_min_connections = 1;
        cfg.upload_dir = dir.path().join("uploads").display().to_string();
        cfg.admin_registration_key = Some(ADMIN_KEY.to_string());
        std::fs::create_dir_all(&cfg.upload_dir).expect("upload dir");

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let db_arc = Arc::new(pool);
        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = Arc::new(EventSender::new(event_tx));
        let event_task = tokio::spawn(events::process_events(event_rx));

        let sessions = Arc::new(SessionService::new(
            SessionConfig::from(&cfg),
            db_arc.clone(),
        ));
        let gateway = Arc::new(FakeGateway::new());
        let images = Arc::new(LocalImageStore::new(&cfg.upload_dir, cfg.max_upload_bytes));

        let services = AppServices::new(
            db_arc.clone(),
            event_sender.clone(),
            sessions.clone(),
            gateway.clone(),
            images,
            &cfg,
        );

        let cors = storefront_api::cors_layer(&cfg).expect("test cors");
        let state = AppState {
            db: db_arc,
            config: Arc::new(cfg),
            event_sender,
            sessions,
            services,
        };
        let router = build_router(state.clone(), cors);

        Self {
            router,
            state,
            gateway,
            _dir: dir,
            _event_task: event_task,
        }
    }

    /// Send a JSON request with an optional bearer token.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(tok) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", tok));
        }
        let body = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(serde_json::to_vec(&json).expect("serialize request body"))
            }
            None => Body::empty(),
        };
        self.send(builder.body(body).expect("request"))
            .await
    }

    /// POST a form-encoded gateway callback.
    pub async fn callback(&self, uri: &str, fields: &[(&str, &str)]) -> Response {
        let encoded = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(fields)
            .finish();
        let request = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(encoded))
            .expect("request");
        self.send(request).await
    }

    pub async fn send(&self, request: Request<Body>) -> Response {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible")
    }

    /// Registers and logs in a customer; returns (id, access token).
    pub async fn customer(&self, email: &str) -> (Uuid, String) {
        let response = self
            .request(
                Method::POST,
                "/api/v1/users/register",
                Some(json!({
                    "name": "Test Customer",
                    "email": email,
                    "password": PASSWORD,
                    "phone": "01700000000",
                    "address": "House 1, Road 2, Dhaka"
                })),
                None,
            )
            .await;
        assert_eq!(response.status(), 201, "customer registration");
        self.login("users", email).await
    }

    /// Registers and logs in an admin; returns (id, access token).
    pub async fn admin(&self, email: &str) -> (Uuid, String) {
        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/v1/admin/register")
            .header(header::CONTENT_TYPE, "application/json")
            .header("x-admin-key", ADMIN_KEY)
            .body(Body::from(
                json!({"name": "Test Admin", "email": email, "password": PASSWORD}).to_string(),
            ))
            .expect("request");
        let response = self.send(request).await;
        assert_eq!(response.status(), 201, "admin registration");
        self.login("admin", email).await
    }

    /// Creates an agent through the service and logs in; returns (id, access token).
    pub async fn deliveryman(&self, email: &str) -> (Uuid, String) {
        self.state
            .services
            .delivery
            .create_agent(NewAgent {
                name: "Test Rider".into(),
                email: email.into(),
                phone: "01800000000".into(),
                password: PASSWORD.into(),
                vehicle_type: Some("Motorbike".into()),
                vehicle_number: None,
            })
            .await
            .expect("create deliveryman");
        self.login("deliveryman", email).await
    }

    pub async fn login(&self, area: &str, email: &str) -> (Uuid, String) {
        let response = self
            .request(
                Method::POST,
                &format!("/api/v1/{}/login", area),
                Some(json!({"email": email, "password": PASSWORD})),
                None,
            )
            .await;
        assert_eq!(response.status(), 200, "{} login", area);
        let body = json_body(response).await;
        let id = body["data"]["user"]["id"]
            .as_str()
            .and_then(|s| Uuid::parse_str(s).ok())
            .expect("user id");
        let token = body["data"]["accessToken"]
            .as_str()
            .expect("access token")
            .to_string();
        (id, token)
    }

    pub async fn product(
        &self,
        name: &str,
        category: Category,
        price: Decimal,
        stock: i32,
        discount: i32,
    ) -> Uuid {
        self.state
            .services
            .products
            .create(NewProduct {
                name: name.to_string(),
                description: format!("{} test product", name),
                price,
                category,
                stock,
                brand: Some("Acme".to_string()),
                discount,
                is_active: true,
                image_url: None,
            })
            .await
            .expect("create product")
            .product
            .id
    }

    pub async fn stock_of(&self, product_id: Uuid) -> i32 {
        self.state
            .services
            .products
            .find(product_id)
            .await
            .expect("product exists")
            .stock
    }
}

pub async fn json_body(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}

/// Decimals serialize as strings; compare numerically.
pub fn decimal(value: &Value) -> Decimal {
    match value {
        Value::String(s) => s.parse().expect("decimal string"),
        Value::Number(n) => n.to_string().parse().expect("decimal number"),
        other => panic!("not a decimal: {other}"),
    }
}

pub fn location(response: &Response) -> String {
    response
        .headers()
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .expect("redirect location")
        .to_string()
}

pub const BOUNDARY: &str = "storefront-test-boundary";

pub fn multipart_body(fields: &[(&str, &str)], image: Option<(&str, &str, &[u8])>) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    if let Some((file_name, content_type, bytes)) = image {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"image\"; filename=\"{file_name}\"\r\nContent-Type: {content_type}\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

pub fn multipart_request(method: Method, uri: &str, token: &str, body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .expect("multipart request")
}

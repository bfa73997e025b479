#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{DefaultBodyLimit, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use contract_audit::auth::{AuthError, Authenticator, StaticTokenAuthenticator};
use contract_audit::history::{HistoryStore, MemoryHistoryStore, PersistenceError};
use contract_audit::model::{AnalysisHistoryItem, AnalysisResult};
use contract_audit::provider::{OpenAiConfig, OpenAiProvider};
use contract_audit::{app, AppState};
use serde_json::{json, Value};
use tokio::net::TcpListener;

pub const ALICE: &str = "tok-alice";
pub const BOB: &str = "tok-bob";

/// Tracks environment variable mutations and restores originals on drop.
pub struct EnvGuard {
    originals: HashMap<String, Option<String>>,
}

impl EnvGuard {
    pub fn new() -> Self {
        Self {
            originals: HashMap::new(),
        }
    }

    pub fn set(&mut self, key: &str, value: &str) {
        self.capture(key);
        std::env::set_var(key, value);
    }

    pub fn set_many(&mut self, entries: &[(&str, &str)]) {
        for (key, value) in entries {
            self.set(key, value);
        }
    }

    pub fn remove(&mut self, key: &str) {
        self.capture(key);
        std::env::remove_var(key);
    }

    fn capture(&mut self, key: &str) {
        if self.originals.contains_key(key) {
            return;
        }
        let original = std::env::var(key).ok();
        self.originals.insert(key.to_string(), original);
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, original) in self.originals.drain() {
            match original {
                Some(value) => std::env::set_var(&key, value),
                None => std::env::remove_var(&key),
            }
        }
    }
}

/// Model output with every checklist rule set to `status`.
pub fn analysis_json(status: &str) -> Value {
    json!({
        "summary": {
            "propertyAddress": "12 Harbour Lane",
            "buyerName": "J. Buyer",
            "sellerName": "S. Seller",
            "purchasePrice": "$450,000",
            "contractDate": "2025-03-01",
            "closingDate": "2025-04-15"
        },
        "checklist": [
            {
                "id": "signatures",
                "ruleName": "Signatures",
                "description": "All parties signed",
                "status": status,
                "notes": "Seller signature missing on page 4",
                "pageReference": 4
            },
            {
                "id": "lead-paint",
                "ruleName": "Lead-Based Paint Disclosure",
                "description": "Required for homes built before 1978",
                "status": "NOT_APPLICABLE",
                "notes": "Built in 1995",
                "pageReference": null
            }
        ],
        "missingItemsEmailDraft": "Hi, please send the signed page 4."
    })
}

/// OpenAI-style chat completion wrapping `content` as the message text.
pub fn chat_reply(content: &Value) -> Value {
    json!({
        "id": "chatcmpl-test",
        "choices": [
            { "index": 0, "message": { "role": "assistant", "content": content.to_string() } }
        ]
    })
}

/// An upload entry whose payload decodes to exactly `decoded_len` bytes.
pub fn pdf_file(name: Option<&str>, decoded_len: usize) -> Value {
    json!({
        "base64": STANDARD.encode(vec![b'%'; decoded_len]),
        "type": "application/pdf",
        "name": name,
    })
}

#[derive(Clone)]
pub struct Gateway {
    pub url: String,
    pub calls: Arc<AtomicUsize>,
    pub last_request: Arc<Mutex<Option<Value>>>,
    pub last_authorization: Arc<Mutex<Option<String>>>,
}

impl Gateway {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<Value> {
        self.last_request.lock().unwrap().clone()
    }
}

#[derive(Clone)]
struct GatewayState {
    status: StatusCode,
    reply: Value,
    gateway: Gateway,
}

async fn completions(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    state.gateway.calls.fetch_add(1, Ordering::SeqCst);
    *state.gateway.last_request.lock().unwrap() = Some(body);
    *state.gateway.last_authorization.lock().unwrap() = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    (state.status, Json(state.reply.clone()))
}

/// Mock chat-completions endpoint answering every call with `reply`.
pub async fn spawn_gateway(status: StatusCode, reply: Value) -> Gateway {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let gateway = Gateway {
        url: format!("http://{}/v1", addr),
        calls: Arc::new(AtomicUsize::new(0)),
        last_request: Arc::new(Mutex::new(None)),
        last_authorization: Arc::new(Mutex::new(None)),
    };
    let router = Router::new()
        .route("/v1/chat/completions", post(completions))
        .layer(DefaultBodyLimit::disable())
        .with_state(GatewayState {
            status,
            reply,
            gateway: gateway.clone(),
        });
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    gateway
}

pub fn provider_for(gateway_url: &str) -> OpenAiProvider {
    OpenAiProvider::new(OpenAiConfig {
        base_url: gateway_url.to_string(),
        api_key: Some("test-key".into()),
        model: "test/model".into(),
        timeout_ms: Some(5000),
    })
    .unwrap()
}

pub fn static_auth() -> StaticTokenAuthenticator {
    StaticTokenAuthenticator::new(HashMap::from([
        (ALICE.to_string(), "alice".to_string()),
        (BOB.to_string(), "bob".to_string()),
    ]))
}

pub fn test_state(gateway_url: &str, store: Arc<dyn HistoryStore>) -> AppState {
    AppState::new(
        Arc::new(provider_for(gateway_url)),
        Arc::new(static_auth()),
        store,
    )
}

pub async fn spawn_app(state: AppState) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = app(state);
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

/// Memory store that counts calls and can be told to fail.
#[derive(Default)]
pub struct RecordingStore {
    pub inner: MemoryHistoryStore,
    pub saves: AtomicUsize,
    pub fail_saves: bool,
    pub fail_lists: bool,
}

impl RecordingStore {
    pub fn failing_saves() -> Self {
        Self {
            fail_saves: true,
            ..Self::default()
        }
    }

    pub fn failing_lists() -> Self {
        Self {
            fail_lists: true,
            ..Self::default()
        }
    }

    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl HistoryStore for RecordingStore {
    fn kind(&self) -> &str {
        "recording"
    }

    async fn save(
        &self,
        user_id: &str,
        file_names: &[String],
        analysis: &AnalysisResult,
    ) -> Result<String, PersistenceError> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        if self.fail_saves {
            return Err(PersistenceError::Transport("connection refused".into()));
        }
        self.inner.save(user_id, file_names, analysis).await
    }

    async fn list_for_user(
        &self,
        user_id: &str,
        limit: Option<u32>,
    ) -> Result<Vec<AnalysisHistoryItem>, PersistenceError> {
        if self.fail_lists {
            return Err(PersistenceError::Rejected("index unavailable".into()));
        }
        self.inner.list_for_user(user_id, limit).await
    }
}

/// Identity backend that is always down.
pub struct OutageAuthenticator;

#[async_trait::async_trait]
impl Authenticator for OutageAuthenticator {
    fn name(&self) -> &str {
        "outage"
    }

    async fn resolve(&self, _headers: &HeaderMap) -> Result<Option<String>, AuthError> {
        Err(AuthError::Unavailable("session backend unreachable".into()))
    }
}

/// Poll `check` for up to two seconds.
pub async fn eventually<F: Fn() -> bool>(check: F) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}

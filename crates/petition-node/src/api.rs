//! HTTP API for the petition page.
//!
//! Visitor-scoped endpoints read the session token from the
//! `x-petition-session` header, open a session when it is missing or unknown,
//! and echo the token back in the same header.

use crate::client::{ClientSession, SESSION_HEADER};
use crate::node::PetitionState;
use crate::session::LoginRequest;
use crate::ws::ws_feed_handler;
use axum::{
    async_trait,
    extract::{FromRequestParts, State},
    http::{request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use petition_core::{
    format_ago, now_millis, Error as CoreError, GateStatus, LoadOutcome, Notice, SignOutcome,
    SignatureRecord, UserProfile,
};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

type AppState = Arc<PetitionState>;

fn session_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|t| !t.is_empty())
}

fn session_header(client: &ClientSession) -> [(&'static str, String); 1] {
    [(SESSION_HEADER, client.token.clone())]
}

/// The caller's session, opened on first use.
pub struct Client(pub Arc<ClientSession>);

#[async_trait]
impl FromRequestParts<AppState> for Client {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        Ok(Self(state.sessions.resolve(session_token(&parts.headers))))
    }
}

/// The caller's session, if it sent a live token.
pub struct MaybeClient(pub Option<Arc<ClientSession>>);

#[async_trait]
impl FromRequestParts<AppState> for MaybeClient {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        Ok(Self(
            session_token(&parts.headers).and_then(|token| state.sessions.get(token)),
        ))
    }
}

/// Build the API router.
pub fn build_router(state: AppState) -> Router {
    // CORS layer for browser access
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let router = Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/api/v1/status", get(get_status))
        // Signatures
        .route("/api/v1/signatures", get(list_signatures))
        .route("/api/v1/signatures/refresh", post(refresh_signatures))
        .route("/api/v1/sign", post(sign))
        // Visitor session and provider handoff
        .route("/api/v1/session/open", post(open_session))
        .route("/api/v1/session", post(complete_login).delete(logout))
        .route("/api/v1/session/error", post(fail_login))
        .route("/api/v1/session/pending", get(pending_login))
        .route("/api/v1/intro/dismiss", post(dismiss_intro))
        // Live feed
        .route("/api/v1/ws/feed", get(ws_feed_handler));

    let router = match &state.config.static_dir {
        Some(dir) => router.fallback_service(ServeDir::new(dir)),
        None => router,
    };

    router
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// --- Health endpoints ---

async fn health() -> &'static str {
    "OK"
}

async fn ready(State(state): State<AppState>) -> StatusCode {
    if state.sessions.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

// --- Status ---

#[derive(Debug, Serialize)]
struct StatusResponse {
    gate: GateStatus,
    remote: bool,
    count: usize,
    notice: Option<Notice>,
    intro_visible: bool,
    login_pending: bool,
}

async fn get_status(
    State(state): State<AppState>,
    MaybeClient(client): MaybeClient,
) -> Json<StatusResponse> {
    let (gate, notice, login_pending) = match &client {
        Some(client) => (
            client.gate.status().await,
            client.notices.current().or_else(|| state.notices.current()),
            client.provider.pending_request().is_some(),
        ),
        None => (
            state.sessions.anonymous_gate().status().await,
            state.notices.current(),
            false,
        ),
    };

    Json(StatusResponse {
        gate,
        remote: state.store.is_remote(),
        count: state.store.len().await,
        notice,
        intro_visible: state.intro.is_visible(),
        login_pending,
    })
}

// --- Signatures ---

/// A signature with its feed age label.
#[derive(Debug, Clone, Serialize)]
pub struct SignatureView {
    #[serde(flatten)]
    pub record: SignatureRecord,
    pub ago: String,
}

impl SignatureView {
    pub fn list(records: Vec<SignatureRecord>) -> Vec<Self> {
        let now = now_millis();
        records
            .into_iter()
            .map(|record| Self::at(record, now))
            .collect()
    }

    pub fn at(record: SignatureRecord, now: u64) -> Self {
        let ago = format_ago(record.timestamp, now);
        Self { record, ago }
    }
}

async fn list_signatures(State(state): State<AppState>) -> Json<Vec<SignatureView>> {
    Json(SignatureView::list(state.store.records().await))
}

#[derive(Debug, Serialize)]
struct RefreshResponse {
    outcome: &'static str,
    count: usize,
}

async fn refresh_signatures(
    State(state): State<AppState>,
) -> Result<Json<RefreshResponse>, (StatusCode, Json<Notice>)> {
    let outcome = match state.refresh().await {
        Ok(LoadOutcome::Local) => "local",
        Ok(LoadOutcome::Replaced(_)) => "replaced",
        Ok(LoadOutcome::Stale) => "stale",
        Err(_) => {
            let notice = state.notices.current().unwrap_or_else(|| {
                Notice::error("Could not load signatures from the shared store.")
            });
            return Err((StatusCode::BAD_GATEWAY, Json(notice)));
        }
    };

    Ok(Json(RefreshResponse {
        outcome,
        count: state.store.len().await,
    }))
}

// --- Sign ---

#[derive(Debug, Serialize)]
struct SignResponse {
    outcome: &'static str,
    signature: Option<SignatureRecord>,
    shared: Option<bool>,
    notice: Notice,
}

fn outcome_name(outcome: &SignOutcome) -> &'static str {
    match outcome {
        SignOutcome::NotConfigured => "not_configured",
        SignOutcome::ProviderBooting => "provider_booting",
        SignOutcome::LoginCompleted { .. } => "login_completed",
        SignOutcome::LoginFailed { .. } => "login_failed",
        SignOutcome::AlreadySigned => "already_signed",
        SignOutcome::Signed { .. } => "signed",
        SignOutcome::AppendFailed { .. } => "append_failed",
    }
}

/// HTTP status for a failed sign attempt.
fn error_status(err: &CoreError) -> StatusCode {
    match err {
        CoreError::Configuration(_) | CoreError::ProviderNotReady => StatusCode::SERVICE_UNAVAILABLE,
        CoreError::Auth(_) => StatusCode::UNAUTHORIZED,
        CoreError::RemoteRead(_) | CoreError::RemoteWrite(_) => StatusCode::BAD_GATEWAY,
        CoreError::LocalParse(_) | CoreError::Cache(_) | CoreError::Serialization(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

async fn sign(Client(client): Client) -> Response {
    let outcome = client.gate.sign().await;
    let notice = outcome.notice();

    // The configuration error is a standing status, not a transient notice.
    if outcome != SignOutcome::NotConfigured {
        client.notices.show(notice.clone());
    }

    let status = match outcome.error() {
        Some(err) => {
            tracing::debug!(error = %err, "sign attempt failed");
            error_status(&err)
        }
        None => StatusCode::OK,
    };

    let (signature, shared) = match &outcome {
        SignOutcome::Signed { record, shared } => (Some(record.clone()), Some(*shared)),
        _ => (None, None),
    };

    let body = SignResponse {
        outcome: outcome_name(&outcome),
        signature,
        shared,
        notice,
    };
    (status, session_header(&client), Json(body)).into_response()
}

// --- Session handoff ---

#[derive(Debug, Serialize)]
struct SessionResponse {
    token: String,
}

async fn open_session(State(state): State<AppState>) -> Response {
    let client = state.sessions.open();
    let body = SessionResponse {
        token: client.token.clone(),
    };
    (session_header(&client), Json(body)).into_response()
}

#[derive(Debug, Serialize)]
struct HandoffResponse {
    token: String,
    resolved_pending: bool,
}

async fn complete_login(Client(client): Client, Json(profile): Json<UserProfile>) -> Response {
    let body = HandoffResponse {
        token: client.token.clone(),
        resolved_pending: client.provider.complete_login(profile),
    };
    (session_header(&client), Json(body)).into_response()
}

#[derive(Debug, Deserialize)]
struct LoginErrorRequest {
    reason: String,
}

async fn fail_login(Client(client): Client, Json(req): Json<LoginErrorRequest>) -> Response {
    let body = HandoffResponse {
        token: client.token.clone(),
        resolved_pending: client.provider.fail_login(req.reason),
    };
    (session_header(&client), Json(body)).into_response()
}

async fn logout(Client(client): Client) -> Response {
    client.gate.logout().await;
    (StatusCode::NO_CONTENT, session_header(&client)).into_response()
}

async fn pending_login(Client(client): Client) -> Response {
    let pending: Option<LoginRequest> = client.provider.pending_request();
    (session_header(&client), Json(pending)).into_response()
}

async fn dismiss_intro(State(state): State<AppState>) -> StatusCode {
    state.intro.dismiss();
    StatusCode::NO_CONTENT
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientRegistry;
    use crate::config::PetitionConfig;
    use futures_util::StreamExt;
    use petition_core::testing::{MemoryCache, MemoryRowStore};
    use petition_core::SignatureStore;
    use serde_json::{json, Value};
    use std::time::Duration;
    use tokio_tungstenite::tungstenite::Message as WsMessage;

    async fn serve(state: AppState) -> String {
        let app = build_router(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn state_with(app_id: Option<&str>, store: SignatureStore, notice_ttl: Duration) -> AppState {
        let config = PetitionConfig {
            privy_app_id: app_id.map(str::to_string),
            login_timeout: Duration::from_secs(5),
            ..Default::default()
        };
        let store = Arc::new(store);
        let sessions = ClientRegistry::new(config.privy_app_id.clone(), store.clone(), config.login_timeout)
            .with_notice_ttl(notice_ttl);
        sessions.mark_ready();
        Arc::new(PetitionState::with_sessions(config, store, sessions))
    }

    fn state(app_id: Option<&str>, store: SignatureStore) -> AppState {
        state_with(app_id, store, Duration::from_secs(60))
    }

    fn local_store() -> SignatureStore {
        SignatureStore::local(
            Arc::new(MemoryCache::new()),
            SignatureRecord::seeds(now_millis()),
        )
    }

    async fn open_session(client: &reqwest::Client, base: &str) -> String {
        let resp = client
            .post(format!("{}/api/v1/session/open", base))
            .send()
            .await
            .unwrap();
        let header = resp.headers()[SESSION_HEADER].to_str().unwrap().to_string();
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["token"], header);
        header
    }

    async fn post_json(client: &reqwest::Client, url: String, token: &str, body: Value) -> Value {
        client
            .post(url)
            .header(SESSION_HEADER, token)
            .json(&body)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap()
    }

    async fn sign_as(client: &reqwest::Client, base: &str, token: &str) -> (u16, Value) {
        let resp = client
            .post(format!("{}/api/v1/sign", base))
            .header(SESSION_HEADER, token)
            .send()
            .await
            .unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap())
    }

    async fn status_as(client: &reqwest::Client, base: &str, token: Option<&str>) -> Value {
        let mut req = client.get(format!("{}/api/v1/status", base));
        if let Some(token) = token {
            req = req.header(SESSION_HEADER, token);
        }
        req.send().await.unwrap().json().await.unwrap()
    }

    async fn wait_for_pending(client: &reqwest::Client, base: &str, token: &str) -> Value {
        loop {
            let pending: Value = client
                .get(format!("{}/api/v1/session/pending", base))
                .header(SESSION_HEADER, token)
                .send()
                .await
                .unwrap()
                .json()
                .await
                .unwrap();
            if !pending.is_null() {
                return pending;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn lists_seed_signatures_with_ago() {
        let base = serve(state(Some("app"), local_store())).await;
        let list: Vec<Value> = reqwest::get(format!("{}/api/v1/signatures", base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        assert_eq!(list.len(), 4);
        assert_eq!(list[0]["id"], "seed-1");
        assert_eq!(list[0]["ago"], "4 mins ago");
    }

    #[tokio::test]
    async fn sign_without_app_id_is_standing_error() {
        let state = state(None, local_store());
        let base = serve(state.clone()).await;
        let client = reqwest::Client::new();
        let token = open_session(&client, &base).await;

        let (status, resp) = sign_as(&client, &base, &token).await;
        assert_eq!(status, 503);
        assert_eq!(resp["outcome"], "not_configured");
        assert!(state.sessions.get(&token).unwrap().notices.current().is_none());
        assert_eq!(state.store.len().await, 4);

        let status = status_as(&client, &base, None).await;
        assert_eq!(status["gate"]["configured"], false);
    }

    #[tokio::test]
    async fn login_handoff_then_sign() {
        let state = state(Some("app"), local_store());
        let base = serve(state.clone()).await;
        let client = reqwest::Client::new();
        let token = open_session(&client, &base).await;

        // First attempt starts the login and waits for the handoff.
        let attempt = {
            let client = client.clone();
            let base = base.clone();
            let token = token.clone();
            tokio::spawn(async move { sign_as(&client, &base, &token).await })
        };

        let pending = wait_for_pending(&client, &base, &token).await;
        assert_eq!(pending["options"]["methods"], json!(["wallet", "twitter"]));
        assert_eq!(status_as(&client, &base, Some(&token)).await["login_pending"], true);

        let handoff = post_json(
            &client,
            format!("{}/api/v1/session", base),
            &token,
            json!({ "id": "did:privy:1", "twitter": { "username": "tokyo" } }),
        )
        .await;
        assert_eq!(handoff["resolved_pending"], true);
        assert_eq!(handoff["token"], token);

        let (status, first) = attempt.await.unwrap();
        assert_eq!(status, 200);
        assert_eq!(first["outcome"], "login_completed");
        assert_eq!(state.store.len().await, 4);

        let (_, second) = sign_as(&client, &base, &token).await;
        assert_eq!(second["outcome"], "signed");
        assert_eq!(second["shared"], false);
        assert_eq!(second["signature"]["proof"], "Twitter • @tokyo");
        assert_eq!(state.store.len().await, 5);

        let session = state.sessions.get(&token).unwrap();
        assert_eq!(session.notices.current().unwrap().message, second["notice"]["message"]);

        let (_, third) = sign_as(&client, &base, &token).await;
        assert_eq!(third["outcome"], "already_signed");
        assert_eq!(state.store.len().await, 5);
    }

    #[tokio::test]
    async fn login_failure_is_unauthorized() {
        let state = state(Some("app"), local_store());
        let base = serve(state.clone()).await;
        let client = reqwest::Client::new();
        let token = open_session(&client, &base).await;

        let attempt = {
            let client = client.clone();
            let base = base.clone();
            let token = token.clone();
            tokio::spawn(async move { sign_as(&client, &base, &token).await })
        };
        wait_for_pending(&client, &base, &token).await;

        let handoff = post_json(
            &client,
            format!("{}/api/v1/session/error", base),
            &token,
            json!({ "reason": "twitter disabled" }),
        )
        .await;
        assert_eq!(handoff["resolved_pending"], true);

        let (status, resp) = attempt.await.unwrap();
        assert_eq!(status, 401);
        assert_eq!(resp["outcome"], "login_failed");
    }

    #[tokio::test]
    async fn visitors_sign_with_their_own_identity() {
        let state = state(Some("app"), local_store());
        let base = serve(state.clone()).await;
        let client = reqwest::Client::new();

        let alice = open_session(&client, &base).await;
        let bob = open_session(&client, &base).await;
        assert_ne!(alice, bob);

        post_json(&client, format!("{}/api/v1/session", base), &alice, json!({ "id": "alice", "name": "Alice" })).await;

        // Bob is not signed in just because Alice is.
        let bob_status = status_as(&client, &base, Some(&bob)).await;
        assert_eq!(bob_status["gate"]["authenticated"], false);
        let anon_status = status_as(&client, &base, None).await;
        assert_eq!(anon_status["gate"]["authenticated"], false);

        let (_, signed) = sign_as(&client, &base, &alice).await;
        assert_eq!(signed["outcome"], "signed");
        assert_eq!(signed["signature"]["userId"], "alice");

        post_json(&client, format!("{}/api/v1/session", base), &bob, json!({ "id": "bob", "name": "Bob" })).await;
        let (_, signed) = sign_as(&client, &base, &bob).await;
        assert_eq!(signed["outcome"], "signed");
        assert_eq!(signed["signature"]["userId"], "bob");
        assert_eq!(signed["signature"]["name"], "Bob");

        let alice_status = status_as(&client, &base, Some(&alice)).await;
        assert_eq!(alice_status["gate"]["display_name"], "Alice");
        assert_eq!(alice_status["gate"]["already_signed"], true);
        assert_eq!(state.store.len().await, 6);

        // Logging Bob out leaves Alice signed in.
        let resp = client
            .delete(format!("{}/api/v1/session", base))
            .header(SESSION_HEADER, &bob)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 204);
        assert_eq!(status_as(&client, &base, Some(&bob)).await["gate"]["authenticated"], false);
        assert_eq!(status_as(&client, &base, Some(&alice)).await["gate"]["authenticated"], true);
    }

    #[tokio::test]
    async fn concurrent_logins_do_not_supersede_each_other() {
        let state = state(Some("app"), local_store());
        let base = serve(state.clone()).await;
        let client = reqwest::Client::new();
        let alice = open_session(&client, &base).await;
        let bob = open_session(&client, &base).await;

        let spawn_sign = |token: String| {
            let client = client.clone();
            let base = base.clone();
            tokio::spawn(async move { sign_as(&client, &base, &token).await })
        };
        let alice_attempt = spawn_sign(alice.clone());
        wait_for_pending(&client, &base, &alice).await;
        let bob_attempt = spawn_sign(bob.clone());
        wait_for_pending(&client, &base, &bob).await;

        post_json(&client, format!("{}/api/v1/session", base), &alice, json!({ "id": "alice" })).await;
        post_json(&client, format!("{}/api/v1/session", base), &bob, json!({ "id": "bob" })).await;

        let (_, a) = alice_attempt.await.unwrap();
        let (_, b) = bob_attempt.await.unwrap();
        assert_eq!(a["outcome"], "login_completed");
        assert_eq!(b["outcome"], "login_completed");
    }

    #[tokio::test]
    async fn unknown_token_gets_a_new_session() {
        let state = state(Some("app"), local_store());
        let base = serve(state.clone()).await;

        let resp = reqwest::Client::new()
            .get(format!("{}/api/v1/session/pending", base))
            .header(SESSION_HEADER, "expired")
            .send()
            .await
            .unwrap();
        let token = resp.headers()[SESSION_HEADER].to_str().unwrap().to_string();
        assert_ne!(token, "expired");
        assert!(state.sessions.get(&token).is_some());
    }

    #[tokio::test]
    async fn refresh_failure_is_bad_gateway() {
        let rows = Arc::new(MemoryRowStore::new());
        rows.fail_selects(true);
        let state = state(Some("app"), SignatureStore::remote(rows, Vec::new()));
        let base = serve(state.clone()).await;

        let resp = reqwest::Client::new()
            .post(format!("{}/api/v1/signatures/refresh", base))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 502);
        assert!(state.notices.current().is_some());
    }

    // --- Live feed ---

    type Feed = tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >;

    async fn connect_feed(base: &str, token: Option<&str>) -> Feed {
        let mut url = format!("{}/api/v1/ws/feed", base.replacen("http", "ws", 1));
        if let Some(token) = token {
            url = format!("{}?session={}", url, token);
        }
        let (feed, _) = tokio_tungstenite::connect_async(url).await.unwrap();
        feed
    }

    async fn next_event(feed: &mut Feed) -> Value {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(5), feed.next())
                .await
                .unwrap()
                .unwrap()
                .unwrap();
            if let WsMessage::Text(text) = msg {
                let event: Value = serde_json::from_str(&text).unwrap();
                if event["type"] != "heartbeat" {
                    return event;
                }
            }
        }
    }

    #[tokio::test]
    async fn feed_streams_snapshot_signature_and_notices() {
        let state = state_with(Some("app"), local_store(), Duration::from_millis(200));
        let base = serve(state.clone()).await;
        let client = reqwest::Client::new();
        let alice = open_session(&client, &base).await;
        let bob = open_session(&client, &base).await;
        post_json(&client, format!("{}/api/v1/session", base), &alice, json!({ "id": "alice" })).await;

        let mut alice_feed = connect_feed(&base, Some(&alice)).await;
        let mut bob_feed = connect_feed(&base, Some(&bob)).await;

        let snapshot = next_event(&mut alice_feed).await;
        assert_eq!(snapshot["type"], "snapshot");
        assert_eq!(snapshot["signatures"].as_array().unwrap().len(), 4);
        assert!(snapshot["notice"].is_null());
        assert_eq!(next_event(&mut bob_feed).await["type"], "snapshot");

        let (_, signed) = sign_as(&client, &base, &alice).await;
        assert_eq!(signed["outcome"], "signed");

        // The append and the notice travel on separate channels.
        let first = next_event(&mut alice_feed).await;
        let second = next_event(&mut alice_feed).await;
        let (added, notice) = if first["type"] == "signature_added" {
            (first, second)
        } else {
            (second, first)
        };
        assert_eq!(added["type"], "signature_added");
        assert_eq!(added["signature"]["userId"], "alice");
        assert_eq!(added["signature"]["ago"], "just now");
        assert_eq!(notice["type"], "notice");
        assert_eq!(notice["notice"]["kind"], "success");

        let cleared = next_event(&mut alice_feed).await;
        assert_eq!(cleared["type"], "notice");
        assert!(cleared["notice"].is_null());

        // Bob sees the signature but not Alice's notices.
        let bob_added = next_event(&mut bob_feed).await;
        assert_eq!(bob_added["type"], "signature_added");
        let quiet = tokio::time::timeout(Duration::from_millis(400), next_event(&mut bob_feed)).await;
        assert!(quiet.is_err());
    }

    #[tokio::test]
    async fn feed_relays_site_notices_and_reloads() {
        let rows = Arc::new(MemoryRowStore::new());
        let state = state(Some("app"), SignatureStore::remote(rows.clone(), Vec::new()));
        let base = serve(state.clone()).await;

        let mut feed = connect_feed(&base, None).await;
        assert_eq!(next_event(&mut feed).await["type"], "snapshot");

        rows.push_row(SignatureRecord::new("r1".into(), None, "n".into(), "p".into(), 1));
        state.refresh().await.unwrap();
        let replaced = next_event(&mut feed).await;
        assert_eq!(replaced["type"], "signatures_replaced");
        assert_eq!(replaced["signatures"][0]["id"], "r1");

        rows.fail_selects(true);
        assert!(state.refresh().await.is_err());
        let notice = next_event(&mut feed).await;
        assert_eq!(notice["type"], "notice");
        assert_eq!(notice["notice"]["kind"], "error");
    }
}

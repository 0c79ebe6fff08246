/// Conversation store REST API + SSE
///
/// Endpoints:
///   GET    /api/status
///   POST   /api/sign-in                        body: {"email":"...","password":"..."}
///   POST   /api/users                          body: {"email":"...","first_name":"...","last_name":"..."}
///   GET    /api/directory                      ?q=<prefix>
///   GET    /api/users/:key/conversations
///   DELETE /api/users/:key/conversations/:id
///   POST   /api/conversations                  body: {"from":"...","to":"...","to_name":"...","message":{...}}
///   GET    /api/conversations/:id/messages
///   POST   /api/conversations/:id/messages     same body as create
///   GET    /events                             SSE stream of StoreEvent JSON
use crate::auth::{AuthProvider, Credentials};
use crate::directory::UserRecord;
use crate::error::{Result, StoreError};
use crate::events::{EventBus, StoreEvent};
use crate::identity::UserKey;
use crate::message::{new_message_id, Message, MessageKind};
use crate::sync::Synchronizer;
use futures_util::stream::{unfold, StreamExt};
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::Frame;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Deserialize;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

// ─── Type alias ──────────────────────────────────────────────────────────────

type BoxBody = http_body_util::combinators::BoxBody<bytes::Bytes, Infallible>;
type Resp = Response<BoxBody>;

/// Shared handler state.
pub struct AppState {
    pub sync: Synchronizer,
    pub auth: Arc<dyn AuthProvider>,
    pub events: EventBus,
    pub started_at: String,
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn cors_headers(builder: hyper::http::response::Builder) -> hyper::http::response::Builder {
    builder
        .header("Access-Control-Allow-Origin", "*")
        .header("Access-Control-Allow-Methods", "GET, POST, DELETE, OPTIONS")
        .header("Access-Control-Allow-Headers", "Content-Type")
}

fn json_resp(status: StatusCode, body: Vec<u8>) -> Resp {
    cors_headers(Response::builder())
        .status(status)
        .header("Content-Type", "application/json")
        .body(Full::new(bytes::Bytes::from(body)).boxed())
        .unwrap_or_else(|_| Response::new(Full::new(bytes::Bytes::new()).boxed()))
}

fn json_ok(value: serde_json::Value) -> Resp {
    json_resp(StatusCode::OK, serde_json::to_vec(&value).unwrap_or_default())
}

fn json_err(status: StatusCode, msg: &str) -> Resp {
    json_resp(
        status,
        serde_json::to_vec(&serde_json::json!({ "error": msg })).unwrap_or_default(),
    )
}

/// Map a store error to its HTTP shape. Partial writes get their own
/// error body so a client can tell "nothing happened" from "half
/// happened".
fn store_err(e: StoreError) -> Resp {
    match &e {
        StoreError::UserNotFound(_) => json_err(StatusCode::NOT_FOUND, &e.to_string()),
        StoreError::PartialWrite { op, committed, failed, .. } => json_resp(
            StatusCode::INTERNAL_SERVER_ERROR,
            serde_json::to_vec(&serde_json::json!({
                "error": e.to_string(),
                "partial_write": { "op": op, "committed": committed, "failed": failed },
            }))
            .unwrap_or_default(),
        ),
        _ => json_err(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}

fn sse_resp(rx: tokio::sync::broadcast::Receiver<StoreEvent>) -> Resp {
    // Keepalive comment sent immediately so the client knows the connection is live
    let initial = bytes::Bytes::from(": connected\n\n");
    let first = futures_util::stream::once(async move {
        Ok::<Frame<bytes::Bytes>, Infallible>(Frame::data(initial))
    });

    let events = unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let json = serde_json::to_string(&event).unwrap_or_default();
                    let data = format!("data: {}\n\n", json);
                    let frame = Frame::data(bytes::Bytes::from(data));
                    return Some((Ok::<_, Infallible>(frame), rx));
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    // Client is too slow — skip lagged events and continue
                    tracing::warn!("SSE client lagged {} events", n);
                    continue;
                }
                Err(_) => return None, // channel closed
            }
        }
    });

    let stream = first.chain(events);
    cors_headers(Response::builder())
        .status(StatusCode::OK)
        .header("Content-Type", "text/event-stream; charset=utf-8")
        .header("Cache-Control", "no-cache")
        .body(StreamBody::new(stream).boxed())
        .unwrap_or_else(|_| Response::new(Full::new(bytes::Bytes::new()).boxed()))
}

// ─── Entry point ─────────────────────────────────────────────────────────────

pub async fn start_api(state: AppState, addr: SocketAddr) -> Result<()> {
    let listener = TcpListener::bind(addr).await.map_err(StoreError::Io)?;
    info!("Conversation store API started on http://{}", addr);
    serve(listener, state).await
}

/// Serve requests on an already-bound listener (lets callers bind port
/// 0 and discover the address themselves).
pub async fn serve(listener: TcpListener, state: AppState) -> Result<()> {
    let state = Arc::new(state);
    loop {
        match listener.accept().await {
            Ok((stream, _peer)) => {
                let io = TokioIo::new(stream);
                let state = state.clone();
                tokio::spawn(async move {
                    let svc = service_fn(move |req| {
                        let state = state.clone();
                        async move { Ok::<_, Infallible>(handle(req, state).await) }
                    });
                    if let Err(e) = http1::Builder::new().serve_connection(io, svc).await {
                        // Ignore client-disconnect errors (normal for SSE)
                        if !e.is_incomplete_message() {
                            error!("API connection error: {:?}", e);
                        }
                    }
                });
            }
            Err(e) => error!("API accept error: {}", e),
        }
    }
}

// ─── Router ──────────────────────────────────────────────────────────────────

async fn handle(req: Request<hyper::body::Incoming>, state: Arc<AppState>) -> Resp {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = req.uri().query().unwrap_or("").to_string();

    // CORS preflight
    if method == Method::OPTIONS {
        return cors_headers(Response::builder())
            .status(StatusCode::NO_CONTENT)
            .body(Full::new(bytes::Bytes::new()).boxed())
            .unwrap_or_else(|_| Response::new(Full::new(bytes::Bytes::new()).boxed()));
    }

    match (method.clone(), path.as_str()) {
        (Method::GET, "/api/status") => get_status(&state),
        (Method::POST, "/api/sign-in") => post_sign_in(req, &state).await,
        (Method::POST, "/api/users") => post_user(req, &state).await,
        (Method::GET, "/api/directory") => get_directory(&query, &state),
        (Method::POST, "/api/conversations") => post_conversation(req, &state).await,
        (Method::GET, "/events") => get_sse(&state),
        _ => {
            // Dynamic segments
            let segments: Vec<&str> = path.trim_start_matches('/').split('/').collect();
            match (method, segments.as_slice()) {
                (Method::GET, ["api", "users", key, "conversations"]) => {
                    get_conversations(key, &state)
                }
                (Method::DELETE, ["api", "users", key, "conversations", id]) => {
                    delete_conversation(key, id, &state).await
                }
                (Method::GET, ["api", "conversations", id, "messages"]) => {
                    get_messages(id, &state)
                }
                (Method::POST, ["api", "conversations", id, "messages"]) => {
                    let id = id.to_string();
                    post_message(&id, req, &state).await
                }
                _ => json_err(StatusCode::NOT_FOUND, "not found"),
            }
        }
    }
}

// ─── Request bodies ──────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct SignInRequest {
    email: String,
    password: String,
}

#[derive(Deserialize)]
struct RegisterRequest {
    email: String,
    first_name: String,
    last_name: String,
}

/// Typed message payload; media must already be uploaded — only the
/// resolved URL is accepted here.
#[derive(Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum MessagePayload {
    Text { body: String },
    Photo { url: String },
    Video { url: String },
    Location { latitude: f64, longitude: f64 },
}

impl MessagePayload {
    fn into_kind(self) -> MessageKind {
        match self {
            MessagePayload::Text { body } => MessageKind::Text(body),
            MessagePayload::Photo { url } => MessageKind::Photo(url),
            MessagePayload::Video { url } => MessageKind::Video(url),
            MessagePayload::Location { latitude, longitude } => {
                MessageKind::Location { latitude, longitude }
            }
        }
    }
}

#[derive(Deserialize)]
struct SendRequest {
    /// Raw identity of the sender (normalized server-side).
    from: String,
    /// Raw identity of the recipient.
    to: String,
    /// Display name the sender uses for the recipient.
    to_name: String,
    message: MessagePayload,
}

impl SendRequest {
    /// Build the typed message; sender display name comes from the
    /// directory when registered, otherwise the key itself.
    fn into_parts(self, state: &AppState) -> Result<(UserKey, UserKey, String, Message)> {
        let sender = UserKey::normalize(&self.from);
        let peer = UserKey::normalize(&self.to);
        let sender_name = state
            .sync
            .directory()
            .get_user(&sender)?
            .map(|r| r.display_name())
            .unwrap_or_else(|| sender.to_string());

        let sent_at = chrono::Utc::now().to_rfc3339();
        let message = Message {
            id: new_message_id(&sender, &peer, &sent_at),
            sender: sender.clone(),
            sender_name,
            sent_at,
            kind: self.message.into_kind(),
        };
        Ok((sender, peer, self.to_name, message))
    }
}

// ─── Handlers ────────────────────────────────────────────────────────────────

fn get_status(state: &AppState) -> Resp {
    let users = match state.sync.directory().all() {
        Ok(entries) => entries.len(),
        Err(e) => return store_err(e),
    };
    json_ok(serde_json::json!({
        "users": users,
        "started_at": state.started_at,
    }))
}

async fn post_sign_in(req: Request<hyper::body::Incoming>, state: &AppState) -> Resp {
    let r: SignInRequest = match read_json(req).await {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    let credentials = Credentials {
        email: r.email,
        password: r.password,
    };
    match state.auth.sign_in(&credentials) {
        Ok(key) => json_ok(serde_json::json!({ "key": key })),
        Err(e) => store_err(e),
    }
}

async fn post_user(req: Request<hyper::body::Incoming>, state: &AppState) -> Resp {
    let r: RegisterRequest = match read_json(req).await {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    let record = UserRecord {
        first_name: r.first_name,
        last_name: r.last_name,
    };
    match state.sync.directory().insert_user(&r.email, record) {
        Ok(key) => json_ok(serde_json::json!({ "key": key })),
        Err(e) => store_err(e),
    }
}

fn get_directory(query: &str, state: &AppState) -> Resp {
    let q = parse_query(query, "q").unwrap_or_default();
    let result = if q.is_empty() {
        state.sync.directory().all()
    } else {
        state.sync.directory().search(&q)
    };
    match result {
        Ok(entries) => json_ok(serde_json::json!({ "users": entries })),
        Err(e) => store_err(e),
    }
}

fn get_conversations(key: &str, state: &AppState) -> Resp {
    let user = UserKey::from_normalized(key);
    match state.sync.index().list(&user) {
        Ok(summaries) => json_ok(serde_json::json!({ "conversations": summaries })),
        Err(e) => store_err(e),
    }
}

async fn post_conversation(req: Request<hyper::body::Incoming>, state: &AppState) -> Resp {
    let r: SendRequest = match read_json(req).await {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    let (sender, peer, to_name, message) = match r.into_parts(state) {
        Ok(parts) => parts,
        Err(e) => return store_err(e),
    };
    match state
        .sync
        .create_conversation(&sender, &peer, &to_name, &message)
        .await
    {
        Ok(conversation_id) => json_ok(serde_json::json!({
            "conversation_id": conversation_id,
            "message_id": message.id,
        })),
        Err(e) => store_err(e),
    }
}

async fn post_message(
    conversation_id: &str,
    req: Request<hyper::body::Incoming>,
    state: &AppState,
) -> Resp {
    let r: SendRequest = match read_json(req).await {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    let (sender, peer, to_name, message) = match r.into_parts(state) {
        Ok(parts) => parts,
        Err(e) => return store_err(e),
    };
    match state
        .sync
        .send_message(conversation_id, &sender, &peer, &to_name, &message)
        .await
    {
        Ok(()) => json_ok(serde_json::json!({ "message_id": message.id })),
        Err(e) => store_err(e),
    }
}

fn get_messages(conversation_id: &str, state: &AppState) -> Resp {
    // Wire-facing read: undecodable records are skipped, not served raw.
    match state.sync.log().read_valid_records(conversation_id) {
        Ok(records) => json_ok(serde_json::json!({ "messages": records })),
        Err(e) => store_err(e),
    }
}

async fn delete_conversation(key: &str, conversation_id: &str, state: &AppState) -> Resp {
    let user = UserKey::from_normalized(key);
    match state.sync.delete_conversation(&user, conversation_id).await {
        Ok(removed) => json_ok(serde_json::json!({ "removed": removed })),
        Err(e) => store_err(e),
    }
}

fn get_sse(state: &AppState) -> Resp {
    sse_resp(state.events.subscribe())
}

// ─── Utilities ───────────────────────────────────────────────────────────────

async fn read_json<T: serde::de::DeserializeOwned>(
    req: Request<hyper::body::Incoming>,
) -> std::result::Result<T, Resp> {
    let body = req
        .collect()
        .await
        .map(|c| c.to_bytes())
        .map_err(|e| json_err(StatusCode::BAD_REQUEST, &format!("body read error: {}", e)))?;
    serde_json::from_slice(&body)
        .map_err(|e| json_err(StatusCode::BAD_REQUEST, &format!("invalid JSON: {}", e)))
}

fn parse_query(query: &str, key: &str) -> Option<String> {
    for pair in query.split('&') {
        if let Some((k, v)) = pair.split_once('=') {
            if k == key {
                return Some(
                    urlencoding::decode(v)
                        .unwrap_or_else(|_| std::borrow::Cow::Borrowed(v))
                        .to_string(),
                );
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_values_are_percent_decoded() {
        assert_eq!(parse_query("q=alice%20s", "q").as_deref(), Some("alice s"));
        assert_eq!(parse_query("a=1&q=b%40c.com", "q").as_deref(), Some("b@c.com"));
        assert_eq!(parse_query("q=plain", "q").as_deref(), Some("plain"));
        assert!(parse_query("other=x", "q").is_none());
    }
}

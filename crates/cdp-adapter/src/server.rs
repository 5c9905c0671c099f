//! HTTP discovery surface, WebSocket session management and the backend
//! event pump.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::{header, Method, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info, warn};

use crate::bridge::{BackendHandle, BackendMessage, EngineBackend};
use crate::config::AdapterConfig;
use crate::error::{AdapterError, AdapterErrorKind};
use crate::mapper::{self, TranslatedRequest};
use crate::pending::{PendingRequest, PendingRequests};
use crate::script;
use crate::value;
use crate::ClientId;

struct Shared {
    cfg: AdapterConfig,
    /// Actual bound port; differs from `cfg.port` when that was 0.
    port: u16,
    bridge: BackendHandle,
    pending: PendingRequests,
    clients: DashMap<ClientId, mpsc::UnboundedSender<String>>,
    next_client: AtomicU64,
    shutdown: CancellationToken,
}

/// The CDP endpoint: HTTP discovery plus WebSocket debugging sessions in
/// front of one engine debug agent.
pub struct CdpAdapter {
    shared: Arc<Shared>,
    listener: TcpListener,
    addr: SocketAddr,
}

impl CdpAdapter {
    /// Bind the loopback listener and start the engine bridge. A bind
    /// failure is fatal; the adapter does not start.
    pub async fn bind(
        cfg: AdapterConfig,
        backend: impl EngineBackend,
    ) -> Result<Self, AdapterError> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, cfg.port))
            .await
            .map_err(|err| AdapterError::new(AdapterErrorKind::Bind).with_hint(err.to_string()))?;
        let addr = listener
            .local_addr()
            .map_err(|err| AdapterError::new(AdapterErrorKind::Bind).with_hint(err.to_string()))?;

        let shared = Arc::new(Shared {
            cfg,
            port: addr.port(),
            bridge: BackendHandle::spawn(backend),
            pending: PendingRequests::new(),
            clients: DashMap::new(),
            next_client: AtomicU64::new(1),
            shutdown: CancellationToken::new(),
        });

        info!(
            target: "cdp-adapter",
            port = addr.port(),
            frontend = %shared.cfg.frontend_name,
            "cdp endpoint listening on loopback"
        );

        Ok(Self {
            shared,
            listener,
            addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Token that stops the server and the event pump when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.shared.shutdown.clone()
    }

    /// Live view of the in-flight command count; stays usable after
    /// `serve` has taken ownership of the adapter.
    pub fn pending_probe(&self) -> PendingProbe {
        PendingProbe {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Serve until the cancellation token fires.
    pub async fn serve(self) -> Result<(), AdapterError> {
        let pump = tokio::spawn(pump_loop(Arc::clone(&self.shared)));

        let router = build_router(Arc::clone(&self.shared));
        let shutdown = self.shared.shutdown.clone();
        let result = axum::serve(self.listener, router)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .map_err(|err| {
                AdapterError::new(AdapterErrorKind::Internal).with_hint(err.to_string())
            });

        self.shared.shutdown.cancel();
        let _ = pump.await;
        result
    }
}

/// Counter of backend commands currently in flight. The table is empty
/// whenever the system is quiescent.
#[derive(Clone)]
pub struct PendingProbe {
    shared: Arc<Shared>,
}

impl PendingProbe {
    pub fn len(&self) -> usize {
        self.shared.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn build_router(shared: Arc<Shared>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/json/version", get(version_handler))
        .route("/json/list", get(list_handler))
        .route("/json/protocol", get(protocol_handler))
        .route("/devtools/page/{target}", get(upgrade_handler))
        .route("/devtools/browser/{target}", get(upgrade_handler))
        .layer(cors)
        .with_state(shared)
}

async fn version_handler(State(shared): State<Arc<Shared>>) -> Json<Value> {
    let name = &shared.cfg.frontend_name;
    let lower = shared.cfg.lower_name();
    Json(json!({
        "Browser": format!("{name}-CDP/1.0"),
        "Protocol-Version": "1.3",
        "User-Agent": format!("{name} JavaScript Debugger"),
        "V8-Version": "9.4.0",
        "webSocketDebuggerUrl":
            format!("ws://localhost:{}/devtools/browser/{lower}-js", shared.port),
    }))
}

async fn list_handler(State(shared): State<Arc<Shared>>) -> Json<Value> {
    let name = &shared.cfg.frontend_name;
    let lower = shared.cfg.lower_name();
    let port = shared.port;
    Json(json!([{
        "id": format!("{lower}-js"),
        "title": format!("{name} JS Debugger"),
        "type": "page",
        "description": format!("{name} JavaScript execution context"),
        "url": format!("{lower}://javascript"),
        "devtoolsFrontendUrl":
            format!("/devtools/inspector.html?ws=localhost:{port}/devtools/page/{lower}-js"),
        "webSocketDebuggerUrl": format!("ws://localhost:{port}/devtools/page/{lower}-js"),
    }]))
}

async fn protocol_handler() -> Json<Value> {
    Json(json!([{
        "domain": "Debugger",
        "version": "1.3",
        "commands": [
            { "name": "enable" },
            { "name": "disable" },
            { "name": "setBreakpointByUrl" },
            { "name": "removeBreakpoint" },
            { "name": "resume" },
            { "name": "stepOver" },
            { "name": "stepInto" },
            { "name": "getScriptSource" },
            { "name": "evaluateOnCallFrame" },
        ],
        "events": [
            { "name": "paused" },
            { "name": "resumed" },
            { "name": "scriptParsed" },
        ],
    }]))
}

async fn upgrade_handler(
    State(shared): State<Arc<Shared>>,
    Path(target): Path<String>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    if target != shared.cfg.target_id() {
        debug!(target: "cdp-adapter", %target, "rejected websocket upgrade");
        return StatusCode::NOT_FOUND.into_response();
    }
    debug!(target: "cdp-adapter", %target, "accepted websocket upgrade");
    ws.on_upgrade(move |socket| handle_socket(socket, shared))
        .into_response()
}

async fn handle_socket(socket: WebSocket, shared: Arc<Shared>) {
    let client = shared.next_client.fetch_add(1, Ordering::Relaxed);
    let (outgoing_tx, mut outgoing_rx) = mpsc::unbounded_channel::<String>();
    shared.clients.insert(client, outgoing_tx);
    debug!(target: "cdp-adapter", client, "cdp client connected");

    let (mut sink, mut stream) = socket.split();

    for event in initial_events(&shared).await {
        if sink.send(Message::Text(event.to_string().into())).await.is_err() {
            shared.clients.remove(&client);
            return;
        }
    }

    loop {
        tokio::select! {
            outgoing = outgoing_rx.recv() => {
                match outgoing {
                    Some(text) => {
                        if sink.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        handle_client_message(&shared, client, &text).await;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        debug!(target: "cdp-adapter", client, ?frame, "websocket closed by client");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!(target: "cdp-adapter", client, %err, "websocket error");
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    shared.clients.remove(&client);
    debug!(target: "cdp-adapter", client, "cdp client disconnected");
}

/// Burst sent to every freshly connected client: the execution context,
/// then one `Debugger.scriptParsed` per script the backend knows.
async fn initial_events(shared: &Shared) -> Vec<Value> {
    let name = &shared.cfg.frontend_name;
    let lower = shared.cfg.lower_name();

    let mut events = vec![json!({
        "method": "Runtime.executionContextCreated",
        "params": {
            "context": {
                "id": 1,
                "origin": format!("{lower}://javascript"),
                "name": format!("{name} JavaScript Context"),
                "uniqueId": format!("{lower}-js-context"),
            }
        }
    })];
    events.extend(script_parsed_events(shared).await);
    events
}

async fn script_parsed_events(shared: &Shared) -> Vec<Value> {
    let scripts = match shared.bridge.call(mapper::scripts_command(0)).await {
        Ok(reply) => value::nested(&reply, &["Result", "result"])
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default(),
        Err(err) => {
            warn!(target: "cdp-adapter", %err, "initial script discovery failed");
            Vec::new()
        }
    };

    scripts
        .iter()
        .map(|script| script::script_parsed_event(script, 1, &shared.cfg.lower_name()))
        .collect()
}

async fn handle_client_message(shared: &Arc<Shared>, client: ClientId, text: &str) {
    let cdp: Value = match serde_json::from_str(text) {
        Ok(value @ Value::Object(_)) => value,
        Ok(_) => {
            warn!(target: "cdp-adapter", client, "cdp message is not a json object");
            return;
        }
        Err(err) => {
            warn!(target: "cdp-adapter", client, %err, "failed to parse cdp message");
            return;
        }
    };

    // A frame without an id would be a client-sent event; none are supported.
    let Some(id) = cdp.get("id").and_then(Value::as_i64) else {
        debug!(target: "cdp-adapter", client, "ignoring cdp frame without id");
        return;
    };
    let method = cdp
        .get("method")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    // Answered without involving the backend command mapping.
    match method.as_str() {
        "Runtime.enable" => {
            send_to(shared, client, &json!({ "id": id, "result": {} }));
            return;
        }
        "Debugger.enable" => {
            let debugger_id = format!("{}-debugger-1", shared.cfg.lower_name());
            send_to(
                shared,
                client,
                &json!({ "id": id, "result": { "debuggerId": debugger_id } }),
            );
            for event in script_parsed_events(shared).await {
                send_to(shared, client, &event);
            }
            return;
        }
        "Debugger.disable" => {
            send_to(shared, client, &json!({ "id": id, "result": {} }));
            return;
        }
        _ => {}
    }

    match mapper::map_request(&cdp) {
        Some(TranslatedRequest {
            passthrough: true, ..
        }) => {
            send_to(shared, client, &json!({ "id": id, "result": {} }));
        }
        Some(translated) => {
            shared.pending.store(
                id,
                PendingRequest {
                    domain: translated.domain,
                    request: cdp,
                    client,
                },
            );
            if let Err(err) = shared.bridge.push(translated.command).await {
                warn!(
                    target: "cdp-adapter",
                    %err,
                    method = %method,
                    "failed to forward command to backend"
                );
                shared.pending.take(id);
                send_to(
                    shared,
                    client,
                    &json!({ "id": id, "error": { "code": -32000, "message": "Backend unavailable" } }),
                );
            }
        }
        None => {
            warn!(target: "cdp-adapter", method = %method, "unsupported cdp method");
            send_to(
                shared,
                client,
                &json!({ "id": id, "error": { "code": -32601, "message": "Method not found" } }),
            );
        }
    }
}

fn send_to(shared: &Shared, client: ClientId, payload: &Value) {
    match shared.clients.get(&client) {
        Some(entry) => {
            if entry.value().send(payload.to_string()).is_err() {
                debug!(target: "cdp-adapter", client, "dropping message for closing client");
            }
        }
        None => {
            debug!(target: "cdp-adapter", client, "response discarded, client disconnected");
        }
    }
}

fn broadcast(shared: &Shared, payload: &Value) {
    let text = payload.to_string();
    for entry in shared.clients.iter() {
        if entry.value().send(text.clone()).is_err() {
            debug!(
                target: "cdp-adapter",
                client = *entry.key(),
                "skipping closing client in broadcast"
            );
        }
    }
}

/// Drain backend messages in arrival order. An events-pending signal turns
/// into that many `PullEvent` requests; the pulled events come back through
/// the same stream and are told apart from responses by their `Event` field.
async fn pump_loop(shared: Arc<Shared>) {
    loop {
        tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            message = shared.bridge.next_message() => match message {
                Some(BackendMessage::Response(payload)) => {
                    handle_backend_payload(&shared, payload).await;
                }
                Some(BackendMessage::EventsPending(count)) => {
                    debug!(target: "cdp-adapter", count, "pulling pending backend events");
                    for _ in 0..count {
                        if let Err(err) = shared.bridge.push(mapper::pull_event()).await {
                            warn!(target: "cdp-adapter", %err, "event pull failed");
                            break;
                        }
                    }
                }
                None => {
                    debug!(target: "cdp-adapter", "backend message stream ended");
                    break;
                }
            }
        }
    }
}

async fn handle_backend_payload(shared: &Arc<Shared>, payload: Value) {
    if payload.get("Event").is_some() {
        match mapper::event::auto_reply(&payload, &shared.bridge).await {
            Ok(true) => return,
            Ok(false) => {}
            Err(err) => {
                warn!(target: "cdp-adapter", %err, "auto-reply to backend event failed");
                return;
            }
        }
        match mapper::event::map_event(&payload, &shared.bridge).await {
            Some(event) => broadcast(shared, &event),
            None => warn!(target: "cdp-adapter", "unmapped backend event dropped"),
        }
        return;
    }

    let Some(id) = payload.get("ID").and_then(Value::as_i64) else {
        warn!(target: "cdp-adapter", "backend response missing ID");
        return;
    };

    match shared.pending.take(id) {
        Some(pending) => {
            let response = mapper::map_response(&payload, Some(&pending));
            send_to(shared, pending.client, &response);
        }
        None => {
            // unmatchable; every connected client gets the generic wrapper
            let response = mapper::map_response(&payload, None);
            broadcast(shared, &response);
        }
    }
}

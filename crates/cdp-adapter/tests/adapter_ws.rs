//! Wire-level tests: a scripted engine backend behind a real adapter,
//! exercised over HTTP and WebSocket.

use std::collections::VecDeque;
use std::sync::{mpsc as std_mpsc, Arc, Mutex};
use std::time::Duration;

use cdp_adapter::{AdapterConfig, CdpAdapter, EngineBackend, EventNotifier, PendingProbe};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

const SCRIPT_CONTENTS: &str = "var a = 1;\nvar b = 2;\n";

/// Plays the engine debug agent from canned answers. Commands are recorded
/// for assertions; queued events are handed out one per `PullEvent`.
struct ScriptedBackend {
    breakpoint_result: Value,
    commands: Arc<Mutex<Vec<Value>>>,
    events: Arc<Mutex<VecDeque<Value>>>,
    notifier_tx: std_mpsc::Sender<EventNotifier>,
}

impl EngineBackend for ScriptedBackend {
    fn attach(&mut self, notifier: EventNotifier) {
        let _ = self.notifier_tx.send(notifier);
    }

    fn handle_request(&mut self, request: Value) -> Value {
        self.commands.lock().unwrap().push(request.clone());

        if request.get("Control").and_then(Value::as_str) == Some("PullEvent") {
            return self
                .events
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| json!({}));
        }

        let id = request.get("ID").cloned().unwrap_or_else(|| json!(-1));
        let kind = request
            .get("Command")
            .and_then(|c| c.get("type"))
            .and_then(Value::as_str)
            .unwrap_or_default();

        match kind {
            "GetScripts" => json!({
                "ID": id,
                "Result": { "result": [{
                    "id": 7,
                    "fileName": "test.js",
                    "contents": SCRIPT_CONTENTS,
                    "baseLineNumber": 0,
                }]},
            }),
            "SetBreakpoint" => json!({ "ID": id, "Result": { "result": self.breakpoint_result } }),
            "DeleteBreakpoint" => json!({ "ID": id, "Result": { "result": {} } }),
            "GetBreakpoints" => json!({ "ID": id, "Result": { "result": [] } }),
            "GetBacktrace" => json!({ "ID": id, "Result": ["main at test.js:3"] }),
            _ => json!({ "ID": id, "Result": {} }),
        }
    }
}

struct Harness {
    addr: std::net::SocketAddr,
    shutdown: CancellationToken,
    commands: Arc<Mutex<Vec<Value>>>,
    events: Arc<Mutex<VecDeque<Value>>>,
    notifier: EventNotifier,
    pending: PendingProbe,
}

impl Harness {
    async fn start(breakpoint_result: Value) -> Self {
        let commands = Arc::new(Mutex::new(Vec::new()));
        let events = Arc::new(Mutex::new(VecDeque::new()));
        let (notifier_tx, notifier_rx) = std_mpsc::channel();

        let backend = ScriptedBackend {
            breakpoint_result,
            commands: Arc::clone(&commands),
            events: Arc::clone(&events),
            notifier_tx,
        };

        let adapter = CdpAdapter::bind(AdapterConfig::new("jsrunner", 0), backend)
            .await
            .expect("bind adapter");
        let addr = adapter.local_addr();
        let shutdown = adapter.cancel_token();
        let pending = adapter.pending_probe();
        tokio::spawn(adapter.serve());

        let notifier = notifier_rx
            .recv_timeout(Duration::from_secs(2))
            .expect("engine thread attaches");

        Self {
            addr,
            shutdown,
            commands,
            events,
            notifier,
            pending,
        }
    }

    async fn connect(&self) -> Ws {
        let url = format!("ws://{}/devtools/page/jsrunner-js", self.addr);
        let (ws, _) = tokio_tungstenite::connect_async(url)
            .await
            .expect("websocket connect");
        ws
    }

    /// Connect and drain the initial burst (context + one scriptParsed).
    async fn connect_ready(&self) -> Ws {
        let mut ws = self.connect().await;
        let context = recv_json(&mut ws).await;
        assert_eq!(
            context["method"],
            json!("Runtime.executionContextCreated"),
            "first message must announce the execution context"
        );
        let parsed = recv_json(&mut ws).await;
        assert_eq!(parsed["method"], json!("Debugger.scriptParsed"));
        ws
    }

    /// Queue a backend event and raise the pending signal.
    fn raise_event(&self, event: Value) {
        self.events.lock().unwrap().push_back(event);
        self.notifier.events_pending(1);
    }

    fn forwarded_commands(&self) -> Vec<Value> {
        self.commands.lock().unwrap().clone()
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn recv_json(ws: &mut Ws) -> Value {
    loop {
        let message = timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("message within deadline")
            .expect("stream open")
            .expect("frame ok");
        if let Message::Text(text) = message {
            return serde_json::from_str(&text).expect("valid json");
        }
    }
}

async fn expect_silence(ws: &mut Ws, wait: Duration) {
    match timeout(wait, ws.next()).await {
        Err(_) => {}
        Ok(frame) => panic!("expected no message, got {frame:?}"),
    }
}

async fn send_json(ws: &mut Ws, payload: Value) {
    ws.send(Message::Text(payload.to_string()))
        .await
        .expect("send");
}

#[tokio::test]
async fn initial_burst_announces_context_then_scripts() {
    let harness = Harness::start(json!(2)).await;
    let mut ws = harness.connect().await;

    let context = recv_json(&mut ws).await;
    assert_eq!(
        context,
        json!({
            "method": "Runtime.executionContextCreated",
            "params": { "context": {
                "id": 1,
                "origin": "jsrunner://javascript",
                "name": "jsrunner JavaScript Context",
                "uniqueId": "jsrunner-js-context",
            }}
        })
    );

    let parsed = recv_json(&mut ws).await;
    let expected_hash = format!("{:x}", Sha256::digest(SCRIPT_CONTENTS.as_bytes()));
    assert_eq!(
        parsed,
        json!({
            "method": "Debugger.scriptParsed",
            "params": {
                "scriptId": "7",
                "url": "jsrunner://test.js",
                "startLine": 0,
                "startColumn": 0,
                "endLine": 2,
                "endColumn": 0,
                "executionContextId": 1,
                "hash": expected_hash,
            }
        })
    );
}

#[tokio::test]
async fn set_breakpoint_success() {
    let harness = Harness::start(json!(2)).await;
    let mut ws = harness.connect_ready().await;

    send_json(
        &mut ws,
        json!({
            "id": 52,
            "method": "Debugger.setBreakpointByUrl",
            "params": { "lineNumber": 2, "url": "jsrunner://test.js", "columnNumber": 0, "condition": "" },
        }),
    )
    .await;

    let response = recv_json(&mut ws).await;
    assert_eq!(response, json!({ "id": 52, "result": { "breakpointId": "2" } }));

    let set = harness
        .forwarded_commands()
        .into_iter()
        .find(|c| c["Command"]["type"] == json!("SetBreakpoint"))
        .expect("SetBreakpoint forwarded");
    assert_eq!(
        set["Command"]["attributes"]["breakpointData"]["fileName"],
        json!("test.js"),
        "url must be normalised before it reaches the backend"
    );
}

#[tokio::test]
async fn set_breakpoint_without_matching_script() {
    let harness = Harness::start(json!("no script with that name")).await;
    let mut ws = harness.connect_ready().await;

    send_json(
        &mut ws,
        json!({
            "id": 52,
            "method": "Debugger.setBreakpointByUrl",
            "params": { "lineNumber": 2, "url": "jsrunner://test.js", "columnNumber": 0, "condition": "" },
        }),
    )
    .await;

    let response = recv_json(&mut ws).await;
    assert_eq!(
        response,
        json!({
            "id": 52,
            "error": { "code": -32000, "message": "No script matching jsrunner://test.js" },
        })
    );
}

#[tokio::test]
async fn breakpoint_hit_event_is_broadcast() {
    let harness = Harness::start(json!(2)).await;
    let mut first = harness.connect_ready().await;
    let mut second = harness.connect_ready().await;

    harness.raise_event(json!({
        "Event": { "type": "Breakpoint", "attributes": { "breakPointId": "1" } },
    }));

    let expected = json!({
        "method": "Debugger.paused",
        "params": { "callFrames": [], "hitBreakpoints": ["1"], "reason": "other" },
    });
    assert_eq!(recv_json(&mut first).await, expected);
    assert_eq!(recv_json(&mut second).await, expected);
}

#[tokio::test]
async fn runtime_enable_is_answered_locally() {
    let harness = Harness::start(json!(2)).await;
    let mut ws = harness.connect_ready().await;

    for id in [7, 8, 9] {
        send_json(&mut ws, json!({ "id": id, "method": "Runtime.enable" })).await;
        let response = recv_json(&mut ws).await;
        assert_eq!(response, json!({ "id": id, "result": {} }));
    }

    let backend_commands: Vec<Value> = harness
        .forwarded_commands()
        .into_iter()
        .filter(|c| c["Command"]["type"] != json!("GetScripts"))
        .collect();
    assert!(
        backend_commands.is_empty(),
        "Runtime.enable must not reach the backend, saw {backend_commands:?}"
    );
}

#[tokio::test]
async fn unknown_method_gets_method_not_found() {
    let harness = Harness::start(json!(2)).await;
    let mut ws = harness.connect_ready().await;

    send_json(&mut ws, json!({ "id": 99, "method": "Profiler.enable" })).await;
    let response = recv_json(&mut ws).await;
    assert_eq!(
        response,
        json!({ "id": 99, "error": { "code": -32601, "message": "Method not found" } })
    );
}

#[tokio::test]
async fn debugger_enable_replies_then_replays_scripts() {
    let harness = Harness::start(json!(2)).await;
    let mut ws = harness.connect_ready().await;

    send_json(&mut ws, json!({ "id": 3, "method": "Debugger.enable" })).await;

    let response = recv_json(&mut ws).await;
    assert_eq!(
        response,
        json!({ "id": 3, "result": { "debuggerId": "jsrunner-debugger-1" } })
    );

    let parsed = recv_json(&mut ws).await;
    assert_eq!(parsed["method"], json!("Debugger.scriptParsed"));
    assert_eq!(parsed["params"]["url"], json!("jsrunner://test.js"));
}

#[tokio::test]
async fn breakpoint_set_then_remove_roundtrip() {
    let harness = Harness::start(json!(2)).await;
    let mut ws = harness.connect_ready().await;

    send_json(
        &mut ws,
        json!({
            "id": 1,
            "method": "Debugger.setBreakpointByUrl",
            "params": { "lineNumber": 2, "url": "jsrunner://test.js", "condition": "" },
        }),
    )
    .await;
    let set = recv_json(&mut ws).await;
    let breakpoint_id = set["result"]["breakpointId"].as_str().expect("id").to_string();

    send_json(
        &mut ws,
        json!({
            "id": 2,
            "method": "Debugger.removeBreakpoint",
            "params": { "breakpointId": breakpoint_id },
        }),
    )
    .await;
    assert_eq!(recv_json(&mut ws).await, json!({ "id": 2, "result": {} }));

    send_json(
        &mut ws,
        json!({ "id": 3, "method": "Debugger.getPossibleBreakpoints", "params": {} }),
    )
    .await;
    assert_eq!(
        recv_json(&mut ws).await,
        json!({ "id": 3, "result": { "locations": [] } })
    );
}

#[tokio::test]
async fn inline_eval_undefined_is_suppressed_and_resumed() {
    let harness = Harness::start(json!(2)).await;
    let mut ws = harness.connect_ready().await;

    harness.raise_event(json!({
        "Event": { "type": "InlineEvalFinished", "attributes": { "message": "undefined" } },
    }));

    expect_silence(&mut ws, Duration::from_millis(300)).await;

    let resumed = harness
        .forwarded_commands()
        .into_iter()
        .any(|c| c["Command"]["type"] == json!("Resume"));
    assert!(resumed, "the adapter must resume the backend on its own");
}

#[tokio::test]
async fn pending_table_drains_to_empty_when_quiescent() {
    let harness = Harness::start(json!(2)).await;
    let mut ws = harness.connect_ready().await;

    assert!(harness.pending.is_empty());

    send_json(
        &mut ws,
        json!({
            "id": 21,
            "method": "Debugger.setBreakpointByUrl",
            "params": { "lineNumber": 2, "url": "jsrunner://test.js", "condition": "" },
        }),
    )
    .await;
    recv_json(&mut ws).await;

    // the entry is removed before the response is handed to the client
    assert_eq!(harness.pending.len(), 0);
}

#[tokio::test]
async fn unknown_response_id_becomes_generic_wrapper() {
    let harness = Harness::start(json!(2)).await;
    let mut ws = harness.connect_ready().await;

    // a reply whose correlator was never stored arrives through the pump
    harness.raise_event(json!({ "ID": 999, "Result": { "ok": true } }));

    assert_eq!(
        recv_json(&mut ws).await,
        json!({ "id": 999, "result": { "ok": true } })
    );
}

#[tokio::test]
async fn discovery_surface_describes_the_target() {
    let harness = Harness::start(json!(2)).await;
    let base = format!("http://{}", harness.addr);
    let port = harness.addr.port();

    let version: Value = reqwest::get(format!("{base}/json/version"))
        .await
        .expect("version route")
        .json()
        .await
        .expect("version json");
    assert_eq!(version["Browser"], json!("jsrunner-CDP/1.0"));
    assert_eq!(version["Protocol-Version"], json!("1.3"));
    assert_eq!(version["V8-Version"], json!("9.4.0"));

    let list: Value = reqwest::get(format!("{base}/json/list"))
        .await
        .expect("list route")
        .json()
        .await
        .expect("list json");
    let targets = list.as_array().expect("array");
    assert_eq!(targets.len(), 1);
    assert_eq!(targets[0]["type"], json!("page"));
    assert_eq!(targets[0]["id"], json!("jsrunner-js"));
    assert_eq!(
        targets[0]["webSocketDebuggerUrl"],
        json!(format!("ws://localhost:{port}/devtools/page/jsrunner-js"))
    );

    let protocol: Value = reqwest::get(format!("{base}/json/protocol"))
        .await
        .expect("protocol route")
        .json()
        .await
        .expect("protocol json");
    assert_eq!(protocol[0]["domain"], json!("Debugger"));
}

#[tokio::test]
async fn upgrade_on_wrong_path_is_rejected() {
    let harness = Harness::start(json!(2)).await;
    let url = format!("ws://{}/devtools/page/other-js", harness.addr);
    assert!(
        tokio_tungstenite::connect_async(url).await.is_err(),
        "upgrade must be rejected for unknown targets"
    );
}

#[tokio::test]
async fn browser_path_also_accepts_upgrade() {
    let harness = Harness::start(json!(2)).await;
    let url = format!("ws://{}/devtools/browser/jsrunner-js", harness.addr);
    let (mut ws, _) = tokio_tungstenite::connect_async(url)
        .await
        .expect("browser path upgrade");
    let context = recv_json(&mut ws).await;
    assert_eq!(context["method"], json!("Runtime.executionContextCreated"));
}

#[tokio::test]
async fn trace_event_reaches_the_console_domain() {
    let harness = Harness::start(json!(2)).await;
    let mut ws = harness.connect_ready().await;

    harness.raise_event(json!({
        "Event": { "type": "Trace", "attributes": { "message": "hello", "level": "info" } },
    }));

    assert_eq!(
        recv_json(&mut ws).await,
        json!({
            "method": "Console.messageAdded",
            "params": { "message": { "text": "hello", "level": "info" } },
        })
    );
}

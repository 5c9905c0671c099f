//! Conformance test driver: replays a scripted sequence of CDP
//! request/response pairs against a running adapter.
//!
//! ```text
//! cdp-test-client http://localhost:9222 -t cdp_tests.txt
//! ```
//!
//! Example test file:
//!
//! ```text
//! [SetBreakpoint]
//! request={"id":52,"method":"Debugger.setBreakpointByUrl","params":{"lineNumber":2,"url":"jsrunner://test.js","columnNumber":0,"condition":""}}
//! response={"id":52,"result":{"breakpointId":"2"}}
//!
//! [BreakpointHit]
//! response={"method":"Debugger.paused","params":{"callFrames":[],"hitBreakpoints":["1"],"reason":"other"}}
//! ```

mod settings;

use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{info, warn};

use settings::GroupedSettings;

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

const IGNORE: &str = "IGNORE";
const CASE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(about = "CDP Test Client", version)]
struct Cli {
    /// CDP HTTP endpoint, e.g. http://localhost:9222
    url: String,

    /// Path to test cases file
    #[arg(short = 't', long = "test-cases", value_name = "FILE")]
    test_cases: PathBuf,

    /// Delay in ms before starting tests
    #[arg(short = 'd', long, default_value_t = 500)]
    delay: u64,

    /// External command to start the CDP server
    #[arg(short = 'e', long = "external-command", value_name = "CMD")]
    external_command: Option<String>,

    /// Logfile for the external command
    #[arg(short = 'l', long, default_value = "log.txt")]
    logfile: PathBuf,
}

#[derive(Clone, Debug)]
struct TestCase {
    name: String,
    /// JSON string, or empty to wait for an event.
    request: String,
    /// JSON string, or the literal `IGNORE`.
    response: String,
}

impl TestCase {
    fn load(path: &Path) -> Result<Vec<TestCase>> {
        let settings = GroupedSettings::load(path)
            .with_context(|| format!("failed to read test cases from {}", path.display()))?;

        let mut cases = Vec::new();
        for group in settings.groups() {
            let request = group.value("request").unwrap_or("").to_string();
            let response = group.value("response").unwrap_or(IGNORE).to_string();
            if request.is_empty() && response == IGNORE {
                continue;
            }
            cases.push(TestCase {
                name: group.name.clone(),
                request,
                response,
            });
        }

        if cases.is_empty() {
            bail!("no valid test cases found in {}", path.display());
        }
        Ok(cases)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // usage errors exit with 1, help and version output with 0
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let code = if err.use_stderr() { 1 } else { 0 };
            let _ = err.print();
            std::process::exit(code);
        }
    };

    let url = reqwest::Url::parse(&cli.url).context("invalid URL, use http://host:port")?;
    if url.scheme() != "http" {
        bail!("invalid URL scheme {}, use http://host:port", url.scheme());
    }

    let cases = TestCase::load(&cli.test_cases)?;

    let mut external = match &cli.external_command {
        Some(command) => Some(spawn_external(command, &cli.logfile)?),
        None => None,
    };

    if cli.delay > 0 {
        info!("Delaying tests for {} ms", cli.delay);
        tokio::time::sleep(Duration::from_millis(cli.delay)).await;
    }

    let result = run(&url, cases).await;

    if let Some(child) = external.as_mut() {
        let _ = child.kill();
        let _ = child.wait();
    }

    result
}

fn spawn_external(command: &str, logfile: &Path) -> Result<Child> {
    let mut parts = command.split_whitespace();
    let program = parts.next().context("external command is empty")?;

    let log = File::create(logfile)
        .with_context(|| format!("failed to create logfile {}", logfile.display()))?;
    let err_log = log.try_clone().context("failed to clone logfile handle")?;

    info!("Starting external command: {command}");
    let child = Command::new(program)
        .args(parts)
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(err_log))
        .spawn()
        .with_context(|| format!("failed to start {program}"))?;

    std::thread::sleep(Duration::from_millis(500));
    Ok(child)
}

async fn run(url: &reqwest::Url, cases: Vec<TestCase>) -> Result<()> {
    info!("Connecting to HTTP endpoint: {url}");
    let list_url = url.join("/json/list").context("bad endpoint url")?;
    let targets: Value = reqwest::get(list_url)
        .await
        .context("discovery request failed")?
        .json()
        .await
        .context("discovery response is not JSON")?;

    let ws_url = find_websocket_url(&targets).context("no WebSocket URL found in /json/list")?;
    info!("Switching to WebSocket: {ws_url}");

    let (mut ws, _) = tokio_tungstenite::connect_async(ws_url)
        .await
        .context("websocket connect failed")?;

    for (index, case) in cases.iter().enumerate() {
        info!("");
        info!("[TEST {index}] Test: {}", case.name);
        if case.request.is_empty() {
            wait_for_event(&mut ws, index, case).await;
        } else {
            run_request_case(&mut ws, index, case).await;
        }
    }

    info!("All tests completed.");
    Ok(())
}

fn find_websocket_url(targets: &Value) -> Option<String> {
    let list = targets.as_array()?;
    list.iter().find_map(|target| {
        let kind = target.get("type").and_then(Value::as_str)?;
        if kind != "page" && kind != "node" {
            return None;
        }
        let ws = target.get("webSocketDebuggerUrl").and_then(Value::as_str)?;
        (!ws.is_empty()).then(|| ws.to_string())
    })
}

async fn run_request_case(ws: &mut Ws, index: usize, case: &TestCase) {
    let request: Value = match serde_json::from_str(&case.request) {
        Ok(value @ Value::Object(_)) => value,
        Ok(_) | Err(_) => {
            warn!("[TEST {index}] request is not a JSON object, skipping");
            return;
        }
    };
    let expected_id = request.get("id").and_then(Value::as_i64).unwrap_or(-1);

    if ws
        .send(Message::Text(request.to_string()))
        .await
        .is_err()
    {
        warn!("[TEST {index}] failed to send request");
        return;
    }

    loop {
        let Some(received) = recv_json(ws, CASE_TIMEOUT).await else {
            warn!("[TEST {index}] Timeout waiting for response ID {expected_id}");
            return;
        };

        let id = received.get("id").and_then(Value::as_i64).unwrap_or(-1);
        if id != expected_id {
            // an unrelated event arrived while a response was pending
            continue;
        }

        if case.response.is_empty() || case.response == IGNORE {
            info!("[TEST {index}] Response ignored or not expected.");
        } else {
            match serde_json::from_str::<Value>(&case.response) {
                Ok(expected) if expected == received => info!("[TEST {index}] PASS"),
                Ok(expected) => {
                    warn!("[TEST {index}] FAIL - Expected: {expected} Got: {received}");
                    warn!("[TEST {index}] FAIL - Request was: {request}");
                }
                Err(err) => warn!("[TEST {index}] expected response is not valid JSON: {err}"),
            }
        }
        return;
    }
}

async fn wait_for_event(ws: &mut Ws, index: usize, case: &TestCase) {
    let expected: Value = match serde_json::from_str(&case.response) {
        Ok(value) => value,
        Err(err) => {
            warn!("[TEST {index}] expected event is not valid JSON: {err}");
            return;
        }
    };

    info!("Waiting for event");
    loop {
        let Some(received) = recv_json(ws, CASE_TIMEOUT).await else {
            warn!("[TEST {index}] Timeout waiting for event");
            return;
        };

        // responses carry an id, events do not
        if received.get("id").is_some() {
            continue;
        }
        if received == expected {
            info!("[TEST {index}] EVENT MATCH");
            return;
        }
    }
}

async fn recv_json(ws: &mut Ws, deadline: Duration) -> Option<Value> {
    loop {
        let frame = timeout(deadline, ws.next()).await.ok()??;
        match frame {
            Ok(Message::Text(text)) => match serde_json::from_str(&text) {
                Ok(value) => return Some(value),
                Err(err) => {
                    warn!("received frame is not valid JSON: {err}");
                    continue;
                }
            },
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => continue,
        }
    }
}

//! Asynchronous backend events converted into CDP notifications.

use serde_json::{json, Value};
use tracing::{debug, warn};

use super::{backtrace_command, debugger, resume_command};
use crate::bridge::BackendHandle;
use crate::error::AdapterError;
use crate::value;

/// Handle events the adapter answers itself. Returns `true` when the event
/// was consumed and must not reach any client.
///
/// An `InlineEvalFinished` with an `undefined` result means the engine
/// paused on a transient evaluation nobody asked to observe; the adapter
/// resumes it synchronously.
pub(crate) async fn auto_reply(
    payload: &Value,
    bridge: &BackendHandle,
) -> Result<bool, AdapterError> {
    if value::nested_str(payload, &["Event", "type"]) == Some("InlineEvalFinished")
        && value::nested_str(payload, &["Event", "attributes", "message"]) == Some("undefined")
    {
        bridge.call(resume_command()).await?;
        debug!(target: "cdp-adapter", "auto-resumed after InlineEvalFinished with undefined result");
        return Ok(true);
    }
    Ok(false)
}

/// Map one backend event to a CDP notification. `None` means the event type
/// has no mapping; the caller drops it with a warning.
pub(crate) async fn map_event(payload: &Value, bridge: &BackendHandle) -> Option<Value> {
    let kind = value::nested_str(payload, &["Event", "type"])?;
    let attributes = value::nested(payload, &["Event", "attributes"])
        .cloned()
        .unwrap_or_else(|| json!({}));

    let event = match kind {
        "Interrupted" => paused("interrupted", json!([]), None),
        "Breakpoint" => {
            let hit = attributes
                .get("breakPointId")
                .map(display_string)
                .unwrap_or_else(|| "-1".to_string());
            paused("other", json!([]), Some(json!([hit])))
        }
        "SteppingFinished" => paused("step", json!([]), None),
        "LocationReached" => paused("location", json!([]), None),
        "DebuggerInvocationRequest" => {
            paused("debuggerStatement DebuggerInvocationRequest", json!([]), None)
        }
        "InlineEvalFinished" => {
            let frames = fetch_call_frames(bridge).await;
            paused("debuggerStatement InlineEvalFinished", frames, None)
        }
        "Exception" => json!({
            "method": "Runtime.exceptionThrown",
            "params": {
                "exceptionDetails": {
                    "text": attributes.get("message").cloned().unwrap_or_else(|| json!("")),
                    "exception": attributes.get("value").cloned().unwrap_or(Value::Null),
                }
            }
        }),
        "Trace" => json!({
            "method": "Console.messageAdded",
            "params": {
                "message": {
                    "text": attributes.get("message").cloned().unwrap_or_else(|| json!("")),
                    "level": attributes.get("level").cloned().unwrap_or_else(|| json!("")),
                }
            }
        }),
        _ => return None,
    };

    Some(event)
}

fn paused(reason: &str, call_frames: Value, hit_breakpoints: Option<Value>) -> Value {
    let mut params = json!({ "reason": reason, "callFrames": call_frames });
    if let Some(hits) = hit_breakpoints {
        params["hitBreakpoints"] = hits;
    }
    json!({ "method": "Debugger.paused", "params": params })
}

async fn fetch_call_frames(bridge: &BackendHandle) -> Value {
    match bridge.call(backtrace_command(0)).await {
        Ok(reply) => Value::Array(debugger::call_frames(
            reply.get("Result").unwrap_or(&Value::Null),
        )),
        Err(err) => {
            warn!(target: "cdp-adapter", %err, "backtrace fetch for inline eval failed");
            json!([])
        }
    }
}

fn display_string(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Number(number) => number.to_string(),
        _ => "-1".to_string(),
    }
}

//! Debugger domain: `Debugger.*` requests and their responses.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};

use super::{command, evaluate_command, Domain, TranslatedRequest};
use crate::value;

/// Script names arrive as URLs like `jsrunner://test.js` or decorated like
/// `test.js (2)`; the backend only knows plain file names.
static SCRIPT_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:.*://)?\s*([^()]+?)(?:\s*\(\d+\))?\s*$").expect("script name pattern")
});

pub(crate) fn normalize_script_name(input: &str) -> String {
    match SCRIPT_NAME.captures(input) {
        Some(captures) => captures[1].trim().to_string(),
        None => input.trim().to_string(),
    }
}

pub(crate) fn map_request(cdp: &Value) -> Option<TranslatedRequest> {
    let method = cdp.get("method").and_then(Value::as_str)?;
    let id = cdp.get("id").and_then(Value::as_i64).unwrap_or(-1);
    let params = cdp.get("params").cloned().unwrap_or_else(|| json!({}));

    let mut passthrough = false;
    let backend = match method {
        "Debugger.enable" => command(id, "Attach", None),
        "Debugger.disable" => command(id, "Detach", None),

        "Debugger.pause" => command(id, "Interrupt", None),
        "Debugger.resume" => command(id, "Continue", None),
        "Debugger.stepInto" => command(id, "StepInto", None),
        "Debugger.stepOver" => command(id, "StepOver", None),
        "Debugger.stepOut" => command(id, "StepOut", None),

        "Debugger.setBreakpointByUrl" => {
            let url = params.get("url").and_then(Value::as_str).unwrap_or_default();
            command(
                id,
                "SetBreakpoint",
                Some(json!({
                    "breakpointData": {
                        "fileName": normalize_script_name(url),
                        "lineNumber": params.get("lineNumber").cloned().unwrap_or_else(|| json!(0)),
                        "condition": params.get("condition").cloned().unwrap_or_else(|| json!("")),
                        // breakpoints are always enabled when set over CDP
                        "enabled": true,
                    }
                })),
            )
        }
        "Debugger.removeBreakpoint" => command(
            id,
            "DeleteBreakpoint",
            Some(json!({
                "breakpointId": params.get("breakpointId").cloned().unwrap_or(Value::Null),
            })),
        ),
        "Debugger.getPossibleBreakpoints" => command(id, "GetBreakpoints", None),

        "Debugger.getScriptSource" => command(
            id,
            "GetScriptData",
            Some(json!({
                "scriptId": params.get("scriptId").cloned().unwrap_or(Value::Null),
            })),
        ),

        "Debugger.getStackTrace" => command(id, "GetBacktrace", None),

        "Debugger.evaluateOnCallFrame" => evaluate_command(id, &params, true),

        // not supported by the backend, answered locally with an empty result
        "Debugger.setPauseOnExceptions"
        | "Debugger.setAsyncCallStackDepth"
        | "Debugger.setBlackboxPatterns" => {
            passthrough = true;
            command(id, "NoOp", None)
        }

        _ => return None,
    };

    Some(TranslatedRequest {
        domain: Domain::Debugger,
        passthrough,
        command: backend,
    })
}

pub(crate) fn map_response(backend: &Value, original: &Value) -> Value {
    let id = backend.get("ID").cloned().unwrap_or_else(|| json!(-1));
    let method = original
        .get("method")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let result = backend.get("Result").cloned().unwrap_or_else(|| json!({}));

    match method {
        "Debugger.getScriptSource" => {
            let contents = value::nested(backend, &["Result", "result", "contents"])
                .cloned()
                .unwrap_or(Value::Null);
            json!({ "id": id, "result": { "scriptSource": contents } })
        }

        "Debugger.removeBreakpoint" => json!({ "id": id, "result": {} }),

        "Debugger.setBreakpointByUrl" => match breakpoint_id(backend) {
            Some(breakpoint) => {
                json!({ "id": id, "result": { "breakpointId": breakpoint.to_string() } })
            }
            None => {
                let url = value::nested_str(original, &["params", "url"]).unwrap_or_default();
                json!({
                    "id": id,
                    "error": {
                        "code": -32000,
                        "message": format!("No script matching {url}"),
                    }
                })
            }
        },

        "Debugger.getStackTrace" => {
            let frames = call_frames(backend.get("Result").unwrap_or(&Value::Null));
            json!({ "id": id, "result": { "callFrames": frames } })
        }

        "Debugger.getPossibleBreakpoints" => {
            let breakpoints = value::nested(backend, &["Result", "result"])
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            let locations: Vec<Value> = breakpoints
                .iter()
                .map(|entry| {
                    json!({
                        "lineNumber": entry.get("lineNumber").cloned().unwrap_or(Value::Null),
                        "scriptId": entry.get("scriptId").cloned().unwrap_or(Value::Null),
                    })
                })
                .collect();
            json!({ "id": id, "result": { "locations": locations } })
        }

        "Debugger.evaluateOnCallFrame" => {
            if result.get("type").and_then(Value::as_str) == Some("ObjectValue") {
                json!({
                    "id": id,
                    "result": {
                        "result": {
                            "type": "object",
                            "objectId": result.get("value").cloned().unwrap_or(Value::Null),
                        }
                    }
                })
            } else {
                json!({ "id": id, "result": { "result": result } })
            }
        }

        "Debugger.setPauseOnExceptions"
        | "Debugger.setAsyncCallStackDepth"
        | "Debugger.setBlackboxPatterns" => json!({ "id": id, "result": {} }),

        _ => json!({ "id": id, "result": result }),
    }
}

/// A breakpoint was set when the backend result parses as an integer.
fn breakpoint_id(backend: &Value) -> Option<i64> {
    match value::nested(backend, &["Result", "result"])? {
        Value::Number(number) => number.as_i64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

/// Convert backend stack frames to CDP callFrames. Two input shapes are
/// accepted: an object per frame, or textual `"func at file:line"`.
pub(crate) fn call_frames(result: &Value) -> Vec<Value> {
    let Some(frames) = result.as_array() else {
        return Vec::new();
    };
    frames
        .iter()
        .map(|frame| match frame {
            Value::String(text) => parse_text_frame(text),
            Value::Object(map) => json!({
                "functionName": map.get("functionName").cloned().unwrap_or_else(|| json!("")),
                "url": map.get("fileName").cloned().unwrap_or_else(|| json!("")),
                "lineNumber": map.get("lineNumber").cloned().unwrap_or_else(|| json!(0)),
            }),
            _ => json!({ "functionName": "", "url": "", "lineNumber": 0 }),
        })
        .collect()
}

fn parse_text_frame(text: &str) -> Value {
    let Some((function, rest)) = text.split_once(" at ") else {
        return json!({ "functionName": "", "url": "", "lineNumber": 0 });
    };
    let (file, line) = match rest.rsplit_once(':') {
        Some((file, line)) => (file, line.parse::<i64>().unwrap_or(0)),
        None => (rest, 0),
    };
    json!({ "functionName": function, "url": file, "lineNumber": line })
}

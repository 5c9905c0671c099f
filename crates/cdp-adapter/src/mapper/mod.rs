//! Bidirectional mapping between CDP and the engine debug vocabulary.
//!
//! Requests are translated per CDP domain; the dispatcher tries the
//! Debugger mapper first, then Runtime, and the first translation wins.
//! The original CDP request is kept alongside the in-flight command so the
//! response mapper can recover which translator to invoke.

pub(crate) mod debugger;
pub(crate) mod event;
pub(crate) mod runtime;

use serde_json::{json, Value};
use tracing::warn;

use crate::pending::PendingRequest;

/// CDP domain that produced a translation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Domain {
    Debugger,
    Runtime,
}

/// A CDP request translated into a backend command.
#[derive(Clone, Debug)]
pub struct TranslatedRequest {
    pub domain: Domain,
    /// Answered locally with an empty result, never forwarded.
    pub passthrough: bool,
    /// Backend command `{ID, Command: {type, attributes}}`.
    pub command: Value,
}

/// Build a backend command envelope.
pub(crate) fn command(id: i64, kind: &str, attributes: Option<Value>) -> Value {
    let mut cmd = json!({ "type": kind });
    if let Some(attrs) = attributes {
        cmd["attributes"] = attrs;
    }
    json!({ "ID": id, "Command": cmd })
}

/// Commands the adapter issues on its own behalf. Correlator 0 marks them
/// as internal, it is never used by real clients.
pub(crate) fn scripts_command(id: i64) -> Value {
    command(id, "GetScripts", None)
}

pub(crate) fn backtrace_command(id: i64) -> Value {
    command(id, "GetBacktrace", None)
}

pub(crate) fn resume_command() -> Value {
    json!({ "Command": { "type": "Resume", "attributes": {} } })
}

/// Control request that asks the backend to deliver one queued event.
pub(crate) fn pull_event() -> Value {
    json!({ "Control": "PullEvent" })
}

/// Shared builder for the two evaluate-shaped CDP methods. An expression
/// that is literally `this` maps to `GetThisObject` instead of `Evaluate`.
pub(crate) fn evaluate_command(id: i64, params: &Value, on_call_frame: bool) -> Value {
    if !on_call_frame {
        return command(
            id,
            "Evaluate",
            Some(json!({
                "program": params.get("expression").cloned().unwrap_or_else(|| json!("")),
            })),
        );
    }

    let expression = params
        .get("expression")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let context_index = params
        .get("callFrameId")
        .cloned()
        .unwrap_or(Value::Null);

    if expression == "this" {
        command(
            id,
            "GetThisObject",
            Some(json!({ "contextIndex": context_index })),
        )
    } else {
        command(
            id,
            "Evaluate",
            Some(json!({ "program": expression, "contextIndex": context_index })),
        )
    }
}

/// Translate a CDP request into a backend command, trying each domain
/// mapper in order. `None` means no module recognised the method.
pub fn map_request(cdp: &Value) -> Option<TranslatedRequest> {
    debugger::map_request(cdp).or_else(|| runtime::map_request(cdp))
}

/// Convert a backend response into a CDP response using the stored
/// original request. Without one the result is a best-effort generic
/// wrapper around the raw backend payload.
pub fn map_response(backend: &Value, original: Option<&PendingRequest>) -> Value {
    match original {
        Some(pending) => match pending.domain {
            Domain::Debugger => debugger::map_response(backend, &pending.request),
            Domain::Runtime => runtime::map_response(backend, &pending.request),
        },
        None => {
            let id = backend.get("ID").cloned().unwrap_or_else(|| json!(-1));
            warn!(
                target: "cdp-adapter",
                "original cdp request not found for backend response, wrapping as-is"
            );
            json!({
                "id": id,
                "result": backend.get("Result").cloned().unwrap_or_else(|| json!({})),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(domain: Domain, request: Value) -> PendingRequest {
        PendingRequest {
            domain,
            request,
            client: 1,
        }
    }

    #[test]
    fn dispatch_tries_debugger_then_runtime() {
        let debugger = json!({ "id": 1, "method": "Debugger.pause" });
        let runtime = json!({ "id": 2, "method": "Runtime.evaluate", "params": { "expression": "1+1" } });

        let first = map_request(&debugger).expect("debugger method maps");
        assert_eq!(first.domain, Domain::Debugger);
        let second = map_request(&runtime).expect("runtime method maps");
        assert_eq!(second.domain, Domain::Runtime);
    }

    #[test]
    fn unknown_method_maps_to_none() {
        let cdp = json!({ "id": 99, "method": "Profiler.enable" });
        assert!(map_request(&cdp).is_none());
    }

    #[test]
    fn response_without_original_becomes_generic_wrapper() {
        let backend = json!({ "ID": 7, "Result": { "anything": true } });
        let cdp = map_response(&backend, None);
        assert_eq!(cdp, json!({ "id": 7, "result": { "anything": true } }));
    }

    #[test]
    fn generic_wrapper_defaults_empty_result() {
        let backend = json!({ "ID": 7 });
        let cdp = map_response(&backend, None);
        assert_eq!(cdp, json!({ "id": 7, "result": {} }));
    }

    #[test]
    fn response_id_echoes_request_id() {
        let request = json!({ "id": 31, "method": "Debugger.pause" });
        let translated = map_request(&request).expect("maps");
        assert_eq!(translated.command.get("ID"), Some(&json!(31)));

        let backend = json!({ "ID": 31, "Result": {} });
        let response = map_response(&backend, Some(&pending(translated.domain, request)));
        assert_eq!(response.get("id"), Some(&json!(31)));
    }

    #[test]
    fn evaluate_this_maps_to_get_this_object() {
        let params = json!({ "expression": "this", "callFrameId": 2 });
        let cmd = evaluate_command(4, &params, true);
        assert_eq!(
            crate::value::nested_str(&cmd, &["Command", "type"]),
            Some("GetThisObject")
        );
        assert_eq!(
            crate::value::nested_i64(&cmd, &["Command", "attributes", "contextIndex"]),
            Some(2)
        );
    }
}

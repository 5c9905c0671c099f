//! Runtime domain: `Runtime.*` requests and their responses.

use serde_json::{json, Value};

use super::{command, evaluate_command, Domain, TranslatedRequest};

pub(crate) fn map_request(cdp: &Value) -> Option<TranslatedRequest> {
    let method = cdp.get("method").and_then(Value::as_str)?;
    let id = cdp.get("id").and_then(Value::as_i64).unwrap_or(-1);
    let params = cdp.get("params").cloned().unwrap_or_else(|| json!({}));

    let mut passthrough = false;
    let backend = match method {
        "Runtime.evaluate" => evaluate_command(id, &params, false),

        "Runtime.getProperties" => command(
            id,
            "GetPropertiesByIterator",
            Some(json!({
                "iteratorId": params.get("objectId").cloned().unwrap_or(Value::Null),
            })),
        ),

        "Runtime.callFunctionOn" => command(
            id,
            "ScriptValueToString",
            Some(json!({
                "scriptValue": {
                    "type": "ObjectValue",
                    "value": params.get("functionDeclaration").cloned().unwrap_or(Value::Null),
                }
            })),
        ),

        // not supported by the backend, answered locally with an empty result
        "Runtime.addBinding"
        | "Runtime.removeBinding"
        | "Runtime.releaseObject"
        | "Runtime.releaseObjectGroup"
        | "Runtime.getHeapUsage"
        | "Runtime.awaitPromise" => {
            passthrough = true;
            command(id, "NoOp", None)
        }

        _ => return None,
    };

    Some(TranslatedRequest {
        domain: Domain::Runtime,
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
        "Runtime.evaluate" => json!({
            "id": id,
            "result": { "result": { "type": "string", "value": result } },
        }),

        "Runtime.getProperties" => {
            let properties = result.as_array().cloned().unwrap_or_default();
            json!({ "id": id, "result": { "result": properties } })
        }

        "Runtime.callFunctionOn" => json!({ "id": id, "result": result }),

        "Runtime.addBinding"
        | "Runtime.removeBinding"
        | "Runtime.releaseObject"
        | "Runtime.releaseObjectGroup"
        | "Runtime.getHeapUsage"
        | "Runtime.awaitPromise" => json!({ "id": id, "result": {} }),

        _ => json!({ "id": id, "result": result }),
    }
}

//! Script descriptors as reported by the backend.

use serde_json::{json, Value};
use sha2::{Digest, Sha256};

/// Build a `Debugger.scriptParsed` notification for one backend script
/// descriptor `{id, fileName, contents, baseLineNumber}`.
pub fn script_parsed_event(script: &Value, context_id: i64, frontend: &str) -> Value {
    let contents = script
        .get("contents")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let file_name = script
        .get("fileName")
        .and_then(Value::as_str)
        .unwrap_or("main.js");
    let script_id = script.get("id").and_then(Value::as_i64).unwrap_or(1);

    let hash = format!("{:x}", Sha256::digest(contents.as_bytes()));
    let end_line = contents.matches('\n').count();

    json!({
        "method": "Debugger.scriptParsed",
        "params": {
            "scriptId": script_id.to_string(),
            "url": format!("{frontend}://{file_name}"),
            "startLine": 0,
            "startColumn": 0,
            "endLine": end_line,
            "endColumn": 0,
            "executionContextId": context_id,
            "hash": hash,
        }
    })
}

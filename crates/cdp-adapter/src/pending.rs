//! Correlation of in-flight request ids to their original CDP payloads.

use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::Value;
use tracing::warn;

use crate::mapper::Domain;
use crate::ClientId;

/// One forwarded CDP request awaiting its backend response.
#[derive(Clone, Debug)]
pub struct PendingRequest {
    /// Domain whose mapper translated the request; selects the response
    /// translator when the backend reply arrives.
    pub domain: Domain,
    /// The original CDP request as received on the wire.
    pub request: Value,
    /// Socket that sent the request; the response goes back to it alone.
    pub client: ClientId,
}

/// Table of in-flight requests, keyed by the CDP id. Entries are inserted
/// when a command is forwarded to the backend and removed when its response
/// arrives.
#[derive(Default)]
pub struct PendingRequests {
    inner: Mutex<HashMap<i64, PendingRequest>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// A duplicate id overwrites the previous entry; CDP clients are not
    /// supposed to reuse an id while it is in flight.
    pub fn store(&self, id: i64, entry: PendingRequest) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.insert(id, entry).is_some() {
            warn!(
                target: "cdp-adapter",
                id,
                "duplicate in-flight request id, previous entry overwritten"
            );
        }
    }

    pub fn take(&self, id: i64) -> Option<PendingRequest> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id)
    }

    /// Number of backend commands currently in flight.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(method: &str) -> PendingRequest {
        PendingRequest {
            domain: Domain::Debugger,
            request: json!({ "id": 1, "method": method }),
            client: 1,
        }
    }

    #[test]
    fn take_removes_the_entry() {
        let table = PendingRequests::new();
        table.store(5, entry("Debugger.pause"));
        assert_eq!(table.len(), 1);

        let taken = table.take(5).expect("stored entry");
        assert_eq!(
            taken.request.get("method").and_then(|m| m.as_str()),
            Some("Debugger.pause")
        );
        assert!(table.is_empty());
        assert!(table.take(5).is_none());
    }

    #[test]
    fn unknown_id_yields_none() {
        let table = PendingRequests::new();
        assert!(table.take(99).is_none());
    }

    #[test]
    fn duplicate_id_overwrites() {
        let table = PendingRequests::new();
        table.store(1, entry("Debugger.pause"));
        table.store(1, entry("Debugger.resume"));
        assert_eq!(table.len(), 1);

        let taken = table.take(1).expect("stored entry");
        assert_eq!(
            taken.request.get("method").and_then(|m| m.as_str()),
            Some("Debugger.resume")
        );
    }
}

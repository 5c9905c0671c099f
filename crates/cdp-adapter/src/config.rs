use serde::{Deserialize, Serialize};

/// Configuration for one CDP endpoint instance.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AdapterConfig {
    /// Process-wide name used to synthesise target ids, URLs and the
    /// debugger id exposed over discovery. Immutable after construction.
    pub frontend_name: String,
    /// TCP port on loopback. Port 0 picks an ephemeral port.
    pub port: u16,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            frontend_name: "jsrunner".to_string(),
            port: 9222,
        }
    }
}

impl AdapterConfig {
    pub fn new(frontend_name: impl Into<String>, port: u16) -> Self {
        Self {
            frontend_name: frontend_name.into(),
            port,
        }
    }

    pub(crate) fn lower_name(&self) -> String {
        self.frontend_name.to_lowercase()
    }

    /// Debug target id, also the only accepted WebSocket upgrade target.
    pub(crate) fn target_id(&self) -> String {
        format!("{}-js", self.lower_name())
    }
}

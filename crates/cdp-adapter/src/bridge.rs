//! Bridge across the engine thread boundary.
//!
//! The engine owns its debug agent on a dedicated thread; all external
//! access goes through this bridge. CDP-originated commands are pushed
//! asynchronously and their replies arrive later on the shared message
//! stream, while the adapter's own requests use a synchronous call with a
//! oneshot reply slot and correlator 0.

use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::debug;

use crate::error::{AdapterError, AdapterErrorKind};

/// Engine-side debug agent. Implementations run on the dedicated engine
/// thread and must answer every command they are handed.
pub trait EngineBackend: Send + 'static {
    /// Called once on the engine thread before the command loop starts.
    fn attach(&mut self, notifier: EventNotifier) {
        let _ = notifier;
    }

    /// Process one backend command and produce its reply.
    fn handle_request(&mut self, request: Value) -> Value;
}

/// Messages flowing from the engine side to the adapter.
#[derive(Clone, Debug)]
pub enum BackendMessage {
    /// Reply to an asynchronously pushed command.
    Response(Value),
    /// The agent has this many events queued for pulling.
    EventsPending(usize),
}

/// Handle the agent uses to raise the events-pending signal. Safe to call
/// from the engine thread at any time.
#[derive(Clone)]
pub struct EventNotifier {
    tx: mpsc::UnboundedSender<BackendMessage>,
}

impl EventNotifier {
    pub fn events_pending(&self, count: usize) {
        if self.tx.send(BackendMessage::EventsPending(count)).is_err() {
            debug!(target: "cdp-adapter", "events-pending signal dropped, adapter gone");
        }
    }
}

struct EngineCommand {
    payload: Value,
    responder: Option<oneshot::Sender<Value>>,
}

/// Adapter-side handle to the engine thread.
pub struct BackendHandle {
    command_tx: mpsc::Sender<EngineCommand>,
    messages_rx: Mutex<mpsc::UnboundedReceiver<BackendMessage>>,
}

impl BackendHandle {
    /// Start the engine thread and hand ownership of the agent to it.
    /// Commands are processed strictly in submission order. Dropping the
    /// handle closes the command channel and ends the thread.
    pub fn spawn(mut backend: impl EngineBackend) -> Self {
        let (command_tx, mut command_rx) = mpsc::channel::<EngineCommand>(128);
        let (messages_tx, messages_rx) = mpsc::unbounded_channel();

        let notifier = EventNotifier {
            tx: messages_tx.clone(),
        };
        std::thread::spawn(move || {
            backend.attach(notifier);
            while let Some(command) = command_rx.blocking_recv() {
                let reply = backend.handle_request(command.payload);
                match command.responder {
                    Some(responder) => {
                        if responder.send(reply).is_err() {
                            debug!(
                                target: "cdp-adapter",
                                "caller of synchronous backend call went away"
                            );
                        }
                    }
                    None => {
                        if messages_tx.send(BackendMessage::Response(reply)).is_err() {
                            break;
                        }
                    }
                }
            }
        });

        Self {
            command_tx,
            messages_rx: Mutex::new(messages_rx),
        }
    }

    /// Forward a command without waiting; its reply arrives later on the
    /// message stream.
    pub async fn push(&self, payload: Value) -> Result<(), AdapterError> {
        self.command_tx
            .send(EngineCommand {
                payload,
                responder: None,
            })
            .await
            .map_err(|_| {
                AdapterError::new(AdapterErrorKind::BackendGone)
                    .with_hint("engine command channel closed")
            })
    }

    /// Adapter-internal request; suspends the caller until the engine
    /// thread has produced the reply. Correlator 0 marks it as internal.
    pub async fn call(&self, mut payload: Value) -> Result<Value, AdapterError> {
        if let Some(object) = payload.as_object_mut() {
            object.insert("ID".to_string(), json!(0));
        }
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx
            .send(EngineCommand {
                payload,
                responder: Some(reply_tx),
            })
            .await
            .map_err(|_| {
                AdapterError::new(AdapterErrorKind::BackendGone)
                    .with_hint("engine command channel closed")
            })?;
        reply_rx.await.map_err(|_| {
            AdapterError::new(AdapterErrorKind::BackendGone)
                .with_hint("engine thread dropped the reply")
        })
    }

    /// Next response or signal from the engine side.
    pub async fn next_message(&self) -> Option<BackendMessage> {
        self.messages_rx.lock().await.recv().await
    }
}

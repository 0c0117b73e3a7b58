use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tokio::sync::oneshot;
use tracing::{debug, info, instrument, warn};

use crate::channel::MessageChannel;
use crate::error::{ChannelError, RpcError};

/// JSON-RPC version tag required on every envelope.
pub const JSONRPC_VERSION: &str = "2.0";

/// Protocol version reported by `getVersion`.
pub const PROTOCOL_VERSION: &str = "1.2";

/// Outcome delivered to a completion registered for an outbound request.
///
/// `Ok(None)` means the peer answered with a null or absent result.
pub type RemoteResult = Result<Option<Value>, RpcError>;

/// Outbound half of a JSON-RPC session: envelope emission and reply correlation.
pub struct JsonRpcPeer {
    channel: Arc<dyn MessageChannel>,
    write_lock: tokio::sync::Mutex<()>,
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, oneshot::Sender<RemoteResult>>>,
}

impl std::fmt::Debug for JsonRpcPeer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonRpcPeer")
            .field("next_id", &self.next_id)
            .field("pending", &self.pending_count())
            .finish_non_exhaustive()
    }
}

impl JsonRpcPeer {
    #[must_use]
    pub fn new(channel: Arc<dyn MessageChannel>) -> Self {
        Self {
            channel,
            write_lock: tokio::sync::Mutex::new(()),
            next_id: AtomicU64::new(0),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Sends a fire-and-forget notification.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel is closed or the write fails.
    #[instrument(skip(self, params), level = "debug")]
    pub async fn send_notification(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<(), ChannelError> {
        self.send_envelope(&outbound_envelope(method, params, None))
            .await
    }

    /// Sends a request and returns the receiver that resolves with the peer's reply.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel is closed or the write fails; the request is then
    /// no longer pending.
    #[instrument(skip(self, params), level = "debug")]
    pub async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<oneshot::Receiver<RemoteResult>, ChannelError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = oneshot::channel();
        self.with_pending(|pending| pending.insert(id, sender));

        let sent = self
            .send_envelope(&outbound_envelope(method, params, Some(id)))
            .await;
        if let Err(error) = sent {
            self.with_pending(|pending| pending.remove(&id));
            return Err(error);
        }
        Ok(receiver)
    }

    /// Sends a standalone error notification with a null id.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel is closed or the write fails.
    pub async fn send_error_notification(&self, error: &RpcError) -> Result<(), ChannelError> {
        self.send_envelope(&response_envelope(&Value::Null, Err(error)))
            .await
    }

    /// Number of outbound requests still awaiting a reply.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.with_pending(|pending| pending.len())
    }

    /// Closes the channel and fails every pending request with "Session closed".
    #[instrument(skip(self), level = "debug")]
    pub async fn close(&self) {
        let pending: Vec<_> = self.with_pending(|pending| pending.drain().collect());
        if !pending.is_empty() {
            warn!(
                pending = pending.len(),
                "session closed with pending requests"
            );
        }
        for (_id, completion) in pending {
            let _ = completion.send(Err(RpcError::internal_error("Session closed")));
        }
        self.channel.close().await;
    }

    /// Delivers a response from the peer to the matching pending request.
    fn handle_response(&self, message: &Map<String, Value>) -> Result<(), RpcError> {
        let Some(id) = message.get("id").and_then(Value::as_u64) else {
            return Err(RpcError::invalid_request(
                "response ID value missing or wrong type",
            ));
        };
        let Some(completion) = self.with_pending(|pending| pending.remove(&id)) else {
            return Err(RpcError::invalid_request(
                "response ID does not correspond to any open request",
            ));
        };

        let outcome = match message.get("error") {
            Some(Value::Object(error)) => Err(RpcError::from_json(error)),
            _ => Ok(message.get("result").filter(|result| !result.is_null()).cloned()),
        };
        if completion.send(outcome).is_err() {
            debug!(id, "response arrived after the requester went away");
        }
        Ok(())
    }

    async fn send_envelope(&self, envelope: &Value) -> Result<(), ChannelError> {
        let text = envelope.to_string();
        self.send_text(text).await
    }

    async fn send_text(&self, text: String) -> Result<(), ChannelError> {
        let _write = self.write_lock.lock().await;
        debug!(%text, "sending message");
        self.channel.send_text(text).await
    }

    fn with_pending<R>(
        &self,
        action: impl FnOnce(&mut HashMap<u64, oneshot::Sender<RemoteResult>>) -> R,
    ) -> R {
        let mut pending = self
            .pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        action(&mut pending)
    }
}

fn outbound_envelope(method: &str, params: Option<Value>, id: Option<u64>) -> Value {
    let mut envelope = Map::new();
    envelope.insert("jsonrpc".to_string(), json!(JSONRPC_VERSION));
    envelope.insert("method".to_string(), json!(method));
    if let Some(params) = params {
        envelope.insert("params".to_string(), params);
    }
    if let Some(id) = id {
        envelope.insert("id".to_string(), json!(id));
    }
    Value::Object(envelope)
}

fn response_envelope(id: &Value, outcome: Result<&Value, &RpcError>) -> Value {
    match outcome {
        Ok(result) => json!({
            "jsonrpc": JSONRPC_VERSION,
            "id": id,
            "result": result,
        }),
        Err(error) => json!({
            "jsonrpc": JSONRPC_VERSION,
            "id": id,
            "error": error.to_json(),
        }),
    }
}

/// Method surface layered on top of the JSON-RPC engine.
#[async_trait]
pub trait RpcHandler: Send + Sync {
    /// Handles one inbound call. `Ok(None)` is sent as a null result.
    async fn call(&self, method: &str, params: Map<String, Value>)
    -> Result<Option<Value>, RpcError>;

    /// Releases handler resources when the session is torn down.
    async fn session_closed(&self) {}
}

/// Handler exposing only the methods every session answers.
#[derive(Debug, Clone, Copy, Default)]
pub struct BaseHandler;

#[async_trait]
impl RpcHandler for BaseHandler {
    async fn call(
        &self,
        method: &str,
        _params: Map<String, Value>,
    ) -> Result<Option<Value>, RpcError> {
        Err(RpcError::method_not_found(method))
    }
}

/// Result of processing one inbound message, before anything is written back.
#[derive(Debug, Default)]
struct Handled {
    response: Option<String>,
    send_ping: bool,
}

/// One JSON-RPC session bound to a message channel and a method handler.
pub struct RpcSession {
    peer: Arc<JsonRpcPeer>,
    handler: Arc<dyn RpcHandler>,
    processing: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for RpcSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcSession")
            .field("peer", &self.peer)
            .finish_non_exhaustive()
    }
}

impl RpcSession {
    #[must_use]
    pub fn new(peer: Arc<JsonRpcPeer>, handler: Arc<dyn RpcHandler>) -> Self {
        Self {
            peer,
            handler,
            processing: tokio::sync::Mutex::new(()),
        }
    }

    /// Creates a session with only the base methods.
    #[must_use]
    pub fn with_base_methods(channel: Arc<dyn MessageChannel>) -> Self {
        Self::new(Arc::new(JsonRpcPeer::new(channel)), Arc::new(BaseHandler))
    }

    #[must_use]
    pub fn peer(&self) -> &Arc<JsonRpcPeer> {
        &self.peer
    }

    /// Processes one inbound text message end to end and writes any response.
    ///
    /// Messages are processed one at a time: the next message waits until the previous
    /// call, including any BLE work it started, has resolved.
    #[instrument(skip(self, text), level = "debug", fields(len = text.len()))]
    pub async fn did_receive_text(&self, text: &str) {
        let handled = {
            let _processing = self.processing.lock().await;
            self.handle_message(text).await
        };

        if let Some(response) = handled.response
            && let Err(error) = self.peer.send_text(response).await
        {
            warn!(%error, "failed to send response");
        }
        if handled.send_ping {
            self.send_ping().await;
        }
    }

    /// Tears the session down: handler resources first, then the channel and pending requests.
    #[instrument(skip(self), level = "info")]
    pub async fn close(&self) {
        self.handler.session_closed().await;
        self.peer.close().await;
    }

    async fn handle_message(&self, text: &str) -> Handled {
        let message = match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(message)) => message,
            Ok(_) | Err(_) => {
                return respond(
                    &Value::Null,
                    Err(RpcError::parse_error("unrecognized message structure")),
                );
            }
        };
        let id = message.get("id").cloned().unwrap_or(Value::Null);

        if message.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
            return respond(
                &id,
                Err(RpcError::invalid_request(
                    "unrecognized JSON-RPC version string",
                )),
            );
        }

        if message.contains_key("method") {
            let Some(method) = message.get("method").and_then(Value::as_str) else {
                return respond(
                    &id,
                    Err(RpcError::invalid_request(
                        "method value missing or not a string",
                    )),
                );
            };
            let params = match message.get("params") {
                Some(Value::Object(params)) => params.clone(),
                _ => Map::new(),
            };
            debug!(method, "received request");

            let outcome = self.dispatch(method, params).await;
            let mut handled = respond(&id, outcome);
            handled.send_ping = method == "pingMe";
            handled
        } else if message.contains_key("result") || message.contains_key("error") {
            match self.peer.handle_response(&message) {
                Ok(()) => Handled::default(),
                Err(error) => respond(&id, Err(error)),
            }
        } else {
            respond(
                &id,
                Err(RpcError::invalid_request(
                    "message is neither request nor response",
                )),
            )
        }
    }

    async fn dispatch(
        &self,
        method: &str,
        params: Map<String, Value>,
    ) -> Result<Option<Value>, RpcError> {
        match method {
            "pingMe" => Ok(Some(json!("willPing"))),
            "getVersion" => Ok(Some(json!({ "protocol": PROTOCOL_VERSION }))),
            _ => self.handler.call(method, params).await,
        }
    }

    async fn send_ping(&self) {
        match self.peer.send_request("ping", None).await {
            Ok(reply) => {
                tokio::spawn(async move {
                    match reply.await {
                        Ok(Ok(result)) => info!(?result, "ping result"),
                        Ok(Err(error)) => info!(%error, "ping failed"),
                        Err(_closed) => debug!("ping abandoned"),
                    }
                });
            }
            Err(error) => warn!(%error, "failed to send ping"),
        }
    }
}

fn respond(id: &Value, outcome: Result<Option<Value>, RpcError>) -> Handled {
    let envelope = match &outcome {
        Ok(result) => response_envelope(id, Ok(result.as_ref().unwrap_or(&Value::Null))),
        Err(error) => response_envelope(id, Err(error)),
    };
    let response = serde_json::to_string(&envelope).unwrap_or_else(|error| {
        warn!(%error, "failed to encode response");
        response_envelope(
            id,
            Err(&RpcError::internal_error(format!(
                "Could not encode response: {error}"
            ))),
        )
        .to_string()
    });

    Handled {
        response: Some(response),
        send_ping: false,
    }
}

//! Scripted in-process transport for bridge and handler tests.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::{json, Value};

use super::error::{TransportFault, TransportReason};
use super::transport::Transport;

/// What the fake peer does with the next request it receives.
#[derive(Debug, Clone)]
pub(crate) enum Step {
    /// Replies `{"status":"ok", operation_id, correlation_id}` copied from the request.
    Echo,
    /// Replies with this value verbatim.
    Reply(Value),
    /// Replies with these raw bytes.
    Raw(Bytes),
    /// Replies once with a foreign correlation id, then echoes.
    Stale,
    /// Fails the send.
    FailSend(TransportReason),
    /// Accepts the send, then fails the receive.
    FailRecv(TransportReason),
    /// Accepts the send and never replies.
    Hang,
}

enum Pending {
    Frame(Bytes),
    Fault(TransportFault),
    Hang,
}

#[derive(Default)]
struct State {
    script: VecDeque<Step>,
    pending: VecDeque<Pending>,
    sent: Vec<Value>,
    resets: usize,
    connects: usize,
    connected: bool,
    refuse_connect: bool,
}

/// Handle for inspecting a [`ScriptedTransport`] after it was moved into a bridge.
#[derive(Clone, Default)]
pub(crate) struct Probe(Arc<Mutex<State>>);

impl Probe {
    /// Every request the transport accepted, decoded as JSON.
    pub(crate) fn sent(&self) -> Vec<Value> {
        self.0.lock().sent.clone()
    }

    pub(crate) fn resets(&self) -> usize {
        self.0.lock().resets
    }

    pub(crate) fn connects(&self) -> usize {
        self.0.lock().connects
    }

    pub(crate) fn refuse_connect(&self, refuse: bool) {
        self.0.lock().refuse_connect = refuse;
    }
}

/// Fake transport driven by a script of [`Step`]s. An exhausted script echoes.
pub(crate) struct ScriptedTransport {
    state: Arc<Mutex<State>>,
}

impl ScriptedTransport {
    pub(crate) fn new(steps: impl IntoIterator<Item = Step>) -> (Self, Probe) {
        let probe = Probe::default();
        probe.0.lock().script.extend(steps);
        (
            Self {
                state: Arc::clone(&probe.0),
            },
            probe,
        )
    }
}

fn echo(request: &Value) -> Bytes {
    let reply = json!({
        "status": "ok",
        "operation_id": request.get("operation_id").cloned().unwrap_or(Value::Null),
        "correlation_id": request.get("correlation_id").cloned().unwrap_or(Value::Null),
    });
    Bytes::from(reply.to_string())
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn connect(&mut self) -> Result<(), TransportFault> {
        let mut state = self.state.lock();
        if state.refuse_connect {
            return Err(TransportFault::new(TransportReason::Unreachable, "refused"));
        }
        if !state.connected {
            state.connected = true;
            state.connects += 1;
        }
        Ok(())
    }

    async fn send(&mut self, frame: Bytes) -> Result<(), TransportFault> {
        let mut state = self.state.lock();
        if !state.connected {
            return Err(TransportFault::new(TransportReason::Closed, "not connected"));
        }
        let step = state.script.pop_front().unwrap_or(Step::Echo);
        if let Step::FailSend(reason) = step {
            return Err(TransportFault::new(reason, "scripted send failure"));
        }

        let request: Value = serde_json::from_slice(&frame).unwrap_or(Value::Null);
        state.sent.push(request.clone());
        match step {
            Step::Echo => state.pending.push_back(Pending::Frame(echo(&request))),
            Step::Reply(value) => state
                .pending
                .push_back(Pending::Frame(Bytes::from(value.to_string()))),
            Step::Raw(bytes) => state.pending.push_back(Pending::Frame(bytes)),
            Step::Stale => {
                let stale = json!({"status": "ok", "correlation_id": "stale-correlation"});
                state
                    .pending
                    .push_back(Pending::Frame(Bytes::from(stale.to_string())));
                state.pending.push_back(Pending::Frame(echo(&request)));
            }
            Step::FailRecv(reason) => state.pending.push_back(Pending::Fault(
                TransportFault::new(reason, "scripted receive failure"),
            )),
            Step::Hang => state.pending.push_back(Pending::Hang),
            Step::FailSend(_) => {}
        }
        Ok(())
    }

    async fn recv(&mut self) -> Result<Bytes, TransportFault> {
        let next = self.state.lock().pending.pop_front();
        match next {
            Some(Pending::Frame(frame)) => Ok(frame),
            Some(Pending::Fault(fault)) => Err(fault),
            Some(Pending::Hang) => std::future::pending().await,
            None => Err(TransportFault::closed()),
        }
    }

    fn reset(&mut self) {
        let mut state = self.state.lock();
        state.connected = false;
        state.pending.clear();
        state.resets += 1;
    }

    fn peer(&self) -> &str {
        "scripted"
    }
}

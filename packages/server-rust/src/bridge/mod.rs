//! Forwarding bridge to the downstream analysis service.
//!
//! The bridge owns one [`Transport`] behind a `tokio::sync::Mutex`. Every
//! call takes the lock, sends one frame and reads exactly one reply before
//! releasing it, so exchanges from concurrent HTTP requests never interleave.
//!
//! Each outbound message is stamped with a fresh `correlation_id`. If a
//! send or receive fails or times out, the connection is reset before the
//! lock is released: a reply that arrives late can only land on the dropped
//! socket, never in front of the next caller. Replies that echo a foreign
//! `correlation_id` are discarded as a second guard.

pub mod error;
pub mod tcp;
#[cfg(test)]
pub(crate) mod testing;
pub mod transport;

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use intelgate_core::messages::ACTION_INVESTIGATE;
use intelgate_core::{ClockSource, DownstreamRequest, SystemClock};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

pub use error::{BridgeError, TransportFault, TransportReason};
pub use tcp::TcpTransport;
pub use transport::Transport;

/// Operation id used for health probes.
pub const HEALTH_CHECK_ID: &str = "health_check";

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Downstream connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Downstream address, `tcp://host:port` or `host:port`.
    pub endpoint: String,
    /// Deadline for connecting and writing one request.
    pub send_timeout: Duration,
    /// Deadline for the matching reply once the request is written.
    pub recv_timeout: Duration,
    /// Receive deadline used by [`ForwardingBridge::ping`].
    pub ping_timeout: Duration,
    /// Largest accepted batch.
    pub max_batch_size: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            endpoint: "tcp://127.0.0.1:5558".to_string(),
            send_timeout: Duration::from_secs(5),
            recv_timeout: Duration::from_secs(30),
            ping_timeout: Duration::from_secs(1),
            max_batch_size: 100,
        }
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// A downstream reply.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    /// Parsed reply; always a JSON object.
    pub value: Value,
    /// The frame exactly as received, for relaying verbatim.
    pub body: Bytes,
}

/// Failure entry in a batch result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemFailure {
    pub operation_id: String,
    pub status: &'static str,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

/// Result for one batch item: the downstream reply or an error entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ItemOutcome {
    Replied(Value),
    Failed(ItemFailure),
}

impl ItemOutcome {
    fn failed(operation_id: String, error: String, correlation_id: Option<String>) -> Self {
        Self::Failed(ItemFailure {
            operation_id,
            status: "error",
            error,
            correlation_id,
        })
    }

    /// A reply counts as a success unless the peer itself reported `"status": "error"`.
    #[must_use]
    pub fn is_success(&self) -> bool {
        match self {
            Self::Replied(value) => value.get("status").and_then(Value::as_str) != Some("error"),
            Self::Failed(_) => false,
        }
    }
}

/// Per-item results of [`ForwardingBridge::forward_batch`], in input order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchOutcome {
    pub outcomes: Vec<ItemOutcome>,
    pub successful: usize,
    pub failed: usize,
}

impl BatchOutcome {
    fn new(outcomes: Vec<ItemOutcome>) -> Self {
        let successful = outcomes.iter().filter(|o| o.is_success()).count();
        let failed = outcomes.len() - successful;
        Self {
            outcomes,
            successful,
            failed,
        }
    }
}

// ---------------------------------------------------------------------------
// Bridge
// ---------------------------------------------------------------------------

struct Channel {
    transport: Box<dyn Transport>,
    /// Set while an exchange is in flight. Still set on entry means the
    /// previous caller was cancelled mid-exchange and the stream is out of step.
    dirty: bool,
}

enum Failure {
    Transport(TransportFault),
    Protocol(String),
}

impl From<TransportFault> for Failure {
    fn from(fault: TransportFault) -> Self {
        Self::Transport(fault)
    }
}

/// Serializes requests onto the single downstream channel.
pub struct ForwardingBridge {
    channel: Mutex<Channel>,
    config: BridgeConfig,
    connected: AtomicBool,
}

impl ForwardingBridge {
    #[must_use]
    pub fn new(transport: Box<dyn Transport>, config: BridgeConfig) -> Self {
        Self {
            channel: Mutex::new(Channel {
                transport,
                dirty: false,
            }),
            config,
            connected: AtomicBool::new(false),
        }
    }

    /// Bridge over a [`TcpTransport`] to `config.endpoint`.
    #[must_use]
    pub fn tcp(config: BridgeConfig) -> Self {
        let transport = TcpTransport::new(config.endpoint.clone());
        Self::new(Box::new(transport), config)
    }

    #[must_use]
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Whether the last exchange (or connect) succeeded.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Opens the connection ahead of the first request.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Transport`] if the peer cannot be reached
    /// within the send deadline.
    pub async fn connect(&self) -> Result<(), BridgeError> {
        let mut channel = self.channel.lock().await;
        let result = match tokio::time::timeout(self.config.send_timeout, channel.transport.connect()).await {
            Ok(result) => result,
            Err(_) => Err(self.send_timeout_fault()),
        };
        self.connected.store(result.is_ok(), Ordering::Release);
        result.map_err(|fault| {
            channel.transport.reset();
            BridgeError::Transport {
                reason: fault.reason,
                detail: fault.detail,
                correlation_id: String::new(),
                operation_id: String::new(),
            }
        })
    }

    /// Sends one request and returns its reply.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Transport`] if sending or receiving fails or times
    /// out, [`BridgeError::Protocol`] if the reply is not a JSON object.
    pub async fn forward(&self, request: DownstreamRequest) -> Result<Reply, BridgeError> {
        let mut channel = self.channel.lock().await;
        self.exchange(&mut channel, request, self.config.recv_timeout)
            .await
    }

    /// Sends each request in order on one held channel.
    ///
    /// A failing item becomes an error outcome and the remaining items are
    /// still sent. Items without a target fail without being sent.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Validation`] for an empty batch or one larger
    /// than `max_batch_size`.
    pub async fn forward_batch(
        &self,
        requests: Vec<DownstreamRequest>,
    ) -> Result<BatchOutcome, BridgeError> {
        if requests.is_empty() {
            return Err(BridgeError::Validation("Empty batch request".to_string()));
        }
        if requests.len() > self.config.max_batch_size {
            return Err(BridgeError::Validation(format!(
                "Batch size too large (max {})",
                self.config.max_batch_size
            )));
        }

        let mut channel = self.channel.lock().await;
        let mut outcomes = Vec::with_capacity(requests.len());
        for (index, request) in requests.into_iter().enumerate() {
            let request = request.with_batch_index(index);
            let missing_target = request.action == ACTION_INVESTIGATE
                && request.target.as_deref().is_none_or(|t| t.trim().is_empty());
            if missing_target {
                outcomes.push(ItemOutcome::failed(
                    request.operation_id,
                    "Target is required".to_string(),
                    None,
                ));
                continue;
            }

            let operation_id = request.operation_id.clone();
            let outcome = match self
                .exchange(&mut channel, request, self.config.recv_timeout)
                .await
            {
                Ok(reply) => ItemOutcome::Replied(reply.value),
                Err(err) => {
                    let correlation_id = err.correlation_id().map(str::to_string);
                    ItemOutcome::failed(operation_id, err.to_string(), correlation_id)
                }
            };
            outcomes.push(outcome);
        }
        drop(channel);

        let batch = BatchOutcome::new(outcomes);
        debug!(successful = batch.successful, failed = batch.failed, "batch forwarded");
        Ok(batch)
    }

    /// Round-trips a `ping` message with the short health deadline.
    ///
    /// The deadline also bounds the wait for the channel, so a probe never
    /// queues behind a slow forward or batch.
    ///
    /// # Errors
    ///
    /// Same as [`forward`](Self::forward), plus a `Timeout` transport error
    /// when the channel stays busy past `ping_timeout`.
    pub async fn ping(&self) -> Result<Duration, BridgeError> {
        let started = Instant::now();
        let Ok(mut channel) = tokio::time::timeout(self.config.ping_timeout, self.channel.lock()).await
        else {
            debug!("health ping skipped, channel busy");
            return Err(BridgeError::Transport {
                reason: TransportReason::Timeout,
                detail: format!(
                    "transport busy for {}",
                    humantime::format_duration(self.config.ping_timeout)
                ),
                correlation_id: String::new(),
                operation_id: HEALTH_CHECK_ID.to_string(),
            });
        };
        let request = DownstreamRequest::ping(HEALTH_CHECK_ID.to_string(), SystemClock.now());
        self.exchange(&mut channel, request, self.config.ping_timeout)
            .await?;
        Ok(started.elapsed())
    }

    async fn exchange(
        &self,
        channel: &mut Channel,
        mut request: DownstreamRequest,
        recv_timeout: Duration,
    ) -> Result<Reply, BridgeError> {
        let correlation_id = Uuid::new_v4().to_string();
        request.correlation_id = Some(correlation_id.clone());
        let operation_id = request.operation_id.clone();
        let started = Instant::now();

        let result = match serde_json::to_vec(&request) {
            Ok(frame) => {
                self.round_trip(channel, Bytes::from(frame), &correlation_id, recv_timeout)
                    .await
            }
            Err(err) => Err(Failure::Protocol(format!("request not serializable: {err}"))),
        };
        metrics::histogram!("intelgate_bridge_exchange_seconds")
            .record(started.elapsed().as_secs_f64());

        let result = result.map_err(|failure| match failure {
            Failure::Transport(fault) => {
                channel.transport.reset();
                channel.dirty = false;
                self.connected.store(false, Ordering::Release);
                BridgeError::Transport {
                    reason: fault.reason,
                    detail: fault.detail,
                    correlation_id: correlation_id.clone(),
                    operation_id: operation_id.clone(),
                }
            }
            Failure::Protocol(detail) => BridgeError::Protocol {
                detail,
                correlation_id: correlation_id.clone(),
                operation_id: operation_id.clone(),
            },
        });

        match &result {
            Ok(_) => {
                self.connected.store(true, Ordering::Release);
                debug!(%operation_id, %correlation_id, action = %request.action, "downstream exchange ok");
                metrics::counter!("intelgate_bridge_requests_total", "outcome" => "ok").increment(1);
            }
            Err(err) => {
                warn!(%operation_id, %correlation_id, peer = %channel.transport.peer(), error = %err, "downstream exchange failed");
                metrics::counter!("intelgate_bridge_requests_total", "outcome" => err.outcome())
                    .increment(1);
            }
        }
        result
    }

    async fn round_trip(
        &self,
        channel: &mut Channel,
        frame: Bytes,
        correlation_id: &str,
        recv_timeout: Duration,
    ) -> Result<Reply, Failure> {
        if channel.dirty {
            debug!("resetting connection left mid-exchange");
            channel.transport.reset();
        }
        channel.dirty = true;

        let transport = &mut channel.transport;
        let sent = tokio::time::timeout(self.config.send_timeout, async {
            transport.connect().await?;
            transport.send(frame).await?;
            Ok::<(), TransportFault>(())
        })
        .await;
        match sent {
            Ok(result) => result?,
            Err(_) => return Err(self.send_timeout_fault().into()),
        }

        let deadline = Instant::now() + recv_timeout;
        loop {
            let body = match tokio::time::timeout_at(deadline, channel.transport.recv()).await {
                Ok(result) => result?,
                Err(_) => {
                    return Err(TransportFault::new(
                        TransportReason::Timeout,
                        format!(
                            "no reply within {}",
                            humantime::format_duration(recv_timeout)
                        ),
                    )
                    .into())
                }
            };

            // One reply was consumed for our request; the stream is back in step.
            channel.dirty = false;
            let value: Value = serde_json::from_slice(&body)
                .map_err(|err| Failure::Protocol(format!("reply is not valid JSON: {err}")))?;
            if !value.is_object() {
                return Err(Failure::Protocol("reply is not a JSON object".to_string()));
            }
            if let Some(echoed) = value.get("correlation_id").and_then(Value::as_str) {
                if echoed != correlation_id {
                    warn!(expected = %correlation_id, received = %echoed, "discarding reply for another request");
                    channel.dirty = true;
                    continue;
                }
            }
            return Ok(Reply { value, body });
        }
    }

    fn send_timeout_fault(&self) -> TransportFault {
        TransportFault::new(
            TransportReason::Timeout,
            format!(
                "send not completed within {}",
                humantime::format_duration(self.config.send_timeout)
            ),
        )
    }
}

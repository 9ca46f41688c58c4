//! TCP transport speaking length-delimited frames.
//!
//! Each frame is a 4-byte big-endian length followed by that many bytes of
//! JSON. One persistent connection is opened lazily and replaced after any
//! failure.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::debug;

use super::error::{TransportFault, TransportReason};
use super::transport::Transport;

/// Largest frame accepted from the downstream peer (16 MiB).
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Strips an optional `tcp://` scheme from an endpoint string.
#[must_use]
pub fn socket_addr_of(endpoint: &str) -> &str {
    endpoint.strip_prefix("tcp://").unwrap_or(endpoint)
}

/// Builds the codec used on both ends of the downstream connection.
#[must_use]
pub fn frame_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(4)
        .max_frame_length(MAX_FRAME_LEN)
        .new_codec()
}

/// [`Transport`] over a single `TcpStream`.
pub struct TcpTransport {
    endpoint: String,
    framed: Option<Framed<TcpStream, LengthDelimitedCodec>>,
}

impl TcpTransport {
    /// Creates an unconnected transport for `endpoint` (`tcp://host:port` or
    /// `host:port`).
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            framed: None,
        }
    }

    fn framed(&mut self) -> Result<&mut Framed<TcpStream, LengthDelimitedCodec>, TransportFault> {
        self.framed
            .as_mut()
            .ok_or_else(|| TransportFault::new(TransportReason::Closed, "not connected"))
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&mut self) -> Result<(), TransportFault> {
        if self.framed.is_some() {
            return Ok(());
        }
        let addr = socket_addr_of(&self.endpoint);
        let stream = TcpStream::connect(addr).await.map_err(|err| {
            TransportFault::new(TransportReason::Unreachable, format!("{addr}: {err}"))
        })?;
        stream.set_nodelay(true)?;
        debug!(peer = %addr, "downstream connection established");
        self.framed = Some(Framed::new(stream, frame_codec()));
        Ok(())
    }

    async fn send(&mut self, frame: Bytes) -> Result<(), TransportFault> {
        self.framed()?.send(frame).await.map_err(TransportFault::from)
    }

    async fn recv(&mut self) -> Result<Bytes, TransportFault> {
        match self.framed()?.next().await {
            Some(Ok(frame)) => Ok(frame.freeze()),
            Some(Err(err)) => Err(err.into()),
            None => Err(TransportFault::closed()),
        }
    }

    fn reset(&mut self) {
        if self.framed.take().is_some() {
            debug!(peer = %self.endpoint, "downstream connection dropped");
        }
    }

    fn peer(&self) -> &str {
        &self.endpoint
    }
}

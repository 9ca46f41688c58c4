//! Transport abstraction for the downstream request/reply channel.

use async_trait::async_trait;
use bytes::Bytes;

use super::error::TransportFault;

/// A single duplex connection to the downstream service.
///
/// The bridge owns exactly one transport and drives it strictly as
/// send-then-receive. Implementations do not need to be `Sync`: the bridge
/// only touches a transport while holding its single-flight lock.
///
/// Deadlines are enforced by the caller, so any method may be cancelled at
/// an await point. After a cancelled or failed call the bridge calls
/// [`reset`](Transport::reset) before the transport is used again.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Establishes the connection if it is not already up.
    async fn connect(&mut self) -> Result<(), TransportFault>;

    /// Writes one complete frame.
    async fn send(&mut self, frame: Bytes) -> Result<(), TransportFault>;

    /// Reads the next complete frame.
    async fn recv(&mut self) -> Result<Bytes, TransportFault>;

    /// Drops the connection and any buffered data. The next
    /// [`connect`](Transport::connect) opens a fresh one.
    fn reset(&mut self);

    /// Human-readable peer address for logs.
    fn peer(&self) -> &str;
}

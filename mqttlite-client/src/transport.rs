use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

/// Suggested record buffer size for TLS transports.
pub const TLS_RECORD_BUFFER_SIZE: usize = 5 * 1024;

/// Byte-stream transport the session drives.
///
/// Implementations deliver their events into the owning
/// [`Client`](crate::Client): handshake completion to
/// [`handle_connected`](crate::Client::handle_connected), inbound bytes to
/// [`handle_recv`](crate::Client::handle_recv) (fractional or coalesced
/// packets are fine), teardown to
/// [`handle_disconnected`](crate::Client::handle_disconnected) and failures
/// to [`handle_error`](crate::Client::handle_error). All of it on a single
/// cooperative context; no entry point is re-entered.
pub trait Transport {
    /// Begins the TCP (or TLS) handshake towards `addr`.
    fn connect(&mut self, addr: SocketAddr) -> io::Result<()>;

    /// Queues `buf` for in-order delivery to the peer.
    fn send(&mut self, buf: &[u8]) -> io::Result<()>;

    /// Tears the stream down. No further sends follow until the next
    /// `connect`. Hosts whose close completes synchronously still deliver a
    /// `handle_disconnected` event afterwards.
    fn close(&mut self);
}

/// Periodic timer; each expiry is delivered to
/// [`handle_timer`](crate::Client::handle_timer).
pub trait Timer {
    /// (Re)arms the timer to fire every `period`. Replaces any earlier
    /// schedule.
    fn arm(&mut self, period: Duration);

    fn cancel(&mut self);
}

/// Outcome of a one-shot host-name lookup.
pub enum Resolution {
    Ready(IpAddr),
    /// The lookup completes later through
    /// [`handle_resolved`](crate::Client::handle_resolved).
    Pending,
    Failed,
}

pub trait Resolver {
    fn resolve(&mut self, host_name: &str) -> Resolution;
}

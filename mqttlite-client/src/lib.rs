//! Lightweight MQTT 3.1.1 client core.
//!
//! Three pieces: the wire codec (re-exported from [`mqttlite_packet`]), a
//! topic-filter dispatch table routing inbound PUBLISH messages to
//! per-subscription handlers, and a [`Client`] session driving the
//! connection state machine over host-provided [`Transport`], [`Resolver`]
//! and [`Timer`] implementations.
//!
//! The runtime model is single-threaded and cooperative: the host event
//! loop delivers transport bytes, connect/disconnect notifications and
//! timer ticks into the `handle_*` entry points, and every entry point runs
//! to completion. No locks, no internal threads.
//!
//! See `examples/sub_client.rs` for a complete host loop over a blocking
//! TCP stream.

mod backoff;
mod client;
mod connection;
mod error;
mod framed;
mod message;
mod options;
mod subscription;
mod topic;
mod transport;

pub use crate::client::{Client, ClientHandle, READ_BUFFER_SIZE};
pub use crate::connection::{Connection, State, WRITE_BUFFER_SIZE};
pub use crate::error::{Error, Result};
pub use crate::message::Message;
pub use crate::options::{ConnectOptions, LastWill, DEFAULT_KEEPALIVE};
pub use crate::subscription::{MessageHandler, DEFAULT_SUBSCRIPTION_LIMIT};
pub use crate::topic::{Filter, Level};
pub use crate::transport::{Resolution, Resolver, Timer, Transport, TLS_RECORD_BUFFER_SIZE};

pub use mqttlite_packet as packet;
pub use mqttlite_packet::{ConnectReturnCode, PacketId, QoS, SubscribeReturnCode};

use std::io;

use mqttlite_packet::{DecodeError, EncodeError};
use thiserror::Error;

/// Client-level failures surfaced through the outbound API.
#[derive(Debug, Error)]
pub enum Error {
    /// The session is not in the Connected state.
    #[error("client is not connected")]
    NotConnected,
    /// QoS 2 delivery is not part of this client.
    #[error("QoS 2 delivery is not supported")]
    UnsupportedQos,
    /// The topic filter does not follow the wildcard rules.
    #[error("invalid topic filter `{0}`")]
    InvalidFilter(String),
    /// The subscription table is at capacity.
    #[error("subscription table is full ({0} entries)")]
    SubscriptionLimit(usize),
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("transport failure")]
    Transport(#[source] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

//! MQTT 3.1.1 wire protocol codec.
//!
//! Pure transformations between [`Packet`] values and byte buffers: the
//! fixed header with its remaining-length variable byte integer,
//! length-prefixed UTF-8 strings, and the packet bodies a lightweight
//! client exchanges with a broker. The QoS 2 delivery flow and MQTT 5.0
//! properties are out of scope; the decoder reports their packets as
//! [`DecodeError::UnsupportedPacketType`].
//!
//! Decoding borrows from the input buffer ([`Packet`] carries `&str` /
//! `&[u8]` views); encoding writes into any [`bytes::BufMut`] sink.

mod decode;
mod encode;
mod packet;

pub use crate::decode::{decode_variable_length, read_packet, DecodeError, MAX_REMAINING_LENGTH};
pub use crate::encode::{write_packet, EncodeError, WriteTo};
pub use crate::packet::{
    Connect, ConnectAck, ConnectAckFlags, ConnectFlags, ConnectReturnCode, FixedHeader, LastWill,
    Packet, PacketId, Publish, PublishAck, PublishFlags, QoS, Subscribe, SubscribeAck,
    SubscribeReturnCode, Type, Unsubscribe, UnsubscribeAck, PROTOCOL_LEVEL, PROTOCOL_NAME,
};

use bytes::Bytes;

use mqttlite_packet::{PacketId, Publish, QoS};

/// An application message decoded from an inbound PUBLISH packet.
///
/// Owns its topic and payload; the transport buffer the packet arrived in
/// is free to be reused once the handlers return.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
    pub dup: bool,
    pub packet_id: Option<PacketId>,
}

impl From<&Publish<'_>> for Message {
    fn from(publish: &Publish<'_>) -> Self {
        Message {
            topic: publish.topic.to_owned(),
            payload: Bytes::copy_from_slice(publish.payload),
            qos: publish.qos,
            retain: publish.retain,
            dup: publish.dup,
            packet_id: publish.packet_id,
        }
    }
}

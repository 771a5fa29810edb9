use core::mem;

use bytes::BufMut;
use thiserror::Error;

use crate::packet::*;

const LENGTH_FIELD_SIZE: usize = mem::size_of::<u16>();

/// Encoding failures.
#[derive(Debug, PartialEq, Eq, Error)]
pub enum EncodeError {
    /// The encoded packet would not fit the destination buffer.
    #[error("packet of {size} bytes exceeds the {capacity} byte write buffer")]
    OversizedPacket { size: usize, capacity: usize },
}

impl Packet<'_> {
    fn fixed_header(&self) -> FixedHeader {
        FixedHeader {
            packet_type: self.packet_type(),
            packet_flags: self.packet_flags(),
            remaining_length: self.remaining_length(),
        }
    }

    /// The MQTT control packet type.
    pub fn packet_type(&self) -> Type {
        match *self {
            Packet::Connect(_) => Type::CONNECT,
            Packet::ConnectAck(_) => Type::CONNACK,
            Packet::Publish(_) => Type::PUBLISH,
            Packet::PublishAck(_) => Type::PUBACK,
            Packet::Subscribe(_) => Type::SUBSCRIBE,
            Packet::SubscribeAck(_) => Type::SUBACK,
            Packet::Unsubscribe(_) => Type::UNSUBSCRIBE,
            Packet::UnsubscribeAck(_) => Type::UNSUBACK,
            Packet::Ping => Type::PINGREQ,
            Packet::Pong => Type::PINGRESP,
            Packet::Disconnect => Type::DISCONNECT,
        }
    }

    fn packet_flags(&self) -> u8 {
        match self {
            Packet::Publish(publish) => publish.flags().bits(),
            Packet::Subscribe(_) | Packet::Unsubscribe(_) => 0x02,
            _ => 0,
        }
    }

    fn remaining_length(&self) -> usize {
        match self {
            Packet::Connect(connect) => connect.size(),
            Packet::ConnectAck(connect_ack) => connect_ack.size(),
            Packet::Publish(publish) => publish.size(),
            Packet::PublishAck(publish_ack) => publish_ack.size(),
            Packet::Subscribe(subscribe) => subscribe.size(),
            Packet::SubscribeAck(subscribe_ack) => subscribe_ack.size(),
            Packet::Unsubscribe(unsubscribe) => unsubscribe.size(),
            Packet::UnsubscribeAck(unsubscribe_ack) => unsubscribe_ack.size(),
            Packet::Ping | Packet::Pong | Packet::Disconnect => 0,
        }
    }
}

trait BufMutExt: BufMut {
    fn put_utf8_str(&mut self, s: &str) {
        self.put_binary(s.as_bytes())
    }

    fn put_binary(&mut self, s: &[u8]) {
        self.put_u16(s.len() as u16);
        self.put_slice(s)
    }

    fn put_varint(&mut self, mut n: usize) {
        loop {
            let b = (n % 0x80) as u8;
            n >>= 7;
            if n > 0 {
                self.put_u8(0x80 | b);
            } else {
                self.put_u8(b);
                break;
            }
        }
    }
}

impl<T: BufMut> BufMutExt for T {}

/// A trait for objects which can be written to byte-oriented sinks.
pub trait WriteTo {
    /// Gets the size of this object.
    fn size(&self) -> usize;

    /// Writes this object to the given byte-oriented sink.
    fn write_to<T: BufMut>(&self, buf: &mut T);
}

/// Encodes `packet` into `buf`, refusing packets that exceed `capacity` bytes.
///
/// Returns the number of bytes written,
/// i.e. `1 + remaining-length bytes + remaining length`.
pub fn write_packet<T: BufMut>(
    buf: &mut T,
    packet: &Packet<'_>,
    capacity: usize,
) -> Result<usize, EncodeError> {
    let size = packet.size();
    if size > capacity {
        return Err(EncodeError::OversizedPacket { size, capacity });
    }
    packet.write_to(buf);
    Ok(size)
}

impl WriteTo for Packet<'_> {
    fn size(&self) -> usize {
        let fixed_header = self.fixed_header();
        fixed_header.size() + fixed_header.remaining_length
    }

    fn write_to<T: BufMut>(&self, buf: &mut T) {
        self.fixed_header().write_to(buf);

        match self {
            Packet::Connect(connect) => connect.write_to(buf),
            Packet::ConnectAck(connect_ack) => connect_ack.write_to(buf),
            Packet::Publish(publish) => publish.write_to(buf),
            Packet::PublishAck(publish_ack) => publish_ack.write_to(buf),
            Packet::Subscribe(subscribe) => subscribe.write_to(buf),
            Packet::SubscribeAck(subscribe_ack) => subscribe_ack.write_to(buf),
            Packet::Unsubscribe(unsubscribe) => unsubscribe.write_to(buf),
            Packet::UnsubscribeAck(unsubscribe_ack) => unsubscribe_ack.write_to(buf),
            Packet::Ping | Packet::Pong | Packet::Disconnect => {}
        }
    }
}

fn size_of_varint(n: usize) -> usize {
    match n {
        n if n <= 127 => 1,         // (0x7F)
        n if n <= 16_383 => 2,      // (0xFF, 0x7F)
        n if n <= 2_097_151 => 3,   // (0xFF, 0xFF, 0x7F)
        n if n <= 268_435_455 => 4, // (0xFF, 0xFF, 0xFF, 0x7F)
        _ => panic!("variable integer {} too large", n),
    }
}

impl WriteTo for FixedHeader {
    fn size(&self) -> usize {
        mem::size_of::<u8>() + size_of_varint(self.remaining_length)
    }

    fn write_to<T: BufMut>(&self, buf: &mut T) {
        buf.put_u8(((self.packet_type as u8) << 4) + self.packet_flags);
        buf.put_varint(self.remaining_length);
    }
}

impl WriteTo for Connect<'_> {
    fn size(&self) -> usize {
        PROTOCOL_NAME.len()
            + mem::size_of::<u8>()                      // protocol_level
            + mem::size_of::<ConnectFlags>()            // flags
            + mem::size_of::<u16>()                     // keep_alive
            + LENGTH_FIELD_SIZE + self.client_id.len()  // client_id
            + self.last_will.as_ref().map_or(0, |will| {
                LENGTH_FIELD_SIZE + will.topic.len() + LENGTH_FIELD_SIZE + will.message.len()
            })
            + self.username.map_or(0, |s| LENGTH_FIELD_SIZE + s.len())
            + self.password.map_or(0, |s| LENGTH_FIELD_SIZE + s.len())
    }

    fn write_to<T: BufMut>(&self, buf: &mut T) {
        let mut flags = ConnectFlags::empty();
        if let Some(ref will) = self.last_will {
            flags |= ConnectFlags::LAST_WILL | will.qos.into();
            if will.retain {
                flags.insert(ConnectFlags::WILL_RETAIN);
            }
        }
        if self.username.is_some() {
            flags |= ConnectFlags::USERNAME;
        }
        if self.password.is_some() {
            flags |= ConnectFlags::PASSWORD;
        }
        if self.clean_session {
            flags |= ConnectFlags::CLEAN_SESSION;
        }

        buf.put_slice(PROTOCOL_NAME);
        buf.put_u8(PROTOCOL_LEVEL);
        buf.put_u8(flags.bits());
        buf.put_u16(self.keep_alive);
        buf.put_utf8_str(self.client_id);
        if let Some(ref will) = self.last_will {
            buf.put_utf8_str(will.topic);
            buf.put_binary(will.message);
        }
        if let Some(username) = self.username {
            buf.put_utf8_str(username);
        }
        if let Some(password) = self.password {
            buf.put_binary(password);
        }
    }
}

impl WriteTo for ConnectAck {
    fn size(&self) -> usize {
        mem::size_of::<ConnectAckFlags>() + mem::size_of::<ConnectReturnCode>()
    }

    fn write_to<T: BufMut>(&self, buf: &mut T) {
        buf.put_u8(if self.session_present {
            ConnectAckFlags::SESSION_PRESENT.bits()
        } else {
            0
        });
        buf.put_u8(self.return_code as u8);
    }
}

impl WriteTo for Publish<'_> {
    fn size(&self) -> usize {
        LENGTH_FIELD_SIZE
            + self.topic.len()
            + self.packet_id.map_or(0, |_| mem::size_of::<PacketId>())
            + self.payload.len()
    }

    fn write_to<T: BufMut>(&self, buf: &mut T) {
        buf.put_utf8_str(self.topic);
        if let Some(packet_id) = self.packet_id {
            buf.put_u16(packet_id);
        }
        buf.put_slice(self.payload)
    }
}

impl WriteTo for PublishAck {
    fn size(&self) -> usize {
        mem::size_of::<PacketId>()
    }

    fn write_to<T: BufMut>(&self, buf: &mut T) {
        buf.put_u16(self.packet_id);
    }
}

impl WriteTo for Subscribe<'_> {
    fn size(&self) -> usize {
        mem::size_of::<PacketId>() + LENGTH_FIELD_SIZE + self.topic_filter.len() + mem::size_of::<QoS>()
    }

    fn write_to<T: BufMut>(&self, buf: &mut T) {
        buf.put_u16(self.packet_id);
        buf.put_utf8_str(self.topic_filter);
        buf.put_u8(self.qos as u8)
    }
}

impl WriteTo for SubscribeAck {
    fn size(&self) -> usize {
        mem::size_of::<PacketId>() + mem::size_of::<u8>()
    }

    fn write_to<T: BufMut>(&self, buf: &mut T) {
        buf.put_u16(self.packet_id);
        buf.put_u8(self.return_code.into())
    }
}

impl WriteTo for Unsubscribe<'_> {
    fn size(&self) -> usize {
        mem::size_of::<PacketId>() + LENGTH_FIELD_SIZE + self.topic_filter.len()
    }

    fn write_to<T: BufMut>(&self, buf: &mut T) {
        buf.put_u16(self.packet_id);
        buf.put_utf8_str(self.topic_filter);
    }
}

impl WriteTo for UnsubscribeAck {
    fn size(&self) -> usize {
        mem::size_of::<PacketId>()
    }

    fn write_to<T: BufMut>(&self, buf: &mut T) {
        buf.put_u16(self.packet_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoded_data() {
        let mut v = Vec::new();

        v.put_utf8_str("hello");
        v.put_binary(b"world");
        v.put_varint(123);
        v.put_varint(129);
        v.put_varint(16383);
        v.put_varint(2097151);
        v.put_varint(268435455);

        assert_eq!(
            v,
            b"\x00\x05hello\x00\x05world\x7b\x81\x01\xff\x7f\xff\xff\x7f\xff\xff\xff\x7f"
        );
    }

    macro_rules! assert_packet {
        ($packet:expr, $right:expr) => {
            assert_eq!($packet.size(), $right.len(), "assert packet size");

            let mut v = Vec::new();
            $packet.write_to(&mut v);
            assert_eq!(v, &$right[..], "assert packet content: {:#?}", $packet);
        };
    }

    #[test]
    fn test_connect() {
        assert_packet!(
            Packet::Connect(Connect {
                clean_session: false,
                keep_alive: 60,
                client_id: "12345",
                last_will: None,
                username: Some("user"),
                password: Some(b"pass"),
            }),
            b"\x10\x1D\x00\x04MQTT\x04\xC0\x00\x3C\x00\x0512345\x00\x04user\x00\x04pass"
        );

        assert_packet!(
            Packet::Connect(Connect {
                clean_session: false,
                keep_alive: 60,
                client_id: "12345",
                last_will: Some(LastWill {
                    qos: QoS::AtLeastOnce,
                    retain: false,
                    topic: "topic",
                    message: b"message",
                }),
                username: None,
                password: None,
            }),
            b"\x10\x21\x00\x04MQTT\x04\x0C\x00\x3C\x00\x0512345\x00\x05topic\x00\x07message"
        );

        assert_packet!(
            Packet::Connect(Connect {
                clean_session: true,
                keep_alive: 60,
                client_id: "c",
                last_will: None,
                username: Some("u"),
                password: Some(b"p"),
            }),
            b"\x10\x13\x00\x04MQTT\x04\xC2\x00\x3C\x00\x01c\x00\x01u\x00\x01p"
        );

        assert_packet!(
            Packet::ConnectAck(ConnectAck {
                session_present: false,
                return_code: ConnectReturnCode::ConnectionAccepted,
            }),
            b"\x20\x02\x00\x00"
        );

        assert_packet!(Packet::Disconnect, b"\xe0\x00");
    }

    #[test]
    fn test_publish() {
        assert_packet!(
            Packet::Publish(Publish {
                dup: true,
                retain: true,
                qos: QoS::AtLeastOnce,
                topic: "topic",
                packet_id: Some(0x4321),
                payload: b"data",
            }),
            b"\x3b\x0D\x00\x05topic\x43\x21data"
        );

        assert_packet!(
            Packet::Publish(Publish {
                dup: false,
                retain: false,
                qos: QoS::AtMostOnce,
                topic: "topic",
                packet_id: None,
                payload: b"data",
            }),
            b"\x30\x0b\x00\x05topicdata"
        );

        assert_packet!(
            Packet::Publish(Publish {
                dup: false,
                retain: false,
                qos: QoS::AtMostOnce,
                topic: "t",
                packet_id: None,
                payload: b"\x41",
            }),
            b"\x30\x04\x00\x01tA"
        );

        assert_packet!(
            Packet::PublishAck(PublishAck { packet_id: 0x4321 }),
            b"\x40\x02\x43\x21"
        );
    }

    #[test]
    fn test_subscribe() {
        assert_packet!(
            Packet::Subscribe(Subscribe {
                packet_id: 0x1234,
                topic_filter: "test",
                qos: QoS::AtLeastOnce,
            }),
            b"\x82\x09\x12\x34\x00\x04test\x01"
        );

        assert_packet!(
            Packet::Subscribe(Subscribe {
                packet_id: 1,
                topic_filter: "t",
                qos: QoS::AtMostOnce,
            }),
            b"\x82\x06\x00\x01\x00\x01t\x00"
        );

        assert_packet!(
            Packet::SubscribeAck(SubscribeAck {
                packet_id: 0x1234,
                return_code: SubscribeReturnCode::Success(QoS::AtLeastOnce),
            }),
            b"\x90\x03\x12\x34\x01"
        );

        assert_packet!(
            Packet::SubscribeAck(SubscribeAck {
                packet_id: 0x1234,
                return_code: SubscribeReturnCode::Failure,
            }),
            b"\x90\x03\x12\x34\x80"
        );

        assert_packet!(
            Packet::Unsubscribe(Unsubscribe {
                packet_id: 0x1234,
                topic_filter: "test",
            }),
            b"\xa2\x08\x12\x34\x00\x04test"
        );

        assert_packet!(
            Packet::UnsubscribeAck(UnsubscribeAck { packet_id: 0x4321 }),
            b"\xb0\x02\x43\x21"
        );
    }

    #[test]
    fn test_ping_pong() {
        assert_packet!(Packet::Ping, b"\xc0\x00");
        assert_packet!(Packet::Pong, b"\xd0\x00");
    }

    #[test]
    fn test_oversized_packet() {
        let payload = vec![0u8; 600];
        let packet = Packet::Publish(Publish {
            dup: false,
            retain: false,
            qos: QoS::AtMostOnce,
            topic: "t",
            packet_id: None,
            payload: &payload,
        });

        let mut buf = Vec::new();
        assert_eq!(
            write_packet(&mut buf, &packet, 512),
            Err(EncodeError::OversizedPacket {
                size: packet.size(),
                capacity: 512,
            })
        );
        assert!(buf.is_empty());

        let packet = Packet::Ping;
        assert_eq!(write_packet(&mut buf, &packet, 512), Ok(2));
        assert_eq!(buf, b"\xc0\x00");
    }
}

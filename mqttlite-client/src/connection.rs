use bytes::BytesMut;
use log::{debug, trace};

use mqttlite_packet::{
    write_packet, Connect, Packet, PacketId, Publish, PublishAck, QoS, Subscribe, Unsubscribe,
};

use crate::error::{Error, Result};
use crate::options::ConnectOptions;
use crate::transport::Transport;

/// Connection lifecycle states.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum State {
    Disconnected,
    Resolving,
    TcpConnecting,
    MqttConnecting,
    Connected,
    Closing,
}

/// Size of the packet write buffer; outbound packets must fit it.
pub const WRITE_BUFFER_SIZE: usize = 512;

/// The protocol half of a session: encodes outbound packets into an owned
/// write buffer and hands them to the transport.
///
/// Subscription handlers and user callbacks borrow this type, so replies
/// can be published from inside a handler.
pub struct Connection<T> {
    options: ConnectOptions,
    state: State,
    packet_id: PacketId,
    write_buf: BytesMut,
    transport: T,
}

impl<T> Connection<T> {
    pub(crate) fn new(transport: T, options: ConnectOptions) -> Self {
        Connection {
            options,
            state: State::Disconnected,
            packet_id: 1,
            write_buf: BytesMut::with_capacity(WRITE_BUFFER_SIZE),
            transport,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn options(&self) -> &ConnectOptions {
        &self.options
    }

    pub(crate) fn set_state(&mut self, state: State) {
        if self.state != state {
            debug!("state {:?} -> {:?}", self.state, state);
        }
        self.state = state;
    }

    /// Hands out the next packet identifier.
    ///
    /// Identifiers start at 1 after every CONNECT and wrap from 65535 back
    /// to 1; 0 is never produced.
    pub(crate) fn next_packet_id(&mut self) -> PacketId {
        let id = self.packet_id;
        self.packet_id = if self.packet_id == u16::MAX {
            1
        } else {
            self.packet_id + 1
        };
        id
    }
}

impl<T: Transport> Connection<T> {
    pub(crate) fn transport(&mut self) -> &mut T {
        &mut self.transport
    }

    fn send_packet(&mut self, packet: &Packet<'_>) -> Result<()> {
        self.write_buf.clear();
        write_packet(&mut self.write_buf, packet, WRITE_BUFFER_SIZE)?;
        trace!(
            "write {:?} packet as {} bytes: {:02x?}",
            packet.packet_type(),
            self.write_buf.len(),
            &self.write_buf[..]
        );
        self.transport.send(&self.write_buf).map_err(Error::Transport)
    }

    /// Encodes and sends CONNECT, restarting the packet-id sequence.
    pub(crate) fn send_connect(&mut self) -> Result<()> {
        if let Some(will) = &self.options.last_will {
            if will.qos == QoS::ExactlyOnce {
                return Err(Error::UnsupportedQos);
            }
        }
        self.packet_id = 1;

        let Connection {
            options,
            write_buf,
            transport,
            ..
        } = self;

        let packet = Packet::Connect(Connect {
            clean_session: options.clean_session,
            keep_alive: options.keep_alive,
            client_id: &options.client_id,
            last_will: options.last_will.as_ref().map(|will| mqttlite_packet::LastWill {
                qos: will.qos,
                retain: will.retain,
                topic: &will.topic,
                message: &will.payload,
            }),
            username: options.username.as_deref(),
            password: options.password.as_deref(),
        });

        write_buf.clear();
        write_packet(write_buf, &packet, WRITE_BUFFER_SIZE)?;
        trace!("write CONNECT packet as {} bytes: {:02x?}", write_buf.len(), &write_buf[..]);
        transport.send(write_buf).map_err(Error::Transport)
    }

    /// Publishes `payload` to `topic`.
    ///
    /// QoS 1 allocates and returns the packet identifier; QoS 2 is refused.
    pub fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<Option<PacketId>> {
        if qos == QoS::ExactlyOnce {
            return Err(Error::UnsupportedQos);
        }
        if self.state != State::Connected {
            return Err(Error::NotConnected);
        }

        let packet_id = if qos >= QoS::AtLeastOnce {
            Some(self.next_packet_id())
        } else {
            None
        };

        self.send_packet(&Packet::Publish(Publish {
            dup: false,
            qos,
            retain,
            topic,
            packet_id,
            payload,
        }))?;

        Ok(packet_id)
    }

    pub(crate) fn send_subscribe(&mut self, topic_filter: &str, qos: QoS) -> Result<PacketId> {
        if self.state != State::Connected {
            return Err(Error::NotConnected);
        }
        let packet_id = self.next_packet_id();
        self.send_packet(&Packet::Subscribe(Subscribe {
            packet_id,
            topic_filter,
            qos,
        }))?;
        Ok(packet_id)
    }

    pub(crate) fn send_unsubscribe(&mut self, topic_filter: &str) -> Result<PacketId> {
        if self.state != State::Connected {
            return Err(Error::NotConnected);
        }
        let packet_id = self.next_packet_id();
        self.send_packet(&Packet::Unsubscribe(Unsubscribe {
            packet_id,
            topic_filter,
        }))?;
        Ok(packet_id)
    }

    pub(crate) fn send_puback(&mut self, packet_id: PacketId) -> Result<()> {
        self.send_packet(&Packet::PublishAck(PublishAck { packet_id }))
    }

    /// Refreshes the keepalive window.
    pub(crate) fn ping(&mut self) -> Result<()> {
        if self.state != State::Connected {
            return Err(Error::NotConnected);
        }
        self.send_packet(&Packet::Ping)
    }

    /// Sends DISCONNECT and closes the transport. Nothing further goes out
    /// until the next connect.
    pub fn disconnect(&mut self) -> Result<()> {
        if self.state != State::Connected {
            return Err(Error::NotConnected);
        }
        self.send_packet(&Packet::Disconnect)?;
        self.set_state(State::Closing);
        self.transport.close();
        Ok(())
    }

    pub(crate) fn close_transport(&mut self) {
        self.transport.close();
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::io;
    use std::net::SocketAddr;
    use std::rc::Rc;

    use super::*;

    #[derive(Default, Clone)]
    struct RecordingTransport {
        sent: Rc<RefCell<Vec<Vec<u8>>>>,
    }

    impl Transport for RecordingTransport {
        fn connect(&mut self, _addr: SocketAddr) -> io::Result<()> {
            Ok(())
        }

        fn send(&mut self, buf: &[u8]) -> io::Result<()> {
            self.sent.borrow_mut().push(buf.to_vec());
            Ok(())
        }

        fn close(&mut self) {}
    }

    fn connected() -> (Connection<RecordingTransport>, Rc<RefCell<Vec<Vec<u8>>>>) {
        let transport = RecordingTransport::default();
        let sent = transport.sent.clone();
        let mut conn = Connection::new(
            transport,
            ConnectOptions::new("broker.example", 1883, "c").credentials("u", "p"),
        );
        conn.set_state(State::Connected);
        (conn, sent)
    }

    #[test]
    fn test_connect_frame() {
        let (mut conn, sent) = connected();
        conn.send_connect().unwrap();

        assert_eq!(
            sent.borrow()[0],
            b"\x10\x13\x00\x04MQTT\x04\xC2\x00\x3C\x00\x01c\x00\x01u\x00\x01p"
        );
    }

    #[test]
    fn test_packet_id_sequence() {
        let (mut conn, _sent) = connected();
        conn.send_connect().unwrap();

        assert_eq!(conn.send_subscribe("t", QoS::AtMostOnce).unwrap(), 1);
        assert_eq!(conn.send_subscribe("u", QoS::AtMostOnce).unwrap(), 2);
        assert_eq!(conn.send_unsubscribe("t").unwrap(), 3);
        assert_eq!(conn.publish("t", b"x", QoS::AtLeastOnce, false).unwrap(), Some(4));

        // QoS 0 publishes do not consume identifiers
        assert_eq!(conn.publish("t", b"x", QoS::AtMostOnce, false).unwrap(), None);
        assert_eq!(conn.send_subscribe("v", QoS::AtMostOnce).unwrap(), 5);
    }

    #[test]
    fn test_packet_id_wrap_skips_zero() {
        let (mut conn, _sent) = connected();
        conn.packet_id = u16::MAX;

        assert_eq!(conn.next_packet_id(), u16::MAX);
        assert_eq!(conn.next_packet_id(), 1);
        assert_ne!(conn.next_packet_id(), 0);
    }

    #[test]
    fn test_guards() {
        let (mut conn, sent) = connected();

        assert!(matches!(
            conn.publish("t", b"x", QoS::ExactlyOnce, false),
            Err(Error::UnsupportedQos)
        ));

        conn.set_state(State::Disconnected);
        assert!(matches!(
            conn.publish("t", b"x", QoS::AtMostOnce, false),
            Err(Error::NotConnected)
        ));
        assert!(matches!(
            conn.send_subscribe("t", QoS::AtMostOnce),
            Err(Error::NotConnected)
        ));
        assert!(matches!(conn.ping(), Err(Error::NotConnected)));
        assert!(matches!(conn.disconnect(), Err(Error::NotConnected)));
        assert!(sent.borrow().is_empty());
    }

    #[test]
    fn test_oversized_publish() {
        let (mut conn, sent) = connected();
        let payload = vec![0u8; WRITE_BUFFER_SIZE];

        assert!(matches!(
            conn.publish("t", &payload, QoS::AtMostOnce, false),
            Err(Error::Encode(_))
        ));
        assert!(sent.borrow().is_empty());
    }
}

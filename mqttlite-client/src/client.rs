use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use log::{debug, error, info, trace, warn};

use mqttlite_packet::{
    read_packet, ConnectAck, ConnectReturnCode, DecodeError, Packet, PacketId, QoS,
    SubscribeReturnCode,
};

use crate::backoff::Backoff;
use crate::connection::{Connection, State};
use crate::error::{Error, Result};
use crate::framed::FrameBuffer;
use crate::message::Message;
use crate::options::ConnectOptions;
use crate::subscription::{MessageHandler, SubscriptionTable, DEFAULT_SUBSCRIPTION_LIMIT};
use crate::topic::Filter;
use crate::transport::{Resolution, Resolver, Timer, Transport};

/// Size of the inbound packet buffer; frames that declare more than this
/// tear the connection down.
pub const READ_BUFFER_SIZE: usize = 512;

type ConnectCallback<T> = Box<dyn FnMut(ClientHandle<'_, T>, ConnectReturnCode)>;
type SubscribeCallback<T> = Box<dyn FnMut(ClientHandle<'_, T>, SubscribeReturnCode, PacketId)>;
type UnsubscribeCallback<T> = Box<dyn FnMut(ClientHandle<'_, T>, PacketId)>;
type MessageCallback<T> = Box<dyn FnMut(ClientHandle<'_, T>, &Message)>;
type DisconnectCallback<T> = Box<dyn FnMut(ClientHandle<'_, T>)>;

struct Callbacks<T> {
    connect: Option<ConnectCallback<T>>,
    subscribe: Option<SubscribeCallback<T>>,
    unsubscribe: Option<UnsubscribeCallback<T>>,
    message: Option<MessageCallback<T>>,
    disconnect: Option<DisconnectCallback<T>>,
}

impl<T> Default for Callbacks<T> {
    fn default() -> Self {
        Callbacks {
            connect: None,
            subscribe: None,
            unsubscribe: None,
            message: None,
            disconnect: None,
        }
    }
}

/// Mutable view of the session lent into user callbacks.
///
/// Everything the outbound API offers is available here, including
/// subscription changes, so the usual subscribe-on-connect flow works from
/// inside the connect callback.
pub struct ClientHandle<'a, T> {
    conn: &'a mut Connection<T>,
    subscriptions: &'a mut SubscriptionTable<T>,
}

impl<'a, T: Transport> ClientHandle<'a, T> {
    pub fn connection(&mut self) -> &mut Connection<T> {
        self.conn
    }

    pub fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<Option<PacketId>> {
        self.conn.publish(topic, payload, qos, retain)
    }

    pub fn subscribe<F>(&mut self, topic_filter: &str, qos: QoS, handler: F) -> Result<PacketId>
    where
        F: FnMut(&mut Connection<T>, &Message) + 'static,
    {
        subscribe(self.conn, self.subscriptions, topic_filter, qos, Box::new(handler))
    }

    pub fn unsubscribe(&mut self, topic_filter: &str) -> Result<PacketId> {
        unsubscribe(self.conn, self.subscriptions, topic_filter)
    }

    pub fn disconnect(&mut self) -> Result<()> {
        self.conn.disconnect()
    }
}

fn subscribe<T: Transport>(
    conn: &mut Connection<T>,
    subscriptions: &mut SubscriptionTable<T>,
    topic_filter: &str,
    qos: QoS,
    handler: MessageHandler<T>,
) -> Result<PacketId> {
    if conn.state() != State::Connected {
        return Err(Error::NotConnected);
    }
    let filter = topic_filter.parse::<Filter>()?;
    // Register ahead of the SUBACK round trip so a message arriving right
    // after it is not dropped.
    subscriptions.register(topic_filter, filter, handler)?;
    debug!("{} live subscription(s)", subscriptions.len());
    conn.send_subscribe(topic_filter, qos)
}

fn unsubscribe<T: Transport>(
    conn: &mut Connection<T>,
    subscriptions: &mut SubscriptionTable<T>,
    topic_filter: &str,
) -> Result<PacketId> {
    if conn.state() != State::Connected {
        return Err(Error::NotConnected);
    }
    // The handler goes away even if the broker never acknowledges.
    subscriptions.unregister(topic_filter);
    conn.send_unsubscribe(topic_filter)
}

/// An MQTT 3.1.1 client session.
///
/// Owns the transport, the keepalive timer and the subscription table, and
/// drives the connection state machine. The host event loop feeds transport
/// and timer events into the `handle_*` entry points; each runs to
/// completion on a single cooperative context.
pub struct Client<T, R, K> {
    conn: Connection<T>,
    resolver: R,
    timer: K,
    subscriptions: SubscriptionTable<T>,
    callbacks: Callbacks<T>,
    read_buf: FrameBuffer,
    backoff: Backoff,
}

impl<T, R, K> Client<T, R, K>
where
    T: Transport,
    R: Resolver,
    K: Timer,
{
    pub fn new(transport: T, resolver: R, timer: K, options: ConnectOptions) -> Self {
        Client {
            conn: Connection::new(transport, options),
            resolver,
            timer,
            subscriptions: SubscriptionTable::new(DEFAULT_SUBSCRIPTION_LIMIT),
            callbacks: Callbacks::default(),
            read_buf: FrameBuffer::new(READ_BUFFER_SIZE),
            backoff: Backoff::new(),
        }
    }

    /// Caps the number of live subscriptions. Call before any `subscribe`.
    pub fn subscription_limit(mut self, limit: usize) -> Self {
        self.subscriptions = SubscriptionTable::new(limit);
        self
    }

    /// Invoked with the CONNACK return code, success or not.
    pub fn on_connect<F>(mut self, callback: F) -> Self
    where
        F: FnMut(ClientHandle<'_, T>, ConnectReturnCode) + 'static,
    {
        self.callbacks.connect = Some(Box::new(callback));
        self
    }

    /// Invoked with the SUBACK status, including broker-side failure.
    pub fn on_subscribe<F>(mut self, callback: F) -> Self
    where
        F: FnMut(ClientHandle<'_, T>, SubscribeReturnCode, PacketId) + 'static,
    {
        self.callbacks.subscribe = Some(Box::new(callback));
        self
    }

    /// Invoked when the broker acknowledges an UNSUBSCRIBE.
    pub fn on_unsubscribe<F>(mut self, callback: F) -> Self
    where
        F: FnMut(ClientHandle<'_, T>, PacketId) + 'static,
    {
        self.callbacks.unsubscribe = Some(Box::new(callback));
        self
    }

    /// Fallback handler for messages no subscription matched.
    pub fn on_message<F>(mut self, callback: F) -> Self
    where
        F: FnMut(ClientHandle<'_, T>, &Message) + 'static,
    {
        self.callbacks.message = Some(Box::new(callback));
        self
    }

    /// Invoked whenever the session leaves the network.
    pub fn on_disconnect<F>(mut self, callback: F) -> Self
    where
        F: FnMut(ClientHandle<'_, T>) + 'static,
    {
        self.callbacks.disconnect = Some(Box::new(callback));
        self
    }

    pub fn state(&self) -> State {
        self.conn.state()
    }

    pub fn connection(&mut self) -> &mut Connection<T> {
        &mut self.conn
    }

    /// Starts (or restarts) the session: resolves the broker host name and
    /// initiates the transport. A no-op unless disconnected.
    pub fn connect(&mut self) -> Result<()> {
        if self.conn.state() != State::Disconnected {
            debug!("connect ignored in state {:?}", self.conn.state());
            return Ok(());
        }

        let host_name = self.conn.options().host_name.clone();
        info!("resolving {}", host_name);
        self.conn.set_state(State::Resolving);

        match self.resolver.resolve(&host_name) {
            Resolution::Ready(ip) => self.start_transport(ip),
            Resolution::Pending => Ok(()),
            Resolution::Failed => {
                self.resolve_failed();
                Ok(())
            }
        }
    }

    /// Completion entry point for resolvers that answered `Pending`.
    pub fn handle_resolved(&mut self, ip: Option<IpAddr>) {
        if self.conn.state() != State::Resolving {
            debug!("resolution ignored in state {:?}", self.conn.state());
            return;
        }
        match ip {
            Some(ip) => {
                let _ = self.start_transport(ip);
            }
            None => self.resolve_failed(),
        }
    }

    fn resolve_failed(&mut self) {
        error!("host resolution failed");
        self.finish_disconnect(false, true);
    }

    fn start_transport(&mut self, ip: IpAddr) -> Result<()> {
        let addr = SocketAddr::new(ip, self.conn.options().host_port);
        info!("connecting to {}", addr);
        self.conn.set_state(State::TcpConnecting);

        if let Err(err) = self.conn.transport().connect(addr) {
            error!("transport connect failed: {}", err);
            self.finish_disconnect(true, true);
            return Err(Error::Transport(err));
        }
        Ok(())
    }

    /// Transport handshake completion; sends CONNECT.
    pub fn handle_connected(&mut self) {
        if self.conn.state() != State::TcpConnecting {
            warn!("unexpected transport connect in state {:?}", self.conn.state());
            return;
        }

        self.read_buf.clear();
        self.conn.set_state(State::MqttConnecting);

        if let Err(err) = self.conn.send_connect() {
            error!("failed to send CONNECT: {}", err);
            self.conn.close_transport();
            self.finish_disconnect(true, true);
        }
    }

    /// Raw bytes from the transport; partial and coalesced packets are both
    /// handled.
    pub fn handle_recv(&mut self, data: &[u8]) {
        trace!("recv {} bytes: {:02x?}", data.len(), data);
        self.read_buf.extend(data);

        loop {
            match self.read_buf.next_frame() {
                Ok(Some(frame)) => match read_packet(&frame) {
                    Ok((packet, _)) => self.handle_packet(packet),
                    Err(DecodeError::UnsupportedPacketType(packet_type)) => {
                        debug!("ignoring unsupported packet type {:#04x}", packet_type);
                    }
                    Err(err) => {
                        self.protocol_error(err);
                        return;
                    }
                },
                Ok(None) => return,
                Err(err) => {
                    self.protocol_error(err);
                    return;
                }
            }
        }
    }

    /// Transport teardown notification.
    pub fn handle_disconnected(&mut self) {
        if self.conn.state() == State::Disconnected {
            debug!("transport disconnect while already disconnected");
            return;
        }
        info!("disconnected");
        let closing = self.conn.state() == State::Closing;
        self.finish_disconnect(true, !closing);
    }

    /// Transport failure notification.
    pub fn handle_error(&mut self, err: io::Error) {
        error!("transport error: {}", err);
        if self.conn.state() == State::TcpConnecting {
            self.finish_disconnect(true, true);
        }
    }

    /// Timer expiry: keepalive ping while connected, reconnect attempt
    /// while disconnected.
    pub fn handle_timer(&mut self) {
        match self.conn.state() {
            State::Connected => {
                if let Err(err) = self.conn.ping() {
                    error!("keepalive ping failed: {}", err);
                    self.conn.close_transport();
                    self.finish_disconnect(true, true);
                }
            }
            State::Disconnected => {
                self.timer.cancel();
                let _ = self.connect();
            }
            _ => {}
        }
    }

    pub fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<Option<PacketId>> {
        self.conn.publish(topic, payload, qos, retain)
    }

    /// Registers `handler` for `topic_filter` and sends SUBSCRIBE.
    pub fn subscribe<F>(&mut self, topic_filter: &str, qos: QoS, handler: F) -> Result<PacketId>
    where
        F: FnMut(&mut Connection<T>, &Message) + 'static,
    {
        subscribe(
            &mut self.conn,
            &mut self.subscriptions,
            topic_filter,
            qos,
            Box::new(handler),
        )
    }

    /// Drops the handler for `topic_filter` and sends UNSUBSCRIBE.
    pub fn unsubscribe(&mut self, topic_filter: &str) -> Result<PacketId> {
        unsubscribe(&mut self.conn, &mut self.subscriptions, topic_filter)
    }

    /// Sends DISCONNECT and quiesces until the next `connect`.
    pub fn disconnect(&mut self) -> Result<()> {
        self.conn.disconnect()?;
        self.timer.cancel();
        Ok(())
    }

    fn handle_packet(&mut self, packet: Packet<'_>) {
        trace!("read {:?}", packet);
        match packet {
            Packet::ConnectAck(ack) => self.handle_connect_ack(ack),
            Packet::Publish(ref publish) => self.handle_publish(Message::from(publish)),
            Packet::SubscribeAck(ack) => {
                if ack.return_code == SubscribeReturnCode::Failure {
                    warn!("subscription {} refused", ack.packet_id);
                }
                self.emit_subscribe(ack.return_code, ack.packet_id);
            }
            Packet::UnsubscribeAck(ack) => self.emit_unsubscribe(ack.packet_id),
            Packet::PublishAck(ack) => debug!("PUBACK for packet {}", ack.packet_id),
            Packet::Pong => trace!("PINGRESP"),
            packet => warn!("unexpected inbound {:?} packet", packet.packet_type()),
        }
    }

    fn handle_connect_ack(&mut self, ack: ConnectAck) {
        if self.conn.state() != State::MqttConnecting {
            warn!("unexpected CONNACK in state {:?}", self.conn.state());
            return;
        }

        if ack.return_code == ConnectReturnCode::ConnectionAccepted {
            info!("connected (session present: {})", ack.session_present);
            self.conn.set_state(State::Connected);
            self.backoff.reset();
            let keep_alive = self.conn.options().keep_alive;
            if keep_alive > 0 {
                self.timer.arm(Duration::from_secs(u64::from(keep_alive)));
            }
            self.emit_connect(ack.return_code);
        } else {
            error!("connect rejected: {}", ack.return_code);
            self.emit_connect(ack.return_code);
            self.conn.set_state(State::Closing);
            self.conn.close_transport();
        }
    }

    fn handle_publish(&mut self, message: Message) {
        let matches = self.subscriptions.dispatch(&mut self.conn, &message);
        debug!("message on {} matched {} subscription(s)", message.topic, matches);
        if matches == 0 {
            self.emit_message(&message);
        }

        // acknowledge only after every handler has seen the message
        if message.qos == QoS::AtLeastOnce {
            if let Some(packet_id) = message.packet_id {
                if let Err(err) = self.conn.send_puback(packet_id) {
                    error!("failed to acknowledge packet {}: {}", packet_id, err);
                }
            }
        }
    }

    fn protocol_error(&mut self, err: DecodeError) {
        error!("protocol error: {}", err);
        self.read_buf.clear();
        self.conn.close_transport();
        self.finish_disconnect(true, true);
    }

    fn finish_disconnect(&mut self, notify: bool, reconnect: bool) {
        self.timer.cancel();
        self.conn.set_state(State::Disconnected);
        self.read_buf.clear();
        if notify {
            self.emit_disconnect();
        }
        if reconnect && self.conn.options().reconnect {
            self.schedule_reconnect();
        }
    }

    fn schedule_reconnect(&mut self) {
        let delay = self.backoff.next_delay();
        debug!("reconnecting in {:?}", delay);
        self.timer.arm(delay);
    }

    fn emit_connect(&mut self, return_code: ConnectReturnCode) {
        if let Some(callback) = self.callbacks.connect.as_mut() {
            callback(
                ClientHandle {
                    conn: &mut self.conn,
                    subscriptions: &mut self.subscriptions,
                },
                return_code,
            );
        }
    }

    fn emit_subscribe(&mut self, return_code: SubscribeReturnCode, packet_id: PacketId) {
        if let Some(callback) = self.callbacks.subscribe.as_mut() {
            callback(
                ClientHandle {
                    conn: &mut self.conn,
                    subscriptions: &mut self.subscriptions,
                },
                return_code,
                packet_id,
            );
        }
    }

    fn emit_unsubscribe(&mut self, packet_id: PacketId) {
        if let Some(callback) = self.callbacks.unsubscribe.as_mut() {
            callback(
                ClientHandle {
                    conn: &mut self.conn,
                    subscriptions: &mut self.subscriptions,
                },
                packet_id,
            );
        }
    }

    fn emit_message(&mut self, message: &Message) {
        if let Some(callback) = self.callbacks.message.as_mut() {
            callback(
                ClientHandle {
                    conn: &mut self.conn,
                    subscriptions: &mut self.subscriptions,
                },
                message,
            );
        }
    }

    fn emit_disconnect(&mut self) {
        if let Some(callback) = self.callbacks.disconnect.as_mut() {
            callback(ClientHandle {
                conn: &mut self.conn,
                subscriptions: &mut self.subscriptions,
            });
        }
    }
}

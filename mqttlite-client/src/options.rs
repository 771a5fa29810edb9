use mqttlite_packet::QoS;

/// Default PINGREQ period in seconds.
pub const DEFAULT_KEEPALIVE: u16 = 60;

/// A message the broker publishes on behalf of a client that disappears
/// without sending DISCONNECT.
///
/// Only QoS 0 and 1 wills are accepted; a QoS 2 will fails the connect.
#[derive(Debug, Clone, PartialEq)]
pub struct LastWill {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

/// Broker endpoint and session settings, immutable once the session starts.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Host name handed to the resolver.
    pub host_name: String,
    /// Remote port, typically 1883 (or 8883 with `secure`).
    pub host_port: u16,
    /// Ask the host for a TLS transport instead of plain TCP.
    pub secure: bool,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<Vec<u8>>,
    /// Maximum interval between client packets, in seconds; 0 disables the
    /// keepalive ping.
    pub keep_alive: u16,
    /// Ask the broker to discard any prior session state for this client id.
    pub clean_session: bool,
    pub last_will: Option<LastWill>,
    /// Re-enter the connect flow after an involuntary disconnect.
    pub reconnect: bool,
}

impl ConnectOptions {
    pub fn new(
        host_name: impl Into<String>,
        host_port: u16,
        client_id: impl Into<String>,
    ) -> Self {
        ConnectOptions {
            host_name: host_name.into(),
            host_port,
            secure: false,
            client_id: client_id.into(),
            username: None,
            password: None,
            keep_alive: DEFAULT_KEEPALIVE,
            clean_session: true,
            last_will: None,
            reconnect: true,
        }
    }

    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    pub fn credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<Vec<u8>>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn keep_alive(mut self, seconds: u16) -> Self {
        self.keep_alive = seconds;
        self
    }

    pub fn clean_session(mut self, clean_session: bool) -> Self {
        self.clean_session = clean_session;
        self
    }

    pub fn last_will(mut self, last_will: LastWill) -> Self {
        self.last_will = Some(last_will);
        self
    }

    pub fn reconnect(mut self, reconnect: bool) -> Self {
        self.reconnect = reconnect;
        self
    }
}
